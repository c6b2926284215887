//! The entry point: references in, shared definitions out.
//!
//! ```no_run
//! use formulary::{LoadOptions, PackageKind, Resolver};
//!
//! # fn main() -> formulary::Result<()> {
//! let resolver = Resolver::from_env();
//! let wget = resolver.resolve("wget", &LoadOptions::new(PackageKind::Formula))?;
//! println!("{} {}", wget.full_name, wget.version().unwrap_or("?"));
//! # Ok(())
//! # }
//! ```

use crate::api::{CachedApi, RemoteApi};
use crate::cache::ApiCache;
use crate::canonical;
use crate::config::Config;
use crate::definition::{Definition, PackageKind, SpecKind};
use crate::definition_cache::{DefinitionCache, FactoryKey};
use crate::error::Result;
use crate::graph::ResolverGraph;
use crate::loader::{self, LoadContext, Loader};
use crate::platform::{Platform, PlatformContext, PlatformGuard};
use crate::reference::Reference;
use crate::script::ScriptRegistry;
use crate::tab::{Tab, TabOptions};
use crate::tap::TapRegistry;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// How a reference should be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadOptions {
    pub kind: PackageKind,
    /// Spec to activate; `None` leaves the definition's default.
    pub spec: Option<SpecKind>,
    /// Alias file the reference was reached through.
    pub alias_path: Option<PathBuf>,
    /// Load the bottle-only API stub when the API has the formula.
    pub prefer_stub: bool,
    /// Log renames and migrations.
    pub warn: bool,
}

impl LoadOptions {
    pub fn new(kind: PackageKind) -> Self {
        Self {
            kind,
            spec: None,
            alias_path: None,
            prefer_stub: false,
            warn: true,
        }
    }

    pub fn with_spec(mut self, spec: SpecKind) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn with_alias_path(mut self, alias_path: impl Into<PathBuf>) -> Self {
        self.alias_path = Some(alias_path.into());
        self
    }

    pub fn prefer_stub(mut self) -> Self {
        self.prefer_stub = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.warn = false;
        self
    }
}

/// Resolves references for one Homebrew installation.
///
/// Owns every cache involved: taps and their tables, the script registry and
/// the per-platform definition cache. Resolution is meant to run from one
/// thread at a time; simulated platforms are scoped by [`Resolver::simulate`].
pub struct Resolver {
    config: Config,
    platform: PlatformContext,
    taps: TapRegistry,
    registry: ScriptRegistry,
    api: Option<Arc<dyn RemoteApi>>,
    cache: Mutex<DefinitionCache>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("platform", &self.platform.current())
            .field("api", &self.api.is_some())
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(config: Config, api: Option<Arc<dyn RemoteApi>>, host: Platform) -> Self {
        Self {
            taps: TapRegistry::new(&config),
            registry: ScriptRegistry::new(),
            platform: PlatformContext::new(host),
            cache: Mutex::new(DefinitionCache::new()),
            api,
            config,
        }
    }

    /// Environment configuration, the cached API documents and the host platform.
    pub fn from_env() -> Self {
        let config = Config::from_env();
        let api: Option<Arc<dyn RemoteApi>> = if config.no_install_from_api {
            None
        } else {
            Some(Arc::new(CachedApi::new(ApiCache::new(config.api_cache_path()))))
        };
        Self::new(config, api, Platform::host())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn taps(&self) -> &TapRegistry {
        &self.taps
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    /// Platform definitions are currently materialized for.
    pub fn platform(&self) -> Platform {
        self.platform.current()
    }

    fn context(&self, platform: Platform) -> LoadContext<'_> {
        LoadContext::new(
            &self.config,
            platform,
            &self.taps,
            &self.registry,
            self.api.as_deref(),
        )
    }

    fn lock_cache(&self) -> MutexGuard<'_, DefinitionCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve `reference` to a definition. The same reference with the same
    /// options yields the same `Arc` until the cache is cleared.
    pub fn resolve(&self, reference: &str, options: &LoadOptions) -> Result<Arc<Definition>> {
        let platform = self.platform.current();
        let key = FactoryKey::new(&platform, reference, options);
        if let Some(def) = self.lock_cache().factory(&key) {
            return Ok(def);
        }

        let ctx = self.context(platform);
        let classified = Reference::classify(reference, &self.config);
        let loader = loader::claim(&classified, &ctx, options)?;
        let def = self.load_with(loader.as_ref(), &ctx, options)?;

        Ok(self.lock_cache().insert_factory(key, def))
    }

    fn load_with(
        &self,
        loader: &dyn Loader,
        ctx: &LoadContext<'_>,
        options: &LoadOptions,
    ) -> Result<Arc<Definition>> {
        let identity = loader.cache_identity();
        if let Some(def) = self.lock_cache().get(&ctx.platform, &identity, options) {
            return Ok(def);
        }

        // The cache lock is released while loading: a bottle fallback resolves again
        let mut def = loader.load(ctx, options)?;
        if let Some(alias_path) = &options.alias_path {
            def.alias_path = Some(alias_path.clone());
        }
        if let Some(spec) = options.spec {
            def.set_active_spec(spec)?;
        }

        Ok(self
            .lock_cache()
            .insert(&ctx.platform, &identity, options, Arc::new(def)))
    }

    /// Canonical spelling of `reference`; applying it twice changes nothing.
    pub fn canonical_name(&self, reference: &str, kind: PackageKind) -> String {
        let classified = Reference::classify(reference, &self.config);
        let api = if self.config.no_install_from_api {
            None
        } else {
            self.api.as_deref()
        };
        canonical::canonical_name(&self.taps, api, &classified, kind)
    }

    /// Where the definition for `reference` lives, or would live in its tap.
    pub fn path_for(&self, reference: &str, kind: PackageKind) -> Result<PathBuf> {
        let ctx = self.context(self.platform.current());
        let classified = Reference::classify(reference, &self.config);
        let options = LoadOptions::new(kind).quiet();
        Ok(loader::claim(&classified, &ctx, &options)?.path())
    }

    /// Installed receipt for `def`, read once and kept on the definition.
    pub fn tab_for(&self, def: &Definition) -> Result<Tab> {
        if let Some(tab) = def.tab() {
            return Ok(tab);
        }
        let tab = Tab::for_definition(def, &self.config)?;
        def.attach_tab(tab.clone());
        Ok(tab)
    }

    /// Receipt for a just-installed `def`, walking its runtime closure through this resolver.
    pub fn create_tab(&self, def: &Definition, options: TabOptions) -> Result<Tab> {
        Tab::create(def, &ResolverGraph::new(self), options, &self.config)
    }

    /// Materialize for `platform` until the guard drops.
    pub fn simulate(&self, platform: Platform) -> PlatformGuard<'_> {
        self.platform.simulate(platform)
    }

    pub fn with_platform<T>(&self, platform: Platform, f: impl FnOnce(&Self) -> T) -> T {
        let _guard = self.simulate(platform);
        f(self)
    }

    /// Forget materialized definitions. Factory results survive unless
    /// factory caching is disabled.
    pub fn clear_cache(&self) {
        self.lock_cache().clear(self.config.factory_cache);
    }

    /// Re-read tap tables after a tap changed on disk.
    pub fn reload_taps(&self) {
        self.taps.reload();
        self.lock_cache().clear(false);
    }
}
