//! Strategy chain that turns a reference into a definition.
//!
//! Each strategy has a `try_claim` function that looks at a classified
//! [`Reference`] and, using only existence checks and index lookups, either
//! claims it by returning a [`Loader`] or passes. Strategies are asked in a
//! fixed order and the first claim wins; [`NullLoader`] claims everything that
//! is left and fails with [`FormularyError::Unavailable`].

mod api;
mod bottle;
mod installed;
mod path;
mod tap;
mod uri;

pub use api::ApiLoader;
pub use bottle::BottleLoader;
pub use installed::{CacheLoader, KegLoader};
pub use path::PathLoader;
pub use tap::TapLoader;
pub use uri::UriLoader;

use crate::api::RemoteApi;
use crate::config::Config;
use crate::definition::{Definition, PackageKind, Provenance};
use crate::definition_cache::CacheIdentity;
use crate::error::{FormularyError, Result};
use crate::materialize::{Materializer, ScriptSource};
use crate::platform::Platform;
use crate::reference::Reference;
use crate::resolver::LoadOptions;
use crate::script::ScriptRegistry;
use crate::tap::{Tap, TapRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a loader may consult.
pub struct LoadContext<'a> {
    pub config: &'a Config,
    pub platform: Platform,
    pub taps: &'a TapRegistry,
    pub registry: &'a ScriptRegistry,
    api: Option<&'a dyn RemoteApi>,
}

impl<'a> LoadContext<'a> {
    pub fn new(
        config: &'a Config,
        platform: Platform,
        taps: &'a TapRegistry,
        registry: &'a ScriptRegistry,
        api: Option<&'a dyn RemoteApi>,
    ) -> Self {
        Self {
            config,
            platform,
            taps,
            registry,
            api,
        }
    }

    /// The remote API, unless installing from it is turned off.
    pub fn api(&self) -> Option<&'a dyn RemoteApi> {
        if self.config.no_install_from_api {
            None
        } else {
            self.api
        }
    }

    pub fn materializer(&self) -> Materializer<'a> {
        Materializer::new(self.platform, self.config, self.registry)
    }

    /// Materialize a definition file: `.json` as a document, anything else as a script.
    pub fn materialize_file(
        &self,
        name: &str,
        kind: PackageKind,
        path: &Path,
        provenance: Provenance,
    ) -> Result<Definition> {
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let content = std::fs::read_to_string(path).map_err(|e| FormularyError::Unreadable {
                name: name.to_string(),
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            let doc: serde_json::Value = serde_json::from_str(&content)?;
            return self.materializer().document(&doc, kind, provenance);
        }

        self.materializer().script(ScriptSource {
            name: name.to_string(),
            kind,
            path: path.to_path_buf(),
            provenance,
            content: None,
        })
    }
}

/// A claimed reference, ready to load.
pub trait Loader: std::fmt::Debug {
    /// Name of the definition being loaded.
    fn name(&self) -> &str;

    /// Where the definition lives, or would live in its tap.
    fn path(&self) -> PathBuf;

    fn tap(&self) -> Option<Arc<Tap>> {
        None
    }

    fn kind(&self) -> PackageKind;

    fn load(&self, ctx: &LoadContext<'_>, options: &LoadOptions) -> Result<Definition>;

    /// Source table this loader's results are shared through.
    fn cache_identity(&self) -> CacheIdentity;
}

pub type Claim = Result<Option<Box<dyn Loader>>>;

type Strategy = fn(&Reference, &LoadContext<'_>, &LoadOptions) -> Claim;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("bottle", bottle::try_claim),
    ("uri", uri::try_claim),
    ("api", api::try_claim),
    ("tap", tap::try_claim),
    ("path", path::try_claim),
    ("name", tap::try_claim_name),
    ("keg", installed::try_claim_keg),
    ("cache", installed::try_claim_cache),
];

/// Ask each strategy in order; the null loader takes whatever is left.
pub fn claim(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Result<Box<dyn Loader>> {
    for (strategy, try_claim) in STRATEGIES {
        if let Some(loader) = try_claim(reference, ctx, options)? {
            tracing::debug!("{} loader claimed {}", strategy, reference.raw());
            return Ok(loader);
        }
    }

    tracing::debug!("No loader claimed {}", reference.raw());
    Ok(Box::new(NullLoader::new(reference, ctx, options.kind)))
}

/// Claims everything, loads nothing.
#[derive(Debug)]
pub struct NullLoader {
    name: String,
    kind: PackageKind,
    path: PathBuf,
}

impl NullLoader {
    pub fn new(reference: &Reference, ctx: &LoadContext<'_>, kind: PackageKind) -> Self {
        let name = reference.name_hint().to_lowercase();
        let path = ctx.taps.default_tap(kind).definition_path(&name, kind);
        Self {
            name: reference.raw().to_string(),
            kind,
            path,
        }
    }
}

impl Loader for NullLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn kind(&self) -> PackageKind {
        self.kind
    }

    fn load(&self, _ctx: &LoadContext<'_>, _options: &LoadOptions) -> Result<Definition> {
        Err(FormularyError::Unavailable {
            kind: self.kind.as_str(),
            name: self.name.clone(),
        })
    }

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::Uncached
    }
}

/// Lowercased file stem of a definition path.
fn file_name_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

fn is_definition_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("rb") | Some("json")
    ) && path.is_file()
}
