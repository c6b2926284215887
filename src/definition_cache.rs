//! Materialized definitions, kept per platform.
//!
//! Two layers:
//!
//! - the factory table maps a full lookup (platform, kind, reference string,
//!   spec, alias path, stub preference) to its result, so resolving the same
//!   reference twice returns the same `Arc`
//! - per-platform source tables map where a definition came from (a script
//!   path, an API document or a stub) to its result, so two references to the
//!   same source share one definition
//!
//! Nothing is evicted. [`DefinitionCache::clear`] drops the source tables and,
//! unless factory caching is on, the factory table.

use crate::definition::{Definition, PackageKind, SpecKind};
use crate::platform::Platform;
use crate::resolver::LoadOptions;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Which source table a loaded definition belongs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheIdentity {
    Path(PathBuf),
    Api { kind: PackageKind, name: String },
    Stub(String),
    /// Never cached by source.
    Uncached,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactoryKey {
    platform: String,
    kind: PackageKind,
    reference: String,
    spec: Option<SpecKind>,
    alias_path: Option<PathBuf>,
    prefer_stub: bool,
}

impl FactoryKey {
    pub fn new(platform: &Platform, reference: &str, options: &LoadOptions) -> Self {
        Self {
            platform: platform.cache_key(),
            kind: options.kind,
            reference: reference.to_string(),
            spec: options.spec,
            alias_path: options.alias_path.clone(),
            prefer_stub: options.prefer_stub,
        }
    }
}

type SourceKey = (String, Option<SpecKind>, Option<PathBuf>);

#[derive(Debug, Default)]
struct PlatformTables {
    path: HashMap<SourceKey, Arc<Definition>>,
    api: HashMap<SourceKey, Arc<Definition>>,
    stub: HashMap<SourceKey, Arc<Definition>>,
}

impl PlatformTables {
    fn table(&mut self, identity: &CacheIdentity) -> Option<(&mut HashMap<SourceKey, Arc<Definition>>, String)> {
        match identity {
            CacheIdentity::Path(path) => Some((&mut self.path, path.display().to_string())),
            CacheIdentity::Api { kind, name } => Some((&mut self.api, format!("{}:{}", kind, name))),
            CacheIdentity::Stub(name) => Some((&mut self.stub, name.clone())),
            CacheIdentity::Uncached => None,
        }
    }

    fn len(&self) -> usize {
        self.path.len() + self.api.len() + self.stub.len()
    }
}

#[derive(Debug, Default)]
pub struct DefinitionCache {
    platforms: HashMap<String, PlatformTables>,
    factory: HashMap<FactoryKey, Arc<Definition>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self, key: &FactoryKey) -> Option<Arc<Definition>> {
        self.factory.get(key).cloned()
    }

    /// Record a factory result; an existing entry for `key` is kept and returned.
    pub fn insert_factory(&mut self, key: FactoryKey, def: Arc<Definition>) -> Arc<Definition> {
        self.factory.entry(key).or_insert(def).clone()
    }

    pub fn get(
        &mut self,
        platform: &Platform,
        identity: &CacheIdentity,
        options: &LoadOptions,
    ) -> Option<Arc<Definition>> {
        let tables = self.platforms.get_mut(&platform.cache_key())?;
        let (table, source) = tables.table(identity)?;
        table
            .get(&(source, options.spec, options.alias_path.clone()))
            .cloned()
    }

    /// Record a source result; an existing entry is kept and returned.
    pub fn insert(
        &mut self,
        platform: &Platform,
        identity: &CacheIdentity,
        options: &LoadOptions,
        def: Arc<Definition>,
    ) -> Arc<Definition> {
        let tables = self.platforms.entry(platform.cache_key()).or_default();
        match tables.table(identity) {
            Some((table, source)) => table
                .entry((source, options.spec, options.alias_path.clone()))
                .or_insert(def)
                .clone(),
            None => def,
        }
    }

    /// Drop source tables for every platform, and the factory table unless
    /// `keep_factory`.
    pub fn clear(&mut self, keep_factory: bool) {
        self.platforms.clear();
        if !keep_factory {
            self.factory.clear();
        }
    }

    /// Definitions held for `platform` across its source tables.
    pub fn platform_len(&self, platform: &Platform) -> usize {
        self.platforms
            .get(&platform.cache_key())
            .map(PlatformTables::len)
            .unwrap_or(0)
    }

    pub fn factory_len(&self) -> usize {
        self.factory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Provenance;
    use crate::platform::{Arch, MacosVersion, Os};

    fn def(name: &str, platform: Platform) -> Arc<Definition> {
        Arc::new(Definition::new(
            name,
            PackageKind::Formula,
            Provenance::Api,
            platform,
        ))
    }

    #[test]
    fn test_source_tables_are_per_platform() {
        let linux = Platform::new(Os::Linux, Arch::X86_64);
        let mac = Platform::macos(MacosVersion::Sonoma, Arch::Arm64);
        let options = LoadOptions::new(PackageKind::Formula);
        let identity = CacheIdentity::Api {
            kind: PackageKind::Formula,
            name: "foo".to_string(),
        };

        let mut cache = DefinitionCache::new();
        let first = cache.insert(&linux, &identity, &options, def("foo", linux));
        let again = cache.insert(&linux, &identity, &options, def("foo", linux));
        assert!(Arc::ptr_eq(&first, &again));
        assert!(cache.get(&mac, &identity, &options).is_none());

        let head = options.clone().with_spec(SpecKind::Head);
        assert!(cache.get(&linux, &identity, &head).is_none());

        assert!(cache
            .get(&linux, &CacheIdentity::Uncached, &options)
            .is_none());
        assert_eq!(cache.platform_len(&linux), 1);
    }

    #[test]
    fn test_clear_keeps_factory_when_enabled() {
        let linux = Platform::new(Os::Linux, Arch::X86_64);
        let options = LoadOptions::new(PackageKind::Formula);
        let key = FactoryKey::new(&linux, "foo", &options);

        let mut cache = DefinitionCache::new();
        cache.insert_factory(key.clone(), def("foo", linux));
        cache.insert(
            &linux,
            &CacheIdentity::Stub("foo".to_string()),
            &options,
            def("foo", linux),
        );

        cache.clear(true);
        assert_eq!(cache.platform_len(&linux), 0);
        assert!(cache.factory(&key).is_some());

        cache.clear(false);
        assert_eq!(cache.factory_len(), 0);
    }
}
