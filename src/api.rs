//! Remote JSON API: document schema, offline index and async fetcher.
//!
//! Resolution never touches the network. The API loader reads through the
//! [`RemoteApi`] trait, normally implemented by [`CachedApi`] over the bulk
//! documents in the local [`ApiCache`]. [`BrewApi`] is the async client that
//! refreshes that cache.
//!
//! # Examples
//!
//! ```no_run
//! use formulary::api::{BrewApi, CachedApi, RemoteApi};
//! use formulary::cache::ApiCache;
//! use formulary::definition::PackageKind;
//!
//! #[tokio::main]
//! async fn main() -> formulary::Result<()> {
//!     let cache = ApiCache::new("/tmp/api");
//!     BrewApi::new()?.prefetch(PackageKind::Formula, &cache).await?;
//!
//!     let api = CachedApi::new(cache);
//!     println!("{:?}", api.index(PackageKind::Formula)?.resolve("python3"));
//!     Ok(())
//! }
//! ```

use crate::cache::ApiCache;
use crate::definition::PackageKind;
use crate::error::{FormularyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const HOMEBREW_API_BASE: &str = "https://formulae.brew.sh/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub stable: Option<String>,
    #[serde(default)]
    pub head: Option<String>,
    #[serde(default)]
    pub bottle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlDocument {
    pub url: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Urls {
    #[serde(default)]
    pub stable: Option<UrlDocument>,
    #[serde(default)]
    pub head: Option<UrlDocument>,
}

/// Bottle file metadata for a specific platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleFileDocument {
    pub cellar: String,
    #[serde(default)]
    pub url: Option<String>,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleSpecDocument {
    #[serde(default)]
    pub rebuild: u32,
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, BottleFileDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BottleDocument {
    #[serde(default)]
    pub stable: Option<BottleSpecDocument>,
}

/// Keg-only reason metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KegOnlyReason {
    pub reason: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsesFromMacosBound {
    #[serde(default)]
    pub since: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementDocument {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub contexts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDocument {
    pub option: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceRun {
    Command(String),
    Args(Vec<String>),
    PerOs(BTreeMap<String, serde_json::Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceName {
    Plain(String),
    PerOs(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDocument {
    #[serde(default)]
    pub run: Option<ServiceRun>,
    #[serde(default)]
    pub name: Option<ServiceName>,
    #[serde(default)]
    pub keep_alive: Option<serde_json::Value>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default)]
    pub error_log_path: Option<String>,
}

/// Formula document from the JSON API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaDocument {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub versions: Versions,
    #[serde(default)]
    pub urls: Urls,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub version_scheme: u32,
    #[serde(default)]
    pub bottle: Option<BottleDocument>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub build_dependencies: Vec<String>,
    #[serde(default)]
    pub test_dependencies: Vec<String>,
    #[serde(default)]
    pub recommended_dependencies: Vec<String>,
    #[serde(default)]
    pub optional_dependencies: Vec<String>,
    /// `"zlib"` or `{"bison": "build"}`
    #[serde(default)]
    pub uses_from_macos: Vec<serde_json::Value>,
    #[serde(default)]
    pub uses_from_macos_bounds: Vec<UsesFromMacosBound>,
    #[serde(default)]
    pub requirements: Vec<RequirementDocument>,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
    #[serde(default)]
    pub conflicts_with_reasons: Vec<Option<String>>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub deprecation_date: Option<String>,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub disable_date: Option<String>,
    #[serde(default)]
    pub disable_reason: Option<String>,
    #[serde(default)]
    pub caveats: Option<String>,
    #[serde(default)]
    pub service: Option<ServiceDocument>,
    #[serde(default)]
    pub keg_only_reason: Option<KegOnlyReason>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub oldnames: Vec<String>,
    #[serde(default)]
    pub options: Vec<OptionDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaskDependsOn {
    #[serde(default)]
    pub formula: Vec<String>,
    #[serde(default)]
    pub cask: Vec<String>,
    #[serde(default)]
    pub macos: Option<serde_json::Value>,
    #[serde(default)]
    pub arch: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaskConflicts {
    #[serde(default)]
    pub cask: Vec<String>,
    #[serde(default)]
    pub formula: Vec<String>,
}

/// Cask document from the JSON API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaskDocument {
    pub token: String,
    #[serde(default)]
    pub full_token: Option<String>,
    #[serde(default)]
    pub tap: Option<String>,
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<serde_json::Value>,
    #[serde(default)]
    pub depends_on: CaskDependsOn,
    #[serde(default)]
    pub conflicts_with: Option<CaskConflicts>,
    #[serde(default)]
    pub caveats: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub deprecation_date: Option<String>,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub disable_date: Option<String>,
    #[serde(default)]
    pub disable_reason: Option<String>,
    #[serde(default)]
    pub auto_updates: Option<bool>,
    #[serde(default)]
    pub old_tokens: Vec<String>,
}

/// Minimal bottle-only description of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaStub {
    pub name: String,
    pub pkg_version: String,
    #[serde(default)]
    pub version_scheme: u32,
    #[serde(default)]
    pub rebuild: u32,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub oldnames: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl FormulaStub {
    /// Derive a stub for `bottle_tag` from a (variation-merged) document.
    pub fn from_document(doc: &FormulaDocument, bottle_tag: &str) -> Self {
        let version = doc.versions.stable.clone().unwrap_or_default();
        let pkg_version = match doc.revision {
            0 => version,
            revision => format!("{}_{}", version, revision),
        };
        let bottle = doc.bottle.as_ref().and_then(|b| b.stable.as_ref());

        Self {
            name: doc.name.clone(),
            pkg_version,
            version_scheme: doc.version_scheme,
            rebuild: bottle.map(|b| b.rebuild).unwrap_or(0),
            sha256: bottle
                .and_then(|b| b.files.get(bottle_tag).or_else(|| b.files.get("all")))
                .map(|f| f.sha256.clone()),
            aliases: doc.aliases.clone(),
            oldnames: doc.oldnames.clone(),
            dependencies: doc.dependencies.clone(),
        }
    }

    /// (version, revision) split out of `pkg_version`.
    pub fn version_and_revision(&self) -> (String, u32) {
        match self.pkg_version.rsplit_once('_') {
            Some((version, revision)) => match revision.parse() {
                Ok(revision) => (version.to_string(), revision),
                Err(_) => (self.pkg_version.clone(), 0),
            },
            None => (self.pkg_version.clone(), 0),
        }
    }
}

/// Overlay the `variations` entry for `bottle_tag` onto `doc`.
pub fn merge_variation(doc: &serde_json::Value, bottle_tag: &str) -> serde_json::Value {
    let mut merged = doc.clone();
    let Some(object) = merged.as_object_mut() else {
        return merged;
    };

    let variation = object
        .remove("variations")
        .and_then(|mut variations| variations.get_mut(bottle_tag).map(serde_json::Value::take));

    if let Some(serde_json::Value::Object(fields)) = variation {
        for (key, value) in fields {
            object.insert(key, value);
        }
    }

    merged
}

/// Names, aliases and former names known to the API.
#[derive(Debug, Default)]
pub struct ApiIndex {
    names: BTreeSet<String>,
    aliases: HashMap<String, String>,
    renames: HashMap<String, String>,
}

impl ApiIndex {
    pub fn from_documents(kind: PackageKind, documents: &[serde_json::Value]) -> Self {
        let (name_key, renames_key) = match kind {
            PackageKind::Formula => ("name", "oldnames"),
            PackageKind::Cask => ("token", "old_tokens"),
        };

        let mut index = Self::default();
        for doc in documents {
            let Some(name) = doc.get(name_key).and_then(|n| n.as_str()) else {
                continue;
            };
            index.names.insert(name.to_string());

            for (key, table) in [("aliases", &mut index.aliases), (renames_key, &mut index.renames)]
            {
                let entries = doc.get(key).and_then(|v| v.as_array());
                for entry in entries.into_iter().flatten().filter_map(|e| e.as_str()) {
                    table.insert(entry.to_string(), name.to_string());
                }
            }
        }
        index
    }

    /// Canonical API name for `name`: itself, its alias target, or its new name.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some(name) = self.names.get(name) {
            return Some(name.as_str());
        }
        self.aliases
            .get(name)
            .or_else(|| self.renames.get(name))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Source of API documents consulted during resolution.
pub trait RemoteApi: Send + Sync {
    fn index(&self, kind: PackageKind) -> Result<Arc<ApiIndex>>;

    /// Raw document for a canonical API name.
    fn document(&self, name: &str, kind: PackageKind) -> Result<Arc<serde_json::Value>>;

    fn stub(&self, name: &str, bottle_tag: &str) -> Result<Arc<FormulaStub>>;
}

#[derive(Debug, Default)]
struct ApiTable {
    index: Arc<ApiIndex>,
    documents: HashMap<String, Arc<serde_json::Value>>,
}

impl ApiTable {
    fn new(kind: PackageKind, documents: Vec<serde_json::Value>) -> Self {
        let index = ApiIndex::from_documents(kind, &documents);
        let name_key = match kind {
            PackageKind::Formula => "name",
            PackageKind::Cask => "token",
        };
        let documents = documents
            .into_iter()
            .filter_map(|doc| {
                let name = doc.get(name_key)?.as_str()?.to_string();
                Some((name, Arc::new(doc)))
            })
            .collect();

        Self {
            index: Arc::new(index),
            documents,
        }
    }
}

/// [`RemoteApi`] over the bulk documents in the local cache.
///
/// Each index is read on first use. A missing or unreadable cache file
/// behaves as an empty index.
pub struct CachedApi {
    cache: Option<ApiCache>,
    formulae: OnceLock<ApiTable>,
    casks: OnceLock<ApiTable>,
    stubs: moka::sync::Cache<String, Arc<FormulaStub>>,
}

impl CachedApi {
    pub fn new(cache: ApiCache) -> Self {
        Self {
            cache: Some(cache),
            formulae: OnceLock::new(),
            casks: OnceLock::new(),
            stubs: moka::sync::Cache::new(1000),
        }
    }

    /// An API serving exactly the given documents.
    pub fn from_documents(
        formulae: Vec<serde_json::Value>,
        casks: Vec<serde_json::Value>,
    ) -> Self {
        let api = Self {
            cache: None,
            formulae: OnceLock::new(),
            casks: OnceLock::new(),
            stubs: moka::sync::Cache::new(1000),
        };
        let _ = api.formulae.set(ApiTable::new(PackageKind::Formula, formulae));
        let _ = api.casks.set(ApiTable::new(PackageKind::Cask, casks));
        api
    }

    fn table(&self, kind: PackageKind) -> &ApiTable {
        let cell = match kind {
            PackageKind::Formula => &self.formulae,
            PackageKind::Cask => &self.casks,
        };
        cell.get_or_init(|| {
            let Some(cache) = &self.cache else {
                return ApiTable::default();
            };
            match cache.read(kind) {
                Ok(Some(documents)) => ApiTable::new(kind, documents),
                Ok(None) => {
                    tracing::debug!("No cached {} index at {}", kind, cache.path(kind).display());
                    ApiTable::default()
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable {} index: {}", kind, e);
                    ApiTable::default()
                }
            }
        })
    }
}

impl RemoteApi for CachedApi {
    fn index(&self, kind: PackageKind) -> Result<Arc<ApiIndex>> {
        Ok(Arc::clone(&self.table(kind).index))
    }

    fn document(&self, name: &str, kind: PackageKind) -> Result<Arc<serde_json::Value>> {
        self.table(kind)
            .documents
            .get(name)
            .cloned()
            .ok_or_else(|| FormularyError::Unavailable {
                kind: kind.as_str(),
                name: name.to_string(),
            })
    }

    fn stub(&self, name: &str, bottle_tag: &str) -> Result<Arc<FormulaStub>> {
        let key = format!("{}/{}", bottle_tag, name);
        if let Some(stub) = self.stubs.get(&key) {
            return Ok(stub);
        }

        let doc = self.document(name, PackageKind::Formula)?;
        let doc: FormulaDocument = serde_json::from_value(merge_variation(&doc, bottle_tag))?;
        let stub = Arc::new(FormulaStub::from_document(&doc, bottle_tag));
        self.stubs.insert(key, Arc::clone(&stub));

        Ok(stub)
    }
}

/// Homebrew API client with in-memory caching
#[derive(Clone)]
pub struct BrewApi {
    client: reqwest::Client,
    base_url: url::Url,
    documents: moka::future::Cache<String, Arc<serde_json::Value>>,
}

impl BrewApi {
    pub fn new() -> Result<Self> {
        Self::with_base_url(HOMEBREW_API_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base_url = url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| anyhow::anyhow!("Invalid API base URL {}: {}", base_url, e))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(format!("formulary/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            documents: moka::future::Cache::new(1000),
        })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .map_err(|e| anyhow::anyhow!("Invalid API path {}: {}", path, e).into())
    }

    /// Refresh the bulk index for `kind` unless the cached copy is fresh.
    ///
    /// Returns the number of documents now cached.
    pub async fn prefetch(&self, kind: PackageKind, cache: &ApiCache) -> Result<usize> {
        if let Some(cached) = cache.read_fresh(kind) {
            return Ok(cached.len());
        }

        let url = self.endpoint(&format!("{}.json", kind.as_str()))?;
        let documents: Vec<serde_json::Value> = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        cache.store(kind, &documents)?;
        Ok(documents.len())
    }

    /// Fetch one document by name (with in-memory caching).
    pub async fn fetch_document(
        &self,
        name: &str,
        kind: PackageKind,
    ) -> Result<Arc<serde_json::Value>> {
        let key = format!("{}/{}", kind.as_str(), name);
        if let Some(cached) = self.documents.get(&key).await {
            return Ok(cached);
        }

        let url = self.endpoint(&format!("{}/{}.json", kind.as_str(), name))?;
        let response = self.client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FormularyError::Unavailable {
                kind: kind.as_str(),
                name: name.to_string(),
            });
        }

        let document: Arc<serde_json::Value> = Arc::new(response.error_for_status()?.json().await?);
        self.documents.insert(key, Arc::clone(&document)).await;

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api() -> CachedApi {
        CachedApi::from_documents(
            vec![json!({
                "name": "python@3.12",
                "aliases": ["python3"],
                "oldnames": ["python"],
                "versions": {"stable": "3.12.1"},
                "revision": 1,
                "dependencies": ["openssl@3"],
                "bottle": {"stable": {"rebuild": 2, "files": {
                    "arm64_sonoma": {"cellar": ":any", "sha256": "aaa"}
                }}},
                "variations": {"x86_64_linux": {"dependencies": ["openssl@3", "zlib"]}}
            })],
            vec![json!({"token": "firefox", "old_tokens": ["firefox-esr"]})],
        )
    }

    #[test]
    fn test_index_resolves_aliases_and_renames() {
        let api = api();
        let index = api.index(PackageKind::Formula).unwrap();
        assert_eq!(index.resolve("python@3.12"), Some("python@3.12"));
        assert_eq!(index.resolve("python3"), Some("python@3.12"));
        assert_eq!(index.resolve("python"), Some("python@3.12"));
        assert_eq!(index.resolve("ruby"), None);

        let casks = api.index(PackageKind::Cask).unwrap();
        assert_eq!(casks.resolve("firefox-esr"), Some("firefox"));
    }

    #[test]
    fn test_stub_uses_variation_and_tag() {
        let api = api();
        let stub = api.stub("python@3.12", "arm64_sonoma").unwrap();
        assert_eq!(stub.pkg_version, "3.12.1_1");
        assert_eq!(stub.rebuild, 2);
        assert_eq!(stub.sha256.as_deref(), Some("aaa"));
        assert_eq!(stub.dependencies, vec!["openssl@3"]);
        assert_eq!(stub.version_and_revision(), ("3.12.1".to_string(), 1));

        let linux = api.stub("python@3.12", "x86_64_linux").unwrap();
        assert_eq!(linux.dependencies, vec!["openssl@3", "zlib"]);
        assert_eq!(linux.sha256, None);

        let again = api.stub("python@3.12", "arm64_sonoma").unwrap();
        assert!(Arc::ptr_eq(&stub, &again));
    }

    #[test]
    fn test_missing_document_is_unavailable() {
        let err = api().document("ruby", PackageKind::Formula).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_merge_variation_overrides_fields() {
        let doc = json!({"name": "foo", "caveats": "a", "variations": {"arm64_linux": {"caveats": "b"}}});
        assert_eq!(merge_variation(&doc, "arm64_linux")["caveats"], "b");
        let other = merge_variation(&doc, "sonoma");
        assert_eq!(other["caveats"], "a");
        assert!(other.get("variations").is_none());
    }
}
