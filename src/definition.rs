//! The materialized package definition.
//!
//! A [`Definition`] is produced by the materializer from a script, an API
//! document, a stub or an installed keg, and is then shared as
//! `Arc<Definition>`. Everything except the active-spec selector and the
//! attached [`Tab`] is fixed at construction.

use crate::error::{FormularyError, Result};
use crate::platform::{Arch, MacosVersion, Os, Platform};
use crate::tab::Tab;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageKind {
    Formula,
    Cask,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Formula => "formula",
            PackageKind::Cask => "cask",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpecKind {
    Stable,
    Head,
}

impl SpecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecKind::Stable => "stable",
            SpecKind::Head => "head",
        }
    }
}

/// Where a definition was materialized from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Path(PathBuf),
    Api,
    Stub,
    Bottle(PathBuf),
    Keg(PathBuf),
    Cache(PathBuf),
    Uri { url: String, path: PathBuf },
}

impl Provenance {
    /// Script file backing this definition, if any.
    pub fn script_path(&self) -> Option<&Path> {
        match self {
            Provenance::Path(path)
            | Provenance::Keg(path)
            | Provenance::Cache(path)
            | Provenance::Uri { path, .. } => Some(path),
            // The embedded script lives inside the archive
            Provenance::Bottle(_) | Provenance::Api | Provenance::Stub => None,
        }
    }

    pub fn is_api(&self) -> bool {
        matches!(self, Provenance::Api | Provenance::Stub)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyTag {
    Required,
    Build,
    Test,
    Recommended,
    Optional,
}

impl DependencyTag {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "build" => Some(DependencyTag::Build),
            "test" => Some(DependencyTag::Test),
            "recommended" => Some(DependencyTag::Recommended),
            "optional" => Some(DependencyTag::Optional),
            _ => None,
        }
    }

    /// Runtime dependencies end up in the install receipt.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            DependencyTag::Required | DependencyTag::Recommended | DependencyTag::Optional
        )
    }
}

/// Platform condition a dependency was declared under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyContext {
    #[default]
    Always,
    Os(Os),
    Arch(Arch),
    UsesFromMacos { since: Option<MacosVersion> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub tags: Vec<DependencyTag>,
    pub context: DependencyContext,
    /// Casks may depend on both formulae and casks.
    pub package: PackageKind,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: vec![],
            context: DependencyContext::Always,
            package: PackageKind::Formula,
        }
    }

    pub fn tagged(mut self, tag: DependencyTag) -> Self {
        if tag != DependencyTag::Required && !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn in_context(mut self, context: DependencyContext) -> Self {
        self.context = context;
        self
    }

    pub fn on_cask(mut self) -> Self {
        self.package = PackageKind::Cask;
        self
    }

    pub fn has_tag(&self, tag: DependencyTag) -> bool {
        if tag == DependencyTag::Required {
            self.tags.is_empty()
        } else {
            self.tags.contains(&tag)
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.tags.is_empty() || self.tags.iter().any(DependencyTag::is_runtime)
    }

    /// Whether this dependency is part of a build made with `used_options`.
    ///
    /// Optional dependencies need `--with-<dep>`; recommended ones are kept
    /// unless the build used `--without-<dep>`.
    pub fn is_realized(&self, used_options: &[String]) -> bool {
        if !self.is_runtime() {
            return false;
        }
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        let used = |flag: String| used_options.iter().any(|o| *o == flag);
        if self.has_tag(DependencyTag::Optional) {
            return used(format!("--with-{}", base));
        }
        if self.has_tag(DependencyTag::Recommended) {
            return !used(format!("--without-{}", base));
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequirementKind {
    Arch,
    Linux,
    Macos,
    MaximumMacos,
    Xcode,
}

impl RequirementKind {
    /// Requirement names outside this set are dropped during materialization.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "arch" => Some(RequirementKind::Arch),
            "linux" => Some(RequirementKind::Linux),
            "macos" => Some(RequirementKind::Macos),
            "maximum_macos" => Some(RequirementKind::MaximumMacos),
            "xcode" => Some(RequirementKind::Xcode),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Arch => "arch",
            RequirementKind::Linux => "linux",
            RequirementKind::Macos => "macos",
            RequirementKind::MaximumMacos => "maximum_macos",
            RequirementKind::Xcode => "xcode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub kind: RequirementKind,
    pub version: Option<String>,
    pub contexts: Vec<String>,
}

/// Download and dependency description of one build variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareSpec {
    pub url: Option<String>,
    pub version: Option<String>,
    pub checksum: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub mirrors: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleFile {
    /// `:any`, `:any_skip_relocation` or a concrete cellar path.
    pub cellar: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BottleManifest {
    pub rebuild: u32,
    pub root_url: Option<String>,
    pub files: BTreeMap<String, BottleFile>,
}

impl BottleManifest {
    /// Bottle for `tag`, falling back to the platform-independent `all` bottle.
    pub fn file_for(&self, tag: &str) -> Option<&BottleFile> {
        self.files.get(tag).or_else(|| self.files.get("all"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KegOnly {
    pub reason: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    pub run: Vec<String>,
    pub name: Option<String>,
    pub keep_alive: bool,
    pub working_dir: Option<String>,
    pub log_path: Option<String>,
    pub error_log_path: Option<String>,
}

/// Deprecation or disable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    pub date: Option<NaiveDate>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub name: String,
    pub reason: Option<String>,
    pub package: PackageKind,
}

/// Cask-only details.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaskDetails {
    pub names: Vec<String>,
    /// Artifacts in API shape, e.g. `{"app": ["Foo.app"]}`.
    pub artifacts: Vec<serde_json::Value>,
    /// Names of the uninstall/install flight blocks the cask defines.
    pub flight_blocks: Vec<String>,
    pub auto_updates: bool,
}

impl CaskDetails {
    pub fn has_uninstall_flight_blocks(&self) -> bool {
        self.flight_blocks
            .iter()
            .any(|block| block.starts_with("uninstall_"))
    }

    /// Artifacts removed on uninstall: everything except `zap` stanzas.
    pub fn uninstall_artifacts(&self) -> Vec<serde_json::Value> {
        self.artifacts
            .iter()
            .filter(|artifact| artifact.get("zap").is_none())
            .cloned()
            .collect()
    }
}

/// What building from source needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBuild {
    pub url: String,
    pub checksum: Option<String>,
    pub steps: Vec<Vec<String>>,
}

/// A materialized formula or cask.
#[derive(Debug)]
pub struct Definition {
    pub name: String,
    /// `user/repo/name` for non-default taps, otherwise `name`.
    pub full_name: String,
    pub tap: Option<String>,
    pub kind: PackageKind,
    pub desc: Option<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub stable: Option<SoftwareSpec>,
    pub head: Option<SoftwareSpec>,
    pub revision: u32,
    pub version_scheme: u32,
    pub bottle: Option<BottleManifest>,
    pub options: Vec<OptionSpec>,
    pub keg_only: Option<KegOnly>,
    pub service: Option<Service>,
    pub caveats: Option<String>,
    pub deprecation: Option<Lifecycle>,
    pub disable: Option<Lifecycle>,
    pub conflicts: Vec<Conflict>,
    pub aliases: Vec<String>,
    pub oldnames: Vec<String>,
    pub provenance: Provenance,
    pub platform: Platform,
    /// Alias the definition was requested through, if any.
    pub alias_path: Option<PathBuf>,
    pub cask: Option<CaskDetails>,
    recipe: Option<Vec<Vec<String>>>,
    active_spec: Mutex<Option<SpecKind>>,
    tab: Mutex<Option<Tab>>,
}

impl Definition {
    pub fn new(name: &str, kind: PackageKind, provenance: Provenance, platform: Platform) -> Self {
        Self {
            name: name.to_string(),
            full_name: name.to_string(),
            tap: None,
            kind,
            desc: None,
            homepage: None,
            license: None,
            stable: None,
            head: None,
            revision: 0,
            version_scheme: 0,
            bottle: None,
            options: vec![],
            keg_only: None,
            service: None,
            caveats: None,
            deprecation: None,
            disable: None,
            conflicts: vec![],
            aliases: vec![],
            oldnames: vec![],
            provenance,
            platform,
            alias_path: None,
            cask: None,
            recipe: None,
            active_spec: Mutex::new(None),
            tab: Mutex::new(None),
        }
    }

    /// Record the build steps of a script-backed definition.
    pub fn set_build_recipe(&mut self, steps: Vec<Vec<String>>) {
        self.recipe = Some(steps);
    }

    /// Set the tap and derive the full name from it.
    pub fn set_tap(&mut self, tap: Option<String>) {
        self.full_name = match &tap {
            Some(tap) if !is_default_tap(tap) => format!("{}/{}", tap, self.name),
            _ => self.name.clone(),
        };
        self.tap = tap;
    }

    pub fn spec(&self, kind: SpecKind) -> Option<&SoftwareSpec> {
        match kind {
            SpecKind::Stable => self.stable.as_ref(),
            SpecKind::Head => self.head.as_ref(),
        }
    }

    pub fn active_spec(&self) -> Option<SpecKind> {
        *lock(&self.active_spec)
    }

    /// Commit to a build variant. Fails when the definition lacks it.
    pub fn set_active_spec(&self, kind: SpecKind) -> Result<()> {
        if self.spec(kind).is_none() {
            return Err(FormularyError::SpecUnavailable {
                name: self.full_name.clone(),
                spec: kind.as_str(),
            });
        }
        *lock(&self.active_spec) = Some(kind);
        Ok(())
    }

    /// The active spec, or stable then head when none is committed yet.
    pub fn current_spec(&self) -> Option<&SoftwareSpec> {
        match self.active_spec() {
            Some(kind) => self.spec(kind),
            None => self.stable.as_ref().or(self.head.as_ref()),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.current_spec().and_then(|spec| spec.version.as_deref())
    }

    /// Version with the `_<revision>` suffix when revised.
    pub fn pkg_version(&self) -> Option<String> {
        self.version().map(|version| match self.revision {
            0 => version.to_string(),
            revision => format!("{}_{}", version, revision),
        })
    }

    pub fn dependencies(&self) -> &[Dependency] {
        self.current_spec()
            .map(|spec| spec.dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn requirements(&self) -> &[Requirement] {
        self.current_spec()
            .map(|spec| spec.requirements.as_slice())
            .unwrap_or_default()
    }

    pub fn bottle_file(&self) -> Option<&BottleFile> {
        self.bottle
            .as_ref()
            .and_then(|bottle| bottle.file_for(&self.platform.bottle_tag()))
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecation.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disable.is_some()
    }

    pub fn is_loaded_from_api(&self) -> bool {
        self.provenance.is_api()
    }

    /// Steps of the `install` block.
    pub fn build_recipe(&self) -> Result<&[Vec<String>]> {
        if self.provenance.is_api() {
            return Err(self.unsupported("build_recipe"));
        }
        self.recipe
            .as_deref()
            .ok_or_else(|| FormularyError::NoInstallBlock {
                name: self.full_name.clone(),
            })
    }

    pub fn install_from_source(&self) -> Result<SourceBuild> {
        if self.provenance.is_api() {
            return Err(self.unsupported("install_from_source"));
        }
        let spec = self.current_spec().ok_or_else(|| FormularyError::SpecUnavailable {
            name: self.full_name.clone(),
            spec: SpecKind::Stable.as_str(),
        })?;
        let url = spec.url.clone().ok_or_else(|| FormularyError::SpecUnavailable {
            name: self.full_name.clone(),
            spec: self.active_spec().unwrap_or(SpecKind::Stable).as_str(),
        })?;

        Ok(SourceBuild {
            url,
            checksum: spec.checksum.clone(),
            steps: self.build_recipe()?.to_vec(),
        })
    }

    pub fn tab(&self) -> Option<Tab> {
        lock(&self.tab).clone()
    }

    pub fn attach_tab(&self, tab: Tab) {
        *lock(&self.tab) = Some(tab);
    }

    fn unsupported(&self, method: &'static str) -> FormularyError {
        FormularyError::UnsupportedMethod {
            name: self.full_name.clone(),
            method,
        }
    }
}

fn is_default_tap(tap: &str) -> bool {
    tap == crate::tap::CORE_TAP || tap == crate::tap::CASK_TAP
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> Definition {
        let mut def = Definition::new(
            "foo",
            PackageKind::Formula,
            Provenance::Path(PathBuf::from("/taps/foo.rb")),
            Platform::new(Os::Linux, Arch::X86_64),
        );
        def.stable = Some(SoftwareSpec {
            url: Some("https://example.com/foo-1.0.tar.gz".to_string()),
            version: Some("1.0".to_string()),
            dependencies: vec![Dependency::new("bar")],
            ..Default::default()
        });
        def.head = Some(SoftwareSpec {
            url: Some("https://example.com/foo.git".to_string()),
            version: Some("HEAD".to_string()),
            ..Default::default()
        });
        def.revision = 2;
        def
    }

    #[test]
    fn test_active_spec_selection() {
        let def = definition();
        assert_eq!(def.active_spec(), None);
        assert_eq!(def.version(), Some("1.0"));
        assert_eq!(def.pkg_version().as_deref(), Some("1.0_2"));
        assert_eq!(def.dependencies().len(), 1);

        def.set_active_spec(SpecKind::Head).unwrap();
        assert_eq!(def.version(), Some("HEAD"));
        assert!(def.dependencies().is_empty());
    }

    #[test]
    fn test_missing_spec_is_rejected() {
        let mut def = definition();
        def.head = None;
        let err = def.set_active_spec(SpecKind::Head).unwrap_err();
        assert!(matches!(err, FormularyError::SpecUnavailable { .. }));
        assert_eq!(def.active_spec(), None);
    }

    #[test]
    fn test_full_name_follows_tap() {
        let mut def = definition();
        def.set_tap(Some("homebrew/core".to_string()));
        assert_eq!(def.full_name, "foo");
        def.set_tap(Some("user/tools".to_string()));
        assert_eq!(def.full_name, "user/tools/foo");
    }

    #[test]
    fn test_install_from_source() {
        let mut def = definition();
        def.set_build_recipe(vec![vec!["make".to_string(), "install".to_string()]]);
        let build = def.install_from_source().unwrap();
        assert_eq!(build.url, "https://example.com/foo-1.0.tar.gz");
        assert_eq!(build.steps, vec![vec!["make", "install"]]);
    }

    #[test]
    fn test_script_without_install_block() {
        let def = definition();
        match def.install_from_source() {
            Err(FormularyError::NoInstallBlock { name }) => assert_eq!(name, "foo"),
            other => panic!("expected a missing install block, got {other:?}"),
        }
    }

    #[test]
    fn test_dependency_tags() {
        let dep = Dependency::new("cmake").tagged(DependencyTag::Build);
        assert!(dep.has_tag(DependencyTag::Build));
        assert!(!dep.has_tag(DependencyTag::Required));
        assert!(!dep.is_runtime());
        assert!(Dependency::new("zlib").is_runtime());
    }

    #[test]
    fn test_dependency_realized_by_options() {
        let optional = Dependency::new("user/tools/bar").tagged(DependencyTag::Optional);
        assert!(!optional.is_realized(&[]));
        assert!(optional.is_realized(&["--with-bar".to_string()]));

        let recommended = Dependency::new("baz").tagged(DependencyTag::Recommended);
        assert!(recommended.is_realized(&[]));
        assert!(!recommended.is_realized(&["--without-baz".to_string()]));

        let build = Dependency::new("cmake").tagged(DependencyTag::Build);
        assert!(!build.is_realized(&["--with-cmake".to_string()]));
        assert!(Dependency::new("zlib").is_realized(&[]));
    }
}
