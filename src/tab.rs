//! Install receipts ("tabs").
//!
//! Each installed package has an `INSTALL_RECEIPT.json` alongside it:
//! ```text
//! /opt/homebrew/Cellar/ripgrep/14.1.0/INSTALL_RECEIPT.json
//! /opt/homebrew/Caskroom/firefox/.metadata/INSTALL_RECEIPT.json
//! ```
//!
//! The receipt records how the package was installed and its runtime
//! dependency closure, so an installed package can be described again without
//! the tap it came from. Receipts written by other tools may carry fields we
//! do not know and lack ones we do; both are tolerated.
//!
//! # Examples
//!
//! ```no_run
//! use formulary::tab::Tab;
//! use std::path::Path;
//!
//! fn main() -> formulary::Result<()> {
//!     let tab = Tab::read(Path::new("/opt/homebrew/Cellar/ripgrep/14.1.0/INSTALL_RECEIPT.json"))?;
//!     println!("On request: {}", tab.installed_on_request);
//!     Ok(())
//! }
//! ```

use crate::config::Config;
use crate::definition::{Definition, PackageKind, SpecKind};
use crate::error::{FormularyError, Result};
use crate::graph::{DependencyGraph, DependencyNode};
use crate::keg::{self, RECEIPT_FILE};
use crate::platform::Platform;
use crate::tap::CORE_TAP;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const LEGACY_CORE_TAPS: &[&str] = &["mxcl/master", "homebrew/homebrew"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg_version: Option<String>,
    #[serde(default)]
    pub declared_directly: bool,
}

impl From<&DependencyNode> for RuntimeDependency {
    fn from(node: &DependencyNode) -> Self {
        Self {
            full_name: node.full_name.clone(),
            version: node.version.clone(),
            revision: node.revision,
            pkg_version: node.pkg_version(),
            declared_directly: node.declared_directly,
        }
    }
}

/// Formula receipts store a list; cask receipts split by package kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuntimeDependencies {
    Formula(Vec<RuntimeDependency>),
    Cask {
        #[serde(default)]
        formula: Vec<RuntimeDependency>,
        #[serde(default)]
        cask: Vec<RuntimeDependency>,
    },
}

impl RuntimeDependencies {
    pub fn formulae(&self) -> &[RuntimeDependency] {
        match self {
            RuntimeDependencies::Formula(deps) => deps,
            RuntimeDependencies::Cask { formula, .. } => formula,
        }
    }

    pub fn casks(&self) -> &[RuntimeDependency] {
        match self {
            RuntimeDependencies::Formula(_) => &[],
            RuntimeDependencies::Cask { cask, .. } => cask,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceVersions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub version_scheme: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tap_git_head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    pub versions: SourceVersions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltOn {
    pub os: String,
    pub os_version: String,
    pub cpu_family: String,
}

impl BuiltOn {
    fn for_platform(platform: &Platform) -> Self {
        let os_version = match platform.macos {
            Some(version) if platform.is_macos() => format!("macOS {}", version.symbol()),
            _ => "Linux".to_string(),
        };
        Self {
            os: if platform.is_macos() { "Macintosh" } else { "Linux" }.to_string(),
            os_version,
            cpu_family: platform.arch.as_str().to_string(),
        }
    }
}

/// Install-time options for [`Tab::create`].
#[derive(Debug, Clone, Default)]
pub struct TabOptions {
    pub installed_on_request: bool,
    pub poured_from_bottle: bool,
    pub used_options: Vec<String>,
    pub tap_git_head: Option<String>,
}

/// Install receipt compatible with Homebrew
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tab {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homebrew_version: Option<String>,
    pub used_options: Vec<String>,
    pub unused_options: Vec<String>,
    pub built_as_bottle: bool,
    pub poured_from_bottle: bool,
    pub loaded_from_api: bool,
    pub installed_as_dependency: bool,
    pub installed_on_request: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_dependencies: Option<RuntimeDependencies>,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_on: Option<BuiltOn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdlib: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall_flight_blocks: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall_artifacts: Option<Vec<serde_json::Value>>,
    /// Where this tab lives on disk; `None` for synthesized tabs.
    #[serde(skip)]
    pub tabfile: Option<PathBuf>,
}

impl Tab {
    /// Read an existing receipt.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read receipt: {}", path.display()))?;
        let mut tab: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", path.display()))?;

        if let Some(tap) = &tab.source.tap {
            let lowered = tap.to_lowercase();
            if LEGACY_CORE_TAPS.contains(&lowered.as_str()) {
                tab.source.tap = Some(CORE_TAP.to_string());
            }
        }
        tab.tabfile = Some(path.to_path_buf());

        Ok(tab)
    }

    /// Receipt of the installed copy of `def`, or an empty one.
    ///
    /// Formulae read from the opt-linked keg, else the only keg, else the
    /// newest keg. Casks read the Caskroom metadata receipt.
    pub fn for_definition(def: &Definition, config: &Config) -> Result<Self> {
        let path = match def.kind {
            PackageKind::Formula => formula_receipt(def, config)?,
            PackageKind::Cask => {
                let path = keg::caskroom_metadata(config, &def.name).join(RECEIPT_FILE);
                path.is_file().then_some(path)
            }
        };

        match path {
            Some(path) => Self::read(&path),
            None => Ok(Self::empty(def, config)),
        }
    }

    /// A receipt carrying only what the definition itself says. Never written.
    pub fn empty(def: &Definition, config: &Config) -> Self {
        let mut tab = Self {
            homebrew_version: Some(homebrew_version()),
            loaded_from_api: def.is_loaded_from_api(),
            compiler: Some("clang".to_string()),
            aliases: def.aliases.clone(),
            source: source_for(def, config),
            ..Self::default()
        };
        tab.source.spec = Some(SpecKind::Stable.as_str().to_string());
        tab
    }

    /// Snapshot a just-installed definition.
    ///
    /// The dependency graph is walked once; its nodes are split by package
    /// kind for casks. Call [`Tab::write`] to persist the result.
    pub fn create(
        def: &Definition,
        graph: &dyn DependencyGraph,
        options: TabOptions,
        config: &Config,
    ) -> Result<Self> {
        let nodes = graph.runtime_closure(def, &options.used_options)?;
        let runtime_dependencies = split_dependencies(def.kind, &nodes);

        let mut source = source_for(def, config);
        source.tap_git_head = options.tap_git_head;
        source.spec = Some(def.active_spec().unwrap_or(SpecKind::Stable).as_str().to_string());

        let now = chrono::Utc::now().timestamp();
        let source_modified_time = def
            .provenance
            .script_path()
            .and_then(|p| fs::metadata(p).ok())
            .and_then(|m| m.modified().ok())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp());

        let unused_options = def
            .options
            .iter()
            .map(|o| format!("--{}", o.name))
            .filter(|o| !options.used_options.contains(o))
            .collect();

        let cask = def.cask.as_ref();
        let tabfile = match def.kind {
            PackageKind::Formula => config
                .cellar
                .join(&def.name)
                .join(def.pkg_version().unwrap_or_else(|| "HEAD".to_string()))
                .join(RECEIPT_FILE),
            PackageKind::Cask => keg::caskroom_metadata(config, &def.name).join(RECEIPT_FILE),
        };

        Ok(Self {
            homebrew_version: Some(homebrew_version()),
            used_options: options.used_options,
            unused_options,
            built_as_bottle: options.poured_from_bottle,
            poured_from_bottle: options.poured_from_bottle,
            loaded_from_api: def.is_loaded_from_api(),
            installed_as_dependency: !options.installed_on_request,
            installed_on_request: options.installed_on_request,
            time: Some(now),
            source_modified_time: source_modified_time.or(Some(now)),
            compiler: Some("clang".to_string()),
            aliases: def.aliases.clone(),
            runtime_dependencies: Some(runtime_dependencies),
            source,
            arch: Some(def.platform.arch.as_str().to_string()),
            built_on: Some(BuiltOn::for_platform(&def.platform)),
            stdlib: None,
            uninstall_flight_blocks: cask.map(|c| c.has_uninstall_flight_blocks()),
            uninstall_artifacts: cask.map(|c| c.uninstall_artifacts()),
            tabfile: Some(tabfile),
        })
    }

    /// Persist to [`Tab::tabfile`]. Synthesized tabs have nowhere to go.
    pub fn write(&self) -> Result<()> {
        let path = self.tabfile.as_ref().ok_or_else(|| {
            FormularyError::Other(anyhow::anyhow!(
                "Refusing to write a receipt that was not installed"
            ))
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write receipt: {}", path.display()))?;

        Ok(())
    }

    pub fn spec(&self) -> SpecKind {
        match self.source.spec.as_deref() {
            Some("head") => SpecKind::Head,
            _ => SpecKind::Stable,
        }
    }

    pub fn tap(&self) -> Option<&str> {
        self.source.tap.as_deref()
    }
}

fn formula_receipt(def: &Definition, config: &Config) -> Result<Option<PathBuf>> {
    if let Some(opt) = keg::opt_keg(config, &def.name) {
        if opt.receipt_path().is_file() {
            return Ok(Some(opt.receipt_path()));
        }
    }

    let kegs = keg::installed_kegs(config, &def.name)?;
    // A single keg or the newest one; `installed_kegs` is newest first
    Ok(kegs
        .first()
        .map(|keg| keg.receipt_path())
        .filter(|path| path.is_file()))
}

fn source_for(def: &Definition, config: &Config) -> Source {
    let path = if def.is_loaded_from_api() {
        Some(
            config
                .api_cache_path()
                .join(format!("{}.jws.json", def.kind.as_str()))
                .display()
                .to_string(),
        )
    } else {
        def.provenance
            .script_path()
            .map(|p| p.display().to_string())
    };

    Source {
        path,
        tap: def.tap.clone(),
        tap_git_head: None,
        spec: None,
        versions: SourceVersions {
            stable: def.stable.as_ref().and_then(|s| s.version.clone()),
            head: def.head.as_ref().and_then(|s| s.version.clone()),
            version_scheme: def.version_scheme,
        },
    }
}

fn split_dependencies(kind: PackageKind, nodes: &[DependencyNode]) -> RuntimeDependencies {
    let of_kind = |k: PackageKind| -> Vec<RuntimeDependency> {
        nodes
            .iter()
            .filter(|n| n.kind == k)
            .map(RuntimeDependency::from)
            .collect()
    };

    match kind {
        PackageKind::Formula => RuntimeDependencies::Formula(of_kind(PackageKind::Formula)),
        PackageKind::Cask => RuntimeDependencies::Cask {
            formula: of_kind(PackageKind::Formula),
            cask: of_kind(PackageKind::Cask),
        },
    }
}

fn homebrew_version() -> String {
    format!("formulary/{}", env!("CARGO_PKG_VERSION"))
}
