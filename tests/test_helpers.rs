// Test helpers for isolated testing
// Every environment is a throwaway Homebrew prefix; nothing touches the system
#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use formulary::api::{CachedApi, RemoteApi};
use formulary::reference::construct_name;
use formulary::{Arch, Config, Os, Platform, Resolver};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Isolated Homebrew prefix in a temporary directory
/// Automatically cleaned up when dropped
///
/// # Example
/// ```ignore
/// let env = TestEnvironment::new();
/// env.write_formula("homebrew/core", "wget", &formula_script("wget", "1.24"));
/// let resolver = env.resolver();
/// ```
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub prefix: PathBuf,
    pub config: Config,
}

impl TestEnvironment {
    /// Create the directory structure the resolver expects:
    /// - temp/
    ///   - Library/Taps/  (tap checkouts)
    ///   - Cellar/        (installed kegs)
    ///   - Caskroom/      (installed casks)
    ///   - cache/         (API documents and downloads)
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let prefix = temp_dir.path().to_path_buf();
        let config = Config::with_prefix(&prefix);

        fs::create_dir_all(config.taps_path()).unwrap();
        fs::create_dir_all(&config.cellar).unwrap();
        fs::create_dir_all(&config.caskroom).unwrap();
        fs::create_dir_all(&config.cache).unwrap();

        Self {
            temp_dir,
            prefix,
            config,
        }
    }

    /// Host platform every test resolver reports
    pub fn host() -> Platform {
        Platform::new(Os::Linux, Arch::X86_64)
    }

    /// Resolver without an API; names come from taps and kegs only
    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.config.clone(), None, Self::host())
    }

    /// Resolver serving exactly the given API documents
    pub fn resolver_with_api(
        &self,
        formulae: Vec<serde_json::Value>,
        casks: Vec<serde_json::Value>,
    ) -> Resolver {
        let api: Arc<dyn RemoteApi> = Arc::new(CachedApi::from_documents(formulae, casks));
        Resolver::new(self.config.clone(), Some(api), Self::host())
    }

    /// Checkout directory of `user/repo`, created with empty Formula and Casks dirs
    pub fn tap(&self, tap: &str) -> PathBuf {
        let (user, repo) = tap.split_once('/').expect("tap is user/repo");
        let path = self
            .config
            .taps_path()
            .join(user)
            .join(format!("homebrew-{}", repo));
        fs::create_dir_all(path.join("Formula")).unwrap();
        fs::create_dir_all(path.join("Casks")).unwrap();
        path
    }

    pub fn write_formula(&self, tap: &str, name: &str, content: &str) -> PathBuf {
        let path = self.tap(tap).join("Formula").join(format!("{}.rb", name));
        fs::write(&path, content).unwrap();
        path
    }

    pub fn write_cask(&self, tap: &str, token: &str, content: &str) -> PathBuf {
        let path = self.tap(tap).join("Casks").join(format!("{}.rb", token));
        fs::write(&path, content).unwrap();
        path
    }

    /// `Aliases/<alias>` symlinked to `../Formula/<target>.rb`
    pub fn alias(&self, tap: &str, alias: &str, target: &str) -> PathBuf {
        let aliases = self.tap(tap).join("Aliases");
        fs::create_dir_all(&aliases).unwrap();
        let link = aliases.join(alias);
        std::os::unix::fs::symlink(format!("../Formula/{}.rb", target), &link).unwrap();
        link
    }

    /// Write a tap table such as `formula_renames.json` or `tap_migrations.json`
    pub fn write_table(&self, tap: &str, file: &str, table: serde_json::Value) {
        let path = self.tap(tap).join(file);
        fs::write(path, serde_json::to_string_pretty(&table).unwrap()).unwrap();
    }

    /// Install `name` at `version` with its script saved under `.brew`, linked from opt
    pub fn install_keg(&self, name: &str, version: &str, script: &str) -> PathBuf {
        let keg = self.config.cellar.join(name).join(version);
        fs::create_dir_all(keg.join(".brew")).unwrap();
        fs::write(keg.join(".brew").join(format!("{}.rb", name)), script).unwrap();

        let opt = self.config.opt_path();
        fs::create_dir_all(&opt).unwrap();
        std::os::unix::fs::symlink(&keg, opt.join(name)).unwrap();
        keg
    }

    /// A gzipped bottle tarball in the prefix holding `entries`
    pub fn write_bottle(&self, file_name: &str, entries: &[(&str, &str)]) -> PathBuf {
        write_bottle(&self.prefix, file_name, entries)
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.prefix.join(relative)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

pub fn write_bottle(dir: &Path, file_name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(file_name);
    let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

/// Smallest script defining formula `name` at `version`
pub fn formula_script(name: &str, version: &str) -> String {
    formula_with(name, version, "")
}

/// Formula script with extra statements in the class body
pub fn formula_with(name: &str, version: &str, body: &str) -> String {
    format!(
        "class {} < Formula\n  desc \"{} for tests\"\n  homepage \"https://example.com/{}\"\n  url \"https://example.com/{}-{}.tar.gz\"\n  version \"{}\"\n  sha256 \"{}\"\n{}end\n",
        construct_name(name),
        name,
        name,
        name,
        version,
        version,
        "0".repeat(64),
        body
    )
}
