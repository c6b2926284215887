//! Installed kegs and Caskroom entries.
//!
//! ```text
//! <prefix>/Cellar/<name>/<version>/INSTALL_RECEIPT.json
//! <prefix>/Cellar/<name>/<version>/.brew/<name>.rb
//! <prefix>/opt/<name> -> ../Cellar/<name>/<version>
//! <prefix>/Caskroom/<token>/.metadata/<version>/<timestamp>/Casks/<token>.{rb,json}
//! <prefix>/Caskroom/<token>/.metadata/INSTALL_RECEIPT.json
//! ```

use crate::config::Config;
use crate::error::Result;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// An installed version directory in the Cellar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keg {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

impl Keg {
    pub fn receipt_path(&self) -> PathBuf {
        self.path.join(RECEIPT_FILE)
    }

    /// Copy of the definition script saved at install time.
    pub fn script_path(&self) -> PathBuf {
        self.path.join(".brew").join(format!("{}.rb", self.name))
    }
}

/// Get all installed kegs of a formula, newest first
pub fn installed_kegs(config: &Config, name: &str) -> Result<Vec<Keg>> {
    let rack = config.cellar.join(name);

    if !rack.is_dir() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();

    for entry in fs::read_dir(&rack)? {
        let entry = entry?;
        let version = entry.file_name().to_string_lossy().to_string();

        if version.starts_with('.') || !entry.path().is_dir() {
            continue;
        }

        kegs.push(Keg {
            name: name.to_string(),
            version,
            path: entry.path(),
        });
    }

    kegs.sort_by(|a, b| compare_versions(&b.version, &a.version));

    Ok(kegs)
}

/// The keg `<prefix>/opt/<name>` points at.
pub fn opt_keg(config: &Config, name: &str) -> Option<Keg> {
    let opt = config.opt_path().join(name);
    let target = fs::canonicalize(&opt).ok()?;
    if !target.is_dir() {
        return None;
    }
    let version = target.file_name()?.to_string_lossy().to_string();

    Some(Keg {
        name: name.to_string(),
        version,
        path: target,
    })
}

/// `<prefix>/opt/<name>/.brew/<name>.rb`, when present.
pub fn opt_script(config: &Config, name: &str) -> Option<PathBuf> {
    let script = config
        .opt_path()
        .join(name)
        .join(".brew")
        .join(format!("{}.rb", name));
    script.is_file().then_some(script)
}

pub fn caskroom_metadata(config: &Config, token: &str) -> PathBuf {
    config.caskroom.join(token).join(".metadata")
}

/// Definition saved for the newest installed version of a cask.
///
/// Prefers the JSON copy over the script when both exist.
pub fn installed_cask_definition(config: &Config, token: &str) -> Option<PathBuf> {
    let metadata = caskroom_metadata(config, token);
    let version_dir = newest_child(&metadata, compare_versions)?;
    let timestamp_dir = newest_child(&version_dir, |a, b| a.cmp(b))?;
    let casks = timestamp_dir.join("Casks");

    ["json", "rb"]
        .iter()
        .map(|ext| casks.join(format!("{}.{}", token, ext)))
        .find(|path| path.is_file())
}

/// Name of the formula or cask whose keg or Caskroom entry contains `path`.
pub fn package_for_path(config: &Config, path: &Path) -> Option<String> {
    [&config.cellar, &config.caskroom, &config.opt_path()]
        .into_iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .and_then(|relative| relative.components().next())
        .map(|first| first.as_os_str().to_string_lossy().to_string())
}

fn newest_child(dir: &Path, compare: impl Fn(&str, &str) -> Ordering) -> Option<PathBuf> {
    let mut children: Vec<(String, PathBuf)> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (entry.file_name().to_string_lossy().to_string(), entry.path()))
        .filter(|(name, _)| !name.starts_with('.'))
        .collect();

    children.sort_by(|a, b| compare(&a.0, &b.0));
    children.pop().map(|(_, path)| path)
}

/// Compare two version strings, numerically where they parse
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<u32> = a
        .split(['.', '_'])
        .filter_map(|s| s.parse::<u32>().ok())
        .collect();
    let b_parts: Vec<u32> = b
        .split(['.', '_'])
        .filter_map(|s| s.parse::<u32>().ok())
        .collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).unwrap_or(&0);
        let b_part = b_parts.get(i).unwrap_or(&0);
        match a_part.cmp(b_part) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    // Fall back to lexicographic
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0_1", "2.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_installed_kegs_newest_first() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        for version in ["1.9", "1.10", "1.2"] {
            fs::create_dir_all(config.cellar.join("foo").join(version)).unwrap();
        }

        let versions: Vec<String> = installed_kegs(&config, "foo")
            .unwrap()
            .into_iter()
            .map(|k| k.version)
            .collect();
        assert_eq!(versions, vec!["1.10", "1.9", "1.2"]);
        assert!(installed_kegs(&config, "missing").unwrap().is_empty());
    }

    #[test]
    fn test_opt_keg_follows_link() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        let keg = config.cellar.join("foo/2.0");
        fs::create_dir_all(keg.join(".brew")).unwrap();
        fs::write(keg.join(".brew/foo.rb"), "class Foo < Formula\nend\n").unwrap();
        fs::create_dir_all(config.opt_path()).unwrap();
        std::os::unix::fs::symlink(&keg, config.opt_path().join("foo")).unwrap();

        let opt = opt_keg(&config, "foo").unwrap();
        assert_eq!(opt.version, "2.0");
        assert!(opt_script(&config, "foo").is_some());
    }

    #[test]
    fn test_installed_cask_definition_picks_newest() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        let metadata = caskroom_metadata(&config, "tool");
        for (version, stamp) in [("1.0", "20240101000000.000"), ("2.0", "20250101000000.000")] {
            let casks = metadata.join(version).join(stamp).join("Casks");
            fs::create_dir_all(&casks).unwrap();
            fs::write(casks.join("tool.rb"), "cask \"tool\" do\nend\n").unwrap();
        }

        let path = installed_cask_definition(&config, "tool").unwrap();
        assert!(path.to_string_lossy().contains("/2.0/"));
    }

    #[test]
    fn test_package_for_path() {
        let config = Config::with_prefix(Path::new("/opt/homebrew"));
        assert_eq!(
            package_for_path(&config, Path::new("/opt/homebrew/Cellar/foo/1.0/bin")).as_deref(),
            Some("foo")
        );
        assert_eq!(package_for_path(&config, Path::new("/tmp/foo")), None);
    }
}
