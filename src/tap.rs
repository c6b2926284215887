//! Taps: named repositories of formula and cask definitions.
//!
//! A tap lives at `Library/Taps/<user>/homebrew-<repo>` and carries, besides its
//! definition files, three lookup tables consulted during canonicalization:
//!
//! - `Aliases/<alias>`: symlinks to a formula file
//! - `formula_renames.json` / `cask_renames.json`: old name → new name
//! - `tap_migrations.json`: name → `user/repo` or `user/repo/new-name`
//!
//! Tables are read lazily, once per [`Tap`] value. The [`TapRegistry`] hands
//! out shared `Tap` values, so a resolution never sees a table change under it;
//! [`TapRegistry::reload`] drops them after a tap is re-synced.

use crate::config::Config;
use crate::definition::PackageKind;
use crate::error::{FormularyError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use walkdir::WalkDir;

pub const CORE_TAP: &str = "homebrew/core";
pub const CASK_TAP: &str = "homebrew/cask";

/// Default tap for a package kind.
pub fn default_tap_name(kind: PackageKind) -> &'static str {
    match kind {
        PackageKind::Formula => CORE_TAP,
        PackageKind::Cask => CASK_TAP,
    }
}

/// Parse a tap name into (user, repo) components
/// Input: "User/homebrew-Repo" → Output: ("user", "repo")
pub fn parse_tap_name(tap: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = tap.split('/').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(FormularyError::InvalidTap(format!(
            "Expected 'user/repo', got '{}'",
            tap
        )));
    }

    let user = parts[0].to_lowercase();
    let repo = parts[1].to_lowercase();
    let repo = repo.strip_prefix("homebrew-").unwrap_or(&repo).to_string();

    Ok((user, repo))
}

#[derive(Debug, Default)]
struct TapTables {
    aliases: HashMap<String, String>,
    formula_renames: HashMap<String, String>,
    cask_renames: HashMap<String, String>,
    migrations: HashMap<String, String>,
}

/// A tap checkout, installed or not.
#[derive(Debug)]
pub struct Tap {
    pub user: String,
    pub repo: String,
    pub path: PathBuf,
    tables: OnceLock<TapTables>,
}

impl Tap {
    pub fn new(user: &str, repo: &str, taps_path: &Path) -> Self {
        Self {
            user: user.to_string(),
            repo: repo.to_string(),
            path: taps_path.join(user).join(format!("homebrew-{}", repo)),
            tables: OnceLock::new(),
        }
    }

    /// `user/repo`
    pub fn name(&self) -> String {
        format!("{}/{}", self.user, self.repo)
    }

    pub fn is_installed(&self) -> bool {
        self.path.is_dir()
    }

    pub fn is_core(&self) -> bool {
        self.name() == CORE_TAP
    }

    /// Whether this is the default tap for `kind`, whose names need no qualifier.
    pub fn is_default_for(&self, kind: PackageKind) -> bool {
        self.name() == default_tap_name(kind)
    }

    pub fn is_default(&self) -> bool {
        self.is_default_for(PackageKind::Formula) || self.is_default_for(PackageKind::Cask)
    }

    /// Qualified name of a definition in this tap; default taps need no qualifier.
    pub fn qualify(&self, name: &str) -> String {
        if self.is_default() {
            name.to_string()
        } else {
            format!("{}/{}", self.name(), name)
        }
    }

    /// Directory holding definitions of `kind`.
    pub fn definition_dir(&self, kind: PackageKind) -> PathBuf {
        match kind {
            PackageKind::Formula => ["Formula", "HomebrewFormula"]
                .iter()
                .map(|dir| self.path.join(dir))
                .find(|dir| dir.is_dir())
                .unwrap_or_else(|| self.path.join("Formula")),
            PackageKind::Cask => self.path.join("Casks"),
        }
    }

    /// Path a definition named `name` has, or would have, in this tap.
    pub fn definition_path(&self, name: &str, kind: PackageKind) -> PathBuf {
        self.find_definition(name, kind)
            .unwrap_or_else(|| self.definition_dir(kind).join(format!("{}.rb", name)))
    }

    /// Locate `name.rb`, also inside letter-sharded subdirectories.
    pub fn find_definition(&self, name: &str, kind: PackageKind) -> Option<PathBuf> {
        let file_name = format!("{}.rb", name);
        let dir = self.definition_dir(kind);

        let direct = dir.join(&file_name);
        if direct.is_file() {
            return Some(direct);
        }

        if dir.is_dir() {
            let sharded = WalkDir::new(&dir)
                .max_depth(3)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .find(|e| e.file_type().is_file() && e.file_name() == file_name.as_str());
            if let Some(entry) = sharded {
                return Some(entry.into_path());
            }
        }

        // Single-formula taps keep definitions at the root
        if kind == PackageKind::Formula {
            let root = self.path.join(&file_name);
            if root.is_file() {
                return Some(root);
            }
        }

        None
    }

    /// Names of every definition of `kind` in this tap.
    pub fn definition_names(&self, kind: PackageKind) -> Vec<String> {
        let dir = self.definition_dir(kind);
        if !dir.is_dir() {
            return vec![];
        }

        let mut names: Vec<String> = WalkDir::new(&dir)
            .max_depth(3)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(".rb"))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }

    /// Alias name → canonical formula name.
    pub fn alias_table(&self) -> &HashMap<String, String> {
        &self.tables().aliases
    }

    pub fn alias_target(&self, alias: &str) -> Option<&str> {
        self.alias_table().get(alias).map(String::as_str)
    }

    /// Every alias pointing at `name`.
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .alias_table()
            .iter()
            .filter(|(_, target)| target.as_str() == name)
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    /// Old name → new name.
    pub fn renames(&self, kind: PackageKind) -> &HashMap<String, String> {
        match kind {
            PackageKind::Formula => &self.tables().formula_renames,
            PackageKind::Cask => &self.tables().cask_renames,
        }
    }

    /// Every former name of `name`.
    pub fn oldnames_of(&self, name: &str, kind: PackageKind) -> Vec<String> {
        let mut oldnames: Vec<String> = self
            .renames(kind)
            .iter()
            .filter(|(_, new)| new.as_str() == name)
            .map(|(old, _)| old.clone())
            .collect();
        oldnames.sort();
        oldnames
    }

    /// Name → destination tap (`user/repo` or `user/repo/new-name`).
    pub fn migrations(&self) -> &HashMap<String, String> {
        &self.tables().migrations
    }

    /// Commit the tap checkout is at, read from `.git` without spawning git.
    pub fn git_head(&self) -> Option<String> {
        let git_dir = self.path.join(".git");
        let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
        let head = head.trim();

        match head.strip_prefix("ref: ") {
            Some(reference) => fs::read_to_string(git_dir.join(reference))
                .ok()
                .map(|s| s.trim().to_string())
                .or_else(|| packed_ref(&git_dir, reference)),
            None => Some(head.to_string()),
        }
    }

    fn tables(&self) -> &TapTables {
        self.tables.get_or_init(|| {
            if !self.is_installed() {
                return TapTables::default();
            }
            TapTables {
                aliases: read_alias_table(&self.path.join("Aliases")),
                formula_renames: read_json_table(&self.path.join("formula_renames.json")),
                cask_renames: read_json_table(&self.path.join("cask_renames.json")),
                migrations: read_json_table(&self.path.join("tap_migrations.json")),
            }
        })
    }
}

fn packed_ref(git_dir: &Path, reference: &str) -> Option<String> {
    let packed = fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed.lines().find_map(|line| {
        let (sha, name) = line.split_once(' ')?;
        (name == reference).then(|| sha.to_string())
    })
}

fn read_alias_table(aliases_dir: &Path) -> HashMap<String, String> {
    let mut table = HashMap::new();
    let Ok(entries) = fs::read_dir(aliases_dir) else {
        return table;
    };

    for entry in entries.flatten() {
        let alias = entry.file_name().to_string_lossy().to_string();
        if alias.starts_with('.') {
            continue;
        }
        let Ok(target) = fs::read_link(entry.path()) else {
            continue;
        };
        if let Some(name) = target
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".rb"))
        {
            table.insert(alias, name.to_string());
        }
    }

    table
}

fn read_json_table(path: &Path) -> HashMap<String, String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return HashMap::new();
    };

    match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
        Ok(table) => table.into_iter().collect(),
        Err(e) => {
            tracing::warn!("Ignoring invalid {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

/// Enumerates taps and hands out shared [`Tap`] values.
#[derive(Debug)]
pub struct TapRegistry {
    taps_path: PathBuf,
    taps: Mutex<HashMap<String, Arc<Tap>>>,
}

impl TapRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            taps_path: config.taps_path(),
            taps: Mutex::new(HashMap::new()),
        }
    }

    pub fn taps_path(&self) -> &Path {
        &self.taps_path
    }

    /// Shared tap value for `user/repo`, installed or not.
    pub fn fetch(&self, user: &str, repo: &str) -> Arc<Tap> {
        let user = user.to_lowercase();
        let repo = repo.to_lowercase();
        let repo = repo.strip_prefix("homebrew-").unwrap_or(&repo).to_string();
        let key = format!("{}/{}", user, repo);

        let mut taps = self.taps.lock().unwrap_or_else(|p| p.into_inner());
        taps.entry(key)
            .or_insert_with(|| Arc::new(Tap::new(&user, &repo, &self.taps_path)))
            .clone()
    }

    pub fn fetch_name(&self, tap: &str) -> Result<Arc<Tap>> {
        let (user, repo) = parse_tap_name(tap)?;
        Ok(self.fetch(&user, &repo))
    }

    pub fn default_tap(&self, kind: PackageKind) -> Arc<Tap> {
        let (user, repo) = default_tap_name(kind)
            .split_once('/')
            .unwrap_or(("homebrew", "core"));
        self.fetch(user, repo)
    }

    /// All installed taps, sorted by name.
    pub fn installed(&self) -> Result<Vec<Arc<Tap>>> {
        if !self.taps_path.exists() {
            return Ok(vec![]);
        }

        let mut taps = Vec::new();

        for user_entry in fs::read_dir(&self.taps_path)? {
            let user_entry = user_entry?;
            let user = user_entry.file_name().to_string_lossy().to_string();

            if user.starts_with('.') || !user_entry.path().is_dir() {
                continue;
            }

            for repo_entry in fs::read_dir(user_entry.path())? {
                let repo_entry = repo_entry?;
                let repo = repo_entry.file_name().to_string_lossy().to_string();

                if repo.starts_with('.') || !repo_entry.path().is_dir() {
                    continue;
                }

                taps.push(self.fetch(&user, &repo));
            }
        }

        taps.sort_by_key(|tap| tap.name());
        Ok(taps)
    }

    /// The tap containing `path`, if it lies inside the taps directory.
    pub fn from_path(&self, path: &Path) -> Option<Arc<Tap>> {
        let relative = path.strip_prefix(&self.taps_path).ok()?;
        let mut components = relative.components();
        let user = components.next()?.as_os_str().to_str()?;
        let repo = components.next()?.as_os_str().to_str()?;
        Some(self.fetch(user, repo))
    }

    /// Forget every tap value so tables are re-read on next use.
    pub fn reload(&self) {
        self.taps.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs as unix_fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_tap_name() {
        let (user, repo) = parse_tap_name("user/repo").unwrap();
        assert_eq!(user, "user");
        assert_eq!(repo, "repo");

        let (user, repo) = parse_tap_name("User/homebrew-Repo").unwrap();
        assert_eq!(user, "user");
        assert_eq!(repo, "repo");
    }

    #[test]
    fn test_parse_tap_name_invalid() {
        assert!(parse_tap_name("invalid").is_err());
        assert!(parse_tap_name("too/many/slashes").is_err());
        assert!(parse_tap_name("/repo").is_err());
    }

    #[test]
    fn test_tap_directory() {
        let tap = Tap::new("user", "repo", Path::new("/prefix/Library/Taps"));
        assert!(tap.path.to_string_lossy().ends_with("Taps/user/homebrew-repo"));
        assert_eq!(tap.qualify("foo"), "user/repo/foo");
    }

    #[test]
    fn test_tables_and_sharded_lookup() {
        let temp = TempDir::new().unwrap();
        let tap = Tap::new("user", "tools", temp.path());
        let formula_dir = tap.path.join("Formula/f");
        fs::create_dir_all(&formula_dir).unwrap();
        fs::write(formula_dir.join("foo.rb"), "class Foo < Formula\nend\n").unwrap();

        let aliases = tap.path.join("Aliases");
        fs::create_dir_all(&aliases).unwrap();
        unix_fs::symlink("../Formula/f/foo.rb", aliases.join("fu")).unwrap();

        fs::write(tap.path.join("formula_renames.json"), r#"{"oldfoo": "foo"}"#).unwrap();
        fs::write(tap.path.join("tap_migrations.json"), r#"{"bar": "other/tap"}"#).unwrap();

        assert_eq!(
            tap.find_definition("foo", PackageKind::Formula),
            Some(formula_dir.join("foo.rb"))
        );
        assert_eq!(tap.alias_target("fu"), Some("foo"));
        assert_eq!(tap.aliases_of("foo"), vec!["fu".to_string()]);
        assert_eq!(tap.oldnames_of("foo", PackageKind::Formula), vec!["oldfoo"]);
        assert_eq!(tap.migrations().get("bar").map(String::as_str), Some("other/tap"));
        assert_eq!(tap.definition_names(PackageKind::Formula), vec!["foo"]);
    }

    #[test]
    fn test_git_head() {
        let temp = TempDir::new().unwrap();
        let tap = Tap::new("user", "tools", temp.path());
        let git = tap.path.join(".git/refs/heads");
        fs::create_dir_all(&git).unwrap();
        fs::write(tap.path.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(git.join("main"), "0123abcd\n").unwrap();

        assert_eq!(tap.git_head().as_deref(), Some("0123abcd"));
    }

    #[test]
    fn test_registry_lists_and_shares_taps() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        fs::create_dir_all(config.taps_path().join("homebrew/homebrew-core")).unwrap();
        fs::create_dir_all(config.taps_path().join("user/homebrew-tools")).unwrap();

        let registry = TapRegistry::new(&config);
        let names: Vec<String> = registry.installed().unwrap().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["homebrew/core", "user/tools"]);

        let a = registry.fetch("user", "tools");
        let b = registry.fetch_name("user/homebrew-tools").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        registry.reload();
        let c = registry.fetch("user", "tools");
        assert!(!Arc::ptr_eq(&a, &c));

        let path = config.taps_path().join("user/homebrew-tools/Formula/foo.rb");
        assert_eq!(registry.from_path(&path).map(|t| t.name()).as_deref(), Some("user/tools"));
    }
}
