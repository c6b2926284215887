//! Canonical names: aliases, renames and tap migrations.
//!
//! A name inside a tap is followed through the tap's alias table, then its
//! rename table, then its migration table, until it names a definition that
//! exists or no table has an entry for it. Every (tap, name) pair is visited
//! at most once; a repeat means the tables form a cycle and the walk stops at
//! the last pair it had not seen.

use crate::api::RemoteApi;
use crate::definition::PackageKind;
use crate::error::{FormularyError, Result};
use crate::reference::{Reference, ReferenceKind};
use crate::tap::{Tap, TapRegistry};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a name ended up after following its links.
#[derive(Debug, Clone)]
pub struct Located {
    pub tap: Arc<Tap>,
    pub name: String,
    /// Definition file, or where it would be if the tap had it.
    pub path: PathBuf,
}

impl Located {
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Name as users should type it: bare in the default tap, qualified elsewhere.
    pub fn display_name(&self, kind: PackageKind) -> String {
        if self.tap.is_default_for(kind) {
            self.name.clone()
        } else {
            format!("{}/{}", self.tap.name(), self.name)
        }
    }
}

/// Follow alias, rename and migration links for `name` starting in `tap`.
pub fn follow(
    taps: &TapRegistry,
    tap: Arc<Tap>,
    name: &str,
    kind: PackageKind,
    warn: bool,
) -> Located {
    let mut tap = tap;
    let mut name = name.to_lowercase();
    let mut seen = HashSet::new();
    let mut chain: Vec<String> = Vec::new();

    loop {
        let qualified = format!("{}/{}", tap.name(), name);
        if !seen.insert(qualified.clone()) {
            let err = FormularyError::MigrationCycle {
                name: chain.first().cloned().unwrap_or_else(|| qualified.clone()),
                chain: chain.iter().cloned().chain([qualified]).collect(),
            };
            tracing::warn!("{}", err);
            // The pair before the repeat is the last one not yet seen
            if let Some(last) = chain.last() {
                if let Some((tap_name, last_name)) = last.rsplit_once('/') {
                    tap = taps
                        .fetch_name(tap_name)
                        .unwrap_or_else(|_| tap.clone());
                    name = last_name.to_string();
                }
            }
            break;
        }
        chain.push(qualified);

        if let Some(path) = tap.find_definition(&name, kind) {
            return Located { tap, name, path };
        }

        if kind == PackageKind::Formula {
            if let Some(target) = tap.alias_target(&name) {
                name = target.to_string();
                continue;
            }
        }

        if let Some(new_name) = tap.renames(kind).get(&name) {
            if warn {
                tracing::warn!(
                    "{} {} was renamed to {}.",
                    kind_label(kind),
                    tap.qualify(&name),
                    tap.qualify(new_name)
                );
            }
            name = new_name.clone();
            continue;
        }

        if let Some(destination) = tap.migrations().get(&name).cloned() {
            let mut parts = destination.splitn(3, '/');
            let (Some(user), Some(repo)) = (parts.next(), parts.next()) else {
                tracing::warn!(
                    "Ignoring malformed migration of {} to {}",
                    tap.qualify(&name),
                    destination
                );
                break;
            };
            let new_name = parts.next().unwrap_or(&name).to_lowercase();
            let new_tap = taps.fetch(user, repo);
            if warn {
                tracing::warn!(
                    "{} {} was migrated from {} to {}.",
                    kind_label(kind),
                    name,
                    tap.name(),
                    new_tap.name()
                );
            }
            tap = new_tap;
            name = new_name;
            continue;
        }

        break;
    }

    let path = tap
        .find_definition(&name, kind)
        .unwrap_or_else(|| tap.definition_path(&name, kind));
    Located { tap, name, path }
}

/// Find a bare name across installed taps.
///
/// The default tap wins whenever it defines the name. Otherwise exactly one
/// non-default tap may define it; more than one is [`FormularyError::Ambiguous`].
pub fn locate_name(
    taps: &TapRegistry,
    name: &str,
    kind: PackageKind,
    warn: bool,
) -> Result<Option<Located>> {
    let default_tap = taps.default_tap(kind);
    if default_tap.is_installed() {
        let located = follow(taps, default_tap, name, kind, warn);
        if located.exists() {
            return Ok(Some(located));
        }
    }

    let mut found: Vec<Located> = Vec::new();
    let mut seen_paths = HashSet::new();
    for tap in taps.installed()? {
        if tap.is_default_for(kind) {
            continue;
        }
        let located = follow(taps, tap, name, kind, false);
        if !located.exists() {
            continue;
        }
        let canonical = std::fs::canonicalize(&located.path).unwrap_or(located.path.clone());
        if seen_paths.insert(canonical) {
            found.push(located);
        }
    }

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(FormularyError::Ambiguous {
            name: name.to_string(),
            taps: found.iter().map(|l| l.tap.name()).collect(),
        }),
    }
}

/// Canonical spelling of `reference`. Idempotent.
pub fn canonical_name(
    taps: &TapRegistry,
    api: Option<&dyn RemoteApi>,
    reference: &Reference,
    kind: PackageKind,
) -> String {
    let fallback = || reference.raw().to_lowercase();

    match &reference.kind {
        ReferenceKind::TapQualified { user, repo, name } => {
            let tap = taps.fetch(user, repo);
            if tap.is_default_for(kind) {
                if let Some(canonical) = api_name(api, name, kind) {
                    return canonical;
                }
            }
            follow(taps, tap, name, kind, false).display_name(kind)
        }
        ReferenceKind::Name(name) => {
            if let Some(canonical) = api_name(api, name, kind) {
                return canonical;
            }
            match locate_name(taps, name, kind, false) {
                Ok(Some(located)) => located.display_name(kind),
                Ok(None) | Err(_) => fallback(),
            }
        }
        ReferenceKind::Path(path) | ReferenceKind::CachePath(path) | ReferenceKind::KegPath(path) => {
            let name = reference.name_hint().to_lowercase();
            match taps.from_path(path) {
                Some(tap) => Located {
                    tap,
                    name,
                    path: path.clone(),
                }
                .display_name(kind),
                None => name,
            }
        }
        ReferenceKind::BottlePath { name, .. } => name.to_lowercase(),
        ReferenceKind::Uri(_) => reference.name_hint().to_lowercase(),
    }
}

fn api_name(api: Option<&dyn RemoteApi>, name: &str, kind: PackageKind) -> Option<String> {
    let index = api?.index(kind).ok()?;
    index.resolve(&name.to_lowercase()).map(str::to_string)
}

fn kind_label(kind: PackageKind) -> &'static str {
    match kind {
        PackageKind::Formula => "Formula",
        PackageKind::Cask => "Cask",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use tempfile::TempDir;

    fn tap_dir(root: &std::path::Path, user: &str, repo: &str) -> PathBuf {
        let dir = root
            .join("Library/Taps")
            .join(user)
            .join(format!("homebrew-{}", repo));
        fs::create_dir_all(dir.join("Formula")).unwrap();
        dir
    }

    fn formula(dir: &std::path::Path, name: &str) {
        fs::write(
            dir.join("Formula").join(format!("{}.rb", name)),
            format!("class {} < Formula\nend\n", crate::reference::construct_name(name)),
        )
        .unwrap();
    }

    #[test]
    fn test_follow_rename_then_migration() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        let one = tap_dir(temp.path(), "user", "one");
        let two = tap_dir(temp.path(), "user", "two");
        fs::write(one.join("formula_renames.json"), r#"{"old": "mid"}"#).unwrap();
        fs::write(one.join("tap_migrations.json"), r#"{"mid": "user/two/new"}"#).unwrap();
        formula(&two, "new");

        let taps = TapRegistry::new(&config);
        let located = follow(&taps, taps.fetch("user", "one"), "old", PackageKind::Formula, true);
        assert_eq!(located.tap.name(), "user/two");
        assert_eq!(located.name, "new");
        assert!(located.exists());
        assert_eq!(located.display_name(PackageKind::Formula), "user/two/new");
    }

    #[test]
    fn test_follow_stops_on_cycle() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        let one = tap_dir(temp.path(), "user", "one");
        let two = tap_dir(temp.path(), "user", "two");
        fs::write(one.join("tap_migrations.json"), r#"{"foo": "user/two"}"#).unwrap();
        fs::write(two.join("tap_migrations.json"), r#"{"foo": "user/one"}"#).unwrap();

        let taps = TapRegistry::new(&config);
        let located = follow(&taps, taps.fetch("user", "one"), "foo", PackageKind::Formula, true);
        assert_eq!(located.tap.name(), "user/two");
        assert_eq!(located.name, "foo");
        assert!(!located.exists());
    }

    #[test]
    fn test_locate_name_ambiguity() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        let one = tap_dir(temp.path(), "user", "one");
        let two = tap_dir(temp.path(), "user", "two");
        formula(&one, "solo");
        formula(&one, "shared");
        formula(&two, "shared");

        let taps = TapRegistry::new(&config);
        let solo = locate_name(&taps, "solo", PackageKind::Formula, false)
            .unwrap()
            .unwrap();
        assert_eq!(solo.tap.name(), "user/one");

        match locate_name(&taps, "shared", PackageKind::Formula, false) {
            Err(FormularyError::Ambiguous { taps, .. }) => {
                assert_eq!(taps, vec!["user/one", "user/two"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        // The default tap wins silently
        let core = tap_dir(temp.path(), "homebrew", "core");
        formula(&core, "shared");
        let located = locate_name(&taps, "shared", PackageKind::Formula, false)
            .unwrap()
            .unwrap();
        assert!(located.tap.is_core());

        assert!(locate_name(&taps, "missing", PackageKind::Formula, false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_canonical_name_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let config = Config::with_prefix(temp.path());
        let one = tap_dir(temp.path(), "user", "one");
        formula(&one, "tool");
        fs::create_dir_all(one.join("Aliases")).unwrap();
        std::os::unix::fs::symlink("../Formula/tool.rb", one.join("Aliases/tl")).unwrap();

        let taps = TapRegistry::new(&config);
        let canonical = |input: &str| {
            canonical_name(
                &taps,
                None,
                &Reference::classify(input, &config),
                PackageKind::Formula,
            )
        };

        assert_eq!(canonical("tool"), "user/one/tool");
        assert_eq!(canonical("user/one/tl"), "user/one/tool");
        assert_eq!(canonical("user/one/tool"), "user/one/tool");
        assert_eq!(canonical("Nowhere"), "nowhere");
    }
}
