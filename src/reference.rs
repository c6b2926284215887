//! Reference classification.
//!
//! Every user- or tool-supplied string is classified exactly once, before any
//! loader sees it. Classification never touches the filesystem, so the same
//! string always produces the same [`ReferenceKind`]; whether the thing it
//! points at exists is the loaders' business.
//!
//! ```
//! use formulary::config::Config;
//! use formulary::reference::{Reference, ReferenceKind};
//! use std::path::Path;
//!
//! let config = Config::with_prefix(Path::new("/opt/homebrew"));
//! let reference = Reference::classify("user/tools/ripgrep", &config);
//! assert!(matches!(reference.kind, ReferenceKind::TapQualified { .. }));
//! ```

use crate::config::Config;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static BOTTLE_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>.+?)--(?P<version>.+)\.(?P<tag>[a-z0-9_]+)\.bottle(?:\.(?P<rebuild>\d+))?\.tar\.gz$",
    )
    .expect("bottle filename pattern is valid")
});

static TAP_QUALIFIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<user>[^/.~][^/]*)/(?P<repo>[^/]+)/(?P<name>\w+[-.@+\w]*)$")
        .expect("tap-qualified name pattern is valid")
});

static BARE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+[-.@+\w]*$").expect("name pattern is valid"));

/// What a reference string looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// A local bottle archive, e.g. `foo--1.0.arm64_sonoma.bottle.tar.gz`.
    BottlePath {
        path: PathBuf,
        name: String,
        version: String,
        tag: String,
        rebuild: u32,
    },
    /// Anything with a URL scheme.
    Uri(String),
    /// `user/repo/name`
    TapQualified {
        user: String,
        repo: String,
        name: String,
    },
    /// A bare name, resolved across the API and taps.
    Name(String),
    /// A previously downloaded script in the local download cache.
    CachePath(PathBuf),
    /// A path inside an installed keg or Caskroom entry.
    KegPath(PathBuf),
    /// Any other filesystem path.
    Path(PathBuf),
}

/// A classified reference together with the string it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    raw: String,
    pub kind: ReferenceKind,
}

impl Reference {
    /// Classify `input`. Total: anything unrecognised is a filesystem path.
    pub fn classify(input: &str, config: &Config) -> Self {
        let raw = input.trim().to_string();
        let kind = classify_kind(&raw, config);
        Self { raw, kind }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The package name this reference most likely refers to.
    pub fn name_hint(&self) -> String {
        match &self.kind {
            ReferenceKind::BottlePath { name, .. } => name.clone(),
            ReferenceKind::Uri(uri) => uri
                .rsplit('/')
                .next()
                .map(strip_definition_extension)
                .unwrap_or_default(),
            ReferenceKind::TapQualified { name, .. } => name.clone(),
            ReferenceKind::Name(name) => name.clone(),
            ReferenceKind::CachePath(path)
            | ReferenceKind::KegPath(path)
            | ReferenceKind::Path(path) => path_stem(path),
        }
    }

    pub fn is_bare_name(&self) -> bool {
        matches!(self.kind, ReferenceKind::Name(_))
    }
}

fn classify_kind(raw: &str, config: &Config) -> ReferenceKind {
    let file_name = raw.rsplit('/').next().unwrap_or(raw);
    if let Some(captures) = BOTTLE_FILENAME.captures(file_name) {
        return ReferenceKind::BottlePath {
            path: PathBuf::from(raw),
            name: captures["name"].to_string(),
            version: captures["version"].to_string(),
            tag: captures["tag"].to_string(),
            rebuild: captures
                .name("rebuild")
                .and_then(|r| r.as_str().parse().ok())
                .unwrap_or(0),
        };
    }

    if raw.contains("://") {
        return ReferenceKind::Uri(raw.to_string());
    }

    if !is_definition_file(raw) {
        if let Some(captures) = TAP_QUALIFIED.captures(raw) {
            return ReferenceKind::TapQualified {
                user: captures["user"].to_lowercase(),
                repo: captures["repo"].to_lowercase(),
                name: captures["name"].to_string(),
            };
        }

        if BARE_NAME.is_match(raw) {
            return ReferenceKind::Name(raw.to_string());
        }
    }

    let path = PathBuf::from(raw);
    if path.starts_with(config.formula_cache_path()) || path.starts_with(config.cask_cache_path())
    {
        ReferenceKind::CachePath(path)
    } else if path.starts_with(&config.cellar)
        || path.starts_with(&config.caskroom)
        || path.starts_with(config.opt_path())
    {
        ReferenceKind::KegPath(path)
    } else {
        ReferenceKind::Path(path)
    }
}

fn is_definition_file(raw: &str) -> bool {
    raw.ends_with(".rb") || raw.ends_with(".json")
}

fn strip_definition_extension(file_name: &str) -> String {
    file_name
        .strip_suffix(".rb")
        .or_else(|| file_name.strip_suffix(".json"))
        .unwrap_or(file_name)
        .to_string()
}

fn path_stem(path: &Path) -> String {
    path.file_name()
        .map(|name| strip_definition_extension(&name.to_string_lossy()))
        .unwrap_or_default()
}

/// Name of the construct a formula script must define.
///
/// Capitalize, upcase the character after each `-`, `_`, `.` or space,
/// turn `+` into `x`, and turn an `@<digit>` version suffix into `AT<digit>`:
/// `python@3.12` becomes `PythonAT312`, `libxml++` becomes `Libxmlxx`.
pub fn construct_name(name: &str) -> String {
    let mut chars = name.chars();
    let mut class_name = String::with_capacity(name.len());
    if let Some(first) = chars.next() {
        class_name.extend(first.to_uppercase());
    }
    class_name.extend(chars.flat_map(char::to_lowercase));

    let mut joined = String::with_capacity(class_name.len());
    let mut pending_upper = false;
    let letters: Vec<char> = class_name.chars().collect();
    for (i, c) in letters.iter().copied().enumerate() {
        let next_is_alnum = letters.get(i + 1).is_some_and(|n| n.is_ascii_alphanumeric());
        if matches!(c, '-' | '_' | '.' | ' ') && next_is_alnum {
            pending_upper = true;
            continue;
        }
        if pending_upper {
            joined.extend(c.to_uppercase());
            pending_upper = false;
        } else {
            joined.push(c);
        }
    }

    let joined = joined.replace('+', "x");
    match joined.char_indices().find(|&(i, c)| {
        c == '@'
            && i > 0
            && joined[i + 1..]
                .chars()
                .next()
                .is_some_and(|d| d.is_ascii_digit())
    }) {
        Some((i, _)) => format!("{}AT{}", &joined[..i], &joined[i + 1..]),
        None => joined,
    }
}
