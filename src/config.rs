//! Environment-driven configuration.
//!
//! Every path the resolver touches is derived from a handful of environment
//! variables, read once into a [`Config`]. Tests build a `Config` rooted in a
//! temporary directory with [`Config::with_prefix`] instead of touching the
//! real prefix.

use std::path::{Path, PathBuf};

/// Paths and switches used during resolution.
#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub cellar: PathBuf,
    pub caskroom: PathBuf,
    pub repository: PathBuf,
    pub cache: PathBuf,
    pub home: PathBuf,
    /// Skip the API loader even when a name is present in the index.
    pub no_install_from_api: bool,
    /// Keep the factory table across `clear_cache` calls.
    pub factory_cache: bool,
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        let prefix = std::env::var_os("HOMEBREW_PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(detect_prefix);
        let mut config = Self::with_prefix(&prefix);

        if let Some(cellar) = std::env::var_os("HOMEBREW_CELLAR") {
            config.cellar = PathBuf::from(cellar);
        }
        if let Some(repository) = std::env::var_os("HOMEBREW_REPOSITORY") {
            config.repository = PathBuf::from(repository);
        }
        config.cache = std::env::var_os("HOMEBREW_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);
        config.home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        config.no_install_from_api = env_flag("HOMEBREW_NO_INSTALL_FROM_API");
        config.factory_cache = !env_flag("HOMEBREW_DISABLE_FACTORY_CACHE");

        config
    }

    /// Configuration with every directory nested under `prefix`.
    pub fn with_prefix(prefix: &Path) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            cellar: prefix.join("Cellar"),
            caskroom: prefix.join("Caskroom"),
            repository: prefix.to_path_buf(),
            cache: prefix.join("cache"),
            home: prefix.join("home"),
            no_install_from_api: false,
            factory_cache: true,
        }
    }

    /// Directory holding `user/homebrew-repo` tap checkouts.
    pub fn taps_path(&self) -> PathBuf {
        self.repository.join("Library/Taps")
    }

    /// `<prefix>/opt`, where each installed formula's current keg is linked.
    pub fn opt_path(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    /// Directory holding cached copies of the remote API documents.
    pub fn api_cache_path(&self) -> PathBuf {
        self.cache.join("api")
    }

    /// Directory where scripts fetched by URL are kept.
    pub fn formula_cache_path(&self) -> PathBuf {
        self.cache.join("Formula")
    }

    pub fn cask_cache_path(&self) -> PathBuf {
        self.cache.join("Cask")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Detect the Homebrew prefix on this system
pub fn detect_prefix() -> PathBuf {
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/home/linuxbrew/.linuxbrew")
    }
    #[cfg(not(any(all(target_os = "macos", target_arch = "aarch64"), target_os = "linux")))]
    {
        PathBuf::from("/usr/local")
    }
}

fn default_cache_dir() -> PathBuf {
    if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("Homebrew")
    } else if let Some(home) = std::env::var_os("HOME") {
        if cfg!(target_os = "macos") {
            PathBuf::from(home).join("Library/Caches/Homebrew")
        } else {
            PathBuf::from(home).join(".cache/Homebrew")
        }
    } else {
        PathBuf::from(".cache/Homebrew")
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|value| !value.is_empty() && value != "0" && value != "false")
        .unwrap_or(false)
}
