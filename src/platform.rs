//! Platform detection and simulation.
//!
//! Definitions are materialized for a concrete `(os, arch)` pair: `on_linux`
//! blocks, `uses_from_macos` dependencies, API `variations` and the bottle tag
//! all depend on it. The host platform is detected once; callers may
//! temporarily simulate another one through [`PlatformContext::simulate`].
//!
//! # Bottle Tag Format
//!
//! - Apple Silicon macOS: `arm64_<codename>` (e.g. `arm64_sequoia`)
//! - Intel macOS: `<codename>` (e.g. `sonoma`)
//! - Linux: `<arch>_linux` (e.g. `x86_64_linux`, `arm64_linux`)
//!
//! # Examples
//!
//! ```
//! use formulary::platform::{Arch, Os, Platform, PlatformContext};
//!
//! let context = PlatformContext::new(Platform::new(Os::Macos, Arch::Arm64));
//! {
//!     let _guard = context.simulate(Platform::new(Os::Linux, Arch::X86_64));
//!     assert_eq!(context.current().bottle_tag(), "x86_64_linux");
//! }
//! assert_eq!(context.current().os, Os::Macos);
//! ```

#[cfg(target_os = "macos")]
use std::process::Command;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Macos,
    Linux,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Macos => "macos",
            Os::Linux => "linux",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Arm64,
    X86_64,
}

impl Arch {
    /// Homebrew uses "arm64" not "aarch64"
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::X86_64 => "x86_64",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "arm64" | "arm" | "aarch64" => Some(Arch::Arm64),
            "x86_64" | "intel" => Some(Arch::X86_64),
            _ => None,
        }
    }
}

/// macOS releases with bottles, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MacosVersion {
    Catalina,
    BigSur,
    Monterey,
    Ventura,
    Sonoma,
    Sequoia,
    Tahoe,
}

impl MacosVersion {
    pub const NEWEST: MacosVersion = MacosVersion::Tahoe;

    pub fn symbol(&self) -> &'static str {
        match self {
            MacosVersion::Catalina => "catalina",
            MacosVersion::BigSur => "big_sur",
            MacosVersion::Monterey => "monterey",
            MacosVersion::Ventura => "ventura",
            MacosVersion::Sonoma => "sonoma",
            MacosVersion::Sequoia => "sequoia",
            MacosVersion::Tahoe => "tahoe",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let symbol = symbol.trim_start_matches(':');
        [
            MacosVersion::Catalina,
            MacosVersion::BigSur,
            MacosVersion::Monterey,
            MacosVersion::Ventura,
            MacosVersion::Sonoma,
            MacosVersion::Sequoia,
            MacosVersion::Tahoe,
        ]
        .into_iter()
        .find(|version| version.symbol() == symbol)
        .or_else(|| Self::from_product_version(symbol))
    }

    /// Map a `sw_vers -productVersion` string to a codename.
    pub fn from_product_version(version: &str) -> Option<Self> {
        let major: u32 = version.split('.').next()?.parse().ok()?;
        match major {
            26 | 16 => Some(MacosVersion::Tahoe),
            15 => Some(MacosVersion::Sequoia),
            14 => Some(MacosVersion::Sonoma),
            13 => Some(MacosVersion::Ventura),
            12 => Some(MacosVersion::Monterey),
            11 => Some(MacosVersion::BigSur),
            10 => Some(MacosVersion::Catalina),
            _ => None,
        }
    }
}

/// A concrete (os, arch) pair a definition is materialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    /// Only meaningful when `os` is macOS.
    pub macos: Option<MacosVersion>,
}

impl Platform {
    /// A platform with the newest macOS release when `os` is macOS.
    pub fn new(os: Os, arch: Arch) -> Self {
        let macos = match os {
            Os::Macos => Some(MacosVersion::NEWEST),
            Os::Linux => None,
        };
        Self { os, arch, macos }
    }

    pub fn macos(version: MacosVersion, arch: Arch) -> Self {
        Self {
            os: Os::Macos,
            arch,
            macos: Some(version),
        }
    }

    /// Detect the platform this process runs on.
    pub fn host() -> Self {
        let arch = match std::env::consts::ARCH {
            "aarch64" => Arch::Arm64,
            _ => Arch::X86_64,
        };

        #[cfg(target_os = "macos")]
        {
            let version = macos_version()
                .and_then(|v| MacosVersion::from_product_version(&v))
                .unwrap_or(MacosVersion::NEWEST);
            Self::macos(version, arch)
        }

        #[cfg(not(target_os = "macos"))]
        {
            Self::new(Os::Linux, arch)
        }
    }

    /// Tag used to select bottles and API variations.
    pub fn bottle_tag(&self) -> String {
        match (self.os, self.arch) {
            (Os::Linux, arch) => format!("{}_linux", arch.as_str()),
            (Os::Macos, Arch::Arm64) => {
                format!("arm64_{}", self.macos_or_newest().symbol())
            }
            (Os::Macos, Arch::X86_64) => self.macos_or_newest().symbol().to_string(),
        }
    }

    /// Key under which definitions for this platform are cached.
    pub fn cache_key(&self) -> String {
        self.bottle_tag()
    }

    pub fn is_macos(&self) -> bool {
        self.os == Os::Macos
    }

    pub fn is_linux(&self) -> bool {
        self.os == Os::Linux
    }

    fn macos_or_newest(&self) -> MacosVersion {
        self.macos.unwrap_or(MacosVersion::NEWEST)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bottle_tag())
    }
}

#[cfg(target_os = "macos")]
fn macos_version() -> Option<String> {
    let output = Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()?;

    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Platform used for resolution, with scoped simulation of other platforms.
///
/// Overrides nest: the innermost guard wins, and dropping a guard restores the
/// platform that was current when it was created, including during unwinding.
#[derive(Debug)]
pub struct PlatformContext {
    host: Platform,
    stack: Mutex<Vec<Platform>>,
}

impl PlatformContext {
    pub fn new(host: Platform) -> Self {
        Self {
            host,
            stack: Mutex::new(Vec::new()),
        }
    }

    pub fn host(&self) -> Platform {
        self.host
    }

    /// The innermost simulated platform, or the host.
    pub fn current(&self) -> Platform {
        self.lock().last().copied().unwrap_or(self.host)
    }

    pub fn is_simulating(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Simulate `platform` until the returned guard is dropped.
    pub fn simulate(&self, platform: Platform) -> PlatformGuard<'_> {
        let mut stack = self.lock();
        let depth = stack.len();
        stack.push(platform);
        PlatformGuard {
            context: self,
            depth,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Platform>> {
        self.stack.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for PlatformContext {
    fn default() -> Self {
        Self::new(Platform::host())
    }
}

/// Restores the previous platform on drop.
#[must_use = "the simulated platform is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PlatformGuard<'a> {
    context: &'a PlatformContext,
    depth: usize,
}

impl Drop for PlatformGuard<'_> {
    fn drop(&mut self) {
        self.context.lock().truncate(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottle_tags() {
        assert_eq!(
            Platform::macos(MacosVersion::Sequoia, Arch::Arm64).bottle_tag(),
            "arm64_sequoia"
        );
        assert_eq!(
            Platform::macos(MacosVersion::Sonoma, Arch::X86_64).bottle_tag(),
            "sonoma"
        );
        assert_eq!(Platform::new(Os::Linux, Arch::X86_64).bottle_tag(), "x86_64_linux");
        assert_eq!(Platform::new(Os::Linux, Arch::Arm64).bottle_tag(), "arm64_linux");
    }

    #[test]
    fn test_macos_names() {
        assert_eq!(
            MacosVersion::from_product_version("15.1"),
            Some(MacosVersion::Sequoia)
        );
        assert_eq!(
            MacosVersion::from_product_version("14.0"),
            Some(MacosVersion::Sonoma)
        );
        assert_eq!(MacosVersion::from_symbol(":big_sur"), Some(MacosVersion::BigSur));
        assert_eq!(MacosVersion::from_symbol("nonsense"), None);
        assert!(MacosVersion::Catalina < MacosVersion::Sonoma);
    }

    #[test]
    fn test_host_detection() {
        let host = Platform::host();
        assert!(!host.bottle_tag().is_empty());
        #[cfg(target_arch = "aarch64")]
        assert_eq!(host.arch, Arch::Arm64);
        #[cfg(target_os = "linux")]
        assert!(host.bottle_tag().ends_with("_linux"));
    }

    #[test]
    fn test_nested_simulation_restores_outer() {
        let host = Platform::new(Os::Macos, Arch::Arm64);
        let linux = Platform::new(Os::Linux, Arch::X86_64);
        let intel = Platform::macos(MacosVersion::Ventura, Arch::X86_64);
        let context = PlatformContext::new(host);

        {
            let _outer = context.simulate(linux);
            assert_eq!(context.current(), linux);
            {
                let _inner = context.simulate(intel);
                assert_eq!(context.current(), intel);
            }
            assert_eq!(context.current(), linux);
        }

        assert_eq!(context.current(), host);
        assert!(!context.is_simulating());
    }

    #[test]
    fn test_simulation_restored_after_panic() {
        let host = Platform::new(Os::Macos, Arch::Arm64);
        let context = PlatformContext::new(host);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = context.simulate(Platform::new(Os::Linux, Arch::Arm64));
            panic!("resolution failed");
        }));

        assert!(result.is_err());
        assert_eq!(context.current(), host);
    }
}
