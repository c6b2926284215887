//! Formula and cask resolution for Homebrew-compatible package managers.
//!
//! Given a name, a tap-qualified name, a file, a URL or a bottle archive,
//! [`Resolver`] finds the definition it refers to, materializes it for the
//! current (or a simulated) platform and caches the result. Sources are
//! local taps, the JSON API document cache, installed kegs and Caskroom
//! metadata, and bottles.

pub mod api;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod definition;
pub mod definition_cache;
pub mod error;
pub mod graph;
pub mod keg;
pub mod loader;
pub mod materialize;
pub mod platform;
pub mod reference;
pub mod resolver;
pub mod script;
pub mod tab;
pub mod tap;

pub use config::Config;
pub use definition::{Definition, PackageKind, Provenance, SpecKind};
pub use error::{FormularyError, Result};
pub use platform::{Arch, MacosVersion, Os, Platform};
pub use reference::{Reference, ReferenceKind};
pub use resolver::{LoadOptions, Resolver};
pub use tab::{Tab, TabOptions};
