use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormularyError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No available {kind} with the name \"{name}\"")]
    Unavailable { kind: &'static str, name: String },

    #[error("No available {kind} with the name \"{name}\". Please tap it and then try again: brew tap {tap}")]
    TapUnavailable {
        kind: &'static str,
        name: String,
        tap: String,
    },

    #[error("{name} exists in multiple taps:\n{}\nPlease use the fully-qualified name (e.g. {}/{name}) to refer to a specific one.", ambiguous_list(.name, .taps), .taps.first().map(String::as_str).unwrap_or("user/repo"))]
    Ambiguous { name: String, taps: Vec<String> },

    #[error("{name}: unreadable definition at {}: {message}", .path.display())]
    Unreadable {
        name: String,
        path: PathBuf,
        message: String,
    },

    #[error("{name}: expected {expected} to be defined in {}{}", .path.display(), class_hint(.classes))]
    ClassUnavailable {
        name: String,
        path: PathBuf,
        expected: String,
        classes: Vec<String>,
    },

    #[error("{name}: {method} is not supported for definitions loaded from the API")]
    UnsupportedMethod { name: String, method: &'static str },

    #[error("{name}: no install block is defined, so it cannot be built from source")]
    NoInstallBlock { name: String },

    #[error("Tap migration cycle detected for {name}: {}", .chain.join(" -> "))]
    MigrationCycle { name: String, chain: Vec<String> },

    #[error(
        "Non-checksummed download of {name} from an arbitrary URL is unsupported! \
         Use `brew extract` or `brew create` and `brew tap-new` to create a definition file \
         in a tap on GitHub instead: {url}"
    )]
    UnsupportedUri { name: String, url: String },

    #[error("{name}: no {spec} specification is defined")]
    SpecUnavailable { name: String, spec: &'static str },

    #[error("Invalid tap name: {0}")]
    InvalidTap(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

fn ambiguous_list(name: &str, taps: &[String]) -> String {
    taps.iter()
        .map(|tap| format!("  {tap}/{name}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn class_hint(classes: &[String]) -> String {
    if classes.is_empty() {
        String::new()
    } else {
        format!(" (did you mean {}? defined: {})", classes[0], classes.join(", "))
    }
}

impl FormularyError {
    /// True for the failure kinds a loader reports when its target is missing.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            FormularyError::Unavailable { .. } | FormularyError::TapUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FormularyError>;
