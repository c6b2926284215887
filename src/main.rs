mod colors;
mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use formulary::{Arch, MacosVersion, Os, PackageKind, Platform, Resolver};

#[derive(Parser)]
#[command(name = "formulary")]
#[command(author, version, about = "Resolve and inspect Homebrew formulae and casks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Treat references as casks
    #[arg(long, global = true)]
    cask: bool,

    /// Materialize for another platform, e.g. `arm64_sonoma` or `x86_64_linux`
    #[arg(long, global = true, value_name = "TAG")]
    platform: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a resolved definition
    Info {
        /// Name, tap-qualified name, path, URL or bottle
        reference: String,

        /// Load the bottle-only stub from the API
        #[arg(long)]
        stub: bool,
    },

    /// Show runtime dependencies in install order
    Deps {
        reference: String,
    },

    /// Print the canonical name of a reference
    Canonical {
        reference: String,
    },

    /// Print where a definition lives
    Path {
        reference: String,
    },

    /// Show the install receipt of an installed package
    Tab {
        reference: String,
    },

    /// Refresh the cached API index documents
    Update,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "warn");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    colors::init_colors();

    let cli = Cli::parse();
    let kind = if cli.cask {
        PackageKind::Cask
    } else {
        PackageKind::Formula
    };

    let resolver = Resolver::from_env();
    let _guard = match cli.platform.as_deref() {
        Some(tag) => Some(resolver.simulate(parse_platform(tag)?)),
        None => None,
    };

    match cli.command {
        Some(Commands::Info { reference, stub }) => {
            commands::info(&resolver, &reference, kind, stub).await?;
        }
        Some(Commands::Deps { reference }) => {
            commands::deps(&resolver, &reference, kind)?;
        }
        Some(Commands::Canonical { reference }) => {
            println!("{}", resolver.canonical_name(&reference, kind));
        }
        Some(Commands::Path { reference }) => {
            println!("{}", resolver.path_for(&reference, kind)?.display());
        }
        Some(Commands::Tab { reference }) => {
            commands::tab(&resolver, &reference, kind)?;
        }
        Some(Commands::Update) => {
            commands::update(resolver.config()).await?;
        }
        None => {
            println!(
                "Resolving for {}. Run {} to see available commands.",
                resolver.platform().to_string().bold(),
                "formulary --help".cyan()
            );
        }
    }

    Ok(())
}

/// `x86_64_linux`, `arm64_linux`, `arm64_<macos>` or `<macos>`.
fn parse_platform(tag: &str) -> anyhow::Result<Platform> {
    if let Some(arch) = tag.strip_suffix("_linux") {
        let arch = Arch::from_symbol(arch).ok_or_else(|| anyhow::anyhow!("Unknown architecture: {}", arch))?;
        return Ok(Platform::new(Os::Linux, arch));
    }

    let (arch, release) = match tag.strip_prefix("arm64_") {
        Some(release) => (Arch::Arm64, release),
        None => (Arch::X86_64, tag),
    };
    let version = MacosVersion::from_symbol(release)
        .ok_or_else(|| anyhow::anyhow!("Unknown platform tag: {}", tag))?;
    Ok(Platform::macos(version, arch))
}
