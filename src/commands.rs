//! Inspection commands for the formulary binary.

use colored::Colorize;
use formulary::api::BrewApi;
use formulary::cache::ApiCache;
use formulary::definition::{Definition, DependencyTag};
use formulary::graph::{DependencyGraph, ResolverGraph};
use formulary::materialize::Materializer;
use formulary::{Config, FormularyError, LoadOptions, PackageKind, Provenance, Resolver, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

fn spinner(message: String) -> ProgressBar {
    if !std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

pub async fn info(resolver: &Resolver, reference: &str, kind: PackageKind, stub: bool) -> Result<()> {
    let mut options = LoadOptions::new(kind);
    if stub {
        options = options.prefer_stub();
    }

    let def = match resolver.resolve(reference, &options) {
        Ok(def) => def,
        Err(e) if e.is_unavailable() && !resolver.config().no_install_from_api => {
            fetch_remote(resolver, reference, kind).await.map_err(|_| e)?
        }
        Err(e) => return Err(e),
    };

    print_definition(&def);
    Ok(())
}

/// One-off lookup of a name missing from the cached index.
async fn fetch_remote(resolver: &Resolver, name: &str, kind: PackageKind) -> Result<Arc<Definition>> {
    let pb = spinner(format!("Fetching {} from the API...", name));
    let api = BrewApi::new()?;
    let document = api.fetch_document(name, kind).await;
    pb.finish_and_clear();

    let materializer = Materializer::new(resolver.platform(), resolver.config(), resolver.registry());
    let document = document?;
    Ok(Arc::new(materializer.document(&document, kind, Provenance::Api)?))
}

fn print_definition(def: &Definition) {
    println!("{}", format!("==> {}", def.full_name).bold().green());
    if let Some(desc) = &def.desc {
        println!("{}", desc);
    }
    if let Some(homepage) = &def.homepage {
        println!("{}: {}", "Homepage".bold(), homepage);
    }
    if let Some(version) = def.pkg_version() {
        println!("{}: {}", "Version".bold(), version);
    }
    if let Some(license) = &def.license {
        println!("{}: {}", "License".bold(), license);
    }
    println!("{}: {}", "Platform".bold(), def.platform);
    println!("{}: {}", "From".bold(), describe_provenance(&def.provenance).dimmed());

    if let Some(bottle) = def.bottle_file() {
        println!("{}: {} ({})", "Bottle".bold(), bottle.checksum, bottle.cellar);
    }

    let deps = def.dependencies();
    for (label, tag) in [
        ("Dependencies", DependencyTag::Required),
        ("Build dependencies", DependencyTag::Build),
        ("Test dependencies", DependencyTag::Test),
    ] {
        let names: Vec<&str> = deps
            .iter()
            .filter(|d| match tag {
                DependencyTag::Required => d.tags.is_empty() || d.has_tag(tag),
                _ => d.has_tag(tag),
            })
            .map(|d| d.name.as_str())
            .collect();
        if !names.is_empty() {
            println!("{}: {}", label.bold(), names.join(", "));
        }
    }

    if !def.aliases.is_empty() {
        println!("{}: {}", "Aliases".bold(), def.aliases.join(", "));
    }
    if let Some(lifecycle) = &def.disable {
        println!("{} {}", "Disabled".red().bold(), lifecycle.reason.as_deref().unwrap_or(""));
    } else if let Some(lifecycle) = &def.deprecation {
        println!("{} {}", "Deprecated".yellow().bold(), lifecycle.reason.as_deref().unwrap_or(""));
    }
    if let Some(caveats) = &def.caveats {
        println!("{}", "==> Caveats".bold().green());
        println!("{}", caveats.trim_end());
    }
}

fn describe_provenance(provenance: &Provenance) -> String {
    match provenance {
        Provenance::Api => "API".to_string(),
        Provenance::Stub => "API (stub)".to_string(),
        Provenance::Uri { url, .. } => url.clone(),
        other => other
            .script_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    }
}

pub fn deps(resolver: &Resolver, reference: &str, kind: PackageKind) -> Result<()> {
    let def = resolver.resolve(reference, &LoadOptions::new(kind))?;
    let nodes = ResolverGraph::new(resolver).runtime_closure(&def, &[])?;

    if nodes.is_empty() {
        println!("{} has no runtime dependencies", def.full_name.bold());
        return Ok(());
    }

    for node in nodes {
        let version = node.pkg_version().unwrap_or_default();
        if node.declared_directly {
            println!("{} {}", node.full_name.bold(), version.dimmed());
        } else {
            println!("{} {}", node.full_name, version.dimmed());
        }
    }
    Ok(())
}

pub fn tab(resolver: &Resolver, reference: &str, kind: PackageKind) -> Result<()> {
    let def = resolver.resolve(reference, &LoadOptions::new(kind))?;
    let tab = resolver.tab_for(&def)?;

    match &tab.tabfile {
        Some(path) => println!("{}", format!("==> {}", path.display()).bold().green()),
        None => println!("{} {} is not installed", "⚠".yellow(), def.full_name),
    }
    println!("{}", serde_json::to_string_pretty(&tab)?);
    Ok(())
}

pub async fn update(config: &Config) -> Result<()> {
    let api = BrewApi::new()?;
    let cache = ApiCache::new(config.api_cache_path());

    for kind in [PackageKind::Formula, PackageKind::Cask] {
        let pb = spinner(format!("Refreshing {} index...", kind));
        let result = api.prefetch(kind, &cache).await;
        pb.finish_and_clear();

        match result {
            Ok(count) => println!("  {} {} {} documents", "✓".green(), count, kind),
            Err(e) => {
                println!("  {} Failed to refresh {} index: {}", "⚠".yellow(), kind, e);
                if !matches!(e, FormularyError::ApiError(_)) {
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}
