use super::{Claim, LoadContext, Loader};
use crate::definition::{Definition, PackageKind, Provenance};
use crate::definition_cache::CacheIdentity;
use crate::error::{FormularyError, Result};
use crate::reference::{Reference, ReferenceKind};
use crate::resolver::LoadOptions;
use std::path::{Path, PathBuf};
use url::Url;

pub(super) fn try_claim(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let ReferenceKind::Uri(url) = &reference.kind else {
        return Ok(None);
    };

    let name = reference.name_hint().to_lowercase();
    let cache_dir = match options.kind {
        PackageKind::Formula => ctx.config.formula_cache_path(),
        PackageKind::Cask => ctx.config.cask_cache_path(),
    };
    let extension = if url.ends_with(".json") { "json" } else { "rb" };

    Ok(Some(Box::new(UriLoader {
        cached: cache_dir.join(format!("{}.{}", name, extension)),
        url: url.clone(),
        name,
        kind: options.kind,
    })))
}

/// Definitions named by URL. Only local `file://` URLs are read; the file is
/// copied into the download cache and loaded from there.
#[derive(Debug)]
pub struct UriLoader {
    url: String,
    name: String,
    kind: PackageKind,
    cached: PathBuf,
}

impl UriLoader {
    fn unsupported(&self) -> FormularyError {
        FormularyError::UnsupportedUri {
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }

    fn source_path(&self) -> Result<PathBuf> {
        let url = Url::parse(&self.url).map_err(|_| self.unsupported())?;
        if url.scheme() != "file" {
            return Err(self.unsupported());
        }
        url.to_file_path().map_err(|_| self.unsupported())
    }
}

impl Loader for UriLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.cached.clone()
    }

    fn kind(&self) -> PackageKind {
        self.kind
    }

    fn load(&self, ctx: &LoadContext<'_>, _options: &LoadOptions) -> Result<Definition> {
        let source = self.source_path()?;
        if !source.is_file() {
            return Err(FormularyError::Unavailable {
                kind: self.kind.as_str(),
                name: self.url.clone(),
            });
        }

        if let Some(parent) = self.cached.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Copying a file onto itself truncates it
        if !same_file(&source, &self.cached) {
            std::fs::copy(&source, &self.cached)?;
            tracing::debug!("Copied {} to {}", self.url, self.cached.display());
        }

        ctx.materialize_file(
            &self.name,
            self.kind,
            &self.cached,
            Provenance::Uri {
                url: self.url.clone(),
                path: self.cached.clone(),
            },
        )
    }

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::Path(self.cached.clone())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
