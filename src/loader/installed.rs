//! Definitions kept next to installed packages and in the download cache.

use super::{Claim, LoadContext, Loader, file_name_stem, is_definition_file};
use crate::definition::{Definition, PackageKind, Provenance};
use crate::definition_cache::CacheIdentity;
use crate::error::Result;
use crate::keg;
use crate::reference::{Reference, ReferenceKind};
use crate::resolver::LoadOptions;
use std::path::PathBuf;

/// `<prefix>/opt/<name>/.brew/<name>.rb`, the newest Caskroom metadata copy,
/// or any definition file under the Cellar, Caskroom or opt.
pub(super) fn try_claim_keg(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let (name, path) = match &reference.kind {
        ReferenceKind::Name(name) => {
            let name = name.to_lowercase();
            let path = match options.kind {
                PackageKind::Formula => keg::opt_script(ctx.config, &name),
                PackageKind::Cask => keg::installed_cask_definition(ctx.config, &name),
            };
            match path {
                Some(path) => (name, path),
                None => return Ok(None),
            }
        }
        ReferenceKind::KegPath(path) if is_definition_file(path) => {
            let name = keg::package_for_path(ctx.config, path).unwrap_or_else(|| file_name_stem(path));
            (name, path.clone())
        }
        _ => return Ok(None),
    };

    Ok(Some(Box::new(KegLoader {
        name,
        path,
        kind: options.kind,
    })))
}

/// `<cache>/Formula/<name>.rb`, `<cache>/Cask/<token>.rb`, or a path inside them.
pub(super) fn try_claim_cache(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let (name, path) = match &reference.kind {
        ReferenceKind::Name(name) => {
            let name = name.to_lowercase();
            let dir = match options.kind {
                PackageKind::Formula => ctx.config.formula_cache_path(),
                PackageKind::Cask => ctx.config.cask_cache_path(),
            };
            let path = dir.join(format!("{}.rb", name));
            if !path.is_file() {
                return Ok(None);
            }
            (name, path)
        }
        ReferenceKind::CachePath(path) if is_definition_file(path) => (file_name_stem(path), path.clone()),
        _ => return Ok(None),
    };

    Ok(Some(Box::new(CacheLoader {
        name,
        path,
        kind: options.kind,
    })))
}

#[derive(Debug)]
pub struct KegLoader {
    name: String,
    path: PathBuf,
    kind: PackageKind,
}

impl Loader for KegLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn kind(&self) -> PackageKind {
        self.kind
    }

    fn load(&self, ctx: &LoadContext<'_>, _options: &LoadOptions) -> Result<Definition> {
        ctx.materialize_file(
            &self.name,
            self.kind,
            &self.path,
            Provenance::Keg(self.path.clone()),
        )
    }

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::Path(self.path.clone())
    }
}

#[derive(Debug)]
pub struct CacheLoader {
    name: String,
    path: PathBuf,
    kind: PackageKind,
}

impl Loader for CacheLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn kind(&self) -> PackageKind {
        self.kind
    }

    fn load(&self, ctx: &LoadContext<'_>, _options: &LoadOptions) -> Result<Definition> {
        ctx.materialize_file(
            &self.name,
            self.kind,
            &self.path,
            Provenance::Cache(self.path.clone()),
        )
    }

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::Path(self.path.clone())
    }
}
