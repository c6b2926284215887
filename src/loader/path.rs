use super::{Claim, LoadContext, Loader, file_name_stem, is_definition_file};
use crate::definition::{Definition, PackageKind, Provenance};
use crate::definition_cache::CacheIdentity;
use crate::error::Result;
use crate::reference::{Reference, ReferenceKind};
use crate::resolver::LoadOptions;
use crate::tap::Tap;
use std::path::PathBuf;
use std::sync::Arc;

/// Existing `.rb`/`.json` files outside taps, kegs and the cache.
pub(super) fn try_claim(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let ReferenceKind::Path(path) = &reference.kind else {
        return Ok(None);
    };
    let path = path.clone();
    if !is_definition_file(&path) {
        return Ok(None);
    }

    let path = std::path::absolute(&path).unwrap_or(path);
    Ok(Some(Box::new(PathLoader {
        name: file_name_stem(&path),
        tap: ctx.taps.from_path(&path),
        kind: options.kind,
        path,
    })))
}

#[derive(Debug)]
pub struct PathLoader {
    name: String,
    path: PathBuf,
    tap: Option<Arc<Tap>>,
    kind: PackageKind,
}

impl Loader for PathLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn tap(&self) -> Option<Arc<Tap>> {
        self.tap.clone()
    }

    fn kind(&self) -> PackageKind {
        self.kind
    }

    fn load(&self, ctx: &LoadContext<'_>, _options: &LoadOptions) -> Result<Definition> {
        let mut def = ctx.materialize_file(
            &self.name,
            self.kind,
            &self.path,
            Provenance::Path(self.path.clone()),
        )?;
        if let Some(tap) = &self.tap {
            def.set_tap(Some(tap.name()));
            def.oldnames = tap.oldnames_of(&self.name, self.kind);
        }
        Ok(def)
    }

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::Path(self.path.clone())
    }
}
