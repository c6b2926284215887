use super::{Claim, LoadContext, Loader};
use crate::definition::{Definition, PackageKind, Provenance};
use crate::definition_cache::CacheIdentity;
use crate::error::{FormularyError, Result};
use crate::reference::{Reference, ReferenceKind};
use crate::resolver::LoadOptions;
use crate::tap::default_tap_name;
use std::path::PathBuf;

/// Bare names, or names qualified with the default tap, that the API index knows.
pub(super) fn try_claim(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let Some(api) = ctx.api() else {
        return Ok(None);
    };

    let name = match &reference.kind {
        ReferenceKind::Name(name) => name,
        ReferenceKind::TapQualified { user, repo, name }
            if format!("{}/{}", user, repo).to_lowercase() == default_tap_name(options.kind) =>
        {
            name
        }
        _ => return Ok(None),
    };

    let index = match api.index(options.kind) {
        Ok(index) => index,
        Err(e) => {
            tracing::debug!("No {} index available: {}", options.kind, e);
            return Ok(None);
        }
    };
    let Some(canonical) = index.resolve(&name.to_lowercase()) else {
        return Ok(None);
    };

    let stub = options.prefer_stub && options.kind == PackageKind::Formula;
    Ok(Some(Box::new(ApiLoader::new(canonical, options.kind, stub, ctx))))
}

#[derive(Debug)]
pub struct ApiLoader {
    name: String,
    kind: PackageKind,
    /// Load the bottle-only stub instead of the full document.
    stub: bool,
    path: PathBuf,
}

impl ApiLoader {
    pub fn new(name: &str, kind: PackageKind, stub: bool, ctx: &LoadContext<'_>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            stub,
            path: ctx.taps.default_tap(kind).definition_path(name, kind),
        }
    }
}

impl Loader for ApiLoader {
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
        let Some(api) = ctx.api() else {
            return Err(FormularyError::Unavailable {
                kind: self.kind.as_str(),
                name: self.name.clone(),
            });
        };

        if self.stub {
            let stub = api.stub(&self.name, &ctx.platform.bottle_tag())?;
            return Ok(ctx.materializer().stub(&stub));
        }

        let document = api.document(&self.name, self.kind)?;
        ctx.materializer()
            .document(&document, self.kind, Provenance::Api)
    }

    fn cache_identity(&self) -> CacheIdentity {
        if self.stub {
            return CacheIdentity::Stub(self.name.clone());
        }
        CacheIdentity::Api {
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}
