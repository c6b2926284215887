use super::{ApiLoader, Claim, LoadContext, Loader};
use crate::canonical::{self, Located};
use crate::definition::{Definition, PackageKind, Provenance};
use crate::definition_cache::CacheIdentity;
use crate::error::{FormularyError, Result};
use crate::reference::{Reference, ReferenceKind};
use crate::resolver::LoadOptions;
use crate::tap::Tap;
use std::path::PathBuf;
use std::sync::Arc;

/// `user/repo/name`, followed through the tap's aliases, renames and migrations.
pub(super) fn try_claim(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let ReferenceKind::TapQualified { user, repo, name } = &reference.kind else {
        return Ok(None);
    };

    let tap = ctx.taps.fetch(user, repo);
    let located = canonical::follow(ctx.taps, tap, name, options.kind, options.warn);
    Ok(Some(claim_located(located, ctx, options)))
}

/// Bare names: the default tap first, then every other installed tap.
pub(super) fn try_claim_name(reference: &Reference, ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let ReferenceKind::Name(name) = &reference.kind else {
        return Ok(None);
    };

    match canonical::locate_name(ctx.taps, name, options.kind, options.warn)? {
        Some(located) => Ok(Some(claim_located(located, ctx, options))),
        None => Ok(None),
    }
}

/// A migration into an uninstalled default tap continues through the API.
fn claim_located(located: Located, ctx: &LoadContext<'_>, options: &LoadOptions) -> Box<dyn Loader> {
    if located.tap.is_default_for(options.kind) && !located.tap.is_installed() {
        if let Some(api) = ctx.api() {
            let known = api
                .index(options.kind)
                .map(|index| index.contains(&located.name))
                .unwrap_or(false);
            if known {
                let stub = options.prefer_stub && options.kind == PackageKind::Formula;
                return Box::new(ApiLoader::new(&located.name, options.kind, stub, ctx));
            }
        }
    }

    Box::new(TapLoader {
        tap: located.tap,
        name: located.name,
        path: located.path,
        kind: options.kind,
    })
}

#[derive(Debug)]
pub struct TapLoader {
    tap: Arc<Tap>,
    name: String,
    path: PathBuf,
    kind: PackageKind,
}

impl Loader for TapLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn tap(&self) -> Option<Arc<Tap>> {
        Some(self.tap.clone())
    }

    fn kind(&self) -> PackageKind {
        self.kind
    }

    fn load(&self, ctx: &LoadContext<'_>, _options: &LoadOptions) -> Result<Definition> {
        if !self.path.is_file() {
            let name = format!("{}/{}", self.tap.name(), self.name);
            if !self.tap.is_installed() {
                return Err(FormularyError::TapUnavailable {
                    kind: self.kind.as_str(),
                    name,
                    tap: self.tap.name(),
                });
            }
            return Err(FormularyError::Unavailable {
                kind: self.kind.as_str(),
                name,
            });
        }

        let mut def = ctx.materialize_file(
            &self.name,
            self.kind,
            &self.path,
            Provenance::Path(self.path.clone()),
        )?;
        def.set_tap(Some(self.tap.name()));
        if self.kind == PackageKind::Formula {
            def.aliases = self.tap.aliases_of(&self.name);
        }
        def.oldnames = self.tap.oldnames_of(&self.name, self.kind);
        Ok(def)
    }

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::Path(self.path.clone())
    }
}
