//! Local bottle archives.
//!
//! A bottle carries the script it was built from at
//! `<name>/<version>/.brew/<name>.rb`. That script is materialized with the
//! bottle recorded as provenance. When the archive cannot be read or the
//! script fails, the name is resolved through the rest of the chain instead.

use super::{Claim, LoadContext, Loader};
use crate::definition::{Definition, PackageKind, Provenance};
use crate::definition_cache::CacheIdentity;
use crate::error::Result;
use crate::materialize::{ScriptSource, bottle_script_path};
use crate::reference::{Reference, ReferenceKind};
use crate::resolver::LoadOptions;
use anyhow::{Context, anyhow};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;

pub(super) fn try_claim(reference: &Reference, _ctx: &LoadContext<'_>, options: &LoadOptions) -> Claim {
    let ReferenceKind::BottlePath {
        path,
        name,
        version,
        tag,
        ..
    } = &reference.kind
    else {
        return Ok(None);
    };
    if options.kind != PackageKind::Formula || !path.is_file() {
        return Ok(None);
    }

    Ok(Some(Box::new(BottleLoader {
        path: path.clone(),
        name: name.to_lowercase(),
        version: version.clone(),
        tag: tag.clone(),
    })))
}

#[derive(Debug)]
pub struct BottleLoader {
    path: PathBuf,
    name: String,
    version: String,
    tag: String,
}

impl BottleLoader {
    fn load_embedded(&self, ctx: &LoadContext<'_>) -> Result<Definition> {
        let (name, version, content) = read_embedded_script(&self.path)?;
        let def = ctx.materializer().script(ScriptSource {
            path: bottle_script_path(&self.path, &name, &version),
            name,
            kind: PackageKind::Formula,
            provenance: Provenance::Bottle(self.path.clone()),
            content: Some(content),
        })?;

        self.verify_checksum(&def);
        Ok(def)
    }

    /// Warn when the archive does not match the checksum its script declares.
    fn verify_checksum(&self, def: &Definition) {
        let Some(expected) = def.bottle.as_ref().and_then(|b| b.file_for(&self.tag)) else {
            return;
        };

        match sha256_file(&self.path) {
            Ok(actual) if actual == expected.checksum => {}
            Ok(actual) => tracing::warn!(
                "{}: bottle checksum mismatch (expected {}, got {})",
                self.path.display(),
                expected.checksum,
                actual
            ),
            Err(e) => tracing::warn!("{}: could not checksum bottle: {}", self.path.display(), e),
        }
    }
}

impl Loader for BottleLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn kind(&self) -> PackageKind {
        PackageKind::Formula
    }

    fn load(&self, ctx: &LoadContext<'_>, options: &LoadOptions) -> Result<Definition> {
        match self.load_embedded(ctx) {
            Ok(def) => Ok(def),
            Err(e) => {
                tracing::warn!(
                    "Failed to load {} {} from bottle {}: {}. Falling back to the {} definition.",
                    self.name,
                    self.version,
                    self.path.display(),
                    e,
                    self.name
                );
                let fallback = Reference::classify(&self.name, ctx.config);
                super::claim(&fallback, ctx, options)?.load(ctx, options)
            }
        }
    }

    fn cache_identity(&self) -> CacheIdentity {
        CacheIdentity::Path(self.path.clone())
    }
}

/// Find `<name>/<version>/.brew/<file>.rb` inside a bottle archive.
fn read_embedded_script(path: &Path) -> Result<(String, String, String)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries().context("Failed to read bottle archive")? {
        let mut entry = entry.context("Failed to read bottle entry")?;
        let entry_path = entry.path().context("Invalid bottle entry path")?.into_owned();

        let parts: Vec<&str> = entry_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();

        if let [name, version, ".brew", script] = parts.as_slice() {
            if script.ends_with(".rb") {
                let (name, version) = (name.to_string(), version.to_string());
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .context("Failed to read embedded script")?;
                return Ok((name, version, content));
            }
        }
    }

    Err(anyhow!("no formula script in bottle {}", path.display()).into())
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn write_bottle(dir: &Path, file_name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(file_name);
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_read_embedded_script() {
        let temp = TempDir::new().unwrap();
        let bottle = write_bottle(
            temp.path(),
            "foo--1.0.x86_64_linux.bottle.tar.gz",
            &[
                ("foo/1.0/bin/foo", "#!/bin/sh\n"),
                ("foo/1.0/.brew/foo.rb", "class Foo < Formula\nend\n"),
            ],
        );

        let (name, version, content) = read_embedded_script(&bottle).unwrap();
        assert_eq!(name, "foo");
        assert_eq!(version, "1.0");
        assert!(content.starts_with("class Foo"));
    }

    #[test]
    fn test_missing_script_is_an_error() {
        let temp = TempDir::new().unwrap();
        let bottle = write_bottle(
            temp.path(),
            "foo--1.0.x86_64_linux.bottle.tar.gz",
            &[("foo/1.0/bin/foo", "#!/bin/sh\n")],
        );
        assert!(read_embedded_script(&bottle).is_err());
    }
}
