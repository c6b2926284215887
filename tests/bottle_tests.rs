// Bottle reference tests
//
// Bottles are built on the fly as gzipped tarballs in the test prefix.

mod test_helpers;

use formulary::{FormularyError, LoadOptions, PackageKind, Provenance};
use std::sync::Arc;
use test_helpers::{TestEnvironment, formula_script};

fn formula() -> LoadOptions {
    LoadOptions::new(PackageKind::Formula)
}

#[test]
fn test_bottle_with_embedded_script() {
    let env = TestEnvironment::new();
    let script = formula_script("foo", "1.0");
    let bottle = env.write_bottle(
        "foo--1.0.x86_64_linux.bottle.tar.gz",
        &[("foo/1.0/bin/foo", "#!/bin/sh\n"), ("foo/1.0/.brew/foo.rb", script.as_str())],
    );
    let resolver = env.resolver();

    let reference = bottle.to_str().unwrap();
    let def = resolver.resolve(reference, &formula()).unwrap();
    assert_eq!(def.name, "foo");
    assert_eq!(def.version(), Some("1.0"));
    assert_eq!(def.provenance, Provenance::Bottle(bottle.clone()));

    let again = resolver.resolve(reference, &formula()).unwrap();
    assert!(Arc::ptr_eq(&def, &again));
}

#[test]
fn test_bottle_without_script_falls_back_to_name() {
    let env = TestEnvironment::new();
    let tap_script = env.write_formula("homebrew/core", "foo", &formula_script("foo", "1.1"));
    let bottle = env.write_bottle(
        "foo--1.0.x86_64_linux.bottle.tar.gz",
        &[("foo/1.0/bin/foo", "#!/bin/sh\n")],
    );
    let resolver = env.resolver();

    let def = resolver.resolve(bottle.to_str().unwrap(), &formula()).unwrap();
    assert_eq!(def.full_name, "foo");
    assert_eq!(def.version(), Some("1.1"));
    assert_eq!(def.provenance, Provenance::Path(tap_script));
}

#[test]
fn test_unreadable_bottle_falls_back_to_name() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "foo", &formula_script("foo", "1.1"));
    let bottle = env.path("foo--1.0.arm64_sonoma.bottle.tar.gz");
    std::fs::write(&bottle, b"not a tarball").unwrap();
    let resolver = env.resolver();

    let def = resolver.resolve(bottle.to_str().unwrap(), &formula()).unwrap();
    assert_eq!(def.version(), Some("1.1"));
}

#[test]
fn test_bottle_fallback_without_definition() {
    let env = TestEnvironment::new();
    let bottle = env.write_bottle(
        "ghost--1.0.x86_64_linux.bottle.tar.gz",
        &[("ghost/1.0/bin/ghost", "#!/bin/sh\n")],
    );
    let resolver = env.resolver();

    let err = resolver.resolve(bottle.to_str().unwrap(), &formula()).unwrap_err();
    match err {
        FormularyError::Unavailable { name, .. } => assert_eq!(name, "ghost"),
        other => panic!("expected an unavailable formula, got {other:?}"),
    }
}
