// Resolution tests against an isolated prefix
//
// Each test builds taps, kegs and API documents in a temporary directory and
// resolves references through a fresh Resolver.

mod test_helpers;

use formulary::{Arch, FormularyError, LoadOptions, MacosVersion, PackageKind, Platform, Provenance, SpecKind};
use serde_json::json;
use std::sync::Arc;
use test_helpers::{TestEnvironment, formula_script, formula_with};

fn formula() -> LoadOptions {
    LoadOptions::new(PackageKind::Formula)
}

#[test]
fn test_same_reference_shares_definition() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "wget", &formula_script("wget", "1.24"));
    let resolver = env.resolver();

    let first = resolver.resolve("wget", &formula()).unwrap();
    let second = resolver.resolve("wget", &formula()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // A different spelling of the same file shares the materialized definition
    let qualified = resolver.resolve("homebrew/core/wget", &formula()).unwrap();
    assert!(Arc::ptr_eq(&first, &qualified));

    assert_eq!(first.full_name, "wget");
    assert_eq!(first.tap.as_deref(), Some("homebrew/core"));
    assert_eq!(first.version(), Some("1.24"));
    assert!(matches!(first.provenance, Provenance::Path(_)));
}

#[test]
fn test_third_party_tap_names_are_qualified() {
    let env = TestEnvironment::new();
    env.write_formula("user/tools", "foo", &formula_script("foo", "2.0"));
    let resolver = env.resolver();

    let qualified = resolver.resolve("user/tools/foo", &formula()).unwrap();
    assert_eq!(qualified.full_name, "user/tools/foo");
    assert_eq!(qualified.tap.as_deref(), Some("user/tools"));

    // Unique across installed taps, so the bare name finds it too
    let bare = resolver.resolve("foo", &formula()).unwrap();
    assert!(Arc::ptr_eq(&qualified, &bare));
}

#[test]
fn test_alias_resolves_to_target() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "python@3.12", &formula_script("python@3.12", "3.12.4"));
    env.alias("homebrew/core", "python3", "python@3.12");
    let resolver = env.resolver();

    let def = resolver.resolve("python3", &formula()).unwrap();
    assert_eq!(def.name, "python@3.12");
    assert_eq!(def.aliases, vec!["python3"]);
}

#[test]
fn test_alias_path_is_recorded() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "python@3.12", &formula_script("python@3.12", "3.12.4"));
    let alias = env.alias("homebrew/core", "python3", "python@3.12");
    let resolver = env.resolver();

    let def = resolver
        .resolve("python3", &formula().with_alias_path(&alias))
        .unwrap();
    assert_eq!(def.alias_path.as_deref(), Some(alias.as_path()));

    // Without the alias path the definition is a separate cache entry
    let plain = resolver.resolve("python@3.12", &formula()).unwrap();
    assert!(plain.alias_path.is_none());
    assert!(!Arc::ptr_eq(&def, &plain));
}

#[test]
fn test_renamed_formula_resolves_to_new_name() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "newfoo", &formula_script("newfoo", "1.0"));
    env.write_table("homebrew/core", "formula_renames.json", json!({"oldfoo": "newfoo"}));
    let resolver = env.resolver();

    let def = resolver.resolve("oldfoo", &formula()).unwrap();
    assert_eq!(def.name, "newfoo");
    assert_eq!(def.oldnames, vec!["oldfoo"]);
}

#[test]
fn test_migration_follows_into_other_tap() {
    let env = TestEnvironment::new();
    env.write_table("homebrew/core", "tap_migrations.json", json!({"bar": "user/tools"}));
    env.write_formula("user/tools", "bar", &formula_script("bar", "3.0"));
    let resolver = env.resolver();

    let def = resolver.resolve("homebrew/core/bar", &formula()).unwrap();
    assert_eq!(def.full_name, "user/tools/bar");
}

#[test]
fn test_migration_with_new_name() {
    let env = TestEnvironment::new();
    env.write_table("user/old", "tap_migrations.json", json!({"baz": "user/new/qux"}));
    env.write_formula("user/new", "qux", &formula_script("qux", "1.0"));
    let resolver = env.resolver();

    let def = resolver.resolve("user/old/baz", &formula()).unwrap();
    assert_eq!(def.full_name, "user/new/qux");
    assert_eq!(resolver.canonical_name("user/old/baz", PackageKind::Formula), "user/new/qux");
}

#[test]
fn test_migration_cycle_terminates() {
    let env = TestEnvironment::new();
    env.write_table("user/one", "tap_migrations.json", json!({"foo": "user/two"}));
    env.write_table("user/two", "tap_migrations.json", json!({"foo": "user/one"}));
    let resolver = env.resolver();

    let err = resolver.resolve("user/one/foo", &formula()).unwrap_err();
    assert!(err.is_unavailable(), "unexpected error: {err:?}");

    // The walk settles on a tap in the cycle rather than looping
    let canonical = resolver.canonical_name("user/one/foo", PackageKind::Formula);
    assert!(canonical == "user/one/foo" || canonical == "user/two/foo");
}

#[test]
fn test_ambiguous_name_across_taps() {
    let env = TestEnvironment::new();
    env.write_formula("user/one", "dup", &formula_script("dup", "1.0"));
    env.write_formula("user/two", "dup", &formula_script("dup", "2.0"));
    let resolver = env.resolver();

    match resolver.resolve("dup", &formula()) {
        Err(FormularyError::Ambiguous { name, taps }) => {
            assert_eq!(name, "dup");
            assert_eq!(taps, vec!["user/one", "user/two"]);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }

    // Qualified references are never ambiguous
    let two = resolver.resolve("user/two/dup", &formula()).unwrap();
    assert_eq!(two.version(), Some("2.0"));
}

#[test]
fn test_default_tap_wins_over_ambiguity() {
    let env = TestEnvironment::new();
    env.write_formula("user/one", "dup", &formula_script("dup", "1.0"));
    env.write_formula("user/two", "dup", &formula_script("dup", "2.0"));
    env.write_formula("homebrew/core", "dup", &formula_script("dup", "3.0"));
    let resolver = env.resolver();

    let def = resolver.resolve("dup", &formula()).unwrap();
    assert_eq!(def.full_name, "dup");
    assert_eq!(def.version(), Some("3.0"));
}

#[test]
fn test_canonical_name_is_idempotent() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "python@3.12", &formula_script("python@3.12", "3.12.4"));
    env.alias("homebrew/core", "python3", "python@3.12");
    env.write_formula("user/tools", "foo", &formula_script("foo", "1.0"));
    env.write_table("user/tools", "formula_renames.json", json!({"oldfoo": "foo"}));
    let resolver = env.resolver();

    for reference in ["python3", "Python3", "homebrew/core/python3", "user/tools/oldfoo", "foo", "missing"] {
        let once = resolver.canonical_name(reference, PackageKind::Formula);
        let twice = resolver.canonical_name(&once, PackageKind::Formula);
        assert_eq!(once, twice, "canonical name of {reference} is not stable");
    }

    assert_eq!(resolver.canonical_name("python3", PackageKind::Formula), "python@3.12");
    assert_eq!(resolver.canonical_name("user/tools/oldfoo", PackageKind::Formula), "user/tools/foo");
    assert_eq!(resolver.canonical_name("MISSING", PackageKind::Formula), "missing");
}

#[test]
fn test_missing_name_is_unavailable() {
    let env = TestEnvironment::new();
    env.tap("homebrew/core");
    let resolver = env.resolver();

    let err = resolver.resolve("nothing-here", &formula()).unwrap_err();
    assert!(matches!(err, FormularyError::Unavailable { .. }));

    // The path is where the default tap would keep it
    let path = resolver.path_for("nothing-here", PackageKind::Formula).unwrap();
    assert!(path.ends_with("homebrew/homebrew-core/Formula/nothing-here.rb"));
}

#[test]
fn test_uninstalled_tap_asks_to_tap() {
    let env = TestEnvironment::new();
    let resolver = env.resolver();

    match resolver.resolve("someone/elsewhere/thing", &formula()) {
        Err(FormularyError::TapUnavailable { tap, .. }) => assert_eq!(tap, "someone/elsewhere"),
        other => panic!("expected an untapped error, got {other:?}"),
    }
}

#[test]
fn test_head_spec_must_exist() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "stableonly", &formula_script("stableonly", "1.0"));
    env.write_formula(
        "homebrew/core",
        "bleeding",
        &formula_with("bleeding", "1.0", "  head \"https://example.com/bleeding.git\"\n"),
    );
    let resolver = env.resolver();

    let err = resolver
        .resolve("stableonly", &formula().with_spec(SpecKind::Head))
        .unwrap_err();
    assert!(matches!(err, FormularyError::SpecUnavailable { .. }));

    let head = resolver
        .resolve("bleeding", &formula().with_spec(SpecKind::Head))
        .unwrap();
    assert_eq!(head.active_spec(), Some(SpecKind::Head));

    let stable = resolver.resolve("bleeding", &formula()).unwrap();
    assert_eq!(stable.active_spec(), None);
    assert_eq!(stable.version(), Some("1.0"));
}

#[test]
fn test_simulated_platform_restores_on_drop() {
    let env = TestEnvironment::new();
    env.write_formula(
        "homebrew/core",
        "portable",
        &formula_with(
            "portable",
            "1.0",
            "  on_macos do\n    depends_on \"mac-dep\"\n  end\n  on_linux do\n    depends_on \"linux-dep\"\n  end\n",
        ),
    );
    let resolver = env.resolver();
    let deps = |def: &formulary::Definition| -> Vec<String> {
        def.dependencies().iter().map(|d| d.name.clone()).collect()
    };

    let host = resolver.resolve("portable", &formula()).unwrap();
    assert_eq!(deps(&host), vec!["linux-dep"]);

    {
        let _mac = resolver.simulate(Platform::macos(MacosVersion::Sonoma, Arch::Arm64));
        let mac = resolver.resolve("portable", &formula()).unwrap();
        assert_eq!(deps(&mac), vec!["mac-dep"]);
        assert_eq!(mac.platform.bottle_tag(), "arm64_sonoma");

        {
            let _linux = resolver.simulate(TestEnvironment::host());
            let inner = resolver.resolve("portable", &formula()).unwrap();
            assert!(Arc::ptr_eq(&host, &inner));
        }

        assert_eq!(resolver.platform().bottle_tag(), "arm64_sonoma");
        let again = resolver.resolve("portable", &formula()).unwrap();
        assert!(Arc::ptr_eq(&mac, &again));
    }

    assert_eq!(resolver.platform(), TestEnvironment::host());
    let after = resolver.resolve("portable", &formula()).unwrap();
    assert!(Arc::ptr_eq(&host, &after));
}

#[test]
fn test_with_platform_scopes_the_closure() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "wget", &formula_script("wget", "1.24"));
    let resolver = env.resolver();

    let tag = resolver.with_platform(Platform::macos(MacosVersion::Ventura, Arch::X86_64), |r| {
        r.resolve("wget", &formula()).unwrap().platform.bottle_tag()
    });
    assert_eq!(tag, "ventura");
    assert_eq!(resolver.platform(), TestEnvironment::host());
}

#[test]
fn test_clear_cache_keeps_factory_results() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "wget", &formula_script("wget", "1.24"));
    let resolver = env.resolver();

    let before = resolver.resolve("wget", &formula()).unwrap();
    resolver.clear_cache();
    let after = resolver.resolve("wget", &formula()).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[test]
fn test_clear_cache_without_factory_cache() {
    let mut env = TestEnvironment::new();
    env.config.factory_cache = false;
    env.write_formula("homebrew/core", "wget", &formula_script("wget", "1.24"));
    let resolver = env.resolver();

    let before = resolver.resolve("wget", &formula()).unwrap();
    resolver.clear_cache();
    let after = resolver.resolve("wget", &formula()).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.full_name, after.full_name);
}

#[test]
fn test_reload_taps_picks_up_new_tables() {
    let env = TestEnvironment::new();
    env.write_formula("homebrew/core", "newfoo", &formula_script("newfoo", "1.0"));
    let resolver = env.resolver();
    assert!(resolver.resolve("oldfoo", &formula()).is_err());

    env.write_table("homebrew/core", "formula_renames.json", json!({"oldfoo": "newfoo"}));
    resolver.reload_taps();

    let def = resolver.resolve("oldfoo", &formula()).unwrap();
    assert_eq!(def.name, "newfoo");
}

#[test]
fn test_installed_keg_without_tap() {
    let env = TestEnvironment::new();
    let keg = env.install_keg("orphan", "0.9", &formula_script("orphan", "0.9"));
    let resolver = env.resolver();

    let def = resolver.resolve("orphan", &formula()).unwrap();
    assert_eq!(def.version(), Some("0.9"));
    match &def.provenance {
        Provenance::Keg(path) => assert!(path.ends_with(".brew/orphan.rb")),
        other => panic!("expected a keg definition, got {other:?}"),
    }

    // Paths inside the keg resolve to the same package
    let script = keg.join(".brew/orphan.rb");
    let from_keg = resolver
        .resolve(script.to_str().unwrap(), &formula())
        .unwrap();
    assert_eq!(from_keg.name, "orphan");
}

#[test]
fn test_path_reference_outside_taps() {
    let env = TestEnvironment::new();
    let path = env.path("local.rb");
    std::fs::write(&path, formula_script("local", "0.1")).unwrap();
    let resolver = env.resolver();

    let def = resolver.resolve(path.to_str().unwrap(), &formula()).unwrap();
    assert_eq!(def.name, "local");
    assert!(def.tap.is_none());
    assert_eq!(def.provenance, Provenance::Path(path.clone()));
}

#[test]
fn test_json_document_on_disk() {
    let env = TestEnvironment::new();
    let path = env.path("doc.json");
    std::fs::write(
        &path,
        json!({"name": "doc", "versions": {"stable": "4.2"}, "dependencies": ["zstd"]}).to_string(),
    )
    .unwrap();
    let resolver = env.resolver();

    let def = resolver.resolve(path.to_str().unwrap(), &formula()).unwrap();
    assert_eq!(def.version(), Some("4.2"));
    assert_eq!(def.dependencies()[0].name, "zstd");
}

#[test]
fn test_remote_url_is_rejected() {
    let env = TestEnvironment::new();
    let resolver = env.resolver();

    let err = resolver
        .resolve("https://example.com/Formula/foo.rb", &formula())
        .unwrap_err();
    match err {
        FormularyError::UnsupportedUri { url, .. } => {
            assert_eq!(url, "https://example.com/Formula/foo.rb")
        }
        other => panic!("expected an unsupported URI, got {other:?}"),
    }
}

#[test]
fn test_file_url_is_copied_into_cache() {
    let env = TestEnvironment::new();
    let source = env.path("remote.rb");
    std::fs::write(&source, formula_script("remote", "5.0")).unwrap();
    let resolver = env.resolver();

    let url = format!("file://{}", source.display());
    let def = resolver.resolve(&url, &formula()).unwrap();
    assert_eq!(def.version(), Some("5.0"));
    match &def.provenance {
        Provenance::Uri { url: origin, path } => {
            assert_eq!(origin, &url);
            assert!(path.starts_with(env.config.formula_cache_path()));
            assert!(path.is_file());
        }
        other => panic!("expected a URI definition, got {other:?}"),
    }
}

#[test]
fn test_file_url_pointing_into_cache_keeps_script() {
    let env = TestEnvironment::new();
    let cached = env.config.formula_cache_path().join("foo.rb");
    std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
    let script = formula_script("foo", "1.0");
    std::fs::write(&cached, &script).unwrap();
    let resolver = env.resolver();

    let def = resolver
        .resolve(&format!("file://{}", cached.display()), &formula())
        .unwrap();
    assert_eq!(def.version(), Some("1.0"));
    assert_eq!(std::fs::read_to_string(&cached).unwrap(), script);
}

#[test]
fn test_cask_script_from_tap() {
    let env = TestEnvironment::new();
    env.write_cask(
        "homebrew/cask",
        "tool",
        "cask \"tool\" do\n  version \"2.1\"\n  sha256 :no_check\n  url \"https://example.com/tool.dmg\"\n  name \"Tool\"\n  app \"Tool.app\"\nend\n",
    );
    let resolver = env.resolver();

    let def = resolver.resolve("tool", &LoadOptions::new(PackageKind::Cask)).unwrap();
    assert_eq!(def.kind, PackageKind::Cask);
    assert_eq!(def.full_name, "tool");
    assert_eq!(def.version(), Some("2.1"));

    // Formula lookups do not see casks
    assert!(resolver.resolve("tool", &formula()).is_err());
}
