//! Turn definition sources into [`Definition`]s.
//!
//! Three source shapes are supported:
//!
//! - scripts, parsed by [`crate::script`] and interpreted here statement by
//!   statement for one concrete platform
//! - API documents, overlaid with their `variations` entry for the platform's
//!   bottle tag and then converted field by field
//! - stubs, which only describe the bottle for one tag
//!
//! All three produce the same [`Definition`] accessors; only script-backed
//! definitions carry a build recipe.

use crate::api::{self, CaskDocument, FormulaDocument, FormulaStub, ServiceName, ServiceRun};
use crate::config::Config;
use crate::definition::{
    BottleFile, BottleManifest, CaskDetails, Conflict, Definition, Dependency, DependencyContext,
    DependencyTag, KegOnly, Lifecycle, OptionSpec, PackageKind, Provenance, Requirement,
    RequirementKind, Service, SoftwareSpec,
};
use crate::error::{FormularyError, Result};
use crate::platform::{Arch, MacosVersion, Os, Platform};
use crate::reference::construct_name;
use crate::script::{self, Construct, ConstructKind, ScriptRegistry, Statement, Value};
use crate::tap::{CASK_TAP, CORE_TAP};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// A script to materialize.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    pub name: String,
    pub kind: PackageKind,
    pub path: PathBuf,
    pub provenance: Provenance,
    /// Script text when it does not come from `path` (bottle archives).
    pub content: Option<String>,
}

pub struct Materializer<'a> {
    pub platform: Platform,
    pub config: &'a Config,
    pub registry: &'a ScriptRegistry,
    pub today: NaiveDate,
}

impl<'a> Materializer<'a> {
    pub fn new(platform: Platform, config: &'a Config, registry: &'a ScriptRegistry) -> Self {
        Self {
            platform,
            config,
            registry,
            today: chrono::Local::now().date_naive(),
        }
    }

    pub fn script(&self, source: ScriptSource) -> Result<Definition> {
        let unreadable = |message: String| FormularyError::Unreadable {
            name: source.name.clone(),
            path: source.path.clone(),
            message,
        };

        let content = match &source.content {
            Some(content) => content.clone(),
            None => std::fs::read_to_string(&source.path).map_err(|e| unreadable(e.to_string()))?,
        };

        let namespace = ScriptRegistry::namespace(&self.platform, &source.path, &content);
        let (script, registered) = match self.registry.get(&namespace) {
            Some(script) => (script, true),
            None => {
                let parsed =
                    script::parse(&content, &namespace).map_err(|e| unreadable(e.to_string()))?;
                (std::sync::Arc::new(parsed), false)
            }
        };

        let expected = match source.kind {
            PackageKind::Formula => construct_name(&source.name),
            PackageKind::Cask => source.name.clone(),
        };
        let construct = script
            .construct(&expected)
            .filter(|c| matches_kind(c, source.kind))
            .ok_or_else(|| FormularyError::ClassUnavailable {
                name: source.name.clone(),
                path: source.path.clone(),
                classes: closest_first(&expected, script.construct_names()),
                expected: expected.clone(),
            })?;

        let mut def = Definition::new(
            &source.name,
            source.kind,
            source.provenance.clone(),
            self.platform,
        );
        Evaluator::new(&mut def, self.platform, self.today)
            .run(construct)
            .map_err(|f| unreadable(f.to_string()))?;

        if !registered {
            if let Ok(parsed) = std::sync::Arc::try_unwrap(script) {
                self.registry.register(parsed);
            }
        }

        Ok(def)
    }

    /// Materialize an API-shaped JSON document.
    pub fn document(
        &self,
        doc: &serde_json::Value,
        kind: PackageKind,
        provenance: Provenance,
    ) -> Result<Definition> {
        let merged = api::merge_variation(doc, &self.platform.bottle_tag());
        let mut def = match kind {
            PackageKind::Formula => {
                let doc: FormulaDocument = serde_json::from_value(merged)?;
                self.formula_document(&doc, provenance)
            }
            PackageKind::Cask => {
                let doc: CaskDocument = serde_json::from_value(merged)?;
                self.cask_document(&doc, provenance)
            }
        };

        self.substitute_placeholders(&mut def);
        Ok(def)
    }

    /// Bottle-only definition for the current platform.
    pub fn stub(&self, stub: &FormulaStub) -> Definition {
        let mut def = Definition::new(
            &stub.name,
            PackageKind::Formula,
            Provenance::Stub,
            self.platform,
        );
        def.set_tap(Some(CORE_TAP.to_string()));

        let (version, revision) = stub.version_and_revision();
        def.stable = Some(SoftwareSpec {
            version: Some(version),
            dependencies: stub.dependencies.iter().map(Dependency::new).collect(),
            ..Default::default()
        });
        def.revision = revision;
        def.version_scheme = stub.version_scheme;
        def.aliases = stub.aliases.clone();
        def.oldnames = stub.oldnames.clone();

        if let Some(sha256) = &stub.sha256 {
            let mut bottle = BottleManifest {
                rebuild: stub.rebuild,
                ..Default::default()
            };
            bottle.files.insert(
                self.platform.bottle_tag(),
                BottleFile {
                    cellar: ":any".to_string(),
                    checksum: sha256.clone(),
                },
            );
            def.bottle = Some(bottle);
        }

        def
    }

    fn formula_document(&self, doc: &FormulaDocument, provenance: Provenance) -> Definition {
        let mut def = Definition::new(&doc.name, PackageKind::Formula, provenance, self.platform);
        def.set_tap(Some(doc.tap.clone().unwrap_or_else(|| CORE_TAP.to_string())));
        def.desc = doc.desc.clone();
        def.homepage = doc.homepage.clone();
        def.license = doc.license.clone();
        def.revision = doc.revision;
        def.version_scheme = doc.version_scheme;

        let dependencies = self.document_dependencies(doc);
        let requirements: Vec<Requirement> = doc
            .requirements
            .iter()
            .filter_map(|r| {
                let kind = RequirementKind::from_name(&r.name)?;
                Some(Requirement {
                    kind,
                    version: r.version.clone(),
                    contexts: r.contexts.clone(),
                })
            })
            .collect();

        let stable_url = doc.urls.stable.as_ref();
        if doc.versions.stable.is_some() || stable_url.is_some() {
            def.stable = Some(SoftwareSpec {
                url: stable_url.map(|u| u.url.clone()),
                version: doc.versions.stable.clone(),
                checksum: stable_url.and_then(|u| u.checksum.clone()),
                branch: stable_url.and_then(|u| u.branch.clone()),
                tag: stable_url.and_then(|u| u.tag.clone()),
                mirrors: vec![],
                dependencies: dependencies.clone(),
                requirements: requirements.clone(),
            });
        }

        if let Some(head) = &doc.urls.head {
            def.head = Some(SoftwareSpec {
                url: Some(head.url.clone()),
                version: Some(doc.versions.head.clone().unwrap_or_else(|| "HEAD".to_string())),
                branch: head.branch.clone(),
                dependencies,
                requirements,
                ..Default::default()
            });
        }

        def.bottle = doc
            .bottle
            .as_ref()
            .and_then(|b| b.stable.as_ref())
            .map(|b| BottleManifest {
                rebuild: b.rebuild,
                root_url: b.root_url.clone(),
                files: b
                    .files
                    .iter()
                    .map(|(tag, file)| {
                        (
                            tag.clone(),
                            BottleFile {
                                cellar: file.cellar.clone(),
                                checksum: file.sha256.clone(),
                            },
                        )
                    })
                    .collect(),
            });

        def.options = doc
            .options
            .iter()
            .map(|o| OptionSpec {
                name: o.option.trim_start_matches("--").to_string(),
                description: o.description.clone(),
            })
            .collect();
        def.keg_only = doc.keg_only_reason.as_ref().map(|k| KegOnly {
            reason: k.reason.clone(),
            explanation: k.explanation.clone(),
        });
        def.conflicts = doc
            .conflicts_with
            .iter()
            .enumerate()
            .map(|(i, name)| Conflict {
                name: name.clone(),
                reason: doc.conflicts_with_reasons.get(i).cloned().flatten(),
                package: PackageKind::Formula,
            })
            .collect();
        def.deprecation = doc.deprecated.then(|| lifecycle(&doc.deprecation_date, &doc.deprecation_reason));
        def.disable = doc.disabled.then(|| lifecycle(&doc.disable_date, &doc.disable_reason));
        def.caveats = doc.caveats.clone();
        def.service = doc.service.as_ref().map(|s| self.document_service(s));
        def.aliases = doc.aliases.clone();
        def.oldnames = doc.oldnames.clone();

        def
    }

    fn document_dependencies(&self, doc: &FormulaDocument) -> Vec<Dependency> {
        let tagged = [
            (&doc.dependencies, DependencyTag::Required),
            (&doc.build_dependencies, DependencyTag::Build),
            (&doc.test_dependencies, DependencyTag::Test),
            (&doc.recommended_dependencies, DependencyTag::Recommended),
            (&doc.optional_dependencies, DependencyTag::Optional),
        ];

        let mut deps: Vec<Dependency> = Vec::new();
        for (names, tag) in tagged {
            for name in names {
                match deps.iter_mut().find(|d| &d.name == name) {
                    Some(existing) => *existing = existing.clone().tagged(tag),
                    None => deps.push(Dependency::new(name.clone()).tagged(tag)),
                }
            }
        }

        for (i, entry) in doc.uses_from_macos.iter().enumerate() {
            let since = doc
                .uses_from_macos_bounds
                .get(i)
                .and_then(|b| b.since.as_deref())
                .and_then(MacosVersion::from_symbol);

            let (name, tags) = match entry {
                serde_json::Value::String(name) => (name.clone(), vec![]),
                serde_json::Value::Object(map) => match map.iter().next() {
                    Some((name, tags)) => (name.clone(), json_texts(tags)),
                    None => continue,
                },
                _ => continue,
            };

            if !self.needs_uses_from_macos(since) {
                continue;
            }
            let dep = tags
                .iter()
                .filter_map(|t| DependencyTag::from_symbol(t))
                .fold(Dependency::new(name), Dependency::tagged)
                .in_context(DependencyContext::UsesFromMacos { since });
            deps.push(dep);
        }

        deps
    }

    fn document_service(&self, service: &api::ServiceDocument) -> Service {
        let os = self.platform.os.as_str();
        let run = match &service.run {
            Some(ServiceRun::Command(command)) => vec![command.clone()],
            Some(ServiceRun::Args(args)) => args.clone(),
            Some(ServiceRun::PerOs(per_os)) => per_os.get(os).map(json_texts).unwrap_or_default(),
            None => vec![],
        };
        let name = match &service.name {
            Some(ServiceName::Plain(name)) => Some(name.clone()),
            Some(ServiceName::PerOs(per_os)) => per_os.get(os).cloned(),
            None => None,
        };
        let keep_alive = match &service.keep_alive {
            Some(serde_json::Value::Bool(keep)) => *keep,
            Some(serde_json::Value::Object(map)) => {
                map.get("always").and_then(|v| v.as_bool()).unwrap_or(false)
            }
            _ => false,
        };

        Service {
            run,
            name,
            keep_alive,
            working_dir: service.working_dir.clone(),
            log_path: service.log_path.clone(),
            error_log_path: service.error_log_path.clone(),
        }
    }

    fn cask_document(&self, doc: &CaskDocument, provenance: Provenance) -> Definition {
        let mut def = Definition::new(&doc.token, PackageKind::Cask, provenance, self.platform);
        def.set_tap(Some(doc.tap.clone().unwrap_or_else(|| CASK_TAP.to_string())));
        def.desc = doc.desc.clone();
        def.homepage = doc.homepage.clone();

        let mut dependencies: Vec<Dependency> =
            doc.depends_on.formula.iter().map(Dependency::new).collect();
        dependencies.extend(doc.depends_on.cask.iter().map(|c| Dependency::new(c).on_cask()));

        let mut requirements = Vec::new();
        if let Some(macos) = &doc.depends_on.macos {
            requirements.push(Requirement {
                kind: RequirementKind::Macos,
                version: Some(json_requirement_text(macos)),
                contexts: vec![],
            });
        }
        if let Some(arch) = &doc.depends_on.arch {
            requirements.push(Requirement {
                kind: RequirementKind::Arch,
                version: Some(json_requirement_text(arch)),
                contexts: vec![],
            });
        }

        def.stable = Some(SoftwareSpec {
            url: doc.url.clone(),
            version: doc.version.clone(),
            checksum: doc.sha256.clone(),
            dependencies,
            requirements,
            ..Default::default()
        });

        if let Some(conflicts) = &doc.conflicts_with {
            let casks = conflicts.cask.iter().map(|c| (c, PackageKind::Cask));
            let formulae = conflicts.formula.iter().map(|f| (f, PackageKind::Formula));
            def.conflicts = casks
                .chain(formulae)
                .map(|(name, package)| Conflict {
                    name: name.clone(),
                    reason: None,
                    package,
                })
                .collect();
        }

        def.caveats = doc.caveats.clone();
        def.deprecation = doc.deprecated.then(|| lifecycle(&doc.deprecation_date, &doc.deprecation_reason));
        def.disable = doc.disabled.then(|| lifecycle(&doc.disable_date, &doc.disable_reason));
        def.oldnames = doc.old_tokens.clone();

        let flight_blocks = doc
            .artifacts
            .iter()
            .filter_map(|a| a.as_object())
            .flat_map(|a| a.keys())
            .filter(|key| key.ends_with("flight"))
            .cloned()
            .collect();
        def.cask = Some(CaskDetails {
            names: doc.name.clone(),
            artifacts: doc.artifacts.clone(),
            flight_blocks,
            auto_updates: doc.auto_updates.unwrap_or(false),
        });

        def
    }

    /// One left-to-right pass over caveats and service strings.
    fn substitute_placeholders(&self, def: &mut Definition) {
        let prefix = self.config.prefix.display().to_string();
        let cellar = self.config.cellar.display().to_string();
        let home = self.config.home.display().to_string();
        // Longest placeholder first: `$HOME` prefixes the others
        let replacements = [
            ("$HOMEBREW_PREFIX", prefix.as_str()),
            ("$HOMEBREW_CELLAR", cellar.as_str()),
            ("$HOME", home.as_str()),
        ];

        if let Some(caveats) = &def.caveats {
            def.caveats = Some(substitute(caveats, &replacements));
        }
        if let Some(service) = &mut def.service {
            service.run = service
                .run
                .iter()
                .map(|arg| substitute(arg, &replacements))
                .collect();
            for path in [
                &mut service.working_dir,
                &mut service.log_path,
                &mut service.error_log_path,
            ]
            .into_iter()
            .flatten()
            {
                *path = substitute(path, &replacements);
            }
        }
    }

    fn needs_uses_from_macos(&self, since: Option<MacosVersion>) -> bool {
        uses_from_macos_applies(&self.platform, since)
    }
}

/// Replace each placeholder occurrence once; replacement text is not rescanned.
pub fn substitute(text: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while !rest.is_empty() {
        for (placeholder, value) in replacements {
            if let Some(after) = rest.strip_prefix(placeholder) {
                out.push_str(value);
                rest = after;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// `uses_from_macos` is a real dependency on Linux, and on macOS only
/// before the release that started shipping it.
fn uses_from_macos_applies(platform: &Platform, since: Option<MacosVersion>) -> bool {
    match platform.os {
        Os::Linux => true,
        Os::Macos => match (since, platform.macos) {
            (Some(since), Some(current)) => current < since,
            _ => false,
        },
    }
}

fn matches_kind(construct: &Construct, kind: PackageKind) -> bool {
    matches!(
        (construct.kind, kind),
        (ConstructKind::Formula, PackageKind::Formula) | (ConstructKind::Cask, PackageKind::Cask)
    )
}

fn closest_first(expected: &str, mut classes: Vec<String>) -> Vec<String> {
    classes.sort_by(|a, b| {
        strsim::jaro_winkler(expected, b)
            .partial_cmp(&strsim::jaro_winkler(expected, a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    classes
}

fn lifecycle(date: &Option<String>, reason: &Option<String>) -> Lifecycle {
    Lifecycle {
        date: date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        reason: reason.clone(),
    }
}

fn json_texts(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        _ => vec![],
    }
}

/// `">= :big_sur"`, `{">=": ["big_sur"]}` or `[{"type": "arm64"}]` as text.
fn json_requirement_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(op, v)| format!("{} {}", op, json_texts(v).join(", ")))
            .collect::<Vec<_>>()
            .join(", "),
        serde_json::Value::Array(items) => items
            .iter()
            .map(json_requirement_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[derive(Debug)]
struct Failure {
    line: usize,
    message: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

type Eval<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Top,
    Stable,
    Head,
    Bottle,
    Service,
}

const IGNORED_STATEMENTS: &[&str] = &[
    "link_overwrite",
    "skip_clean",
    "pour_bottle?",
    "cxxstdlib_check",
    "deny_network_access!",
    "no_autobump!",
    "compatibility_version",
];

const IGNORED_BLOCKS: &[&str] = &["livecheck", "test", "resource", "patch", "fails_with"];

const CASK_ARTIFACTS: &[&str] = &[
    "app",
    "pkg",
    "binary",
    "artifact",
    "suite",
    "font",
    "manpage",
    "installer",
    "prefpane",
    "qlplugin",
    "colorpicker",
    "dictionary",
    "input_method",
    "screen_saver",
    "mdimporter",
    "keyboard_layout",
    "audio_unit_plugin",
    "vst_plugin",
    "vst3_plugin",
    "bash_completion",
    "zsh_completion",
    "fish_completion",
    "uninstall",
    "zap",
];

const FLIGHT_BLOCKS: &[&str] = &[
    "preflight",
    "postflight",
    "uninstall_preflight",
    "uninstall_postflight",
];

/// Interprets one construct into a definition.
struct Evaluator<'d> {
    def: &'d mut Definition,
    platform: Platform,
    today: NaiveDate,
    context: DependencyContext,
    shared_dependencies: Vec<Dependency>,
    shared_requirements: Vec<Requirement>,
    recipe: Option<Vec<Vec<String>>>,
    cask: CaskDetails,
}

impl<'d> Evaluator<'d> {
    fn new(def: &'d mut Definition, platform: Platform, today: NaiveDate) -> Self {
        Self {
            def,
            platform,
            today,
            context: DependencyContext::Always,
            shared_dependencies: vec![],
            shared_requirements: vec![],
            recipe: None,
            cask: CaskDetails::default(),
        }
    }

    fn is_cask(&self) -> bool {
        self.def.kind == PackageKind::Cask
    }

    fn run(mut self, construct: &Construct) -> std::result::Result<(), Failure> {
        self.block(&construct.body, Scope::Top)?;

        if self.def.stable.is_none() && self.def.head.is_none() {
            self.def.stable = Some(SoftwareSpec::default());
        }
        for spec in [&mut self.def.stable, &mut self.def.head].into_iter().flatten() {
            let mut dependencies = self.shared_dependencies.clone();
            dependencies.append(&mut spec.dependencies);
            spec.dependencies = dependencies;
            let mut requirements = self.shared_requirements.clone();
            requirements.append(&mut spec.requirements);
            spec.requirements = requirements;
        }

        if let Some(recipe) = self.recipe.take() {
            self.def.set_build_recipe(recipe);
        }
        if self.is_cask() {
            self.def.cask = Some(std::mem::take(&mut self.cask));
        }
        Ok(())
    }

    fn block(&mut self, statements: &[Statement], scope: Scope) -> std::result::Result<(), Failure> {
        for stmt in statements {
            match &stmt.block {
                Some(body) => self.block_statement(stmt, body, scope)?,
                None => self.statement(stmt, scope).map_err(|message| Failure {
                    line: stmt.line,
                    message,
                })?,
            }
        }
        Ok(())
    }

    fn block_statement(
        &mut self,
        stmt: &Statement,
        body: &[Statement],
        scope: Scope,
    ) -> std::result::Result<(), Failure> {
        let fail = |message: String| Failure {
            line: stmt.line,
            message,
        };
        let directive = stmt.directive.as_str();

        let condition = match directive {
            "on_macos" => Some((self.platform.os == Os::Macos, DependencyContext::Os(Os::Macos))),
            "on_linux" => Some((self.platform.os == Os::Linux, DependencyContext::Os(Os::Linux))),
            "on_arm" => Some((self.platform.arch == Arch::Arm64, DependencyContext::Arch(Arch::Arm64))),
            "on_intel" => Some((
                self.platform.arch == Arch::X86_64,
                DependencyContext::Arch(Arch::X86_64),
            )),
            _ => None,
        };
        if let Some((applies, context)) = condition {
            if applies {
                let outer = std::mem::replace(&mut self.context, context);
                let result = self.block(body, scope);
                self.context = outer;
                result?;
            }
            return Ok(());
        }

        if IGNORED_BLOCKS.contains(&directive) {
            return Ok(());
        }

        match (directive, scope) {
            ("bottle", Scope::Top) if !self.is_cask() => {
                self.def.bottle.get_or_insert_with(BottleManifest::default);
                self.block(body, Scope::Bottle)
            }
            ("stable", Scope::Top) if !self.is_cask() => self.block(body, Scope::Stable),
            ("head", Scope::Top) if !self.is_cask() => {
                self.statement_args_into_head(stmt).map_err(fail)?;
                self.block(body, Scope::Head)
            }
            ("service", Scope::Top) if !self.is_cask() => {
                self.def.service.get_or_insert_with(Service::default);
                self.block(body, Scope::Service)
            }
            ("install", Scope::Top) if !self.is_cask() => {
                let steps = body
                    .iter()
                    .map(|s| install_step(s).map_err(|message| Failure { line: s.line, message }))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.recipe = Some(steps);
                Ok(())
            }
            (block, Scope::Top) if self.is_cask() && FLIGHT_BLOCKS.contains(&block) => {
                self.cask.flight_blocks.push(block.to_string());
                Ok(())
            }
            _ => Err(fail(format!("unknown block `{}`", directive))),
        }
    }

    fn statement(&mut self, stmt: &Statement, scope: Scope) -> Eval<()> {
        let directive = stmt.directive.as_str();
        if IGNORED_STATEMENTS.contains(&directive) {
            return Ok(());
        }

        match scope {
            Scope::Bottle => return self.bottle_statement(stmt),
            Scope::Service => return self.service_statement(stmt),
            Scope::Top | Scope::Stable | Scope::Head => {}
        }

        match directive {
            "desc" => self.def.desc = Some(string(stmt)?),
            "homepage" => self.def.homepage = Some(string(stmt)?),
            "url" => {
                let url = string(stmt)?;
                let spec = self.spec(scope);
                spec.url = Some(url);
                spec.branch = option_text(stmt, "branch");
                spec.tag = option_text(stmt, "tag");
            }
            "mirror" => {
                let mirror = string(stmt)?;
                self.spec(scope).mirrors.push(mirror);
            }
            "version" => {
                let version = match stmt.first() {
                    Some(Value::Symbol(s)) if self.is_cask() => s.clone(),
                    _ => string(stmt)?,
                };
                self.spec(scope).version = Some(version);
            }
            "sha256" => {
                let checksum = match stmt.first() {
                    Some(Value::Symbol(s)) if self.is_cask() => s.clone(),
                    _ => string(stmt)?,
                };
                self.spec(scope).checksum = Some(checksum);
            }
            "depends_on" => self.depends_on(stmt, scope)?,
            "conflicts_with" => self.conflicts_with(stmt)?,
            "caveats" => self.def.caveats = Some(string(stmt)?),
            "deprecate!" => {
                let state = self.lifecycle(stmt)?;
                if state.0 {
                    self.def.deprecation = Some(state.1);
                }
            }
            "disable!" => {
                let (active, state) = self.lifecycle(stmt)?;
                if active {
                    self.def.disable = Some(state);
                } else {
                    self.def.deprecation = Some(state);
                }
            }
            "odeprecated" => {
                let method = text(stmt)?;
                match stmt.positional().nth(1).and_then(Value::as_text) {
                    Some(replacement) => tracing::warn!(
                        "{}: calling {} is deprecated! Use {} instead.",
                        self.def.name,
                        method,
                        replacement
                    ),
                    None => tracing::warn!("{}: calling {} is deprecated!", self.def.name, method),
                }
            }
            "odisabled" => {
                return Err(format!("calling {} is disabled!", text(stmt)?));
            }
            _ if self.is_cask() => self.cask_statement(stmt)?,
            _ => self.formula_statement(stmt, scope)?,
        }
        Ok(())
    }

    fn formula_statement(&mut self, stmt: &Statement, scope: Scope) -> Eval<()> {
        match stmt.directive.as_str() {
            "license" => self.def.license = Some(license(stmt)?),
            "revision" => self.def.revision = non_negative(stmt)?,
            "version_scheme" => self.def.version_scheme = non_negative(stmt)?,
            "head" if scope == Scope::Top => self.statement_args_into_head(stmt)?,
            "option" => {
                let name = string(stmt)?;
                let description = stmt
                    .positional()
                    .nth(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.def.options.push(OptionSpec { name, description });
            }
            "uses_from_macos" => self.uses_from_macos(stmt, scope)?,
            "keg_only" => {
                let reason = match stmt.first() {
                    Some(Value::Symbol(s)) => format!(":{}", s),
                    Some(Value::Str(s)) => s.clone(),
                    _ => return Err("keg_only expects a reason".to_string()),
                };
                let explanation = stmt
                    .positional()
                    .nth(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.def.keg_only = Some(KegOnly {
                    reason,
                    explanation,
                });
            }
            "service" => {
                if stmt.pairs().is_empty() {
                    return Err("service expects `run:` and related keys or a block".to_string());
                }
                self.def.service.get_or_insert_with(Service::default);
                for (key, value) in stmt.pairs() {
                    let key = key.as_text().unwrap_or_default();
                    self.service_field(key, value)?;
                }
            }
            other => return Err(format!("unknown directive `{}`", other)),
        }
        Ok(())
    }

    fn cask_statement(&mut self, stmt: &Statement) -> Eval<()> {
        let directive = stmt.directive.as_str();
        match directive {
            "name" => self.cask.names.push(string(stmt)?),
            "auto_updates" => {
                self.cask.auto_updates = stmt
                    .first()
                    .and_then(Value::as_bool)
                    .ok_or("auto_updates expects true or false")?;
            }
            artifact if CASK_ARTIFACTS.contains(&artifact) => {
                if stmt.args.is_empty() {
                    return Err(format!("`{}` expects arguments", artifact));
                }
                let args: Vec<serde_json::Value> = stmt.args.iter().map(Value::to_json).collect();
                let mut entry = serde_json::Map::new();
                entry.insert(artifact.to_string(), serde_json::Value::Array(args));
                self.cask.artifacts.push(serde_json::Value::Object(entry));
            }
            other => return Err(format!("unknown directive `{}`", other)),
        }
        Ok(())
    }

    fn spec(&mut self, scope: Scope) -> &mut SoftwareSpec {
        match scope {
            Scope::Head => self.def.head.get_or_insert_with(SoftwareSpec::default),
            _ => self.def.stable.get_or_insert_with(SoftwareSpec::default),
        }
    }

    fn statement_args_into_head(&mut self, stmt: &Statement) -> Eval<()> {
        if stmt.args.is_empty() {
            return Ok(());
        }
        let url = string(stmt)?;
        let head = self.spec(Scope::Head);
        head.url = Some(url);
        head.branch = option_text(stmt, "branch");
        head.version.get_or_insert_with(|| "HEAD".to_string());
        Ok(())
    }

    fn add_dependency(&mut self, scope: Scope, dep: Dependency) {
        let dep = match dep.context {
            DependencyContext::Always => dep.in_context(self.context),
            _ => dep,
        };
        match scope {
            Scope::Stable | Scope::Head => self.spec(scope).dependencies.push(dep),
            _ => self.shared_dependencies.push(dep),
        }
    }

    fn add_requirement(&mut self, scope: Scope, requirement: Requirement) {
        match scope {
            Scope::Stable | Scope::Head => self.spec(scope).requirements.push(requirement),
            _ => self.shared_requirements.push(requirement),
        }
    }

    fn depends_on(&mut self, stmt: &Statement, scope: Scope) -> Eval<()> {
        for value in stmt.positional() {
            match value {
                Value::Str(name) => self.add_dependency(scope, Dependency::new(name.clone())),
                Value::Symbol(symbol) => {
                    let kind = RequirementKind::from_name(symbol)
                        .ok_or_else(|| format!("unknown requirement :{}", symbol))?;
                    self.add_requirement(
                        scope,
                        Requirement {
                            kind,
                            version: None,
                            contexts: vec![],
                        },
                    );
                }
                other => return Err(format!("depends_on cannot take a {}", other.type_name())),
            }
        }

        for (key, value) in stmt.pairs() {
            match key {
                Value::Str(name) => {
                    let tags = value
                        .texts()
                        .ok_or_else(|| format!("invalid tags for dependency {}", name))?;
                    let mut dep = Dependency::new(name.clone());
                    for tag in tags {
                        let tag = DependencyTag::from_symbol(&tag)
                            .ok_or_else(|| format!("unknown dependency tag :{}", tag))?;
                        dep = dep.tagged(tag);
                    }
                    self.add_dependency(scope, dep);
                }
                Value::Symbol(key) if self.is_cask() && (key == "formula" || key == "cask") => {
                    let names = value
                        .texts()
                        .ok_or_else(|| format!("depends_on {}: expects names", key))?;
                    for name in names {
                        let dep = Dependency::new(name);
                        let dep = if key == "cask" { dep.on_cask() } else { dep };
                        self.add_dependency(scope, dep);
                    }
                }
                Value::Symbol(key) => {
                    let kind = RequirementKind::from_name(key)
                        .ok_or_else(|| format!("unknown requirement {}:", key))?;
                    let mut texts = value
                        .texts()
                        .ok_or_else(|| format!("invalid value for {}:", key))?
                        .into_iter();
                    let version = texts.next();
                    self.add_requirement(
                        scope,
                        Requirement {
                            kind,
                            version,
                            contexts: texts.collect(),
                        },
                    );
                }
                other => return Err(format!("depends_on cannot take a {} key", other.type_name())),
            }
        }
        Ok(())
    }

    fn uses_from_macos(&mut self, stmt: &Statement, scope: Scope) -> Eval<()> {
        let since = match stmt.option("since") {
            Some(value) => {
                let symbol = value.as_text().ok_or("since: expects a macOS release")?;
                Some(
                    MacosVersion::from_symbol(symbol)
                        .ok_or_else(|| format!("unknown macOS release :{}", symbol))?,
                )
            }
            None => None,
        };

        let mut deps = Vec::new();
        if let Some(name) = stmt.first().and_then(Value::as_str) {
            deps.push(Dependency::new(name));
        }
        for (key, value) in stmt.pairs() {
            let Value::Str(name) = key else { continue };
            let mut dep = Dependency::new(name.clone());
            for tag in value.texts().unwrap_or_default() {
                if let Some(tag) = DependencyTag::from_symbol(&tag) {
                    dep = dep.tagged(tag);
                }
            }
            deps.push(dep);
        }
        if deps.is_empty() {
            return Err("uses_from_macos expects a dependency name".to_string());
        }

        if uses_from_macos_applies(&self.platform, since) {
            for dep in deps {
                self.add_dependency(scope, dep.in_context(DependencyContext::UsesFromMacos { since }));
            }
        }
        Ok(())
    }

    fn conflicts_with(&mut self, stmt: &Statement) -> Eval<()> {
        let reason = option_text(stmt, "because");
        for name in stmt.positional() {
            let name = name.as_str().ok_or("conflicts_with expects names")?;
            self.def.conflicts.push(Conflict {
                name: name.to_string(),
                reason: reason.clone(),
                package: self.def.kind,
            });
        }
        for (key, package) in [("cask", PackageKind::Cask), ("formula", PackageKind::Formula)] {
            let Some(value) = stmt.option(key) else { continue };
            let names = value
                .texts()
                .ok_or_else(|| format!("conflicts_with {}: expects names", key))?;
            for name in names {
                self.def.conflicts.push(Conflict {
                    name,
                    reason: reason.clone(),
                    package,
                });
            }
        }
        Ok(())
    }

    /// (in effect today, state) for `deprecate!`/`disable!`.
    fn lifecycle(&self, stmt: &Statement) -> Eval<(bool, Lifecycle)> {
        let date = match stmt.option("date") {
            Some(value) => {
                let text = value.as_str().ok_or("date: expects a string")?;
                Some(
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .map_err(|e| format!("invalid date {:?}: {}", text, e))?,
                )
            }
            None => None,
        };
        let reason = option_text(stmt, "because");
        let active = date.is_none_or(|d| d <= self.today);
        Ok((active, Lifecycle { date, reason }))
    }

    fn bottle_statement(&mut self, stmt: &Statement) -> Eval<()> {
        let bottle = self.def.bottle.get_or_insert_with(BottleManifest::default);
        match stmt.directive.as_str() {
            "rebuild" => bottle.rebuild = non_negative(stmt)?,
            "root_url" => bottle.root_url = Some(string(stmt)?),
            "sha256" => {
                let cellar = stmt
                    .option("cellar")
                    .map(|c| match c {
                        Value::Symbol(s) => format!(":{}", s),
                        other => other.as_text().unwrap_or_default().to_string(),
                    })
                    .unwrap_or_else(|| ":any".to_string());
                let files: Vec<(String, String)> = stmt
                    .pairs()
                    .iter()
                    .filter(|(k, _)| k.as_text() != Some("cellar"))
                    .map(|(tag, checksum)| {
                        match (tag.as_text(), checksum.as_str()) {
                            (Some(tag), Some(checksum)) => Ok((tag.to_string(), checksum.to_string())),
                            _ => Err("sha256 expects tag: \"checksum\" pairs".to_string()),
                        }
                    })
                    .collect::<Eval<_>>()?;
                if files.is_empty() {
                    return Err("sha256 in a bottle block needs at least one tag".to_string());
                }
                for (tag, checksum) in files {
                    bottle.files.insert(
                        tag,
                        BottleFile {
                            cellar: cellar.clone(),
                            checksum,
                        },
                    );
                }
            }
            other => return Err(format!("unknown bottle directive `{}`", other)),
        }
        Ok(())
    }

    fn service_statement(&mut self, stmt: &Statement) -> Eval<()> {
        let value = match stmt.args.as_slice() {
            [value] => value,
            [] => &Value::Bool(true),
            _ => return Err(format!("{} expects one value", stmt.directive)),
        };
        self.service_field(&stmt.directive, value)
    }

    fn service_field(&mut self, key: &str, value: &Value) -> Eval<()> {
        let os = self.platform.os.as_str();
        let service = self.def.service.get_or_insert_with(Service::default);
        match key {
            "run" => {
                service.run = match value {
                    Value::Hash(per_os) => per_os
                        .iter()
                        .find(|(k, _)| k.as_text() == Some(os))
                        .and_then(|(_, v)| v.texts())
                        .unwrap_or_default(),
                    other => other.texts().ok_or("run: expects a command or argument list")?,
                };
            }
            "name" => {
                service.name = match value {
                    Value::Hash(per_os) => per_os
                        .iter()
                        .find(|(k, _)| k.as_text() == Some(os))
                        .and_then(|(_, v)| v.as_text().map(str::to_string)),
                    other => Some(other.as_text().ok_or("name: expects a string")?.to_string()),
                };
            }
            "keep_alive" => {
                service.keep_alive = match value {
                    Value::Bool(keep) => *keep,
                    Value::Hash(pairs) => pairs
                        .iter()
                        .any(|(k, v)| k.as_text() == Some("always") && v.as_bool() == Some(true)),
                    _ => return Err("keep_alive: expects true, false or a hash".to_string()),
                };
            }
            "working_dir" => service.working_dir = Some(text_value(value, key)?),
            "log_path" => service.log_path = Some(text_value(value, key)?),
            "error_log_path" => service.error_log_path = Some(text_value(value, key)?),
            "run_type" | "interval" | "cron" | "environment_variables" | "process_type"
            | "require_root" | "input_path" | "sockets" | "macos_legacy_timers" => {}
            other => return Err(format!("unknown service directive `{}`", other)),
        }
        Ok(())
    }
}

fn install_step(stmt: &Statement) -> Eval<Vec<String>> {
    if stmt.directive != "system" || stmt.block.is_some() {
        return Err(format!(
            "install blocks may only contain `system`, found `{}`",
            stmt.directive
        ));
    }
    let args: Option<Vec<String>> = stmt
        .args
        .iter()
        .map(|a| a.as_str().map(str::to_string))
        .collect();
    match args {
        Some(args) if !args.is_empty() => Ok(args),
        _ => Err("system expects string arguments".to_string()),
    }
}

fn string(stmt: &Statement) -> Eval<String> {
    match stmt.first() {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(format!(
            "{} expects a string, got a {}",
            stmt.directive,
            other.type_name()
        )),
        None => Err(format!("{} expects a string", stmt.directive)),
    }
}

fn text(stmt: &Statement) -> Eval<String> {
    stmt.first()
        .and_then(Value::as_text)
        .map(str::to_string)
        .ok_or_else(|| format!("{} expects a string", stmt.directive))
}

fn text_value(value: &Value, key: &str) -> Eval<String> {
    value
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| format!("{}: expects a string", key))
}

fn option_text(stmt: &Statement, key: &str) -> Option<String> {
    stmt.option(key).and_then(Value::as_text).map(str::to_string)
}

fn non_negative(stmt: &Statement) -> Eval<u32> {
    stmt.first()
        .and_then(Value::as_int)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| format!("{} expects a non-negative integer", stmt.directive))
}

fn license(stmt: &Statement) -> Eval<String> {
    match stmt.first() {
        Some(Value::Str(s)) => return Ok(s.clone()),
        Some(Value::Symbol(s)) => return Ok(s.clone()),
        _ => {}
    }
    for (key, joiner) in [("any_of", " or "), ("all_of", " and ")] {
        if let Some(items) = stmt.option(key).and_then(Value::texts) {
            return Ok(items.join(joiner));
        }
    }
    Err("license expects a string, symbol, any_of: or all_of:".to_string())
}

/// Path a script would have inside an unpacked bottle.
pub fn bottle_script_path(bottle: &Path, name: &str, version: &str) -> PathBuf {
    bottle
        .join(name)
        .join(version)
        .join(".brew")
        .join(format!("{}.rb", name))
}
