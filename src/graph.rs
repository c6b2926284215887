//! Runtime dependency graphs.
//!
//! Install-receipt creation needs the realized runtime closure of a
//! definition. [`DependencyGraph`] is the seam: an installer hands in the graph
//! it already built, and [`ResolverGraph`] computes one through a [`Resolver`].

use crate::definition::{Definition, PackageKind};
use crate::error::Result;
use crate::resolver::{LoadOptions, Resolver};
use std::collections::HashSet;

/// One package in a runtime closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub full_name: String,
    pub kind: PackageKind,
    pub version: Option<String>,
    pub revision: u32,
    /// Declared by the root definition rather than pulled in transitively.
    pub declared_directly: bool,
}

impl DependencyNode {
    pub fn from_definition(def: &Definition, declared_directly: bool) -> Self {
        Self {
            full_name: def.full_name.clone(),
            kind: def.kind,
            version: def.version().map(str::to_string),
            revision: def.revision,
            declared_directly,
        }
    }

    pub fn pkg_version(&self) -> Option<String> {
        self.version.as_ref().map(|version| match self.revision {
            0 => version.clone(),
            revision => format!("{}_{}", version, revision),
        })
    }
}

pub trait DependencyGraph {
    /// Runtime dependencies of `def` as built with `used_options`,
    /// dependencies before their dependents.
    fn runtime_closure(&self, def: &Definition, used_options: &[String]) -> Result<Vec<DependencyNode>>;
}

/// Walks runtime dependencies by resolving each one.
pub struct ResolverGraph<'a> {
    resolver: &'a Resolver,
}

impl<'a> ResolverGraph<'a> {
    pub fn new(resolver: &'a Resolver) -> Self {
        Self { resolver }
    }

    fn visit(
        &self,
        def: &Definition,
        used_options: &[String],
        direct: &HashSet<String>,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<DependencyNode>,
    ) -> Result<()> {
        for dep in def.dependencies().iter().filter(|d| d.is_realized(used_options)) {
            let options = LoadOptions::new(dep.package);
            let child = self.resolver.resolve(&dep.name, &options)?;

            if done.contains(&child.full_name) {
                continue;
            }
            if !visiting.insert(child.full_name.clone()) {
                tracing::warn!(
                    "Dependency cycle through {} while walking {}",
                    child.full_name,
                    def.full_name
                );
                continue;
            }

            // Options only apply to the package being built
            self.visit(&child, &[], direct, visiting, done, order)?;

            visiting.remove(&child.full_name);
            done.insert(child.full_name.clone());
            let declared = direct.contains(&dep.name) || direct.contains(&child.full_name);
            order.push(DependencyNode::from_definition(&child, declared));
        }
        Ok(())
    }
}

impl DependencyGraph for ResolverGraph<'_> {
    fn runtime_closure(&self, def: &Definition, used_options: &[String]) -> Result<Vec<DependencyNode>> {
        let direct: HashSet<String> = def
            .dependencies()
            .iter()
            .filter(|d| d.is_realized(used_options))
            .map(|d| d.name.clone())
            .collect();

        let mut visiting = HashSet::from([def.full_name.clone()]);
        let mut done = HashSet::new();
        let mut order = Vec::new();
        self.visit(def, used_options, &direct, &mut visiting, &mut done, &mut order)?;
        Ok(order)
    }
}
