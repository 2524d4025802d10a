use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use cargo_metadata::{Metadata, MetadataCommand, PackageId};

/// Packages that must stay free of the HTTP surface, and the loader/gateway
/// split in both directions.
const RULES: &[(&str, &[&str])] = &[
    ("sightings-contracts", &["sightings-store", "axum", "mongodb"]),
    ("sightings-store", &["sightings-query", "axum", "prometheus"]),
    ("sightings-query", &["sightings-gateway", "axum", "prometheus"]),
    ("sightings-gateway", &["sightings-loader"]),
    ("sightings-loader", &["sightings-gateway", "axum"]),
];

fn main() -> Result<()> {
    let metadata = MetadataCommand::new()
        .exec()
        .context("failed to run `cargo metadata`")?;

    let graph = DependencyGraph::from_metadata(&metadata)?;

    let mut failed = false;
    for (package, forbidden) in RULES {
        let root = graph
            .package_id(package)
            .with_context(|| format!("package `{}` not found in workspace", package))?;

        let mut violations: Vec<&str> = graph
            .reachable_from(root)
            .into_iter()
            .filter(|name| forbidden.contains(name))
            .collect();

        if violations.is_empty() {
            println!(
                "OK: `{}` has no dependency edge to {}",
                package,
                forbidden.join(", ")
            );
        } else {
            violations.sort_unstable();
            violations.dedup();
            eprintln!(
                "FAIL: `{}` depends on forbidden crate(s): {}",
                package,
                violations.join(", ")
            );
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

struct DependencyGraph<'a> {
    names: HashMap<PackageId, &'a str>,
    edges: HashMap<PackageId, Vec<PackageId>>,
}

impl<'a> DependencyGraph<'a> {
    fn from_metadata(metadata: &'a Metadata) -> Result<Self> {
        let resolve = metadata
            .resolve
            .as_ref()
            .context("`cargo metadata` did not include a resolved dependency graph")?;

        let names = metadata
            .packages
            .iter()
            .map(|p| (p.id.clone(), p.name.as_str()))
            .collect();

        let edges = resolve
            .nodes
            .iter()
            .map(|node| {
                let deps: Vec<_> = node.deps.iter().map(|dep| dep.pkg.clone()).collect();
                (node.id.clone(), deps)
            })
            .collect();

        Ok(Self { names, edges })
    }

    fn package_id(&self, name: &str) -> Option<&PackageId> {
        self.names
            .iter()
            .find_map(|(id, pkg)| (*pkg == name).then_some(id))
    }

    /// Names of every package transitively reachable from `root`.
    fn reachable_from(&self, root: &PackageId) -> Vec<&'a str> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut reached = Vec::new();
        visited.insert(root.clone());
        queue.push_back(root.clone());

        while let Some(current) = queue.pop_front() {
            let Some(deps) = self.edges.get(&current) else {
                continue;
            };
            for dep in deps {
                if !visited.insert(dep.clone()) {
                    continue;
                }
                if let Some(name) = self.names.get(dep) {
                    reached.push(*name);
                }
                queue.push_back(dep.clone());
            }
        }

        reached
    }
}
