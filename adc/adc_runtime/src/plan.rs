//! Boot planning.
//!
//! A boot manifest is expanded into a dependency graph by locating every
//! required module and following the requirements in its own `modules.json`.
//! The graph is then cut into layers: every module's dependencies sit in
//! earlier layers, so a layer can be started concurrently once the previous
//! one has settled.

use std::collections::{HashMap, HashSet, VecDeque};

use adc_core::error::ResolutionError;
use adc_core::{Error, Manifest, ModuleDescriptor, ModuleKind};
use tracing::debug;

use crate::locator::{LocatedModule, ModuleLocator};

/// Directed graph from each module to the modules it depends on.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    labels: Vec<String>,
    dependencies: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, label: impl Into<String>) -> usize {
        self.labels.push(label.into());
        self.dependencies.push(Vec::new());
        self.labels.len() - 1
    }

    /// Record that `dependent` needs `dependency` ready first.
    pub fn add_dependency(&mut self, dependent: usize, dependency: usize) {
        let deps = &mut self.dependencies[dependent];
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, node: usize) -> &str {
        &self.labels[node]
    }

    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    /// First cycle found, as labels with the starting node repeated at the end.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(graph: &DependencyGraph, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<usize>> {
            marks[node] = Mark::Active;
            path.push(node);

            for &next in &graph.dependencies[node] {
                match marks[next] {
                    Mark::Active => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(graph, next, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }

            path.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.len()];
        for node in 0..self.len() {
            if marks[node] == Mark::New {
                let mut path = Vec::new();
                if let Some(cycle) = visit(self, node, &mut marks, &mut path) {
                    return Some(cycle.into_iter().map(|n| self.labels[n].clone()).collect());
                }
            }
        }
        None
    }

    /// Topological layers. Within a layer nodes keep insertion order.
    pub fn layers(&self) -> Result<Vec<Vec<usize>>, ResolutionError> {
        if let Some(cycle) = self.find_cycle() {
            return Err(ResolutionError::CyclicDependency { cycle });
        }

        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.len()];
        for (node, deps) in self.dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut layers = Vec::new();
        let mut current: Vec<usize> = (0..self.len()).filter(|&n| remaining[n] == 0).collect();
        while !current.is_empty() {
            let mut next = Vec::new();
            for &node in &current {
                for &dependent in &dependents[node] {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            layers.push(std::mem::replace(&mut current, next));
        }

        Ok(layers)
    }
}

/// One module in a boot plan.
#[derive(Debug)]
pub struct PlanNode {
    pub kind: ModuleKind,
    pub descriptor: ModuleDescriptor,

    /// Whether a failure of this module aborts the boot
    pub fatal: bool,

    /// The resolved module, or why it could not be resolved
    pub located: Result<LocatedModule, Error>,
}

impl PlanNode {
    /// `kind:name` or `kind:name#discriminator`.
    pub fn label(&self) -> String {
        node_label(self.kind, &self.descriptor)
    }
}

pub fn node_label(kind: ModuleKind, descriptor: &ModuleDescriptor) -> String {
    format!("{}:{}", kind, descriptor.label())
}

/// A resolved boot: modules plus the order they start in.
#[derive(Debug)]
pub struct BootPlan {
    pub nodes: Vec<PlanNode>,
    pub graph: DependencyGraph,

    /// Nodes the boot manifest itself requires
    pub roots: Vec<usize>,
}

impl BootPlan {
    /// Expand `manifest` by locating each requirement and, transitively, the
    /// requirements of the modules found.
    ///
    /// A module required by several manifests is planned once, with the
    /// first descriptor seen; it is fatal if any requiring manifest sets
    /// `failOnError`. Modules that cannot be located stay in the plan with
    /// their error so the caller applies the failure policy to them.
    pub async fn resolve(manifest: &Manifest, locator: &ModuleLocator) -> Self {
        let mut plan = BootPlan {
            nodes: Vec::new(),
            graph: DependencyGraph::new(),
            roots: Vec::new(),
        };
        let mut index: HashMap<(ModuleKind, String, Option<String>), usize> = HashMap::new();
        let mut pending: VecDeque<(Option<usize>, Manifest)> = VecDeque::from([(None, manifest.clone())]);
        let mut expanded = HashSet::new();

        while let Some((parent, manifest)) = pending.pop_front() {
            for (kind, descriptor) in manifest.requirements() {
                let key = (kind, descriptor.name.clone(), descriptor.discriminator.clone());
                let node = match index.get(&key) {
                    Some(&node) => {
                        plan.nodes[node].fatal |= manifest.fail_on_error;
                        node
                    }
                    None => {
                        let located = locator.locate(kind, descriptor).await;
                        let node = plan.graph.add_node(node_label(kind, descriptor));
                        plan.nodes.push(PlanNode {
                            kind,
                            descriptor: descriptor.clone(),
                            fatal: manifest.fail_on_error,
                            located,
                        });
                        index.insert(key, node);
                        node
                    }
                };

                match parent {
                    Some(parent) => plan.graph.add_dependency(parent, node),
                    None if !plan.roots.contains(&node) => plan.roots.push(node),
                    None => {}
                }

                if expanded.insert(node) {
                    if let Ok(located) = &plan.nodes[node].located {
                        if !located.manifest.is_empty() {
                            debug!(module = %plan.graph.label(node), "Following nested requirements");
                            pending.push_back((Some(node), located.manifest.clone()));
                        }
                    }
                }
            }
        }

        plan
    }

    pub fn layers(&self) -> Result<Vec<Vec<usize>>, ResolutionError> {
        self.graph.layers()
    }

    pub fn label(&self, node: usize) -> &str {
        self.graph.label(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adc_core::ErrorKind;
    use std::path::Path;

    fn graph(edges: &[(usize, usize)], nodes: usize) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for n in 0..nodes {
            graph.add_node(format!("n{}", n));
        }
        for &(from, to) in edges {
            graph.add_dependency(from, to);
        }
        graph
    }

    #[test]
    fn test_layers_respect_dependencies_and_order() {
        // n0 -> n2, n1 -> n2, n3 independent, n4 -> n0
        let graph = graph(&[(0, 2), (1, 2), (4, 0)], 5);
        let layers = graph.layers().unwrap();
        assert_eq!(layers, vec![vec![2, 3], vec![0, 1], vec![4]]);
    }

    #[test]
    fn test_cycle_is_named() {
        let graph = graph(&[(0, 1), (1, 2), (2, 1)], 3);
        assert_eq!(graph.find_cycle().unwrap(), vec!["n1", "n2", "n1"]);

        let err = graph.layers().unwrap_err();
        assert!(matches!(err, ResolutionError::CyclicDependency { .. }));
        assert_eq!(err.to_string(), "Cyclic dependency: n1 -> n2 -> n1");
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = graph(&[(0, 0)], 1);
        assert_eq!(graph.find_cycle().unwrap(), vec!["n0", "n0"]);
    }

    fn install(root: &Path, relative: &str, manifest: &str) {
        let dir = root.join(relative);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("package.json"), "{}").unwrap();
        std::fs::write(dir.join("modules.json"), manifest).unwrap();
    }

    #[tokio::test]
    async fn test_resolve_follows_nested_manifests() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "providers/storage/1.0.0-rust", "{}");
        install(
            dir.path(),
            "services/billing/1.0.0-rust",
            r#"{"failOnError": true, "providers":[{"name":"storage"}]}"#,
        );

        let manifest = Manifest::from_json(
            "boot",
            r#"{"services":[{"name":"billing"}], "presets":[{"name":"missing"}]}"#,
        )
        .unwrap();
        let locator = ModuleLocator::new(dir.path(), "rust");
        let plan = BootPlan::resolve(&manifest, &locator).await;

        let labels: Vec<_> = (0..plan.nodes.len()).map(|n| plan.label(n).to_string()).collect();
        assert_eq!(labels, vec!["service:billing", "preset:missing", "provider:storage"]);
        assert_eq!(plan.roots, vec![0, 1]);
        assert_eq!(plan.graph.dependencies(0), &[2]);
        assert!(plan.nodes[2].fatal);
        assert!(!plan.nodes[0].fatal);

        let missing = plan.nodes[1].located.as_ref().unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::ModuleNotFound);

        assert_eq!(plan.layers().unwrap(), vec![vec![1, 2], vec![0]]);
    }

    #[tokio::test]
    async fn test_resolve_detects_cross_module_cycle() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "providers/a/1.0.0-rust", r#"{"providers":[{"name":"b"}]}"#);
        install(dir.path(), "providers/b/1.0.0-rust", r#"{"providers":[{"name":"a"}]}"#);

        let manifest = Manifest::new().require(ModuleKind::Provider, ModuleDescriptor::new("a"));
        let plan = BootPlan::resolve(&manifest, &ModuleLocator::new(dir.path(), "rust")).await;

        let err = plan.layers().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cyclic dependency: provider:a -> provider:b -> provider:a"
        );
    }
}
