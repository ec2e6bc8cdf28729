//! Dependency graph over named nodes.
//!
//! Nodes are referenced by index into the construction order; edges point
//! from a node to the nodes it depends on. Two operations drive the
//! extractor runtime: [`DependencyGraph::resolve`] produces the layers a
//! campaign executes in order, and [`DependencyGraph::distinct_subgraphs`]
//! computes the minimal set of nodes to re-run when a trigger fires.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};

/// A directed acyclic graph of named nodes and their upstream dependencies.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    deps: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build a graph from `(name, dependency names)` pairs. Fails when a
    /// dependency references a name outside the configured set.
    pub fn build(nodes: &[(String, Vec<String>)]) -> Result<Self> {
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.as_str(), i))
            .collect();
        if index.len() != nodes.len() {
            bail!("dependency graph contains duplicate node names");
        }

        let mut deps = Vec::with_capacity(nodes.len());
        for (name, upstream) in nodes {
            let mut resolved = Vec::with_capacity(upstream.len());
            for dep in upstream {
                match index.get(dep.as_str()) {
                    Some(&i) => resolved.push(i),
                    None => bail!("node '{name}' depends on unknown node '{dep}'"),
                }
            }
            resolved.sort_unstable();
            resolved.dedup();
            deps.push(resolved);
        }

        Ok(Self {
            names: nodes.iter().map(|(name, _)| name.clone()).collect(),
            deps,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, node: usize) -> &str {
        &self.names[node]
    }

    /// Topological layering of the whole graph: layer 0 holds the nodes with
    /// no dependencies, layer k the nodes whose dependencies all live in
    /// layers `0..k`. Fails on cycles.
    pub fn resolve(&self) -> Result<Vec<Vec<usize>>> {
        self.resolve_within(&(0..self.len()).collect())
    }

    /// Topological layering restricted to `nodes`; dependencies outside the
    /// set are ignored. Members of one layer are mutually independent.
    pub fn resolve_within(&self, nodes: &BTreeSet<usize>) -> Result<Vec<Vec<usize>>> {
        let mut remaining: HashMap<usize, usize> = HashMap::with_capacity(nodes.len());
        for &node in nodes {
            let in_set = self.deps[node].iter().filter(|d| nodes.contains(*d)).count();
            remaining.insert(node, in_set);
        }

        let mut layers = Vec::new();
        let mut placed: BTreeSet<usize> = BTreeSet::new();
        while placed.len() < nodes.len() {
            let layer: Vec<usize> = nodes
                .iter()
                .copied()
                .filter(|n| !placed.contains(n) && remaining[n] == 0)
                .collect();
            if layer.is_empty() {
                let stuck: Vec<&str> = nodes
                    .iter()
                    .filter(|n| !placed.contains(*n))
                    .map(|&n| self.name(n))
                    .collect();
                bail!("dependency cycle among nodes: {}", stuck.join(", "));
            }
            for &node in &layer {
                placed.insert(node);
            }
            for &node in nodes {
                if placed.contains(&node) {
                    continue;
                }
                let satisfied = self.deps[node]
                    .iter()
                    .filter(|d| layer.contains(*d))
                    .count();
                if let Some(count) = remaining.get_mut(&node) {
                    *count -= satisfied;
                }
            }
            layers.push(layer);
        }
        Ok(layers)
    }

    /// Maximal subgraphs rooted at predicate-satisfying nodes. Each subgraph
    /// contains its roots plus everything that transitively depends on them;
    /// subgraphs with overlapping reach are merged, so the returned sets are
    /// disjoint.
    pub fn distinct_subgraphs<P: Fn(usize) -> bool>(&self, pred: P) -> Vec<BTreeSet<usize>> {
        let dependents = self.dependents();
        let roots: Vec<usize> = (0..self.len()).filter(|&n| pred(n)).collect();

        // Union-find over root groups keyed by the nodes their reach covers.
        let mut parent: Vec<usize> = (0..roots.len()).collect();
        fn find(parent: &mut Vec<usize>, i: usize) -> usize {
            if parent[i] != i {
                let root = find(parent, parent[i]);
                parent[i] = root;
            }
            parent[i]
        }

        let mut reach: Vec<BTreeSet<usize>> = Vec::with_capacity(roots.len());
        let mut owner: HashMap<usize, usize> = HashMap::new();
        for (group, &root) in roots.iter().enumerate() {
            let mut set = BTreeSet::new();
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                if !set.insert(node) {
                    continue;
                }
                stack.extend(dependents[node].iter().copied());
            }
            for &node in &set {
                if let Some(&other) = owner.get(&node) {
                    let a = find(&mut parent, group);
                    let b = find(&mut parent, other);
                    if a != b {
                        parent[a] = b;
                    }
                } else {
                    owner.insert(node, group);
                }
            }
            reach.push(set);
        }

        let mut merged: HashMap<usize, BTreeSet<usize>> = HashMap::new();
        for group in 0..roots.len() {
            let repr = find(&mut parent, group);
            merged
                .entry(repr)
                .or_default()
                .extend(reach[group].iter().copied());
        }
        let mut subgraphs: Vec<BTreeSet<usize>> = merged.into_values().collect();
        subgraphs.sort_by_key(|set| set.iter().next().copied());
        subgraphs
    }

    /// Reverse adjacency: for each node, the nodes that depend on it.
    fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.len()];
        for (node, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[(&str, &[&str])]) -> DependencyGraph {
        let nodes: Vec<(String, Vec<String>)> = nodes
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect();
        DependencyGraph::build(&nodes).unwrap()
    }

    fn layer_of(layers: &[Vec<usize>], node: usize) -> usize {
        layers
            .iter()
            .position(|layer| layer.contains(&node))
            .unwrap()
    }

    #[test]
    fn resolve_orders_dependencies_before_dependents() {
        // x -> y -> z, plus w depending on x.
        let g = graph(&[
            ("x", &[]),
            ("y", &["x"]),
            ("z", &["y"]),
            ("w", &["x"]),
        ]);
        let layers = g.resolve().unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec![0]);
        assert_eq!(layers[1], vec![1, 3]);
        assert_eq!(layers[2], vec![2]);

        // No node appears twice.
        let total: usize = layers.iter().map(|l| l.len()).sum();
        assert_eq!(total, g.len());
    }

    #[test]
    fn resolve_rejects_cycles() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let err = g.resolve().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn build_rejects_unknown_dependency() {
        let nodes = vec![("a".to_string(), vec!["missing".to_string()])];
        let err = DependencyGraph::build(&nodes).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn subgraph_covers_transitive_dependents() {
        let g = graph(&[
            ("x", &[]),
            ("y", &["x"]),
            ("z", &["y"]),
            ("w", &["x"]),
            ("other", &[]),
        ]);
        let subgraphs = g.distinct_subgraphs(|n| g.name(n) == "x");
        assert_eq!(subgraphs.len(), 1);
        assert_eq!(subgraphs[0], BTreeSet::from([0, 1, 2, 3]));
    }

    #[test]
    fn overlapping_roots_merge_into_one_subgraph() {
        // a and b both feed c; selecting both roots must yield one subgraph.
        let g = graph(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
        let subgraphs = g.distinct_subgraphs(|n| n == 0 || n == 1);
        assert_eq!(subgraphs.len(), 1);
        assert_eq!(subgraphs[0], BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn disjoint_roots_stay_distinct() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &[]), ("d", &["c"])]);
        let subgraphs = g.distinct_subgraphs(|n| n == 0 || n == 2);
        assert_eq!(subgraphs.len(), 2);
        assert_eq!(subgraphs[0], BTreeSet::from([0, 1]));
        assert_eq!(subgraphs[1], BTreeSet::from([2, 3]));
    }

    #[test]
    fn resolve_within_ignores_outside_dependencies() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        // Restricted to {b, c}, b has no in-set dependency left.
        let layers = g.resolve_within(&BTreeSet::from([1, 2])).unwrap();
        assert_eq!(layers, vec![vec![1], vec![2]]);
    }

    #[test]
    fn layering_invariant_holds_for_dense_graph() {
        let g = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
            ("d", &["b"]),
            ("e", &["c", "d"]),
        ]);
        let layers = g.resolve().unwrap();
        for (node, deps) in [(1usize, vec![0]), (2, vec![0, 1]), (3, vec![1]), (4, vec![2, 3])] {
            for dep in deps {
                assert!(layer_of(&layers, dep) < layer_of(&layers, node));
            }
        }
    }
}
