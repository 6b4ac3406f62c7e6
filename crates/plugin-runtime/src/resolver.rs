//! Dependency Resolver (component 4.6): validates declared dependencies,
//! detects cycles, and topologically orders bundles for load.
//!
//! The algorithm itself (explicit adjacency map, DFS cycle detection, Kahn's
//! algorithm for the topo-sort with a deterministic tiebreak) follows the
//! teacher's plain, explicit-control-flow style seen throughout
//! `connector/activation_pipeline.rs` rather than `cargo`'s resolver (read
//! for its doc-comment exposition only — its semver-coexistence backtracking
//! model does not match this spec's strict single-version-per-id model).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::registry::{BundleDescriptor, DependencyDeclaration};

#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    pub load_order: Vec<String>,
    pub blocked: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("circular dependency detected among: {}", participants.join(", "))]
    CircularDependency { participants: Vec<String> },
}

impl ResolverError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        "PLUGIN_RESOLVER_CIRCULAR_DEPENDENCY"
    }
}

/// Resolves load order for `descriptors` given their `deps`. Bundles with
/// unsatisfied required dependencies are reported in `blocked` and excluded
/// from the graph entirely (they cannot introduce a cycle). A cycle among
/// otherwise-satisfiable bundles is a hard error.
pub fn resolve(
    descriptors: &HashMap<String, BundleDescriptor>,
    deps: &HashMap<String, Vec<DependencyDeclaration>>,
) -> Result<ResolutionResult, ResolverError> {
    let mut result = ResolutionResult::default();
    let empty = Vec::new();

    // Pass 1: validate each dependency declaration.
    let mut satisfied_edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut ids: Vec<&String> = descriptors.keys().collect();
    ids.sort();

    for id in &ids {
        let declarations = deps.get(*id).unwrap_or(&empty);
        let mut blocked_reason = None;
        let mut edges = Vec::new();

        for dep in declarations {
            match descriptors.get(&dep.target_id) {
                None => {
                    if dep.optional {
                        result.warnings.push(format!(
                            "Optional dependency missing: {}",
                            dep.target_id
                        ));
                    } else {
                        blocked_reason = Some(format!(
                            "Missing required dependency: {}",
                            dep.target_id
                        ));
                    }
                }
                Some(target) => {
                    if !dep.range.matches(&target.version) {
                        if dep.optional {
                            result.warnings.push(format!(
                                "Optional dependency version mismatch: required {:?}, present {}",
                                dep.range, target.version
                            ));
                        } else {
                            blocked_reason = Some(format!(
                                "version mismatch: required {:?}, present {}",
                                dep.range, target.version
                            ));
                        }
                    } else {
                        edges.push(dep.target_id.clone());
                    }
                }
            }
        }

        if let Some(reason) = blocked_reason {
            result.blocked.insert((*id).clone(), reason);
        } else {
            satisfied_edges.insert((*id).clone(), edges);
        }
    }

    let graph_ids: Vec<String> = satisfied_edges.keys().cloned().collect();
    let mut sorted_graph_ids = graph_ids.clone();
    sorted_graph_ids.sort();

    if let Some(participants) = detect_cycles_in(&satisfied_edges, &sorted_graph_ids) {
        return Err(ResolverError::CircularDependency { participants });
    }

    result.load_order = topo_sort(&satisfied_edges, &sorted_graph_ids);
    Ok(result)
}

/// Diagnostic cycle detector over the full declared dependency graph
/// (ignores whether the dependency is actually satisfiable — it only cares
/// about the `target_id` shape), exposed for callers who want to check for
/// cycles before validating versions.
#[must_use]
pub fn detect_cycles(
    descriptors: &HashMap<String, BundleDescriptor>,
    deps: &HashMap<String, Vec<DependencyDeclaration>>,
) -> Option<Vec<String>> {
    let empty = Vec::new();
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut ids: Vec<String> = descriptors.keys().cloned().collect();
    ids.sort();
    for id in &ids {
        let targets = deps
            .get(id)
            .unwrap_or(&empty)
            .iter()
            .filter(|d| descriptors.contains_key(&d.target_id))
            .map(|d| d.target_id.clone())
            .collect();
        edges.insert(id.clone(), targets);
    }
    detect_cycles_in(&edges, &ids)
}

fn detect_cycles_in(edges: &HashMap<String, Vec<String>>, ids: &[String]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = ids.iter().map(|id| (id.as_str(), Mark::Unvisited)).collect();
    let mut stack: Vec<String> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        edges: &'a HashMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                return Some(stack[start..].to_vec());
            }
            _ => {}
        }
        marks.insert(node, Mark::InProgress);
        stack.push(node.to_string());
        if let Some(targets) = edges.get(node) {
            for target in targets {
                if let Some(cycle) = visit(target, edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for id in ids {
        if marks.get(id.as_str()) == Some(&Mark::Unvisited) {
            if let Some(cycle) = visit(id, edges, &mut marks, &mut stack) {
                let mut unique: Vec<String> = cycle;
                unique.sort();
                unique.dedup();
                return Some(unique);
            }
        }
    }
    None
}

/// Kahn's algorithm: dependencies load before dependents. `edges` maps
/// dependent -> its (satisfied) dependency ids.
fn topo_sort(edges: &HashMap<String, Vec<String>>, ids: &[String]) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    // dependency -> dependents, so visiting a dependency can decrement its dependents.
    let mut dependents: HashMap<&str, Vec<&str>> = ids.iter().map(|id| (id.as_str(), Vec::new())).collect();

    for id in ids {
        for dep in &edges[id] {
            // A satisfied edge can still point at a bundle that is itself
            // blocked for an unrelated reason; such targets never made it
            // into `ids`, so they have no in-degree/dependents slot here.
            if !dependents.contains_key(dep.as_str()) {
                continue;
            }
            *in_degree.get_mut(id.as_str()).unwrap() += 1;
            dependents.get_mut(dep.as_str()).unwrap().push(id.as_str());
        }
    }

    let mut ready: VecDeque<&str> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| in_degree[id] == 0)
        .collect::<Vec<_>>()
        .into_iter()
        .collect();
    // Deterministic: process the ready set in sorted order.
    let mut ready_sorted: Vec<&str> = ready.drain(..).collect();
    ready_sorted.sort_unstable();
    let mut queue: VecDeque<&str> = ready_sorted.into();

    let mut order = Vec::with_capacity(ids.len());
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        order.push(id.to_string());
        let mut newly_ready = Vec::new();
        for dependent in &dependents[id] {
            let degree = in_degree.get_mut(dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                newly_ready.push(*dependent);
            }
        }
        newly_ready.sort_unstable();
        for n in newly_ready {
            queue.push_back(n);
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{Range, Version};

    fn descriptor(id: &str, version: &str) -> BundleDescriptor {
        BundleDescriptor {
            id: id.to_string(),
            human_name: id.to_string(),
            version: version.parse().unwrap(),
            summary: String::new(),
            author: String::new(),
            min_host_version: Version::new(1, 0, 0),
        }
    }

    fn dep(target: &str, range: &str, optional: bool) -> DependencyDeclaration {
        DependencyDeclaration {
            target_id: target.to_string(),
            range: range.parse::<Range>().unwrap(),
            optional,
        }
    }

    #[test]
    fn happy_path_orders_dependencies_first() {
        let descriptors: HashMap<String, BundleDescriptor> = [
            ("a".to_string(), descriptor("a", "1.0.0")),
            ("b".to_string(), descriptor("b", "1.0.0")),
            ("c".to_string(), descriptor("c", "1.0.0")),
        ]
        .into_iter()
        .collect();
        let deps: HashMap<String, Vec<DependencyDeclaration>> = [
            ("a".to_string(), vec![]),
            ("b".to_string(), vec![dep("a", "^1.0.0", false)]),
            (
                "c".to_string(),
                vec![dep("a", "^1.0.0", false), dep("b", "^1.0.0", false)],
            ),
        ]
        .into_iter()
        .collect();

        let result = resolve(&descriptors, &deps).unwrap();
        assert_eq!(result.load_order, vec!["a", "b", "c"]);
        assert!(result.blocked.is_empty());
    }

    #[test]
    fn missing_required_dependency_blocks() {
        let descriptors: HashMap<String, BundleDescriptor> =
            [("a".to_string(), descriptor("a", "1.0.0"))].into_iter().collect();
        let deps: HashMap<String, Vec<DependencyDeclaration>> =
            [("a".to_string(), vec![dep("x", "^1.0.0", false)])]
                .into_iter()
                .collect();

        let result = resolve(&descriptors, &deps).unwrap();
        assert!(result.load_order.is_empty());
        assert!(result.blocked["a"].contains("Missing required dependency"));
    }

    #[test]
    fn missing_optional_dependency_warns_but_loads() {
        let descriptors: HashMap<String, BundleDescriptor> =
            [("a".to_string(), descriptor("a", "1.0.0"))].into_iter().collect();
        let deps: HashMap<String, Vec<DependencyDeclaration>> =
            [("a".to_string(), vec![dep("x", "^1.0.0", true)])]
                .into_iter()
                .collect();

        let result = resolve(&descriptors, &deps).unwrap();
        assert_eq!(result.load_order, vec!["a"]);
        assert!(result.warnings.iter().any(|w| w.contains("Optional dependency missing")));
    }

    #[test]
    fn incompatible_version_blocks() {
        let descriptors: HashMap<String, BundleDescriptor> = [
            ("a".to_string(), descriptor("a", "1.0.0")),
            ("b".to_string(), descriptor("b", "1.0.0")),
        ]
        .into_iter()
        .collect();
        let deps: HashMap<String, Vec<DependencyDeclaration>> = [
            ("a".to_string(), vec![]),
            ("b".to_string(), vec![dep("a", ">=2.0.0", false)]),
        ]
        .into_iter()
        .collect();

        let result = resolve(&descriptors, &deps).unwrap();
        assert_eq!(result.load_order, vec!["a"]);
        assert!(result.blocked["b"].contains("version mismatch"));
    }

    #[test]
    fn cycle_is_detected_and_rejected() {
        let descriptors: HashMap<String, BundleDescriptor> = [
            ("a".to_string(), descriptor("a", "1.0.0")),
            ("b".to_string(), descriptor("b", "1.0.0")),
            ("c".to_string(), descriptor("c", "1.0.0")),
        ]
        .into_iter()
        .collect();
        let deps: HashMap<String, Vec<DependencyDeclaration>> = [
            ("a".to_string(), vec![dep("b", "^1.0.0", false)]),
            ("b".to_string(), vec![dep("c", "^1.0.0", false)]),
            ("c".to_string(), vec![dep("a", "^1.0.0", false)]),
        ]
        .into_iter()
        .collect();

        let err = resolve(&descriptors, &deps).unwrap_err();
        match err {
            ResolverError::CircularDependency { participants } => {
                assert_eq!(participants, vec!["a", "b", "c"]);
            }
        }
    }

    #[test]
    fn satisfied_edge_to_independently_blocked_target_does_not_panic() {
        let descriptors: HashMap<String, BundleDescriptor> = [
            ("a".to_string(), descriptor("a", "1.0.0")),
            ("b".to_string(), descriptor("b", "1.0.0")),
        ]
        .into_iter()
        .collect();
        let deps: HashMap<String, Vec<DependencyDeclaration>> = [
            ("a".to_string(), vec![dep("b", "^1.0.0", false)]),
            ("b".to_string(), vec![dep("x", "^1.0.0", false)]),
        ]
        .into_iter()
        .collect();

        let result = resolve(&descriptors, &deps).unwrap();
        assert!(result.blocked["b"].contains("Missing required dependency"));
        assert_eq!(result.load_order, vec!["a"]);
    }

    #[test]
    fn deterministic_order_on_ties() {
        let descriptors: HashMap<String, BundleDescriptor> = [
            ("z".to_string(), descriptor("z", "1.0.0")),
            ("m".to_string(), descriptor("m", "1.0.0")),
            ("a".to_string(), descriptor("a", "1.0.0")),
        ]
        .into_iter()
        .collect();
        let deps: HashMap<String, Vec<DependencyDeclaration>> = HashMap::new();

        let result = resolve(&descriptors, &deps).unwrap();
        assert_eq!(result.load_order, vec!["a", "m", "z"]);
    }
}
