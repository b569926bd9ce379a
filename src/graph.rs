//! Dependency graph: adjacency, cycle detection, topological ordering.

use crate::model::{Priority, Suite};
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Executing,
    Resolved,
}

struct GraphNode {
    node_id: String,
    priority: Priority,
    declaration_index: usize,
    /// indices of nodes this node depends on (must run before it)
    depends_on: Vec<usize>,
    state: NodeState,
}

pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index_of: HashMap<String, usize>,
    /// opt-in cache of prior successful results, keyed by node_id
    result_cache: HashMap<String, serde_json::Value>,
}

impl DependencyGraph {
    /// Build the graph from discovered suites. Dependencies resolve by
    /// exact `node_id` first, else by substring match against
    /// `file_path` (either direction) or filename-stem match.
    /// Unresolved dependencies warn and are dropped.
    pub fn build(suites: &[Suite]) -> Self {
        let mut index_of = HashMap::new();
        for (i, suite) in suites.iter().enumerate() {
            index_of.insert(suite.node_id.clone(), i);
        }

        let mut nodes: Vec<GraphNode> = suites
            .iter()
            .enumerate()
            .map(|(i, suite)| GraphNode {
                node_id: suite.node_id.clone(),
                priority: suite.priority,
                declaration_index: i,
                depends_on: Vec::new(),
                state: NodeState::Pending,
            })
            .collect();

        for (i, suite) in suites.iter().enumerate() {
            for dep in &suite.depends {
                match resolve_dependency(dep, suites, &index_of) {
                    Some(target) => nodes[i].depends_on.push(target),
                    None => {
                        warn!(
                            node_id = %suite.node_id,
                            dependency = ?dep.node_id.clone().or_else(|| dep.path.clone()),
                            "dependency could not be resolved, dropping edge"
                        );
                    }
                }
            }
        }

        DependencyGraph {
            nodes,
            index_of,
            result_cache: HashMap::new(),
        }
    }

    pub fn node_state(&self, node_id: &str) -> Option<NodeState> {
        self.index_of.get(node_id).map(|&i| self.nodes[i].state)
    }

    pub fn set_state(&mut self, node_id: &str, state: NodeState) {
        if let Some(&i) = self.index_of.get(node_id) {
            self.nodes[i].state = state;
        }
    }

    pub fn can_execute(&self, node_id: &str) -> bool {
        let Some(&i) = self.index_of.get(node_id) else {
            return false;
        };
        self.nodes[i]
            .depends_on
            .iter()
            .all(|&dep| self.nodes[dep].state == NodeState::Resolved)
    }

    pub fn dependency_node_ids(&self, node_id: &str) -> Vec<String> {
        let Some(&i) = self.index_of.get(node_id) else {
            return Vec::new();
        };
        self.nodes[i]
            .depends_on
            .iter()
            .map(|&dep| self.nodes[dep].node_id.clone())
            .collect()
    }

    pub fn cache_result(&mut self, node_id: &str, result: serde_json::Value) {
        self.result_cache.insert(node_id.to_string(), result);
    }

    pub fn cached_result(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.result_cache.get(node_id)
    }

    /// DFS-with-recursion-stack cycle detection. Returns every cycle
    /// found, each rendered as a `→`-joined path of node ids.
    pub fn detect_cycles(&self) -> Vec<String> {
        let n = self.nodes.len();
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];
        let mut stack_path: Vec<usize> = Vec::new();
        let mut cycles = Vec::new();

        fn visit(
            i: usize,
            nodes: &[GraphNode],
            visited: &mut [bool],
            on_stack: &mut [bool],
            stack_path: &mut Vec<usize>,
            cycles: &mut Vec<String>,
        ) {
            visited[i] = true;
            on_stack[i] = true;
            stack_path.push(i);

            for &dep in &nodes[i].depends_on {
                if on_stack[dep] {
                    let start = stack_path.iter().position(|&x| x == dep).unwrap();
                    let mut path: Vec<&str> = stack_path[start..]
                        .iter()
                        .map(|&x| nodes[x].node_id.as_str())
                        .collect();
                    path.push(nodes[dep].node_id.as_str());
                    cycles.push(path.join(" → "));
                } else if !visited[dep] {
                    visit(dep, nodes, visited, on_stack, stack_path, cycles);
                }
            }

            stack_path.pop();
            on_stack[i] = false;
        }

        for i in 0..n {
            if !visited[i] {
                visit(i, &self.nodes, &mut visited, &mut on_stack, &mut stack_path, &mut cycles);
            }
        }

        cycles
    }

    /// Deterministic topological order (Kahn's algorithm over
    /// "must run before" edges), ties broken by the configured
    /// priority order (earlier in `priority_order` runs first) then
    /// declaration order.
    pub fn topological_order(&self, priority_order: &[Priority]) -> Vec<String> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, node) in self.nodes.iter().enumerate() {
            for &dep in &node.depends_on {
                dependents[dep].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready_set: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while !ready_set.is_empty() {
            sort_ready(&mut ready_set, &self.nodes, priority_order);
            let i = ready_set.remove(0);
            order.push(self.nodes[i].node_id.clone());

            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready_set.push(next);
                }
            }
        }

        order
    }
}

/// Rank of a priority within the configured order; priorities absent
/// from `priority_order` sort last, after every configured level.
fn priority_rank(priority: Priority, priority_order: &[Priority]) -> usize {
    priority_order
        .iter()
        .position(|&p| p == priority)
        .unwrap_or(priority_order.len())
}

fn sort_ready(ready: &mut [usize], nodes: &[GraphNode], priority_order: &[Priority]) {
    ready.sort_by(|&a, &b| {
        priority_rank(nodes[a].priority, priority_order)
            .cmp(&priority_rank(nodes[b].priority, priority_order))
            .then_with(|| nodes[a].declaration_index.cmp(&nodes[b].declaration_index))
    });
}

fn resolve_dependency(
    dep: &crate::model::DependencyEntry,
    suites: &[Suite],
    index_of: &HashMap<String, usize>,
) -> Option<usize> {
    if let Some(node_id) = &dep.node_id {
        if let Some(&i) = index_of.get(node_id) {
            return Some(i);
        }
    }

    if let Some(path) = &dep.path {
        let stem = std::path::Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path);

        for (i, suite) in suites.iter().enumerate() {
            let file_path = suite.file_path.to_string_lossy();
            if file_path.contains(path.as_str()) || path.contains(file_path.as_ref()) {
                return Some(i);
            }
            if let Some(suite_stem) = suite.file_path.file_stem().and_then(|s| s.to_str()) {
                if suite_stem == stem {
                    return Some(i);
                }
            }
        }
    }

    None
}

/// Join multiple cycle paths into a single error message naming all of
/// them, per the "abort before execution with a single error" contract.
pub fn format_cycle_error(cycles: &[String]) -> String {
    cycles.join("; ")
}

/// Detect unresolved node ids referenced in logs only — used by tests
/// to assert the warning path without needing a tracing subscriber.
pub fn unresolved_dependencies(graph: &DependencyGraph) -> HashSet<String> {
    graph
        .nodes
        .iter()
        .filter(|n| n.depends_on.is_empty())
        .map(|n| n.node_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyEntry, Priority, SuiteMetadata};
    use std::collections::HashMap as Map;
    use std::path::PathBuf;

    fn suite(node_id: &str, depends_on: &[&str], priority: Priority) -> Suite {
        Suite {
            node_id: node_id.to_string(),
            suite_name: node_id.to_string(),
            metadata: SuiteMetadata::default(),
            variables: Map::new(),
            exports: vec![],
            depends: depends_on
                .iter()
                .map(|d| DependencyEntry {
                    node_id: Some(d.to_string()),
                    path: None,
                })
                .collect(),
            steps: vec![],
            file_path: PathBuf::new(),
            priority,
            estimated_duration_ms: 0,
        }
    }

    #[test]
    fn dependencies_precede_dependents_in_topological_order() {
        let suites = vec![
            suite("api", &["setup"], Priority::Medium),
            suite("setup", &[], Priority::Medium),
        ];
        let graph = DependencyGraph::build(&suites);
        assert!(graph.detect_cycles().is_empty());

        let order = graph.topological_order(&default_levels());
        let setup_pos = order.iter().position(|n| n == "setup").unwrap();
        let api_pos = order.iter().position(|n| n == "api").unwrap();
        assert!(setup_pos < api_pos);
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let suites = vec![
            suite("a", &["b"], Priority::Medium),
            suite("b", &["a"], Priority::Medium),
        ];
        let graph = DependencyGraph::build(&suites);
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].contains("a") && cycles[0].contains("b"));
    }

    #[test]
    fn missing_dependency_is_dropped_not_fatal() {
        let suites = vec![suite("x", &["ghost"], Priority::Medium)];
        let graph = DependencyGraph::build(&suites);
        assert!(graph.detect_cycles().is_empty());
        assert!(graph.can_execute("x"));
    }

    #[test]
    fn priority_breaks_ties_in_declaration_order() {
        let suites = vec![
            suite("low_prio", &[], Priority::Low),
            suite("critical_prio", &[], Priority::Critical),
        ];
        let graph = DependencyGraph::build(&suites);
        let order = graph.topological_order(&default_levels());
        assert_eq!(order[0], "critical_prio");
    }

    #[test]
    fn configured_priority_order_overrides_enum_default_order() {
        let suites = vec![
            suite("low_prio", &[], Priority::Low),
            suite("critical_prio", &[], Priority::Critical),
        ];
        let graph = DependencyGraph::build(&suites);
        // Reversed from the enum's natural/default order: low before critical.
        let reversed = vec![Priority::Low, Priority::Medium, Priority::High, Priority::Critical];
        let order = graph.topological_order(&reversed);
        assert_eq!(order[0], "low_prio");
    }

    #[test]
    fn priority_absent_from_configured_order_sorts_last() {
        let suites = vec![
            suite("medium_prio", &[], Priority::Medium),
            suite("critical_prio", &[], Priority::Critical),
        ];
        let graph = DependencyGraph::build(&suites);
        // Configured order omits Critical entirely; it should still
        // schedule, just after every named level.
        let partial = vec![Priority::Medium, Priority::Low, Priority::High];
        let order = graph.topological_order(&partial);
        assert_eq!(order[0], "medium_prio");
        assert_eq!(order[1], "critical_prio");
    }

    fn default_levels() -> Vec<Priority> {
        vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
    }
}
