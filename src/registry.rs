//! Cross-suite Export Registry: `nodeId.varName` publication surface.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct NodeExports {
    pub suite_name: String,
    pub file_path: String,
    pub declared_exports: Vec<String>,
    pub variables: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportRegistry {
    nodes: HashMap<String, NodeExports>,
    /// `fullName -> nodeId` flat index for O(1) membership tests.
    flat_index: HashMap<String, String>,
}

/// Restorable snapshot of the whole registry.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    nodes: HashMap<String, NodeExports>,
    flat_index: HashMap<String, String>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a node's namespace. Idempotent; replacing
    /// `exports` preserves already-set variable values.
    pub fn register_node(
        &mut self,
        node_id: &str,
        suite_name: &str,
        exports: &[String],
        file_path: &str,
    ) {
        let entry = self.nodes.entry(node_id.to_string()).or_default();
        entry.suite_name = suite_name.to_string();
        entry.file_path = file_path.to_string();
        entry.declared_exports = exports.to_vec();

        for name in exports {
            self.flat_index
                .insert(format!("{node_id}.{name}"), node_id.to_string());
        }
    }

    /// Write an exported variable, creating the node namespace if
    /// absent. Warns (does not fail) when `name` was not declared.
    pub fn set_exported_variable(&mut self, node_id: &str, name: &str, value: Value) {
        let entry = self.nodes.entry(node_id.to_string()).or_insert_with(|| NodeExports {
            suite_name: node_id.to_string(),
            file_path: String::new(),
            declared_exports: Vec::new(),
            variables: HashMap::new(),
        });

        if !entry.declared_exports.iter().any(|e| e == name) {
            warn!(
                node_id,
                name, "exported variable was not declared in `exports:`"
            );
        }

        entry.variables.insert(name.to_string(), value);
        self.flat_index
            .insert(format!("{node_id}.{name}"), node_id.to_string());
    }

    /// Split `full_name` on the first `.` into `(node_id, rest)` and
    /// look up the value. Returns `None` on malformed input (no dot,
    /// either half empty) or an unknown key.
    pub fn get_exported_variable(&self, full_name: &str) -> Option<&Value> {
        let (node_id, name) = split_first_dot(full_name)?;
        self.nodes.get(node_id)?.variables.get(name)
    }

    /// Exact-key lookup against the flat index — used by the
    /// interpolator before falling back to single-dot splitting.
    pub fn contains_full_name(&self, full_name: &str) -> bool {
        self.flat_index.contains_key(full_name)
    }

    pub fn node_exports(&self, node_id: &str) -> Option<&NodeExports> {
        self.nodes.get(node_id)
    }

    /// Flatten every node's variables into a single `nodeId.varName`
    /// map, for overlaying onto [`crate::store::VariableStore::get_all`].
    pub fn snapshot_variables(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for (node_id, exports) in &self.nodes {
            for (name, value) in &exports.variables {
                out.insert(format!("{node_id}.{name}"), value.clone());
            }
        }
        out
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            nodes: self.nodes.clone(),
            flat_index: self.flat_index.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.nodes = snapshot.nodes;
        self.flat_index = snapshot.flat_index;
    }
}

fn split_first_dot(full_name: &str) -> Option<(&str, &str)> {
    let idx = full_name.find('.')?;
    let (node_id, rest) = full_name.split_at(idx);
    let name = &rest[1..];
    if node_id.is_empty() || name.is_empty() {
        return None;
    }
    Some((node_id, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_then_read_round_trips() {
        let mut registry = ExportRegistry::new();
        registry.register_node("setup", "Setup Suite", &["token".to_string()], "setup.yaml");
        registry.set_exported_variable("setup", "token", json!("abc"));

        assert_eq!(
            registry.get_exported_variable("setup.token"),
            Some(&json!("abc"))
        );
    }

    #[test]
    fn malformed_full_name_returns_none() {
        let registry = ExportRegistry::new();
        assert_eq!(registry.get_exported_variable("no-dot-here"), None);
        assert_eq!(registry.get_exported_variable(".name"), None);
        assert_eq!(registry.get_exported_variable("node."), None);
    }

    #[test]
    fn first_dot_only_is_split_point() {
        let mut registry = ExportRegistry::new();
        registry.register_node("setup", "Setup", &["user.name".to_string()], "");
        registry.set_exported_variable("setup", "user.name", json!("alice"));

        assert_eq!(
            registry.get_exported_variable("setup.user.name"),
            Some(&json!("alice"))
        );
    }

    #[test]
    fn undeclared_export_still_writes() {
        let mut registry = ExportRegistry::new();
        registry.register_node("setup", "Setup", &[], "");
        registry.set_exported_variable("setup", "surprise", json!(1));
        assert_eq!(registry.get_exported_variable("setup.surprise"), Some(&json!(1)));
    }

    #[test]
    fn snapshot_restore_reverts_writes() {
        let mut registry = ExportRegistry::new();
        registry.register_node("setup", "Setup", &["token".to_string()], "");
        registry.set_exported_variable("setup", "token", json!("before"));
        let snap = registry.snapshot();

        registry.set_exported_variable("setup", "token", json!("after"));
        assert_eq!(
            registry.get_exported_variable("setup.token"),
            Some(&json!("after"))
        );

        registry.restore(snap);
        assert_eq!(
            registry.get_exported_variable("setup.token"),
            Some(&json!("before"))
        );
    }
}
