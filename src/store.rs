//! Four-scope hierarchical variable store.
//!
//! Scopes are consulted most-specific first: runtime, suite, global,
//! environment. `runtime` and `suite` are cleared between suites;
//! `global` and `environment` persist for the whole run.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Environment,
    Global,
    Suite,
    Runtime,
}

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    environment: HashMap<String, Value>,
    global: HashMap<String, Value>,
    suite: HashMap<String, Value>,
    runtime: HashMap<String, Value>,
}

/// A deep-cloned copy of all four scopes, restorable with [`VariableStore::restore`].
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    environment: HashMap<String, Value>,
    global: HashMap<String, Value>,
    suite: HashMap<String, Value>,
    runtime: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_for(&self, scope: Scope) -> &HashMap<String, Value> {
        match scope {
            Scope::Environment => &self.environment,
            Scope::Global => &self.global,
            Scope::Suite => &self.suite,
            Scope::Runtime => &self.runtime,
        }
    }

    fn map_for_mut(&mut self, scope: Scope) -> &mut HashMap<String, Value> {
        match scope {
            Scope::Environment => &mut self.environment,
            Scope::Global => &mut self.global,
            Scope::Suite => &mut self.suite,
            Scope::Runtime => &mut self.runtime,
        }
    }

    pub fn set(&mut self, scope: Scope, name: impl Into<String>, value: Value) {
        self.map_for_mut(scope).insert(name.into(), value);
    }

    pub fn set_many(&mut self, scope: Scope, values: HashMap<String, Value>) {
        self.map_for_mut(scope).extend(values);
    }

    /// First hit in runtime → suite → global → environment order.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.runtime
            .get(name)
            .or_else(|| self.suite.get(name))
            .or_else(|| self.global.get(name))
            .or_else(|| self.environment.get(name))
    }

    pub fn get_in(&self, scope: Scope, name: &str) -> Option<&Value> {
        self.map_for(scope).get(name)
    }

    /// Merge all four scopes, reverse-precedence (environment first, so
    /// later scopes win), into a single flat map. Does not include the
    /// Export Registry overlay — callers needing that should merge
    /// [`crate::registry::ExportRegistry::snapshot_variables`] on top.
    pub fn get_all(&self) -> HashMap<String, Value> {
        let mut merged = HashMap::new();
        merged.extend(self.environment.clone());
        merged.extend(self.global.clone());
        merged.extend(self.suite.clone());
        merged.extend(self.runtime.clone());
        merged
    }

    /// Clear runtime and suite scopes; global and environment persist.
    pub fn clear_suite_scopes(&mut self) {
        self.suite.clear();
        self.runtime.clear();
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            environment: self.environment.clone(),
            global: self.global.clone(),
            suite: self.suite.clone(),
            runtime: self.runtime.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.environment = snapshot.environment;
        self.global = snapshot.global;
        self.suite = snapshot.suite;
        self.runtime = snapshot.runtime;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_precedence_favors_most_specific_scope() {
        let mut store = VariableStore::new();
        store.set(Scope::Environment, "name", json!("env"));
        store.set(Scope::Global, "name", json!("global"));
        assert_eq!(store.get("name"), Some(&json!("global")));

        store.set(Scope::Suite, "name", json!("suite"));
        assert_eq!(store.get("name"), Some(&json!("suite")));

        store.set(Scope::Runtime, "name", json!("runtime"));
        assert_eq!(store.get("name"), Some(&json!("runtime")));
    }

    #[test]
    fn clearing_suite_scopes_preserves_global_and_environment() {
        let mut store = VariableStore::new();
        store.set(Scope::Environment, "a", json!(1));
        store.set(Scope::Global, "b", json!(2));
        store.set(Scope::Suite, "c", json!(3));
        store.set(Scope::Runtime, "d", json!(4));

        store.clear_suite_scopes();

        assert_eq!(store.get("a"), Some(&json!(1)));
        assert_eq!(store.get("b"), Some(&json!(2)));
        assert_eq!(store.get("c"), None);
        assert_eq!(store.get("d"), None);
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut store = VariableStore::new();
        store.set(Scope::Runtime, "x", json!(1));
        let snapshot = store.snapshot();

        store.set(Scope::Runtime, "x", json!(2));
        assert_eq!(store.get("x"), Some(&json!(2)));

        store.restore(snapshot);
        assert_eq!(store.get("x"), Some(&json!(1)));
    }
}
