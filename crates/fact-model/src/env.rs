//! Three-scope variable environment
//!
//! Globals persist across activations; RHS locals are rebuilt per
//! activation; test locals are rebuilt per join-test evaluation. The scopes
//! are disjoint maps so a `bind` on a local can never shadow a global.

use crate::Value;
use rustc_hash::FxHashMap;

/// The engine's variable environment.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    globals: FxHashMap<String, Value>,
    locals: FxHashMap<String, Value>,
    test_locals: FxHashMap<String, Value>,
}

impl Environment {
    /// Empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a global variable.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Look up an RHS local variable.
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    /// Look up a join-test local variable.
    pub fn test_local(&self, name: &str) -> Option<&Value> {
        self.test_locals.get(name)
    }

    /// Bind a global variable.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Bind an RHS local variable.
    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    /// Replace the RHS local scope wholesale (one activation's bindings).
    pub fn set_locals(&mut self, locals: FxHashMap<String, Value>) {
        self.locals = locals;
    }

    /// Replace the test-local scope wholesale (one test's bindings).
    pub fn set_test_locals(&mut self, test_locals: FxHashMap<String, Value>) {
        self.test_locals = test_locals;
    }

    /// Names of the currently bound globals.
    pub fn global_names(&self) -> impl Iterator<Item = &String> {
        self.globals.keys()
    }

    /// Drop every global binding.
    pub fn clear_globals(&mut self) {
        self.globals.clear();
    }

    /// Drop every RHS local binding.
    pub fn clear_locals(&mut self) {
        self.locals.clear();
    }

    /// Drop every test-local binding.
    pub fn clear_test_locals(&mut self) {
        self.test_locals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_are_disjoint() {
        let mut env = Environment::new();
        env.set_global("*x*", Value::Int(1));
        env.set_local("x", Value::Int(2));
        env.set_test_locals(FxHashMap::from_iter([("x".to_string(), Value::Int(3))]));

        assert_eq!(env.global("*x*"), Some(&Value::Int(1)));
        assert_eq!(env.local("x"), Some(&Value::Int(2)));
        assert_eq!(env.test_local("x"), Some(&Value::Int(3)));
        assert_eq!(env.global("x"), None);
    }

    #[test]
    fn test_misses_return_none() {
        let env = Environment::new();
        assert!(env.global("*missing*").is_none());
        assert!(env.local("missing").is_none());
        assert!(env.test_local("missing").is_none());
    }

    #[test]
    fn test_clear_globals_clears_the_globals_map() {
        let mut env = Environment::new();
        env.set_global("*x*", Value::Int(1));
        env.clear_globals();
        assert!(env.global("*x*").is_none());
    }
}
