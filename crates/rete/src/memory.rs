//! Working memory and production memory

use fact_model::{EngineError, EngineResult, Fact, Rule, Value, Wme};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fmt;

/// The fact store: WMEs indexed by a monotonically allocated id.
///
/// No two extant WMEs carry equal facts; re-asserting an existing fact is
/// silently ignored. Ids start at 1 and are never reused.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    wmes: BTreeMap<u64, Wme>,
    facts: FxHashSet<Fact>,
    counter: u64,
}

impl WorkingMemory {
    /// Empty working memory.
    pub fn new() -> Self {
        Self {
            wmes: BTreeMap::new(),
            facts: FxHashSet::default(),
            counter: 1,
        }
    }

    /// Add a fact, resolving any bound variables in its values first.
    ///
    /// Returns `Ok(None)` for a structural duplicate. A still-unresolved
    /// variable among the values is an evaluation error.
    pub fn add_fact(&mut self, fact: Fact) -> EngineResult<Option<&Wme>> {
        let mut values = Vec::with_capacity(fact.values.len());
        for value in &fact.values {
            match value {
                Value::Var(var) => match &var.binding {
                    Some(content) => values.push((**content).clone()),
                    None => {
                        return Err(EngineError::Evaluate(format!(
                            "the fact \"{}\" contains a null variable",
                            fact.head
                        )))
                    }
                },
                other => values.push(other.clone()),
            }
        }
        let fact = Fact::new(fact.head, values);

        if self.facts.contains(&fact) {
            return Ok(None);
        }
        let id = self.counter;
        self.counter += 1;
        self.facts.insert(fact.clone());
        self.wmes.insert(id, Wme::new(id, fact));
        Ok(self.wmes.get(&id))
    }

    /// Remove a fact by id; returns whether a removal happened.
    pub fn remove_fact(&mut self, id: u64) -> bool {
        match self.wmes.remove(&id) {
            Some(wme) => {
                self.facts.remove(&wme.fact);
                true
            }
            None => false,
        }
    }

    /// Whether a WME with this id exists.
    pub fn contains(&self, id: u64) -> bool {
        self.wmes.contains_key(&id)
    }

    /// Look up a WME by id.
    pub fn get(&self, id: u64) -> Option<&Wme> {
        self.wmes.get(&id)
    }

    /// WMEs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Wme> {
        self.wmes.values()
    }

    /// Number of extant WMEs.
    pub fn len(&self) -> usize {
        self.wmes.len()
    }

    /// True when no facts are stored.
    pub fn is_empty(&self) -> bool {
        self.wmes.is_empty()
    }
}

impl fmt::Display for WorkingMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wmes.is_empty() {
            return write!(f, "Empty Working Memory.");
        }
        for wme in self.wmes.values() {
            writeln!(f, "f-{} {}", wme.id, wme.fact)?;
        }
        let n = self.wmes.len();
        write!(
            f,
            "for a total of {n} fact{}.",
            if n == 1 { "" } else { "s" }
        )
    }
}

/// The rule store: name to rule, insertion-ordered.
#[derive(Debug, Default)]
pub struct ProductionMemory {
    rules: IndexMap<String, Rule>,
}

impl ProductionMemory {
    /// Empty production memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule, silently replacing a same-named one.
    ///
    /// Returns `true` when the name was new.
    pub fn add_rule(&mut self, rule: Rule) -> bool {
        self.rules.insert(rule.name.clone(), rule).is_none()
    }

    /// Delete a rule by name; returns whether a removal happened.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        self.rules.shift_remove(name).is_some()
    }

    /// Look up a rule by name.
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// Rules in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    /// Number of stored rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are stored.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Display for ProductionMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rules.is_empty() {
            return writeln!(f, "Empty Production Memory.");
        }
        for name in self.rules.keys() {
            writeln!(f, "{name}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fact_model::{Value, VarScope, Variable};

    fn fact(head: &str, values: Vec<Value>) -> Fact {
        Fact::new(head, values)
    }

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let mut wm = WorkingMemory::new();
        let a = wm.add_fact(fact("a", vec![])).unwrap().unwrap().id;
        let b = wm.add_fact(fact("b", vec![])).unwrap().unwrap().id;
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn test_duplicates_are_suppressed() {
        let mut wm = WorkingMemory::new();
        assert!(wm.add_fact(fact("a", vec![Value::Int(1)])).unwrap().is_some());
        assert!(wm.add_fact(fact("a", vec![Value::Int(1)])).unwrap().is_none());
        assert_eq!(wm.len(), 1);
    }

    #[test]
    fn test_removed_fact_can_be_reasserted_under_a_new_id() {
        let mut wm = WorkingMemory::new();
        wm.add_fact(fact("a", vec![Value::Int(1)])).unwrap();
        assert!(wm.remove_fact(1));
        assert!(!wm.remove_fact(1));
        let wme = wm.add_fact(fact("a", vec![Value::Int(1)])).unwrap().unwrap();
        assert_eq!(wme.id, 2);
    }

    #[test]
    fn test_bound_variables_are_coerced() {
        let mut wm = WorkingMemory::new();
        let bound = Value::Var(Variable {
            scope: VarScope::Local,
            name: "x".into(),
            binding: Some(Box::new(Value::Int(9))),
        });
        let wme = wm.add_fact(fact("a", vec![bound])).unwrap().unwrap();
        assert_eq!(wme.fact.values, vec![Value::Int(9)]);
    }

    #[test]
    fn test_unbound_variable_is_rejected() {
        let mut wm = WorkingMemory::new();
        let err = wm.add_fact(fact("a", vec![Value::local("x")]));
        assert!(err.is_err());
        assert!(wm.is_empty());
    }

    #[test]
    fn test_iteration_is_in_ascending_id_order() {
        let mut wm = WorkingMemory::new();
        for i in 0..5 {
            wm.add_fact(fact("n", vec![Value::Int(i)])).unwrap();
        }
        let ids: Vec<u64> = wm.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    fn empty_rule(name: &str) -> Rule {
        Rule {
            name: name.into(),
            salience: 0,
            lhs: vec![],
            rhs: vec![],
            tests: vec![],
            tests_by_var: Default::default(),
            complexity: 0,
        }
    }

    #[test]
    fn test_add_rule_replaces_on_name_collision() {
        let mut pm = ProductionMemory::new();
        assert!(pm.add_rule(empty_rule("r")));
        let mut replacement = empty_rule("r");
        replacement.salience = 5;
        assert!(!pm.add_rule(replacement));
        assert_eq!(pm.len(), 1);
        assert_eq!(pm.get("r").unwrap().salience, 5);
    }

    #[test]
    fn test_remove_rule_by_name() {
        let mut pm = ProductionMemory::new();
        pm.add_rule(empty_rule("r"));
        assert!(pm.remove_rule("r"));
        assert!(!pm.remove_rule("r"));
        assert!(pm.is_empty());
    }
}
