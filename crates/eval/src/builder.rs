//! Build facts, rules, and globals from parsed constructs
//!
//! The external parser produces [`Construct`] items; the builder evaluates
//! the expression-valued parts (defglobal assignments, deffacts fields,
//! salience declarations, LHS pattern fields) and assembles the compiled
//! [`Rule`] form the network consumes. Pattern variables stay symbolic —
//! they are bound by matching, not here.

use crate::{EvalMode, Evaluator};
use fact_model::{
    Construct, EngineError, EngineResult, Fact, FactTemplate, LhsItem, Pattern, PatternCe, Rule,
    RuleDef, TestCall, Value,
};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Builds the working-memory and production-memory inputs from parsed
/// constructs, accumulating global bindings in its evaluator.
pub struct Builder {
    evaluator: Evaluator,
}

impl Builder {
    /// Builder with a fresh evaluator.
    pub fn new() -> Self {
        Self {
            evaluator: Evaluator::new(),
        }
    }

    /// The evaluator, with whatever globals have been defined so far.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Mutable access to the evaluator.
    pub fn evaluator_mut(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }

    /// Hand the evaluator over to the network once building is done.
    pub fn into_evaluator(self) -> Evaluator {
        self.evaluator
    }

    /// Clear the transient scopes, keeping globals.
    pub fn reset(&mut self) {
        self.evaluator.env_mut().clear_locals();
        self.evaluator.env_mut().clear_test_locals();
    }

    /// Process a sequence of top-level constructs.
    ///
    /// Defglobal assignments bind globals immediately; deffacts and
    /// defrule items are evaluated and returned for the caller to assert
    /// and compile.
    pub fn build(&mut self, constructs: &[Construct]) -> EngineResult<(Vec<Fact>, Vec<Rule>)> {
        let mut facts = Vec::new();
        let mut rules = Vec::new();

        for construct in constructs {
            match construct {
                Construct::Defglobal { assignments } => {
                    for (name, expr) in assignments {
                        debug!(name = %name, "defining defglobal");
                        let value = self.evaluate_content(expr)?;
                        self.evaluator.env_mut().set_global(name.clone(), value);
                    }
                }
                Construct::Deffacts { name, facts: templates } => {
                    debug!(name = %name, "defining deffacts");
                    for template in templates {
                        facts.push(self.build_fact(template)?);
                    }
                }
                Construct::Defrule(def) => {
                    debug!(name = %def.name, "defining defrule");
                    rules.push(self.build_rule(def)?);
                }
            }
        }

        Ok((facts, rules))
    }

    /// Materialize one fact template by evaluating its fields.
    pub fn build_fact(&mut self, template: &FactTemplate) -> EngineResult<Fact> {
        let mut values = Vec::with_capacity(template.fields.len());
        for field in &template.fields {
            values.push(self.evaluate_content(field)?);
        }
        Ok(Fact::new(template.head.clone(), values))
    }

    fn build_rule(&mut self, def: &RuleDef) -> EngineResult<Rule> {
        let salience = match &def.salience {
            None => 0,
            Some(expr) => match self.evaluate_content(expr)? {
                Value::Int(n) => n,
                other => {
                    return Err(EngineError::Evaluate(format!(
                        "salience must be an integer, got {other}"
                    )))
                }
            },
        };

        let mut rule = Rule {
            name: def.name.clone(),
            salience,
            lhs: Vec::new(),
            rhs: def.rhs.clone(),
            tests: Vec::new(),
            tests_by_var: FxHashMap::default(),
            complexity: 0,
        };

        for item in &def.lhs {
            match item {
                LhsItem::Test(call) => {
                    let test = TestCall::new(call.clone());
                    let index = rule.tests.len();
                    for variable in &test.variables {
                        rule.tests_by_var
                            .entry(variable.clone())
                            .or_default()
                            .insert(index);
                    }
                    rule.tests.push(test);
                }
                LhsItem::Pattern {
                    binding,
                    head,
                    fields,
                } => {
                    let mut evaluated = Vec::with_capacity(fields.len());
                    for field in fields {
                        // Bound globals resolve here; pattern variables
                        // stay symbolic until matching binds them.
                        evaluated.push(self.evaluator.evaluate(field, EvalMode::Rhs)?);
                    }
                    rule.lhs.push(PatternCe {
                        binding: binding.clone(),
                        pattern: Pattern::new(head.clone(), evaluated),
                    });
                }
            }
        }

        rule.evaluate_complexity();
        Ok(rule)
    }

    /// Evaluate an expression and unwrap a bound variable to its content.
    fn evaluate_content(&mut self, expr: &fact_model::Expr) -> EngineResult<Value> {
        let value = self.evaluator.evaluate(expr, EvalMode::Rhs)?;
        Ok(match value.resolved() {
            Some(content) => content.clone(),
            None => value,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fact_model::{Expr, FunctionCall};

    fn lit(v: Value) -> Expr {
        Expr::Lit(v)
    }

    #[test]
    fn test_defglobal_binds_evaluated_value() {
        let mut builder = Builder::new();
        let constructs = [Construct::Defglobal {
            assignments: vec![(
                "*two*".to_string(),
                Expr::Call(FunctionCall::new(
                    "+",
                    vec![lit(Value::Int(1)), lit(Value::Int(1))],
                )),
            )],
        }];
        builder.build(&constructs).unwrap();
        assert_eq!(
            builder.evaluator().env().global("*two*"),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn test_deffacts_fields_are_evaluated() {
        let mut builder = Builder::new();
        let constructs = [Construct::Deffacts {
            name: "init".to_string(),
            facts: vec![FactTemplate::new(
                "speed",
                vec![Expr::Call(FunctionCall::new(
                    "*",
                    vec![lit(Value::Int(30)), lit(Value::Int(3))],
                ))],
            )],
        }];
        let (facts, rules) = builder.build(&constructs).unwrap();
        assert!(rules.is_empty());
        assert_eq!(facts, vec![Fact::new("speed", vec![Value::Int(90)])]);
    }

    #[test]
    fn test_defrule_collects_tests_and_salience() {
        let mut builder = Builder::new();
        let def = RuleDef {
            name: "r".to_string(),
            salience: Some(lit(Value::Int(10))),
            lhs: vec![
                LhsItem::Pattern {
                    binding: None,
                    head: "p".to_string(),
                    fields: vec![lit(Value::local("x"))],
                },
                LhsItem::Test(FunctionCall::new(
                    ">",
                    vec![lit(Value::local("x")), lit(Value::Int(5))],
                )),
            ],
            rhs: vec![],
        };
        let (_, rules) = builder.build(&[Construct::Defrule(def)]).unwrap();
        let rule = &rules[0];
        assert_eq!(rule.salience, 10);
        assert_eq!(rule.lhs.len(), 1);
        assert_eq!(rule.tests.len(), 1);
        assert!(rule.tests_by_var.contains_key("x"));
        // 1 pattern + 1 test variable + 1 call + 1 call argument is counted
        // for the comparison itself
        assert_eq!(rule.complexity, 4);
    }

    #[test]
    fn test_assigned_pattern_binding_is_kept() {
        let mut builder = Builder::new();
        let def = RuleDef {
            name: "r".to_string(),
            salience: None,
            lhs: vec![LhsItem::Pattern {
                binding: Some("f".to_string()),
                head: "a".to_string(),
                fields: vec![lit(Value::local("x"))],
            }],
            rhs: vec![],
        };
        let (_, rules) = builder.build(&[Construct::Defrule(def)]).unwrap();
        assert_eq!(rules[0].lhs[0].binding.as_deref(), Some("f"));
    }

    #[test]
    fn test_non_integer_salience_is_rejected() {
        let mut builder = Builder::new();
        let def = RuleDef {
            name: "r".to_string(),
            salience: Some(lit(Value::symbol("high"))),
            lhs: vec![],
            rhs: vec![],
        };
        assert!(builder.build(&[Construct::Defrule(def)]).is_err());
    }
}
