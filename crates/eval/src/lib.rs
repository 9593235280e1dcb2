//! Expression evaluation over the fact-model AST
//!
//! The evaluator resolves variables against the three-scope environment,
//! dispatches function calls through the builtin registry, and is the only
//! component that distinguishes join-test evaluation from RHS evaluation:
//! the mode picks which local scope a single-field variable resolves
//! through. The builder in [`builder`] drives the same evaluator to turn
//! parsed constructs into facts, rules, and global bindings.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod builder;
mod functions;

pub use builder::Builder;
pub use functions::{BuiltinFn, FunctionRegistry};

use fact_model::{
    EngineError, EngineResult, Environment, Expr, FunctionCall, TestCall, Value, VarScope,
    Variable,
};
use rustc_hash::FxHashMap;

/// Which variable scope single-field variables resolve through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalMode {
    /// Join-test evaluation: variables resolve through the test-local scope.
    Test,
    /// RHS / build-time evaluation: variables resolve through the RHS
    /// local scope.
    Rhs,
}

/// Evaluator over [`Expr`] trees.
pub struct Evaluator {
    env: Environment,
    registry: FunctionRegistry,
}

impl Evaluator {
    /// Evaluator with an empty environment and the builtin registry.
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
            registry: FunctionRegistry::with_builtins(),
        }
    }

    /// Shared environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Mutable access to the environment (RHS `bind`, defglobal).
    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Evaluate an expression.
    ///
    /// Literals evaluate to themselves; variables resolve by scope; calls
    /// evaluate their arguments left to right, unwrap bound variables, and
    /// dispatch through the registry.
    pub fn evaluate(&mut self, expr: &Expr, mode: EvalMode) -> EngineResult<Value> {
        match expr {
            Expr::Lit(value) => self.resolve(value, mode),
            Expr::Call(call) => self.call(call, mode),
        }
    }

    /// Resolve a value, following variable scope rules.
    ///
    /// Globals must be bound; a miss is an error. Local misses are
    /// permitted and leave the variable symbolic, which is what lets RHS
    /// fact patterns carry pattern variables until fire time.
    pub fn resolve(&mut self, value: &Value, mode: EvalMode) -> EngineResult<Value> {
        let Value::Var(var) = value else {
            return Ok(value.clone());
        };
        match var.scope {
            VarScope::Global => {
                let content = self.env.global(&var.name).cloned().ok_or_else(|| {
                    EngineError::Evaluate(format!(
                        "the global variable ?{} has not been bound",
                        var.name
                    ))
                })?;
                Ok(Value::Var(Variable {
                    scope: var.scope,
                    name: var.name.clone(),
                    binding: Some(Box::new(content)),
                }))
            }
            VarScope::Local | VarScope::Assigned => {
                let content = match mode {
                    EvalMode::Test => self.env.test_local(&var.name),
                    EvalMode::Rhs => self.env.local(&var.name),
                };
                match content {
                    Some(bound) => Ok(Value::Var(Variable {
                        scope: var.scope,
                        name: var.name.clone(),
                        binding: Some(Box::new(bound.clone())),
                    })),
                    None => Ok(value.clone()),
                }
            }
        }
    }

    fn call(&mut self, call: &FunctionCall, mode: EvalMode) -> EngineResult<Value> {
        let function = self.registry.get(&call.name)?;
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let value = self.evaluate(arg, mode)?;
            // Builtins operate on content, not on variable wrappers.
            args.push(match value.resolved() {
                Some(content) => content.clone(),
                None => value,
            });
        }
        function(&args)
    }

    /// Evaluate a join test under a fresh set of test-local bindings.
    ///
    /// Returns the boolean outcome; a non-boolean result is an error.
    pub fn eval_test(
        &mut self,
        test: &TestCall,
        bindings: &FxHashMap<String, Value>,
    ) -> EngineResult<bool> {
        self.env.set_test_locals(bindings.clone());
        match self.call(&test.call, EvalMode::Test)? {
            Value::Bool(b) => Ok(b),
            other => Err(EngineError::Evaluate(format!(
                "test expression evaluated to the non-boolean value {other}"
            ))),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fact_model::FunctionCall;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(FunctionCall::new(name, args))
    }

    #[test]
    fn test_literals_evaluate_to_themselves() {
        let mut eval = Evaluator::new();
        assert_eq!(
            eval.evaluate(&Expr::lit(Value::Int(3)), EvalMode::Rhs).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_nested_calls() {
        let mut eval = Evaluator::new();
        // (+ 1 (* 2 3))
        let expr = call(
            "+",
            vec![
                Expr::lit(Value::Int(1)),
                call("*", vec![Expr::lit(Value::Int(2)), Expr::lit(Value::Int(3))]),
            ],
        );
        assert_eq!(eval.evaluate(&expr, EvalMode::Rhs).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_unknown_function_is_an_error() {
        let mut eval = Evaluator::new();
        let expr = call("no-such-fn", vec![]);
        assert!(eval.evaluate(&expr, EvalMode::Rhs).is_err());
    }

    #[test]
    fn test_unbound_global_is_an_error() {
        let mut eval = Evaluator::new();
        let expr = Expr::lit(Value::global("*missing*"));
        assert!(eval.evaluate(&expr, EvalMode::Rhs).is_err());
    }

    #[test]
    fn test_bound_global_resolves_to_its_content() {
        let mut eval = Evaluator::new();
        eval.env_mut().set_global("*x*", Value::Int(9));
        let out = eval
            .evaluate(&Expr::lit(Value::global("*x*")), EvalMode::Rhs)
            .unwrap();
        assert_eq!(out.resolved(), Some(&Value::Int(9)));
    }

    #[test]
    fn test_local_miss_stays_symbolic() {
        let mut eval = Evaluator::new();
        let out = eval
            .evaluate(&Expr::lit(Value::local("x")), EvalMode::Rhs)
            .unwrap();
        assert_eq!(out, Value::local("x"));
        assert!(out.resolved().is_none());
    }

    #[test]
    fn test_mode_selects_the_local_scope() {
        let mut eval = Evaluator::new();
        eval.env_mut().set_local("x", Value::Int(1));
        eval.env_mut()
            .set_test_locals(FxHashMap::from_iter([("x".to_string(), Value::Int(2))]));

        let expr = Expr::lit(Value::local("x"));
        let rhs = eval.evaluate(&expr, EvalMode::Rhs).unwrap();
        let test = eval.evaluate(&expr, EvalMode::Test).unwrap();
        assert_eq!(rhs.resolved(), Some(&Value::Int(1)));
        assert_eq!(test.resolved(), Some(&Value::Int(2)));
    }

    #[test]
    fn test_calls_unwrap_bound_variables() {
        let mut eval = Evaluator::new();
        eval.env_mut().set_local("x", Value::Int(4));
        let expr = call("+", vec![Expr::lit(Value::local("x")), Expr::lit(Value::Int(1))]);
        assert_eq!(eval.evaluate(&expr, EvalMode::Rhs).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_eval_test_requires_boolean() {
        let mut eval = Evaluator::new();
        let gt = TestCall::new(FunctionCall::new(
            ">",
            vec![Expr::lit(Value::local("x")), Expr::lit(Value::Int(5))],
        ));
        let mut bindings = FxHashMap::default();
        bindings.insert("x".to_string(), Value::Int(7));
        assert!(eval.eval_test(&gt, &bindings).unwrap());

        bindings.insert("x".to_string(), Value::Int(3));
        assert!(!eval.eval_test(&gt, &bindings).unwrap());

        let plus = TestCall::new(FunctionCall::new(
            "+",
            vec![Expr::lit(Value::Int(1)), Expr::lit(Value::Int(2))],
        ));
        assert!(eval.eval_test(&plus, &bindings).is_err());
    }
}
