//! Rules, patterns, join tests, RHS actions, and parser constructs
//!
//! The external parser hands the engine a sequence of [`Construct`] items.
//! The builder in the `eval` crate turns those into [`Rule`] values whose
//! pattern fields are already evaluated down to [`Value`]s, leaving only
//! variables symbolic. Everything matching-related in the `rete` crate
//! consumes the compiled form.

use crate::{Value, Variable};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// An expression tree: a literal value or a function call.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A literal value, possibly a variable reference.
    Lit(Value),
    /// A call into the function registry.
    Call(FunctionCall),
}

impl Expr {
    /// Shorthand for a literal expression.
    pub fn lit(v: Value) -> Self {
        Expr::Lit(v)
    }
}

/// A named function application over expression arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    /// Function or predicate name as written in the source dialect.
    pub name: String,
    /// Argument expressions, evaluated left to right.
    pub args: Vec<Expr>,
}

impl FunctionCall {
    /// Build a call node.
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// A join-time test: a boolean expression plus the set of variables it
/// references, collected recursively through nested calls.
///
/// The variable set decides which join node the test is claimed by; the
/// test runs at the earliest join where all of its variables are bound.
#[derive(Clone, Debug)]
pub struct TestCall {
    /// The boolean expression.
    pub call: FunctionCall,
    /// Names of every variable the expression mentions.
    pub variables: FxHashSet<String>,
}

impl TestCall {
    /// Wrap a call and collect its referenced variables.
    pub fn new(call: FunctionCall) -> Self {
        let mut variables = FxHashSet::default();
        collect_variables(&call.args, &mut variables);
        Self { call, variables }
    }
}

fn collect_variables(args: &[Expr], out: &mut FxHashSet<String>) {
    for arg in args {
        match arg {
            Expr::Lit(Value::Var(v)) => {
                out.insert(v.name.clone());
            }
            Expr::Call(c) => collect_variables(&c.args, out),
            Expr::Lit(_) => {}
        }
    }
}

/// A compiled LHS pattern: head symbol plus constant-or-variable fields.
///
/// The `Display` rendering is canonical; the network caches alpha memories
/// under it.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    /// Head symbol.
    pub head: String,
    /// Ordered fields, constants or variables.
    pub fields: Vec<Value>,
}

impl Pattern {
    /// Build a pattern.
    pub fn new(head: impl Into<String>, fields: Vec<Value>) -> Self {
        Self {
            head: head.into(),
            fields,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.head)?;
        for v in &self.fields {
            write!(f, " {v}")?;
        }
        write!(f, ")")
    }
}

/// A pattern conditional element, optionally assigned to a variable
/// (`?f <- (pattern ...)`) that will carry the matched WME id.
#[derive(Clone, Debug)]
pub struct PatternCe {
    /// Assigned-pattern variable name, when present.
    pub binding: Option<String>,
    /// The wrapped pattern.
    pub pattern: Pattern,
}

/// A fact pattern on the RHS, materialized into an ordered fact at fire
/// time once the activation's bindings are in scope.
#[derive(Clone, Debug, PartialEq)]
pub struct FactTemplate {
    /// Head symbol.
    pub head: String,
    /// Field expressions.
    pub fields: Vec<Expr>,
}

impl FactTemplate {
    /// Build a template.
    pub fn new(head: impl Into<String>, fields: Vec<Expr>) -> Self {
        Self {
            head: head.into(),
            fields,
        }
    }
}

/// A right-hand-side action.
///
/// Actions run with the network as callee, so `assert` and `retract`
/// re-enter matching while a recognize-act cycle is in progress.
#[derive(Clone, Debug)]
pub enum Action {
    /// Materialize and assert each fact template.
    Assert(Vec<FactTemplate>),
    /// Retract the facts whose ids the expressions evaluate to.
    Retract(Vec<Expr>),
    /// Bind a local or global variable to the evaluated value.
    Bind {
        /// Target variable; its scope picks the environment map.
        var: Variable,
        /// Value expression.
        value: Expr,
    },
    /// Write the evaluated arguments to the output sink.
    Printout(Vec<Expr>),
    /// Evaluate a boolean expression for its value.
    Test(Expr),
    /// Switch the agenda's conflict-resolution strategy by name.
    Strategy(String),
}

/// A compiled production rule.
#[derive(Clone, Debug)]
pub struct Rule {
    /// Unique rule name; production memory replaces on collision.
    pub name: String,
    /// Priority; higher fires first. Defaults to 0.
    pub salience: i64,
    /// Ordered pattern conditional elements (tests are held separately).
    pub lhs: Vec<PatternCe>,
    /// Ordered RHS actions.
    pub rhs: Vec<Action>,
    /// Join-time tests in source order.
    pub tests: Vec<TestCall>,
    /// Variable name to the indices (into `tests`) of the tests that
    /// mention it. Consumed by the beta build to place each test.
    pub tests_by_var: FxHashMap<String, FxHashSet<usize>>,
    /// Precomputed conflict-resolution complexity.
    pub complexity: u32,
}

impl Rule {
    /// Recompute the rule's complexity term.
    ///
    /// One point per pattern, one per distinct test variable, and per test
    /// one point for each structural call plus one per call-valued
    /// argument; `and`/`or`/`not` wrappers are skipped, not counted.
    pub fn evaluate_complexity(&mut self) {
        let mut complexity = (self.lhs.len() + self.tests_by_var.len()) as u32;
        for test in &self.tests {
            let args = [Expr::Call(test.call.clone())];
            walk_complexity(&args, &mut complexity);
        }
        self.complexity = complexity;
    }
}

fn walk_complexity(args: &[Expr], acc: &mut u32) {
    match args.first() {
        Some(Expr::Call(c)) if matches!(c.name.as_str(), "and" | "or" | "not") => {
            walk_complexity(&c.args, acc);
        }
        _ => {
            *acc += 1;
            for arg in args {
                if matches!(arg, Expr::Call(_)) {
                    *acc += 1;
                }
            }
        }
    }
}

/// One element of a defrule left-hand side, as parsed.
#[derive(Clone, Debug)]
pub enum LhsItem {
    /// A pattern, optionally assigned to a variable.
    Pattern {
        /// Assigned-pattern variable name, when present.
        binding: Option<String>,
        /// Head symbol.
        head: String,
        /// Field expressions; evaluated at build time.
        fields: Vec<Expr>,
    },
    /// A `(test ...)` conditional element.
    Test(FunctionCall),
}

/// A defrule as parsed, before building.
#[derive(Clone, Debug)]
pub struct RuleDef {
    /// Rule name.
    pub name: String,
    /// Salience expression from `(declare (salience ...))`, if present.
    pub salience: Option<Expr>,
    /// LHS items in source order.
    pub lhs: Vec<LhsItem>,
    /// RHS actions in source order.
    pub rhs: Vec<Action>,
}

/// A top-level item produced by the external parser.
#[derive(Clone, Debug)]
pub enum Construct {
    /// `(defglobal ?*name* = expr ...)`
    Defglobal {
        /// Name/expression assignment pairs; names keep their asterisks.
        assignments: Vec<(String, Expr)>,
    },
    /// `(deffacts name (fact ...) ...)`
    Deffacts {
        /// Group name.
        name: String,
        /// Fact patterns to materialize on reset.
        facts: Vec<FactTemplate>,
    },
    /// `(defrule ...)`
    Defrule(RuleDef),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Lit(Value::local(name))
    }

    #[test]
    fn test_collects_variables_through_nested_calls() {
        let call = FunctionCall::new(
            ">",
            vec![
                var("x"),
                Expr::Call(FunctionCall::new("+", vec![var("y"), Expr::lit(Value::Int(1))])),
            ],
        );
        let test = TestCall::new(call);
        assert!(test.variables.contains("x"));
        assert!(test.variables.contains("y"));
        assert_eq!(test.variables.len(), 2);
    }

    #[test]
    fn test_pattern_rendering_is_canonical() {
        let p = Pattern::new("speed", vec![Value::local("x"), Value::Int(90)]);
        assert_eq!(p.to_string(), "(speed ?x 90)");
    }

    #[test]
    fn test_complexity_counts_patterns_and_tests() {
        // (defrule r (p ?x) (q ?y) (test (> ?x ?y)) => ...)
        let gt = FunctionCall::new(">", vec![var("x"), var("y")]);
        let test = TestCall::new(gt);
        let mut tests_by_var = FxHashMap::default();
        tests_by_var.insert("x".to_string(), FxHashSet::from_iter([0usize]));
        tests_by_var.insert("y".to_string(), FxHashSet::from_iter([0usize]));

        let mut rule = Rule {
            name: "r".into(),
            salience: 0,
            lhs: vec![
                PatternCe {
                    binding: None,
                    pattern: Pattern::new("p", vec![Value::local("x")]),
                },
                PatternCe {
                    binding: None,
                    pattern: Pattern::new("q", vec![Value::local("y")]),
                },
            ],
            rhs: vec![],
            tests: vec![test],
            tests_by_var,
            complexity: 0,
        };
        rule.evaluate_complexity();
        // 2 patterns + 2 distinct variables + (1 call + 1 call argument)
        assert_eq!(rule.complexity, 6);
    }

    #[test]
    fn test_complexity_skips_boolean_wrappers() {
        // (test (and (> ?x 5) (< ?x 9)))
        let inner_gt = FunctionCall::new(">", vec![var("x"), Expr::lit(Value::Int(5))]);
        let inner_lt = FunctionCall::new("<", vec![var("x"), Expr::lit(Value::Int(9))]);
        let and = FunctionCall::new(
            "and",
            vec![Expr::Call(inner_gt), Expr::Call(inner_lt)],
        );
        let test = TestCall::new(and);
        let mut tests_by_var = FxHashMap::default();
        tests_by_var.insert("x".to_string(), FxHashSet::from_iter([0usize]));

        let mut rule = Rule {
            name: "r".into(),
            salience: 0,
            lhs: vec![PatternCe {
                binding: None,
                pattern: Pattern::new("p", vec![Value::local("x")]),
            }],
            rhs: vec![],
            tests: vec![test],
            tests_by_var,
            complexity: 0,
        };
        rule.evaluate_complexity();
        // 1 pattern + 1 variable + (1 for the comparison level + 2 call args)
        assert_eq!(rule.complexity, 5);
    }
}
