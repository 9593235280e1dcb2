//! Core data model for the production-rule engine
//!
//! This crate provides the shared vocabulary of the engine:
//! - A tagged value union (integers, floats, symbols, strings, booleans,
//!   variables) with numeric promotion and CLIPS-style rendering
//! - Ordered facts and working-memory elements
//! - Rules, patterns, join tests, and right-hand-side actions
//! - The three-scope variable environment (globals, RHS locals, test locals)
//! - The abstract-syntax constructs an external parser produces
//!
//! The matching machinery lives in the `rete` crate and the expression
//! evaluator in the `eval` crate; both operate purely over the types here.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod env;
mod fact;
mod rule;
mod value;

pub use env::Environment;
pub use fact::{Fact, Wme};
pub use rule::{
    Action, Construct, Expr, FactTemplate, FunctionCall, LhsItem, Pattern, PatternCe, Rule,
    RuleDef, TestCall,
};
pub use value::{Value, VarScope, Variable};

/// Errors that can occur while building or running the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Evaluation failure: unbound globals, unknown functions, ill-typed
    /// arguments, division by zero, facts with unresolved variables,
    /// tests referencing variables bound at no join
    #[error("evaluation error: {0}")]
    Evaluate(String),

    /// Syntax failure reported by the external parser
    #[error("parse error: {0}")]
    Parse(String),

    /// Output sink failure while printing from a rule firing
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
