//! Node kinds of the discrimination network
//!
//! The network is a DAG held in arenas: one vector per node kind, with
//! typed indices for every cross-link (parent/child edges and the
//! alpha-to-beta seams). Nothing here owns anything across arenas, which
//! keeps the graph cycle-free for the borrow checker while matching walks
//! it in both directions.

use crate::token::TokenId;
use fact_model::{Action, TestCall, Value};
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// Index of a discrimination node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AlphaNodeId(pub(crate) usize);

/// Index of an alpha memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AlphaMemId(pub(crate) usize);

/// Index of a join node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JoinId(pub(crate) usize);

/// Index of a beta memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BetaMemId(pub(crate) usize);

/// Index of a production node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PNodeId(pub(crate) usize);

/// Discrimination key of one pattern field.
///
/// Constants key by tagged-value equality (so `2` and `2.0` share a
/// child); variables key by name and match any field value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AlphaKey {
    /// Constant field; matched by value equality.
    Const(Value),
    /// Variable field; matches anything.
    Var(String),
}

impl AlphaKey {
    /// Key for a pattern field.
    pub fn for_field(field: &Value) -> Self {
        match field {
            Value::Var(v) => AlphaKey::Var(v.name.clone()),
            other => AlphaKey::Const(other.clone()),
        }
    }

    /// Variable name, when this key is a variable.
    pub fn var_name(&self) -> Option<&str> {
        match self {
            AlphaKey::Var(name) => Some(name),
            AlphaKey::Const(_) => None,
        }
    }
}

/// One level of the discrimination tree.
///
/// A node at depth `d` labels field `d - 1` of the fact; the root's
/// children sit at depth 0 and label the head symbol. `to_check` carries
/// the position of an earlier occurrence of the same variable, enforcing
/// intra-fact consistency for patterns like `(a ?x ?x)`.
#[derive(Debug)]
pub struct AlphaNode {
    /// Field label this node discriminates on.
    pub label: AlphaKey,
    /// Depth in the tree; equals the next field position to examine.
    pub depth: usize,
    /// Children keyed by their label.
    pub children: FxHashMap<AlphaKey, AlphaNodeId>,
    /// The subset of children with variable labels, walked unconditionally.
    pub var_children: SmallVec<[AlphaNodeId; 2]>,
    /// Terminal alpha memory, present once a pattern ends here.
    pub memory: Option<AlphaMemId>,
    /// Earlier position of a repeated variable, if any.
    pub to_check: Option<usize>,
}

impl AlphaNode {
    /// Fresh node with no children.
    pub fn new(label: AlphaKey, depth: usize) -> Self {
        Self {
            label,
            depth,
            children: FxHashMap::default(),
            var_children: SmallVec::new(),
            memory: None,
            to_check: None,
        }
    }
}

/// Downstream consumer of an alpha memory.
#[derive(Clone, Copy, Debug)]
pub enum AlphaMemChild {
    /// A join (or dummy join) node right-activated by new WMEs.
    Join(JoinId),
    /// A production node linked directly (single-pattern rule).
    Production(PNodeId),
}

/// Terminal memory of one discrimination path.
///
/// Holds every WME whose fact the path accepts, in insertion order, plus
/// the per-WME variable bindings derived from the pattern's variable
/// positions (first occurrence authoritative).
#[derive(Debug, Default)]
pub struct AlphaMemory {
    /// Accepted WMEs in insertion order.
    pub wmes: IndexSet<u64>,
    /// Variable name to the field positions it occupies in the pattern.
    pub variables: FxHashMap<String, SmallVec<[usize; 2]>>,
    /// Per-WME bindings: variable name to the matched field value.
    pub wme_bindings: FxHashMap<u64, FxHashMap<String, Value>>,
    /// Downstream joins and directly-linked production nodes.
    pub children: Vec<AlphaMemChild>,
}

/// Downstream consumer of a join node.
#[derive(Clone, Copy, Debug)]
pub enum JoinChild {
    /// A beta memory storing the extended tokens.
    Memory(BetaMemId),
    /// The production node (last join of a rule).
    Production(PNodeId),
}

/// Two-input join node.
///
/// The left input is the parent beta memory; `None` makes this the dummy
/// join for a rule's first pattern, which has no left side and forms
/// tokens straight from its alpha memory.
#[derive(Debug)]
pub struct JoinNode {
    /// Left input; `None` for a dummy join.
    pub parent: Option<BetaMemId>,
    /// Right input.
    pub alpha: AlphaMemId,
    /// Tests claimed by this node; they run here and nowhere else.
    pub tests: Vec<TestCall>,
    /// Assigned-pattern variable unwrapped from the pattern, if any.
    pub assigned_var: Option<String>,
    /// Downstream consumers of the joined tokens.
    pub children: Vec<JoinChild>,
}

impl JoinNode {
    /// Join node bound to its right input; left side and tests are wired
    /// during the beta build.
    pub fn new(alpha: AlphaMemId) -> Self {
        Self {
            parent: None,
            alpha,
            tests: Vec::new(),
            assigned_var: None,
            children: Vec::new(),
        }
    }
}

/// Partial-match store between two joins.
#[derive(Debug, Default)]
pub struct BetaMemory {
    /// Tokens in insertion order.
    pub tokens: IndexSet<TokenId>,
    /// Per-token merged variable bindings.
    pub token_bindings: FxHashMap<TokenId, FxHashMap<String, Value>>,
    /// Per-token assigned-pattern map (variable name to WME id).
    pub token_assignments: FxHashMap<TokenId, FxHashMap<String, u64>>,
    /// Downstream joins left-activated by new tokens.
    pub children: Vec<JoinId>,
}

impl BetaMemory {
    /// Remove a token and its side maps.
    pub fn remove_token(&mut self, token: TokenId) {
        self.tokens.shift_remove(&token);
        self.token_bindings.remove(&token);
        self.token_assignments.remove(&token);
    }
}

/// Terminal node of one rule's beta spine.
#[derive(Debug)]
pub struct ProductionNode {
    /// Rule name.
    pub name: String,
    /// Rule salience.
    pub salience: i64,
    /// Rule complexity (conflict-resolution key).
    pub complexity: u32,
    /// The rule's RHS, shared with every activation.
    pub actions: Arc<Vec<Action>>,
    /// Local tests (single-pattern rules only; joins claim them otherwise).
    pub tests: Vec<TestCall>,
    /// Assigned-pattern variable for single-pattern rules.
    pub assigned_var: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_key_distinguishes_constants_from_variables() {
        assert_eq!(
            AlphaKey::for_field(&Value::Int(2)),
            AlphaKey::Const(Value::Int(2))
        );
        assert_eq!(
            AlphaKey::for_field(&Value::local("x")),
            AlphaKey::Var("x".into())
        );
        assert_ne!(
            AlphaKey::for_field(&Value::symbol("x")),
            AlphaKey::for_field(&Value::local("x"))
        );
    }

    #[test]
    fn test_alpha_key_shares_cross_kind_numeric_constants() {
        // (a 2) and (a 2.0) discriminate through the same child.
        assert_eq!(
            AlphaKey::for_field(&Value::Int(2)),
            AlphaKey::for_field(&Value::Float(2.0))
        );
    }

    #[test]
    fn test_beta_memory_remove_token_clears_side_maps() {
        let mut memory = BetaMemory::default();
        let token = TokenId(0);
        memory.tokens.insert(token);
        memory.token_bindings.insert(token, FxHashMap::default());
        memory.token_assignments.insert(token, FxHashMap::default());

        memory.remove_token(token);
        assert!(memory.tokens.is_empty());
        assert!(memory.token_bindings.is_empty());
        assert!(memory.token_assignments.is_empty());
    }
}
