//! Salience-partitioned agenda and conflict-resolution strategies
//!
//! Activations are partitioned by salience (higher fires first); within one
//! salience level the current strategy decides the order. Strategies are a
//! small enum over shared containers rather than an object hierarchy: depth
//! and breadth share a deque, random uses a list with uniform-index
//! removal, and the four keyed strategies share one heap whose key is
//! precomputed per entry.
//!
//! Liveness is tracked per token: retraction deletes the token's activation
//! count, and entries already sitting in a container become orphans that
//! are silently discarded on pop.

use crate::token::TokenId;
use fact_model::{Action, Value};
use rand::Rng;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A rule instantiation eligible to fire.
#[derive(Clone, Debug)]
pub struct AgendaItem {
    /// Name of the activated rule.
    pub rule_name: String,
    /// Salience of the activated rule.
    pub salience: i64,
    /// Complexity key of the activated rule.
    pub complexity: u32,
    /// The rule's RHS, shared with its production node.
    pub actions: Arc<Vec<Action>>,
    /// The complete-match token.
    pub token: TokenId,
    /// Variable bindings accumulated along the token's joins.
    pub bindings: FxHashMap<String, Value>,
    /// Assigned-pattern variable to matched WME id.
    pub assignments: FxHashMap<String, u64>,
    /// WME ids of the token, head to tail.
    pub wme_ids: SmallVec<[u64; 4]>,
}

impl fmt::Display for AgendaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}:", self.salience, self.rule_name)?;
        for id in &self.wme_ids {
            write!(f, " f-{id}")?;
        }
        Ok(())
    }
}

/// Ordering discipline within one salience level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    /// Newest activation fires first (stack).
    Depth,
    /// Oldest activation fires first (queue).
    Breadth,
    /// Uniform-random choice among eligible activations.
    Random,
    /// Highest rule complexity first.
    Complexity,
    /// Lowest rule complexity first.
    Simplicity,
    /// Most recent WMEs first, comparing the full id tuple.
    Lex,
    /// Most recent first WME first, then the full id tuple.
    Mea,
}

impl StrategyKind {
    /// Parse a strategy name as written in the source dialect.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "depth" => Some(Self::Depth),
            "breadth" => Some(Self::Breadth),
            "random" => Some(Self::Random),
            "complexity" => Some(Self::Complexity),
            "simplicity" => Some(Self::Simplicity),
            "lex" => Some(Self::Lex),
            "mea" => Some(Self::Mea),
            _ => None,
        }
    }

    /// The strategy's dialect name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Depth => "depth",
            Self::Breadth => "breadth",
            Self::Random => "random",
            Self::Complexity => "complexity",
            Self::Simplicity => "simplicity",
            Self::Lex => "lex",
            Self::Mea => "mea",
        }
    }

    /// Heap key; the heap pops the smallest key, so "first" means most
    /// negative. Recency keys negate the WME ids; on a prefix tie the
    /// shorter tuple compares less and pops first.
    fn heap_key(self, item: &AgendaItem) -> SmallVec<[i64; 6]> {
        match self {
            Self::Complexity => SmallVec::from_slice(&[-(item.complexity as i64)]),
            Self::Simplicity => SmallVec::from_slice(&[item.complexity as i64]),
            Self::Lex => item.wme_ids.iter().map(|&id| -(id as i64)).collect(),
            Self::Mea => {
                let first = item.wme_ids.first().copied().unwrap_or(0);
                std::iter::once(-(first as i64))
                    .chain(item.wme_ids.iter().map(|&id| -(id as i64)))
                    .collect()
            }
            _ => SmallVec::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct HeapEntry {
    key: SmallVec<[i64; 6]>,
    seq: u64,
    item: AgendaItem,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap pops the greatest entry; invert so the smallest
        // (key, seq) surfaces first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Clone, Debug)]
enum Container {
    Deque(VecDeque<AgendaItem>),
    List(Vec<AgendaItem>),
    Heap(BinaryHeap<HeapEntry>),
}

impl Container {
    fn new(strategy: StrategyKind) -> Self {
        match strategy {
            StrategyKind::Depth | StrategyKind::Breadth => Container::Deque(VecDeque::new()),
            StrategyKind::Random => Container::List(Vec::new()),
            _ => Container::Heap(BinaryHeap::new()),
        }
    }

    fn insert(&mut self, strategy: StrategyKind, seq: u64, item: AgendaItem) {
        match self {
            Container::Deque(deque) => {
                if strategy == StrategyKind::Depth {
                    deque.push_front(item);
                } else {
                    deque.push_back(item);
                }
            }
            Container::List(list) => list.push(item),
            Container::Heap(heap) => {
                let key = strategy.heap_key(&item);
                heap.push(HeapEntry { key, seq, item });
            }
        }
    }

    fn pop(&mut self) -> Option<AgendaItem> {
        match self {
            Container::Deque(deque) => deque.pop_front(),
            Container::List(list) => {
                if list.is_empty() {
                    None
                } else {
                    let index = rand::thread_rng().gen_range(0..list.len());
                    Some(list.remove(index))
                }
            }
            Container::Heap(heap) => heap.pop().map(|entry| entry.item),
        }
    }

    /// Consume the container, yielding items in pop order.
    fn drain(mut self) -> Vec<AgendaItem> {
        let mut out = Vec::new();
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }
}

/// The agenda: activations partitioned by salience and ordered within each
/// level by the current strategy.
#[derive(Debug)]
pub struct Agenda {
    strategy: StrategyKind,
    by_salience: BTreeMap<i64, Container>,
    token_activations: FxHashMap<TokenId, u32>,
    seq: u64,
}

impl Agenda {
    /// Empty agenda under the given strategy.
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            by_salience: BTreeMap::new(),
            token_activations: FxHashMap::default(),
            seq: 0,
        }
    }

    /// The current strategy.
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Queue an activation under its salience level.
    pub fn add_activation(&mut self, item: AgendaItem) {
        let strategy = self.strategy;
        self.seq += 1;
        let seq = self.seq;
        *self.token_activations.entry(item.token).or_insert(0) += 1;
        self.by_salience
            .entry(item.salience)
            .or_insert_with(|| Container::new(strategy))
            .insert(strategy, seq, item);
    }

    /// Invalidate every activation of a token (its WME was retracted).
    ///
    /// Entries already queued become orphans, filtered out on pop.
    pub fn del_activation(&mut self, token: TokenId) {
        self.token_activations.remove(&token);
    }

    /// Pop the next live activation: highest salience first, strategy
    /// order within the level, orphans silently discarded.
    pub fn get_next_activation(&mut self) -> Option<AgendaItem> {
        let saliences: Vec<i64> = self.by_salience.keys().rev().copied().collect();
        for salience in saliences {
            let Some(container) = self.by_salience.get_mut(&salience) else {
                continue;
            };
            while let Some(item) = container.pop() {
                let live = self.token_activations.get(&item.token).copied().unwrap_or(0);
                if live > 0 {
                    self.token_activations.insert(item.token, live - 1);
                    return Some(item);
                }
            }
        }
        None
    }

    /// Switch strategies, rehoming every salience container.
    ///
    /// Returns `false` (and does nothing) when the strategy is unchanged.
    pub fn change_strategy(&mut self, strategy: StrategyKind) -> bool {
        if strategy == self.strategy {
            return false;
        }
        debug!(from = self.strategy.name(), to = strategy.name(), "changing strategy");
        self.strategy = strategy;
        let old = std::mem::take(&mut self.by_salience);
        for (salience, container) in old {
            let mut rehomed = Container::new(strategy);
            for item in container.drain() {
                self.seq += 1;
                rehomed.insert(strategy, self.seq, item);
            }
            self.by_salience.insert(salience, rehomed);
        }
        true
    }

    /// Live activations in pop order, without consuming them.
    pub fn activations(&self) -> Vec<AgendaItem> {
        let mut out = Vec::new();
        for (_, container) in self.by_salience.iter().rev() {
            for item in container.clone().drain() {
                if self.token_activations.get(&item.token).copied().unwrap_or(0) > 0 {
                    out.push(item);
                }
            }
        }
        out
    }

    /// True when no live activation remains.
    pub fn is_exhausted(&self) -> bool {
        self.activations().is_empty()
    }
}

impl fmt::Display for Agenda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let activations = self.activations();
        if activations.is_empty() {
            return write!(f, "Empty agenda.");
        }
        for item in &activations {
            writeln!(f, "{item}")?;
        }
        write!(f, "for a total of {} activations.", activations.len())
    }
}
