//! Rete discrimination network for a CLIPS-style production system
//!
//! Forward-chaining pattern matching with incremental maintenance:
//! - Alpha network: per-field discrimination tree with shared nodes and
//!   terminal alpha memories holding matched WMEs and their bindings
//! - Beta network: join nodes enforcing inter-pattern variable
//!   consistency and in-rule test predicates, beta memories holding
//!   partial-match tokens, production nodes emitting activations
//! - Agenda: salience-partitioned activations under six pluggable
//!   conflict-resolution strategies
//! - Recognize-act driver: fire, mutate working memory through the same
//!   network, rematch incrementally, repeat
//!
//! The engine is strictly single-threaded; a firing rule's RHS re-enters
//! the network to assert and retract facts mid-cycle.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod agenda;
mod memory;
mod network;
mod nodes;
mod token;

pub use agenda::{Agenda, AgendaItem, StrategyKind};
pub use memory::{ProductionMemory, WorkingMemory};
pub use network::Network;
pub use token::{TokenArena, TokenId};
