//! Token arena
//!
//! A token is a partial match: a chain of WMEs, one per pattern matched so
//! far, linked through parent tokens. Tokens are immutable once allocated
//! and live in an arena owned by the network; identity (and therefore
//! equality and hashing) is the arena index. The ordered WME-id chain is
//! cached at allocation so joins and retraction never re-walk parents.

use smallvec::SmallVec;

/// Index of a token in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TokenId(pub(crate) u32);

#[derive(Debug)]
struct TokenNode {
    parent: Option<TokenId>,
    wme: u64,
    wme_ids: SmallVec<[u64; 4]>,
}

/// Arena of immutable tokens.
#[derive(Debug, Default)]
pub struct TokenArena {
    nodes: Vec<TokenNode>,
}

impl TokenArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a token extending `parent` with `wme`.
    pub fn alloc(&mut self, parent: Option<TokenId>, wme: u64) -> TokenId {
        let mut wme_ids = match parent {
            Some(p) => self.nodes[p.0 as usize].wme_ids.clone(),
            None => SmallVec::new(),
        };
        wme_ids.push(wme);
        let id = TokenId(self.nodes.len() as u32);
        self.nodes.push(TokenNode {
            parent,
            wme,
            wme_ids,
        });
        id
    }

    /// The WME this token added to its chain.
    pub fn wme(&self, token: TokenId) -> u64 {
        self.nodes[token.0 as usize].wme
    }

    /// The parent token, if this is not a chain head.
    pub fn parent(&self, token: TokenId) -> Option<TokenId> {
        self.nodes[token.0 as usize].parent
    }

    /// Ordered WME ids along the chain, head to tail.
    pub fn wme_ids(&self, token: TokenId) -> &[u64] {
        &self.nodes[token.0 as usize].wme_ids
    }

    /// Number of allocated tokens.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every token.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_collects_ids_head_to_tail() {
        let mut arena = TokenArena::new();
        let t1 = arena.alloc(None, 1);
        let t2 = arena.alloc(Some(t1), 2);
        let t3 = arena.alloc(Some(t2), 5);

        assert_eq!(arena.wme_ids(t1), &[1]);
        assert_eq!(arena.wme_ids(t2), &[1, 2]);
        assert_eq!(arena.wme_ids(t3), &[1, 2, 5]);
        assert_eq!(arena.wme(t3), 5);
        assert_eq!(arena.parent(t3), Some(t2));
        assert_eq!(arena.parent(t1), None);
    }

    #[test]
    fn test_tokens_are_distinct_by_identity() {
        let mut arena = TokenArena::new();
        let a = arena.alloc(None, 1);
        let b = arena.alloc(None, 1);
        assert_ne!(a, b);
    }
}
