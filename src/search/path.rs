use crate::types::WordId;

/// Handle into a [`PathArena`]. `None` in a `prev` or `Hypo::path` slot is the
/// guard: the utterance start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(u32);

/// One word of a back-trace: the word, its entry frame, and the shared tail.
#[derive(Debug, Clone)]
pub struct PathNode {
    pub word_id: WordId,
    /// Frame at which this word begins.
    pub frame: u32,
    pub prev: Option<PathId>,
    pub lm_log_prob: f32,
    pub ac_log_prob: f32,
    refs: u32,
}

/// Reference-counted back-trace DAG with shared suffixes.
///
/// Nodes are arena rows addressed by [`PathId`]; freed rows are recycled
/// through a free list. A node owns one reference to its predecessor, so
/// dropping the last reference to a node collapses its now-unshared tail.
/// The collapse runs as a loop over indices, never recursion, so arbitrarily
/// long sentences cannot overflow the stack.
#[derive(Debug, Default)]
pub struct PathArena {
    nodes: Vec<Option<PathNode>>,
    free: Vec<u32>,
    live: usize,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a node with reference count 0 and links `prev`.
    /// Attach it to a hypothesis with [`link`](Self::link) before any
    /// [`unlink`](Self::unlink) can reach it.
    pub fn alloc(
        &mut self,
        word_id: WordId,
        frame: u32,
        prev: Option<PathId>,
        lm_log_prob: f32,
        ac_log_prob: f32,
    ) -> PathId {
        if let Some(id) = prev {
            self.link(id);
        }
        let node = PathNode {
            word_id,
            frame,
            prev,
            lm_log_prob,
            ac_log_prob,
            refs: 0,
        };
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                debug_assert!(self.nodes[index as usize].is_none());
                self.nodes[index as usize] = Some(node);
                PathId(index)
            }
            None => {
                self.nodes.push(Some(node));
                PathId(self.nodes.len() as u32 - 1)
            }
        }
    }

    pub fn node(&self, id: PathId) -> &PathNode {
        self.nodes[id.0 as usize]
            .as_ref()
            .expect("dangling path id")
    }

    pub fn link(&mut self, id: PathId) {
        self.node_mut(id).refs += 1;
    }

    /// Drops one reference to `id`. When a count reaches zero the node is
    /// freed and the drop cascades along the predecessor chain iteratively.
    pub fn unlink(&mut self, id: PathId) {
        let mut at = id;
        loop {
            let node = self.node_mut(at);
            debug_assert!(node.refs > 0, "unlink of unreferenced path node");
            if node.refs > 1 {
                node.refs -= 1;
                return;
            }
            let prev = node.prev;
            self.release(at);
            match prev {
                Some(p) => at = p,
                None => return,
            }
        }
    }

    /// Number of live nodes; leak detection and diagnostics.
    pub fn live_nodes(&self) -> usize {
        self.live
    }

    pub fn refs(&self, id: PathId) -> u32 {
        self.node(id).refs
    }

    /// Words of the back-trace ending at `path`, newest first.
    pub fn iter_from(&self, path: Option<PathId>) -> PathIter<'_> {
        PathIter { arena: self, at: path }
    }

    fn node_mut(&mut self, id: PathId) -> &mut PathNode {
        self.nodes[id.0 as usize]
            .as_mut()
            .expect("dangling path id")
    }

    fn release(&mut self, id: PathId) {
        debug_assert!(self.nodes[id.0 as usize].is_some());
        self.nodes[id.0 as usize] = None;
        self.free.push(id.0);
        self.live -= 1;
    }
}

pub struct PathIter<'a> {
    arena: &'a PathArena,
    at: Option<PathId>,
}

impl<'a> Iterator for PathIter<'a> {
    type Item = &'a PathNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.arena.node(self.at?);
        self.at = node.prev;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_links_predecessor() {
        let mut arena = PathArena::new();
        let a = arena.alloc(0, 0, None, 0.0, 0.0);
        arena.link(a);
        let b = arena.alloc(1, 5, Some(a), 0.0, 0.0);
        arena.link(b);
        assert_eq!(arena.refs(a), 2);
        assert_eq!(arena.refs(b), 1);
        assert_eq!(arena.live_nodes(), 2);
    }

    #[test]
    fn unlink_collapses_unshared_tail() {
        let mut arena = PathArena::new();
        let a = arena.alloc(0, 0, None, 0.0, 0.0);
        let b = arena.alloc(1, 1, Some(a), 0.0, 0.0);
        let c = arena.alloc(2, 2, Some(b), 0.0, 0.0);
        arena.link(c);
        assert_eq!(arena.live_nodes(), 3);
        arena.unlink(c);
        assert_eq!(arena.live_nodes(), 0);
    }

    #[test]
    fn shared_suffix_survives_unlink() {
        let mut arena = PathArena::new();
        let a = arena.alloc(0, 0, None, 0.0, 0.0);
        let b = arena.alloc(1, 1, Some(a), 0.0, 0.0);
        arena.link(b);
        let c = arena.alloc(2, 1, Some(a), 0.0, 0.0);
        arena.link(c);
        assert_eq!(arena.refs(a), 2);

        arena.unlink(b);
        assert_eq!(arena.live_nodes(), 2);
        assert_eq!(arena.refs(a), 1);

        arena.unlink(c);
        assert_eq!(arena.live_nodes(), 0);
    }

    #[test]
    fn long_chain_collapse_is_iterative() {
        let mut arena = PathArena::new();
        let mut tail = None;
        for i in 0..100_000u32 {
            tail = Some(arena.alloc(i, i, tail, 0.0, 0.0));
        }
        let head = tail.unwrap();
        arena.link(head);
        assert_eq!(arena.live_nodes(), 100_000);
        arena.unlink(head);
        assert_eq!(arena.live_nodes(), 0);
    }

    #[test]
    fn freed_slots_are_recycled() {
        let mut arena = PathArena::new();
        let a = arena.alloc(0, 0, None, 0.0, 0.0);
        arena.link(a);
        arena.unlink(a);
        let b = arena.alloc(1, 0, None, 0.0, 0.0);
        assert_eq!(a, b);
        assert_eq!(arena.live_nodes(), 1);
    }

    #[test]
    fn random_operations_preserve_reachability() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let mut arena = PathArena::new();
        // Each root models a live hypothesis holding one path reference.
        let mut roots: Vec<Option<PathId>> = vec![None];

        for _ in 0..2_000 {
            match rng.gen_range(0..4) {
                // Extend a random root by one word (copy-on-extend).
                0 | 1 => {
                    let base = roots[rng.gen_range(0..roots.len())];
                    let node = arena.alloc(rng.gen_range(0..50), 0, base, 0.0, 0.0);
                    arena.link(node);
                    roots.push(Some(node));
                }
                // Clone a random root.
                2 => {
                    let base = roots[rng.gen_range(0..roots.len())];
                    if let Some(id) = base {
                        arena.link(id);
                    }
                    roots.push(base);
                }
                // Drop a random root.
                _ => {
                    if roots.len() > 1 {
                        let dropped = roots.swap_remove(rng.gen_range(0..roots.len()));
                        if let Some(id) = dropped {
                            arena.unlink(id);
                        }
                    }
                }
            }

            let mut reachable = std::collections::HashSet::new();
            for root in roots.iter().flatten() {
                let mut at = Some(*root);
                while let Some(id) = at {
                    if !reachable.insert(id) {
                        break;
                    }
                    at = arena.node(id).prev;
                }
            }
            assert_eq!(reachable.len(), arena.live_nodes());
        }

        for root in roots.drain(..).flatten() {
            arena.unlink(root);
        }
        assert_eq!(arena.live_nodes(), 0);
    }

    #[test]
    fn iter_walks_newest_first() {
        let mut arena = PathArena::new();
        let a = arena.alloc(7, 0, None, 0.0, 0.0);
        let b = arena.alloc(8, 3, Some(a), 0.0, 0.0);
        arena.link(b);
        let words: Vec<WordId> = arena.iter_from(Some(b)).map(|n| n.word_id).collect();
        assert_eq!(words, vec![8, 7]);
        assert!(arena.iter_from(None).next().is_none());
    }
}
