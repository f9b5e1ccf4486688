use ahash::AHashSet;

use crate::search::path::{PathArena, PathId};
use crate::types::WordId;

/// One live hypothesis: the word sequence in `path` ends at `frame`, where
/// the next word must begin. The hypothesis owns one reference to `path`.
#[derive(Debug, Clone, Copy)]
pub struct Hypo {
    pub frame: u32,
    pub log_prob: f32,
    pub path: Option<PathId>,
}

/// Ordered multiset of hypotheses for one frame.
///
/// The best-score cache is written in exactly three places: `push` raises it,
/// `sort`/`partial_sort` set it to index 0, and `clear`/`take` reset it.
/// `prune` and `prune_beam` only truncate a sorted stack, which keeps index 0
/// valid.
#[derive(Debug, Default)]
pub struct HypoStack {
    hypos: Vec<Hypo>,
    best: Option<(usize, f32)>,
}

impl HypoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.hypos.reserve(additional);
    }

    pub fn len(&self) -> usize {
        self.hypos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypos.is_empty()
    }

    pub fn hypos(&self) -> &[Hypo] {
        &self.hypos
    }

    pub fn best_log_prob(&self) -> Option<f32> {
        self.best.map(|(_, log_prob)| log_prob)
    }

    pub fn best_index(&self) -> Option<usize> {
        self.best.map(|(index, _)| index)
    }

    /// Adds a hypothesis. The caller has already linked `hypo.path`.
    pub fn push(&mut self, hypo: Hypo) {
        match self.best {
            Some((_, best)) if hypo.log_prob <= best => {}
            _ => self.best = Some((self.hypos.len(), hypo.log_prob)),
        }
        self.hypos.push(hypo);
    }

    /// Sorts by log-prob descending; ties keep insertion order.
    pub fn sort(&mut self) {
        self.hypos
            .sort_by(|a, b| b.log_prob.total_cmp(&a.log_prob));
        self.best = self.hypos.first().map(|h| (0, h.log_prob));
    }

    /// Orders the best `top` hypotheses; the tail order is unspecified.
    /// `top` of 0 or >= len falls back to a full sort.
    pub fn partial_sort(&mut self, top: usize) {
        if top == 0 || top >= self.hypos.len() {
            self.sort();
            return;
        }
        self.hypos
            .select_nth_unstable_by(top - 1, |a, b| b.log_prob.total_cmp(&a.log_prob));
        self.hypos[..top].sort_by(|a, b| b.log_prob.total_cmp(&a.log_prob));
        self.best = self.hypos.first().map(|h| (0, h.log_prob));
    }

    /// Keeps the best `top` hypotheses. Assumes the stack is sorted.
    /// `top` of 0 disables the limit. Returns the number removed.
    pub fn prune(&mut self, top: usize, arena: &mut PathArena) -> usize {
        if top == 0 || top >= self.hypos.len() {
            return 0;
        }
        let removed = self.hypos.len() - top;
        for hypo in self.hypos.drain(top..) {
            if let Some(path) = hypo.path {
                arena.unlink(path);
            }
        }
        removed
    }

    /// Drops hypotheses scoring below `best - beam`. Assumes the stack is
    /// sorted. Returns the number removed.
    pub fn prune_beam(&mut self, beam: f32, arena: &mut PathArena) -> usize {
        let Some(best) = self.hypos.first().map(|h| h.log_prob) else {
            return 0;
        };
        let keep = self
            .hypos
            .partition_point(|h| h.log_prob >= best - beam);
        let removed = self.hypos.len() - keep;
        for hypo in self.hypos.drain(keep..) {
            if let Some(path) = hypo.path {
                arena.unlink(path);
            }
        }
        removed
    }

    /// Removes hypotheses whose last `length` word ids duplicate those of a
    /// better-scoring one. Assumes the stack is sorted descending; the first
    /// occurrence of an ending survives. Word id `ignore` (if any) does not
    /// count toward the ending. Returns the number removed.
    pub fn prune_similar(
        &mut self,
        length: usize,
        ignore: Option<WordId>,
        arena: &mut PathArena,
    ) -> usize {
        if length == 0 || self.hypos.len() < 2 {
            return 0;
        }
        let mut seen: AHashSet<Vec<WordId>> = AHashSet::with_capacity(self.hypos.len());
        let before = self.hypos.len();
        let mut removed_paths: Vec<PathId> = Vec::new();
        self.hypos.retain(|hypo| {
            let ending: Vec<WordId> = arena
                .iter_from(hypo.path)
                .map(|node| node.word_id)
                .filter(|id| Some(*id) != ignore)
                .take(length)
                .collect();
            if seen.insert(ending) {
                true
            } else {
                if let Some(path) = hypo.path {
                    removed_paths.push(path);
                }
                false
            }
        });
        for path in removed_paths {
            arena.unlink(path);
        }
        let removed = before - self.hypos.len();
        if removed > 0 {
            self.best = self.hypos.first().map(|h| (0, h.log_prob));
        }
        removed
    }

    /// Releases every hypothesis and resets the best cache.
    pub fn clear(&mut self, arena: &mut PathArena) {
        for hypo in self.hypos.drain(..) {
            if let Some(path) = hypo.path {
                arena.unlink(path);
            }
        }
        self.best = None;
    }

    /// Moves all hypotheses out, leaving the stack empty. Path references
    /// move with them; the caller becomes responsible for unlinking.
    pub fn take(&mut self) -> Vec<Hypo> {
        self.best = None;
        std::mem::take(&mut self.hypos)
    }
}
