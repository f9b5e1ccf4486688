use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::error::DecoderError;
use crate::lm::{mix_log_probs, LanguageModel};
use crate::model::Vocabulary;
use crate::search::expander::{Expander, WordCandidate};
use crate::search::path::{PathArena, PathId};
use crate::search::stack::{Hypo, HypoStack};
use crate::types::{Recognition, RecognizedWord, WordId};

/// Search options split out of [`DecoderConfig`]; `word_boundary` is resolved
/// to a vocabulary id.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub expand_window: usize,
    pub hypo_limit: usize,
    pub word_limit: usize,
    pub word_beam: f32,
    pub hypo_beam: f32,
    pub global_beam: f32,
    pub lm_scale: f32,
    pub lm_offset: f32,
    pub unk_offset: f32,
    pub prune_similar: usize,
    pub word_boundary: Option<WordId>,
    pub dummy_word_boundaries: bool,
    pub multiple_endings: bool,
}

impl SearchOptions {
    pub fn from_config(
        config: &DecoderConfig,
        vocabulary: &Vocabulary,
    ) -> Result<Self, DecoderError> {
        config.validate()?;
        let word_boundary = match &config.word_boundary {
            Some(word) => Some(vocabulary.id(word).ok_or_else(|| {
                DecoderError::config(format!("word_boundary {word} is not in the vocabulary"))
            })?),
            None => None,
        };
        Ok(Self {
            expand_window: config.expand_window,
            hypo_limit: config.hypo_limit,
            word_limit: config.word_limit,
            word_beam: config.word_beam,
            hypo_beam: config.hypo_beam,
            global_beam: config.global_beam,
            lm_scale: config.lm_scale,
            lm_offset: config.lm_offset,
            unk_offset: config.unk_offset,
            prune_similar: config.prune_similar,
            word_boundary,
            dummy_word_boundaries: config.dummy_word_boundaries,
            multiple_endings: config.multiple_endings,
        })
    }
}

/// Counters over one run; pruning diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub stack_expansions: usize,
    pub hypo_insertions: usize,
    pub limit_prunings: usize,
    pub beam_prunings: usize,
    pub similar_prunings: usize,
}

struct LmComponent {
    model: Box<dyn LanguageModel>,
    weight: f32,
    /// Vocabulary word id -> model-side id; `None` for words the model lacks.
    lex2lm: Vec<Option<usize>>,
}

/// Stack decoder: composes Expander word candidates across time over a ring
/// window of per-frame hypothesis stacks, combining acoustic and language
/// model scores and sharing back-trace suffixes through a [`PathArena`].
pub struct Search {
    expander: Expander,
    vocabulary: Arc<Vocabulary>,
    lms: Vec<LmComponent>,
    max_lm_order: usize,
    arena: PathArena,

    stacks: Vec<HypoStack>,
    first_frame: u32,
    last_frame: u32,
    first_stack: usize,
    frame: u32,
    last_hypo_frame: u32,

    options: SearchOptions,
    end_frame: u32,

    // Rolling across-frame best; expires when its frame leaves the window.
    global_best: f32,
    global_frame: u32,

    /// Best hypothesis of the deepest consumed stack; the answer when the
    /// run dries up before `end_frame` (acoustic EOF).
    best_final: Option<Hypo>,

    stats: SearchStats,
}

impl Search {
    pub fn new(
        expander: Expander,
        vocabulary: Arc<Vocabulary>,
        config: &DecoderConfig,
    ) -> Result<Self, DecoderError> {
        let options = SearchOptions::from_config(config, &vocabulary)?;
        let mut search = Self {
            expander,
            vocabulary,
            lms: Vec::new(),
            max_lm_order: 0,
            arena: PathArena::new(),
            stacks: Vec::new(),
            first_frame: 0,
            last_frame: 0,
            first_stack: 0,
            frame: 0,
            last_hypo_frame: 0,
            options,
            end_frame: config.end_frame.unwrap_or(u32::MAX),
            global_best: f32::NEG_INFINITY,
            global_frame: 0,
            best_final: None,
            stats: SearchStats::default(),
        };
        search.init_search(options.expand_window, options.expand_window + 1, 64);
        Ok(search)
    }

    /// Registers a language model with an interpolation weight and builds its
    /// lexicon-to-model id mapping. The vocabulary must be complete.
    pub fn add_ngram(&mut self, model: Box<dyn LanguageModel>, weight: f32) {
        let lex2lm = self.vocabulary.words().map(|w| model.id(w)).collect();
        self.max_lm_order = self.max_lm_order.max(model.order());
        self.lms.push(LmComponent {
            model,
            weight,
            lex2lm,
        });
    }

    /// Allocates the ring of `stacks` stacks (at least `expand_window + 1`),
    /// each reserving `reserved_hypos` slots, and discards all search state.
    pub fn init_search(&mut self, expand_window: usize, stacks: usize, reserved_hypos: usize) {
        let stacks = stacks.max(expand_window + 1);
        self.options.expand_window = expand_window;
        self.stacks = (0..stacks)
            .map(|_| {
                let mut stack = HypoStack::new();
                stack.reserve(reserved_hypos);
                stack
            })
            .collect();
        self.arena = PathArena::new();
        self.best_final = None;
        self.reset_search(0);
    }

    /// Clears all stacks and seeds `start_frame` with the start hypothesis.
    pub fn reset_search(&mut self, start_frame: u32) {
        for index in 0..self.stacks.len() {
            self.stacks[index].clear(&mut self.arena);
        }
        if let Some(old) = self.best_final.take() {
            if let Some(path) = old.path {
                self.arena.unlink(path);
            }
        }
        self.first_stack = 0;
        self.first_frame = start_frame;
        self.last_frame = start_frame + self.stacks.len() as u32 - 1;
        self.frame = start_frame;
        self.last_hypo_frame = start_frame;
        self.global_best = f32::NEG_INFINITY;
        self.global_frame = start_frame;
        self.stats = SearchStats::default();

        let seed = Hypo {
            frame: start_frame,
            log_prob: 0.0,
            path: None,
        };
        let index = self.window_index(start_frame);
        self.stacks[index].push(seed);
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn first_frame(&self) -> u32 {
        self.first_frame
    }

    pub fn last_frame(&self) -> u32 {
        self.last_frame
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Live back-trace nodes; leak detection.
    pub fn live_paths(&self) -> usize {
        self.arena.live_nodes()
    }

    pub fn set_end_frame(&mut self, end_frame: u32) {
        self.end_frame = end_frame;
    }

    /// Ring index of a frame already known to be inside the window.
    fn window_index(&self, frame: u32) -> usize {
        debug_assert!(frame >= self.first_frame && frame <= self.last_frame);
        (self.first_stack + (frame - self.first_frame) as usize) % self.stacks.len()
    }

    /// Ring index of `frame`, a bijection over `[first_frame, last_frame]`.
    pub fn frame2stack(&self, frame: u32) -> Result<usize, DecoderError> {
        if frame < self.first_frame {
            return Err(DecoderError::ForgottenFrame {
                frame,
                first_frame: self.first_frame,
            });
        }
        if frame > self.last_frame {
            return Err(DecoderError::FutureFrame {
                frame,
                last_frame: self.last_frame,
            });
        }
        Ok((self.first_stack + (frame - self.first_frame) as usize) % self.stacks.len())
    }

    pub fn stack(&self, frame: u32) -> Result<&HypoStack, DecoderError> {
        Ok(&self.stacks[self.frame2stack(frame)?])
    }

    /// Slides the window forward so that `first_frame == new_first`,
    /// releasing the stacks that fall out of range.
    pub fn move_buffer(&mut self, new_first: u32) -> Result<(), DecoderError> {
        if new_first < self.first_frame {
            return Err(DecoderError::ForgottenFrame {
                frame: new_first,
                first_frame: self.first_frame,
            });
        }
        let evict = (new_first.min(self.last_frame + 1) - self.first_frame) as usize;
        for _ in 0..evict {
            self.stacks[self.first_stack].clear(&mut self.arena);
            self.first_stack = (self.first_stack + 1) % self.stacks.len();
        }
        self.first_frame = new_first;
        self.last_frame = new_first + self.stacks.len() as u32 - 1;
        if self.global_frame < self.first_frame {
            self.global_best = f32::NEG_INFINITY;
            self.global_frame = self.first_frame;
        }
        Ok(())
    }

    /// Advances the current frame pointer, sliding the window with it.
    pub fn go(&mut self, frame: u32) -> Result<(), DecoderError> {
        self.move_buffer(frame)?;
        self.frame = frame;
        Ok(())
    }

    pub fn sort_stack(&mut self, frame: u32, top: usize) -> Result<(), DecoderError> {
        let index = self.frame2stack(frame)?;
        if top == 0 {
            self.stacks[index].sort();
        } else {
            self.stacks[index].partial_sort(top);
        }
        Ok(())
    }

    /// Sorts and prunes the stack at `frame`, then removes hypotheses whose
    /// last `length` word ids duplicate a better-scoring one.
    pub fn prune_similar(&mut self, frame: u32, length: usize) -> Result<usize, DecoderError> {
        let index = self.frame2stack(frame)?;
        self.stacks[index].sort();
        let ignore = self.similar_ignore();
        let removed = self.stacks[index].prune_similar(length, ignore, &mut self.arena);
        self.stats.similar_prunings += removed;
        Ok(removed)
    }

    fn similar_ignore(&self) -> Option<WordId> {
        if self.options.dummy_word_boundaries {
            self.options.word_boundary
        } else {
            None
        }
    }

    /// Expands every surviving hypothesis at `frame` by one word and consumes
    /// the stack. Returns false when there is nothing to expand.
    pub fn expand_stack(&mut self, frame: u32) -> Result<bool, DecoderError> {
        let index = self.frame2stack(frame)?;
        if frame >= self.end_frame {
            return Ok(false);
        }

        self.stacks[index].sort();
        if self.options.prune_similar > 0 {
            let ignore = self.similar_ignore();
            self.stats.similar_prunings +=
                self.stacks[index].prune_similar(self.options.prune_similar, ignore, &mut self.arena);
        }
        self.stats.beam_prunings +=
            self.stacks[index].prune_beam(self.options.hypo_beam, &mut self.arena);
        self.stats.limit_prunings +=
            self.stacks[index].prune(self.options.hypo_limit, &mut self.arena);
        if self.stacks[index].is_empty() {
            return Ok(false);
        }

        self.stats.stack_expansions += 1;
        self.save_best_final(frame, index);

        let max_frames = (self.end_frame - frame).min(self.options.expand_window as u32);
        self.expander.expand(frame, max_frames)?;
        let candidates = self.filter_words();
        let consumed = self.stacks[index].take();

        for hypo in &consumed {
            let context = self.lm_context(hypo.path);
            for word in &candidates {
                self.extend_hypo(hypo, frame, word, &context);
            }
        }
        for hypo in consumed {
            if let Some(path) = hypo.path {
                self.arena.unlink(path);
            }
        }
        Ok(true)
    }

    /// Word-limit and word-beam cut over the Expander's ranked candidates.
    fn filter_words(&self) -> Vec<WordCandidate> {
        let words = self.expander.words();
        let Some(best) = words.first() else {
            return Vec::new();
        };
        let floor = best.avg_log_prob - self.options.word_beam;
        let limit = if self.options.word_limit > 0 {
            self.options.word_limit
        } else {
            words.len()
        };
        words
            .iter()
            .take(limit)
            .filter(|w| w.avg_log_prob >= floor)
            .copied()
            .collect()
    }

    fn extend_hypo(&mut self, hypo: &Hypo, frame: u32, word: &WordCandidate, context: &[WordId]) {
        let target = frame + word.frames;
        if target > self.end_frame || target > self.last_frame {
            return;
        }

        let lm_log_prob = self.lm_score(context, word.word_id);
        let score = hypo.log_prob
            + word.log_prob
            + self.options.lm_scale * lm_log_prob
            + self.options.lm_offset;

        if score > self.global_best {
            self.global_best = score;
            self.global_frame = target;
        } else if score < self.global_best - self.options.global_beam {
            self.stats.beam_prunings += 1;
            return;
        }

        let node = self
            .arena
            .alloc(word.word_id, frame, hypo.path, lm_log_prob, word.log_prob);
        self.arena.link(node);
        let index = self.window_index(target);
        self.stacks[index].push(Hypo {
            frame: target,
            log_prob: score,
            path: Some(node),
        });
        self.stats.hypo_insertions += 1;
        if target > self.last_hypo_frame {
            self.last_hypo_frame = target;
        }
    }

    /// LM context of a path, oldest first, at most `max_lm_order - 1` items,
    /// with the boundary word interleaved between words when configured.
    fn lm_context(&self, path: Option<PathId>) -> Vec<WordId> {
        let need = self.max_lm_order.saturating_sub(1);
        let mut context = Vec::with_capacity(need);
        if need == 0 {
            return context;
        }
        if let Some(boundary) = self.options.word_boundary {
            for node in self.arena.iter_from(path) {
                context.push(boundary);
                if context.len() == need {
                    break;
                }
                context.push(node.word_id);
                if context.len() == need {
                    break;
                }
            }
        } else {
            for node in self.arena.iter_from(path) {
                context.push(node.word_id);
                if context.len() == need {
                    break;
                }
            }
        }
        context.reverse();
        context
    }

    /// Mixture LM log-prob of `word` after `context`; `unk_offset` when no
    /// model knows the word. Context words a model lacks truncate that
    /// model's context to the known suffix.
    fn lm_score(&self, context: &[WordId], word: WordId) -> f32 {
        let mut terms: Vec<(f32, f32)> = Vec::with_capacity(self.lms.len());
        let mut mapped: Vec<usize> = Vec::with_capacity(context.len());
        for component in &self.lms {
            let Some(model_word) = component.lex2lm[word as usize] else {
                continue;
            };
            mapped.clear();
            for &context_word in context {
                match component.lex2lm[context_word as usize] {
                    Some(id) => mapped.push(id),
                    None => mapped.clear(),
                }
            }
            terms.push((
                component.weight,
                component.model.log_prob(&mapped, model_word),
            ));
        }
        mix_log_probs(terms).unwrap_or(self.options.unk_offset)
    }

    fn save_best_final(&mut self, frame: u32, index: usize) {
        let best = self.stacks[index].hypos()[0];
        let better = match &self.best_final {
            None => true,
            Some(held) => {
                frame > held.frame || (frame == held.frame && best.log_prob > held.log_prob)
            }
        };
        if better {
            if let Some(path) = best.path {
                self.arena.link(path);
            }
            if let Some(old) = self.best_final.take() {
                if let Some(path) = old.path {
                    self.arena.unlink(path);
                }
            }
            self.best_final = Some(Hypo {
                frame,
                log_prob: best.log_prob,
                path: best.path,
            });
        }
    }

    /// Drives the search until a hypothesis reaches `end_frame` or no active
    /// work remains. Returns whether a full path reached `end_frame`.
    pub fn run(&mut self) -> Result<bool, DecoderError> {
        loop {
            let next = (self.frame..=self.last_frame)
                .find(|&f| !self.stacks[self.window_index(f)].is_empty());
            let Some(frame) = next else {
                tracing::debug!(
                    last_hypo_frame = self.last_hypo_frame,
                    stack_expansions = self.stats.stack_expansions,
                    hypo_insertions = self.stats.hypo_insertions,
                    "search dried up before the end frame"
                );
                return Ok(false);
            };
            if frame >= self.end_frame {
                self.frame = frame;
                self.sort_stack(frame, 0)?;
                tracing::debug!(
                    frame,
                    hypos = self.stack(frame)?.len(),
                    stack_expansions = self.stats.stack_expansions,
                    hypo_insertions = self.stats.hypo_insertions,
                    beam_prunings = self.stats.beam_prunings,
                    limit_prunings = self.stats.limit_prunings,
                    similar_prunings = self.stats.similar_prunings,
                    "search reached the end frame"
                );
                return Ok(true);
            }
            self.frame = frame;
            self.move_buffer(frame)?;
            self.expand_stack(frame)?;
        }
    }

    /// Convenience wrapper: reset, bound, run.
    pub fn recognize_segment(&mut self, start_frame: u32, end_frame: u32) -> Result<bool, DecoderError> {
        self.reset_search(start_frame);
        self.end_frame = end_frame;
        self.run()
    }

    /// Hypotheses to report for the current state: the final stack when the
    /// run reached it (all of it with `multiple_endings`, else the best), or
    /// the remembered deepest hypothesis after a dried-up run.
    pub fn recognitions(&self) -> Vec<Recognition> {
        if let Ok(stack) = self.stack(self.frame) {
            if !stack.is_empty() {
                let count = if self.options.multiple_endings {
                    stack.len()
                } else {
                    1
                };
                return stack.hypos()[..count]
                    .iter()
                    .map(|h| self.recognition_from(h))
                    .collect();
            }
        }
        match &self.best_final {
            Some(hypo) => vec![self.recognition_from(hypo)],
            None => Vec::new(),
        }
    }

    fn recognition_from(&self, hypo: &Hypo) -> Recognition {
        let mut words: Vec<RecognizedWord> = self
            .arena
            .iter_from(hypo.path)
            .map(|node| RecognizedWord {
                word: self.vocabulary.word(node.word_id).to_string(),
                word_id: node.word_id,
                frame: node.frame,
                lm_log_prob: node.lm_log_prob,
                ac_log_prob: node.ac_log_prob,
            })
            .collect();
        words.reverse();
        Recognition {
            log_prob: hypo.log_prob,
            frame: hypo.frame,
            words,
        }
    }
}
