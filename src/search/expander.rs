use std::sync::Arc;

use ahash::AHashMap;

use crate::acoustics::Acoustics;
use crate::config::DecoderConfig;
use crate::error::DecoderError;
use crate::model::{Hmm, Lexicon};
use crate::types::WordId;

/// Live Viterbi hypothesis bound to a `(lexicon node, HMM state)` pair.
/// `frames_in_state == 0` marks a freshly created initial token that has not
/// consumed a frame yet; it lands in its state on the first frame without a
/// transition charge.
#[derive(Debug, Clone, Copy)]
struct Token {
    node: u32,
    state: u32,
    frames_in_state: u32,
    log_prob: f32,
}

/// Ranked word candidate of one expansion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordCandidate {
    pub word_id: WordId,
    /// Frames consumed from the expansion's start frame.
    pub frames: u32,
    pub log_prob: f32,
    pub avg_log_prob: f32,
}

#[derive(Debug, Clone, Copy)]
struct WordEntry {
    frames: u32,
    log_prob: f32,
    active: bool,
}

/// Options of the token pass, split out of [`DecoderConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ExpanderOptions {
    /// Live tokens kept after each frame; 0 disables the limit.
    pub token_limit: usize,
    /// Per-frame acoustic beam.
    pub beam: f32,
    /// Emit candidates only from final HMM states of terminal nodes.
    pub forced_end: bool,
    /// Kill tokens staying longer than this in one state; 0 disables.
    pub max_state_duration: u32,
    pub duration_scale: f32,
    pub transition_scale: f32,
}

impl From<&DecoderConfig> for ExpanderOptions {
    fn from(config: &DecoderConfig) -> Self {
        Self {
            token_limit: config.token_limit,
            beam: config.state_beam,
            forced_end: config.forced_end,
            max_state_duration: config.max_state_duration,
            duration_scale: config.duration_scale,
            transition_scale: config.transition_scale,
        }
    }
}

/// Time-synchronous token pass over the lexicon tree.
///
/// One `expand` call pushes tokens from the tree root through the phoneme
/// HMMs for up to `max_frames` frames, recombining per `(node, state)` and
/// recording, for every word whose terminal the pass reaches, the best-scoring
/// candidate. Candidates are ranked by average acoustic log-prob per frame.
pub struct Expander {
    hmms: Arc<Vec<Hmm>>,
    lexicon: Arc<Lexicon>,
    acoustics: Box<dyn Acoustics>,
    options: ExpanderOptions,

    tokens: Vec<Token>,
    next_tokens: Vec<Token>,
    merge: AHashMap<(u32, u32), usize>,
    words: Vec<WordEntry>,
    sorted_words: Vec<WordCandidate>,
    beam_best: f32,
}

impl Expander {
    pub fn new(
        hmms: Arc<Vec<Hmm>>,
        lexicon: Arc<Lexicon>,
        num_words: usize,
        acoustics: Box<dyn Acoustics>,
        options: ExpanderOptions,
    ) -> Self {
        Self {
            hmms,
            lexicon,
            acoustics,
            options,
            tokens: Vec::new(),
            next_tokens: Vec::new(),
            merge: AHashMap::new(),
            words: vec![
                WordEntry {
                    frames: 0,
                    log_prob: 0.0,
                    active: false,
                };
                num_words
            ],
            sorted_words: Vec::new(),
            beam_best: f32::NEG_INFINITY,
        }
    }

    pub fn options_mut(&mut self) -> &mut ExpanderOptions {
        &mut self.options
    }

    /// Word candidates of the last expansion, best average log-prob first.
    pub fn words(&self) -> &[WordCandidate] {
        &self.sorted_words
    }

    /// First frame the acoustic source could not provide, once known.
    pub fn eof_frame(&self) -> Option<u32> {
        self.acoustics.eof_frame()
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Runs the token pass from `start_frame` for at most `max_frames` frames.
    /// Stops early at acoustic EOF, keeping the candidates found so far.
    pub fn expand(&mut self, start_frame: u32, max_frames: u32) -> Result<(), DecoderError> {
        self.clear_words();
        self.create_initial_tokens();

        for rel_frame in 0..max_frames {
            if self.tokens.is_empty() {
                break;
            }
            if !self.acoustics.go_to(start_frame + rel_frame)? {
                tracing::debug!(
                    frame = start_frame + rel_frame,
                    "acoustic eof during expansion"
                );
                break;
            }
            self.step_frame(rel_frame);
        }

        self.collect_words();
        tracing::debug!(
            start_frame,
            candidates = self.sorted_words.len(),
            live_tokens = self.tokens.len(),
            "expansion done"
        );
        Ok(())
    }

    /// One token per root-child node, in a pre-entry position.
    fn create_initial_tokens(&mut self) {
        self.tokens.clear();
        for &child in &self.lexicon.node(Lexicon::ROOT).children {
            self.tokens.push(Token {
                node: child as u32,
                state: 0,
                frames_in_state: 0,
                log_prob: 0.0,
            });
        }
    }

    fn clear_words(&mut self) {
        for entry in &mut self.words {
            entry.active = false;
        }
        self.sorted_words.clear();
    }

    /// Advances every live token across one frame: propose transitions,
    /// recombine, emit words at terminals, then prune.
    fn step_frame(&mut self, rel_frame: u32) {
        self.next_tokens.clear();
        self.merge.clear();
        self.beam_best = f32::NEG_INFINITY;

        let lexicon = Arc::clone(&self.lexicon);
        let hmms = Arc::clone(&self.hmms);
        let tokens = std::mem::take(&mut self.tokens);
        for token in &tokens {
            self.propagate(&lexicon, &hmms, token);
        }
        self.tokens = tokens;

        self.emit_words(rel_frame);
        self.prune_tokens();
        std::mem::swap(&mut self.tokens, &mut self.next_tokens);
    }

    fn propagate(&mut self, lexicon: &Lexicon, hmms: &[Hmm], token: &Token) {
        let node = lexicon.node(token.node as usize);
        let hmm = &hmms[node.hmm];

        if token.frames_in_state == 0 {
            // Pre-entry token lands in its state, no transition charge.
            let log_prob = token.log_prob + self.acoustics.log_prob(hmm.states[0].model);
            self.propose(token.node, 0, 1, log_prob);
            return;
        }

        let state = &hmm.states[token.state as usize];
        let num_states = hmm.states.len();
        for transition in &state.transitions {
            let scaled_transition = self.options.transition_scale * transition.log_prob;
            if transition.target == token.state as usize {
                let log_prob = token.log_prob
                    + scaled_transition
                    + self.acoustics.log_prob(state.model);
                self.propose(token.node, token.state, token.frames_in_state + 1, log_prob);
            } else if transition.target < num_states {
                let log_prob = token.log_prob
                    + scaled_transition
                    + self.options.duration_scale * state.log_duration(token.frames_in_state)
                    + self
                        .acoustics
                        .log_prob(hmm.states[transition.target].model);
                self.propose(token.node, transition.target as u32, 1, log_prob);
            } else {
                // Exit arc: enter every child unit at its initial state.
                let base = token.log_prob
                    + scaled_transition
                    + self.options.duration_scale * state.log_duration(token.frames_in_state);
                for &child in &node.children {
                    let entry = &hmms[lexicon.node(child).hmm].states[0];
                    let log_prob = base + self.acoustics.log_prob(entry.model);
                    self.propose(child as u32, 0, 1, log_prob);
                }
            }
        }
    }

    /// Viterbi recombination: one token per `(node, state)`, best score wins,
    /// ties keep the earlier proposal.
    fn propose(&mut self, node: u32, state: u32, frames_in_state: u32, log_prob: f32) {
        if log_prob > self.beam_best {
            self.beam_best = log_prob;
        }
        let token = Token {
            node,
            state,
            frames_in_state,
            log_prob,
        };
        match self.merge.entry((node, state)) {
            std::collections::hash_map::Entry::Occupied(slot) => {
                let index = *slot.get();
                if log_prob > self.next_tokens[index].log_prob {
                    self.next_tokens[index] = token;
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(self.next_tokens.len());
                self.next_tokens.push(token);
            }
        }
    }

    /// Records a candidate for every merged token sitting in a terminal node.
    fn emit_words(&mut self, rel_frame: u32) {
        let frames = rel_frame + 1;
        for token in &self.next_tokens {
            let node = self.lexicon.node(token.node as usize);
            if node.word_ids.is_empty() {
                continue;
            }
            if self.options.forced_end
                && !self.hmms[node.hmm].is_final_state(token.state as usize)
            {
                continue;
            }
            for &word_id in &node.word_ids {
                let entry = &mut self.words[word_id as usize];
                if !entry.active || token.log_prob > entry.log_prob {
                    *entry = WordEntry {
                        frames,
                        log_prob: token.log_prob,
                        active: true,
                    };
                }
            }
        }
    }

    /// Beam, then limit, then duration cap. The cap runs last so tokens it
    /// removes from the top-`token_limit` set are not backfilled.
    fn prune_tokens(&mut self) {
        let beam_floor = self.beam_best - self.options.beam;
        self.next_tokens
            .retain(|token| token.log_prob >= beam_floor);

        let limit = self.options.token_limit;
        if limit > 0 && self.next_tokens.len() > limit {
            // Stable sort: equal scores keep proposal order.
            self.next_tokens
                .sort_by(|a, b| b.log_prob.total_cmp(&a.log_prob));
            self.next_tokens.truncate(limit);
        }

        let max_duration = self.options.max_state_duration;
        if max_duration > 0 {
            self.next_tokens
                .retain(|token| token.frames_in_state <= max_duration);
        }
    }

    /// Ranks the recorded words by average log-prob, word id breaking ties.
    fn collect_words(&mut self) {
        self.sorted_words.clear();
        for (word_id, entry) in self.words.iter().enumerate() {
            if !entry.active {
                continue;
            }
            self.sorted_words.push(WordCandidate {
                word_id: word_id as WordId,
                frames: entry.frames,
                log_prob: entry.log_prob,
                avg_log_prob: entry.log_prob / entry.frames as f32,
            });
        }
        self.sorted_words.sort_by(|a, b| {
            b.avg_log_prob
                .total_cmp(&a.avg_log_prob)
                .then(a.word_id.cmp(&b.word_id))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustics::BufferAcoustics;
    use crate::model::{HmmState, HmmTransition};
    use crate::model::Vocabulary;

    /// One-state self-looping HMM with an exit arc, emitting `model`.
    fn loop_hmm(label: &str, model: usize) -> Hmm {
        Hmm {
            label: label.to_string(),
            states: vec![HmmState {
                model,
                transitions: vec![
                    HmmTransition { target: 0, log_prob: -0.1 },
                    HmmTransition { target: 1, log_prob: -0.2 },
                ],
                duration: None,
            }],
        }
    }

    struct Fixture {
        hmms: Arc<Vec<Hmm>>,
        lexicon: Arc<Lexicon>,
        num_words: usize,
    }

    /// Vocab {CAT, CAR} over phones c/a/t/r mapped to models 0..4.
    fn cat_car() -> Fixture {
        let hmms = vec![
            loop_hmm("c", 0),
            loop_hmm("a", 1),
            loop_hmm("t", 2),
            loop_hmm("r", 3),
        ];
        let mut vocab = Vocabulary::new();
        let cat = vocab.add("CAT");
        let car = vocab.add("CAR");
        let mut lexicon = Lexicon::new();
        lexicon.add_pronunciation(&[0, 1, 2], cat);
        lexicon.add_pronunciation(&[0, 1, 3], car);
        Fixture {
            hmms: Arc::new(hmms),
            lexicon: Arc::new(lexicon),
            num_words: vocab.len(),
        }
    }

    fn options() -> ExpanderOptions {
        ExpanderOptions {
            token_limit: 0,
            beam: 1e9,
            forced_end: false,
            max_state_duration: 0,
            duration_scale: 1.0,
            transition_scale: 1.0,
        }
    }

    fn expander(fixture: &Fixture, acoustics: BufferAcoustics, options: ExpanderOptions) -> Expander {
        Expander::new(
            fixture.hmms.clone(),
            fixture.lexicon.clone(),
            fixture.num_words,
            Box::new(acoustics),
            options,
        )
    }

    /// Scores favoring c,a,a,t: model scores per frame, 4 models.
    fn cat_scores() -> Vec<f32> {
        let mut scores = Vec::new();
        for favored in [0usize, 1, 1, 2] {
            for model in 0..4 {
                scores.push(if model == favored {
                    0.0
                } else if model == 3 && favored == 2 {
                    -2.0 // "r" loses to "t" by 2 at the last frame
                } else {
                    -10.0
                });
            }
        }
        scores
    }

    #[test]
    fn favored_word_ranks_first() {
        let fixture = cat_car();
        let mut exp = expander(&fixture, BufferAcoustics::new(4, cat_scores()), options());
        exp.expand(0, 4).unwrap();
        let words = exp.words();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].word_id, 0); // CAT
        assert_eq!(words[1].word_id, 1); // CAR
        assert_eq!(words[0].frames, 4);
        let delta = words[0].log_prob - words[1].log_prob;
        assert!((delta - 2.0).abs() < 1e-4, "delta {delta}");
    }

    #[test]
    fn no_two_tokens_share_a_position() {
        let fixture = cat_car();
        let mut exp = expander(&fixture, BufferAcoustics::new(4, cat_scores()), options());
        exp.expand(0, 4).unwrap();
        let mut positions = std::collections::HashSet::new();
        for token in &exp.tokens {
            assert!(
                positions.insert((token.node, token.state)),
                "duplicate token at node {} state {}",
                token.node,
                token.state
            );
        }
    }

    #[test]
    fn wider_beam_keeps_every_narrow_beam_candidate() {
        let fixture = cat_car();
        let narrow = {
            let mut exp = expander(
                &fixture,
                BufferAcoustics::new(4, cat_scores()),
                ExpanderOptions { beam: 6.0, ..options() },
            );
            exp.expand(0, 4).unwrap();
            exp.words().to_vec()
        };
        let wide = {
            let mut exp = expander(
                &fixture,
                BufferAcoustics::new(4, cat_scores()),
                ExpanderOptions { beam: 60.0, ..options() },
            );
            exp.expand(0, 4).unwrap();
            exp.words().to_vec()
        };
        for candidate in &narrow {
            assert!(
                wide.iter().any(|w| w.word_id == candidate.word_id
                    && (w.log_prob - candidate.log_prob).abs() < 1e-4),
                "word {} lost under the wider beam",
                candidate.word_id
            );
        }
    }

    #[test]
    fn forced_end_requires_final_state() {
        // Two-state "c a" style unit where state 0 has no exit arc.
        let hmm = Hmm {
            label: "x".to_string(),
            states: vec![
                HmmState {
                    model: 0,
                    transitions: vec![
                        HmmTransition { target: 0, log_prob: -0.1 },
                        HmmTransition { target: 1, log_prob: -0.2 },
                    ],
                    duration: None,
                },
                HmmState {
                    model: 1,
                    transitions: vec![
                        HmmTransition { target: 1, log_prob: -0.1 },
                        HmmTransition { target: 2, log_prob: -0.2 },
                    ],
                    duration: None,
                },
            ],
        };
        let mut vocab = Vocabulary::new();
        let x = vocab.add("X");
        let mut lexicon = Lexicon::new();
        lexicon.add_pronunciation(&[0], x);
        let fixture = Fixture {
            hmms: Arc::new(vec![hmm]),
            lexicon: Arc::new(lexicon),
            num_words: vocab.len(),
        };

        // One frame: the token only reaches state 0, not the final state.
        let scores = vec![0.0f32, 0.0];
        let mut exp = expander(
            &fixture,
            BufferAcoustics::new(2, scores.clone()),
            ExpanderOptions { forced_end: true, ..options() },
        );
        exp.expand(0, 1).unwrap();
        assert!(exp.words().is_empty());

        // Without forced_end the same pass emits the word.
        let mut exp = expander(
            &fixture,
            BufferAcoustics::new(2, scores),
            ExpanderOptions { forced_end: false, ..options() },
        );
        exp.expand(0, 1).unwrap();
        assert_eq!(exp.words().len(), 1);
    }

    #[test]
    fn token_limit_keeps_best() {
        let fixture = cat_car();
        let mut exp = expander(
            &fixture,
            BufferAcoustics::new(4, cat_scores()),
            ExpanderOptions { token_limit: 1, ..options() },
        );
        exp.expand(0, 4).unwrap();
        assert!(exp.num_tokens() <= 1);
        // The favored path still surfaces its word.
        assert!(exp.words().iter().any(|w| w.word_id == 0));
    }

    #[test]
    fn max_state_duration_kills_stayers() {
        let fixture = cat_car();
        let mut exp = expander(
            &fixture,
            BufferAcoustics::new(4, vec![0.0; 16]),
            ExpanderOptions { max_state_duration: 2, ..options() },
        );
        exp.expand(0, 4).unwrap();
        for token in &exp.tokens {
            assert!(token.frames_in_state <= 2);
        }
    }

    #[test]
    fn duration_cap_after_limit_does_not_backfill() {
        // Uniform scores; transitions self -0.1, exit -0.2. After frame 2 the
        // proposals are c(-0.2, 3 frames in state), a(-0.3, 1), t(-0.4, 1),
        // r(-0.4, 1). The limit keeps {c, a}; the duration cap then kills c,
        // leaving a alone. Capping before the limit would keep {a, t} instead.
        let fixture = cat_car();
        let mut exp = expander(
            &fixture,
            BufferAcoustics::new(4, vec![0.0; 12]),
            ExpanderOptions {
                token_limit: 2,
                max_state_duration: 2,
                ..options()
            },
        );
        exp.expand(0, 3).unwrap();
        assert_eq!(exp.num_tokens(), 1);
        let survivor = &exp.tokens[0];
        // Lexicon nodes: root 0, then c, a, t, r in insertion order.
        assert_eq!(survivor.node, 2);
        assert_eq!(survivor.frames_in_state, 1);
        assert!((survivor.log_prob - -0.3).abs() < 1e-5);
    }

    #[test]
    fn eof_stops_expansion_with_partial_output() {
        let fixture = cat_car();
        // Only 2 frames of scores, but ask for 10.
        let scores: Vec<f32> = cat_scores().into_iter().take(8).collect();
        let mut exp = expander(&fixture, BufferAcoustics::new(4, scores), options());
        exp.expand(0, 10).unwrap();
        assert_eq!(exp.eof_frame(), Some(2));
        for word in exp.words() {
            assert!(word.frames <= 2);
        }
    }

    #[test]
    fn expansion_is_deterministic() {
        let fixture = cat_car();
        let run = || {
            let mut exp = expander(&fixture, BufferAcoustics::new(4, cat_scores()), options());
            exp.expand(0, 4).unwrap();
            exp.words().to_vec()
        };
        assert_eq!(run(), run());
    }
}
