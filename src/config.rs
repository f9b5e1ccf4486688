use std::path::Path;

use crate::error::DecoderError;

/// All tunable decoder options in one value.
///
/// Limits (`token_limit`, `hypo_limit`, `word_limit`, `max_state_duration`,
/// `prune_similar`) treat 0 as "disabled". Beams are log-prob distances from
/// the running best; anything scoring further below is pruned.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DecoderConfig {
    /// Maximum live tokens kept after each Expander frame.
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    /// Per-frame acoustic beam inside the Expander.
    #[serde(default = "default_beam")]
    pub state_beam: f32,
    /// Emit word candidates only from final HMM states of terminal nodes.
    #[serde(default)]
    pub forced_end: bool,
    /// Kill tokens that stay longer than this in one HMM state.
    #[serde(default = "default_max_state_duration")]
    pub max_state_duration: u32,
    #[serde(default = "default_scale")]
    pub duration_scale: f32,
    #[serde(default = "default_scale")]
    pub transition_scale: f32,
    /// Hypotheses retained per stack after pruning.
    #[serde(default = "default_hypo_limit")]
    pub hypo_limit: usize,
    /// Word candidates expanded per stack.
    #[serde(default = "default_word_limit")]
    pub word_limit: usize,
    /// Beam on the Expander's average acoustic log-prob.
    #[serde(default = "default_beam")]
    pub word_beam: f32,
    #[serde(default = "default_scale")]
    pub lm_scale: f32,
    #[serde(default)]
    pub lm_offset: f32,
    /// Log-prob charged for words the language model does not know.
    #[serde(default)]
    pub unk_offset: f32,
    /// Drop hypotheses whose last N words duplicate a better one; 0 disables.
    #[serde(default)]
    pub prune_similar: usize,
    /// Per-stack score beam relative to the stack's best hypothesis.
    #[serde(default = "default_beam")]
    pub hypo_beam: f32,
    /// Across-frame score beam relative to the best recent hypothesis.
    #[serde(default = "default_beam")]
    pub global_beam: f32,
    /// Stack window length; also the maximum frames per expanded word.
    #[serde(default = "default_expand_window")]
    pub expand_window: usize,
    /// Default last frame of a run; `recognize_segment` overrides it.
    #[serde(default)]
    pub end_frame: Option<u32>,
    /// Vocabulary word inserted between consecutive words in the LM context.
    #[serde(default)]
    pub word_boundary: Option<String>,
    /// Ignore word boundaries when comparing endings in prune_similar.
    #[serde(default)]
    pub dummy_word_boundaries: bool,
    #[serde(default)]
    pub verbose: u32,
    #[serde(default)]
    pub print_probs: bool,
    #[serde(default)]
    pub print_indices: bool,
    #[serde(default)]
    pub print_frames: bool,
    /// Report every hypothesis surviving at the final stack, not just the best.
    #[serde(default)]
    pub multiple_endings: bool,
}

fn default_token_limit() -> usize {
    10_000
}
fn default_beam() -> f32 {
    1e9
}
fn default_max_state_duration() -> u32 {
    80
}
fn default_scale() -> f32 {
    1.0
}
fn default_hypo_limit() -> usize {
    1_000
}
fn default_word_limit() -> usize {
    50
}
fn default_expand_window() -> usize {
    100
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            state_beam: default_beam(),
            forced_end: false,
            max_state_duration: default_max_state_duration(),
            duration_scale: default_scale(),
            transition_scale: default_scale(),
            hypo_limit: default_hypo_limit(),
            word_limit: default_word_limit(),
            word_beam: default_beam(),
            lm_scale: default_scale(),
            lm_offset: 0.0,
            unk_offset: 0.0,
            prune_similar: 0,
            hypo_beam: default_beam(),
            global_beam: default_beam(),
            expand_window: default_expand_window(),
            end_frame: None,
            word_boundary: None,
            dummy_word_boundaries: false,
            verbose: 0,
            print_probs: false,
            print_indices: false,
            print_frames: false,
            multiple_endings: false,
        }
    }
}

impl DecoderConfig {
    pub fn load(path: &Path) -> Result<Self, DecoderError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DecoderError::open("read decoder config", e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| DecoderError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DecoderError> {
        if self.expand_window < 1 {
            return Err(DecoderError::config("expand_window must be at least 1"));
        }
        for (name, beam) in [
            ("state_beam", self.state_beam),
            ("word_beam", self.word_beam),
            ("hypo_beam", self.hypo_beam),
            ("global_beam", self.global_beam),
        ] {
            if !beam.is_finite() || beam < 0.0 {
                return Err(DecoderError::config(format!(
                    "{name} must be finite and non-negative, got {beam}"
                )));
            }
        }
        if !self.lm_scale.is_finite() || !self.lm_offset.is_finite() || !self.unk_offset.is_finite()
        {
            return Err(DecoderError::config(
                "lm_scale, lm_offset and unk_offset must be finite",
            ));
        }
        if !self.duration_scale.is_finite() || !self.transition_scale.is_finite() {
            return Err(DecoderError::config(
                "duration_scale and transition_scale must be finite",
            ));
        }
        Ok(())
    }
}
