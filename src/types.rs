/// Index into the [`Vocabulary`](crate::model::Vocabulary).
pub type WordId = u32;

/// One word of a reported hypothesis, with its entry frame and score split.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedWord {
    pub word: String,
    pub word_id: WordId,
    /// Frame at which this word begins.
    pub frame: u32,
    pub lm_log_prob: f32,
    pub ac_log_prob: f32,
}

/// A complete decoded hypothesis: the word sequence ending at `frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub log_prob: f32,
    /// Frame at which the hypothesis ends (where the next word would begin).
    pub frame: u32,
    pub words: Vec<RecognizedWord>,
}
