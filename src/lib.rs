pub mod acoustics;
pub mod config;
pub mod error;
pub mod lm;
pub mod model;
pub mod search;
pub mod types;

pub use acoustics::{Acoustics, BufferAcoustics, LnaReader};
pub use config::DecoderConfig;
pub use error::DecoderError;
pub use lm::{ArpaNgram, LanguageModel};
pub use model::{read_hmms, read_lexicon, Hmm, Lexicon, Vocabulary};
pub use search::{Expander, ExpanderOptions, Search};
pub use types::{Recognition, RecognizedWord, WordId};
