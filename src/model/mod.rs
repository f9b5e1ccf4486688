pub mod hmm;
pub mod lexicon;
pub mod vocabulary;

pub use hmm::{read_hmms, Hmm, HmmState, HmmTransition};
pub use lexicon::{read_lexicon, Lexicon, LexiconNode};
pub use vocabulary::Vocabulary;
