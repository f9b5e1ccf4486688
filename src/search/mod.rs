mod decoder;
mod expander;
mod path;
mod stack;

pub use decoder::{Search, SearchOptions, SearchStats};
pub use expander::{Expander, ExpanderOptions, WordCandidate};
pub use path::{PathArena, PathId, PathNode};
pub use stack::{Hypo, HypoStack};
