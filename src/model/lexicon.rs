use std::io::BufRead;

use ahash::AHashMap;

use crate::error::DecoderError;
use crate::model::vocabulary::Vocabulary;
use crate::types::WordId;

/// Node in the pronunciation prefix tree. A node with word ids is terminal;
/// homographs and shared pronunciations share the same terminal.
#[derive(Debug, Clone)]
pub struct LexiconNode {
    /// Index into the HMM inventory. Unused on the root.
    pub hmm: usize,
    pub children: Vec<usize>,
    pub word_ids: Vec<WordId>,
}

/// Prefix tree of pronunciations; node 0 is the root, immutable during search.
#[derive(Debug, Clone)]
pub struct Lexicon {
    nodes: Vec<LexiconNode>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexicon {
    pub fn new() -> Self {
        Self {
            nodes: vec![LexiconNode {
                hmm: usize::MAX,
                children: Vec::new(),
                word_ids: Vec::new(),
            }],
        }
    }

    pub const ROOT: usize = 0;

    pub fn node(&self, index: usize) -> &LexiconNode {
        &self.nodes[index]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Adds one pronunciation (a path of HMM indices) for `word`, sharing
    /// existing prefixes.
    pub fn add_pronunciation(&mut self, hmms: &[usize], word: WordId) {
        debug_assert!(!hmms.is_empty(), "empty pronunciation");
        let mut at = Self::ROOT;
        for &hmm in hmms {
            at = match self.nodes[at].children.iter().find(|&&c| self.nodes[c].hmm == hmm) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(LexiconNode {
                        hmm,
                        children: Vec::new(),
                        word_ids: Vec::new(),
                    });
                    self.nodes[at].children.push(child);
                    child
                }
            };
        }
        if !self.nodes[at].word_ids.contains(&word) {
            self.nodes[at].word_ids.push(word);
        }
    }
}

/// Reads a lexicon from `WORD phone phone ...` lines (comments start with `#`).
/// Phone labels resolve through the HMM label map; words are interned into
/// `vocabulary` in file order.
pub fn read_lexicon<R: BufRead>(
    reader: R,
    file: &str,
    hmm_map: &AHashMap<String, usize>,
    vocabulary: &mut Vocabulary,
) -> Result<Lexicon, DecoderError> {
    let mut lexicon = Lexicon::new();
    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line.map_err(|_| DecoderError::parse(file, line_no, "unreadable line"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let Some(word) = fields.next() else {
            continue;
        };
        let mut pronunciation = Vec::new();
        for phone in fields {
            let &hmm = hmm_map.get(phone).ok_or_else(|| {
                DecoderError::parse(file, line_no, format!("unknown phone {phone}"))
            })?;
            pronunciation.push(hmm);
        }
        if pronunciation.is_empty() {
            return Err(DecoderError::parse(
                file,
                line_no,
                format!("word {word} has no pronunciation"),
            ));
        }
        let word_id = vocabulary.add(word);
        lexicon.add_pronunciation(&pronunciation, word_id);
    }
    Ok(lexicon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hmm_map(labels: &[&str]) -> AHashMap<String, usize> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.to_string(), i))
            .collect()
    }

    #[test]
    fn shares_prefixes() {
        let map = hmm_map(&["c", "a", "t", "r"]);
        let input = "CAT c a t\nCAR c a r\n";
        let mut vocab = Vocabulary::new();
        let lexicon = read_lexicon(input.as_bytes(), "lex", &map, &mut vocab).unwrap();

        // root + shared c, a + two leaves
        assert_eq!(lexicon.num_nodes(), 5);
        let root = lexicon.node(Lexicon::ROOT);
        assert_eq!(root.children.len(), 1);
        let c = lexicon.node(root.children[0]);
        let a = lexicon.node(c.children[0]);
        assert_eq!(a.children.len(), 2);
        assert_eq!(vocab.id("CAT"), Some(0));
        assert_eq!(vocab.id("CAR"), Some(1));
    }

    #[test]
    fn prefix_word_is_terminal_with_children() {
        let map = hmm_map(&["c", "a", "r", "t"]);
        let input = "CAR c a r\nCART c a r t\n";
        let mut vocab = Vocabulary::new();
        let lexicon = read_lexicon(input.as_bytes(), "lex", &map, &mut vocab).unwrap();

        let root = lexicon.node(Lexicon::ROOT);
        let c = lexicon.node(root.children[0]);
        let a = lexicon.node(c.children[0]);
        let r = lexicon.node(a.children[0]);
        assert_eq!(r.word_ids, vec![0]);
        assert_eq!(r.children.len(), 1);
        assert_eq!(lexicon.node(r.children[0]).word_ids, vec![1]);
    }

    #[test]
    fn homographs_share_a_terminal() {
        let map = hmm_map(&["r", "e", "d"]);
        let input = "RED r e d\nREAD r e d\n";
        let mut vocab = Vocabulary::new();
        let lexicon = read_lexicon(input.as_bytes(), "lex", &map, &mut vocab).unwrap();
        let root = lexicon.node(Lexicon::ROOT);
        let r = lexicon.node(root.children[0]);
        let e = lexicon.node(r.children[0]);
        let d = lexicon.node(e.children[0]);
        assert_eq!(d.word_ids, vec![0, 1]);
    }

    #[test]
    fn unknown_phone_rejected() {
        let map = hmm_map(&["a"]);
        let mut vocab = Vocabulary::new();
        let err = read_lexicon("HI h i\n".as_bytes(), "lex", &map, &mut vocab).unwrap_err();
        assert!(matches!(err, DecoderError::Parse { line: 1, .. }));
    }
}
