use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;

use crate::error::DecoderError;
use crate::lm::LanguageModel;

const LN10: f32 = std::f32::consts::LN_10;
/// Natural-log score of an n-gram absent even as a unigram.
const LOG_FLOOR: f32 = -99.0 * LN10;

#[derive(Debug, Clone, Copy)]
struct Entry {
    log_prob: f32,
    backoff: f32,
}

/// Back-off n-gram model loaded from the ARPA text format.
///
/// Probabilities and back-off weights are converted to natural log at load.
/// Lookups back off through shorter contexts, accumulating the back-off
/// weight of each dropped context.
pub struct ArpaNgram {
    words: Vec<String>,
    ids: AHashMap<String, usize>,
    /// `grams[n - 1]` maps `(context..., word)` tuples of length n.
    grams: Vec<AHashMap<Box<[usize]>, Entry>>,
}

impl ArpaNgram {
    pub fn open(path: &Path) -> Result<Self, DecoderError> {
        let file = File::open(path).map_err(|e| DecoderError::open("open arpa model", e))?;
        read_arpa(BufReader::new(file), &path.to_string_lossy())
    }

    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    fn lookup(&self, key: &[usize]) -> Option<Entry> {
        self.grams.get(key.len() - 1)?.get(key).copied()
    }
}

impl LanguageModel for ArpaNgram {
    fn order(&self) -> usize {
        self.grams.len()
    }

    fn id(&self, word: &str) -> Option<usize> {
        self.ids.get(word).copied()
    }

    fn log_prob(&self, context: &[usize], word: usize) -> f32 {
        let max_context = self.order().saturating_sub(1).min(context.len());
        let mut context = &context[context.len() - max_context..];
        let mut backed_off = 0.0f32;
        let mut key = Vec::with_capacity(context.len() + 1);
        loop {
            key.clear();
            key.extend_from_slice(context);
            key.push(word);
            if let Some(entry) = self.lookup(&key) {
                return backed_off + entry.log_prob;
            }
            if context.is_empty() {
                return backed_off + LOG_FLOOR;
            }
            backed_off += self.lookup(context).map(|e| e.backoff).unwrap_or(0.0);
            context = &context[1..];
        }
    }
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Data,
    Grams(usize),
}

/// Parses an ARPA model: `\data\` header with `ngram N=count` lines, then a
/// `\N-grams:` section per order with `log10_prob word... [log10_backoff]`
/// rows, terminated by `\end\`.
pub fn read_arpa<R: BufRead>(reader: R, file: &str) -> Result<ArpaNgram, DecoderError> {
    let mut words: Vec<String> = Vec::new();
    let mut ids: AHashMap<String, usize> = AHashMap::new();
    let mut grams: Vec<AHashMap<Box<[usize]>, Entry>> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut section = Section::Preamble;
    let mut saw_end = false;

    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line.map_err(|_| DecoderError::parse(file, line_no, "unreadable line"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(marker) = trimmed.strip_prefix('\\') {
            if marker == "data\\" {
                section = Section::Data;
            } else if marker == "end\\" {
                saw_end = true;
                break;
            } else if let Some(order) = marker
                .strip_suffix("-grams:")
                .and_then(|n| n.parse::<usize>().ok())
            {
                if order == 0 || order != grams.len() + 1 {
                    return Err(DecoderError::parse(
                        file,
                        line_no,
                        format!("unexpected {order}-gram section"),
                    ));
                }
                grams.push(AHashMap::with_capacity(
                    counts.get(order - 1).copied().unwrap_or(0),
                ));
                section = Section::Grams(order);
            } else if matches!(section, Section::Preamble) {
                continue;
            } else {
                return Err(DecoderError::parse(
                    file,
                    line_no,
                    format!("unknown section marker {trimmed}"),
                ));
            }
            continue;
        }

        match section {
            Section::Preamble => {}
            Section::Data => {
                let spec = trimmed
                    .strip_prefix("ngram ")
                    .and_then(|rest| rest.split_once('='))
                    .and_then(|(n, c)| Some((n.trim().parse::<usize>().ok()?, c.trim().parse::<usize>().ok()?)));
                let (order, count) = spec.ok_or_else(|| {
                    DecoderError::parse(file, line_no, "expected `ngram N=count`")
                })?;
                if order != counts.len() + 1 {
                    return Err(DecoderError::parse(file, line_no, "ngram counts out of order"));
                }
                counts.push(count);
            }
            Section::Grams(order) => {
                parse_gram_line(
                    trimmed, order, file, line_no, &mut words, &mut ids, &mut grams,
                )?;
            }
        }
    }

    if !saw_end {
        return Err(DecoderError::parse(file, 0, "missing \\end\\ marker"));
    }
    if grams.is_empty() || grams[0].is_empty() {
        return Err(DecoderError::parse(file, 0, "model has no unigrams"));
    }
    Ok(ArpaNgram { words, ids, grams })
}

#[allow(clippy::too_many_arguments)]
fn parse_gram_line(
    line: &str,
    order: usize,
    file: &str,
    line_no: usize,
    words: &mut Vec<String>,
    ids: &mut AHashMap<String, usize>,
    grams: &mut [AHashMap<Box<[usize]>, Entry>],
) -> Result<(), DecoderError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let err = |msg: String| DecoderError::parse(file, line_no, msg);
    if fields.len() != order + 1 && fields.len() != order + 2 {
        return Err(err(format!(
            "expected {} or {} fields in {order}-gram row, got {}",
            order + 1,
            order + 2,
            fields.len()
        )));
    }

    let log_prob: f32 = fields[0]
        .parse::<f32>()
        .map_err(|_| err(format!("bad log-prob {}", fields[0])))?
        * LN10;
    let backoff: f32 = if fields.len() == order + 2 {
        fields[order + 1]
            .parse::<f32>()
            .map_err(|_| err(format!("bad back-off {}", fields[order + 1])))?
            * LN10
    } else {
        0.0
    };

    let mut key = Vec::with_capacity(order);
    for &token in &fields[1..=order] {
        let id = if order == 1 {
            *ids.entry(token.to_string()).or_insert_with(|| {
                words.push(token.to_string());
                words.len() - 1
            })
        } else {
            ids.get(token)
                .copied()
                .ok_or_else(|| err(format!("word {token} has no unigram")))?
        };
        key.push(id);
    }
    grams[order - 1].insert(key.into_boxed_slice(), Entry { log_prob, backoff });
    Ok(())
}
