use std::io::BufRead;

use ahash::AHashMap;

use crate::error::DecoderError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmTransition {
    /// Destination state index; `states.len()` encodes the exit arc out of the unit.
    pub target: usize,
    pub log_prob: f32,
}

#[derive(Debug, Clone)]
pub struct HmmState {
    /// Emission model id into the acoustic source.
    pub model: usize,
    pub transitions: Vec<HmmTransition>,
    /// `duration[k]` is the log-probability of staying exactly `k + 1` frames.
    pub duration: Option<Vec<f32>>,
}

impl HmmState {
    /// Duration log-prob for leaving after `frames` frames; the table tail is flat.
    pub fn log_duration(&self, frames: u32) -> f32 {
        match &self.duration {
            Some(d) if !d.is_empty() => {
                let k = (frames.max(1) as usize - 1).min(d.len() - 1);
                d[k]
            }
            _ => 0.0,
        }
    }
}

/// Phoneme unit: an ordered set of states, immutable after load.
#[derive(Debug, Clone)]
pub struct Hmm {
    pub label: String,
    pub states: Vec<HmmState>,
}

impl Hmm {
    /// A final state is one with an exit arc out of the unit.
    pub fn is_final_state(&self, state: usize) -> bool {
        let exit = self.states.len();
        self.states[state].transitions.iter().any(|t| t.target == exit)
    }
}

/// Reads an HMM inventory from the text format:
///
/// ```text
/// <num_hmms>
/// <label> <num_states>
/// <model> <num_transitions> { <target> <log_prob> }... [d <log_d1> <log_d2> ...]
/// ...one line per state...
/// ```
///
/// Returns the inventory plus a label -> index map for the lexicon reader.
pub fn read_hmms<R: BufRead>(
    reader: R,
    file: &str,
) -> Result<(Vec<Hmm>, AHashMap<String, usize>), DecoderError> {
    let mut lines = reader.lines().enumerate();
    let mut next_line = |ctx: &str| -> Result<(usize, String), DecoderError> {
        loop {
            match lines.next() {
                Some((i, Ok(line))) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    return Ok((i + 1, line));
                }
                Some((i, Err(_))) => {
                    return Err(DecoderError::parse(file, i + 1, "unreadable line"));
                }
                None => return Err(DecoderError::parse(file, 0, format!("expected {ctx}"))),
            }
        }
    };

    let (line_no, header) = next_line("hmm count")?;
    let num_hmms: usize = header
        .trim()
        .parse()
        .map_err(|_| DecoderError::parse(file, line_no, "expected hmm count"))?;

    let mut hmms = Vec::with_capacity(num_hmms);
    let mut map = AHashMap::with_capacity(num_hmms);
    for _ in 0..num_hmms {
        let (line_no, line) = next_line("hmm header")?;
        let mut fields = line.split_whitespace();
        let label = fields
            .next()
            .ok_or_else(|| DecoderError::parse(file, line_no, "missing hmm label"))?
            .to_string();
        let num_states: usize = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecoderError::parse(file, line_no, "missing state count"))?;
        if num_states == 0 {
            return Err(DecoderError::parse(file, line_no, "hmm with zero states"));
        }

        let mut states = Vec::with_capacity(num_states);
        for _ in 0..num_states {
            let (line_no, line) = next_line("hmm state")?;
            states.push(parse_state(&line, num_states, file, line_no)?);
        }

        if map.insert(label.clone(), hmms.len()).is_some() {
            return Err(DecoderError::parse(
                file,
                line_no,
                format!("duplicate hmm label {label}"),
            ));
        }
        hmms.push(Hmm { label, states });
    }
    Ok((hmms, map))
}

fn parse_state(
    line: &str,
    num_states: usize,
    file: &str,
    line_no: usize,
) -> Result<HmmState, DecoderError> {
    let mut fields = line.split_whitespace();
    let err = |msg: &str| DecoderError::parse(file, line_no, msg);

    let model: usize = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| err("missing emission model id"))?;
    let num_transitions: usize = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| err("missing transition count"))?;

    let mut transitions = Vec::with_capacity(num_transitions);
    for _ in 0..num_transitions {
        let target: usize = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| err("missing transition target"))?;
        if target > num_states {
            return Err(err(&format!("transition target {target} out of range")));
        }
        let log_prob: f32 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| err("missing transition log-prob"))?;
        transitions.push(HmmTransition { target, log_prob });
    }

    let duration = match fields.next() {
        None => None,
        Some("d") => {
            let values: Result<Vec<f32>, _> = fields.map(str::parse).collect();
            let values = values.map_err(|_| err("bad duration value"))?;
            if values.is_empty() {
                return Err(err("empty duration table"));
            }
            Some(values)
        }
        Some(extra) => return Err(err(&format!("unexpected field {extra}"))),
    };

    Ok(HmmState {
        model,
        transitions,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = "\
2
a 2
0 2 0 -0.3 1 -1.2
1 2 1 -0.5 2 -0.9 d -0.1 -0.4
b 1
2 2 0 -0.7 1 -0.7
";

    #[test]
    fn reads_inventory_and_label_map() {
        let (hmms, map) = read_hmms(INVENTORY.as_bytes(), "test.hmm").unwrap();
        assert_eq!(hmms.len(), 2);
        assert_eq!(map["a"], 0);
        assert_eq!(map["b"], 1);

        let a = &hmms[0];
        assert_eq!(a.states.len(), 2);
        assert_eq!(a.states[0].model, 0);
        assert_eq!(
            a.states[0].transitions,
            vec![
                HmmTransition { target: 0, log_prob: -0.3 },
                HmmTransition { target: 1, log_prob: -1.2 },
            ]
        );
        assert!(!a.is_final_state(0));
        assert!(a.is_final_state(1));
        assert!(hmms[1].is_final_state(0));
    }

    #[test]
    fn duration_table_clamps_at_tail() {
        let (hmms, _) = read_hmms(INVENTORY.as_bytes(), "test.hmm").unwrap();
        let state = &hmms[0].states[1];
        assert_eq!(state.log_duration(1), -0.1);
        assert_eq!(state.log_duration(2), -0.4);
        assert_eq!(state.log_duration(9), -0.4);
        assert_eq!(hmms[0].states[0].log_duration(3), 0.0);
    }

    #[test]
    fn out_of_range_target_rejected() {
        let bad = "1\na 1\n0 1 2 -0.5\n";
        let err = read_hmms(bad.as_bytes(), "bad.hmm").unwrap_err();
        assert!(matches!(err, DecoderError::Parse { line: 3, .. }));
    }

    #[test]
    fn truncated_file_rejected() {
        let bad = "2\na 1\n0 1 1 -0.5\n";
        assert!(read_hmms(bad.as_bytes(), "bad.hmm").is_err());
    }
}
