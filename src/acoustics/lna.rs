use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::acoustics::Acoustics;
use crate::error::DecoderError;

/// Quantization scale of the 8-bit LNA stream: `log_prob = -(byte + 0.5) / LNA_SCALE`.
pub const LNA_SCALE: f32 = 24.0;

const FLAG_CONTINUATION: u8 = 0x00;
const FLAG_END: u8 = 0x80;

/// Streaming reader of frame-wise quantized acoustic log-likelihoods.
///
/// Each frame is one flag byte (0x00, or 0x80 on the last frame of the
/// utterance) followed by `num_models` quantized score bytes. The reader
/// keeps a circular window of the last `retain` decoded frames so that the
/// Expander can re-read recent frames even when the source is a pipe;
/// rewinding past the window is a [`DecoderError::ForgottenFrame`].
pub struct LnaReader<R> {
    reader: R,
    num_models: usize,
    retain: usize,
    ring: Vec<f32>,
    /// Next frame to decode; frames `[decoded - retain, decoded)` are in the ring.
    decoded: u32,
    current_row: usize,
    eof_frame: Option<u32>,
    frame_buf: Vec<u8>,
}

impl LnaReader<BufReader<File>> {
    pub fn open(path: &Path, num_models: usize, retain: usize) -> Result<Self, DecoderError> {
        let file = File::open(path).map_err(|e| DecoderError::open("open lna file", e))?;
        Ok(Self::new(BufReader::new(file), num_models, retain))
    }
}

impl<R: Read> LnaReader<R> {
    pub fn new(reader: R, num_models: usize, retain: usize) -> Self {
        assert!(num_models > 0, "lna stream needs at least one model");
        let retain = retain.max(1);
        Self {
            reader,
            num_models,
            retain,
            ring: vec![0.0; retain * num_models],
            decoded: 0,
            current_row: 0,
            eof_frame: None,
            frame_buf: vec![0; 1 + num_models],
        }
    }

    fn first_retained(&self) -> u32 {
        self.decoded.saturating_sub(self.retain as u32)
    }

    /// Decode the next frame into the ring. Returns false on end of input.
    fn decode_next(&mut self) -> Result<bool, DecoderError> {
        if self.eof_frame.is_some() {
            return Ok(false);
        }
        match self.reader.read_exact(&mut self.frame_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.eof_frame = Some(self.decoded);
                tracing::debug!(eof_frame = self.decoded, "lna stream ended");
                return Ok(false);
            }
            Err(e) => return Err(DecoderError::open("read lna frame", e)),
        }
        let flag = self.frame_buf[0];
        if flag != FLAG_CONTINUATION && flag != FLAG_END {
            return Err(DecoderError::parse(
                "lna stream",
                self.decoded as usize,
                format!("unexpected frame flag 0x{flag:02x}"),
            ));
        }
        let row = (self.decoded as usize % self.retain) * self.num_models;
        for (slot, &byte) in self.ring[row..row + self.num_models]
            .iter_mut()
            .zip(&self.frame_buf[1..])
        {
            *slot = -((byte as f32) + 0.5) / LNA_SCALE;
        }
        self.decoded += 1;
        if flag == FLAG_END {
            self.eof_frame = Some(self.decoded);
            tracing::debug!(eof_frame = self.decoded, "lna end-of-utterance flag");
        }
        Ok(true)
    }
}

impl<R: Read> Acoustics for LnaReader<R> {
    fn go_to(&mut self, frame: u32) -> Result<bool, DecoderError> {
        if let Some(eof) = self.eof_frame {
            if frame >= eof {
                return Ok(false);
            }
        }
        if frame < self.first_retained() {
            return Err(DecoderError::ForgottenFrame {
                frame,
                first_frame: self.first_retained(),
            });
        }
        while self.decoded <= frame {
            if !self.decode_next()? {
                return Ok(false);
            }
        }
        self.current_row = frame as usize % self.retain;
        Ok(true)
    }

    fn log_prob(&self, model: usize) -> f32 {
        self.ring[self.current_row * self.num_models + model]
    }

    fn eof_frame(&self) -> Option<u32> {
        self.eof_frame
    }

    fn num_models(&self) -> usize {
        self.num_models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(frames: &[(u8, &[u8])]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (flag, scores) in frames {
            bytes.push(*flag);
            bytes.extend_from_slice(scores);
        }
        bytes
    }

    #[test]
    fn decodes_quantized_scores() {
        let bytes = stream(&[(0x00, &[0, 24]), (0x00, &[48, 240])]);
        let mut lna = LnaReader::new(bytes.as_slice(), 2, 4);
        assert!(lna.go_to(0).unwrap());
        assert!((lna.log_prob(0) - (-0.5 / 24.0)).abs() < 1e-6);
        assert!((lna.log_prob(1) - (-24.5 / 24.0)).abs() < 1e-6);
        assert!(lna.go_to(1).unwrap());
        assert!((lna.log_prob(0) - (-48.5 / 24.0)).abs() < 1e-6);
    }

    #[test]
    fn end_flag_sets_eof() {
        let bytes = stream(&[(0x00, &[1]), (0x80, &[2])]);
        let mut lna = LnaReader::new(bytes.as_slice(), 1, 4);
        assert!(lna.go_to(1).unwrap());
        assert_eq!(lna.eof_frame(), Some(2));
        assert!(!lna.go_to(2).unwrap());
    }

    #[test]
    fn truncated_stream_is_eof() {
        let bytes = stream(&[(0x00, &[1])]);
        let mut lna = LnaReader::new(bytes.as_slice(), 1, 4);
        assert!(!lna.go_to(5).unwrap());
        assert_eq!(lna.eof_frame(), Some(1));
    }

    #[test]
    fn rewind_within_window_and_past_it() {
        let frames: Vec<(u8, Vec<u8>)> = (0..8u8).map(|i| (0x00, vec![i])).collect();
        let refs: Vec<(u8, &[u8])> = frames.iter().map(|(f, s)| (*f, s.as_slice())).collect();
        let bytes = stream(&refs);
        let mut lna = LnaReader::new(bytes.as_slice(), 1, 3);
        assert!(lna.go_to(5).unwrap());
        // frames 3..6 retained
        assert!(lna.go_to(3).unwrap());
        assert!((lna.log_prob(0) - (-3.5 / 24.0)).abs() < 1e-6);
        assert!(matches!(
            lna.go_to(2),
            Err(DecoderError::ForgottenFrame { frame: 2, .. })
        ));
    }

    #[test]
    fn bad_flag_is_parse_error() {
        let bytes = stream(&[(0x42, &[1])]);
        let mut lna = LnaReader::new(bytes.as_slice(), 1, 4);
        assert!(matches!(lna.go_to(0), Err(DecoderError::Parse { .. })));
    }
}
