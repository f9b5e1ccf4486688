mod lna;

pub use lna::{LnaReader, LNA_SCALE};

use crate::error::DecoderError;

/// Frame-indexed source of per-model acoustic log-likelihoods.
///
/// `go_to` positions the source; `log_prob` reads the positioned frame.
/// Sources backed by pipes keep only a window of recent frames and fail with
/// [`DecoderError::ForgottenFrame`] when asked to rewind past it.
pub trait Acoustics {
    /// Position at `frame`. `Ok(false)` means the frame is past end of input.
    fn go_to(&mut self, frame: u32) -> Result<bool, DecoderError>;

    /// Log-likelihood of `model` at the most recently positioned frame.
    fn log_prob(&self, model: usize) -> f32;

    /// Lowest frame known to be unavailable, once the end has been seen.
    fn eof_frame(&self) -> Option<u32>;

    fn num_models(&self) -> usize;
}

/// Dense in-memory acoustic scores, `frames x models`.
#[derive(Debug, Clone)]
pub struct BufferAcoustics {
    scores: Vec<f32>,
    num_models: usize,
    current: usize,
}

impl BufferAcoustics {
    /// `scores` is row-major, one row of `num_models` values per frame.
    pub fn new(num_models: usize, scores: Vec<f32>) -> Self {
        assert!(num_models > 0, "acoustics need at least one model");
        assert_eq!(scores.len() % num_models, 0, "ragged score matrix");
        Self {
            scores,
            num_models,
            current: 0,
        }
    }

    pub fn num_frames(&self) -> u32 {
        (self.scores.len() / self.num_models) as u32
    }
}

impl Acoustics for BufferAcoustics {
    fn go_to(&mut self, frame: u32) -> Result<bool, DecoderError> {
        if frame >= self.num_frames() {
            return Ok(false);
        }
        self.current = frame as usize * self.num_models;
        Ok(true)
    }

    fn log_prob(&self, model: usize) -> f32 {
        self.scores[self.current + model]
    }

    fn eof_frame(&self) -> Option<u32> {
        Some(self.num_frames())
    }

    fn num_models(&self) -> usize {
        self.num_models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_positions_and_reads() {
        let mut ac = BufferAcoustics::new(2, vec![0.0, -1.0, -2.0, -3.0]);
        assert_eq!(ac.num_frames(), 2);
        assert!(ac.go_to(1).unwrap());
        assert_eq!(ac.log_prob(0), -2.0);
        assert_eq!(ac.log_prob(1), -3.0);
        assert!(ac.go_to(0).unwrap());
        assert_eq!(ac.log_prob(1), -1.0);
    }

    #[test]
    fn buffer_reports_eof() {
        let mut ac = BufferAcoustics::new(1, vec![0.0; 3]);
        assert!(!ac.go_to(3).unwrap());
        assert_eq!(ac.eof_frame(), Some(3));
    }
}
