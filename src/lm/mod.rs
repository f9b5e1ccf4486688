pub mod arpa;

pub use arpa::{read_arpa, ArpaNgram};

/// Conditional log-probabilities with back-off, natural log domain.
///
/// Implementations are read-only after construction and freely shared.
pub trait LanguageModel {
    fn order(&self) -> usize;

    /// Model-side id of `word`; `None` when the model does not know it.
    fn id(&self, word: &str) -> Option<usize>;

    /// `log P(word | context)`, backing off through shorter contexts.
    /// `context` is oldest-first; at most `order() - 1` trailing entries are used.
    fn log_prob(&self, context: &[usize], word: usize) -> f32;
}

/// `log(exp(a) + exp(b))` without leaving the log domain.
pub fn logadd(a: f32, b: f32) -> f32 {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    if lo == f32::NEG_INFINITY {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Weighted mixture `log Σᵢ wᵢ·exp(lpᵢ)` of per-model log-probs.
/// Returns `None` for an empty iterator.
pub fn mix_log_probs(components: impl IntoIterator<Item = (f32, f32)>) -> Option<f32> {
    let mut acc: Option<f32> = None;
    for (weight, log_prob) in components {
        let term = weight.ln() + log_prob;
        acc = Some(match acc {
            Some(a) => logadd(a, term),
            None => term,
        });
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logadd_matches_linear_domain() {
        let got = logadd((0.3f32).ln(), (0.2f32).ln());
        assert!((got - (0.5f32).ln()).abs() < 1e-6);
        assert_eq!(logadd(f32::NEG_INFINITY, -1.0), -1.0);
    }

    #[test]
    fn mixture_of_one_is_weighted_identity() {
        let got = mix_log_probs([(1.0, -2.0)]).unwrap();
        assert!((got - -2.0).abs() < 1e-6);
    }

    #[test]
    fn mixture_interpolates() {
        // 0.5 * 0.4 + 0.5 * 0.1 = 0.25
        let got = mix_log_probs([(0.5, (0.4f32).ln()), (0.5, (0.1f32).ln())]).unwrap();
        assert!((got - (0.25f32).ln()).abs() < 1e-6);
        assert!(mix_log_probs([]).is_none());
    }
}
