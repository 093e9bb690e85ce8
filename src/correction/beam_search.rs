//! Beam-search decoding over a single-step decoder.
//!
//! The search is independent of the tensor backend: anything that can return
//! next-token log-probabilities for a decoder prefix can be searched.

use std::cmp::Ordering;

use super::errors::CorrectionError;

/// Produces log-probabilities for the token following `prefix`
pub trait StepDecoder {
    fn next_log_probs(&mut self, prefix: &[u32]) -> Result<Vec<f32>, CorrectionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeamSearchParams {
    pub num_beams: usize,
    /// Upper bound on generated tokens, the start token excluded
    pub max_new_tokens: usize,
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    pub length_penalty: f32,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    score: f32,
}

impl Hypothesis {
    /// Score divided by the generated length, start and end markers excluded
    fn normalized_score(&self, params: &BeamSearchParams) -> f32 {
        let mut generated = self.tokens.len().saturating_sub(1);
        if generated > 0 && self.tokens.last() == Some(&params.eos_token_id) {
            generated -= 1;
        }
        self.score / (generated.max(1) as f32).powf(params.length_penalty)
    }
}

fn by_score_desc(a: &f32, b: &f32) -> Ordering {
    b.partial_cmp(a).unwrap_or(Ordering::Equal)
}

/// Indices of the `k` largest values, best first
fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .collect();
    indexed.sort_by(|a, b| by_score_desc(&a.1, &b.1));
    indexed.truncate(k);
    indexed
}

/// Run beam search and return the best sequence without the start and end markers.
pub fn beam_search<D: StepDecoder>(
    decoder: &mut D,
    params: &BeamSearchParams,
) -> Result<Vec<u32>, CorrectionError> {
    let num_beams = params.num_beams.max(1);
    let mut beams = vec![Hypothesis {
        tokens: vec![params.decoder_start_token_id],
        score: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();
    let mut stopped_early = false;

    for _ in 0..params.max_new_tokens {
        let mut candidates: Vec<Hypothesis> = Vec::with_capacity(beams.len() * num_beams * 2);
        for beam in &beams {
            let log_probs = decoder.next_log_probs(&beam.tokens)?;
            for (token, log_prob) in top_k(&log_probs, num_beams * 2) {
                let mut tokens = beam.tokens.clone();
                tokens.push(token as u32);
                candidates.push(Hypothesis {
                    tokens,
                    score: beam.score + log_prob,
                });
            }
        }

        if candidates.is_empty() {
            return Err(CorrectionError::InferenceFailed {
                details: "decoder produced no finite scores".to_string(),
            });
        }
        candidates.sort_by(|a, b| by_score_desc(&a.score, &b.score));

        let mut next_beams = Vec::with_capacity(num_beams);
        for (rank, candidate) in candidates.into_iter().enumerate() {
            if candidate.tokens.last() == Some(&params.eos_token_id) {
                // An end marker only counts if it ranks among the live beams.
                if rank < num_beams {
                    finished.push(candidate);
                }
            } else {
                next_beams.push(candidate);
            }
            if next_beams.len() == num_beams {
                break;
            }
        }

        if finished.len() >= num_beams || next_beams.is_empty() {
            stopped_early = true;
            break;
        }
        beams = next_beams;
    }

    // Hitting the output cap leaves live beams competing with the finished ones.
    if !stopped_early {
        finished.extend(beams);
    }

    let best = finished
        .into_iter()
        .max_by(|a, b| {
            a.normalized_score(params)
                .partial_cmp(&b.normalized_score(params))
                .unwrap_or(Ordering::Equal)
        })
        .ok_or_else(|| CorrectionError::InferenceFailed {
            details: "beam search finished without hypotheses".to_string(),
        })?;

    Ok(best
        .tokens
        .into_iter()
        .skip(1)
        .filter(|&t| t != params.eos_token_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const START: u32 = 0;
    const EOS: u32 = 1;

    /// Toy decoder with a fixed next-token table keyed by the last token
    struct TableDecoder {
        vocab_size: usize,
        table: HashMap<u32, Vec<(u32, f32)>>,
        calls: usize,
    }

    impl TableDecoder {
        fn new(vocab_size: usize, entries: &[(u32, &[(u32, f32)])]) -> Self {
            let table = entries
                .iter()
                .map(|(last, next)| (*last, next.to_vec()))
                .collect();
            Self { vocab_size, table, calls: 0 }
        }
    }

    impl StepDecoder for TableDecoder {
        fn next_log_probs(&mut self, prefix: &[u32]) -> Result<Vec<f32>, CorrectionError> {
            self.calls += 1;
            let mut probs = vec![f32::NEG_INFINITY; self.vocab_size];
            let last = *prefix.last().unwrap();
            match self.table.get(&last) {
                Some(next) => {
                    for (token, p) in next {
                        probs[*token as usize] = p.ln();
                    }
                }
                None => probs[EOS as usize] = 0.0,
            }
            Ok(probs)
        }
    }

    fn params(num_beams: usize, max_new_tokens: usize) -> BeamSearchParams {
        BeamSearchParams {
            num_beams,
            max_new_tokens,
            decoder_start_token_id: START,
            eos_token_id: EOS,
            length_penalty: 1.0,
        }
    }

    #[test]
    fn test_greedy_path_when_single_beam() {
        let mut decoder = TableDecoder::new(
            5,
            &[(START, &[(2, 0.9), (3, 0.1)]), (2, &[(4, 0.8), (EOS, 0.2)]), (4, &[(EOS, 1.0)])],
        );
        let out = beam_search(&mut decoder, &params(1, 10)).unwrap();
        assert_eq!(out, vec![2, 4]);
    }

    #[test]
    fn test_beam_finds_better_sequence_than_greedy() {
        // Greedy takes 2 (0.6) into an unlikely tail; 3 (0.4) ends with certainty.
        let mut decoder = TableDecoder::new(
            5,
            &[
                (START, &[(2, 0.6), (3, 0.4)]),
                (2, &[(4, 0.1)]),
                (4, &[(EOS, 0.1)]),
                (3, &[(EOS, 1.0)]),
            ],
        );

        let greedy = beam_search(&mut decoder, &params(1, 3)).unwrap();
        assert_eq!(greedy, vec![2, 4]);

        let beamed = beam_search(&mut decoder, &params(4, 3)).unwrap();
        assert_eq!(beamed, vec![3]);
    }

    #[test]
    fn test_live_beam_beats_early_end_at_output_cap() {
        // The empty hypothesis finishes at step one (-1.20); the live [2, 4]
        // reaches the cap with a better per-token score (-0.35).
        let mut decoder = TableDecoder::new(
            5,
            &[
                (START, &[(2, 0.5), (EOS, 0.3), (3, 0.2)]),
                (2, &[(4, 1.0)]),
                (3, &[(4, 1.0)]),
                (4, &[(4, 1.0)]),
            ],
        );

        let out = beam_search(&mut decoder, &params(2, 2)).unwrap();
        assert_eq!(out, vec![2, 4]);
    }

    #[test]
    fn test_end_marker_not_counted_in_length() {
        let p = params(1, 4);
        let finished = Hypothesis {
            tokens: vec![START, 2, EOS],
            score: -1.0,
        };
        let live = Hypothesis {
            tokens: vec![START, 2],
            score: -1.0,
        };
        assert_eq!(finished.normalized_score(&p), live.normalized_score(&p));
        assert_eq!(finished.normalized_score(&p), -1.0);
    }

    #[test]
    fn test_respects_max_new_tokens() {
        // Token 2 always follows itself, no end marker is ever likely.
        let mut decoder = TableDecoder::new(4, &[(START, &[(2, 1.0)]), (2, &[(2, 1.0)])]);
        let out = beam_search(&mut decoder, &params(2, 5)).unwrap();
        assert_eq!(out, vec![2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_immediate_end_yields_empty_sequence() {
        let mut decoder = TableDecoder::new(3, &[(START, &[(EOS, 1.0)])]);
        let out = beam_search(&mut decoder, &params(4, 10)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_early_stopping_bounds_decoder_calls() {
        let mut decoder = TableDecoder::new(3, &[(START, &[(EOS, 1.0)])]);
        beam_search(&mut decoder, &params(1, 50)).unwrap();
        assert_eq!(decoder.calls, 1);
    }

    #[test]
    fn test_decoder_error_propagates() {
        struct Failing;
        impl StepDecoder for Failing {
            fn next_log_probs(&mut self, _prefix: &[u32]) -> Result<Vec<f32>, CorrectionError> {
                Err(CorrectionError::InferenceFailed { details: "device lost".to_string() })
            }
        }

        let err = beam_search(&mut Failing, &params(2, 5)).unwrap_err();
        assert!(err.to_string().contains("device lost"));
    }

    #[test]
    fn test_all_non_finite_scores_is_an_error() {
        struct Nan;
        impl StepDecoder for Nan {
            fn next_log_probs(&mut self, _prefix: &[u32]) -> Result<Vec<f32>, CorrectionError> {
                Ok(vec![f32::NAN; 4])
            }
        }

        assert!(beam_search(&mut Nan, &params(2, 5)).is_err());
    }
}
