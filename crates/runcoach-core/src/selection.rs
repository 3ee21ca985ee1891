//! Winner selection for route optimization.
//!
//! Candidates are ranked on their unclamped sensitivity-weighted exposure,
//! so routes that all saturate the normalized score still order correctly.

use serde::{Deserialize, Serialize};

/// A scored candidate. Index 0 is reserved for the base route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub index: usize,
    /// Lower is cleaner
    pub weighted_exposure: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Selection {
    Improved {
        index: usize,
        weighted_exposure: f64,
        improvement_pct: f64,
    },
    NoImprovement {
        /// Improvement of the best non-base candidate, if any could be scored
        best_improvement_pct: Option<f64>,
    },
}

/// `(base - candidate) / base * 100`. Zero when the base has no exposure.
pub fn improvement_pct(base: f64, candidate: f64) -> f64 {
    if base <= 0.0 {
        return 0.0;
    }
    (base - candidate) / base * 100.0
}

/// Pick the lowest-exposure non-base candidate if it beats the base by at
/// least `min_improvement_pct`.
///
/// Ranking sorts by (exposure, index) so the outcome does not depend on the
/// order scores were collected in. Non-finite values are ignored.
pub fn select_winner(
    base_exposure: f64,
    candidates: &[CandidateScore],
    min_improvement_pct: f64,
) -> Selection {
    let mut ranked: Vec<CandidateScore> = candidates
        .iter()
        .copied()
        .filter(|c| c.index != 0 && c.weighted_exposure.is_finite())
        .collect();
    ranked.sort_by(|a, b| {
        a.weighted_exposure
            .total_cmp(&b.weighted_exposure)
            .then(a.index.cmp(&b.index))
    });

    let Some(best) = ranked.first() else {
        return Selection::NoImprovement {
            best_improvement_pct: None,
        };
    };

    let improvement = improvement_pct(base_exposure, best.weighted_exposure);
    if best.weighted_exposure < base_exposure && improvement >= min_improvement_pct {
        Selection::Improved {
            index: best.index,
            weighted_exposure: best.weighted_exposure,
            improvement_pct: improvement,
        }
    } else {
        Selection::NoImprovement {
            best_improvement_pct: Some(improvement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: &[f64]) -> Vec<CandidateScore> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| CandidateScore {
                index: i + 1,
                weighted_exposure: *v,
            })
            .collect()
    }

    #[test]
    fn picks_clearly_better_candidate() {
        let selection = select_winner(120.0, &scores(&[80.0]), 5.0);
        match selection {
            Selection::Improved {
                index,
                improvement_pct,
                ..
            } => {
                assert_eq!(index, 1);
                assert!((improvement_pct - 33.333).abs() < 0.01);
            }
            other => panic!("expected improvement, got {other:?}"),
        }
    }

    #[test]
    fn candidates_within_two_percent_are_not_improvements() {
        let candidates = scores(&[119.0, 119.4, 120.3, 121.2, 118.0]);
        match select_winner(120.0, &candidates, 5.0) {
            Selection::NoImprovement {
                best_improvement_pct: Some(pct),
            } => assert!((pct - 1.6667).abs() < 1e-3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn saturated_exposure_still_ranks() {
        // doubled AQI 280 vs doubled AQI 160, both beyond the 0..=1 scale
        match select_winner(560.0, &scores(&[320.0]), 5.0) {
            Selection::Improved {
                weighted_exposure,
                improvement_pct,
                ..
            } => {
                assert_eq!(weighted_exposure, 320.0);
                assert!((improvement_pct - 42.857).abs() < 1e-3);
            }
            other => panic!("expected improvement, got {other:?}"),
        }
    }

    #[test]
    fn never_selects_worse_than_base() {
        let candidates = scores(&[60.0, 90.0]);
        assert!(matches!(
            select_winner(30.0, &candidates, 0.0),
            Selection::NoImprovement { .. }
        ));
    }

    #[test]
    fn base_entry_is_never_the_winner() {
        let candidates = vec![
            CandidateScore {
                index: 0,
                weighted_exposure: 3.0,
            },
            CandidateScore {
                index: 2,
                weighted_exposure: 60.0,
            },
        ];
        match select_winner(150.0, &candidates, 5.0) {
            Selection::Improved { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ties_resolve_to_lowest_index_regardless_of_order() {
        let mut candidates = scores(&[60.0, 30.0, 30.0, 90.0]);
        let forward = select_winner(150.0, &candidates, 5.0);
        candidates.reverse();
        let backward = select_winner(150.0, &candidates, 5.0);
        assert_eq!(forward, backward);
        assert!(matches!(forward, Selection::Improved { index: 2, .. }));
    }

    #[test]
    fn empty_candidate_set_reports_no_improvement() {
        assert_eq!(
            select_winner(120.0, &[], 5.0),
            Selection::NoImprovement {
                best_improvement_pct: None
            }
        );
    }
}
