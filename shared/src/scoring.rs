//! Weighted scoring of proposals.
//!
//! Every selected indicator value is normalized against the values observed in
//! the current comparison set, multiplied by the indicator weight and summed.
//! The result is expressed as a percentage of the weight that was actually
//! filled, so missing values lower the completion rate but do not drag the
//! score towards zero.
//!
//! Missing or malformed values never produce an error. They are treated as
//! absent and the arithmetic degrades to `0`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;

use crate::indicator::Indicator;
use crate::proposal::Proposal;
use crate::weights::WeightConfig;

/// Tolerance used when flagging the best value of an indicator.
pub const BEST_VALUE_TOLERANCE: f64 = 1e-6;
const SCORE_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Values in [0,100] are taken as already normalized, everything else is
    /// divided by the observed maximum. `lower_is_better` only affects the
    /// best-value highlight.
    #[default]
    DivideByMax,
    /// `(v - min) / (max - min)`, inverted for `lower_is_better`.
    MinMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CategoryWeighting {
    /// Category weights are shown but do not enter the score.
    #[default]
    Advisory,
    /// Indicator weights are scaled by `category_weight / 100`.
    Multiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScoringOptions {
    #[serde(default)]
    pub normalization: NormalizationPolicy,
    #[serde(default)]
    pub category_weighting: CategoryWeighting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorContribution {
    pub indicator_id: String,
    pub category_id: String,
    pub raw_value: Option<f64>,
    pub normalized: Option<f64>,
    /// Effective weight after category weighting.
    pub weight: f64,
    pub contribution: f64,
    /// Not found in the document; ignored for completion and weight.
    pub skipped: bool,
    pub is_best: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalScore {
    pub proposal_id: String,
    pub proposal_name: String,
    pub weighted_score: f64,
    pub completion_rate: f64,
    pub filled_indicators: usize,
    pub total_indicators: usize,
    pub total_weight: f64,
    pub total_score: f64,
    pub contributions: Vec<IndicatorContribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestValue {
    pub indicator_id: String,
    pub value: f64,
    pub lower_is_better: bool,
    pub proposal_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct ObservedRange {
    min: f64,
    max: f64,
}

fn observed_ranges<'a>(proposals: &[Proposal], indicators: &'a [Indicator]) -> HashMap<&'a str, ObservedRange> {
    let mut ranges = HashMap::new();
    for indicator in indicators {
        let values = proposals
            .iter()
            .filter_map(|p| p.value(&indicator.id).as_f64());
        let range = values.fold(None, |acc: Option<ObservedRange>, v| match acc {
            None => Some(ObservedRange { min: v, max: v }),
            Some(r) => Some(ObservedRange {
                min: r.min.min(v),
                max: r.max.max(v),
            }),
        });
        if let Some(range) = range {
            ranges.insert(indicator.id.as_str(), range);
        }
    }
    ranges
}

fn normalize(value: f64, range: ObservedRange, lower_is_better: bool, policy: NormalizationPolicy) -> f64 {
    let normalized = match policy {
        NormalizationPolicy::DivideByMax => {
            if (0.0..=100.0).contains(&value) {
                value
            } else if range.max > 0.0 {
                value / range.max * 100.0
            } else {
                0.0
            }
        }
        NormalizationPolicy::MinMax => {
            let span = range.max - range.min;
            let scaled = if span.abs() < SCORE_EPS {
                100.0
            } else {
                (value - range.min) / span * 100.0
            };
            if lower_is_better && span.abs() >= SCORE_EPS {
                100.0 - scaled
            } else {
                scaled
            }
        }
    };
    normalized.clamp(0.0, 100.0)
}

fn effective_weight(indicator: &Indicator, weights: &WeightConfig, mode: CategoryWeighting) -> f64 {
    let base = weights.indicator_weight(indicator);
    match mode {
        CategoryWeighting::Advisory => base,
        CategoryWeighting::Multiply => match weights.category_weight(&indicator.category) {
            Some(cw) if cw.is_finite() => base * cw / 100.0,
            _ => base,
        },
    }
}

/// Best value per indicator: the minimum for `lower_is_better`, otherwise the
/// maximum. Indicators without any numeric value are left out.
pub fn best_values(proposals: &[Proposal], indicators: &[Indicator]) -> Vec<BestValue> {
    let ranges = observed_ranges(proposals, indicators);
    indicators
        .iter()
        .filter_map(|indicator| {
            let range = ranges.get(indicator.id.as_str())?;
            let best = if indicator.lower_is_better { range.min } else { range.max };
            let proposal_ids = proposals
                .iter()
                .filter(|p| {
                    p.value(&indicator.id)
                        .as_f64()
                        .is_some_and(|v| (v - best).abs() <= BEST_VALUE_TOLERANCE)
                })
                .map(|p| p.id.clone())
                .collect();
            Some(BestValue {
                indicator_id: indicator.id.clone(),
                value: best,
                lower_is_better: indicator.lower_is_better,
                proposal_ids,
            })
        })
        .collect()
}

/// Scores every given proposal over the selected indicators. Callers pass the
/// completed proposals of the current comparison set; the observed maxima are
/// taken from exactly this set.
pub fn score_proposals(
    proposals: &[Proposal],
    indicators: &[Indicator],
    weights: &WeightConfig,
    options: ScoringOptions,
) -> Vec<ProposalScore> {
    let ranges = observed_ranges(proposals, indicators);
    let best: HashMap<String, BestValue> = best_values(proposals, indicators)
        .into_iter()
        .map(|b| (b.indicator_id.clone(), b))
        .collect();

    proposals
        .iter()
        .map(|proposal| {
            let mut filled = 0usize;
            let mut total_weight = 0.0;
            let mut total_score = 0.0;
            let mut contributions = Vec::with_capacity(indicators.len());

            for indicator in indicators {
                let weight = effective_weight(indicator, weights, options.category_weighting);
                let skipped = proposal
                    .entry(&indicator.id)
                    .is_some_and(|entry| entry.is_skipped());
                let raw_value = if skipped {
                    None
                } else {
                    proposal.value(&indicator.id).as_f64()
                };

                let (normalized, contribution) = match (raw_value, ranges.get(indicator.id.as_str())) {
                    (Some(value), Some(range)) => {
                        filled += 1;
                        total_weight += weight;
                        let normalized = normalize(value, *range, indicator.lower_is_better, options.normalization);
                        let contribution = normalized * (weight / 100.0);
                        total_score += contribution;
                        (Some(normalized), contribution)
                    }
                    _ => (None, 0.0),
                };

                let is_best = best
                    .get(&indicator.id)
                    .is_some_and(|b| b.proposal_ids.iter().any(|id| id == &proposal.id));

                contributions.push(IndicatorContribution {
                    indicator_id: indicator.id.clone(),
                    category_id: indicator.category.clone(),
                    raw_value,
                    normalized,
                    weight,
                    contribution,
                    skipped,
                    is_best,
                });
            }

            let total_indicators = indicators.len();
            let completion_rate = if total_indicators > 0 {
                filled as f64 / total_indicators as f64 * 100.0
            } else {
                0.0
            };
            let weighted_score = if total_weight > 0.0 {
                total_score / total_weight * 100.0
            } else {
                0.0
            };
            debug!(
                proposal = %proposal.id,
                filled,
                total_indicators,
                weighted_score,
                "scored proposal"
            );

            ProposalScore {
                proposal_id: proposal.id.clone(),
                proposal_name: proposal.name.clone(),
                weighted_score,
                completion_rate,
                filled_indicators: filled,
                total_indicators,
                total_weight,
                total_score,
                contributions,
            }
        })
        .collect()
}

/// Sorts descending by weighted score. Equal scores keep their input order.
pub fn rank(mut scores: Vec<ProposalScore>) -> Vec<ProposalScore> {
    scores.sort_by(|a, b| b.weighted_score.total_cmp(&a.weighted_score));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::ComparisonMethod;
    use crate::proposal::{IndicatorEntry, ProposalStatus, SourceKind};

    fn indicator(id: &str, weight: f64, lower_is_better: bool) -> Indicator {
        Indicator {
            id: id.into(),
            name: id.into(),
            unit: "m²".into(),
            category: "greenery".into(),
            weight: Some(weight),
            lower_is_better,
            comparison_method: ComparisonMethod::Numeric,
            custom: false,
        }
    }

    fn proposal(name: &str, values: &[(&str, f64)]) -> Proposal {
        let mut p = Proposal::new(name);
        p.set_status(ProposalStatus::Completed);
        for (id, v) in values {
            p.set_value(*id, IndicatorEntry::number(*v, SourceKind::Document));
        }
        p
    }

    fn score_of<'a>(scores: &'a [ProposalScore], name: &str) -> &'a ProposalScore {
        scores.iter().find(|s| s.proposal_name == name).unwrap()
    }

    #[test]
    fn empty_proposal_scores_zero() {
        let indicators = vec![indicator("green", 20.0, false), indicator("paved", 10.0, true)];
        let scores = score_proposals(
            &[proposal("empty", &[])],
            &indicators,
            &WeightConfig::default(),
            ScoringOptions::default(),
        );
        assert_eq!(scores[0].weighted_score, 0.0);
        assert_eq!(scores[0].completion_rate, 0.0);
        assert_eq!(scores[0].filled_indicators, 0);
    }

    #[test]
    fn values_at_observed_maximum_score_hundred() {
        let indicators = vec![indicator("a", 10.0, false), indicator("b", 10.0, false)];
        let scores = score_proposals(
            &[proposal("only", &[("a", 5400.0), ("b", 310.0)])],
            &indicators,
            &WeightConfig::default(),
            ScoringOptions::default(),
        );
        let s = &scores[0];
        assert!(s.contributions.iter().all(|c| c.normalized == Some(100.0)));
        assert!((s.weighted_score - 100.0).abs() < 1e-9);
        assert_eq!(s.completion_rate, 100.0);
    }

    #[test]
    fn weights_twenty_and_eighty() {
        let indicators = vec![indicator("a", 20.0, false), indicator("b", 80.0, false)];
        let scores = score_proposals(
            &[proposal("x", &[("a", 500.0), ("b", 0.0)])],
            &indicators,
            &WeightConfig::default(),
            ScoringOptions::default(),
        );
        assert!((scores[0].weighted_score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn completion_grows_with_filled_indicators() {
        let indicators = vec![
            indicator("a", 10.0, false),
            indicator("b", 10.0, false),
            indicator("c", 10.0, false),
            indicator("d", 10.0, false),
        ];
        let mut previous = -1.0;
        for filled in 0..=indicators.len() {
            let values: Vec<(&str, f64)> = indicators[..filled]
                .iter()
                .map(|i| (i.id.as_str(), 250.0))
                .collect();
            let scores = score_proposals(
                &[proposal("p", &values)],
                &indicators,
                &WeightConfig::default(),
                ScoringOptions::default(),
            );
            assert!(scores[0].completion_rate >= previous);
            previous = scores[0].completion_rate;
        }
        assert_eq!(previous, 100.0);
    }

    #[test]
    fn lower_is_better_moves_highlight_not_score() {
        let proposals = vec![
            proposal("x", &[("paved", 14390.0)]),
            proposal("y", &[("paved", 9000.0)]),
        ];
        let higher = vec![indicator("paved", 10.0, false)];
        let lower = vec![indicator("paved", 10.0, true)];
        let weights = WeightConfig::default();

        let a = score_proposals(&proposals, &higher, &weights, ScoringOptions::default());
        let b = score_proposals(&proposals, &lower, &weights, ScoringOptions::default());

        for name in ["x", "y"] {
            assert_eq!(score_of(&a, name).weighted_score, score_of(&b, name).weighted_score);
        }
        assert!(score_of(&a, "x").contributions[0].is_best);
        assert!(!score_of(&a, "y").contributions[0].is_best);
        assert!(score_of(&b, "y").contributions[0].is_best);
        assert!(!score_of(&b, "x").contributions[0].is_best);
    }

    #[test]
    fn green_and_paved_example() {
        let indicators = vec![indicator("green", 20.0, false), indicator("paved", 10.0, true)];
        let proposals = vec![
            proposal("X", &[("green", 13650.0), ("paved", 14390.0)]),
            proposal("Y", &[("green", 9000.0), ("paved", 14390.0)]),
        ];
        let scores = score_proposals(&proposals, &indicators, &WeightConfig::default(), ScoringOptions::default());
        let x = score_of(&scores, "X");
        let y = score_of(&scores, "Y");

        assert_eq!(x.contributions[1].normalized, Some(100.0));
        assert_eq!(y.contributions[1].normalized, Some(100.0));
        assert_eq!(x.contributions[0].normalized, Some(100.0));
        let y_green = y.contributions[0].normalized.unwrap();
        assert!((y_green - 65.934).abs() < 1e-3);
        assert!(x.weighted_score > y.weighted_score);

        let ranked = rank(scores);
        assert_eq!(ranked[0].proposal_name, "X");
    }

    #[test]
    fn zero_total_weight_gives_zero_not_nan() {
        let indicators = vec![indicator("a", 0.0, false)];
        let scores = score_proposals(
            &[proposal("p", &[("a", 400.0)])],
            &indicators,
            &WeightConfig::default(),
            ScoringOptions::default(),
        );
        assert_eq!(scores[0].weighted_score, 0.0);
        assert_eq!(scores[0].completion_rate, 100.0);
    }

    #[test]
    fn not_found_entries_do_not_count() {
        let indicators = vec![indicator("a", 50.0, false), indicator("b", 50.0, false)];
        let mut p = proposal("p", &[("a", 800.0)]);
        p.set_value("b", IndicatorEntry::not_found());
        let scores = score_proposals(&[p], &indicators, &WeightConfig::default(), ScoringOptions::default());
        let s = &scores[0];
        assert_eq!(s.filled_indicators, 1);
        assert_eq!(s.total_weight, 50.0);
        assert_eq!(s.completion_rate, 50.0);
        assert!(s.contributions[1].skipped);
        assert!((s.weighted_score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn values_within_percent_range_pass_through() {
        let indicators = vec![indicator("share", 10.0, false)];
        let proposals = vec![proposal("p", &[("share", 45.0)]), proposal("q", &[("share", 1200.0)])];
        let scores = score_proposals(&proposals, &indicators, &WeightConfig::default(), ScoringOptions::default());
        assert_eq!(score_of(&scores, "p").contributions[0].normalized, Some(45.0));
        assert_eq!(score_of(&scores, "q").contributions[0].normalized, Some(100.0));
    }

    #[test]
    fn min_max_policy_inverts_lower_is_better() {
        let indicators = vec![indicator("paved", 10.0, true)];
        let proposals = vec![
            proposal("x", &[("paved", 14390.0)]),
            proposal("y", &[("paved", 9000.0)]),
        ];
        let options = ScoringOptions {
            normalization: NormalizationPolicy::MinMax,
            ..ScoringOptions::default()
        };
        let scores = score_proposals(&proposals, &indicators, &WeightConfig::default(), options);
        assert_eq!(score_of(&scores, "x").contributions[0].normalized, Some(0.0));
        assert_eq!(score_of(&scores, "y").contributions[0].normalized, Some(100.0));
    }

    #[test]
    fn min_max_degenerate_range_scores_hundred() {
        let options = ScoringOptions {
            normalization: NormalizationPolicy::MinMax,
            ..ScoringOptions::default()
        };
        let proposals = vec![proposal("x", &[("paved", 9000.0)]), proposal("y", &[("paved", 9000.0)])];
        for lower_is_better in [false, true] {
            let indicators = vec![indicator("paved", 10.0, lower_is_better)];
            let scores = score_proposals(&proposals, &indicators, &WeightConfig::default(), options);
            for s in &scores {
                assert_eq!(s.contributions[0].normalized, Some(100.0));
                assert!((s.weighted_score - 100.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn multiply_with_unknown_category_keeps_weight() {
        let mut noise = indicator("noise", 40.0, false);
        noise.category = "acoustics".into();
        let mut weights = WeightConfig::default();
        weights.categories.insert("greenery".into(), 50.0);

        let scores = score_proposals(
            &[proposal("p", &[("noise", 1000.0)])],
            &[noise],
            &weights,
            ScoringOptions {
                category_weighting: CategoryWeighting::Multiply,
                ..ScoringOptions::default()
            },
        );
        assert_eq!(scores[0].contributions[0].weight, 40.0);
        assert_eq!(scores[0].total_weight, 40.0);
    }

    #[test]
    fn category_multiply_scales_weights() {
        let mut transit = indicator("transit", 50.0, false);
        transit.category = "transport".into();
        let green = indicator("green", 50.0, false);
        let indicators = vec![green, transit];

        let mut weights = WeightConfig::default();
        weights.categories.insert("greenery".into(), 75.0);
        weights.categories.insert("transport".into(), 25.0);

        let p = proposal("p", &[("green", 1000.0), ("transit", 0.0)]);
        let advisory = score_proposals(std::slice::from_ref(&p), &indicators, &weights, ScoringOptions::default());
        let multiply = score_proposals(
            &[p],
            &indicators,
            &weights,
            ScoringOptions {
                category_weighting: CategoryWeighting::Multiply,
                ..ScoringOptions::default()
            },
        );
        assert!((advisory[0].weighted_score - 50.0).abs() < 1e-9);
        assert!((multiply[0].weighted_score - 75.0).abs() < 1e-9);
    }

    #[test]
    fn best_value_uses_tolerance() {
        let indicators = vec![indicator("a", 10.0, false)];
        let proposals = vec![
            proposal("x", &[("a", 300.0)]),
            proposal("y", &[("a", 300.0 + 1e-9)]),
            proposal("z", &[("a", 120.0)]),
        ];
        let best = best_values(&proposals, &indicators);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].proposal_ids.len(), 2);
    }

    #[test]
    fn ties_keep_input_order() {
        let indicators = vec![indicator("a", 10.0, false)];
        let proposals = vec![
            proposal("first", &[("a", 500.0)]),
            proposal("second", &[("a", 500.0)]),
            proposal("third", &[("a", 250.0)]),
        ];
        let ranked = rank(score_proposals(&proposals, &indicators, &WeightConfig::default(), ScoringOptions::default()));
        let names: Vec<_> = ranked.iter().map(|s| s.proposal_name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn tiny_score_differences_still_order() {
        let score = |name: &str, weighted_score: f64| ProposalScore {
            proposal_id: name.into(),
            proposal_name: name.into(),
            weighted_score,
            completion_rate: 100.0,
            filled_indicators: 1,
            total_indicators: 1,
            total_weight: 10.0,
            total_score: weighted_score / 10.0,
            contributions: Vec::new(),
        };
        let ranked = rank(vec![score("x", 0.0), score("z", 1.6e-9), score("y", 8e-10)]);
        let names: Vec<_> = ranked.iter().map(|s| s.proposal_name.as_str()).collect();
        assert_eq!(names, vec!["z", "y", "x"]);
    }
}
