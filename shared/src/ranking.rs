//! Turns ranked scores into what the results step shows: positions, a
//! per-category breakdown and the explanation of why the winner won.

use serde::{Deserialize, Serialize};

use crate::indicator::IndicatorRegistry;
use crate::scoring::ProposalScore;
use crate::weights::WeightConfig;

/// Placeholder shown for absent values.
pub const MISSING_VALUE: &str = "—";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category_id: String,
    pub category_name: String,
    pub weight: Option<f64>,
    pub score: f64,
    pub filled: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProposal {
    pub rank: usize,
    #[serde(flatten)]
    pub score: ProposalScore,
    pub category_scores: Vec<CategoryScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisiveIndicator {
    pub indicator_id: String,
    pub winner_contribution: f64,
    pub runner_up_contribution: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerBreakdown {
    pub winner_id: String,
    pub winner_name: String,
    pub winner_score: f64,
    pub runner_up_id: Option<String>,
    pub margin: Option<f64>,
    pub decisive_indicators: Vec<DecisiveIndicator>,
}

fn category_scores(score: &ProposalScore, registry: &IndicatorRegistry, weights: &WeightConfig) -> Vec<CategoryScore> {
    let mut order: Vec<String> = registry.categories.iter().map(|c| c.id.clone()).collect();
    for c in &score.contributions {
        if !order.contains(&c.category_id) {
            order.push(c.category_id.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|category_id| {
            let members: Vec<_> = score
                .contributions
                .iter()
                .filter(|c| c.category_id == category_id)
                .collect();
            if members.is_empty() {
                return None;
            }
            let filled: Vec<_> = members.iter().filter(|c| c.normalized.is_some()).collect();
            let weight_sum: f64 = filled.iter().map(|c| c.weight).sum();
            let contribution_sum: f64 = filled.iter().map(|c| c.contribution).sum();
            let value = if weight_sum > 0.0 {
                contribution_sum / weight_sum * 100.0
            } else {
                0.0
            };
            let category_name = registry
                .category(&category_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| category_id.clone());
            Some(CategoryScore {
                weight: weights.category_weight(&category_id),
                category_name,
                category_id,
                score: value,
                filled: filled.len(),
                total: members.len(),
            })
        })
        .collect()
}

/// Expects scores already sorted by [`crate::scoring::rank`].
pub fn build_ranking(scores: Vec<ProposalScore>, registry: &IndicatorRegistry, weights: &WeightConfig) -> Vec<RankedProposal> {
    scores
        .into_iter()
        .enumerate()
        .map(|(i, score)| RankedProposal {
            rank: i + 1,
            category_scores: category_scores(&score, registry, weights),
            score,
        })
        .collect()
}

pub fn winner_breakdown(ranking: &[RankedProposal]) -> Option<WinnerBreakdown> {
    let winner = &ranking.first()?.score;
    let runner_up = ranking.get(1).map(|r| &r.score);

    let mut decisive: Vec<DecisiveIndicator> = match runner_up {
        Some(second) => winner
            .contributions
            .iter()
            .filter_map(|w| {
                let other = second
                    .contributions
                    .iter()
                    .find(|c| c.indicator_id == w.indicator_id)
                    .map(|c| c.contribution)
                    .unwrap_or(0.0);
                let difference = w.contribution - other;
                (difference > 0.0).then(|| DecisiveIndicator {
                    indicator_id: w.indicator_id.clone(),
                    winner_contribution: w.contribution,
                    runner_up_contribution: other,
                    difference,
                })
            })
            .collect(),
        None => Vec::new(),
    };
    decisive.sort_by(|a, b| b.difference.total_cmp(&a.difference));

    Some(WinnerBreakdown {
        winner_id: winner.proposal_id.clone(),
        winner_name: winner.proposal_name.clone(),
        winner_score: winner.weighted_score,
        runner_up_id: runner_up.map(|s| s.proposal_id.clone()),
        margin: runner_up.map(|s| winner.weighted_score - s.weighted_score),
        decisive_indicators: decisive,
    })
}

pub fn display_value(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) if v.is_finite() => {
            if unit.is_empty() {
                format!("{v:.2}")
            } else {
                format!("{v:.2} {unit}")
            }
        }
        _ => MISSING_VALUE.to_string(),
    }
}
