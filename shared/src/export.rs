//! Downloadable JSON summary of the current comparison.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proposal::{ProposalStatus, SourceKind};
use crate::state::{WizardState, SCHEMA_VERSION};
use crate::weights::WeightConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedValue {
    pub value: Option<f64>,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedProposal {
    pub id: String,
    pub name: String,
    pub status: ProposalStatus,
    pub values: BTreeMap<String, ExportedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedIndicator {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub category: String,
    pub weight: f64,
    pub lower_is_better: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRank {
    pub rank: usize,
    pub proposal_id: String,
    pub proposal_name: String,
    pub weighted_score: f64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub proposals: Vec<ExportedProposal>,
    pub indicators: Vec<ExportedIndicator>,
    pub weights: WeightConfig,
    pub ranking: Option<Vec<ExportedRank>>,
}

/// Summarizes the visible selected proposals over the selected indicators,
/// plus the last ranking if one was computed.
pub fn build_export(state: &WizardState) -> ExportDocument {
    let indicators = state.comparison_indicators();

    let proposals = state
        .visible_proposals()
        .filter(|p| state.selected_proposals.is_empty() || state.selected_proposals.contains(&p.id))
        .map(|p| ExportedProposal {
            id: p.id.clone(),
            name: p.name.clone(),
            status: p.status,
            values: indicators
                .iter()
                .filter_map(|i| {
                    let entry = p.entry(&i.id)?;
                    Some((
                        i.id.clone(),
                        ExportedValue {
                            value: entry.numeric().as_f64(),
                            source: entry.source.clone(),
                        },
                    ))
                })
                .collect(),
        })
        .collect();

    let exported_indicators = indicators
        .iter()
        .map(|i| ExportedIndicator {
            id: i.id.clone(),
            name: i.name.clone(),
            unit: i.unit.clone(),
            category: i.category.clone(),
            weight: state.weights.indicator_weight(i),
            lower_is_better: i.lower_is_better,
        })
        .collect();

    let ranking = state.results.as_ref().map(|r| {
        r.ranking
            .iter()
            .map(|entry| ExportedRank {
                rank: entry.rank,
                proposal_id: entry.score.proposal_id.clone(),
                proposal_name: entry.score.proposal_name.clone(),
                weighted_score: entry.score.weighted_score,
                completion_rate: entry.score.completion_rate,
            })
            .collect()
    });

    ExportDocument {
        schema_version: SCHEMA_VERSION,
        exported_at: Utc::now(),
        proposals,
        indicators: exported_indicators,
        weights: state.weights.clone(),
        ranking,
    }
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("urban-analysis-export-{}.json", now.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{IndicatorEntry, Proposal};
    use crate::state::Action;
    use chrono::TimeZone;

    #[test]
    fn export_contains_selection_and_ranking() {
        let mut state = WizardState::default();
        let mut a = Proposal::new("A");
        a.set_status(ProposalStatus::Completed);
        a.set_value("green_area", IndicatorEntry::number(13650.0, SourceKind::Document));
        a.set_value("paved_area", IndicatorEntry::not_found());
        let b = Proposal::new("B");
        let a_id = a.id.clone();
        state.reduce(Action::AddProposal(a)).unwrap();
        state.reduce(Action::AddProposal(b)).unwrap();
        state.reduce(Action::SelectProposals(vec![a_id.clone()])).unwrap();
        state
            .reduce(Action::SelectIndicators(vec!["green_area".into(), "paved_area".into()]))
            .unwrap();
        state.reduce(Action::Evaluate).unwrap();

        let doc = build_export(&state);
        assert_eq!(doc.proposals.len(), 1);
        assert_eq!(doc.proposals[0].id, a_id);
        assert_eq!(doc.proposals[0].values["green_area"].value, Some(13650.0));
        assert_eq!(doc.proposals[0].values["paved_area"].source, SourceKind::NotFound);
        assert_eq!(doc.indicators.len(), 2);
        assert_eq!(doc.ranking.as_ref().unwrap()[0].proposal_id, a_id);
    }

    #[test]
    fn file_name_uses_date() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 10, 0, 0).unwrap();
        assert_eq!(export_file_name(now), "urban-analysis-export-2024-05-17.json");
    }
}
