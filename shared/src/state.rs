//! Wizard state and the store that owns it.
//!
//! All mutations go through [`WizardState::reduce`]. [`StateStore`] applies an
//! action to a copy, writes the copy to disk and only then swaps it in, so a
//! failed write never leaves a half-applied state behind.
//!
//! The persisted document carries a `version`. Documents without one are
//! treated as a browser local-storage dump (`urban-analysis-*` keys) and are
//! migrated on load.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::indicator::{Indicator, IndicatorRegistry};
use crate::proposal::{IndicatorEntry, Proposal, ProposalStatus};
use crate::ranking::{build_ranking, winner_breakdown, RankedProposal, WinnerBreakdown};
use crate::scoring::{best_values, rank, score_proposals, BestValue, ScoringOptions};
use crate::weights::{WeightAuditEntry, WeightConfig, WeightOrigin, WeightSuggestion};

pub const SCHEMA_VERSION: u32 = 1;

const LEGACY_PREFIX: &str = "urban-analysis-";
const LEGACY_STEP: &str = "urban-analysis-krok";
const LEGACY_PROPOSALS: &str = "urban-analysis-navrhy";
const LEGACY_SELECTED_PROPOSALS: &str = "urban-analysis-vybrane-navrhy";
const LEGACY_SELECTED_INDICATORS: &str = "urban-analysis-vybrane-indikatory";
const LEGACY_CUSTOM_INDICATORS: &str = "urban-analysis-vlastni-indikatory";
const LEGACY_WEIGHTS: &str = "urban-analysis-vahy";
const LEGACY_CATEGORY_WEIGHTS: &str = "urban-analysis-category-weights";
const LEGACY_RESULTS: &str = "urban-analysis-results";
const LEGACY_AUDIT: &str = "weight_audit_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WizardStep {
    #[default]
    Upload,
    Indicators,
    Weights,
    Results,
}

impl WizardStep {
    pub fn number(self) -> u8 {
        match self {
            WizardStep::Upload => 1,
            WizardStep::Indicators => 2,
            WizardStep::Weights => 3,
            WizardStep::Results => 4,
        }
    }

    pub fn from_number(n: u64) -> Option<Self> {
        match n {
            1 => Some(WizardStep::Upload),
            2 => Some(WizardStep::Indicators),
            3 => Some(WizardStep::Weights),
            4 => Some(WizardStep::Results),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub computed_at: DateTime<Utc>,
    pub options: ScoringOptions,
    pub ranking: Vec<RankedProposal>,
    pub best_values: Vec<BestValue>,
    pub winner: Option<WinnerBreakdown>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub step: WizardStep,
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    #[serde(default)]
    pub selected_proposals: Vec<String>,
    #[serde(default)]
    pub selected_indicators: Vec<String>,
    #[serde(default)]
    pub custom_indicators: Vec<Indicator>,
    #[serde(default)]
    pub weights: WeightConfig,
    #[serde(default)]
    pub options: ScoringOptions,
    #[serde(default)]
    pub results: Option<Evaluation>,
    #[serde(default)]
    pub audit_log: Vec<WeightAuditEntry>,
}

impl Default for WizardState {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            step: WizardStep::Upload,
            proposals: Vec::new(),
            selected_proposals: Vec::new(),
            selected_indicators: Vec::new(),
            custom_indicators: Vec::new(),
            weights: WeightConfig::from_registry(&IndicatorRegistry::builtin()),
            options: ScoringOptions::default(),
            results: None,
            audit_log: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    SetStep(WizardStep),
    AddProposal(Proposal),
    SetProposalStatus {
        proposal_id: String,
        status: ProposalStatus,
    },
    SetIndicatorValue {
        proposal_id: String,
        indicator_id: String,
        entry: IndicatorEntry,
    },
    HideProposal {
        proposal_id: String,
        hidden: bool,
    },
    SelectProposals(Vec<String>),
    SelectIndicators(Vec<String>),
    AddCustomIndicator(Indicator),
    SetIndicatorWeight {
        indicator_id: String,
        weight: f64,
    },
    SetCategoryWeight {
        category_id: String,
        weight: f64,
    },
    ApplySuggestion(WeightSuggestion),
    ResetWeights,
    SetOptions(ScoringOptions),
    Evaluate,
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

impl WizardState {
    pub fn registry(&self) -> IndicatorRegistry {
        IndicatorRegistry::with_custom(&self.custom_indicators)
    }

    pub fn proposal(&self, id: &str) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == id)
    }

    fn proposal_mut(&mut self, id: &str) -> Result<&mut Proposal> {
        self.proposals
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::NotFound(format!("proposal '{id}'")))
    }

    pub fn visible_proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.iter().filter(|p| !p.hidden)
    }

    /// Indicators taking part in the comparison; all of them when nothing is selected.
    pub fn comparison_indicators(&self) -> Vec<Indicator> {
        let registry = self.registry();
        if self.selected_indicators.is_empty() {
            registry.indicators
        } else {
            registry.select(&self.selected_indicators)
        }
    }

    /// Completed, visible proposals of the comparison set; all of them when
    /// nothing is selected.
    pub fn comparison_proposals(&self) -> Vec<Proposal> {
        self.visible_proposals()
            .filter(|p| p.is_completed())
            .filter(|p| self.selected_proposals.is_empty() || self.selected_proposals.contains(&p.id))
            .cloned()
            .collect()
    }

    pub fn evaluate(&self) -> Evaluation {
        let registry = self.registry();
        let indicators = self.comparison_indicators();
        let proposals = self.comparison_proposals();

        let scores = rank(score_proposals(&proposals, &indicators, &self.weights, self.options));
        let ranking = build_ranking(scores, &registry, &self.weights);
        let winner = winner_breakdown(&ranking);

        let mut warnings = Vec::new();
        if proposals.is_empty() {
            warnings.push("no completed proposals to compare".to_string());
        }
        warnings.extend(self.weights.category_sum_warning());
        warnings.extend(registry.integrity_warnings());

        Evaluation {
            computed_at: Utc::now(),
            options: self.options,
            best_values: best_values(&proposals, &indicators),
            ranking,
            winner,
            warnings,
        }
    }

    pub fn reduce(&mut self, action: Action) -> Result<()> {
        match action {
            Action::SetStep(step) => {
                self.step = step;
                return Ok(());
            }
            Action::AddProposal(proposal) => {
                if proposal.name.trim().is_empty() {
                    return Err(AppError::Validation("proposal name must not be empty".into()));
                }
                if self.proposal(&proposal.id).is_some() {
                    return Err(AppError::Conflict(format!("proposal '{}' already exists", proposal.id)));
                }
                self.proposals.push(proposal);
            }
            Action::SetProposalStatus { proposal_id, status } => {
                self.proposal_mut(&proposal_id)?.set_status(status);
            }
            Action::SetIndicatorValue {
                proposal_id,
                indicator_id,
                entry,
            } => {
                if self.registry().indicator(&indicator_id).is_none() {
                    return Err(AppError::NotFound(format!("indicator '{indicator_id}'")));
                }
                self.proposal_mut(&proposal_id)?.set_value(indicator_id, entry);
            }
            Action::HideProposal { proposal_id, hidden } => {
                self.proposal_mut(&proposal_id)?.hidden = hidden;
            }
            Action::SelectProposals(ids) => {
                if let Some(missing) = ids.iter().find(|id| self.proposal(id).is_none()) {
                    return Err(AppError::NotFound(format!("proposal '{missing}'")));
                }
                self.selected_proposals = dedup(ids);
            }
            Action::SelectIndicators(ids) => {
                let registry = self.registry();
                if let Some(missing) = ids.iter().find(|id| registry.indicator(id).is_none()) {
                    return Err(AppError::NotFound(format!("indicator '{missing}'")));
                }
                self.selected_indicators = dedup(ids);
            }
            Action::AddCustomIndicator(indicator) => {
                let mut registry = self.registry();
                registry.add_custom(indicator.clone())?;
                let mut indicator = indicator;
                indicator.custom = true;
                if let Some(w) = indicator.weight {
                    let entry = self.weights.set_indicator(&indicator.id, w, WeightOrigin::Manual)?;
                    self.audit_log.push(entry);
                }
                self.custom_indicators.push(indicator);
            }
            Action::SetIndicatorWeight { indicator_id, weight } => {
                if self.registry().indicator(&indicator_id).is_none() {
                    return Err(AppError::NotFound(format!("indicator '{indicator_id}'")));
                }
                let entry = self.weights.set_indicator(&indicator_id, weight, WeightOrigin::Manual)?;
                self.audit_log.push(entry);
            }
            Action::SetCategoryWeight { category_id, weight } => {
                if self.registry().category(&category_id).is_none() {
                    return Err(AppError::NotFound(format!("category '{category_id}'")));
                }
                let entry = self.weights.set_category(&category_id, weight, WeightOrigin::Manual)?;
                self.audit_log.push(entry);
            }
            Action::ApplySuggestion(suggestion) => {
                let entries = self.weights.apply_suggestion(&suggestion, WeightOrigin::Ai);
                self.audit_log.extend(entries);
            }
            Action::ResetWeights => {
                let registry = self.registry();
                let entries = self.weights.reset(&registry);
                self.audit_log.extend(entries);
            }
            Action::SetOptions(options) => {
                self.options = options;
            }
            Action::Evaluate => {
                self.results = Some(self.evaluate());
                self.step = WizardStep::Results;
                return Ok(());
            }
        }
        // results are stale after any data, selection or weight change
        self.results = None;
        Ok(())
    }
}

/// Parses a stored string value the way local storage kept them: JSON inside a string.
fn unwrap_stored(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

fn legacy_proposal(value: &Value) -> Option<Proposal> {
    let mut obj = value.as_object()?.clone();
    if let Some(id) = obj.get("id").and_then(Value::as_i64) {
        obj.insert("id".into(), Value::String(id.to_string()));
    }
    if !obj.contains_key("name") {
        let name = obj
            .get("nazev")
            .or_else(|| obj.get("fileName"))
            .cloned()
            .unwrap_or_else(|| Value::String("Návrh".into()));
        obj.insert("name".into(), name);
    }
    match serde_json::from_value::<Proposal>(Value::Object(obj)) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(%e, "skipping unreadable legacy proposal");
            None
        }
    }
}

fn legacy_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(o) => o.get("id").and_then(legacy_id),
        _ => None,
    }
}

fn legacy_weights(value: &Value) -> Vec<(String, f64)> {
    unwrap_stored(value)
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| {
                    let w = v.as_f64().or_else(|| v.as_str().and_then(crate::proposal::parse_number))?;
                    (w.is_finite() && (0.0..=100.0).contains(&w)).then(|| (k.clone(), w))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn migrate_legacy(obj: &Map<String, Value>) -> WizardState {
    let mut state = WizardState::default();

    if let Some(step) = obj.get(LEGACY_STEP).map(unwrap_stored) {
        let n = step.as_u64().or_else(|| step.as_str().and_then(|s| s.parse().ok()));
        if let Some(step) = n.and_then(WizardStep::from_number) {
            state.step = step;
        }
    }

    if let Some(custom) = obj.get(LEGACY_CUSTOM_INDICATORS).map(unwrap_stored) {
        if let Ok(custom) = serde_json::from_value::<Vec<Indicator>>(custom) {
            for mut indicator in custom {
                indicator.custom = true;
                state.custom_indicators.push(indicator);
            }
        }
    }

    for key in [LEGACY_PROPOSALS, LEGACY_SELECTED_PROPOSALS] {
        let Some(list) = obj.get(key).map(unwrap_stored) else {
            continue;
        };
        for item in list.as_array().into_iter().flatten() {
            if item.is_object() {
                if let Some(p) = legacy_proposal(item) {
                    if key == LEGACY_SELECTED_PROPOSALS && !state.selected_proposals.contains(&p.id) {
                        state.selected_proposals.push(p.id.clone());
                    }
                    if state.proposal(&p.id).is_none() {
                        state.proposals.push(p);
                    }
                }
            } else if let (LEGACY_SELECTED_PROPOSALS, Some(id)) = (key, legacy_id(item)) {
                if !state.selected_proposals.contains(&id) {
                    state.selected_proposals.push(id);
                }
            }
        }
    }

    if let Some(list) = obj.get(LEGACY_SELECTED_INDICATORS).map(unwrap_stored) {
        let ids: Vec<String> = list.as_array().into_iter().flatten().filter_map(legacy_id).collect();
        state.selected_indicators = dedup(ids);
    }

    if let Some(v) = obj.get(LEGACY_WEIGHTS) {
        state.weights.indicators.extend(legacy_weights(v));
    }
    if let Some(v) = obj.get(LEGACY_CATEGORY_WEIGHTS) {
        state.weights.categories.extend(legacy_weights(v));
    }

    if let Some(log) = obj.get(LEGACY_AUDIT).map(unwrap_stored) {
        state.audit_log = log
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|e| serde_json::from_value::<WeightAuditEntry>(e.clone()).ok())
            .collect();
    }

    if obj.contains_key(LEGACY_RESULTS) {
        info!("dropping stored legacy results, they are recomputed on demand");
    }
    state
}

/// Reads a persisted document of any known schema into the current one.
pub fn migrate(value: Value) -> Result<WizardState> {
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::Schema("state document must be a JSON object".into()))?;

    let version = match obj.get("version") {
        Some(v) => Some(
            v.as_u64()
                .ok_or_else(|| AppError::Schema(format!("invalid version {v}")))?,
        ),
        None => None,
    };

    let Some(version) = version else {
        if obj.keys().any(|k| k.starts_with(LEGACY_PREFIX) || k == LEGACY_AUDIT) {
            info!(keys = obj.len(), "migrating legacy local storage state");
            return Ok(migrate_legacy(obj));
        }
        return Err(AppError::Schema("unversioned state document".into()));
    };

    if version > u64::from(SCHEMA_VERSION) {
        return Err(AppError::Schema(format!(
            "state version {version} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    let mut state: WizardState = serde_json::from_value(value)?;
    state.version = SCHEMA_VERSION;
    Ok(state)
}

pub struct StateStore {
    path: Option<PathBuf>,
    state: Mutex<WizardState>,
}

impl StateStore {
    pub fn in_memory() -> Self {
        Self::with_state(None, WizardState::default())
    }

    pub fn with_state(path: Option<PathBuf>, state: WizardState) -> Self {
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Loads the state file or starts fresh when it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read(&path).await {
            Ok(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)?;
                let legacy = value.get("version").is_none();
                let state = migrate(value)?;
                if legacy {
                    let backup = path.with_extension("legacy.json");
                    fs::copy(&path, &backup).await?;
                    info!(backup = %backup.display(), "legacy state kept as backup");
                    write_atomic(&path, &state).await?;
                }
                info!(path = %path.display(), proposals = state.proposals.len(), "state loaded");
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no state file, starting fresh");
                WizardState::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::with_state(Some(path), state))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> WizardState {
        self.state.lock().await.clone()
    }

    pub async fn dispatch(&self, action: Action) -> Result<WizardState> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        next.reduce(action)?;
        if let Some(path) = &self.path {
            write_atomic(path, &next).await?;
        }
        *guard = next.clone();
        Ok(next)
    }
}

async fn write_atomic(path: &Path, state: &WizardState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state)?;
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
