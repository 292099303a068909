//! Indicator and category weights plus the audit trail of every change.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::{AppError, Result};
use crate::indicator::{Indicator, IndicatorRegistry, DEFAULT_INDICATOR_WEIGHT};

const CATEGORY_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WeightOrigin {
    Default,
    Manual,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum WeightTarget {
    Indicator(String),
    Category(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAuditEntry {
    pub at: DateTime<Utc>,
    pub target: WeightTarget,
    pub previous: Option<f64>,
    pub current: f64,
    pub origin: WeightOrigin,
}

/// Weights proposed by the AI advisor, keyed by id and already resolved
/// against the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightSuggestion {
    #[serde(default)]
    pub categories: BTreeMap<String, f64>,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl WeightSuggestion {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.indicators.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
    #[serde(default)]
    pub categories: BTreeMap<String, f64>,
}

fn check_weight(weight: f64) -> Result<f64> {
    if !weight.is_finite() || !(0.0..=100.0).contains(&weight) {
        return Err(AppError::Validation(format!("weight {weight} is outside 0–100")));
    }
    Ok(weight)
}

impl WeightConfig {
    pub fn from_registry(registry: &IndicatorRegistry) -> Self {
        let indicators = registry
            .indicators
            .iter()
            .filter_map(|i| i.weight.map(|w| (i.id.clone(), w)))
            .collect();
        let categories = registry
            .categories
            .iter()
            .map(|c| (c.id.clone(), c.weight))
            .collect();
        Self {
            indicators,
            categories,
        }
    }

    /// Configured weight, else the indicator's own default, else
    /// [`DEFAULT_INDICATOR_WEIGHT`].
    pub fn indicator_weight(&self, indicator: &Indicator) -> f64 {
        self.indicators
            .get(&indicator.id)
            .copied()
            .or(indicator.weight)
            .filter(|w| w.is_finite())
            .unwrap_or(DEFAULT_INDICATOR_WEIGHT)
    }

    pub fn category_weight(&self, category_id: &str) -> Option<f64> {
        self.categories.get(category_id).copied()
    }

    pub fn set_indicator(&mut self, id: &str, weight: f64, origin: WeightOrigin) -> Result<WeightAuditEntry> {
        let weight = check_weight(weight)?;
        let previous = self.indicators.insert(id.to_string(), weight);
        Ok(WeightAuditEntry {
            at: Utc::now(),
            target: WeightTarget::Indicator(id.to_string()),
            previous,
            current: weight,
            origin,
        })
    }

    pub fn set_category(&mut self, id: &str, weight: f64, origin: WeightOrigin) -> Result<WeightAuditEntry> {
        let weight = check_weight(weight)?;
        let previous = self.categories.insert(id.to_string(), weight);
        Ok(WeightAuditEntry {
            at: Utc::now(),
            target: WeightTarget::Category(id.to_string()),
            previous,
            current: weight,
            origin,
        })
    }

    pub fn category_sum(&self) -> f64 {
        self.categories.values().sum()
    }

    /// Category weights are expected to add up to 100. This is a warning for
    /// the user, the scoring works with any sum.
    pub fn category_sum_warning(&self) -> Option<String> {
        if self.categories.is_empty() {
            return None;
        }
        let sum = self.category_sum();
        if (sum - 100.0).abs() > CATEGORY_SUM_TOLERANCE {
            Some(format!("category weights sum to {sum:.2}, expected 100"))
        } else {
            None
        }
    }

    /// Writes suggested weights, clamped into 1–100. Returns one audit entry
    /// per changed weight.
    pub fn apply_suggestion(&mut self, suggestion: &WeightSuggestion, origin: WeightOrigin) -> Vec<WeightAuditEntry> {
        let mut audit = Vec::new();
        for (id, weight) in &suggestion.categories {
            if !weight.is_finite() {
                continue;
            }
            if let Ok(entry) = self.set_category(id, weight.clamp(1.0, 100.0), origin) {
                audit.push(entry);
            }
        }
        for (id, weight) in &suggestion.indicators {
            if !weight.is_finite() {
                continue;
            }
            if let Ok(entry) = self.set_indicator(id, weight.clamp(1.0, 100.0), origin) {
                audit.push(entry);
            }
        }
        audit
    }

    pub fn reset(&mut self, registry: &IndicatorRegistry) -> Vec<WeightAuditEntry> {
        let defaults = Self::from_registry(registry);
        let now = Utc::now();
        let mut audit = Vec::new();
        for (id, weight) in &defaults.categories {
            let previous = self.categories.get(id).copied();
            if previous != Some(*weight) {
                audit.push(WeightAuditEntry {
                    at: now,
                    target: WeightTarget::Category(id.clone()),
                    previous,
                    current: *weight,
                    origin: WeightOrigin::Default,
                });
            }
        }
        for (id, weight) in &defaults.indicators {
            let previous = self.indicators.get(id).copied();
            if previous != Some(*weight) {
                audit.push(WeightAuditEntry {
                    at: now,
                    target: WeightTarget::Indicator(id.clone()),
                    previous,
                    current: *weight,
                    origin: WeightOrigin::Default,
                });
            }
        }
        *self = defaults;
        audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::ComparisonMethod;

    fn unweighted(id: &str) -> Indicator {
        Indicator {
            id: id.into(),
            name: id.into(),
            unit: String::new(),
            category: "greenery".into(),
            weight: None,
            lower_is_better: false,
            comparison_method: ComparisonMethod::Numeric,
            custom: true,
        }
    }

    #[test]
    fn unset_weight_defaults_to_ten() {
        let weights = WeightConfig::default();
        assert_eq!(weights.indicator_weight(&unweighted("x")), 10.0);
    }

    #[test]
    fn configured_weight_wins_over_indicator_default() {
        let registry = IndicatorRegistry::builtin();
        let mut weights = WeightConfig::from_registry(&registry);
        let green = registry.indicator("green_area").unwrap();
        assert_eq!(weights.indicator_weight(green), 20.0);
        let audit = weights.set_indicator("green_area", 35.0, WeightOrigin::Manual).unwrap();
        assert_eq!(audit.previous, Some(20.0));
        assert_eq!(weights.indicator_weight(green), 35.0);
    }

    #[test]
    fn out_of_range_weight_is_rejected() {
        let mut weights = WeightConfig::default();
        assert!(weights.set_indicator("a", 120.0, WeightOrigin::Manual).is_err());
        assert!(weights.set_category("c", -1.0, WeightOrigin::Manual).is_err());
        assert!(weights.set_category("c", f64::NAN, WeightOrigin::Manual).is_err());
    }

    #[test]
    fn category_sum_only_warns() {
        let mut weights = WeightConfig::from_registry(&IndicatorRegistry::builtin());
        assert!(weights.category_sum_warning().is_none());
        weights.set_category("transport", 50.0, WeightOrigin::Manual).unwrap();
        let warning = weights.category_sum_warning().unwrap();
        assert!(warning.contains("130.00"));
    }

    #[test]
    fn suggestion_is_clamped() {
        let mut weights = WeightConfig::default();
        let mut suggestion = WeightSuggestion::default();
        suggestion.indicators.insert("green_area".into(), 250.0);
        suggestion.categories.insert("greenery".into(), 0.0);
        let audit = weights.apply_suggestion(&suggestion, WeightOrigin::Ai);
        assert_eq!(audit.len(), 2);
        assert_eq!(weights.indicators["green_area"], 100.0);
        assert_eq!(weights.categories["greenery"], 1.0);
        assert!(audit.iter().all(|a| a.origin == WeightOrigin::Ai));
    }

    #[test]
    fn reset_restores_defaults_and_audits_changes() {
        let registry = IndicatorRegistry::builtin();
        let mut weights = WeightConfig::from_registry(&registry);
        weights.set_indicator("green_area", 80.0, WeightOrigin::Manual).unwrap();
        let audit = weights.reset(&registry);
        assert_eq!(audit.len(), 1);
        assert_eq!(weights, WeightConfig::from_registry(&registry));
    }
}
