//! Indicator and category catalogue used by the comparison wizard.
//!
//! The built-in catalogue covers the usual urban-planning parameters of a
//! development proposal. Users may add custom indicators at runtime; those are
//! stored in the wizard state and merged with the built-ins on demand.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{AppError, Result};

/// Weight used for indicators that carry no weight of their own.
pub const DEFAULT_INDICATOR_WEIGHT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComparisonMethod {
    #[default]
    Numeric,
    Categorical,
    Qualitative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub category: String,
    /// Default weight (0–100). `None` means unset.
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub lower_is_better: bool,
    #[serde(default)]
    pub comparison_method: ComparisonMethod,
    #[serde(default)]
    pub custom: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorRegistry {
    pub categories: Vec<Category>,
    pub indicators: Vec<Indicator>,
}

fn category(id: &str, name: &str, weight: f64) -> Category {
    Category {
        id: id.into(),
        name: name.into(),
        weight,
    }
}

fn numeric(id: &str, name: &str, unit: &str, category: &str, weight: f64, lower_is_better: bool) -> Indicator {
    Indicator {
        id: id.into(),
        name: name.into(),
        unit: unit.into(),
        category: category.into(),
        weight: Some(weight),
        lower_is_better,
        comparison_method: ComparisonMethod::Numeric,
        custom: false,
    }
}

impl IndicatorRegistry {
    pub fn builtin() -> Self {
        let categories = vec![
            category("land_use", "Využití území", 30.0),
            category("greenery", "Zeleň a veřejný prostor", 25.0),
            category("transport", "Doprava", 20.0),
            category("buildings", "Zástavba", 25.0),
        ];

        let mut indicators = vec![
            numeric("site_area", "Plocha řešeného území", "m²", "land_use", 10.0, false),
            numeric("built_up_area", "Zastavěná plocha", "m²", "land_use", 10.0, false),
            numeric("floor_area_ratio", "Index podlažních ploch", "", "land_use", 15.0, false),
            numeric("green_area", "Plocha zeleně", "m²", "greenery", 20.0, false),
            numeric("paved_area", "Zpevněné plochy", "m²", "greenery", 10.0, true),
            numeric("new_trees", "Počet nových stromů", "ks", "greenery", 10.0, false),
            numeric("parking_spaces", "Počet parkovacích stání", "ks", "transport", 10.0, false),
            numeric("bicycle_spaces", "Stání pro kola", "ks", "transport", 5.0, false),
            numeric("transit_distance", "Docházková vzdálenost MHD", "m", "transport", 10.0, true),
            numeric("gross_floor_area", "Hrubá podlažní plocha", "m²", "buildings", 15.0, false),
            numeric("housing_units", "Počet bytů", "ks", "buildings", 15.0, false),
            numeric("max_floors", "Maximální podlažnost", "NP", "buildings", 5.0, true),
        ];
        indicators.push(Indicator {
            id: "architectural_quality".into(),
            name: "Architektonická kvalita".into(),
            unit: String::new(),
            category: "buildings".into(),
            weight: None,
            lower_is_better: false,
            comparison_method: ComparisonMethod::Qualitative,
            custom: false,
        });

        Self {
            categories,
            indicators,
        }
    }

    /// Built-in catalogue extended by user-created indicators. Customs that
    /// collide with an existing id are ignored.
    pub fn with_custom(customs: &[Indicator]) -> Self {
        let mut registry = Self::builtin();
        for custom in customs {
            if registry.indicator(&custom.id).is_none() {
                let mut custom = custom.clone();
                custom.custom = true;
                registry.indicators.push(custom);
            }
        }
        registry
    }

    pub fn indicator(&self, id: &str) -> Option<&Indicator> {
        self.indicators.iter().find(|i| i.id == id)
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Looks a category up by id first, then by case-insensitive name.
    pub fn category_by_key(&self, key: &str) -> Option<&Category> {
        let key = key.trim();
        self.category(key).or_else(|| {
            let lower = key.to_lowercase();
            self.categories.iter().find(|c| c.name.to_lowercase() == lower)
        })
    }

    pub fn indicators_in<'a>(&'a self, category_id: &'a str) -> impl Iterator<Item = &'a Indicator> + 'a {
        self.indicators.iter().filter(move |i| i.category == category_id)
    }

    /// Resolves an ordered selection. Unknown ids are skipped.
    pub fn select(&self, ids: &[String]) -> Vec<Indicator> {
        ids.iter()
            .filter_map(|id| self.indicator(id))
            .cloned()
            .collect()
    }

    pub fn add_custom(&mut self, mut indicator: Indicator) -> Result<()> {
        if indicator.id.trim().is_empty() || indicator.name.trim().is_empty() {
            return Err(AppError::Validation("indicator id and name must not be empty".into()));
        }
        if self.indicator(&indicator.id).is_some() {
            return Err(AppError::Conflict(format!("indicator '{}' already exists", indicator.id)));
        }
        if let Some(w) = indicator.weight {
            if !w.is_finite() || !(0.0..=100.0).contains(&w) {
                return Err(AppError::Validation(format!("weight {w} is outside 0–100")));
            }
        }
        indicator.custom = true;
        self.indicators.push(indicator);
        Ok(())
    }

    /// Indicators whose category is not a known category id. Only reported.
    pub fn integrity_warnings(&self) -> Vec<String> {
        self.indicators
            .iter()
            .filter(|i| self.category(&i.category).is_none())
            .map(|i| format!("indicator '{}' references unknown category '{}'", i.id, i.category))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_category_weights_sum_to_hundred() {
        let registry = IndicatorRegistry::builtin();
        let sum: f64 = registry.categories.iter().map(|c| c.weight).sum();
        assert!((sum - 100.0).abs() < 1e-9);
        assert!(registry.integrity_warnings().is_empty());
    }

    #[test]
    fn custom_indicator_with_duplicate_id_is_rejected() {
        let mut registry = IndicatorRegistry::builtin();
        let dup = registry.indicators[0].clone();
        assert!(matches!(registry.add_custom(dup), Err(AppError::Conflict(_))));
    }

    #[test]
    fn unknown_category_is_reported_not_rejected() {
        let mut registry = IndicatorRegistry::builtin();
        registry
            .add_custom(Indicator {
                id: "noise".into(),
                name: "Hluk".into(),
                unit: "dB".into(),
                category: "environment".into(),
                weight: Some(5.0),
                lower_is_better: true,
                comparison_method: ComparisonMethod::Numeric,
                custom: false,
            })
            .unwrap();
        let added = registry.indicator("noise").unwrap();
        assert!(added.custom);
        assert_eq!(registry.integrity_warnings().len(), 1);
    }

    #[test]
    fn selection_skips_unknown_ids_and_keeps_order() {
        let registry = IndicatorRegistry::builtin();
        let picked = registry.select(&["paved_area".into(), "nope".into(), "green_area".into()]);
        let ids: Vec<_> = picked.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["paved_area", "green_area"]);
    }

    #[test]
    fn category_lookup_by_name_is_case_insensitive() {
        let registry = IndicatorRegistry::builtin();
        assert_eq!(registry.category_by_key("doprava").map(|c| c.id.as_str()), Some("transport"));
        assert_eq!(registry.category_by_key("greenery").map(|c| c.id.as_str()), Some("greenery"));
    }
}
