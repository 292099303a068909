//! Asks the chat model for category and indicator weights.
//!
//! The answer is expected as `{"kategorie": {name: weight}, "indikatory": {id: weight}}`.
//! Models rarely stick to that exactly, so parsing is lenient: code fences and
//! prose are stripped, English keys are accepted, categories may be named by id
//! or display name, and weights are clamped into 1–100.

use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::indicator::{Indicator, IndicatorRegistry};
use crate::json_relaxed::parse_json_relaxed;
use crate::openai_client::{call_openai_chat, msg, OpenAiSettings, PromptError};
use crate::proposal::{parse_number, Proposal};
use crate::weights::WeightSuggestion;

const SYSTEM_PROMPT: &str = r#"Jsi expert na urbanismus a hodnocení architektonicko-urbanistických soutěží.
Navrhni váhy kategorií a indikátorů pro porovnání návrhů.

Odpověz výhradně jedním JSON objektem v tomto tvaru:
{
  "kategorie": { "<název kategorie>": <váha 1-100> },
  "indikatory": { "<id indikátoru>": <váha 1-100> }
}

- Součet vah kategorií má být 100.
- Používej pouze uvedené kategorie a id indikátorů.
- Nepřidávej žádný další text."#;

const MAX_PROPOSALS_IN_PROMPT: usize = 10;

fn user_prompt(registry: &IndicatorRegistry, indicators: &[Indicator], proposals: &[Proposal]) -> String {
    let mut out = String::from("KATEGORIE:\n");
    for c in &registry.categories {
        out.push_str(&format!("- {} (id: {}, aktuální váha: {:.0})\n", c.name, c.id, c.weight));
    }

    out.push_str("\nINDIKÁTORY:\n");
    for i in indicators {
        let direction = if i.lower_is_better { "nižší je lepší" } else { "vyšší je lepší" };
        let unit = if i.unit.is_empty() { "-" } else { i.unit.as_str() };
        out.push_str(&format!(
            "- {}: {} [{}], kategorie {}, {}\n",
            i.id, i.name, unit, i.category, direction
        ));
    }

    if !proposals.is_empty() {
        out.push_str("\nNÁVRHY:\n");
        for p in proposals.iter().take(MAX_PROPOSALS_IN_PROMPT) {
            let values: Vec<String> = indicators
                .iter()
                .filter_map(|i| p.value(&i.id).as_f64().map(|v| format!("{}={}", i.id, v)))
                .collect();
            out.push_str(&format!("- {}: {}\n", p.name, values.join(", ")));
        }
    }
    out
}

pub fn build_messages(registry: &IndicatorRegistry, indicators: &[Indicator], proposals: &[Proposal]) -> Vec<ChatCompletionMessage> {
    vec![
        msg(ChatCompletionMessageRole::System, SYSTEM_PROMPT),
        msg(ChatCompletionMessageRole::User, &user_prompt(registry, indicators, proposals)),
    ]
}

fn weight_of(value: &Value) -> Option<f64> {
    let weight = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    };
    weight.filter(|w| w.is_finite()).map(|w| w.clamp(1.0, 100.0))
}

fn section<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Map<String, Value>> {
    keys.iter().find_map(|k| obj.get(*k)).and_then(Value::as_object)
}

fn resolve_indicator<'a>(registry: &'a IndicatorRegistry, key: &str) -> Option<&'a Indicator> {
    let key = key.trim();
    registry.indicator(key).or_else(|| {
        let lower = key.to_lowercase();
        registry.indicators.iter().find(|i| i.name.to_lowercase() == lower)
    })
}

pub fn parse_weight_suggestion(raw: &str, registry: &IndicatorRegistry) -> Result<WeightSuggestion, PromptError> {
    let value = parse_json_relaxed(raw).map_err(PromptError::Parse)?;
    let obj = value
        .as_object()
        .ok_or_else(|| PromptError::Parse("expected a JSON object".into()))?;

    let categories = section(obj, &["kategorie", "categories"]);
    let indicators = section(obj, &["indikatory", "indikátory", "indicators"]);
    if categories.is_none() && indicators.is_none() {
        return Err(PromptError::Parse("answer has neither kategorie nor indikatory".into()));
    }

    let mut suggestion = WeightSuggestion::default();
    for (key, v) in categories.into_iter().flatten() {
        match (registry.category_by_key(key), weight_of(v)) {
            (Some(c), Some(w)) => {
                suggestion.categories.insert(c.id.clone(), w);
            }
            (None, _) => warn!(category = %key, "AI suggested unknown category, ignored"),
            (_, None) => warn!(category = %key, "AI suggested non-numeric weight, ignored"),
        }
    }
    for (key, v) in indicators.into_iter().flatten() {
        match (resolve_indicator(registry, key), weight_of(v)) {
            (Some(i), Some(w)) => {
                suggestion.indicators.insert(i.id.clone(), w);
            }
            (None, _) => warn!(indicator = %key, "AI suggested unknown indicator, ignored"),
            (_, None) => warn!(indicator = %key, "AI suggested non-numeric weight, ignored"),
        }
    }
    Ok(suggestion)
}

/// Requests a weight suggestion for the given indicators. The result is not
/// applied; callers decide whether to write it into the weight store.
pub async fn suggest_weights(
    client: &Client,
    settings: &OpenAiSettings,
    registry: &IndicatorRegistry,
    indicators: &[Indicator],
    proposals: &[Proposal],
) -> Result<WeightSuggestion, PromptError> {
    let messages = build_messages(registry, indicators, proposals);
    let raw = call_openai_chat(client, settings, messages, None, None).await?;
    let suggestion = parse_weight_suggestion(&raw, registry)?;
    info!(
        categories = suggestion.categories.len(),
        indicators = suggestion.indicators.len(),
        "received weight suggestion"
    );
    Ok(suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn czech_answer_is_resolved_against_registry() {
        let registry = IndicatorRegistry::builtin();
        let raw = r#"```json
{"kategorie": {"Doprava": 15, "Zeleň a veřejný prostor": 35, "Neznámá": 10},
 "indikatory": {"green_area": "40", "paved_area": 250, "bogus": 5}}
```"#;
        let s = parse_weight_suggestion(raw, &registry).unwrap();
        assert_eq!(s.categories.get("transport"), Some(&15.0));
        assert_eq!(s.categories.get("greenery"), Some(&35.0));
        assert_eq!(s.categories.len(), 2);
        assert_eq!(s.indicators.get("green_area"), Some(&40.0));
        assert_eq!(s.indicators.get("paved_area"), Some(&100.0));
        assert!(!s.indicators.contains_key("bogus"));
    }

    #[test]
    fn english_keys_are_accepted() {
        let registry = IndicatorRegistry::builtin();
        let s = parse_weight_suggestion(r#"{"indicators": {"Počet bytů": 0}}"#, &registry).unwrap();
        assert_eq!(s.indicators.get("housing_units"), Some(&1.0));
        assert!(s.categories.is_empty());
    }

    #[test]
    fn answer_without_sections_is_a_parse_error() {
        let registry = IndicatorRegistry::builtin();
        assert!(matches!(
            parse_weight_suggestion(r#"{"weights": {}}"#, &registry),
            Err(PromptError::Parse(_))
        ));
        assert!(matches!(
            parse_weight_suggestion("Bohužel nemohu pomoci.", &registry),
            Err(PromptError::Parse(_))
        ));
    }

    #[test]
    fn prompt_lists_selected_indicators_and_values() {
        let registry = IndicatorRegistry::builtin();
        let indicators = registry.select(&["green_area".into()]);
        let mut p = Proposal::new("Návrh A");
        p.set_value(
            "green_area",
            crate::proposal::IndicatorEntry::number(13650.0, crate::proposal::SourceKind::Document),
        );
        let messages = build_messages(&registry, &indicators, &[p]);
        let user = messages.last().unwrap().content.clone().unwrap();
        assert!(user.contains("green_area: Plocha zeleně"));
        assert!(user.contains("Návrh A: green_area=13650"));
        assert!(!user.contains("paved_area"));
    }
}
