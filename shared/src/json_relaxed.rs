//! Helpers for parsing loosely formatted JSON responses returned by LLMs,
//! stripping code fences, extracting the first balanced object and patching
//! the usual syntax slips with a few regex rewrites.

use regex::Regex;
use serde_json::Value;

/// Attempt to parse JSON even when the response contains code fences, extra
/// text or small syntax errors.
pub fn parse_json_relaxed(input: &str) -> Result<Value, String> {
    let t = strip_code_fences(input.trim());
    if let Ok(v) = serde_json::from_str::<Value>(t) {
        return Ok(v);
    }
    let candidate = extract_first_balanced_json(t).unwrap_or_else(|| t.to_string());
    if let Ok(v) = serde_json::from_str::<Value>(&candidate) {
        return Ok(v);
    }
    let trailing_comma = Regex::new(r",\s*([}\]])").map_err(|e| e.to_string())?;
    let without_commas = trailing_comma.replace_all(&candidate, "$1");
    if let Ok(v) = serde_json::from_str::<Value>(&without_commas) {
        return Ok(v);
    }
    let repaired = repair(&candidate)?;
    serde_json::from_str::<Value>(&repaired).map_err(|e| format!("invalid JSON after repair: {e}"))
}

/// Remove common Markdown code fences around JSON snippets.
fn strip_code_fences(s: &str) -> &str {
    let s = s.strip_prefix("```json").unwrap_or(s);
    let s = s.strip_prefix("```").unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

/// Extract the first balanced JSON object or array from the input string.
fn extract_first_balanced_json(s: &str) -> Option<String> {
    let mut in_str = false;
    let mut esc = false;
    let mut stack: Vec<char> = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in s.char_indices() {
        if in_str {
            if esc {
                esc = false;
            } else if ch == '\\' {
                esc = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }

        match ch {
            '"' => in_str = true,
            '{' | '[' => {
                if start.is_none() {
                    start = Some(i);
                }
                stack.push(ch);
            }
            '}' | ']' => {
                if let Some(open) = stack.pop() {
                    let matches = (open == '{' && ch == '}') || (open == '[' && ch == ']');
                    if !matches {
                        stack.clear();
                        start = None;
                        continue;
                    }
                    if stack.is_empty() {
                        let st = start.unwrap_or(0);
                        return Some(s[st..=i].to_string());
                    }
                } else {
                    start = None;
                }
            }
            _ => {}
        }
    }
    None
}

/// Turns single quoted strings into double quoted ones. Apostrophes inside
/// double quoted strings are left alone.
fn single_to_double_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_double = false;
    let mut in_single = false;
    let mut esc = false;
    for ch in s.chars() {
        if esc {
            out.push(ch);
            esc = false;
            continue;
        }
        match ch {
            '\\' if in_double || in_single => {
                out.push(ch);
                esc = true;
            }
            '"' if in_single => out.push_str("\\\""),
            '"' => {
                in_double = !in_double;
                out.push(ch);
            }
            '\'' if in_double => out.push(ch),
            '\'' => {
                in_single = !in_single;
                out.push('"');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Regex based fixes: smart quotes, single quoted strings, unquoted keys and
/// trailing commas. Also closes objects the model forgot to close.
fn repair(s: &str) -> Result<String, String> {
    let smart_quotes = Regex::new(r"[\u{201C}\u{201D}\u{201E}]").map_err(|e| e.to_string())?;
    let unquoted_key = Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_\-]*)\s*:"#).map_err(|e| e.to_string())?;
    let trailing_comma = Regex::new(r",\s*([}\]])").map_err(|e| e.to_string())?;

    let mut out = smart_quotes.replace_all(s, "\"").to_string();
    out = single_to_double_quotes(&out);
    out = unquoted_key.replace_all(&out, "$1\"$2\":").to_string();
    out = trailing_comma.replace_all(&out, "$1").to_string();

    // fehlende schließende Klammern ergänzen
    let opens = out.matches('{').count();
    let closes = out.matches('}').count();
    if opens > closes {
        out = out.trim_end().trim_end_matches(',').to_string();
        out.push_str(&"}".repeat(opens - closes));
    }
    if !out.trim_start().starts_with('{') && !out.trim_start().starts_with('[') {
        return Err("no JSON object found".into());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_json_is_accepted() {
        let v = parse_json_relaxed("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn prose_around_object_is_ignored() {
        let v = parse_json_relaxed("Navrhuji tyto váhy: {\"kategorie\": {\"Doprava\": 20}} Hotovo.").unwrap();
        assert_eq!(v, json!({"kategorie": {"Doprava": 20}}));
    }

    #[test]
    fn trailing_commas_and_single_quotes_are_repaired() {
        let v = parse_json_relaxed("{'indikatory': {'green_area': 30, 'paved_area': 10,},}").unwrap();
        assert_eq!(v, json!({"indikatory": {"green_area": 30, "paved_area": 10}}));
    }

    #[test]
    fn apostrophes_in_strings_survive_repair() {
        let v = parse_json_relaxed(r#"{"kategorie": {"Doprava": 20,}, "poznamka": "it's fine, don't worry"}"#).unwrap();
        assert_eq!(v, json!({"kategorie": {"Doprava": 20}, "poznamka": "it's fine, don't worry"}));

        let v = parse_json_relaxed(r#"{'kategorie': {'Doprava': 20}, "poznamka": "it's fine"}"#).unwrap();
        assert_eq!(v, json!({"kategorie": {"Doprava": 20}, "poznamka": "it's fine"}));
    }

    #[test]
    fn unquoted_keys_and_missing_brace_are_repaired() {
        let v = parse_json_relaxed("{kategorie: {\"Zeleň\": 40}").unwrap();
        assert_eq!(v, json!({"kategorie": {"Zeleň": 40}}));
    }

    #[test]
    fn plain_text_is_rejected() {
        assert!(parse_json_relaxed("Nevím.").is_err());
    }
}
