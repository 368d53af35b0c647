use serde::Deserialize;
use tira_models::TradeSignal;

use crate::error::AgentError;

/// Pull the first JSON object out of model output that may wrap it in prose or a code fence.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();
    let candidates = [
        trimmed.starts_with('{').then(|| trimmed.to_string()),
        fenced_block(trimmed),
        first_balanced_object(trimmed),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|candidate| serde_json::from_str::<serde_json::Value>(candidate).is_ok())
        .ok_or_else(|| {
            AgentError::Parse(format!(
                "No valid JSON object found in response (length={})",
                text.len()
            ))
        })
}

/// Body of the first ```json (or bare ```) fence.
fn fenced_block(text: &str) -> Option<String> {
    ["```json", "```"].iter().find_map(|marker| {
        let start = text.find(marker)? + marker.len();
        let body = &text[start..];
        let end = body.find("```")?;
        Some(body[..end].trim().to_string())
    })
}

/// First `{ ... }` with balanced braces, ignoring braces inside string literals.
fn first_balanced_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| text[s..=i].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Structured ruling requested from the research and risk judges.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Judgement {
    pub decision: TradeSignal,
    pub rationale: String,
    #[serde(default)]
    pub plan: Option<String>,
}

impl Judgement {
    /// Decision text stored in the state. Ends with the marker the signal extractor looks for.
    pub fn render(&self) -> String {
        let mut text = self.rationale.trim().to_string();
        if let Some(plan) = self.plan.as_deref().filter(|p| !p.trim().is_empty()) {
            text.push_str("\n\nPlan: ");
            text.push_str(plan.trim());
        }
        text.push_str(&format!("\n\nFINAL TRANSACTION PROPOSAL: **{}**", self.decision));
        text
    }
}

/// Parse and locally validate a judge's JSON ruling.
pub fn parse_judgement(raw: &str) -> Result<Judgement, AgentError> {
    let json_str = extract_json(raw)?;
    let judgement: Judgement = serde_json::from_str(&json_str)
        .map_err(|e| AgentError::Parse(format!("Failed to parse judgement: {e}\nJSON: {json_str}")))?;

    if !judgement.decision.is_actionable() {
        return Err(AgentError::Parse(
            "judgement must decide BUY, SELL or HOLD".to_string(),
        ));
    }
    if judgement.rationale.trim().is_empty() {
        return Err(AgentError::Parse("judgement rationale is empty".to_string()));
    }
    Ok(judgement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"decision": "BUY", "rationale": "test"}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Ruling:\n```json\n{\"decision\": \"HOLD\"}\n```\nDone.";
        assert_eq!(extract_json(input).unwrap(), r#"{"decision": "HOLD"}"#);
    }

    #[test]
    fn extract_from_markdown_no_lang() {
        let input = "Result:\n```\n{\"decision\": \"SELL\"}\n```";
        assert_eq!(extract_json(input).unwrap(), r#"{"decision": "SELL"}"#);
    }

    #[test]
    fn extract_with_prefix_text_and_braces_in_strings() {
        let input = r#"After weighing both sides: {"rationale": "range {low} to {high}", "n": 2} trailing"#;
        let parsed: serde_json::Value =
            serde_json::from_str(&extract_json(input).unwrap()).unwrap();
        assert_eq!(parsed["n"], 2);
    }

    #[test]
    fn extract_no_json() {
        assert!(extract_json("The bull case is stronger, buy.").is_err());
    }

    #[test]
    fn parse_and_render_judgement() {
        let raw = r#"```json
{"decision": "BUY", "rationale": "Bull case rests on 12% revenue growth.", "plan": "Scale in over 3 sessions."}
```"#;
        let judgement = parse_judgement(raw).unwrap();
        assert_eq!(judgement.decision, TradeSignal::Buy);

        let text = judgement.render();
        assert!(text.starts_with("Bull case rests on 12% revenue growth."));
        assert!(text.contains("Plan: Scale in over 3 sessions."));
        assert!(text.ends_with("FINAL TRANSACTION PROPOSAL: **BUY**"));
    }

    #[test]
    fn judgement_without_action_is_rejected() {
        let raw = r#"{"decision": "UNKNOWN", "rationale": "cannot tell"}"#;
        assert!(matches!(parse_judgement(raw), Err(AgentError::Parse(_))));

        let raw = r#"{"decision": "HOLD", "rationale": "  "}"#;
        assert!(parse_judgement(raw).is_err());
    }
}
