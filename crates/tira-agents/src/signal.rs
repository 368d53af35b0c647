use std::sync::Arc;
use std::time::Duration;

use tira_models::TradeSignal;
use tracing::{debug, warn};

use crate::claude_cli::LanguageModel;
use crate::prompts::{signal_fallback_system_prompt, PROPOSAL_MARKER};

/// Result of reducing decision text to a canonical action.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSignal {
    pub signal: TradeSignal,
    /// The text that could not be resolved, kept for human triage.
    pub unresolved: Option<String>,
}

impl ExtractedSignal {
    fn resolved(signal: TradeSignal) -> Self {
        Self {
            signal,
            unresolved: None,
        }
    }

    fn unknown(text: &str) -> Self {
        Self {
            signal: TradeSignal::Unknown,
            unresolved: Some(text.to_string()),
        }
    }
}

/// Whole-word action keywords with their byte offsets, in order of appearance.
fn action_words(text: &str) -> Vec<(usize, TradeSignal)> {
    let mut found = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        if ch.is_alphanumeric() {
            start.get_or_insert(i);
        } else if let Some(s) = start.take() {
            if let Some(signal) = TradeSignal::from_action_word(&text[s..i]) {
                found.push((s, signal));
            }
        }
    }
    found
}

/// The action directly after the marker. Only separators may sit between the two.
fn marked_action(tail: &str) -> Option<TradeSignal> {
    let rest = tail.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '*' | '-'));
    let end = rest
        .find(|c: char| !c.is_alphanumeric())
        .unwrap_or(rest.len());
    TradeSignal::from_action_word(&rest[..end])
}

/// Reduce free-form decision text to BUY, SELL, HOLD or UNKNOWN.
///
/// The last `FINAL TRANSACTION PROPOSAL: <ACTION>` marker wins when an action follows it
/// directly. Otherwise the action keyword nearest the end of the text is used.
pub fn extract_signal(text: &str) -> ExtractedSignal {
    let upper = text.to_ascii_uppercase();

    if let Some(pos) = upper.rfind(PROPOSAL_MARKER) {
        let tail = &text[pos + PROPOSAL_MARKER.len()..];
        if let Some(signal) = marked_action(tail) {
            return ExtractedSignal::resolved(signal);
        }
    }

    match action_words(text).last() {
        Some((_, signal)) => ExtractedSignal::resolved(*signal),
        None => ExtractedSignal::unknown(text),
    }
}

/// Keyword extraction with an optional one-word LLM fallback.
#[derive(Clone, Default)]
pub struct SignalProcessor {
    fallback: Option<Arc<dyn LanguageModel>>,
}

impl SignalProcessor {
    pub fn new(fallback: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { fallback }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Extract the signal. The fallback model only runs when keywords give nothing and a
    /// `fallback_deadline` is given; its answer counts only if it is itself an action word.
    /// A fallback that misses its deadline leaves the keyword result in place.
    pub async fn process(
        &self,
        decision: Option<&str>,
        fallback_deadline: Option<Duration>,
    ) -> ExtractedSignal {
        let Some(text) = decision else {
            return ExtractedSignal {
                signal: TradeSignal::Unknown,
                unresolved: None,
            };
        };

        let extracted = extract_signal(text);
        if extracted.signal.is_actionable() {
            return extracted;
        }
        let (Some(model), Some(deadline)) = (&self.fallback, fallback_deadline) else {
            return extracted;
        };

        let answer =
            tokio::time::timeout(deadline, model.complete(&signal_fallback_system_prompt(), text))
                .await;
        match answer {
            Ok(Ok(answer)) => match TradeSignal::from_action_word(answer.trim().trim_matches('*')) {
                Some(signal) => {
                    debug!(%signal, "signal resolved by fallback model");
                    ExtractedSignal::resolved(signal)
                }
                None => {
                    warn!(answer = %answer.trim(), "fallback model did not return an action");
                    extracted
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "signal fallback failed");
                extracted
            }
            Err(_) => {
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "signal fallback timed out, keeping keyword result"
                );
                extracted
            }
        }
    }
}
