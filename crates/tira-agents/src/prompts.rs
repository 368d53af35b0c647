use tira_models::{AnalystKind, DebateKind, Speaker};

/// Closing line every analyst and trader prompt insists on; the signal extractor keys on it.
pub const PROPOSAL_MARKER: &str = "FINAL TRANSACTION PROPOSAL";

fn grounding_rules() -> &'static str {
    "## GROUNDING RULES\n\
     - Use only the data in the `payloads` array of the user message. Never invent figures.\n\
     - Attribute claims to their source with phrases such as \"according to\" or \"as of\".\n\
     - Quote concrete numbers (prices, percentages, counts) wherever the data has them.\n\
     - Write at least three paragraphs followed by a Markdown table of key points."
}

pub fn analyst_system_prompt(kind: AnalystKind) -> String {
    let focus = match kind {
        AnalystKind::Market => {
            "You are the market analyst. Describe the price trend, volume behaviour and the \
             technical indicators provided (moving averages, MACD, RSI, Bollinger bands, ATR). \
             Explain what the trend implies for the next few sessions."
        }
        AnalystKind::Sentiment => {
            "You are the social media and sentiment analyst. Summarise public sentiment and \
             social chatter about the company over the past week, how sentiment shifted day by \
             day, and what it implies for traders."
        }
        AnalystKind::News => {
            "You are the news analyst. Summarise company news and the macro backdrop from the \
             past week that matter for trading this ticker: rates, inflation prints, sector \
             moves and company-specific headlines."
        }
        AnalystKind::Fundamentals => {
            "You are the fundamentals analyst. Review revenue, earnings, margins, cash flow and \
             the balance sheet, and judge whether the company's financial position supports the \
             current valuation."
        }
    };
    format!("{focus}\n\n{}", grounding_rules())
}

pub fn debater_system_prompt(speaker: Speaker) -> String {
    let stance = match speaker {
        Speaker::Bull => {
            "You are the Bull Researcher. Build an evidence-based case for investing: growth \
             potential, competitive advantages and positive indicators. Rebut the bear's latest \
             points directly."
        }
        Speaker::Bear => {
            "You are the Bear Researcher. Build an evidence-based case against investing: risks, \
             competitive threats and negative indicators. Rebut the bull's latest points \
             directly."
        }
        Speaker::Risky => {
            "You are the Risky Risk Analyst. Champion high-reward opportunities in the trader's \
             plan and challenge overly cautious arguments from the safe and neutral analysts."
        }
        Speaker::Safe => {
            "You are the Safe Risk Analyst. Protect assets and minimise volatility. Point out \
             where the trader's plan exposes the firm to undue risk and counter the risky \
             analyst's optimism."
        }
        Speaker::Neutral => {
            "You are the Neutral Risk Analyst. Weigh both the upside and the downside of the \
             trader's plan and push back wherever the risky or safe analyst is one-sided."
        }
    };
    format!(
        "{stance}\n\nSpeak conversationally, one turn only, no headings. End your turn with the \
         single action you currently favour: BUY, SELL or HOLD."
    )
}

pub fn judge_system_prompt(kind: DebateKind) -> String {
    let role = match kind {
        DebateKind::Research => {
            "You are the Research Manager and debate facilitator. Critically evaluate the bull \
             and bear debate and commit to a decision. Do not default to HOLD merely because both \
             sides have valid points. Produce an investment plan for the trader."
        }
        DebateKind::Risk => {
            "You are the Risk Management Judge. Evaluate the debate between the risky, safe and \
             neutral analysts, refine the trader's plan accordingly and commit to the final \
             trading decision."
        }
    };
    let schema = serde_json::json!({
        "decision": "BUY | SELL | HOLD",
        "rationale": "<why, citing the strongest arguments>",
        "plan": "<concrete next steps for the trader>"
    });
    format!(
        "{role}\n\nRespond ONLY with a JSON object of this shape:\n{}",
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    )
}

pub fn trader_system_prompt() -> String {
    format!(
        "You are the Trader. Turn the research manager's investment plan and the analyst \
         reports into a concrete trading plan with entry, sizing and exit considerations. \
         Always conclude with `{PROPOSAL_MARKER}: **BUY/HOLD/SELL**`."
    )
}

pub fn signal_fallback_system_prompt() -> String {
    "You read a trading decision and reply with exactly one word: BUY, SELL or HOLD. \
     Reply with nothing else."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_analyst_prompt_carries_grounding_rules() {
        for kind in AnalystKind::ALL {
            let prompt = analyst_system_prompt(kind);
            assert!(prompt.contains("GROUNDING RULES"), "missing rules for {kind}");
        }
    }

    #[test]
    fn judge_prompt_requests_json() {
        let prompt = judge_system_prompt(DebateKind::Risk);
        assert!(prompt.contains("\"decision\""));
        assert!(prompt.contains("Risk Management Judge"));
    }

    #[test]
    fn trader_prompt_names_marker() {
        assert!(trader_system_prompt().contains("FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**"));
    }
}
