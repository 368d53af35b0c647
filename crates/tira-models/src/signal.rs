use serde::{Deserialize, Serialize};

/// Canonical trading action distilled from the final decision text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSignal {
    Buy,
    Sell,
    Hold,
    #[default]
    Unknown,
}

impl TradeSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSignal::Buy => "BUY",
            TradeSignal::Sell => "SELL",
            TradeSignal::Hold => "HOLD",
            TradeSignal::Unknown => "UNKNOWN",
        }
    }

    /// Parse a single action word. Anything else is `None`, not `Unknown`.
    pub fn from_action_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeSignal::Buy),
            "SELL" => Some(TradeSignal::Sell),
            "HOLD" => Some(TradeSignal::Hold),
            _ => None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, TradeSignal::Unknown)
    }
}

impl std::fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
