//! Bet history records and account status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a bet was one leg of an arbitrage or an ordinary punt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetKind {
    Arbitrage,
    Regular,
}

/// Standing of an account with its bookmaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Healthy,
    /// Bookmaker has flagged the account for review.
    UnderReview,
    /// Stakes are being limited.
    Limited,
    /// The account can no longer bet.
    Closed,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::UnderReview => write!(f, "under_review"),
            Self::Limited => write!(f, "limited"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A single placed bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub account_id: String,
    pub placed_at: DateTime<Utc>,
    pub stake: Decimal,
    pub odds: Decimal,
    pub kind: BetKind,
    /// Settled profit (positive) or loss (negative); `None` while open.
    pub profit_loss: Option<Decimal>,
    pub event_name: Option<String>,
    pub outcome: Option<String>,
}

impl BetRecord {
    pub fn new(
        account_id: impl Into<String>,
        placed_at: DateTime<Utc>,
        stake: Decimal,
        odds: Decimal,
        kind: BetKind,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            placed_at,
            stake,
            odds,
            kind,
            profit_loss: None,
            event_name: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn with_profit_loss(mut self, profit_loss: Decimal) -> Self {
        self.profit_loss = Some(profit_loss);
        self
    }

    #[must_use]
    pub fn with_event(mut self, event_name: impl Into<String>, outcome: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self.outcome = Some(outcome.into());
        self
    }

    #[must_use]
    pub fn is_arbitrage(&self) -> bool {
        self.kind == BetKind::Arbitrage
    }
}
