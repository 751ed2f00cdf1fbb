//! Domain types shared by every stage of the pipeline.
//!
//! Offers flow in from provider adapters, are grouped into
//! [`CanonicalEvent`]s by the normalizer and reduced to [`Opportunity`]s by
//! the detector. All of them live for a single fetch cycle.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Head-to-head (match winner) market, the only market the pipeline groups.
pub const H2H_MARKET: &str = "h2h";

fn default_market() -> String {
    H2H_MARKET.to_string()
}

// =============================================================================
// Offers
// =============================================================================

/// Source-local description of the event an offer prices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Sport as requested from the provider (e.g. "soccer").
    pub sport: String,
    /// Home participant as the provider spells it.
    pub home: String,
    /// Away participant as the provider spells it.
    pub away: String,
    /// Scheduled start.
    pub start_time: DateTime<Utc>,
    /// Market key.
    #[serde(default = "default_market")]
    pub market: String,
}

impl EventDescriptor {
    /// Creates a head-to-head descriptor.
    pub fn new(
        sport: impl Into<String>,
        home: impl Into<String>,
        away: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            sport: sport.into(),
            home: home.into(),
            away: away.into(),
            start_time,
            market: default_market(),
        }
    }

    /// Sets the market key.
    #[must_use]
    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = market.into();
        self
    }

    /// Human-readable "home vs away" label.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} vs {}", self.home, self.away)
    }
}

/// One bookmaker's price for one outcome of one event at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Bookmaker quoting the price.
    pub provider_id: String,
    /// Adapter that fetched the price (one adapter may relay many bookmakers).
    pub source_id: String,
    /// Source-local event identifier.
    pub event_key: String,
    /// Source-local event description.
    pub event: EventDescriptor,
    /// Source-local outcome label ("Home", "1", "Arsenal", ...).
    pub outcome_label: String,
    /// Decimal odds; valid offers are strictly above 1.0.
    pub decimal_odds: Decimal,
    /// When the provider observed this price.
    pub observed_at: DateTime<Utc>,
    /// Original provider payload, kept for audit.
    #[serde(default)]
    pub raw_payload: serde_json::Value,
}

impl Offer {
    /// Creates an offer whose source is the quoting bookmaker itself.
    pub fn new(
        provider_id: impl Into<String>,
        event_key: impl Into<String>,
        event: EventDescriptor,
        outcome_label: impl Into<String>,
        decimal_odds: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let provider_id = provider_id.into();
        Self {
            source_id: provider_id.clone(),
            provider_id,
            event_key: event_key.into(),
            event,
            outcome_label: outcome_label.into(),
            decimal_odds,
            observed_at,
            raw_payload: serde_json::Value::Null,
        }
    }

    /// Sets the adapter that fetched this offer.
    #[must_use]
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    /// Attaches the original provider payload.
    #[must_use]
    pub fn with_raw_payload(mut self, raw: serde_json::Value) -> Self {
        self.raw_payload = raw;
        self
    }

    /// Returns true if the odds are strictly above 1.0.
    #[must_use]
    pub fn has_valid_odds(&self) -> bool {
        self.decimal_odds > Decimal::ONE
    }

    /// Age of the quote relative to `as_of`.
    #[must_use]
    pub fn age(&self, as_of: DateTime<Utc>) -> Duration {
        as_of - self.observed_at
    }

    /// Returns true if the quote is older than `max_age` at `as_of`.
    #[must_use]
    pub fn is_stale(&self, as_of: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(as_of) > max_age
    }
}

// =============================================================================
// Canonical events
// =============================================================================

/// Provider-independent outcome of a head-to-head market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKey {
    /// Home participant wins.
    Home,
    /// Draw.
    Draw,
    /// Away participant wins.
    Away,
}

impl OutcomeKey {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Draw => "draw",
            Self::Away => "away",
        }
    }
}

impl fmt::Display for OutcomeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outcome of a canonical event with at most one offer per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Which result this outcome represents.
    pub key: OutcomeKey,
    /// Current offers, sorted by `provider_id`.
    pub offers: Vec<Offer>,
}

/// Normalized identity of a real-world event across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Deterministic identifier derived from the normalized identity.
    pub event_id: String,
    /// Sport.
    pub sport: String,
    /// Market key.
    pub market: String,
    /// Home participant (display spelling).
    pub home: String,
    /// Away participant (display spelling).
    pub away: String,
    /// Scheduled start.
    pub start_time: DateTime<Utc>,
    /// Outcomes ordered by [`OutcomeKey`].
    pub outcomes: Vec<Outcome>,
}

impl CanonicalEvent {
    /// Looks up an outcome by key.
    #[must_use]
    pub fn outcome(&self, key: OutcomeKey) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    /// Distinct providers quoting any outcome of this event.
    #[must_use]
    pub fn providers(&self) -> BTreeSet<&str> {
        self.outcomes
            .iter()
            .flat_map(|o| o.offers.iter().map(|offer| offer.provider_id.as_str()))
            .collect()
    }

    /// Total number of offers across outcomes.
    #[must_use]
    pub fn offer_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.offers.len()).sum()
    }

    /// Human-readable "home vs away" label.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} vs {}", self.home, self.away)
    }
}

// =============================================================================
// Opportunities
// =============================================================================

/// Qualitative risk attached to an opportunity or an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The best offer chosen for one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityLeg {
    /// Outcome covered by this leg.
    pub outcome: OutcomeKey,
    /// Chosen offer.
    pub offer: Offer,
}

impl OpportunityLeg {
    /// Decimal odds of the chosen offer.
    #[must_use]
    pub fn odds(&self) -> Decimal {
        self.offer.decimal_odds
    }

    /// Bookmaker of the chosen offer.
    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.offer.provider_id
    }
}

/// A risk-free combination of best prices for one canonical event.
///
/// Re-derived every cycle and never mutated after detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub event_id: String,
    pub sport: String,
    pub market: String,
    pub home: String,
    pub away: String,
    pub start_time: DateTime<Utc>,
    /// One leg per outcome, ordered by [`OutcomeKey`].
    pub legs: Vec<OpportunityLeg>,
    /// `Σ 1/odds` over the legs; below 1 for a true arbitrage.
    pub implied_sum: Decimal,
    /// `(1/implied_sum - 1) * 100`.
    pub profit_pct: Decimal,
    pub risk_level: RiskLevel,
    pub risk_warnings: Vec<String>,
    /// The `as_of` instant detection ran against.
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    /// Human-readable "home vs away" label.
    #[must_use]
    pub fn event_name(&self) -> String {
        format!("{} vs {}", self.home, self.away)
    }

    /// Distinct bookmakers used by the legs, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.legs
            .iter()
            .map(|leg| leg.offer.provider_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Looks up the leg for an outcome.
    #[must_use]
    pub fn leg(&self, outcome: OutcomeKey) -> Option<&OpportunityLeg> {
        self.legs.iter().find(|leg| leg.outcome == outcome)
    }
}
