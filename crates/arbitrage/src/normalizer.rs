//! Cross-provider event and outcome normalization.
//!
//! Providers describe the same fixture differently ("Man Utd" / "Manchester
//! United FC", kick-off a few minutes apart, "1"/"Home"/team name). The
//! [`Normalizer`] maps raw offers onto [`CanonicalEvent`]s.
//!
//! # Matching policy
//!
//! - Names are lowercased, punctuation is stripped, noise tokens (`fc`,
//!   `the`, ...) are dropped and the alias table is applied.
//! - Two listings are the same event iff sport and market are equal, start
//!   times are within `start_tolerance_minutes`, and both participants reach
//!   `min_name_similarity` (token-set Jaccard; exact or alias match is 1.0).
//! - Listings are sorted by their normalized identity before greedy
//!   clustering, so the grouping never depends on arrival order.
//!
//! Home and away are compared positionally; a provider listing the fixture
//! the other way round forms a separate event.

use arbys_core::{
    CanonicalEvent, EventDescriptor, NormalizerConfig, Offer, Outcome, OutcomeKey, H2H_MARKET,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, trace};

// =============================================================================
// Output
// =============================================================================

/// Why an offer was left out of every canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The outcome label matched no entry of the equivalence table.
    UnmappableOutcome,
    /// Odds at or below 1.0.
    InvalidOdds,
    /// Older than the staleness threshold.
    Stale,
    /// A market other than head-to-head.
    UnsupportedMarket,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnmappableOutcome => write!(f, "unmappable outcome label"),
            Self::InvalidOdds => write!(f, "odds not above 1.0"),
            Self::Stale => write!(f, "offer is stale"),
            Self::UnsupportedMarket => write!(f, "unsupported market"),
        }
    }
}

/// An offer excluded from normalization, kept for auditability.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SkippedOffer {
    pub provider_id: String,
    pub event_key: String,
    pub outcome_label: String,
    pub reason: SkipReason,
}

impl SkippedOffer {
    fn new(offer: &Offer, reason: SkipReason) -> Self {
        Self {
            provider_id: offer.provider_id.clone(),
            event_key: offer.event_key.clone(),
            outcome_label: offer.outcome_label.clone(),
            reason,
        }
    }
}

/// Result of normalizing one snapshot.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    /// Events with at least two priced outcomes from at least two providers,
    /// sorted by `event_id`.
    pub events: Vec<CanonicalEvent>,
    pub skipped: Vec<SkippedOffer>,
    /// Events dropped for insufficient data.
    pub insufficient: usize,
}

// =============================================================================
// Normalizer
// =============================================================================

/// Normalized identity of one provider listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ListingKey {
    sport: String,
    market: String,
    start_time: DateTime<Utc>,
    home: String,
    away: String,
}

pub struct Normalizer {
    config: NormalizerConfig,
    noise: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let noise: HashSet<String> = config
            .noise_tokens
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        let mut normalizer = Self {
            config,
            noise,
            aliases: HashMap::new(),
        };
        let aliases = normalizer
            .config
            .aliases
            .iter()
            .map(|(alias, canonical)| (normalizer.clean(alias), normalizer.clean(canonical)))
            .collect();
        normalizer.aliases = aliases;
        normalizer
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Lowercases, strips punctuation and noise tokens; no alias lookup.
    fn clean(&self, name: &str) -> String {
        let lowered: String = name
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(*c, '\'' | '.' | '’'))
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        let kept: Vec<&str> = tokens
            .iter()
            .copied()
            .filter(|t| !self.noise.contains(*t))
            .collect();
        // A name made only of noise tokens keeps them.
        if kept.is_empty() {
            tokens.join(" ")
        } else {
            kept.join(" ")
        }
    }

    /// Canonical spelling of a participant name.
    pub fn normalize_name(&self, name: &str) -> String {
        let cleaned = self.clean(name);
        match self.aliases.get(&cleaned) {
            Some(canonical) => canonical.clone(),
            None => cleaned,
        }
    }

    /// Token-set Jaccard similarity of two normalized names.
    pub fn name_similarity(&self, a: &str, b: &str) -> f64 {
        let a = self.normalize_name(a);
        let b = self.normalize_name(b);
        token_similarity(&a, &b)
    }

    /// Maps a source-local outcome label onto an outcome of `event`.
    pub fn map_outcome(&self, label: &str, event: &EventDescriptor) -> Option<OutcomeKey> {
        let cleaned = self.clean(label);
        match cleaned.as_str() {
            "home" | "1" | "h" => return Some(OutcomeKey::Home),
            "draw" | "x" | "tie" | "d" => return Some(OutcomeKey::Draw),
            "away" | "2" | "a" => return Some(OutcomeKey::Away),
            _ => {}
        }

        let label = self.normalize_name(label);
        let home = self.normalize_name(&event.home);
        let away = self.normalize_name(&event.away);
        if label == home && label != away {
            return Some(OutcomeKey::Home);
        }
        if label == away && label != home {
            return Some(OutcomeKey::Away);
        }

        let home_sim = token_similarity(&label, &home);
        let away_sim = token_similarity(&label, &away);
        let threshold = self.config.min_name_similarity;
        if home_sim >= threshold && home_sim > away_sim {
            Some(OutcomeKey::Home)
        } else if away_sim >= threshold && away_sim > home_sim {
            Some(OutcomeKey::Away)
        } else {
            None
        }
    }

    fn listing_key(&self, event: &EventDescriptor) -> ListingKey {
        ListingKey {
            sport: event.sport.trim().to_lowercase(),
            market: event.market.trim().to_lowercase(),
            start_time: event.start_time,
            home: self.normalize_name(&event.home),
            away: self.normalize_name(&event.away),
        }
    }

    fn same_event(&self, a: &ListingKey, b: &ListingKey) -> bool {
        a.sport == b.sport
            && a.market == b.market
            && (a.start_time - b.start_time).num_minutes().abs() <= self.config.start_tolerance_minutes
            && token_similarity(&a.home, &b.home) >= self.config.min_name_similarity
            && token_similarity(&a.away, &b.away) >= self.config.min_name_similarity
    }

    /// Groups offers into canonical events as of `as_of`.
    pub fn normalize(&self, offers: &[Offer], as_of: DateTime<Utc>) -> NormalizedBatch {
        let staleness = Duration::hours(self.config.staleness_hours);
        let mut skipped = Vec::new();

        // Listing identity -> offers, in a content-defined order.
        let mut listings: BTreeMap<ListingKey, Vec<&Offer>> = BTreeMap::new();
        for offer in offers {
            if !offer.has_valid_odds() {
                skipped.push(SkippedOffer::new(offer, SkipReason::InvalidOdds));
                continue;
            }
            if !offer.event.market.eq_ignore_ascii_case(H2H_MARKET) {
                skipped.push(SkippedOffer::new(offer, SkipReason::UnsupportedMarket));
                continue;
            }
            if offer.is_stale(as_of, staleness) {
                trace!(provider = %offer.provider_id, event_key = %offer.event_key, "Skipping stale offer");
                skipped.push(SkippedOffer::new(offer, SkipReason::Stale));
                continue;
            }
            listings
                .entry(self.listing_key(&offer.event))
                .or_default()
                .push(offer);
        }

        // Greedy clustering against each cluster's first (smallest) listing.
        let mut clusters: Vec<(ListingKey, Vec<&Offer>)> = Vec::new();
        for (key, mut group) in listings {
            group.sort_by(|a, b| offer_order(a, b));
            match clusters.iter_mut().find(|(rep, _)| self.same_event(rep, &key)) {
                Some((_, members)) => members.extend(group),
                None => clusters.push((key, group)),
            }
        }

        let mut events = Vec::new();
        let mut insufficient = 0;
        for (rep, members) in clusters {
            match self.build_event(&rep, &members, &mut skipped) {
                Some(event) => events.push(event),
                None => insufficient += 1,
            }
        }

        events.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        skipped.sort();

        debug!(
            offers = offers.len(),
            events = events.len(),
            skipped = skipped.len(),
            insufficient,
            "Normalized offers"
        );

        NormalizedBatch {
            events,
            skipped,
            insufficient,
        }
    }

    fn build_event(
        &self,
        rep: &ListingKey,
        members: &[&Offer],
        skipped: &mut Vec<SkippedOffer>,
    ) -> Option<CanonicalEvent> {
        // First member belongs to the representative listing.
        let first = &members.first()?.event;

        let mut best: BTreeMap<(OutcomeKey, &str), &Offer> = BTreeMap::new();
        for offer in members {
            let Some(key) = self.map_outcome(&offer.outcome_label, &offer.event) else {
                debug!(
                    provider = %offer.provider_id,
                    label = %offer.outcome_label,
                    event = %offer.event.name(),
                    "Unmappable outcome label"
                );
                skipped.push(SkippedOffer::new(offer, SkipReason::UnmappableOutcome));
                continue;
            };
            best.entry((key, offer.provider_id.as_str()))
                .and_modify(|current| {
                    if supersedes(offer, current) {
                        *current = offer;
                    }
                })
                .or_insert(offer);
        }

        let mut outcomes: Vec<Outcome> = Vec::new();
        for ((key, _provider), offer) in best {
            match outcomes.last_mut() {
                Some(outcome) if outcome.key == key => outcome.offers.push(offer.clone()),
                _ => outcomes.push(Outcome {
                    key,
                    offers: vec![offer.clone()],
                }),
            }
        }

        let providers: BTreeSet<&str> = outcomes
            .iter()
            .flat_map(|o| o.offers.iter().map(|offer| offer.provider_id.as_str()))
            .collect();
        if outcomes.len() < 2 || providers.len() < 2 {
            debug!(
                event = %first.name(),
                outcomes = outcomes.len(),
                providers = providers.len(),
                "Dropping event with insufficient data"
            );
            return None;
        }

        Some(CanonicalEvent {
            event_id: format!(
                "{}:{}:{}:{}",
                rep.sport,
                rep.home.replace(' ', "-"),
                rep.away.replace(' ', "-"),
                rep.start_time.timestamp()
            ),
            sport: rep.sport.clone(),
            market: rep.market.clone(),
            home: first.home.clone(),
            away: first.away.clone(),
            start_time: rep.start_time,
            outcomes,
        })
    }
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

fn token_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }
    let a: BTreeSet<&str> = a.split_whitespace().collect();
    let b: BTreeSet<&str> = b.split_whitespace().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Total order over offers used inside a listing.
fn offer_order(a: &Offer, b: &Offer) -> std::cmp::Ordering {
    a.provider_id
        .cmp(&b.provider_id)
        .then_with(|| a.event_key.cmp(&b.event_key))
        .then_with(|| a.outcome_label.cmp(&b.outcome_label))
        .then_with(|| a.observed_at.cmp(&b.observed_at))
        .then_with(|| a.decimal_odds.cmp(&b.decimal_odds))
}

/// Newer quote wins; then the higher price; then the smaller event key.
fn supersedes(candidate: &Offer, current: &Offer) -> bool {
    candidate
        .observed_at
        .cmp(&current.observed_at)
        .then_with(|| candidate.decimal_odds.cmp(&current.decimal_odds))
        .then_with(|| current.event_key.cmp(&candidate.event_key))
        .is_gt()
}
