//! Arbitrage detection over canonical events.
//!
//! For each event the detector picks the best current price per outcome in
//! one linear pass, sums the implied probabilities and reports an
//! [`Opportunity`] when the sum is below one by at least the caller's
//! threshold. Work is `O(total offers)`; outcome combinations are never
//! enumerated.
//!
//! Detection is a pure function of the events, the threshold and the `as_of`
//! instant: identical inputs always yield identical opportunities with the
//! same chosen offers.

use arbys_core::{
    CanonicalEvent, DetectorConfig, Offer, Opportunity, OpportunityLeg, Outcome, RiskLevel,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, trace};

/// Implied sum and profit for one event, before the threshold is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<'a> {
    /// Best offer per outcome, in outcome order.
    pub best: Vec<(&'a Outcome, &'a Offer)>,
    pub implied_sum: Decimal,
    pub profit_pct: Decimal,
}

impl Evaluation<'_> {
    /// Returns true if the prices guarantee a profit.
    pub fn is_arbitrage(&self) -> bool {
        self.implied_sum < Decimal::ONE
    }
}

/// Summary of one detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub events_scanned: usize,
    /// Events whose implied sum was below one, regardless of threshold.
    pub arbitrage_events: usize,
    pub opportunities: usize,
    pub best_profit_pct: Option<Decimal>,
}

/// `Σ 1/odds`. Odds must be above 1.0.
pub fn implied_sum<I>(odds: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    odds.into_iter().map(|o| Decimal::ONE / o).sum()
}

/// `(1/implied_sum - 1) * 100`.
pub fn profit_pct(implied_sum: Decimal) -> Decimal {
    if implied_sum <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (Decimal::ONE / implied_sum - Decimal::ONE) * Decimal::ONE_HUNDRED
}

/// Highest-priced current offer; ties go to the lowest `provider_id`.
pub fn best_offer(offers: &[Offer], as_of: DateTime<Utc>, staleness: Duration) -> Option<&Offer> {
    let mut best: Option<&Offer> = None;
    for offer in offers {
        if !offer.has_valid_odds() || offer.is_stale(as_of, staleness) {
            continue;
        }
        best = match best {
            None => Some(offer),
            Some(current) => {
                let better = offer.decimal_odds > current.decimal_odds
                    || (offer.decimal_odds == current.decimal_odds
                        && offer.provider_id < current.provider_id);
                Some(if better { offer } else { current })
            }
        };
    }
    best
}

pub struct ArbitrageDetector {
    config: DetectorConfig,
}

impl ArbitrageDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Best prices and implied sum for one event.
    ///
    /// Returns `None` when fewer than two outcomes have a current offer.
    pub fn evaluate<'a>(&self, event: &'a CanonicalEvent, as_of: DateTime<Utc>) -> Option<Evaluation<'a>> {
        let staleness = Duration::hours(self.config.staleness_hours);
        let best: Vec<(&Outcome, &Offer)> = event
            .outcomes
            .iter()
            .filter_map(|outcome| best_offer(&outcome.offers, as_of, staleness).map(|o| (outcome, o)))
            .collect();

        if best.len() < 2 {
            trace!(event_id = %event.event_id, priced = best.len(), "Too few priced outcomes");
            return None;
        }

        let implied_sum = implied_sum(best.iter().map(|(_, offer)| offer.decimal_odds));
        Some(Evaluation {
            profit_pct: profit_pct(implied_sum),
            implied_sum,
            best,
        })
    }

    /// Opportunities with `profit_pct >= min_profit_pct`, best first.
    pub fn detect(
        &self,
        events: &[CanonicalEvent],
        min_profit_pct: Decimal,
        as_of: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        self.detect_with_summary(events, min_profit_pct, as_of).0
    }

    pub fn detect_with_summary(
        &self,
        events: &[CanonicalEvent],
        min_profit_pct: Decimal,
        as_of: DateTime<Utc>,
    ) -> (Vec<Opportunity>, DetectionSummary) {
        let mut summary = DetectionSummary {
            events_scanned: events.len(),
            ..DetectionSummary::default()
        };
        let mut opportunities = Vec::new();

        for event in events {
            let Some(evaluation) = self.evaluate(event, as_of) else {
                continue;
            };
            if !evaluation.is_arbitrage() {
                continue;
            }
            summary.arbitrage_events += 1;

            if evaluation.profit_pct < min_profit_pct {
                debug!(
                    event_id = %event.event_id,
                    profit_pct = %evaluation.profit_pct.round_dp(4),
                    min_profit_pct = %min_profit_pct,
                    "Below profit threshold"
                );
                continue;
            }

            let opportunity = self.build_opportunity(event, &evaluation, as_of);
            info!(
                event_id = %opportunity.event_id,
                event = %opportunity.event_name(),
                profit_pct = %opportunity.profit_pct.round_dp(4),
                implied_sum = %opportunity.implied_sum.round_dp(6),
                risk = %opportunity.risk_level,
                "Arbitrage opportunity detected"
            );
            opportunities.push(opportunity);
        }

        opportunities.sort_by(|a, b| {
            b.profit_pct
                .cmp(&a.profit_pct)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        summary.opportunities = opportunities.len();
        summary.best_profit_pct = opportunities.first().map(|o| o.profit_pct);
        (opportunities, summary)
    }

    fn build_opportunity(
        &self,
        event: &CanonicalEvent,
        evaluation: &Evaluation<'_>,
        as_of: DateTime<Utc>,
    ) -> Opportunity {
        let legs: Vec<OpportunityLeg> = evaluation
            .best
            .iter()
            .map(|(outcome, offer)| OpportunityLeg {
                outcome: outcome.key,
                offer: (*offer).clone(),
            })
            .collect();

        let mut risk_warnings = Vec::new();
        let max_age = Duration::minutes(self.config.max_quote_age_minutes);
        for leg in &legs {
            let age = leg.offer.age(as_of);
            if age > max_age {
                risk_warnings.push(format!(
                    "{} quote from {} is {} minutes old",
                    leg.outcome,
                    leg.offer.provider_id,
                    age.num_minutes()
                ));
            }
        }
        if event.start_time <= as_of {
            risk_warnings.push("event has already started".to_string());
        }
        let risk_level = if risk_warnings.is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        };

        Opportunity {
            event_id: event.event_id.clone(),
            sport: event.sport.clone(),
            market: event.market.clone(),
            home: event.home.clone(),
            away: event.away.clone(),
            start_time: event.start_time,
            legs,
            implied_sum: evaluation.implied_sum,
            profit_pct: evaluation.profit_pct,
            risk_level,
            risk_warnings,
            detected_at: as_of,
        }
    }
}

impl Default for ArbitrageDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbys_core::{EventDescriptor, OutcomeKey, H2H_MARKET};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn offer(provider: &str, odds: Decimal) -> Offer {
        Offer::new(
            provider,
            format!("{provider}-evt"),
            EventDescriptor::new("soccer", "Arsenal", "Chelsea", as_of() + Duration::hours(3)),
            "x",
            odds,
            as_of() - Duration::minutes(1),
        )
    }

    fn event(id: &str, outcomes: Vec<(OutcomeKey, Vec<Offer>)>) -> CanonicalEvent {
        CanonicalEvent {
            event_id: id.to_string(),
            sport: "soccer".to_string(),
            market: H2H_MARKET.to_string(),
            home: "Arsenal".to_string(),
            away: "Chelsea".to_string(),
            start_time: as_of() + Duration::hours(3),
            outcomes: outcomes
                .into_iter()
                .map(|(key, offers)| Outcome { key, offers })
                .collect(),
        }
    }

    fn two_way(id: &str, home: Vec<Offer>, away: Vec<Offer>) -> CanonicalEvent {
        event(id, vec![(OutcomeKey::Home, home), (OutcomeKey::Away, away)])
    }

    // ==================== Formula Tests ====================

    #[test]
    fn test_implied_sum_and_profit() {
        let sum = implied_sum([dec!(2.10), dec!(2.05)]);
        assert!((sum - dec!(0.9640)).abs() < dec!(0.0001));

        let profit = profit_pct(sum);
        assert!(profit > dec!(3.73) && profit < dec!(3.74));
    }

    #[test]
    fn test_profit_of_fair_book_is_zero() {
        assert_eq!(profit_pct(implied_sum([dec!(2), dec!(2)])), Decimal::ZERO);
        assert!(profit_pct(implied_sum([dec!(1.9), dec!(1.9)])) < Decimal::ZERO);
    }

    // ==================== Best Offer Tests ====================

    #[test]
    fn test_best_offer_picks_max() {
        let offers = vec![offer("a", dec!(2.0)), offer("b", dec!(2.2)), offer("c", dec!(2.1))];
        let best = best_offer(&offers, as_of(), Duration::hours(24)).unwrap();
        assert_eq!(best.provider_id, "b");
    }

    #[test]
    fn test_best_offer_tie_breaks_on_lowest_provider() {
        let offers = vec![offer("zeta", dec!(2.2)), offer("alpha", dec!(2.2)), offer("mid", dec!(2.2))];
        let best = best_offer(&offers, as_of(), Duration::hours(24)).unwrap();
        assert_eq!(best.provider_id, "alpha");

        let mut reversed = offers.clone();
        reversed.reverse();
        let best = best_offer(&reversed, as_of(), Duration::hours(24)).unwrap();
        assert_eq!(best.provider_id, "alpha");
    }

    #[test]
    fn test_best_offer_ignores_stale() {
        let mut stale = offer("stale", dec!(5.0));
        stale.observed_at = as_of() - Duration::hours(30);
        let offers = vec![stale, offer("fresh", dec!(2.0))];
        let best = best_offer(&offers, as_of(), Duration::hours(24)).unwrap();
        assert_eq!(best.provider_id, "fresh");
    }

    // ==================== Detection Tests ====================

    #[test]
    fn test_detects_example_scenario() {
        let events = vec![two_way(
            "e1",
            vec![offer("provider1", dec!(2.10)), offer("provider2", dec!(1.95))],
            vec![offer("provider1", dec!(1.90)), offer("provider2", dec!(2.05))],
        )];

        let opps = ArbitrageDetector::default().detect(&events, dec!(1.0), as_of());
        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.leg(OutcomeKey::Home).unwrap().provider_id(), "provider1");
        assert_eq!(opp.leg(OutcomeKey::Away).unwrap().provider_id(), "provider2");
        assert!(opp.profit_pct > dec!(3.73) && opp.profit_pct < dec!(3.74));
        assert_eq!(opp.risk_level, RiskLevel::Low);
        assert_eq!(opp.providers(), vec!["provider1", "provider2"]);
        assert_eq!(opp.detected_at, as_of());
    }

    #[test]
    fn test_threshold_filtering() {
        let events = vec![two_way(
            "e1",
            vec![offer("a", dec!(2.10))],
            vec![offer("b", dec!(2.05))],
        )];
        let detector = ArbitrageDetector::default();
        assert_eq!(detector.detect(&events, dec!(3.7), as_of()).len(), 1);
        assert!(detector.detect(&events, dec!(3.8), as_of()).is_empty());

        let (_, summary) = detector.detect_with_summary(&events, dec!(3.8), as_of());
        assert_eq!(summary.arbitrage_events, 1);
        assert_eq!(summary.opportunities, 0);
        assert_eq!(summary.best_profit_pct, None);
    }

    #[test]
    fn test_no_arbitrage_when_book_has_margin() {
        let events = vec![two_way(
            "e1",
            vec![offer("a", dec!(1.90)), offer("b", dec!(1.92))],
            vec![offer("a", dec!(1.90)), offer("b", dec!(1.88))],
        )];
        assert!(ArbitrageDetector::default()
            .detect(&events, Decimal::ZERO, as_of())
            .is_empty());
    }

    #[test]
    fn test_single_provider_outcome_still_participates() {
        let events = vec![event(
            "three-way",
            vec![
                (OutcomeKey::Home, vec![offer("a", dec!(3.2)), offer("b", dec!(3.0))]),
                (OutcomeKey::Draw, vec![offer("c", dec!(3.9))]),
                (OutcomeKey::Away, vec![offer("b", dec!(3.4))]),
            ],
        )];
        let opps = ArbitrageDetector::default().detect(&events, dec!(0.5), as_of());
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].legs.len(), 3);
        assert_eq!(opps[0].leg(OutcomeKey::Draw).unwrap().provider_id(), "c");
    }

    #[test]
    fn test_event_with_one_priced_outcome_skipped() {
        let mut stale = offer("b", dec!(9.0));
        stale.observed_at = as_of() - Duration::days(2);
        let events = vec![two_way("e1", vec![offer("a", dec!(5.0))], vec![stale])];
        let detector = ArbitrageDetector::default();
        assert!(detector.evaluate(&events[0], as_of()).is_none());
        assert!(detector.detect(&events, Decimal::ZERO, as_of()).is_empty());
    }

    #[test]
    fn test_sorted_by_profit_then_event_id() {
        let events = vec![
            two_way("b-small", vec![offer("a", dec!(2.05))], vec![offer("b", dec!(2.05))]),
            two_way("a-big", vec![offer("a", dec!(2.3))], vec![offer("b", dec!(2.3))]),
            two_way("a-small", vec![offer("a", dec!(2.05))], vec![offer("b", dec!(2.05))]),
        ];
        let opps = ArbitrageDetector::default().detect(&events, Decimal::ZERO, as_of());
        let ids: Vec<&str> = opps.iter().map(|o| o.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a-big", "a-small", "b-small"]);
    }

    #[test]
    fn test_old_quote_raises_risk() {
        let mut old = offer("b", dec!(2.2));
        old.observed_at = as_of() - Duration::hours(2);
        let events = vec![two_way("e1", vec![offer("a", dec!(2.2))], vec![old])];

        let opps = ArbitrageDetector::default().detect(&events, dec!(1.0), as_of());
        assert_eq!(opps[0].risk_level, RiskLevel::Medium);
        assert_eq!(opps[0].risk_warnings.len(), 1);
        assert!(opps[0].risk_warnings[0].contains("120 minutes old"));
    }

    #[test]
    fn test_started_event_raises_risk() {
        let mut started = two_way("e1", vec![offer("a", dec!(2.2))], vec![offer("b", dec!(2.2))]);
        started.start_time = as_of() - Duration::minutes(10);
        let opps = ArbitrageDetector::default().detect(&[started], dec!(1.0), as_of());
        assert_eq!(opps[0].risk_level, RiskLevel::Medium);
        assert!(opps[0].risk_warnings.iter().any(|w| w.contains("already started")));
    }

    // ==================== Determinism Tests ====================

    #[test]
    fn test_detect_is_deterministic() {
        let events = vec![
            two_way("e1", vec![offer("a", dec!(2.1)), offer("b", dec!(2.1))], vec![offer("c", dec!(2.05))]),
            two_way("e2", vec![offer("a", dec!(2.4))], vec![offer("b", dec!(1.9))]),
        ];
        let detector = ArbitrageDetector::default();
        let first = detector.detect(&events, dec!(0.1), as_of());
        let second = detector.detect(&events, dec!(0.1), as_of());
        assert_eq!(first, second);
        assert_eq!(first[0].leg(OutcomeKey::Home).unwrap().provider_id(), "a");
    }

    /// Minimum implied sum over every one-offer-per-outcome combination.
    fn brute_force_min_implied(event: &CanonicalEvent) -> Decimal {
        let mut sums = vec![Decimal::ZERO];
        for outcome in &event.outcomes {
            let mut next = Vec::new();
            for partial in &sums {
                for offer in &outcome.offers {
                    next.push(*partial + Decimal::ONE / offer.decimal_odds);
                }
            }
            sums = next;
        }
        sums.into_iter().min().unwrap()
    }

    #[test]
    fn test_linear_pass_matches_brute_force() {
        // Deterministic pseudo-random odds in [1.50, 4.99].
        let mut seed: u64 = 0x5eed;
        let mut next_odds = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            Decimal::new(150 + ((seed >> 33) % 350) as i64, 2)
        };

        let detector = ArbitrageDetector::default();
        for round in 0..50 {
            let providers = ["a", "b", "c", "d"];
            let outcomes = [OutcomeKey::Home, OutcomeKey::Draw, OutcomeKey::Away]
                .into_iter()
                .map(|key| {
                    let offers = providers.iter().map(|p| offer(p, next_odds())).collect();
                    (key, offers)
                })
                .collect();
            let ev = event(&format!("e{round}"), outcomes);

            let evaluation = detector.evaluate(&ev, as_of()).unwrap();
            assert_eq!(evaluation.implied_sum, brute_force_min_implied(&ev));

            let min_profit = Decimal::ZERO;
            let found = !detector.detect(std::slice::from_ref(&ev), min_profit, as_of()).is_empty();
            assert_eq!(found, evaluation.implied_sum < Decimal::ONE);
        }
    }
}
