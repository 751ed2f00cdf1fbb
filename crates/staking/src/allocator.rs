//! Stake allocation for detected opportunities.
//!
//! The split is the classic equal-payout one: each leg gets a share of the
//! committed capital proportional to `1/odds`. On top of that the allocator
//! makes the amounts look like a person placed them. Healthy accounts get
//! natural $0.05/$0.10 increments, unhealthy or unknown ones get whole
//! dollars, and every stake is jittered so repeated bets are never
//! byte-identical.

use crate::error::AllocationError;
use crate::health::{AccountHealthCache, HealthSnapshot};
use arbys_core::{AccountStatus, AllocatorConfig, Opportunity, OutcomeKey};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Parameters of one allocation call.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub bankroll: Decimal,
    pub account_id: String,
    /// Overrides the configured cap when set, in percent.
    pub max_bankroll_pct: Option<Decimal>,
    /// Fixes the jitter draw; `None` draws from entropy.
    pub jitter_seed: Option<u64>,
}

impl AllocationRequest {
    pub fn new(bankroll: Decimal, account_id: impl Into<String>) -> Self {
        Self {
            bankroll,
            account_id: account_id.into(),
            max_bankroll_pct: None,
            jitter_seed: None,
        }
    }

    #[must_use]
    pub fn with_max_bankroll_pct(mut self, pct: Decimal) -> Self {
        self.max_bankroll_pct = Some(pct);
        self
    }

    #[must_use]
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }
}

/// How stakes were rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// $0.05 up to the coarse threshold, $0.10 above it.
    Natural,
    /// Nearest whole dollar.
    WholeDollar,
}

impl fmt::Display for RoundingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Natural => write!(f, "natural"),
            Self::WholeDollar => write!(f, "whole_dollar"),
        }
    }
}

/// Non-fatal findings attached to a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    StakeBelowMinimum {
        outcome: OutcomeKey,
        stake: Decimal,
        minimum: Decimal,
    },
    InsufficientBankroll {
        cap: Decimal,
        required: Decimal,
    },
    /// Health could not be looked up; whole-dollar rounding was used.
    HealthUnavailable {
        reason: String,
    },
    CriticalStealthScore {
        score: f64,
    },
    AccountClosed,
    /// Stakes for this bankroll would overflow decimal arithmetic.
    BankrollTooLarge {
        bankroll: Decimal,
    },
    /// Rounding and jitter consumed the edge.
    NegativeGuaranteedProfit {
        profit: Decimal,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StakeBelowMinimum {
                outcome,
                stake,
                minimum,
            } => write!(f, "stake {stake} on {outcome} is below the {minimum} minimum"),
            Self::InsufficientBankroll { cap, required } => {
                write!(f, "cap {cap} cannot cover two minimum stakes ({required})")
            }
            Self::HealthUnavailable { reason } => {
                write!(f, "account health unavailable, whole-dollar rounding used: {reason}")
            }
            Self::CriticalStealthScore { score } => {
                write!(f, "stealth score {score:.2} is critical")
            }
            Self::AccountClosed => write!(f, "account is closed"),
            Self::BankrollTooLarge { bankroll } => {
                write!(f, "bankroll {bankroll} is too large to size stakes for")
            }
            Self::NegativeGuaranteedProfit { profit } => {
                write!(f, "rounded stakes lose {profit} in the worst case")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeLeg {
    pub outcome: OutcomeKey,
    pub provider_id: String,
    pub odds: Decimal,
    pub stake: Decimal,
    /// `stake * odds` if this outcome wins.
    pub expected_return: Decimal,
}

/// Concrete stakes for one opportunity and one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakePlan {
    pub account_id: String,
    pub event_id: String,
    /// Empty when the plan was refused; never partial.
    pub stakes: Vec<StakeLeg>,
    pub total_stake: Decimal,
    /// Smallest return over all outcomes.
    pub guaranteed_return: Decimal,
    pub guaranteed_profit: Decimal,
    pub profit_pct: Decimal,
    pub warnings: Vec<Warning>,
    pub rounding: RoundingPolicy,
    pub jitter_pct: Decimal,
    pub stealth_score: Option<f64>,
    pub stake_multiplier: f64,
}

impl StakePlan {
    fn refused(
        opportunity: &Opportunity,
        account_id: &str,
        rounding: RoundingPolicy,
        stealth_score: Option<f64>,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            event_id: opportunity.event_id.clone(),
            stakes: Vec::new(),
            total_stake: Decimal::ZERO,
            guaranteed_return: Decimal::ZERO,
            guaranteed_profit: Decimal::ZERO,
            profit_pct: Decimal::ZERO,
            warnings,
            rounding,
            jitter_pct: Decimal::ZERO,
            stealth_score,
            stake_multiplier: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    pub fn has_warning(&self, predicate: impl Fn(&Warning) -> bool) -> bool {
        self.warnings.iter().any(predicate)
    }
}

pub struct StakeAllocator {
    cache: Arc<AccountHealthCache>,
    config: AllocatorConfig,
}

impl StakeAllocator {
    pub fn new(cache: Arc<AccountHealthCache>, config: AllocatorConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Looks up account health and builds a plan.
    ///
    /// A failed health lookup does not fail the allocation; the plan falls
    /// back to whole-dollar rounding and carries a warning.
    ///
    /// # Errors
    ///
    /// Returns an [`AllocationError`] for a non-positive bankroll, a cap
    /// outside `(0, 100]` or an opportunity with fewer than two legs.
    pub async fn allocate(
        &self,
        opportunity: &Opportunity,
        request: &AllocationRequest,
    ) -> Result<StakePlan, AllocationError> {
        validate(opportunity, request)?;

        let (health, unavailable) = match self.cache.get(&request.account_id).await {
            Ok(lookup) => (Some(lookup.snapshot), None),
            Err(error) => {
                warn!(account_id = %request.account_id, error = %error, "Allocating without account health");
                (None, Some(error.to_string()))
            }
        };

        let mut plan = plan(&self.config, opportunity, request, health.as_ref())?;
        if let Some(reason) = unavailable {
            plan.warnings.insert(0, Warning::HealthUnavailable { reason });
        }

        debug!(
            account_id = %plan.account_id,
            event_id = %plan.event_id,
            total_stake = %plan.total_stake,
            guaranteed_profit = %plan.guaranteed_profit,
            rounding = %plan.rounding,
            warnings = plan.warnings.len(),
            "Allocated stakes"
        );
        Ok(plan)
    }
}

impl fmt::Debug for StakeAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StakeAllocator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate(opportunity: &Opportunity, request: &AllocationRequest) -> Result<(), AllocationError> {
    if request.bankroll <= Decimal::ZERO {
        return Err(AllocationError::InvalidBankroll(request.bankroll));
    }
    if let Some(pct) = request.max_bankroll_pct {
        if pct <= Decimal::ZERO || pct > dec!(100) {
            return Err(AllocationError::InvalidBankrollPct(pct));
        }
    }
    if opportunity.legs.len() < 2 || opportunity.legs.iter().any(|l| l.odds() <= Decimal::ONE) {
        return Err(AllocationError::EmptyOpportunity {
            event_id: opportunity.event_id.clone(),
        });
    }
    Ok(())
}

/// Builds a plan from an already resolved health snapshot.
///
/// Pure apart from the jitter draw, which is fixed by `request.jitter_seed`.
/// `health = None` means the lookup failed: whole-dollar rounding applies.
///
/// # Errors
///
/// Same validation as [`StakeAllocator::allocate`].
pub fn plan(
    config: &AllocatorConfig,
    opportunity: &Opportunity,
    request: &AllocationRequest,
    health: Option<&HealthSnapshot>,
) -> Result<StakePlan, AllocationError> {
    validate(opportunity, request)?;

    let max_pct = request.max_bankroll_pct.unwrap_or(config.max_bankroll_pct);
    if max_pct <= Decimal::ZERO || max_pct > dec!(100) {
        return Err(AllocationError::InvalidBankrollPct(max_pct));
    }

    let stealth_score = health.map(|h| h.stealth_score);
    let rounding = match stealth_score {
        Some(score) if score >= config.stealth_rounding_threshold => RoundingPolicy::Natural,
        _ => RoundingPolicy::WholeDollar,
    };

    let mut warnings = Vec::new();
    if let Some(score) = stealth_score {
        if score < config.critical_stealth_threshold {
            warnings.push(Warning::CriticalStealthScore { score });
        }
    }

    if health.is_some_and(|h| h.status == AccountStatus::Closed) {
        warnings.push(Warning::AccountClosed);
        return Ok(StakePlan::refused(
            opportunity,
            &request.account_id,
            rounding,
            stealth_score,
            warnings,
        ));
    }

    // A multiplier above one never lifts the cap.
    let multiplier = health
        .map_or(1.0, |h| h.recommended_stake_multiplier)
        .clamp(0.0, 1.0);
    let multiplier_dec = Decimal::from_f64(multiplier)
        .unwrap_or(Decimal::ONE)
        .round_dp(4);
    let Some(cap) = capped_stake(request.bankroll, max_pct, multiplier_dec, opportunity) else {
        warn!(bankroll = %request.bankroll, "Bankroll overflows stake arithmetic");
        warnings.push(Warning::BankrollTooLarge {
            bankroll: request.bankroll,
        });
        let mut refused = StakePlan::refused(
            opportunity,
            &request.account_id,
            rounding,
            stealth_score,
            warnings,
        );
        refused.stake_multiplier = multiplier;
        return Ok(refused);
    };

    let required = config.min_stake * dec!(2);
    if cap < required {
        warnings.push(Warning::InsufficientBankroll { cap, required });
        let mut refused = StakePlan::refused(
            opportunity,
            &request.account_id,
            rounding,
            stealth_score,
            warnings,
        );
        refused.stake_multiplier = multiplier;
        return Ok(refused);
    }

    let implied_sum: Decimal = opportunity.legs.iter().map(|l| Decimal::ONE / l.odds()).sum();

    let mut stakes: Vec<Decimal> = opportunity
        .legs
        .iter()
        .map(|leg| {
            let share = (Decimal::ONE / leg.odds()) / implied_sum;
            round_to(cap * share, increment(config, rounding, cap * share))
        })
        .collect();

    let jitter_pct = config.jitter_pct.max(Decimal::ZERO).min(dec!(50));
    if jitter_pct > Decimal::ZERO {
        let mut rng = match request.jitter_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let bound = (jitter_pct * dec!(100)).trunc().to_i64().unwrap_or(0);
        for stake in &mut stakes {
            let draw = rng.gen_range(-bound..=bound);
            let jittered = *stake * (Decimal::ONE + Decimal::new(draw, 4));
            *stake = round_to(jittered, increment(config, rounding, jittered));
        }
    }

    let total: Decimal = stakes.iter().sum();
    if total > cap {
        let scale = cap / total;
        for stake in &mut stakes {
            let scaled = *stake * scale;
            *stake = floor_to(scaled, increment(config, rounding, scaled));
        }
    }

    let legs: Vec<StakeLeg> = opportunity
        .legs
        .iter()
        .zip(&stakes)
        .map(|(leg, &stake)| StakeLeg {
            outcome: leg.outcome,
            provider_id: leg.provider_id().to_string(),
            odds: leg.odds(),
            stake,
            expected_return: stake * leg.odds(),
        })
        .collect();

    for leg in &legs {
        if leg.stake < config.min_stake {
            warnings.push(Warning::StakeBelowMinimum {
                outcome: leg.outcome,
                stake: leg.stake,
                minimum: config.min_stake,
            });
        }
    }

    let total_stake: Decimal = legs.iter().map(|l| l.stake).sum();
    let guaranteed_return = legs
        .iter()
        .map(|l| l.expected_return)
        .min()
        .unwrap_or(Decimal::ZERO);
    let guaranteed_profit = guaranteed_return - total_stake;
    let profit_pct = if total_stake > Decimal::ZERO {
        (guaranteed_profit / total_stake * dec!(100)).round_dp(4)
    } else {
        Decimal::ZERO
    };
    if guaranteed_profit < Decimal::ZERO {
        warnings.push(Warning::NegativeGuaranteedProfit {
            profit: guaranteed_profit,
        });
    }

    Ok(StakePlan {
        account_id: request.account_id.clone(),
        event_id: opportunity.event_id.clone(),
        stakes: legs,
        total_stake,
        guaranteed_return,
        guaranteed_profit,
        profit_pct,
        warnings,
        rounding,
        jitter_pct,
        stealth_score,
        stake_multiplier: multiplier,
    })
}

/// Capital committed to one opportunity, or `None` when the stakes derived
/// from it could overflow. Headroom covers the maximum +50% jitter, division
/// by the smallest rounding increment and the best leg's payout.
fn capped_stake(
    bankroll: Decimal,
    max_pct: Decimal,
    multiplier: Decimal,
    opportunity: &Opportunity,
) -> Option<Decimal> {
    let cap = bankroll
        .checked_mul(max_pct / dec!(100))?
        .checked_mul(multiplier)?
        .round_dp(2);
    let best_odds = opportunity.legs.iter().map(|l| l.odds()).max()?;
    cap.checked_mul(dec!(30))?.checked_mul(best_odds)?;
    Some(cap)
}

fn increment(config: &AllocatorConfig, rounding: RoundingPolicy, stake: Decimal) -> Decimal {
    match rounding {
        RoundingPolicy::WholeDollar => Decimal::ONE,
        RoundingPolicy::Natural if stake > config.coarse_increment_above => dec!(0.10),
        RoundingPolicy::Natural => dec!(0.05),
    }
}

fn round_to(value: Decimal, increment: Decimal) -> Decimal {
    (value / increment).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        * increment
}

fn floor_to(value: Decimal, increment: Decimal) -> Decimal {
    (value / increment).floor() * increment
}
