use crate::state::AppState;
use arbys_arbitrage::{ProviderCondition, ProviderLatency, ScanReport};
use arbys_core::{Opportunity, RiskLevel};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 500;

// =============================================================================
// Errors
// =============================================================================

/// Request-level failure rendered as a JSON body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "status": self.status.as_u16(),
        });
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub default_sport: String,
    pub global_timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ProviderHealthView {
    pub enabled: bool,
    pub status: ProviderCondition,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_response_ms: Option<u64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub daily_quota: Option<u32>,
    pub daily_quota_remaining: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", "degraded", or "unhealthy".
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub server: ServerInfo,
    pub providers: BTreeMap<String, ProviderHealthView>,
}

/// Overall status from the enabled providers' conditions.
fn overall_status<'a>(conditions: impl Iterator<Item = &'a ProviderCondition>) -> &'static str {
    let conditions: Vec<_> = conditions.collect();
    if conditions.is_empty() || conditions.iter().all(|c| **c == ProviderCondition::Down) {
        "unhealthy"
    } else if conditions.iter().any(|c| **c != ProviderCondition::Healthy) {
        "degraded"
    } else {
        "healthy"
    }
}

/// Server and per-provider status.
///
/// # Errors
/// Never fails; the signature matches the other handlers.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, StatusCode> {
    let now = Utc::now();
    let orchestrator = state.pipeline.orchestrator();

    let providers: BTreeMap<String, ProviderHealthView> = orchestrator
        .provider_status()
        .into_iter()
        .map(|s| {
            (
                s.id,
                ProviderHealthView {
                    enabled: s.enabled,
                    status: s.status,
                    success_count: s.success_count,
                    error_count: s.error_count,
                    avg_response_ms: s.avg_response_ms,
                    last_success: s.last_success,
                    last_error: s.last_error,
                    last_error_at: s.last_error_at,
                    daily_quota: s.daily_quota,
                    daily_quota_remaining: s.daily_quota_remaining,
                },
            )
        })
        .collect();

    let status = overall_status(providers.values().filter(|p| p.enabled).map(|p| &p.status));

    Ok(Json(HealthResponse {
        status: status.to_string(),
        timestamp: now,
        version: env!("CARGO_PKG_VERSION").to_string(),
        server: ServerInfo {
            started_at: state.started_at,
            uptime_secs: (now - state.started_at).num_seconds(),
            default_sport: state.default_sport.clone(),
            global_timeout_ms: orchestrator.global_timeout().as_millis() as u64,
        },
        providers,
    }))
}

// =============================================================================
// Opportunities
// =============================================================================

/// Parsed `/api/opportunities` query. Invalid values fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityQuery {
    pub sport: String,
    pub min_profit_pct: Decimal,
    pub limit: usize,
    pub include_raw: bool,
}

impl OpportunityQuery {
    pub fn from_params(
        params: &HashMap<String, String>,
        default_sport: &str,
        default_min_profit_pct: Decimal,
    ) -> Self {
        let sport = params
            .get("sport")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(default_sport)
            .to_string();

        let min_profit_pct = params
            .get("min_profit_pct")
            .and_then(|s| Decimal::from_str(s.trim()).ok())
            .filter(|pct| *pct >= Decimal::ZERO)
            .unwrap_or(default_min_profit_pct);

        let limit = params
            .get("limit")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map_or(DEFAULT_LIMIT, |n| n.clamp(1, MAX_LIMIT as i64) as usize);

        let include_raw = params.get("include_raw").is_some_and(|s| {
            matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
        });

        Self {
            sport,
            min_profit_pct,
            limit,
            include_raw,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OutcomeView {
    pub outcome: String,
    pub odds: f64,
    pub provider: String,
    pub odds_format: &'static str,
}

#[derive(Debug, Serialize)]
pub struct OpportunityView {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    pub sport: String,
    pub market: String,
    pub outcomes: Vec<OutcomeView>,
    pub implied_sum: f64,
    pub profit_pct: f64,
    pub providers: Vec<String>,
    pub risk_level: RiskLevel,
    pub risk_warnings: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<serde_json::Value>>,
}

impl OpportunityView {
    fn from_opportunity(opp: &Opportunity, id: String, include_raw: bool) -> Self {
        Self {
            id,
            event_id: opp.event_id.clone(),
            event_name: opp.event_name(),
            sport: opp.sport.clone(),
            market: opp.market.clone(),
            outcomes: opp
                .legs
                .iter()
                .map(|leg| OutcomeView {
                    outcome: leg.outcome.to_string(),
                    odds: to_f64(leg.odds()),
                    provider: leg.provider_id().to_string(),
                    odds_format: "decimal",
                })
                .collect(),
            implied_sum: to_f64(opp.implied_sum.round_dp(6)),
            profit_pct: to_f64(opp.profit_pct.round_dp(4)),
            providers: opp.providers(),
            risk_level: opp.risk_level,
            risk_warnings: opp.risk_warnings.clone(),
            start_time: opp.start_time,
            raw: include_raw.then(|| {
                opp.legs
                    .iter()
                    .map(|leg| leg.offer.raw_payload.clone())
                    .collect()
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProviderErrorView {
    pub provider: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct OpportunitiesResponse {
    pub count: usize,
    pub sport: String,
    pub min_profit_pct: f64,
    pub as_of: DateTime<Utc>,
    pub latency: BTreeMap<String, ProviderLatency>,
    pub errors: Vec<ProviderErrorView>,
    /// Offers that could not be mapped or were unusable.
    pub skipped: usize,
    pub opportunities: Vec<OpportunityView>,
}

impl OpportunitiesResponse {
    pub fn from_report(report: &ScanReport, query: &OpportunityQuery) -> Self {
        let unix = report.as_of.timestamp();
        let opportunities: Vec<OpportunityView> = report
            .opportunities
            .iter()
            .take(query.limit)
            .enumerate()
            .map(|(idx, opp)| {
                let id = format!("{}-{unix}-{idx}", query.sport);
                OpportunityView::from_opportunity(opp, id, query.include_raw)
            })
            .collect();

        Self {
            count: opportunities.len(),
            sport: query.sport.clone(),
            min_profit_pct: to_f64(report.min_profit_pct),
            as_of: report.as_of,
            latency: report.snapshot.latency.clone(),
            errors: report
                .snapshot
                .errors
                .iter()
                .map(|f| ProviderErrorView {
                    provider: f.provider.clone(),
                    message: f.error.to_string(),
                })
                .collect(),
            skipped: report.skipped.len(),
            opportunities,
        }
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// Runs one scan and returns the opportunities found.
///
/// # Errors
/// Returns 503 when no provider is enabled. A single provider failing is
/// reported in `errors` and never fails the request.
pub async fn opportunities(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<OpportunitiesResponse>, ApiError> {
    let query = OpportunityQuery::from_params(
        &params,
        &state.default_sport,
        state.pipeline.default_min_profit_pct(),
    );

    let cancel = state.shutdown.child_token();
    let report = state
        .pipeline
        .scan(&query.sport, query.min_profit_pct, &cancel)
        .await
        .map_err(|e| {
            warn!(sport = %query.sport, error = %e, "Scan failed");
            ApiError::unavailable(e.to_string())
        })?;

    info!(
        sport = %query.sport,
        opportunities = report.opportunities.len(),
        provider_errors = report.snapshot.errors.len(),
        elapsed_ms = report.snapshot.elapsed_ms,
        "Served opportunities"
    );

    Ok(Json(OpportunitiesResponse::from_report(&report, &query)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    // ==================== Query Parsing Tests ====================

    #[test]
    fn test_defaults_when_absent() {
        let q = OpportunityQuery::from_params(&HashMap::new(), "soccer", dec!(1.0));
        assert_eq!(q.sport, "soccer");
        assert_eq!(q.min_profit_pct, dec!(1.0));
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert!(!q.include_raw);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let q = OpportunityQuery::from_params(
            &params(&[("sport", "  "), ("min_profit_pct", "lots"), ("limit", "ten"), ("include_raw", "maybe")]),
            "soccer",
            dec!(1.0),
        );
        assert_eq!(q.sport, "soccer");
        assert_eq!(q.min_profit_pct, dec!(1.0));
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert!(!q.include_raw);

        let negative = OpportunityQuery::from_params(&params(&[("min_profit_pct", "-2")]), "soccer", dec!(1.0));
        assert_eq!(negative.min_profit_pct, dec!(1.0));
    }

    #[test]
    fn test_limit_is_clamped() {
        let high = OpportunityQuery::from_params(&params(&[("limit", "9999")]), "soccer", dec!(1.0));
        assert_eq!(high.limit, MAX_LIMIT);
        let low = OpportunityQuery::from_params(&params(&[("limit", "0")]), "soccer", dec!(1.0));
        assert_eq!(low.limit, 1);
    }

    #[test]
    fn test_explicit_values() {
        let q = OpportunityQuery::from_params(
            &params(&[("sport", "tennis"), ("min_profit_pct", "2.5"), ("limit", "20"), ("include_raw", "YES")]),
            "soccer",
            dec!(1.0),
        );
        assert_eq!(q.sport, "tennis");
        assert_eq!(q.min_profit_pct, dec!(2.5));
        assert_eq!(q.limit, 20);
        assert!(q.include_raw);
    }

    // ==================== Health Status Tests ====================

    #[test]
    fn test_overall_status() {
        use ProviderCondition::{Degraded, Down, Healthy};
        assert_eq!(overall_status(std::iter::empty()), "unhealthy");
        assert_eq!(overall_status([Healthy, Healthy].iter()), "healthy");
        assert_eq!(overall_status([Healthy, Down].iter()), "degraded");
        assert_eq!(overall_status([Degraded].iter()), "degraded");
        assert_eq!(overall_status([Down, Down].iter()), "unhealthy");
    }
}
