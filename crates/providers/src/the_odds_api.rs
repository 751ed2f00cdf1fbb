//! The Odds API (v4) adapter.
//!
//! One request returns every bookmaker the API aggregates for a sport, so a
//! single registered provider yields offers from many bookmakers. Each offer
//! keeps the bookmaker key as its `provider_id`; the orchestrator stamps the
//! registered id as `source_id`.

use arbys_core::{
    EventDescriptor, Offer, OddsError, OddsFormat, OddsProvider, ProviderError, H2H_MARKET,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Public v4 endpoint.
pub const THE_ODDS_API_URL: &str = "https://api.the-odds-api.com/v4";

/// Fallback wait when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: String,
    #[serde(default)]
    sport_key: String,
    commence_time: DateTime<Utc>,
    home_team: String,
    away_team: String,
    #[serde(default)]
    bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize)]
struct ApiBookmaker {
    key: String,
    #[serde(default)]
    title: String,
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize)]
struct ApiMarket {
    key: String,
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize)]
struct ApiOutcome {
    name: String,
    price: serde_json::Number,
}

pub struct TheOddsApiProvider {
    id: String,
    http: Client,
    base_url: String,
    api_key: SecretString,
    regions: Vec<String>,
    sport_keys: BTreeMap<String, String>,
}

impl TheOddsApiProvider {
    /// Creates an adapter with its own request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] if the HTTP client cannot be built.
    pub fn new(
        id: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            id: id.into(),
            http,
            base_url: THE_ODDS_API_URL.to_string(),
            api_key,
            regions: vec!["us".to_string(), "uk".to_string()],
            sport_keys: BTreeMap::new(),
        })
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    #[must_use]
    pub fn with_sport_keys(mut self, sport_keys: BTreeMap<String, String>) -> Self {
        self.sport_keys = sport_keys;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// API sport key for a pipeline sport name; unmapped names pass through.
    pub fn sport_key<'a>(&'a self, sport: &'a str) -> &'a str {
        self.sport_keys.get(sport).map_or(sport, String::as_str)
    }

    async fn get_events(&self, sport_key: &str) -> Result<Vec<ApiEvent>, ProviderError> {
        let url = format!("{}/sports/{}/odds", self.base_url, sport_key);
        let regions = self.regions.join(",");
        debug!(provider = %self.id, url = %url, regions = %regions, "GET odds");

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(&[
                ("apiKey", self.api_key.expose_secret()),
                ("regions", regions.as_str()),
                ("markets", H2H_MARKET),
                ("oddsFormat", "decimal"),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        if let Some(remaining) = response
            .headers()
            .get("x-requests-remaining")
            .and_then(|v| v.to_str().ok())
        {
            debug!(provider = %self.id, remaining, "Quota headroom");
        }

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::rate_limited(retry_after_secs));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::api(status.as_u16(), text));
        }

        let body = response
            .bytes()
            .await
            .map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::parse(e.to_string()))
    }
}

/// Maps a transport failure without its URL, whose query carries the api key.
fn transport_error(error: reqwest::Error) -> ProviderError {
    let error = error.without_url();
    if error.is_timeout() {
        ProviderError::timeout(error.to_string())
    } else if error.is_decode() {
        ProviderError::parse(error.to_string())
    } else {
        ProviderError::network(error.to_string())
    }
}

fn to_offers(sport: &str, events: Vec<ApiEvent>, fetched_at: DateTime<Utc>) -> Vec<Offer> {
    let mut offers = Vec::new();
    for event in events {
        let descriptor =
            EventDescriptor::new(sport, &event.home_team, &event.away_team, event.commence_time);

        for bookmaker in &event.bookmakers {
            for market in bookmaker.markets.iter().filter(|m| m.key == H2H_MARKET) {
                let observed_at = market
                    .last_update
                    .or(bookmaker.last_update)
                    .unwrap_or(fetched_at);

                for outcome in &market.outcomes {
                    let raw = outcome.price.to_string();
                    let odds = match OddsFormat::Decimal.to_decimal(&raw) {
                        Ok(odds) => odds,
                        // Kept so the normalizer reports it as skipped.
                        Err(OddsError::NotAboveOne { decimal, .. }) => decimal,
                        Err(e) => {
                            warn!(bookmaker = %bookmaker.key, event = %event.id, error = %e, "Dropping unusable price");
                            continue;
                        }
                    };

                    let payload = serde_json::json!({
                        "event_id": event.id,
                        "sport_key": event.sport_key,
                        "bookmaker": bookmaker.key,
                        "bookmaker_title": bookmaker.title,
                        "market": market.key,
                        "outcome": outcome.name,
                        "price": outcome.price,
                    });

                    offers.push(
                        Offer::new(
                            bookmaker.key.clone(),
                            event.id.clone(),
                            descriptor.clone(),
                            outcome.name.clone(),
                            odds,
                            observed_at,
                        )
                        .with_raw_payload(payload),
                    );
                }
            }
        }
    }
    offers
}

#[async_trait]
impl OddsProvider for TheOddsApiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, sport: &str) -> Result<Vec<Offer>, ProviderError> {
        let sport_key = self.sport_key(sport);
        let events = self.get_events(sport_key).await?;
        let event_count = events.len();
        let offers = to_offers(sport, events, Utc::now());

        debug!(provider = %self.id, sport_key, events = event_count, offers = offers.len(), "Fetched odds");
        Ok(offers)
    }
}

impl std::fmt::Debug for TheOddsApiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TheOddsApiProvider")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body() -> serde_json::Value {
        serde_json::json!([{
            "id": "e1",
            "sport_key": "soccer_epl",
            "sport_title": "EPL",
            "commence_time": "2026-08-15T14:00:00Z",
            "home_team": "Arsenal",
            "away_team": "Chelsea",
            "bookmakers": [
                {
                    "key": "williamhill",
                    "title": "William Hill",
                    "last_update": "2026-08-15T10:00:00Z",
                    "markets": [{
                        "key": "h2h",
                        "last_update": "2026-08-15T10:01:00Z",
                        "outcomes": [
                            {"name": "Arsenal", "price": 2.1},
                            {"name": "Chelsea", "price": 3.4},
                            {"name": "Draw", "price": 3.3}
                        ]
                    }]
                },
                {
                    "key": "pinnacle",
                    "title": "Pinnacle",
                    "markets": [
                        {"key": "spreads", "outcomes": [{"name": "Arsenal", "price": 1.9}]},
                        {"key": "h2h", "outcomes": [
                            {"name": "Arsenal", "price": 2.05},
                            {"name": "Chelsea", "price": 1.0}
                        ]}
                    ]
                }
            ]
        }])
    }

    async fn provider(server: &MockServer) -> TheOddsApiProvider {
        let mut keys = BTreeMap::new();
        keys.insert("soccer".to_string(), "soccer_epl".to_string());
        TheOddsApiProvider::new("odds-api", SecretString::from("k3y".to_string()), Duration::from_secs(2))
            .unwrap()
            .with_base_url(server.uri())
            .with_sport_keys(keys)
    }

    // ==================== Mapping Tests ====================

    #[tokio::test]
    async fn test_fetch_maps_bookmakers_to_offers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sports/soccer_epl/odds"))
            .and(query_param("apiKey", "k3y"))
            .and(query_param("markets", "h2h"))
            .and(query_param("oddsFormat", "decimal"))
            .and(query_param("regions", "us,uk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .mount(&server)
            .await;

        let offers = provider(&server).await.fetch("soccer").await.unwrap();

        // Three from williamhill, two h2h prices from pinnacle.
        assert_eq!(offers.len(), 5);
        let wh: Vec<_> = offers.iter().filter(|o| o.provider_id == "williamhill").collect();
        assert_eq!(wh.len(), 3);
        assert_eq!(wh[0].decimal_odds, dec!(2.1));
        assert_eq!(wh[0].event.sport, "soccer");
        assert_eq!(wh[0].event.home, "Arsenal");
        assert_eq!(wh[0].event_key, "e1");
        assert_eq!(wh[0].observed_at.to_rfc3339(), "2026-08-15T10:01:00+00:00");
        assert_eq!(wh[0].raw_payload["bookmaker_title"], "William Hill");

        let pin: Vec<_> = offers.iter().filter(|o| o.provider_id == "pinnacle").collect();
        assert_eq!(pin.len(), 2);
        assert_eq!(pin[0].decimal_odds, dec!(2.05));
        // Passed through for the normalizer to skip, not dropped here.
        assert_eq!(pin[1].decimal_odds, dec!(1.0));
        assert!(!pin[1].has_valid_odds());
    }

    #[tokio::test]
    async fn test_unmapped_sport_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sports/basketball_nba/odds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let offers = provider(&server).await.fetch("basketball_nba").await.unwrap();
        assert!(offers.is_empty());
    }

    // ==================== Error Mapping Tests ====================

    #[tokio::test]
    async fn test_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
            .mount(&server)
            .await;

        let err = provider(&server).await.fetch("soccer").await.unwrap_err();
        assert_eq!(err, ProviderError::rate_limited(17));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = provider(&server).await.fetch("soccer").await.unwrap_err();
        assert_eq!(err, ProviderError::api(502, "bad gateway"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_garbage_body_maps_to_parse() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = provider(&server).await.fetch("soccer").await.unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[tokio::test]
    async fn test_slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let provider = TheOddsApiProvider::new("slow", SecretString::from("k".to_string()), Duration::from_millis(50))
            .unwrap()
            .with_base_url(server.uri());
        let err = provider.fetch("soccer").await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_transport_errors_never_carry_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let slow = TheOddsApiProvider::new("slow", SecretString::from("TOPSECRET42".to_string()), Duration::from_millis(50))
            .unwrap()
            .with_base_url(server.uri());
        let timeout = slow.fetch("soccer").await.unwrap_err();
        assert!(matches!(timeout, ProviderError::Timeout(_)));
        assert!(!timeout.to_string().contains("TOPSECRET42"));
        assert!(!format!("{timeout:?}").contains("TOPSECRET42"));

        // Nothing listens on port 9; connection refused.
        let unreachable = TheOddsApiProvider::new("down", SecretString::from("TOPSECRET42".to_string()), Duration::from_secs(2))
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let network = unreachable.fetch("soccer").await.unwrap_err();
        assert!(matches!(network, ProviderError::Network(_) | ProviderError::Timeout(_)));
        assert!(!network.to_string().contains("TOPSECRET42"));
        assert!(!network.to_string().contains("apiKey"));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let provider = TheOddsApiProvider::new("odds-api", SecretString::from("s3cret".to_string()), Duration::from_secs(1))
            .unwrap();
        let debug = format!("{provider:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("odds-api"));
    }
}
