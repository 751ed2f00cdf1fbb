//! The Odds API adapter driven through the fetch orchestrator against a mock server.

use arbys_arbitrage::{FetchOrchestrator, ScanPipeline, SkipReason};
use arbys_core::{AppConfig, OutcomeKey, ProviderConfig, ProviderError};
use arbys_providers::{build_provider_with, FixtureProvider};
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_config(server: &MockServer) -> ProviderConfig {
    let mut config = ProviderConfig::the_odds_api("odds-api").with_retries(1, 10);
    config.base_url = Some(server.uri());
    config.sport_keys.insert("soccer".to_string(), "soccer_epl".to_string());
    config
}

fn env(_var: &str) -> Option<String> {
    Some("test-key".to_string())
}

fn odds_body() -> serde_json::Value {
    let kickoff = (chrono::Utc::now() + chrono::Duration::hours(3)).to_rfc3339();
    serde_json::json!([{
        "id": "e1",
        "sport_key": "soccer_epl",
        "commence_time": kickoff,
        "home_team": "Arsenal",
        "away_team": "Chelsea",
        "bookmakers": [
            {"key": "williamhill", "title": "William Hill", "markets": [{"key": "h2h", "outcomes": [
                {"name": "Arsenal", "price": 2.10}, {"name": "Chelsea", "price": 1.80}
            ]}]},
            {"key": "betfair", "title": "Betfair", "markets": [{"key": "h2h", "outcomes": [
                {"name": "Arsenal", "price": 1.75}, {"name": "Chelsea", "price": 2.05}
            ]}]}
        ]
    }])
}

// Test 1: a transient 503 is retried and the second attempt's offers are used.
#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sports/soccer_epl/odds"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sports/soccer_epl/odds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odds_body()))
        .mount(&server)
        .await;

    let config = api_config(&server);
    let provider = build_provider_with(&config, env).unwrap();
    let orchestrator = FetchOrchestrator::new(std::time::Duration::from_secs(5)).with_provider(provider, &config);

    let snapshot = orchestrator
        .fetch_all("soccer", &CancellationToken::new())
        .await
        .unwrap();
    assert!(snapshot.errors.is_empty());
    assert_eq!(snapshot.offers.len(), 4);
    assert!(snapshot.offers.iter().all(|o| o.source_id == "odds-api"));
}

// Test 2: one aggregator feed can produce an arbitrage across its bookmakers.
#[tokio::test]
async fn test_aggregated_bookmakers_form_opportunity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odds_body()))
        .mount(&server)
        .await;

    let app = AppConfig::default();
    let config = api_config(&server);
    let provider = build_provider_with(&config, env).unwrap();
    let orchestrator = FetchOrchestrator::from_config(&app.fetch).with_provider(provider, &config);
    let pipeline = ScanPipeline::from_config(Arc::new(orchestrator), &app);

    let report = pipeline
        .scan("soccer", dec!(1.0), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.opportunities.len(), 1);
    let opp = &report.opportunities[0];
    assert_eq!(opp.leg(OutcomeKey::Home).unwrap().provider_id(), "williamhill");
    assert_eq!(opp.leg(OutcomeKey::Away).unwrap().provider_id(), "betfair");
}

// Test 3: a rate-limited API is reported without starving the fixture feed.
#[tokio::test]
async fn test_rate_limited_api_next_to_fixture() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "offers": [
            {{ "bookmaker": "local", "event_key": "a", "sport": "soccer", "home": "Arsenal",
               "away": "Chelsea", "starts_in_minutes": 60, "outcome": "home", "odds": "2.0" }}
        ] }}"#
    )
    .unwrap();

    let api = api_config(&server);
    let fixture_config = ProviderConfig::fixture("fixture", file.path());
    let orchestrator = FetchOrchestrator::new(std::time::Duration::from_secs(5))
        .with_provider(build_provider_with(&api, env).unwrap(), &api)
        .with_provider(Arc::new(FixtureProvider::new("fixture", file.path())), &fixture_config);

    let snapshot = orchestrator
        .fetch_all("soccer", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(snapshot.offers.len(), 1);
    assert_eq!(snapshot.error_for("odds-api"), Some(&ProviderError::rate_limited(30)));
}

// Test 4: a price at 1.0 reaches the skipped list instead of vanishing in the adapter.
#[tokio::test]
async fn test_unusable_price_is_reported_as_skipped() {
    let mut body = odds_body();
    body[0]["bookmakers"][1]["markets"][0]["outcomes"][1]["price"] = serde_json::json!(1.0);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let app = AppConfig::default();
    let config = api_config(&server);
    let provider = build_provider_with(&config, env).unwrap();
    let orchestrator = FetchOrchestrator::from_config(&app.fetch).with_provider(provider, &config);
    let pipeline = ScanPipeline::from_config(Arc::new(orchestrator), &app);

    let report = pipeline
        .scan("soccer", dec!(1.0), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.snapshot.offers.len(), 4);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].provider_id, "betfair");
    assert_eq!(report.skipped[0].reason, SkipReason::InvalidOdds);
}

// Test 5: a connection failure is reported without the api key in the message.
#[tokio::test]
async fn test_network_failure_hides_api_key() {
    let mut config = ProviderConfig::the_odds_api("odds-api").with_retries(0, 10);
    config.base_url = Some("http://127.0.0.1:9".to_string());
    let secret_env = |_: &str| Some("TOPSECRET42".to_string());
    let provider = build_provider_with(&config, secret_env).unwrap();
    let orchestrator = FetchOrchestrator::new(std::time::Duration::from_secs(5)).with_provider(provider, &config);

    let snapshot = orchestrator
        .fetch_all("soccer", &CancellationToken::new())
        .await
        .unwrap();
    let error = snapshot.error_for("odds-api").unwrap();
    assert!(!error.to_string().contains("TOPSECRET42"));
    assert!(!format!("{error:?}").contains("TOPSECRET42"));

    let status = &orchestrator.provider_status()[0];
    assert!(!status.last_error.as_deref().unwrap_or_default().contains("TOPSECRET42"));
}
