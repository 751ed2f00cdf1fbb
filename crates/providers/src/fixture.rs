//! Offline provider reading quotes from a JSON file.
//!
//! Times in a fixture can be absolute or relative to the moment of the
//! fetch, so a demo file stays usable indefinitely:
//!
//! ```json
//! { "offers": [
//!   { "bookmaker": "williamhill", "event_key": "ars-che", "sport": "soccer",
//!     "home": "Arsenal", "away": "Chelsea", "starts_in_minutes": 240,
//!     "outcome": "home", "odds": "11/10", "format": "fractional", "age_minutes": 2 }
//! ] }
//! ```

use arbys_core::{EventDescriptor, Offer, OddsFormat, OddsProvider, ProviderError, H2H_MARKET};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct FixtureFile {
    offers: Vec<FixtureOffer>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureOffer {
    bookmaker: String,
    event_key: String,
    sport: String,
    home: String,
    away: String,
    #[serde(default)]
    market: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    starts_in_minutes: Option<i64>,
    outcome: String,
    odds: String,
    #[serde(default)]
    format: OddsFormat,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    age_minutes: Option<i64>,
}

impl FixtureOffer {
    fn to_offer(&self, now: DateTime<Utc>) -> Result<Offer, String> {
        let start_time = match (self.start_time, self.starts_in_minutes) {
            (Some(at), _) => at,
            (None, Some(minutes)) => now + Duration::minutes(minutes),
            (None, None) => return Err("missing start_time or starts_in_minutes".to_string()),
        };
        let observed_at = self
            .observed_at
            .unwrap_or_else(|| now - Duration::minutes(self.age_minutes.unwrap_or(0)));
        let odds = self.format.to_decimal(&self.odds).map_err(|e| e.to_string())?;

        let event = EventDescriptor::new(&self.sport, &self.home, &self.away, start_time)
            .with_market(self.market.as_deref().unwrap_or(H2H_MARKET));
        let raw = serde_json::json!({
            "bookmaker": self.bookmaker,
            "event_key": self.event_key,
            "outcome": self.outcome,
            "odds": self.odds,
            "format": self.format,
        });

        Ok(Offer::new(
            self.bookmaker.clone(),
            self.event_key.clone(),
            event,
            self.outcome.clone(),
            odds,
            observed_at,
        )
        .with_raw_payload(raw))
    }
}

#[derive(Debug, Clone)]
pub struct FixtureProvider {
    id: String,
    path: PathBuf,
}

impl FixtureProvider {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses fixture text into offers for `sport` as of `now`.
    ///
    /// Records whose odds or times are unusable are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Parse`] if the text is not a fixture document.
    pub fn parse(&self, text: &str, sport: &str, now: DateTime<Utc>) -> Result<Vec<Offer>, ProviderError> {
        let file: FixtureFile = serde_json::from_str(text)
            .map_err(|e| ProviderError::parse(format!("{}: {e}", self.path.display())))?;

        let mut offers = Vec::with_capacity(file.offers.len());
        for record in file.offers.iter().filter(|r| r.sport == sport) {
            match record.to_offer(now) {
                Ok(offer) => offers.push(offer),
                Err(reason) => warn!(
                    provider = %self.id,
                    bookmaker = %record.bookmaker,
                    event_key = %record.event_key,
                    reason = %reason,
                    "Skipping fixture record"
                ),
            }
        }
        Ok(offers)
    }
}

#[async_trait]
impl OddsProvider for FixtureProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, sport: &str) -> Result<Vec<Offer>, ProviderError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ProviderError::Configuration(format!("cannot read fixture {}: {e}", self.path.display()))
        })?;
        let offers = self.parse(&text, sport, Utc::now())?;
        debug!(provider = %self.id, sport, offers = offers.len(), "Loaded fixture offers");
        Ok(offers)
    }
}
