//! Odds format conversion.
//!
//! Providers quote prices as decimal (`2.50`), fractional (`3/2`) or
//! American (`+150`, `-200`) odds. Everything downstream works on decimal
//! odds, so adapters convert at the edge with [`OddsFormat::to_decimal`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when a quoted price cannot be turned into decimal odds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OddsError {
    /// The text is not a number in the declared format.
    #[error("malformed {format} odds: {raw:?}")]
    Malformed {
        /// Declared format.
        format: OddsFormat,
        /// Raw text as received.
        raw: String,
    },

    /// The price converts to decimal odds of 1.0 or below.
    #[error("odds {raw:?} convert to {decimal}, which is not above 1.0")]
    NotAboveOne {
        /// Raw text as received.
        raw: String,
        /// Converted value.
        decimal: Decimal,
    },
}

/// Notation a provider uses for its prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsFormat {
    /// European decimal odds, stake included (`2.50`).
    #[default]
    Decimal,
    /// UK fractional odds, profit over stake (`3/2`).
    Fractional,
    /// US moneyline odds (`+150`, `-200`).
    American,
}

impl OddsFormat {
    /// Converts a quoted price into decimal odds.
    ///
    /// # Errors
    ///
    /// Returns [`OddsError::Malformed`] if the text does not parse in this
    /// format and [`OddsError::NotAboveOne`] if the result is not above 1.0.
    pub fn to_decimal(self, raw: &str) -> Result<Decimal, OddsError> {
        let text = raw.trim();
        let malformed = || OddsError::Malformed {
            format: self,
            raw: raw.to_string(),
        };

        let decimal = match self {
            Self::Decimal => Decimal::from_str(text).map_err(|_| malformed())?,
            Self::Fractional => {
                let (num, den) = text.split_once('/').ok_or_else(malformed)?;
                let num = Decimal::from_str(num.trim()).map_err(|_| malformed())?;
                let den = Decimal::from_str(den.trim()).map_err(|_| malformed())?;
                if den <= Decimal::ZERO || num < Decimal::ZERO {
                    return Err(malformed());
                }
                num / den + Decimal::ONE
            }
            Self::American => {
                let value =
                    Decimal::from_str(text.trim_start_matches('+')).map_err(|_| malformed())?;
                if value.abs() < Decimal::ONE_HUNDRED {
                    return Err(malformed());
                }
                if value.is_sign_positive() {
                    value / Decimal::ONE_HUNDRED + Decimal::ONE
                } else {
                    Decimal::ONE_HUNDRED / value.abs() + Decimal::ONE
                }
            }
        };

        if decimal <= Decimal::ONE {
            return Err(OddsError::NotAboveOne {
                raw: raw.to_string(),
                decimal,
            });
        }
        Ok(decimal)
    }
}

impl fmt::Display for OddsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decimal => write!(f, "decimal"),
            Self::Fractional => write!(f, "fractional"),
            Self::American => write!(f, "american"),
        }
    }
}

/// Implied probability of decimal odds, `1 / odds`.
///
/// Returns `None` for odds that are not above 1.0.
#[must_use]
pub fn implied_probability(decimal_odds: Decimal) -> Option<Decimal> {
    if decimal_odds <= Decimal::ONE {
        return None;
    }
    Some(Decimal::ONE / decimal_odds)
}
