//! NHTSA vPIC vehicle lookups and the quote-of-the-day fetch.
//!
//! Lookups never fail outward: every failure becomes a `VehicleCheck` with
//! `valid: false` and a user-presentable error, or the fallback quote.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use intake_core::config::LookupConfig;
use intake_core::interpret::rules;

pub const FALLBACK_QUOTE: &str =
    "The greatest mistake you can make in life is to be continually fearing you will make one.";
pub const FALLBACK_AUTHOR: &str = "Elbert Hubbard";

/// Result of a vehicle lookup, shaped the way it is fed back to the oracle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCheck {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VehicleCheck {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self { valid: false, error: Some(error.into()), ..Self::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub quote: String,
    pub author: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Quote {
    pub fn fallback(note: impl Into<String>) -> Self {
        Self {
            quote: FALLBACK_QUOTE.to_string(),
            author: FALLBACK_AUTHOR.to_string(),
            success: false,
            note: Some(note.into()),
        }
    }
}

#[async_trait]
pub trait VehicleLookup: Send + Sync {
    async fn validate_vin(&self, vin: &str) -> VehicleCheck;
    async fn validate_vehicle_info(&self, year: i32, make: &str, body_type: &str) -> VehicleCheck;
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self) -> Quote;
}

pub struct NhtsaClient {
    http: reqwest::Client,
    base_url: String,
}

impl NhtsaClient {
    pub fn from_config(config: &LookupConfig) -> Result<Self, reqwest::Error> {
        let http =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { http, base_url: config.nhtsa_base_url.trim_end_matches('/').to_string() })
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, LookupFailure> {
        let url = format!("{}/{path}?format=json", self.base_url);
        let response = self.http.get(&url).send().await.map_err(LookupFailure::Transport)?;
        if !response.status().is_success() {
            return Err(LookupFailure::Status(response.status().as_u16()));
        }
        response.json::<T>().await.map_err(LookupFailure::Transport)
    }
}

enum LookupFailure {
    Status(u16),
    Transport(reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope<T> {
    #[serde(rename = "Results", default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct DecodedVariable {
    #[serde(rename = "Variable")]
    pub variable: Option<String>,
    #[serde(rename = "Value")]
    pub value: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MakeRecord {
    #[serde(rename = "Make_Name")]
    pub name: Option<String>,
}

#[async_trait]
impl VehicleLookup for NhtsaClient {
    async fn validate_vin(&self, vin: &str) -> VehicleCheck {
        let Some(vin) = rules::normalize_vin(vin) else {
            return VehicleCheck::rejected("VIN must be exactly 17 characters.");
        };

        match self.fetch::<ResultsEnvelope<DecodedVariable>>(&format!("DecodeVin/{vin}")).await {
            Ok(envelope) => check_decoded_vin(&envelope.results),
            Err(LookupFailure::Status(status)) => {
                warn!(event_name = "lookup.vin_decode_failed", status, "vin decode returned error");
                VehicleCheck::rejected("Unable to validate VIN.")
            }
            Err(LookupFailure::Transport(error)) => {
                warn!(event_name = "lookup.vin_decode_failed", error = %error, "vin decode failed");
                VehicleCheck::rejected(format!(
                    "Unable to validate VIN at this time. Please try again later. Error: {error}"
                ))
            }
        }
    }

    async fn validate_vehicle_info(&self, year: i32, make: &str, body_type: &str) -> VehicleCheck {
        match self.fetch::<ResultsEnvelope<MakeRecord>>("GetAllMakes").await {
            Ok(envelope) => check_vehicle_info(&envelope.results, year, make, body_type),
            Err(LookupFailure::Status(status)) => {
                warn!(event_name = "lookup.make_list_failed", status, "make list returned error");
                VehicleCheck::rejected("Unable to validate.")
            }
            Err(LookupFailure::Transport(error)) => {
                warn!(event_name = "lookup.make_list_failed", error = %error, "make list failed");
                VehicleCheck::rejected(format!(
                    "Unable to validate vehicle information at this time. Please try again later. \
                     Error: {error}"
                ))
            }
        }
    }
}

/// Reads make, body class and model year out of a `DecodeVin` result list.
pub(crate) fn check_decoded_vin(results: &[DecodedVariable]) -> VehicleCheck {
    if results.is_empty() {
        return VehicleCheck::rejected("VIN invalid.");
    }

    let value_of = |name: &str| {
        results
            .iter()
            .find(|entry| entry.variable.as_deref() == Some(name))
            .and_then(|entry| entry.value.clone())
            .filter(|value| !value.trim().is_empty())
    };

    let make = value_of("Make").filter(|make| make != "NULL");
    let Some(make) = make else {
        return VehicleCheck::rejected("VIN invalid.");
    };

    VehicleCheck {
        valid: true,
        make: Some(make),
        body_type: Some(value_of("Body Class").unwrap_or_else(|| "Unknown".to_string())),
        year: Some(value_of("Model Year").unwrap_or_else(|| "Unknown".to_string())),
        error: None,
    }
}

pub(crate) fn check_vehicle_info(
    makes: &[MakeRecord],
    year: i32,
    make: &str,
    body_type: &str,
) -> VehicleCheck {
    let found = makes
        .iter()
        .filter_map(|record| record.name.as_deref())
        .find(|name| name.eq_ignore_ascii_case(make.trim()));
    let Some(found) = found else {
        return VehicleCheck::rejected(format!(
            "Make '{make}' not found in NHTSA database. Please check the spelling and try again."
        ));
    };

    if body_type.trim().is_empty() {
        return VehicleCheck::rejected("Body type is required.");
    }

    VehicleCheck {
        valid: true,
        make: Some(found.to_string()),
        body_type: Some(body_type.trim().to_string()),
        year: Some(year.to_string()),
        error: None,
    }
}

pub struct ZenQuotesClient {
    http: reqwest::Client,
    url: String,
}

impl ZenQuotesClient {
    pub fn from_config(config: &LookupConfig) -> Result<Self, reqwest::Error> {
        let http =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { http, url: config.quote_url.clone() })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ZenQuote {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub a: Option<String>,
}

#[async_trait]
impl QuoteSource for ZenQuotesClient {
    async fn fetch_quote(&self) -> Quote {
        let response = match self.http.get(&self.url).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(event_name = "lookup.quote_failed", error = %error, "quote fetch failed");
                return Quote::fallback(error.to_string());
            }
        };
        if !response.status().is_success() {
            return Quote::fallback("API error, fallback quote used");
        }
        match response.json::<Vec<ZenQuote>>().await {
            Ok(quotes) => first_quote(quotes),
            Err(error) => {
                warn!(event_name = "lookup.quote_failed", error = %error, "quote body unreadable");
                Quote::fallback(error.to_string())
            }
        }
    }
}

pub(crate) fn first_quote(quotes: Vec<ZenQuote>) -> Quote {
    match quotes.into_iter().next() {
        Some(quote) => Quote {
            quote: quote.q,
            author: quote.a.unwrap_or_else(|| "Unknown".to_string()),
            success: true,
            note: None,
        },
        None => Quote::fallback("Fallback quote used"),
    }
}
