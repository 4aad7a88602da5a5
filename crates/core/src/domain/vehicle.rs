use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub i64);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleUse {
    Commuting,
    Commercial,
    Farming,
    Business,
}

impl VehicleUse {
    pub const ALL: [VehicleUse; 4] =
        [VehicleUse::Commuting, VehicleUse::Commercial, VehicleUse::Farming, VehicleUse::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commuting => "commuting",
            Self::Commercial => "commercial",
            Self::Farming => "farming",
            Self::Business => "business",
        }
    }
}

impl FromStr for VehicleUse {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "commuting" => Ok(Self::Commuting),
            "commercial" => Ok(Self::Commercial),
            "farming" => Ok(Self::Farming),
            "business" => Ok(Self::Business),
            _ => Err(DomainError::InvalidAttributeValue {
                attribute: "vehicle_use".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub session_id: SessionId,
    pub vin: Option<String>,
    pub year: Option<i32>,
    pub make: Option<String>,
    pub body_type: Option<String>,
    pub vehicle_use: Option<VehicleUse>,
    /// `None` until the blind-spot question is answered.
    pub blind_spot_warning_equipped: Option<bool>,
    pub days_per_week: Option<u8>,
    pub one_way_miles: Option<u32>,
    pub annual_mileage: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn new(id: VehicleId, session_id: SessionId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            session_id,
            vin: None,
            year: None,
            make: None,
            body_type: None,
            vehicle_use: None,
            blind_spot_warning_equipped: None,
            days_per_week: None,
            one_way_miles: None,
            annual_mileage: None,
            created_at,
        }
    }

    pub fn apply(&mut self, field: VehicleField) {
        match field {
            VehicleField::Vin(value) => self.vin = Some(value),
            VehicleField::Year(value) => self.year = Some(value),
            VehicleField::Make(value) => self.make = Some(value),
            VehicleField::BodyType(value) => self.body_type = Some(value),
            VehicleField::VehicleUse(value) => self.vehicle_use = Some(value),
            VehicleField::BlindSpotWarningEquipped(value) => {
                self.blind_spot_warning_equipped = Some(value)
            }
            VehicleField::DaysPerWeek(value) => self.days_per_week = Some(value),
            VehicleField::OneWayMiles(value) => self.one_way_miles = Some(value),
            VehicleField::AnnualMileage(value) => self.annual_mileage = Some(value),
        }
    }
}

/// Closed set of vehicle attributes that may be written by field name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "attribute", content = "value", rename_all = "snake_case")]
pub enum VehicleField {
    Vin(String),
    Year(i32),
    Make(String),
    BodyType(String),
    VehicleUse(VehicleUse),
    BlindSpotWarningEquipped(bool),
    DaysPerWeek(u8),
    OneWayMiles(u32),
    AnnualMileage(u32),
}

impl VehicleField {
    pub fn parse(attribute: &str, value: &str) -> Result<Self, DomainError> {
        let value = value.trim();
        let invalid = || DomainError::InvalidAttributeValue {
            attribute: attribute.to_string(),
            value: value.to_string(),
        };
        let text = || if value.is_empty() { Err(invalid()) } else { Ok(value.to_string()) };

        match attribute.trim() {
            "vin" => Ok(Self::Vin(text()?.to_ascii_uppercase())),
            "year" => value.parse().map(Self::Year).map_err(|_| invalid()),
            "make" => Ok(Self::Make(text()?)),
            "body_type" => Ok(Self::BodyType(text()?)),
            "vehicle_use" => Ok(Self::VehicleUse(value.parse()?)),
            "blind_spot_warning_equipped" => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Self::BlindSpotWarningEquipped(true)),
                "false" | "no" | "0" => Ok(Self::BlindSpotWarningEquipped(false)),
                _ => Err(invalid()),
            },
            "days_per_week" => match value.parse::<u8>() {
                Ok(days @ 1..=7) => Ok(Self::DaysPerWeek(days)),
                _ => Err(invalid()),
            },
            "one_way_miles" => match value.parse::<u32>() {
                Ok(miles) if miles > 0 => Ok(Self::OneWayMiles(miles)),
                _ => Err(invalid()),
            },
            "annual_mileage" => match value.parse::<u32>() {
                Ok(miles) if miles > 0 => Ok(Self::AnnualMileage(miles)),
                _ => Err(invalid()),
            },
            other => Err(DomainError::UnknownAttribute {
                entity: "vehicle",
                attribute: other.to_string(),
            }),
        }
    }
}
