use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Top-level phase of the intake conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStep {
    ZipCode,
    FullName,
    Email,
    Vehicles,
    LicenseType,
    LicenseStatus,
}

impl ChatStep {
    pub const ORDER: [ChatStep; 6] = [
        ChatStep::ZipCode,
        ChatStep::FullName,
        ChatStep::Email,
        ChatStep::Vehicles,
        ChatStep::LicenseType,
        ChatStep::LicenseStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZipCode => "zip_code",
            Self::FullName => "full_name",
            Self::Email => "email",
            Self::Vehicles => "vehicles",
            Self::LicenseType => "license_type",
            Self::LicenseStatus => "license_status",
        }
    }

    /// Position in the linear top-level order.
    pub fn ordinal(&self) -> usize {
        Self::ORDER.iter().position(|step| step == self).unwrap_or(0)
    }
}

impl FromStr for ChatStep {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "zip_code" => Ok(Self::ZipCode),
            "full_name" => Ok(Self::FullName),
            "email" => Ok(Self::Email),
            "vehicles" => Ok(Self::Vehicles),
            "license_type" => Ok(Self::LicenseType),
            "license_status" => Ok(Self::LicenseStatus),
            other => Err(DomainError::InvalidAttributeValue {
                attribute: "current_step".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Nested phase, only meaningful while `current_step == vehicles`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStep {
    VinOrYearMakeBody,
    Use,
    CommutingDays,
    CommutingMiles,
    AnnualMileage,
    BlindSpot,
}

impl VehicleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VinOrYearMakeBody => "vin_or_year_make_body",
            Self::Use => "use",
            Self::CommutingDays => "commuting_days",
            Self::CommutingMiles => "commuting_miles",
            Self::AnnualMileage => "annual_mileage",
            Self::BlindSpot => "blind_spot",
        }
    }
}

impl FromStr for VehicleStep {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "vin_or_year_make_body" => Ok(Self::VinOrYearMakeBody),
            "use" => Ok(Self::Use),
            "commuting_days" => Ok(Self::CommutingDays),
            "commuting_miles" => Ok(Self::CommutingMiles),
            "annual_mileage" => Ok(Self::AnnualMileage),
            "blind_spot" => Ok(Self::BlindSpot),
            other => Err(DomainError::InvalidAttributeValue {
                attribute: "vehicle_step".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseType {
    Personal,
    Commercial,
    Foreign,
}

impl LicenseType {
    pub const ALL: [LicenseType; 3] =
        [LicenseType::Personal, LicenseType::Commercial, LicenseType::Foreign];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Commercial => "commercial",
            Self::Foreign => "foreign",
        }
    }
}

impl FromStr for LicenseType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(Self::Personal),
            "commercial" => Ok(Self::Commercial),
            "foreign" => Ok(Self::Foreign),
            _ => Err(DomainError::InvalidAttributeValue {
                attribute: "license_type".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Valid,
    Suspended,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Suspended => "suspended",
        }
    }
}

impl FromStr for LicenseStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(Self::Valid),
            "suspended" => Ok(Self::Suspended),
            _ => Err(DomainError::InvalidAttributeValue {
                attribute: "license_status".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub current_step: ChatStep,
    pub vehicle_step: Option<VehicleStep>,
    pub zip_code: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub license_type: Option<LicenseType>,
    pub license_status: Option<LicenseStatus>,
    /// Set when the user affirmed the pending "add a vehicle?" question and the
    /// gate has not consumed that answer yet.
    pub vehicle_gate_answered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            current_step: ChatStep::ZipCode,
            vehicle_step: None,
            zip_code: None,
            full_name: None,
            email: None,
            license_type: None,
            license_status: None,
            vehicle_gate_answered: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The conversation is complete once the final field is collected.
    pub fn is_complete(&self) -> bool {
        self.current_step == ChatStep::LicenseStatus && self.license_status.is_some()
    }

    pub fn apply(&mut self, field: SessionField) {
        match field {
            SessionField::ZipCode(value) => self.zip_code = Some(value),
            SessionField::FullName(value) => self.full_name = Some(value),
            SessionField::Email(value) => self.email = Some(value),
            SessionField::LicenseType(value) => self.license_type = Some(value),
            SessionField::LicenseStatus(value) => self.license_status = Some(value),
        }
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.vehicle_step.is_some() && self.current_step != ChatStep::Vehicles {
            return Err(DomainError::InvariantViolation(format!(
                "session {} has vehicle_step {:?} outside the vehicles step ({})",
                self.id,
                self.vehicle_step,
                self.current_step.as_str()
            )));
        }
        Ok(())
    }

    /// Brings the license steps back in line with the collected fields. Only
    /// data written through the generic field save can put them out of line.
    /// Returns whether anything changed.
    pub fn repair_license_steps(&mut self) -> bool {
        match self.current_step {
            ChatStep::LicenseStatus if self.license_type.is_none() => {
                self.current_step = ChatStep::LicenseType;
                true
            }
            ChatStep::LicenseType if self.license_type.is_some() => {
                self.current_step = ChatStep::LicenseStatus;
                true
            }
            _ => false,
        }
    }
}

/// Closed set of session attributes that may be written by field name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "attribute", content = "value", rename_all = "snake_case")]
pub enum SessionField {
    ZipCode(String),
    FullName(String),
    Email(String),
    LicenseType(LicenseType),
    LicenseStatus(LicenseStatus),
}

impl SessionField {
    pub fn parse(attribute: &str, value: &str) -> Result<Self, DomainError> {
        let value = value.trim();
        let text = || -> Result<String, DomainError> {
            if value.is_empty() {
                return Err(DomainError::InvalidAttributeValue {
                    attribute: attribute.to_string(),
                    value: value.to_string(),
                });
            }
            Ok(value.to_string())
        };

        match attribute.trim() {
            "zip_code" => Ok(Self::ZipCode(text()?)),
            "full_name" => Ok(Self::FullName(text()?)),
            "email" => Ok(Self::Email(text()?)),
            "license_type" => Ok(Self::LicenseType(value.parse()?)),
            "license_status" => Ok(Self::LicenseStatus(value.parse()?)),
            other => Err(DomainError::UnknownAttribute {
                entity: "session",
                attribute: other.to_string(),
            }),
        }
    }
}
