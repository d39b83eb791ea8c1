//! Health record variants and their canonical field-map form.
//!
//! A [`HealthRecord`] is a closed tagged union over four variants. Every
//! record is built once through [`build`] (or [`build_at`]) and is immutable
//! afterwards. [`render`] flattens it into a [`FieldMap`], the
//! representation the store persists and indexes.
//!
//! | variant | extra fields |
//! |---------|--------------|
//! | `lab_result` | `value` (decimal), `description` |
//! | `prescription` | `dose`, `drug` |
//! | `appointment_note` | `note` |
//! | `self_measurement` | `value` (decimal), `description` |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::ValidationError;

/// Flat string-to-string map, the stored and returned shape of a record.
pub type FieldMap = BTreeMap<String, String>;

/// The four record variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    LabResult,
    Prescription,
    AppointmentNote,
    SelfMeasurement,
}

impl RecordType {
    pub const ALL: [RecordType; 4] = [
        RecordType::LabResult,
        RecordType::Prescription,
        RecordType::AppointmentNote,
        RecordType::SelfMeasurement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::LabResult => "lab_result",
            RecordType::Prescription => "prescription",
            RecordType::AppointmentNote => "appointment_note",
            RecordType::SelfMeasurement => "self_measurement",
        }
    }

    /// Variant-specific fields, in the order they are validated.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            RecordType::LabResult | RecordType::SelfMeasurement => &["value", "description"],
            RecordType::Prescription => &["dose", "drug"],
            RecordType::AppointmentNote => &["note"],
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownVariant(s.to_string()))
    }
}

/// Variant payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    LabResult { value: Decimal, description: String },
    Prescription { dose: String, drug: String },
    AppointmentNote { note: String },
    SelfMeasurement { value: Decimal, description: String },
}

impl RecordBody {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordBody::LabResult { .. } => RecordType::LabResult,
            RecordBody::Prescription { .. } => RecordType::Prescription,
            RecordBody::AppointmentNote { .. } => RecordType::AppointmentNote,
            RecordBody::SelfMeasurement { .. } => RecordType::SelfMeasurement,
        }
    }
}

/// An immutable health record.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    id: String,
    patient_id: String,
    provider: Option<String>,
    timestamp: DateTime<Utc>,
    body: RecordBody,
}

impl HealthRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record_type(&self) -> RecordType {
        self.body.record_type()
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn body(&self) -> &RecordBody {
        &self.body
    }
}

/// Build a record stamped with the current time.
///
/// `patient_id` is expected to be non-empty; callers enforce that before
/// getting here. An empty `provider` is treated as absent.
pub fn build(
    record_type: &str,
    patient_id: &str,
    provider: Option<&str>,
    fields: &FieldMap,
) -> Result<HealthRecord, ValidationError> {
    build_at(record_type, patient_id, provider, fields, Utc::now())
}

/// Build a record with an explicit creation timestamp.
pub fn build_at(
    record_type: &str,
    patient_id: &str,
    provider: Option<&str>,
    fields: &FieldMap,
    timestamp: DateTime<Utc>,
) -> Result<HealthRecord, ValidationError> {
    let record_type: RecordType = record_type.parse()?;

    if let Some(missing) = record_type
        .required_fields()
        .iter()
        .find(|name| !fields.contains_key(**name))
    {
        return Err(ValidationError::MissingField(missing.to_string()));
    }

    let text = |name: &str| fields[name].clone();
    let body = match record_type {
        RecordType::LabResult => RecordBody::LabResult {
            value: parse_decimal(fields, "value")?,
            description: text("description"),
        },
        RecordType::Prescription => RecordBody::Prescription {
            dose: text("dose"),
            drug: text("drug"),
        },
        RecordType::AppointmentNote => RecordBody::AppointmentNote { note: text("note") },
        RecordType::SelfMeasurement => RecordBody::SelfMeasurement {
            value: parse_decimal(fields, "value")?,
            description: text("description"),
        },
    };

    Ok(HealthRecord {
        id: Uuid::new_v4().to_string(),
        patient_id: patient_id.to_string(),
        provider: provider.filter(|p| !p.is_empty()).map(str::to_string),
        timestamp,
        body,
    })
}

/// Parse a decimal field in plain (`10.5`) or exponent (`1.5E2`) notation.
///
/// Values outside the `Decimal` range, and non-finite words such as `inf`
/// or `nan`, are rejected rather than rounded.
fn parse_decimal(fields: &FieldMap, name: &str) -> Result<Decimal, ValidationError> {
    let raw = &fields[name];
    let trimmed = raw.trim();
    let parsed = if trimmed.contains(['e', 'E']) {
        Decimal::from_scientific(&trimmed.to_ascii_lowercase())
    } else {
        Decimal::from_str(trimmed)
    };
    parsed.map_err(|_| ValidationError::InvalidValue {
        field: name.to_string(),
        value: raw.clone(),
    })
}

/// Canonical textual form of a record timestamp.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Flatten a record into its stored field map.
pub fn render(record: &HealthRecord) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert("id".into(), record.id.clone());
    map.insert("type".into(), record.record_type().as_str().into());
    map.insert("patient_id".into(), record.patient_id.clone());
    map.insert(
        "provider".into(),
        record.provider.clone().unwrap_or_default(),
    );
    map.insert("timestamp".into(), format_timestamp(record.timestamp));

    match &record.body {
        RecordBody::LabResult { value, description }
        | RecordBody::SelfMeasurement { value, description } => {
            map.insert("value".into(), value.to_string());
            map.insert("description".into(), description.clone());
        }
        RecordBody::Prescription { dose, drug } => {
            map.insert("dose".into(), dose.clone());
            map.insert("drug".into(), drug.clone());
        }
        RecordBody::AppointmentNote { note } => {
            map.insert("note".into(), note.clone());
        }
    }

    map
}
