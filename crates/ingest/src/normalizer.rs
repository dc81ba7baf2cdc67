use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::warn;

use crate::record::{DocumentRecord, MetadataValue, RawDocument};
use crate::schema::{AttributeSchema, AttributeType};

/// Century pivot for expanding two-digit years.
///
/// Years `00..=max_in_2000s` become `20YY`, the rest become `19YY`. The
/// default of 68 matches the POSIX convention; the corpus (court rulings)
/// has nothing before 1969, but the pivot stays configurable rather than
/// baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CenturyPivot {
    pub max_in_2000s: u8,
}

impl Default for CenturyPivot {
    fn default() -> Self {
        Self { max_in_2000s: 68 }
    }
}

impl CenturyPivot {
    pub fn expand(&self, two_digit_year: u8) -> i32 {
        if two_digit_year <= self.max_in_2000s {
            2000 + two_digit_year as i32
        } else {
            1900 + two_digit_year as i32
        }
    }
}

/// Per-record normalization failure. Anything softer than this (a single
/// unparseable field) drops the field and flags the record instead.
#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("raw document has no id")]
    MissingId,
    #[error("raw document '{id}' has no passage text")]
    EmptyText { id: String },
}

/// A field that could not be normalized and was omitted from the record.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedField {
    pub field: String,
    pub reason: String,
}

/// A normalized record plus the fields that were dropped on the way.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub record: DocumentRecord,
    pub dropped: Vec<DroppedField>,
}

impl NormalizedDocument {
    pub fn is_flagged(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Converts raw string metadata into the typed, range-comparable values
/// declared by the attribute schema. Pure: same raw document in, same
/// record out.
pub struct MetadataNormalizer {
    schema: AttributeSchema,
    pivot: CenturyPivot,
    /// Raw date attribute the year is derived from.
    date_attribute: String,
    /// Integer attribute receiving the derived four-digit year.
    year_attribute: String,
}

impl MetadataNormalizer {
    pub fn new(schema: AttributeSchema, pivot: CenturyPivot) -> Self {
        Self {
            schema,
            pivot,
            date_attribute: "status_date".to_string(),
            year_attribute: "year".to_string(),
        }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    pub fn normalize(&self, raw: &RawDocument) -> Result<NormalizedDocument, NormalizationError> {
        if raw.id.trim().is_empty() {
            return Err(NormalizationError::MissingId);
        }
        if raw.text.trim().is_empty() {
            return Err(NormalizationError::EmptyText { id: raw.id.clone() });
        }

        let mut metadata = BTreeMap::new();
        let mut dropped = Vec::new();

        for (name, value) in &raw.metadata {
            match self.schema.get(name).map(|spec| spec.ty) {
                Some(AttributeType::Integer) => match value.trim().parse::<i64>() {
                    Ok(n) => {
                        metadata.insert(name.clone(), MetadataValue::Integer(n));
                    }
                    Err(_) => {
                        warn!(doc_id = %raw.id, field = %name, value = %value,
                            "dropping non-numeric value for integer attribute");
                        dropped.push(DroppedField {
                            field: name.clone(),
                            reason: format!("expected integer, got '{}'", value),
                        });
                    }
                },
                Some(AttributeType::Keyword) => {
                    metadata.insert(
                        name.clone(),
                        MetadataValue::Text(value.trim().to_uppercase()),
                    );
                }
                Some(AttributeType::Text) => {
                    metadata.insert(name.clone(), MetadataValue::Text(value.trim().to_string()));
                }
                // Unknown attributes pass through as opaque text. The schema
                // lookup keeps them out of filters.
                None => {
                    metadata.insert(name.clone(), MetadataValue::Text(value.clone()));
                }
            }
        }

        // Derive the comparable year from the raw date unless the extractor
        // already supplied one.
        if !metadata.contains_key(&self.year_attribute) {
            if let Some(date) = raw.metadata.get(&self.date_attribute) {
                match parse_status_year(date, self.pivot) {
                    Ok(year) => {
                        metadata.insert(
                            self.year_attribute.clone(),
                            MetadataValue::Integer(year as i64),
                        );
                    }
                    Err(e) => {
                        warn!(doc_id = %raw.id, field = %self.date_attribute, error = %e,
                            "dropping derived year, date is unparseable");
                        dropped.push(DroppedField {
                            field: self.year_attribute.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(NormalizedDocument {
            record: DocumentRecord {
                id: raw.id.clone(),
                text: raw.text.clone(),
                metadata,
            },
            dropped,
        })
    }
}

/// Parses a `DD/MM/YY` (or `DD/MM/YYYY`) date and returns its four-digit
/// year, expanding two-digit years through the pivot.
pub fn parse_status_year(raw: &str, pivot: CenturyPivot) -> Result<i32> {
    let parts: Vec<&str> = raw.trim().split('/').collect();
    if parts.len() != 3 {
        anyhow::bail!("'{}' is not a DD/MM/YY date", raw);
    }

    let day: u32 = parts[0]
        .parse()
        .with_context(|| format!("bad day in '{}'", raw))?;
    let month: u32 = parts[1]
        .parse()
        .with_context(|| format!("bad month in '{}'", raw))?;

    let year = match parts[2].len() {
        2 => {
            let yy: u8 = parts[2]
                .parse()
                .with_context(|| format!("bad year in '{}'", raw))?;
            pivot.expand(yy)
        }
        4 => parts[2]
            .parse::<i32>()
            .with_context(|| format!("bad year in '{}'", raw))?,
        _ => anyhow::bail!("'{}' has neither a 2- nor 4-digit year", raw),
    };

    // Reject dates like 31/02 instead of silently keeping the year.
    if NaiveDate::from_ymd_opt(year, month, day).is_none() {
        anyhow::bail!("'{}' is not a valid calendar date", raw);
    }

    Ok(year)
}
