//! Per-entity decoding of snapshot records.
//!
//! Each record is decoded on its own so one malformed entity never takes
//! the rest of the snapshot down with it.

use crate::error::SnapshotError;
use crate::models::{DataQualityEvent, Entity, SizeTier};
use crate::series::{DailySeries, MonthlyTotals, YearMonth};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One entity decoded into typed series.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEntity {
    pub entity: Entity,
    pub series: DailySeries,
    pub totals: MonthlyTotals,
    /// Upstream business-day volume of the week before the latest closed week.
    pub previous_week_volume: Option<u64>,
}

/// Decoded contents of one snapshot document.
#[derive(Debug, Clone, Default)]
pub struct DecodedDocument {
    pub generated_at: Option<DateTime<Utc>>,
    pub entities: Vec<LoadedEntity>,
    pub data_quality: Vec<DataQualityEvent>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    entities: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: String,
    tier: Option<String>,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    daily: Option<Value>,
    #[serde(default)]
    monthly_totals: BTreeMap<String, Value>,
    #[serde(default)]
    previous_week_volume: Option<Value>,
}

/// Decode a whole snapshot document.
///
/// Only a document that is not JSON at all (or lacks the expected top-level
/// shape) is an error; per-entity problems become data-quality events.
pub fn decode_document(content: &str) -> Result<DecodedDocument, SnapshotError> {
    let raw: RawDocument = serde_json::from_str(content)?;
    let mut document = DecodedDocument {
        generated_at: raw.generated_at,
        ..Default::default()
    };

    for (index, record) in raw.entities.into_iter().enumerate() {
        let Some(id) = record_id(&record) else {
            document.data_quality.push(DataQualityEvent::new(
                format!("#{}", index),
                SnapshotError::MissingField("id").to_string(),
            ));
            continue;
        };

        match decode_entity(id.clone(), record) {
            Ok(entity) => document.entities.push(entity),
            Err(e) => document
                .data_quality
                .push(DataQualityEvent::new(id, e.to_string())),
        }
    }

    Ok(document)
}

/// Entity ids may arrive as strings or numbers.
fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode one entity record.
pub fn decode_entity(id: String, record: Value) -> Result<LoadedEntity, SnapshotError> {
    let raw: RawEntity = serde_json::from_value(record)?;

    let tier_name = raw.tier.ok_or(SnapshotError::MissingField("tier"))?;
    let tier: SizeTier = tier_name
        .parse()
        .map_err(|_| SnapshotError::UnknownTier(tier_name.clone()))?;

    let series = match raw.daily {
        Some(daily) => decode_daily(&daily)?,
        None => DailySeries::new(),
    };

    let mut monthly = BTreeMap::new();
    for (key, value) in &raw.monthly_totals {
        let month: YearMonth = key
            .parse()
            .map_err(|_| SnapshotError::InvalidMonth(key.clone()))?;
        let total = parse_count(value, key)?;
        if let Some(total) = total {
            monthly.insert(month, total);
        }
    }
    let mut totals = MonthlyTotals::new(monthly);
    totals.backfill_from(&series);

    let previous_week_volume = match raw.previous_week_volume {
        Some(value) => parse_count(&value, "previous_week_volume")?,
        None => None,
    };

    Ok(LoadedEntity {
        entity: Entity {
            id,
            name: raw.name,
            tier,
            city: raw.city.trim().to_string(),
            state: raw.state.trim().to_string(),
            country: raw.country.trim().to_string(),
        },
        series,
        totals,
        previous_week_volume,
    })
}

/// Decode the per-year daily structure.
///
/// A year is either a dense array indexed by day-of-year from Jan 1, or an
/// object keyed by `MM-DD`. `null` counts are absent days.
fn decode_daily(daily: &Value) -> Result<DailySeries, SnapshotError> {
    let years = daily.as_object().ok_or(SnapshotError::UnexpectedDailyShape)?;
    let mut series = DailySeries::new();

    for (year_key, days) in years {
        let year: i32 = year_key
            .trim()
            .parse()
            .map_err(|_| SnapshotError::InvalidYear(year_key.clone()))?;
        let jan_first = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| SnapshotError::InvalidYear(year_key.clone()))?;

        match days {
            Value::Array(values) => {
                for (offset, value) in values.iter().enumerate() {
                    let date = jan_first + Duration::days(offset as i64);
                    if date.year() != year {
                        return Err(SnapshotError::InvalidDay {
                            year: year_key.clone(),
                            key: format!("#{}", offset + 1),
                        });
                    }
                    if let Some(count) = parse_count(value, &date.to_string())? {
                        series.insert(date, to_daily(count, date)?);
                    }
                }
            }
            Value::Object(entries) => {
                for (day_key, value) in entries {
                    let date = parse_day_key(year, day_key).ok_or_else(|| {
                        SnapshotError::InvalidDay {
                            year: year_key.clone(),
                            key: day_key.clone(),
                        }
                    })?;
                    if let Some(count) = parse_count(value, &date.to_string())? {
                        series.insert(date, to_daily(count, date)?);
                    }
                }
            }
            Value::Null => {}
            _ => return Err(SnapshotError::UnexpectedDailyShape),
        }
    }

    Ok(series)
}

fn parse_day_key(year: i32, key: &str) -> Option<NaiveDate> {
    let (month, day) = key.trim().split_once('-')?;
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

/// Parse a non-negative integral count. `null` means absent.
///
/// Whole-valued floats (`12.0`) are accepted since tabular exports often emit them.
fn parse_count(value: &Value, context: &str) -> Result<Option<u64>, SnapshotError> {
    let invalid = || SnapshotError::InvalidCount {
        date: context.to_string(),
        value: value.to_string(),
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(count) = n.as_u64() {
                return Ok(Some(count));
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                    Ok(Some(f as u64))
                }
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}

fn to_daily(count: u64, date: NaiveDate) -> Result<u32, SnapshotError> {
    u32::try_from(count).map_err(|_| SnapshotError::InvalidCount {
        date: date.to_string(),
        value: count.to_string(),
    })
}
