use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::LogSource;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(value: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|raw| parse_datetime(&raw, field)).transpose()
}

pub fn parse_source(value: &str) -> Result<LogSource> {
    match value {
        "Device" => Ok(LogSource::Device),
        "Manual" => Ok(LogSource::Manual),
        other => Err(anyhow!("unknown log source {other}")),
    }
}

pub fn parse_optional_uuid(value: Option<String>, field: &str) -> Result<Option<Uuid>> {
    match value {
        Some(raw) => Uuid::parse_str(&raw)
            .map(Some)
            .with_context(|| format!("failed to parse {field}")),
        None => Ok(None),
    }
}
