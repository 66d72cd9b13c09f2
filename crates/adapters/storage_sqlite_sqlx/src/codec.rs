//! Column encodings shared by the repositories.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
//! string comparison orders them chronologically.

use chrono::{DateTime, SecondsFormat};
use serde::de::DeserializeOwned;
use voxline_domain::time::Timestamp;

pub(crate) fn encode_ts(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<Timestamp, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.to_utc())
        .map_err(decode_error)
}

pub(crate) fn decode_opt_ts(raw: Option<String>) -> Result<Option<Timestamp>, sqlx::Error> {
    raw.as_deref().map(decode_ts).transpose()
}

pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(decode_error)
}

pub(crate) fn decode_opt_json<T: DeserializeOwned>(
    raw: Option<String>,
) -> Result<Option<T>, sqlx::Error> {
    raw.as_deref().map(decode_json).transpose()
}

pub(crate) fn decode_error<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}
