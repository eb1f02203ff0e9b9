//! Database row types and column decoding helpers.
//!
//! Most queries decode straight into the `unitrade-types` models; the rows
//! here exist for data that must not leave the DB layer as-is (password
//! hashes) or that describes a write.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use unitrade_types::models::{Condition, Role};

use crate::parse_ts;

pub struct AccountRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub created_at: String,
}

/// Listing insert payload for the authoring flow.
pub struct NewListing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub condition: Condition,
    pub seller_id: Uuid,
    pub contact_email: String,
    pub image_url: Option<String>,
}

/// Profile fields written by the lazy "upsert user" step.
pub struct ProfileUpsert<'a> {
    pub id: Uuid,
    pub email: &'a str,
    pub created_at: DateTime<Utc>,
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Uuid::parse_str(&raw).map(Some).map_err(|e| conversion(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw).map(Some).map_err(|e| conversion(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}
