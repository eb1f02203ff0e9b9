use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use unitrade_types::filters::ListingFilters;
use unitrade_types::models::Listing;

use super::OptionalExt;
use super::accounts::upsert_profile;
use super::search::SearchQuery;
use crate::models::{NewListing, ProfileUpsert, enum_col, opt_ts_col, ts_col, uuid_col};
use crate::{Database, now_ts};

pub(crate) const LISTING_COLUMNS: &str = "id, title, description, price, category, condition, status, \
     seller_id, contact_email, image_url, created_at, deleted_at, banned_at";

impl Database {
    /// Upsert the seller's profile and insert the listing as one transaction.
    pub fn create_listing(&self, listing: &NewListing, seller: &ProfileUpsert<'_>) -> Result<Listing> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            upsert_profile(&tx, seller).context("upserting seller profile")?;
            tx.execute(
                "INSERT INTO listings (id, title, description, price, category, condition, status,
                                       seller_id, contact_email, image_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    listing.id.to_string(),
                    listing.title,
                    listing.description,
                    listing.price,
                    listing.category,
                    listing.condition.as_str(),
                    listing.seller_id.to_string(),
                    listing.contact_email,
                    listing.image_url,
                    now_ts(),
                ],
            )
            .context("inserting listing")?;
            let created = query_listing(&tx, listing.id)?
                .context("listing missing right after insert")?;
            tx.commit()?;
            Ok(created)
        })
    }

    /// Point lookup regardless of status or deletion; callers decide
    /// visibility.
    pub fn get_listing(&self, id: Uuid) -> Result<Option<Listing>> {
        self.with_conn(|conn| query_listing(conn, id))
    }

    pub fn search_listings(&self, filters: &ListingFilters, now: DateTime<Utc>) -> Result<Vec<Listing>> {
        let query = SearchQuery::build(filters, now);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&query.sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(query.params.iter()), listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// A seller's own listings, any status, newest first.
    pub fn seller_listings(&self, seller_id: Uuid) -> Result<Vec<Listing>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LISTING_COLUMNS} FROM listings
                 WHERE seller_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([seller_id.to_string()], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// `active → sold`. Returns `false` if the listing is not an active,
    /// live listing owned by `seller_id`.
    pub fn mark_listing_sold(&self, id: Uuid, seller_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE listings SET status = 'sold'
                 WHERE id = ?1 AND seller_id = ?2 AND status = 'active' AND deleted_at IS NULL",
                (id.to_string(), seller_id.to_string()),
            )?;
            Ok(changed == 1)
        })
    }

    /// Soft delete. Terminal; returns `false` if already deleted or unknown.
    pub fn soft_delete_listing(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE listings SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                (id.to_string(), now_ts()),
            )?;
            Ok(changed == 1)
        })
    }

    /// Bans a live listing, remembering the status it had so an unban can
    /// put it back. Banning twice keeps the first remembered status.
    pub fn ban_listing(&self, id: Uuid) -> Result<Option<Listing>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE listings
                 SET status_before_ban = CASE WHEN status = 'banned' THEN status_before_ban ELSE status END,
                     status = 'banned',
                     banned_at = ?2
                 WHERE id = ?1 AND deleted_at IS NULL",
                (id.to_string(), now_ts()),
            )?;
            query_live_listing(conn, id)
        })
    }

    /// Clears a ban, restoring the status the listing had before it. A
    /// listing that was never banned keeps its status.
    pub fn unban_listing(&self, id: Uuid) -> Result<Option<Listing>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE listings
                 SET status = CASE WHEN status = 'banned'
                                   THEN COALESCE(status_before_ban, 'active')
                                   ELSE status END,
                     status_before_ban = NULL,
                     banned_at = NULL
                 WHERE id = ?1 AND deleted_at IS NULL",
                [id.to_string()],
            )?;
            query_live_listing(conn, id)
        })
    }
}

pub(crate) fn query_listing(conn: &Connection, id: Uuid) -> Result<Option<Listing>> {
    conn.query_row(
        &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1"),
        [id.to_string()],
        listing_from_row,
    )
    .optional()
}

fn query_live_listing(conn: &Connection, id: Uuid) -> Result<Option<Listing>> {
    Ok(query_listing(conn, id)?.filter(|l| l.deleted_at.is_none()))
}

pub(crate) fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<Listing> {
    Ok(Listing {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        category: row.get(4)?,
        condition: enum_col(row, 5)?,
        status: enum_col(row, 6)?,
        seller_id: uuid_col(row, 7)?,
        contact_email: row.get(8)?,
        image_url: row.get(9)?,
        created_at: ts_col(row, 10)?,
        deleted_at: opt_ts_col(row, 11)?,
        banned_at: opt_ts_col(row, 12)?,
    })
}
