use anyhow::{Context, Result};
use rusqlite::Row;
use uuid::Uuid;

use unitrade_types::models::{FlagEntry, FlaggedListing};

use crate::models::{enum_col, ts_col, uuid_col};
use crate::{Database, fmt_ts};

impl Database {
    pub fn insert_flag(&self, listing_id: Uuid, flagged_by: Uuid, reason: &str) -> Result<FlagEntry> {
        let entry = FlagEntry {
            id: Uuid::new_v4(),
            flagged_by,
            reason: reason.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO flagged_listings (id, listing_id, flagged_by, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    entry.id.to_string(),
                    listing_id.to_string(),
                    flagged_by.to_string(),
                    reason,
                    fmt_ts(entry.created_at),
                ),
            )
            .context("inserting flag")?;
            Ok(())
        })?;
        Ok(entry)
    }

    /// One row per flagged listing that still exists, most recently flagged
    /// first.
    pub fn flagged_listings(&self) -> Result<Vec<FlaggedListing>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, category, seller_email, price, description, image, status,
                        date, flag_count, reason, flags_json
                 FROM flagged_listings_view
                 ORDER BY date DESC",
            )?;
            let rows = stmt
                .query_map([], flagged_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn flagged_from_row(row: &Row<'_>) -> rusqlite::Result<FlaggedListing> {
    let flags_json: String = row.get(11)?;
    let mut flags: Vec<FlagEntry> = serde_json::from_str(&flags_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;
    flags.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(FlaggedListing {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        category: row.get(2)?,
        seller_email: row.get(3)?,
        price: row.get(4)?,
        description: row.get(5)?,
        image: row.get(6)?,
        status: enum_col(row, 7)?,
        date: ts_col(row, 8)?,
        flag_count: row.get(9)?,
        reason: row.get(10)?,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use unitrade_types::models::ListingStatus;

    use super::*;
    use crate::queries::fixtures;

    fn backdate_flag(db: &Database, flag: Uuid, minutes_ago: i64) {
        db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE flagged_listings SET created_at = ?2 WHERE id = ?1",
                (flag.to_string(), fmt_ts(Utc::now() - Duration::minutes(minutes_ago))),
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn aggregates_flags_per_listing_with_latest_reason() {
        let db = Database::open_in_memory().unwrap();
        let seller = fixtures::user(&db, "s@campus.edu");
        let reporter = fixtures::user(&db, "r@campus.edu");
        let bike = fixtures::listing(&db, seller, "Bike", 80.0);
        let lamp = fixtures::listing(&db, seller, "Lamp", 10.0);
        fixtures::listing(&db, seller, "Unflagged", 10.0);

        let old = db.insert_flag(bike.id, reporter, "Spam").unwrap();
        let new = db.insert_flag(bike.id, reporter, "Counterfeit").unwrap();
        let lamp_flag = db.insert_flag(lamp.id, reporter, "Wrong category").unwrap();
        backdate_flag(&db, old.id, 60);
        backdate_flag(&db, new.id, 30);
        backdate_flag(&db, lamp_flag.id, 5);

        let flagged = db.flagged_listings().unwrap();
        assert_eq!(flagged.len(), 2);
        assert_eq!(flagged[0].title, "Lamp");

        let bike_row = &flagged[1];
        assert_eq!(bike_row.flag_count, 2);
        assert_eq!(bike_row.reason, "Counterfeit");
        assert_eq!(bike_row.flags.len(), 2);
        assert_eq!(bike_row.flags[0].id, new.id);
        assert_eq!(bike_row.seller_email, "seller@campus.edu");
        assert_eq!(bike_row.status, ListingStatus::Active);
    }

    #[test]
    fn banned_listings_stay_in_queue_deleted_ones_leave() {
        let db = Database::open_in_memory().unwrap();
        let seller = fixtures::user(&db, "s@campus.edu");
        let reporter = fixtures::user(&db, "r@campus.edu");
        let banned = fixtures::listing(&db, seller, "Banned", 5.0);
        let deleted = fixtures::listing(&db, seller, "Deleted", 5.0);
        db.insert_flag(banned.id, reporter, "Scam").unwrap();
        db.insert_flag(deleted.id, reporter, "Scam").unwrap();

        db.ban_listing(banned.id).unwrap();
        db.soft_delete_listing(deleted.id).unwrap();

        let flagged = db.flagged_listings().unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].status, ListingStatus::Banned);
    }

    #[test]
    fn flag_on_unknown_listing_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_flag(Uuid::new_v4(), Uuid::new_v4(), "Spam").is_err());
    }
}
