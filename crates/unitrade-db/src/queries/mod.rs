mod accounts;
mod chats;
mod listings;
mod moderation;
pub mod search;

pub use chats::SentMessage;

use anyhow::Result;

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `?1, ?2, ...` for an `IN (...)` list.
fn placeholders(count: usize) -> String {
    (1..=count).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use unitrade_types::models::{Condition, Listing};

    use crate::Database;
    use crate::models::{NewListing, ProfileUpsert};

    pub fn user(db: &Database, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.upsert_user_profile(&ProfileUpsert { id, email, created_at: Utc::now() })
            .unwrap();
        id
    }

    pub fn listing(db: &Database, seller: Uuid, title: &str, price: f64) -> Listing {
        listing_with(db, seller, title, "", price, "Books", Condition::Used)
    }

    pub fn listing_with(
        db: &Database,
        seller: Uuid,
        title: &str,
        description: &str,
        price: f64,
        category: &str,
        condition: Condition,
    ) -> Listing {
        let new = NewListing {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            price,
            category: category.into(),
            condition,
            seller_id: seller,
            contact_email: "seller@campus.edu".into(),
            image_url: None,
        };
        let profile = ProfileUpsert { id: seller, email: "seller@campus.edu", created_at: Utc::now() };
        db.create_listing(&new, &profile).unwrap()
    }

    /// Rewrites a listing's creation time, for recency and ordering tests.
    pub fn backdate(db: &Database, listing: Uuid, at: DateTime<Utc>) {
        db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE listings SET created_at = ?2 WHERE id = ?1",
                (listing.to_string(), crate::fmt_ts(at)),
            )?;
            Ok(())
        })
        .unwrap();
    }
}
