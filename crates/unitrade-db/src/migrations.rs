use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::Database;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version = current_version(conn)?;

    if version < 1 {
        info!("Running migration v1 (marketplace schema)");
        conn.execute_batch(
            "
            CREATE TABLE accounts (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                created_at  TEXT NOT NULL
            );

            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL,
                display_name  TEXT,
                created_at    TEXT NOT NULL,
                banned_at     TEXT
            );

            CREATE TABLE listings (
                id             TEXT PRIMARY KEY,
                title          TEXT NOT NULL,
                description    TEXT NOT NULL DEFAULT '',
                price          REAL NOT NULL CHECK (price > 0),
                category       TEXT NOT NULL DEFAULT '',
                condition      TEXT NOT NULL CHECK (condition IN ('new', 'used')),
                status         TEXT NOT NULL DEFAULT 'active'
                                   CHECK (status IN ('active', 'sold', 'banned')),
                seller_id      TEXT NOT NULL REFERENCES users(id),
                contact_email  TEXT NOT NULL,
                image_url      TEXT,
                created_at     TEXT NOT NULL,
                deleted_at     TEXT,
                banned_at      TEXT
            );

            CREATE INDEX idx_listings_created ON listings(created_at);
            CREATE INDEX idx_listings_seller ON listings(seller_id);

            CREATE TABLE chats (
                id          TEXT PRIMARY KEY,
                listing_id  TEXT NOT NULL REFERENCES listings(id),
                buyer_id    TEXT NOT NULL,
                seller_id   TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                deleted_at  TEXT
            );

            -- At most one live chat per (listing, buyer, seller)
            CREATE UNIQUE INDEX idx_chats_live_triple
                ON chats(listing_id, buyer_id, seller_id)
                WHERE deleted_at IS NULL;
            CREATE INDEX idx_chats_buyer ON chats(buyer_id);
            CREATE INDEX idx_chats_seller ON chats(seller_id);

            CREATE TABLE messages (
                id                   TEXT PRIMARY KEY,
                chat_id              TEXT NOT NULL REFERENCES chats(id),
                sender_id            TEXT NOT NULL,
                content              TEXT NOT NULL,
                purchase_request_id  TEXT,
                created_at           TEXT NOT NULL,
                read_at              TEXT,
                deleted_at           TEXT
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at);

            CREATE TABLE flagged_listings (
                id          TEXT PRIMARY KEY,
                listing_id  TEXT NOT NULL REFERENCES listings(id),
                flagged_by  TEXT NOT NULL,
                reason      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_flags_listing ON flagged_listings(listing_id, created_at);

            -- One row per flagged, non-deleted listing. `reason` and `date`
            -- come from the most recent flag; `flags_json` carries all of them.
            CREATE VIEW flagged_listings_view AS
            SELECT
                l.id,
                l.title,
                l.category,
                l.contact_email AS seller_email,
                l.price,
                l.description,
                l.image_url AS image,
                l.status,
                MAX(f.created_at) AS date,
                COUNT(f.id) AS flag_count,
                (SELECT f2.reason FROM flagged_listings f2
                  WHERE f2.listing_id = l.id
                  ORDER BY f2.created_at DESC, f2.rowid DESC
                  LIMIT 1) AS reason,
                json_group_array(json_object(
                    'id', f.id,
                    'flagged_by', f.flagged_by,
                    'reason', f.reason,
                    'created_at', f.created_at
                )) AS flags_json
            FROM listings l
            JOIN flagged_listings f ON f.listing_id = l.id
            WHERE l.deleted_at IS NULL
            GROUP BY l.id;

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (status kept across a ban)");
        conn.execute_batch(
            "
            ALTER TABLE listings ADD COLUMN status_before_ban TEXT
                CHECK (status_before_ban IN ('active', 'sold'));

            UPDATE listings SET status_before_ban = 'active' WHERE status = 'banned';

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete (schema v{})", current_version(conn)?);
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

impl Database {
    /// Applied schema version and the user tables/views that exist.
    pub fn schema_status(&self) -> Result<(i64, Vec<String>)> {
        self.with_conn(|conn| {
            let version = current_version(conn)?;
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )?;
            let tables = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((version, tables))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn status_lists_tables_and_view() {
        let db = Database::open_in_memory().unwrap();
        let (version, tables) = db.schema_status().unwrap();
        assert_eq!(version, 2);
        for name in ["accounts", "chats", "flagged_listings", "flagged_listings_view", "listings", "messages", "users"] {
            assert!(tables.iter().any(|t| t == name), "missing {name}");
        }
    }
}
