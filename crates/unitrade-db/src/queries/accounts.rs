use anyhow::Result;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use unitrade_types::models::{Role, UserProfile};

use super::OptionalExt;
use crate::models::{AccountRow, ProfileUpsert, enum_col, opt_ts_col, ts_col, uuid_col};
use crate::{Database, fmt_ts, now_ts};

const PROFILE_COLUMNS: &str = "id, email, display_name, created_at, banned_at";

impl Database {
    // -- Accounts --

    /// Returns `false` when the email is already registered.
    pub fn create_account(&self, id: &str, email: &str, password_hash: &str, role: Role) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO accounts (id, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, email, password_hash, role.as_str(), now_ts()),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "email", email))
    }

    pub fn get_account_by_id(&self, id: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "id", id))
    }

    // -- Profiles --

    pub fn upsert_user_profile(&self, profile: &ProfileUpsert<'_>) -> Result<()> {
        self.with_conn_mut(|conn| upsert_profile(conn, profile))
    }

    pub fn get_user_profile(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM users WHERE id = ?1"),
                [id.to_string()],
                profile_from_row,
            )
            .optional()
        })
    }

    pub fn list_user_profiles(&self) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {PROFILE_COLUMNS} FROM users ORDER BY created_at DESC"))?;
            let rows = stmt
                .query_map([], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Ban or unban a profile. Returns `false` if no such profile exists.
    pub fn set_user_banned(&self, id: Uuid, banned: bool) -> Result<bool> {
        let banned_at = banned.then(now_ts);
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET banned_at = ?2 WHERE id = ?1",
                (id.to_string(), banned_at),
            )?;
            Ok(changed == 1)
        })
    }
}

pub(crate) fn upsert_profile(conn: &Connection, profile: &ProfileUpsert<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET email = excluded.email",
        (profile.id.to_string(), profile.email, fmt_ts(profile.created_at)),
    )?;
    Ok(())
}

fn query_account(conn: &Connection, column: &str, value: &str) -> Result<Option<AccountRow>> {
    // `column` is one of two literals chosen by the callers above.
    let mut stmt = conn.prepare(&format!(
        "SELECT id, email, password, role, created_at FROM accounts WHERE {column} = ?1"
    ))?;

    stmt.query_row([value], |row| {
        Ok(AccountRow {
            id: row.get(0)?,
            email: row.get(1)?,
            password: row.get(2)?,
            role: enum_col(row, 3)?,
            created_at: row.get(4)?,
        })
    })
    .optional()
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: uuid_col(row, 0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at: ts_col(row, 3)?,
        banned_at: opt_ts_col(row, 4)?,
    })
}
