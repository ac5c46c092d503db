//! User storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{is_constraint_violation, parse_datetime, parse_uuid, parse_uuid_opt, OptionalExt};
use crate::error::{Error, Result};
use crate::models::User;

const USER_COLUMNS: &str =
    "id, name, phone, email, password_hash, current_hostel_id, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        password_hash: row.get(4)?,
        current_hostel_id: parse_uuid_opt(row.get::<_, Option<String>>(5)?)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?)?,
    })
}

pub struct UserStore<'a> {
    conn: &'a Connection,
}

impl<'a> UserStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new user
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn create(&self, user: &User) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, name, phone, email, password_hash, current_hostel_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.phone,
                    user.email,
                    user.password_hash,
                    user.current_hostel_id.map(|h| h.to_string()),
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    let key = user.email.as_deref().or(user.phone.as_deref()).unwrap_or_default();
                    Error::DuplicateUser(key.to_string())
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// Find user by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let user = self
            .conn
            .query_row(&sql, params![id.to_string()], user_from_row)
            .optional()?;
        Ok(user)
    }

    pub fn get(&self, id: Uuid) -> Result<User> {
        self.find_by_id(id)?.ok_or_else(|| Error::not_found("user", id))
    }

    /// Find user by email (case-insensitive)
    #[instrument(skip(self))]
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = lower(?1)");
        let user = self
            .conn
            .query_row(&sql, params![email.trim()], user_from_row)
            .optional()?;
        Ok(user)
    }

    #[instrument(skip(self))]
    pub fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE phone = ?1");
        let user = self
            .conn
            .query_row(&sql, params![phone.trim()], user_from_row)
            .optional()?;
        Ok(user)
    }

    /// Update the cached current-hostel pointer
    #[instrument(skip(self))]
    pub fn set_current_hostel(&self, user_id: Uuid, hostel_id: Option<Uuid>) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE users SET current_hostel_id = ?1 WHERE id = ?2",
            params![hostel_id.map(|h| h.to_string()), user_id.to_string()],
        )?;
        if updated == 0 {
            return Err(Error::not_found("user", user_id));
        }
        Ok(())
    }

    /// Users whose cached pointer names `hostel_id`
    #[instrument(skip(self))]
    pub fn list_current_for_hostel(&self, hostel_id: Uuid) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE current_hostel_id = ?1 ORDER BY name"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![hostel_id.to_string()], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }
}
