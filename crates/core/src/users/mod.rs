//! User registry: registration and password checks

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rusqlite::Connection;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{NewUser, User};
use crate::storage::{with_write_tx, UserStore};

const PHONE_DIGITS: usize = 11;
const MIN_PASSWORD_LEN: usize = 6;

fn normalize_phone(phone: &str) -> Result<String> {
    let phone = phone.trim();
    if phone.len() != PHONE_DIGITS || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid("phone", format!("must be exactly {PHONE_DIGITS} digits")));
    }
    Ok(phone.to_string())
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(Error::invalid("email", "must be an email address")),
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Authentication(format!("failed to hash password: {e}")))
}

pub struct UserRegistry<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
}

impl<'a> UserRegistry<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock) -> Self {
        Self { conn, clock }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub fn register_user(&self, input: NewUser) -> Result<User> {
        let name = input.name.trim();
        if name.chars().count() < 2 {
            return Err(Error::invalid("name", "must be at least 2 characters"));
        }
        let phone = input.phone.as_deref().map(normalize_phone).transpose()?;
        let email = input.email.as_deref().map(normalize_email).transpose()?;
        if phone.is_none() && email.is_none() {
            return Err(Error::invalid("contact", "a phone number or email is required"));
        }
        let password_hash = match input.password.as_deref() {
            Some(password) if password.chars().count() < MIN_PASSWORD_LEN => {
                return Err(Error::invalid(
                    "password",
                    format!("must be at least {MIN_PASSWORD_LEN} characters"),
                ));
            }
            Some(password) => Some(hash_password(password)?),
            None => None,
        };

        let user = User {
            phone,
            email,
            password_hash,
            created_at: self.clock.now(),
            ..User::new(name.to_string())
        };
        with_write_tx(self.conn, |conn| UserStore::new(conn).create(&user))?;
        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    pub fn user(&self, user_id: Uuid) -> Result<User> {
        UserStore::new(self.conn).get(user_id)
    }

    /// Check a password for the user identified by email or phone
    #[instrument(skip(self, password))]
    pub fn verify_credentials(&self, identifier: &str, password: &str) -> Result<User> {
        let users = UserStore::new(self.conn);
        let user = if identifier.contains('@') {
            users.find_by_email(&normalize_email(identifier)?)?
        } else {
            users.find_by_phone(&normalize_phone(identifier)?)?
        };

        let rejected = || Error::Authentication("invalid credentials".to_string());
        let Some(user) = user else {
            debug!("No user for identifier");
            return Err(rejected());
        };
        let Some(stored) = user.password_hash.as_deref() else {
            debug!(user_id = %user.id, "User has no password");
            return Err(rejected());
        };
        let parsed = PasswordHash::new(stored)
            .map_err(|e| Error::Authentication(format!("stored password hash is invalid: {e}")))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            debug!(user_id = %user.id, "Password mismatch");
            return Err(rejected());
        }
        Ok(user)
    }
}
