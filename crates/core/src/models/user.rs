//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A person known to the mess (resident, manager or owner)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Argon2 PHC string; absent for accounts created by an external provider
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Cached pointer to the hostel of the user's active membership
    pub current_hostel_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            phone: None,
            email: None,
            password_hash: None,
            current_hostel_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_phone(mut self, phone: String) -> Self {
        self.phone = Some(phone);
        self
    }

    pub fn with_email(mut self, email: String) -> Self {
        self.email = Some(email);
        self
    }
}

/// Registration input
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}
