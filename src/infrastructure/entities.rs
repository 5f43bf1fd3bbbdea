//! Database entities

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(u8)]
pub enum Role {
    User = 1,
    Admin = 2,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn from_name(name: &str) -> Option<Role> {
        match name {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Role hierarchy: admins may do everything users may.
    pub fn at_least(&self, required: Role) -> bool {
        (*self as u8) >= (required as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(u8)]
pub enum Plan {
    Free = 1,
    Pro = 2,
    Enterprise = 3,
}

impl Plan {
    pub fn name(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn from_name(name: &str) -> Option<Plan> {
        match name {
            "free" => Some(Plan::Free),
            "pro" => Some(Plan::Pro),
            "enterprise" => Some(Plan::Enterprise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub password_salt: String,
    pub role: Role,
    pub plan: Plan,
    pub messages_used: i64,
    pub tokens_used: i64,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub cycle_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct Session {
    pub token: Uuid,
    pub user: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub user: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub user: Uuid,
    pub project_id: Option<Uuid>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::Type)]
#[repr(u8)]
pub enum MessageKind {
    System = 1,
    Bot = 2,
    User = 3,
}

#[derive(Debug, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub text: String,
}

/// Extracted user fact, upserted by `(user, key)`.
#[derive(Debug, Clone, FromRow)]
pub struct Memory {
    pub user: Uuid,
    pub key: String,
    pub value: String,
    pub kind: String,
    pub confidence: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
