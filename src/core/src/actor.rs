//! Identity of the caller, as supplied by the upstream identity provider.
//!
//! The engine never authenticates anyone itself; it only compares the
//! provided user id against instance ownership and checks the role for the
//! administrative paths.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Authenticated caller of an orchestration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    /// `Host` header of the inbound request, used to build direct URLs.
    pub request_host: Option<String>,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::User,
            request_host: None,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
            request_host: None,
        }
    }

    pub fn with_request_host(mut self, host: Option<String>) -> Self {
        self.request_host = host;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
