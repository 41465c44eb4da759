//! Control-plane service implementations

pub mod audit;
pub mod escalations;
pub mod incidents;
pub mod integrations;
pub mod runbooks;
pub mod webhooks;
pub mod workflows;

use crate::error::{ApiError, Result};
use axum::http::HeaderMap;

/// Caller identity forwarded by the session layer, an external
/// collaborator. Used for audit attribution and admin gating.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub id: Option<String>,
    pub team_id: Option<String>,
    pub role: Option<String>,
}

impl Actor {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        Self {
            id: get("x-actor-id"),
            team_id: get("x-actor-team"),
            role: get("x-actor-role"),
        }
    }

    pub fn id_str(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn team_str(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    pub fn is_platform_admin(&self) -> bool {
        self.role.as_deref() == Some("platform_admin")
    }

    pub fn require_platform_admin(&self) -> Result<()> {
        if self.is_platform_admin() {
            Ok(())
        } else {
            Err(ApiError::PermissionDenied(
                "platform admin role required".to_string(),
            ))
        }
    }
}
