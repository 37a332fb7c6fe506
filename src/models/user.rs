use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::EmoteSummary;
use crate::entities::{StaffRole, user_entity as users};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub roles: Vec<StaffRole>,
    pub is_admin: bool,
    pub balance_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl From<users::Model> for UserResponse {
    fn from(u: users::Model) -> Self {
        Self {
            roles: u.staff_roles(),
            id: u.id,
            username: u.username,
            display_name: u.display_name,
            is_admin: u.is_admin,
            balance_cents: u.balance_cents,
            created_at: u.created_at,
        }
    }
}

/// Identity onboarding: maps an external login id to an internal user, creating it on first sight
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CreateUserRequest {
    #[schema(example = "twitch|12345")]
    pub external_id: String,
    #[schema(example = "streamfan")]
    pub username: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<StaffRole>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OnboardResponse {
    pub user: UserResponse,
    pub granted: Vec<EmoteSummary>,
    /// Bearer token for the new user
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SetRoleRequest {
    pub role: StaffRole,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SetRoleResponse {
    pub user: UserResponse,
    pub granted: Vec<EmoteSummary>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct OverrideCountRequest {
    /// At least 1
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HoldingResponse {
    pub emote: EmoteSummary,
    pub count: i64,
}
