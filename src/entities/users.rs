use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Staff roles that unlock role-gated emote tiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Artist,
    Developer,
    Founder,
}

/// Registered user.
/// - external_id: stable id issued by the login provider (identity boundary)
/// - balance_cents: cached sum of balance_transactions, only changed together with a ledger row
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub external_id: String,
    #[sea_orm(unique)]
    pub username: String,
    pub display_name: Option<String>,
    pub is_artist: bool,
    pub is_developer: bool,
    pub is_founder: bool,
    pub is_admin: bool,
    pub balance_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn has_role(&self, role: StaffRole) -> bool {
        match role {
            StaffRole::Artist => self.is_artist,
            StaffRole::Developer => self.is_developer,
            StaffRole::Founder => self.is_founder,
        }
    }

    pub fn staff_roles(&self) -> Vec<StaffRole> {
        [StaffRole::Artist, StaffRole::Developer, StaffRole::Founder]
            .into_iter()
            .filter(|r| self.has_role(*r))
            .collect()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
