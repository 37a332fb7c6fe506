use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "donation_status")]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl std::fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DonationStatus::Pending => write!(f, "pending"),
            DonationStatus::Completed => write!(f, "completed"),
            DonationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One row per payment reference. Amounts are cents.
/// donor/recipient are nullable: a failure event may arrive for a payment never seen before.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "donations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub payment_ref: String,
    pub donor_id: Option<i64>,
    pub recipient_id: Option<i64>,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub recipient_share_cents: i64,
    pub platform_share_cents: i64,
    pub artist_share_cents: i64,
    pub artist_id: Option<i64>,
    pub roll_count: i64,
    pub status: DonationStatus,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Failed before any roll was claimed, so a later success for the same
    /// payment reference may still be processed
    pub fn is_reopenable(&self) -> bool {
        self.status == DonationStatus::Failed && self.roll_count == 0
    }
}
