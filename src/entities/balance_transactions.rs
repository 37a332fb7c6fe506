use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "balance_transaction_kind"
)]
#[serde(rename_all = "snake_case")]
pub enum BalanceTransactionKind {
    #[sea_orm(string_value = "donation_share")]
    DonationShare,
    #[sea_orm(string_value = "artist_share")]
    ArtistShare,
    #[sea_orm(string_value = "payout")]
    Payout,
}

/// Audit trail for every change of users.balance_cents
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "balance_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub kind: BalanceTransactionKind,
    /// Signed, cents
    pub amount_cents: i64,
    pub balance_after: i64,
    pub donation_id: Option<i64>,
    pub payout_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
