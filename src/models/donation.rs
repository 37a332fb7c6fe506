use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::EmoteSummary;
use crate::entities::{
    BalanceTransactionKind, DonationStatus, PayoutMethod, PayoutStatus,
    balance_transaction_entity as btx, donation_entity as donations, payout_entity as payouts,
};
use crate::services::DonationOutcome;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DonationResponse {
    pub id: i64,
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

impl From<donations::Model> for DonationResponse {
    fn from(d: donations::Model) -> Self {
        Self {
            id: d.id,
            payment_ref: d.payment_ref,
            donor_id: d.donor_id,
            recipient_id: d.recipient_id,
            amount_cents: d.amount_cents,
            fee_cents: d.fee_cents,
            net_cents: d.net_cents,
            recipient_share_cents: d.recipient_share_cents,
            platform_share_cents: d.platform_share_cents,
            artist_share_cents: d.artist_share_cents,
            artist_id: d.artist_id,
            roll_count: d.roll_count,
            status: d.status,
            failure_reason: d.failure_reason,
            created_at: d.created_at,
            completed_at: d.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DonationOutcomeResponse {
    pub donation: DonationResponse,
    pub awarded: Vec<EmoteSummary>,
}

impl From<DonationOutcome> for DonationOutcomeResponse {
    fn from(o: DonationOutcome) -> Self {
        Self {
            donation: o.donation.into(),
            awarded: o.awarded.into_iter().map(Into::into).collect(),
        }
    }
}

/// Manual delivery of a captured payment (admin tooling / other processors)
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PaymentConfirmedRequest {
    pub donor_id: i64,
    pub recipient_id: i64,
    #[schema(example = 1000)]
    pub amount_cents: i64,
    #[schema(example = "pi_3Nabc")]
    pub payment_ref: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PaymentFailedRequest {
    pub payment_ref: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceTransactionResponse {
    pub id: i64,
    pub kind: BalanceTransactionKind,
    pub amount_cents: i64,
    pub balance_after: i64,
    pub donation_id: Option<i64>,
    pub payout_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<btx::Model> for BalanceTransactionResponse {
    fn from(t: btx::Model) -> Self {
        Self {
            id: t.id,
            kind: t.kind,
            amount_cents: t.amount_cents,
            balance_after: t.balance_after,
            donation_id: t.donation_id,
            payout_id: t.payout_id,
            description: t.description,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PayoutRequest {
    #[schema(example = 2500)]
    pub amount_cents: i64,
    pub method: PayoutMethod,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PayoutResponse {
    pub id: i64,
    pub amount_cents: i64,
    pub method: PayoutMethod,
    pub status: PayoutStatus,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<payouts::Model> for PayoutResponse {
    fn from(p: payouts::Model) -> Self {
        Self {
            id: p.id,
            amount_cents: p.amount_cents,
            method: p.method,
            status: p.status,
            created_at: p.created_at,
        }
    }
}
