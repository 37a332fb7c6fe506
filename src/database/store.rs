//! Persistence boundary for the allocation core.
//!
//! Services only talk to these traits. `PgStore` backs them with sea-orm,
//! `MemoryStore` keeps everything in process.

use async_trait::async_trait;

use crate::entities::{
    BalanceTransactionKind, PayoutMethod, Rarity, StaffRole, balance_transaction_entity as btx,
    donation_entity as donations, emote_entity as emotes, payout_entity as payouts,
    user_emote_entity as holdings, user_entity as users,
};
use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct NewEmote {
    pub name: String,
    pub rarity: Rarity,
    pub artist_id: Option<i64>,
    /// 0 = unlimited; remaining_instances starts equal to this
    pub max_instances: i64,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub is_artist: bool,
    pub is_developer: bool,
    pub is_founder: bool,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewDonation {
    pub payment_ref: String,
    pub donor_id: i64,
    pub recipient_id: i64,
    pub amount_cents: i64,
    pub roll_count: i64,
}

/// A balance change to be written with its ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceCredit {
    pub user_id: i64,
    pub kind: BalanceTransactionKind,
    pub amount_cents: i64,
    pub description: Option<String>,
}

/// Everything written when a donation completes, applied in one transaction
#[derive(Debug, Clone)]
pub struct DonationSettlement {
    pub donation_id: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub recipient_share_cents: i64,
    pub platform_share_cents: i64,
    pub artist_share_cents: i64,
    pub artist_id: Option<i64>,
    /// Awarded emote ids in roll order
    pub awarded: Vec<i64>,
    pub credits: Vec<BalanceCredit>,
}

/// Outcome of registering a payment reference
#[derive(Debug, Clone)]
pub enum DonationClaim {
    Created(donations::Model),
    Existing(donations::Model),
}

/// Reward counters. `decrement_instance` is the only mutator of stock.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn list_emotes(&self) -> AppResult<Vec<emotes::Model>>;

    async fn find_emote(&self, emote_id: i64) -> AppResult<Option<emotes::Model>>;

    /// Fails with `Conflict` on a duplicate name
    async fn insert_emote(&self, new: NewEmote) -> AppResult<emotes::Model>;

    /// Atomic "decrement if > 0". Returns false when no unit was taken.
    async fn decrement_instance(&self, emote_id: i64) -> AppResult<bool>;
}

/// (user, emote) -> count relation
#[async_trait]
pub trait HoldingStore: Send + Sync {
    async fn holding_count(&self, user_id: i64, emote_id: i64) -> AppResult<i64>;

    /// Adds `by` to the holding, creating it when absent. Returns the new count.
    async fn increment_holding(&self, user_id: i64, emote_id: i64, by: i64) -> AppResult<i64>;

    /// Creates the holding with count 1 unless one exists. Returns whether it was created.
    async fn insert_holding_if_absent(&self, user_id: i64, emote_id: i64) -> AppResult<bool>;

    async fn set_holding(&self, user_id: i64, emote_id: i64, count: i64) -> AppResult<()>;

    async fn holdings_for_user(&self, user_id: i64) -> AppResult<Vec<holdings::Model>>;

    /// Units of an emote held across all users
    async fn total_held(&self, emote_id: i64) -> AppResult<i64>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: i64) -> AppResult<Option<users::Model>>;

    async fn find_user_by_external_id(&self, external_id: &str) -> AppResult<Option<users::Model>>;

    /// Fails with `Conflict` on a duplicate external id or username
    async fn insert_user(&self, new: NewUser) -> AppResult<users::Model>;

    async fn all_user_ids(&self) -> AppResult<Vec<i64>>;

    /// Ids of the `limit` earliest users by creation time
    async fn earliest_user_ids(&self, limit: u64) -> AppResult<Vec<i64>>;

    async fn user_ids_with_role(&self, role: StaffRole) -> AppResult<Vec<i64>>;

    async fn set_role(&self, user_id: i64, role: StaffRole, enabled: bool)
    -> AppResult<users::Model>;

    /// Fails with `Conflict` when another user holds `username`
    async fn update_profile(
        &self,
        user_id: i64,
        username: String,
        display_name: Option<String>,
    ) -> AppResult<users::Model>;
}

#[async_trait]
pub trait DonationStore: Send + Sync {
    async fn find_by_payment_ref(&self, payment_ref: &str) -> AppResult<Option<donations::Model>>;

    /// Inserts a Pending record unless the payment reference is already known
    async fn claim_payment(&self, new: NewDonation) -> AppResult<DonationClaim>;

    /// Marks the donation Completed and writes rewards, ledger rows and balances atomically
    async fn settle(&self, settlement: DonationSettlement) -> AppResult<donations::Model>;

    /// Marks the reference Failed, inserting a bare record when unknown.
    /// A Completed record is left untouched and returned.
    async fn mark_failed(&self, payment_ref: &str, reason: &str) -> AppResult<donations::Model>;

    /// Turns a reopenable Failed record back into a Pending claim for `new`.
    /// Returns `None` when the record is gone or no longer reopenable.
    async fn reopen_failed(&self, new: NewDonation) -> AppResult<Option<donations::Model>>;

    async fn awarded_emote_ids(&self, donation_id: i64) -> AppResult<Vec<i64>>;

    async fn donations_by_donor(&self, donor_id: i64) -> AppResult<Vec<donations::Model>>;

    async fn balance_transactions(&self, user_id: i64) -> AppResult<Vec<btx::Model>>;

    /// Debits the balance and records a Pending payout atomically.
    /// Fails with `ValidationError` when the balance is too low.
    async fn create_payout(
        &self,
        user_id: i64,
        amount_cents: i64,
        method: PayoutMethod,
    ) -> AppResult<payouts::Model>;
}
