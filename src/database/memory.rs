use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use super::store::{
    DonationClaim, DonationSettlement, DonationStore, HoldingStore, InventoryStore, NewDonation,
    NewEmote, NewUser, UserStore,
};
use crate::entities::{
    BalanceTransactionKind, DonationStatus, PayoutMethod, PayoutStatus, StaffRole,
    balance_transaction_entity as btx, donation_entity as donations,
    donation_reward_entity as rewards, emote_entity as emotes, payout_entity as payouts,
    user_emote_entity as holdings, user_entity as users,
};
use crate::error::{AppError, AppResult};

/// Stock counter lives outside the table lock so decrements only need a read guard
struct EmoteSlot {
    model: emotes::Model,
    remaining: Arc<AtomicI64>,
}

impl EmoteSlot {
    fn snapshot(&self) -> emotes::Model {
        emotes::Model {
            remaining_instances: self.remaining.load(Ordering::Acquire),
            ..self.model.clone()
        }
    }
}

#[derive(Default)]
struct Tables {
    emotes: BTreeMap<i64, EmoteSlot>,
    users: BTreeMap<i64, users::Model>,
    holdings: HashMap<(i64, i64), holdings::Model>,
    donations: BTreeMap<i64, donations::Model>,
    donation_rewards: Vec<rewards::Model>,
    balance_transactions: Vec<btx::Model>,
    payouts: Vec<payouts::Model>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn user_mut(&mut self, user_id: i64) -> AppResult<&mut users::Model> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
    }

    fn push_balance_change(
        &mut self,
        user_id: i64,
        kind: BalanceTransactionKind,
        amount_cents: i64,
        donation_id: Option<i64>,
        payout_id: Option<i64>,
        description: Option<String>,
    ) -> AppResult<()> {
        let id = self.next_id();
        let user = self.user_mut(user_id)?;
        user.balance_cents += amount_cents;
        user.updated_at = Some(Utc::now());
        let balance_after = user.balance_cents;
        self.balance_transactions.push(btx::Model {
            id,
            user_id,
            kind,
            amount_cents,
            balance_after,
            donation_id,
            payout_id,
            description,
            created_at: Some(Utc::now()),
        });
        Ok(())
    }
}

/// In-process store for local runs and tests
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn list_emotes(&self) -> AppResult<Vec<emotes::Model>> {
        let tables = self.tables.read();
        Ok(tables.emotes.values().map(EmoteSlot::snapshot).collect())
    }

    async fn find_emote(&self, emote_id: i64) -> AppResult<Option<emotes::Model>> {
        let tables = self.tables.read();
        Ok(tables.emotes.get(&emote_id).map(EmoteSlot::snapshot))
    }

    async fn insert_emote(&self, new: NewEmote) -> AppResult<emotes::Model> {
        let mut tables = self.tables.write();
        if tables.emotes.values().any(|s| s.model.name == new.name) {
            return Err(AppError::Conflict(format!(
                "Emote name '{}' already exists",
                new.name
            )));
        }
        let id = tables.next_id();
        let now = Utc::now();
        let model = emotes::Model {
            id,
            name: new.name,
            rarity: new.rarity,
            artist_id: new.artist_id,
            max_instances: new.max_instances,
            remaining_instances: new.max_instances,
            created_at: Some(now),
            updated_at: Some(now),
        };
        tables.emotes.insert(
            id,
            EmoteSlot {
                remaining: Arc::new(AtomicI64::new(model.remaining_instances)),
                model: model.clone(),
            },
        );
        Ok(model)
    }

    async fn decrement_instance(&self, emote_id: i64) -> AppResult<bool> {
        let counter = {
            let tables = self.tables.read();
            match tables.emotes.get(&emote_id) {
                Some(slot) => slot.remaining.clone(),
                None => return Err(AppError::NotFound(format!("Emote {emote_id} not found"))),
            }
        };
        let taken = counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                (remaining > 0).then(|| remaining - 1)
            })
            .is_ok();
        Ok(taken)
    }
}

#[async_trait]
impl HoldingStore for MemoryStore {
    async fn holding_count(&self, user_id: i64, emote_id: i64) -> AppResult<i64> {
        let tables = self.tables.read();
        Ok(tables
            .holdings
            .get(&(user_id, emote_id))
            .map(|h| h.count)
            .unwrap_or(0))
    }

    async fn increment_holding(&self, user_id: i64, emote_id: i64, by: i64) -> AppResult<i64> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        if let Some(h) = tables.holdings.get_mut(&(user_id, emote_id)) {
            h.count += by;
            h.updated_at = Some(now);
            return Ok(h.count);
        }
        let id = tables.next_id();
        tables.holdings.insert(
            (user_id, emote_id),
            holdings::Model {
                id,
                user_id,
                emote_id,
                count: by,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        Ok(by)
    }

    async fn insert_holding_if_absent(&self, user_id: i64, emote_id: i64) -> AppResult<bool> {
        let mut tables = self.tables.write();
        if tables.holdings.contains_key(&(user_id, emote_id)) {
            return Ok(false);
        }
        let id = tables.next_id();
        let now = Utc::now();
        tables.holdings.insert(
            (user_id, emote_id),
            holdings::Model {
                id,
                user_id,
                emote_id,
                count: 1,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        Ok(true)
    }

    async fn set_holding(&self, user_id: i64, emote_id: i64, count: i64) -> AppResult<()> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        if let Some(h) = tables.holdings.get_mut(&(user_id, emote_id)) {
            h.count = count;
            h.updated_at = Some(now);
            return Ok(());
        }
        let id = tables.next_id();
        tables.holdings.insert(
            (user_id, emote_id),
            holdings::Model {
                id,
                user_id,
                emote_id,
                count,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        Ok(())
    }

    async fn holdings_for_user(&self, user_id: i64) -> AppResult<Vec<holdings::Model>> {
        let tables = self.tables.read();
        let mut list: Vec<holdings::Model> = tables
            .holdings
            .values()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by_key(|h| h.emote_id);
        Ok(list)
    }

    async fn total_held(&self, emote_id: i64) -> AppResult<i64> {
        let tables = self.tables.read();
        Ok(tables
            .holdings
            .values()
            .filter(|h| h.emote_id == emote_id)
            .map(|h| h.count)
            .sum())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, user_id: i64) -> AppResult<Option<users::Model>> {
        Ok(self.tables.read().users.get(&user_id).cloned())
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> AppResult<Option<users::Model>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn insert_user(&self, new: NewUser) -> AppResult<users::Model> {
        let mut tables = self.tables.write();
        if tables
            .users
            .values()
            .any(|u| u.external_id == new.external_id || u.username == new.username)
        {
            return Err(AppError::Conflict(format!(
                "User '{}' already exists",
                new.username
            )));
        }
        let id = tables.next_id();
        let model = users::Model {
            id,
            external_id: new.external_id,
            username: new.username,
            display_name: new.display_name,
            is_artist: new.is_artist,
            is_developer: new.is_developer,
            is_founder: new.is_founder,
            is_admin: new.is_admin,
            balance_cents: 0,
            created_at: Utc::now(),
            updated_at: None,
        };
        tables.users.insert(id, model.clone());
        Ok(model)
    }

    async fn all_user_ids(&self) -> AppResult<Vec<i64>> {
        Ok(self.tables.read().users.keys().copied().collect())
    }

    async fn earliest_user_ids(&self, limit: u64) -> AppResult<Vec<i64>> {
        let tables = self.tables.read();
        let mut list: Vec<&users::Model> = tables.users.values().collect();
        list.sort_by_key(|u| (u.created_at, u.id));
        Ok(list
            .into_iter()
            .take(limit as usize)
            .map(|u| u.id)
            .collect())
    }

    async fn user_ids_with_role(&self, role: StaffRole) -> AppResult<Vec<i64>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .filter(|u| u.has_role(role))
            .map(|u| u.id)
            .collect())
    }

    async fn set_role(
        &self,
        user_id: i64,
        role: StaffRole,
        enabled: bool,
    ) -> AppResult<users::Model> {
        let mut tables = self.tables.write();
        let user = tables.user_mut(user_id)?;
        match role {
            StaffRole::Artist => user.is_artist = enabled,
            StaffRole::Developer => user.is_developer = enabled,
            StaffRole::Founder => user.is_founder = enabled,
        }
        user.updated_at = Some(Utc::now());
        Ok(user.clone())
    }

    async fn update_profile(
        &self,
        user_id: i64,
        username: String,
        display_name: Option<String>,
    ) -> AppResult<users::Model> {
        let mut tables = self.tables.write();
        if tables
            .users
            .values()
            .any(|u| u.id != user_id && u.username == username)
        {
            return Err(AppError::Conflict(format!(
                "User '{username}' already exists"
            )));
        }
        let user = tables.user_mut(user_id)?;
        user.username = username;
        user.display_name = display_name;
        user.updated_at = Some(Utc::now());
        Ok(user.clone())
    }
}

#[async_trait]
impl DonationStore for MemoryStore {
    async fn find_by_payment_ref(&self, payment_ref: &str) -> AppResult<Option<donations::Model>> {
        Ok(self
            .tables
            .read()
            .donations
            .values()
            .find(|d| d.payment_ref == payment_ref)
            .cloned())
    }

    async fn claim_payment(&self, new: NewDonation) -> AppResult<DonationClaim> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables
            .donations
            .values()
            .find(|d| d.payment_ref == new.payment_ref)
        {
            return Ok(DonationClaim::Existing(existing.clone()));
        }
        let id = tables.next_id();
        let model = donations::Model {
            id,
            payment_ref: new.payment_ref,
            donor_id: Some(new.donor_id),
            recipient_id: Some(new.recipient_id),
            amount_cents: new.amount_cents,
            fee_cents: 0,
            net_cents: 0,
            recipient_share_cents: 0,
            platform_share_cents: 0,
            artist_share_cents: 0,
            artist_id: None,
            roll_count: new.roll_count,
            status: DonationStatus::Pending,
            failure_reason: None,
            created_at: Some(Utc::now()),
            completed_at: None,
        };
        tables.donations.insert(id, model.clone());
        Ok(DonationClaim::Created(model))
    }

    async fn settle(&self, settlement: DonationSettlement) -> AppResult<donations::Model> {
        let mut tables = self.tables.write();
        let donation_id = settlement.donation_id;
        match tables.donations.get(&donation_id) {
            None => {
                return Err(AppError::NotFound(format!(
                    "Donation {donation_id} not found"
                )));
            }
            Some(d) if d.status != DonationStatus::Pending => {
                return Err(AppError::Conflict(format!(
                    "Donation {donation_id} is already {}",
                    d.status
                )));
            }
            Some(_) => {}
        }
        // Validate every credited user before touching anything
        for credit in &settlement.credits {
            if !tables.users.contains_key(&credit.user_id) {
                return Err(AppError::NotFound(format!(
                    "User {} not found",
                    credit.user_id
                )));
            }
        }

        for (position, emote_id) in settlement.awarded.iter().enumerate() {
            let id = tables.next_id();
            tables.donation_rewards.push(rewards::Model {
                id,
                donation_id,
                emote_id: *emote_id,
                position: position as i32,
            });
        }
        for credit in settlement.credits {
            tables.push_balance_change(
                credit.user_id,
                credit.kind,
                credit.amount_cents,
                Some(donation_id),
                None,
                credit.description,
            )?;
        }

        let donation = tables
            .donations
            .get_mut(&donation_id)
            .ok_or_else(|| AppError::NotFound(format!("Donation {donation_id} not found")))?;
        donation.fee_cents = settlement.fee_cents;
        donation.net_cents = settlement.net_cents;
        donation.recipient_share_cents = settlement.recipient_share_cents;
        donation.platform_share_cents = settlement.platform_share_cents;
        donation.artist_share_cents = settlement.artist_share_cents;
        donation.artist_id = settlement.artist_id;
        donation.status = DonationStatus::Completed;
        donation.completed_at = Some(Utc::now());
        Ok(donation.clone())
    }

    async fn mark_failed(&self, payment_ref: &str, reason: &str) -> AppResult<donations::Model> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables
            .donations
            .values_mut()
            .find(|d| d.payment_ref == payment_ref)
        {
            if existing.status != DonationStatus::Completed {
                existing.status = DonationStatus::Failed;
                existing.failure_reason = Some(reason.to_string());
            }
            return Ok(existing.clone());
        }
        let id = tables.next_id();
        let model = donations::Model {
            id,
            payment_ref: payment_ref.to_string(),
            donor_id: None,
            recipient_id: None,
            amount_cents: 0,
            fee_cents: 0,
            net_cents: 0,
            recipient_share_cents: 0,
            platform_share_cents: 0,
            artist_share_cents: 0,
            artist_id: None,
            roll_count: 0,
            status: DonationStatus::Failed,
            failure_reason: Some(reason.to_string()),
            created_at: Some(Utc::now()),
            completed_at: None,
        };
        tables.donations.insert(id, model.clone());
        Ok(model)
    }

    async fn reopen_failed(&self, new: NewDonation) -> AppResult<Option<donations::Model>> {
        let mut tables = self.tables.write();
        let Some(existing) = tables
            .donations
            .values_mut()
            .find(|d| d.payment_ref == new.payment_ref && d.is_reopenable())
        else {
            return Ok(None);
        };
        existing.donor_id = Some(new.donor_id);
        existing.recipient_id = Some(new.recipient_id);
        existing.amount_cents = new.amount_cents;
        existing.roll_count = new.roll_count;
        existing.status = DonationStatus::Pending;
        existing.failure_reason = None;
        Ok(Some(existing.clone()))
    }

    async fn awarded_emote_ids(&self, donation_id: i64) -> AppResult<Vec<i64>> {
        let tables = self.tables.read();
        let mut list: Vec<&rewards::Model> = tables
            .donation_rewards
            .iter()
            .filter(|r| r.donation_id == donation_id)
            .collect();
        list.sort_by_key(|r| r.position);
        Ok(list.into_iter().map(|r| r.emote_id).collect())
    }

    async fn donations_by_donor(&self, donor_id: i64) -> AppResult<Vec<donations::Model>> {
        Ok(self
            .tables
            .read()
            .donations
            .values()
            .rev()
            .filter(|d| d.donor_id == Some(donor_id))
            .cloned()
            .collect())
    }

    async fn balance_transactions(&self, user_id: i64) -> AppResult<Vec<btx::Model>> {
        Ok(self
            .tables
            .read()
            .balance_transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_payout(
        &self,
        user_id: i64,
        amount_cents: i64,
        method: PayoutMethod,
    ) -> AppResult<payouts::Model> {
        let mut tables = self.tables.write();
        let balance = tables.user_mut(user_id)?.balance_cents;
        if balance < amount_cents {
            return Err(AppError::ValidationError(format!(
                "Insufficient balance: {balance} cents available"
            )));
        }
        let id = tables.next_id();
        let payout = payouts::Model {
            id,
            user_id,
            amount_cents,
            method,
            status: PayoutStatus::Pending,
            created_at: Some(Utc::now()),
        };
        tables.push_balance_change(
            user_id,
            BalanceTransactionKind::Payout,
            -amount_cents,
            None,
            Some(id),
            Some(format!("Payout via {method:?}")),
        )?;
        tables.payouts.push(payout.clone());
        Ok(payout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Rarity;

    fn emote(name: &str, max: i64) -> NewEmote {
        NewEmote {
            name: name.to_string(),
            rarity: Rarity::Legendary,
            artist_id: None,
            max_instances: max,
        }
    }

    #[tokio::test]
    async fn test_decrement_stops_at_zero() {
        let store = MemoryStore::new();
        let e = store.insert_emote(emote("kappa", 2)).await.unwrap();
        assert!(store.decrement_instance(e.id).await.unwrap());
        assert!(store.decrement_instance(e.id).await.unwrap());
        assert!(!store.decrement_instance(e.id).await.unwrap());
        let e = store.find_emote(e.id).await.unwrap().unwrap();
        assert_eq!(e.remaining_instances, 0);
    }

    #[tokio::test]
    async fn test_decrement_unknown_emote_is_not_found() {
        let store = MemoryStore::new();
        let err = store.decrement_instance(42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_decrements_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        let emote_id = store.insert_emote(emote("pogchamp", 7)).await.unwrap().id;

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.decrement_instance(emote_id).await.unwrap()
            }));
        }
        let mut won = 0;
        for h in handles {
            if h.await.unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, 7);
        let e = store.find_emote(emote_id).await.unwrap().unwrap();
        assert_eq!(e.remaining_instances, 0);
    }

    #[tokio::test]
    async fn test_duplicate_emote_name_conflicts() {
        let store = MemoryStore::new();
        store.insert_emote(emote("kappa", 1)).await.unwrap();
        let err = store.insert_emote(emote("kappa", 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_insert_holding_if_absent_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.insert_holding_if_absent(1, 2).await.unwrap());
        assert!(!store.insert_holding_if_absent(1, 2).await.unwrap());
        assert_eq!(store.holding_count(1, 2).await.unwrap(), 1);
        assert_eq!(store.increment_holding(1, 2, 3).await.unwrap(), 4);
        assert_eq!(store.total_held(2).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_payout_rejects_overdraft() {
        let store = MemoryStore::new();
        let u = store
            .insert_user(NewUser {
                external_id: "t-1".into(),
                username: "streamer".into(),
                display_name: None,
                is_artist: false,
                is_developer: false,
                is_founder: false,
                is_admin: false,
            })
            .await
            .unwrap();
        let err = store
            .create_payout(u.id, 500, PayoutMethod::Paypal)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(store.balance_transactions(u.id).await.unwrap().is_empty());
    }
}
