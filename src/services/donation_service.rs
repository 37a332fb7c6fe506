use std::sync::Arc;

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::AllocationEngine;
use crate::config::FeeConfig;
use crate::database::{
    BalanceCredit, DonationClaim, DonationSettlement, DonationStore, InventoryStore, NewDonation,
    UserStore,
};
use crate::entities::{
    BalanceTransactionKind, DonationStatus, donation_entity as donations, emote_entity as emotes,
};
use crate::error::{AppError, AppResult};
use crate::utils::{FeeBreakdown, format_cents, roll_count};

/// Payment captured by the processor. Amounts are cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmed {
    pub donor_id: i64,
    pub recipient_id: i64,
    pub amount_cents: i64,
    pub payment_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailed {
    pub payment_ref: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    Confirmed(PaymentConfirmed),
    Failed(PaymentFailed),
}

#[derive(Debug, Clone)]
pub struct DonationOutcome {
    pub donation: donations::Model,
    /// In roll order
    pub awarded: Vec<emotes::Model>,
}

/// Turns payment events into rolls, a fee split and balance credits
#[derive(Clone)]
pub struct DonationProcessor {
    engine: AllocationEngine,
    users: Arc<dyn UserStore>,
    donations: Arc<dyn DonationStore>,
    inventory: Arc<dyn InventoryStore>,
    fees: FeeConfig,
    max_consecutive_failures: u32,
}

impl DonationProcessor {
    pub fn new(
        engine: AllocationEngine,
        users: Arc<dyn UserStore>,
        donations: Arc<dyn DonationStore>,
        inventory: Arc<dyn InventoryStore>,
        fees: FeeConfig,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            engine,
            users,
            donations,
            inventory,
            fees,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    pub async fn handle_event(&self, event: PaymentEvent) -> AppResult<DonationOutcome> {
        match event {
            PaymentEvent::Confirmed(p) => self.process_confirmed(p).await,
            PaymentEvent::Failed(p) => self.process_failed(p).await,
        }
    }

    pub async fn process_failed(&self, payment: PaymentFailed) -> AppResult<DonationOutcome> {
        warn!(
            "Payment {} failed: {}",
            payment.payment_ref, payment.reason
        );
        let donation = self
            .donations
            .mark_failed(&payment.payment_ref, &payment.reason)
            .await?;
        Ok(DonationOutcome {
            donation,
            awarded: Vec::new(),
        })
    }

    pub async fn process_confirmed(&self, payment: PaymentConfirmed) -> AppResult<DonationOutcome> {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        self.process_confirmed_with(payment, &mut rng).await
    }

    pub async fn process_confirmed_with<R: Rng + Send>(
        &self,
        payment: PaymentConfirmed,
        rng: &mut R,
    ) -> AppResult<DonationOutcome> {
        self.validate(&payment).await?;

        let claim = NewDonation {
            payment_ref: payment.payment_ref.clone(),
            donor_id: payment.donor_id,
            recipient_id: payment.recipient_id,
            amount_cents: payment.amount_cents,
            roll_count: roll_count(payment.amount_cents),
        };
        let donation = match self.donations.claim_payment(claim.clone()).await? {
            DonationClaim::Created(d) => d,
            // an earlier attempt on the same intent failed before anything was rolled
            DonationClaim::Existing(d) if d.is_reopenable() => {
                match self.donations.reopen_failed(claim).await? {
                    Some(d) => {
                        info!(
                            "Payment {} succeeded after an earlier failure, reopening",
                            d.payment_ref
                        );
                        d
                    }
                    None => {
                        let current = self
                            .donations
                            .find_by_payment_ref(&payment.payment_ref)
                            .await?
                            .unwrap_or(d);
                        return self.replay(current).await;
                    }
                }
            }
            DonationClaim::Existing(d) => return self.replay(d).await,
        };

        let awarded = match self.roll_all(&payment, &donation, rng).await {
            Ok(awarded) => awarded,
            Err(e) => {
                self.fail_quietly(&payment.payment_ref, &e).await;
                return Err(e);
            }
        };

        let artist_id = match self.artist_of_first(&awarded).await {
            Ok(artist_id) => artist_id,
            Err(e) => {
                self.fail_quietly(&payment.payment_ref, &e).await;
                return Err(e);
            }
        };
        let split =
            match FeeBreakdown::compute(payment.amount_cents, artist_id.is_some(), &self.fees) {
                Ok(split) => split,
                Err(e) => {
                    self.fail_quietly(&payment.payment_ref, &e).await;
                    return Err(e);
                }
            };

        let mut credits = Vec::new();
        if split.recipient_cents > 0 {
            credits.push(BalanceCredit {
                user_id: payment.recipient_id,
                kind: BalanceTransactionKind::DonationShare,
                amount_cents: split.recipient_cents,
                description: Some(format!(
                    "Donation {} from user {}",
                    payment.payment_ref, payment.donor_id
                )),
            });
        }
        if let Some(artist_id) = artist_id
            && split.artist_cents > 0
        {
            credits.push(BalanceCredit {
                user_id: artist_id,
                kind: BalanceTransactionKind::ArtistShare,
                amount_cents: split.artist_cents,
                description: Some(format!("Artist share of donation {}", payment.payment_ref)),
            });
        }

        let settled = self
            .donations
            .settle(DonationSettlement {
                donation_id: donation.id,
                fee_cents: split.fee_cents,
                net_cents: split.net_cents,
                recipient_share_cents: split.recipient_cents,
                platform_share_cents: split.platform_cents,
                artist_share_cents: split.artist_cents,
                artist_id,
                awarded: awarded.iter().map(|e| e.id).collect(),
                credits,
            })
            .await;

        match settled {
            Ok(donation) => {
                info!(
                    "Donation {} completed: {} from user {} to user {}, {} roll(s), {} emote(s)",
                    donation.payment_ref,
                    format_cents(donation.amount_cents),
                    payment.donor_id,
                    payment.recipient_id,
                    donation.roll_count,
                    awarded.len()
                );
                Ok(DonationOutcome { donation, awarded })
            }
            Err(e) => {
                self.fail_quietly(&payment.payment_ref, &e).await;
                Err(e)
            }
        }
    }

    async fn validate(&self, payment: &PaymentConfirmed) -> AppResult<()> {
        if payment.payment_ref.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Payment reference is required".to_string(),
            ));
        }
        if payment.amount_cents < self.fees.min_donation_cents {
            return Err(AppError::ValidationError(format!(
                "Donation must be at least {}",
                format_cents(self.fees.min_donation_cents)
            )));
        }
        if payment.amount_cents > self.fees.max_donation_cents {
            return Err(AppError::ValidationError(format!(
                "Donation must not exceed {}",
                format_cents(self.fees.max_donation_cents)
            )));
        }
        if payment.donor_id == payment.recipient_id {
            return Err(AppError::ValidationError(
                "Cannot donate to yourself".to_string(),
            ));
        }
        for user_id in [payment.donor_id, payment.recipient_id] {
            if self.users.find_user(user_id).await?.is_none() {
                return Err(AppError::NotFound(format!("User {user_id} not found")));
            }
        }
        Ok(())
    }

    /// Redelivery of a known payment reference
    async fn replay(&self, donation: donations::Model) -> AppResult<DonationOutcome> {
        match donation.status {
            DonationStatus::Completed => {
                warn!(
                    "Payment {} already processed, returning recorded outcome",
                    donation.payment_ref
                );
                let mut awarded = Vec::new();
                for emote_id in self.donations.awarded_emote_ids(donation.id).await? {
                    if let Some(e) = self.inventory.find_emote(emote_id).await? {
                        awarded.push(e);
                    }
                }
                Ok(DonationOutcome { donation, awarded })
            }
            DonationStatus::Pending => Err(AppError::Conflict(format!(
                "Payment {} is already being processed",
                donation.payment_ref
            ))),
            DonationStatus::Failed => Err(AppError::Conflict(format!(
                "Payment {} failed while being processed",
                donation.payment_ref
            ))),
        }
    }

    /// Sequential rolls. A failed unit is skipped; too many persistence failures in a row abort.
    async fn roll_all<R: Rng + Send>(
        &self,
        payment: &PaymentConfirmed,
        donation: &donations::Model,
        rng: &mut R,
    ) -> AppResult<Vec<emotes::Model>> {
        let mut awarded = Vec::new();
        let mut consecutive_failures = 0u32;

        for unit in 0..donation.roll_count {
            match self.engine.roll_with(payment.donor_id, rng).await {
                Ok(Some(emote)) => {
                    consecutive_failures = 0;
                    awarded.push(emote);
                }
                Ok(None) => consecutive_failures = 0,
                Err(e) if e.is_persistence_failure() => {
                    consecutive_failures += 1;
                    error!(
                        "Roll {} of {} for payment {} failed: {e}",
                        unit + 1,
                        donation.roll_count,
                        payment.payment_ref
                    );
                    if consecutive_failures >= self.max_consecutive_failures {
                        return Err(e);
                    }
                }
                Err(e) => {
                    warn!(
                        "Roll {} of {} for payment {} skipped: {e}",
                        unit + 1,
                        donation.roll_count,
                        payment.payment_ref
                    );
                }
            }
        }
        Ok(awarded)
    }

    async fn artist_of_first(&self, awarded: &[emotes::Model]) -> AppResult<Option<i64>> {
        let Some(artist_id) = awarded.first().and_then(|e| e.artist_id) else {
            return Ok(None);
        };
        if self.users.find_user(artist_id).await?.is_none() {
            warn!("Artist {artist_id} no longer exists, platform keeps the artist share");
            return Ok(None);
        }
        Ok(Some(artist_id))
    }

    async fn fail_quietly(&self, payment_ref: &str, cause: &AppError) {
        if let Err(e) = self
            .donations
            .mark_failed(payment_ref, &cause.to_string())
            .await
        {
            error!("Could not mark payment {payment_ref} as failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocationConfig;
    use crate::database::{HoldingStore, MemoryStore, NewEmote, NewUser, Stores};
    use crate::entities::{Rarity, user_emote_entity as holdings, user_entity as users};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::services::{RarityTable, RewardCatalog, UserLedger};

    fn processor_for(stores: &Stores) -> DonationProcessor {
        let config = AllocationConfig::default();
        let engine = AllocationEngine::new(
            RewardCatalog::new(stores.inventory.clone(), RarityTable::from_config(&config)),
            stores.inventory.clone(),
            stores.users.clone(),
            UserLedger::new(stores.holdings.clone()),
            config.max_roll_attempts,
            config.early_adopter_cohort,
        );
        DonationProcessor::new(
            engine,
            stores.users.clone(),
            stores.donations.clone(),
            stores.inventory.clone(),
            FeeConfig::default(),
            config.max_consecutive_failures,
        )
    }

    async fn add_user(stores: &Stores, name: &str) -> users::Model {
        stores
            .users
            .insert_user(NewUser {
                external_id: format!("ext-{name}"),
                username: name.to_string(),
                display_name: None,
                is_artist: false,
                is_developer: false,
                is_founder: false,
                is_admin: false,
            })
            .await
            .unwrap()
    }

    fn confirmed(donor: i64, recipient: i64, cents: i64, reference: &str) -> PaymentConfirmed {
        PaymentConfirmed {
            donor_id: donor,
            recipient_id: recipient,
            amount_cents: cents,
            payment_ref: reference.to_string(),
        }
    }

    async fn common_emote(stores: &Stores, name: &str, stock: i64) -> emotes::Model {
        stores
            .inventory
            .insert_emote(NewEmote {
                name: name.into(),
                rarity: Rarity::Common,
                artist_id: None,
                max_instances: stock,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fractional_amount_floors_roll_count() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        let wave = stores
            .inventory
            .insert_emote(NewEmote {
                name: "wave".into(),
                rarity: Rarity::Common,
                artist_id: None,
                max_instances: 1_000,
            })
            .await
            .unwrap();

        let outcome = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 470, "pi_470"))
            .await
            .unwrap();

        assert_eq!(outcome.donation.roll_count, 4);
        assert_eq!(outcome.awarded.len(), 4);
        assert_eq!(outcome.donation.status, DonationStatus::Completed);
        assert_eq!(
            stores.holdings.holding_count(donor.id, wave.id).await.unwrap(),
            4
        );
        let after = stores.inventory.find_emote(wave.id).await.unwrap().unwrap();
        assert_eq!(after.remaining_instances, 996);
    }

    #[tokio::test]
    async fn test_split_credits_recipient_and_artist() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        let artist = add_user(&stores, "artist").await;
        stores
            .inventory
            .insert_emote(NewEmote {
                name: "brushwave".into(),
                rarity: Rarity::Common,
                artist_id: Some(artist.id),
                max_instances: 100,
            })
            .await
            .unwrap();

        let outcome = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 1_000, "pi_10"))
            .await
            .unwrap();
        let d = outcome.donation;
        assert_eq!(d.fee_cents, 59);
        assert_eq!(d.net_cents, 941);
        assert_eq!(d.recipient_share_cents, 847);
        assert_eq!(d.artist_share_cents, 47);
        assert_eq!(d.platform_share_cents, 47);
        assert_eq!(d.artist_id, Some(artist.id));

        let streamer = stores.users.find_user(streamer.id).await.unwrap().unwrap();
        let artist_after = stores.users.find_user(artist.id).await.unwrap().unwrap();
        assert_eq!(streamer.balance_cents, 847);
        assert_eq!(artist_after.balance_cents, 47);

        let ledger = stores.donations.balance_transactions(streamer.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, BalanceTransactionKind::DonationShare);
        assert_eq!(ledger[0].balance_after, 847);
    }

    #[tokio::test]
    async fn test_no_rewards_is_still_a_completed_donation() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;

        let outcome = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 500, "pi_empty"))
            .await
            .unwrap();
        assert!(outcome.awarded.is_empty());
        assert_eq!(outcome.donation.status, DonationStatus::Completed);
        assert_eq!(outcome.donation.artist_share_cents, 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_does_not_roll_twice() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        let wave = stores
            .inventory
            .insert_emote(NewEmote {
                name: "wave".into(),
                rarity: Rarity::Common,
                artist_id: None,
                max_instances: 100,
            })
            .await
            .unwrap();

        let first = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 300, "pi_dup"))
            .await
            .unwrap();
        let second = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 300, "pi_dup"))
            .await
            .unwrap();

        assert_eq!(first.donation.id, second.donation.id);
        assert_eq!(second.awarded.len(), 3);
        assert_eq!(
            stores.holdings.holding_count(donor.id, wave.id).await.unwrap(),
            3
        );
        let streamer = stores.users.find_user(streamer.id).await.unwrap().unwrap();
        assert_eq!(streamer.balance_cents, first.donation.recipient_share_cents);
    }

    #[tokio::test]
    async fn test_success_after_failed_attempt_reopens_the_payment() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        let wave = common_emote(&stores, "wave", 100).await;

        let failed = processor
            .handle_event(PaymentEvent::Failed(PaymentFailed {
                payment_ref: "pi_retry".into(),
                reason: "card_declined".into(),
            }))
            .await
            .unwrap();
        assert_eq!(failed.donation.status, DonationStatus::Failed);
        assert!(failed.awarded.is_empty());

        // the customer retries with another card on the same intent
        let outcome = processor
            .handle_event(PaymentEvent::Confirmed(confirmed(
                donor.id, streamer.id, 1_000, "pi_retry",
            )))
            .await
            .unwrap();
        assert_eq!(outcome.donation.id, failed.donation.id);
        assert_eq!(outcome.donation.status, DonationStatus::Completed);
        assert_eq!(outcome.donation.roll_count, 10);
        assert_eq!(outcome.donation.failure_reason, None);
        assert_eq!(outcome.awarded.len(), 10);
        assert_eq!(
            stores.holdings.holding_count(donor.id, wave.id).await.unwrap(),
            10
        );
        let streamer = stores.users.find_user(streamer.id).await.unwrap().unwrap();
        assert_eq!(streamer.balance_cents, 847);

        // redelivery of the success is idempotent
        let again = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 1_000, "pi_retry"))
            .await
            .unwrap();
        assert_eq!(again.awarded.len(), 10);
        let streamer = stores.users.find_user(streamer.id).await.unwrap().unwrap();
        assert_eq!(streamer.balance_cents, 847);
    }

    #[tokio::test]
    async fn test_late_failure_event_keeps_completed_donation() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        common_emote(&stores, "wave", 100).await;

        let done = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 1_000, "pi_late"))
            .await
            .unwrap();
        let after = processor
            .handle_event(PaymentEvent::Failed(PaymentFailed {
                payment_ref: "pi_late".into(),
                reason: "card_declined".into(),
            }))
            .await
            .unwrap();

        assert_eq!(after.donation.id, done.donation.id);
        assert_eq!(after.donation.status, DonationStatus::Completed);
        assert_eq!(after.donation.failure_reason, None);
        let streamer = stores.users.find_user(streamer.id).await.unwrap().unwrap();
        assert_eq!(streamer.balance_cents, 847);
    }

    #[tokio::test]
    async fn test_invalid_donations_are_rejected() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;

        assert!(matches!(
            processor
                .process_confirmed(confirmed(donor.id, streamer.id, 99, "pi_small"))
                .await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            processor
                .process_confirmed(confirmed(donor.id, streamer.id, 100_000_000, "pi_huge"))
                .await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            processor
                .process_confirmed(confirmed(donor.id, donor.id, 500, "pi_self"))
                .await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            processor
                .process_confirmed(confirmed(donor.id, 4_242, 500, "pi_ghost"))
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(
            stores
                .donations
                .find_by_payment_ref("pi_small")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            stores
                .donations
                .find_by_payment_ref("pi_huge")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_donations_never_oversell() {
        let stores = Stores::in_memory();
        let processor = processor_for(&stores);
        let streamer = add_user(&stores, "streamer").await;
        let gem = stores
            .inventory
            .insert_emote(NewEmote {
                name: "gem".into(),
                rarity: Rarity::Epic,
                artist_id: None,
                max_instances: 7,
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let donor = add_user(&stores, &format!("donor{i}")).await;
            let processor = processor.clone();
            let recipient = streamer.id;
            handles.push(tokio::spawn(async move {
                processor
                    .process_confirmed(confirmed(donor.id, recipient, 300, &format!("pi_{i}")))
                    .await
                    .unwrap()
            }));
        }

        let mut awarded = 0;
        for h in handles {
            awarded += h.await.unwrap().awarded.len();
        }
        assert_eq!(awarded, 7);
        assert_eq!(stores.holdings.total_held(gem.id).await.unwrap(), 7);
        let gem = stores.inventory.find_emote(gem.id).await.unwrap().unwrap();
        assert_eq!(gem.remaining_instances, 0);
    }

    fn db_down() -> AppError {
        AppError::DatabaseError(sea_orm::DbErr::Custom("connection reset".into()))
    }

    /// Memory inventory whose `decrement_instance` fails on the calls picked by `fail_on`
    struct FlakyInventory {
        inner: Arc<MemoryStore>,
        calls: AtomicU32,
        fail_on: fn(u32) -> Option<AppError>,
    }

    #[async_trait]
    impl InventoryStore for FlakyInventory {
        async fn list_emotes(&self) -> AppResult<Vec<emotes::Model>> {
            self.inner.list_emotes().await
        }

        async fn find_emote(&self, emote_id: i64) -> AppResult<Option<emotes::Model>> {
            self.inner.find_emote(emote_id).await
        }

        async fn insert_emote(&self, new: NewEmote) -> AppResult<emotes::Model> {
            self.inner.insert_emote(new).await
        }

        async fn decrement_instance(&self, emote_id: i64) -> AppResult<bool> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(e) = (self.fail_on)(call) {
                return Err(e);
            }
            self.inner.decrement_instance(emote_id).await
        }
    }

    /// Memory holdings whose `increment_holding` fails on the calls picked by `fail_on`
    struct FlakyHoldings {
        inner: Arc<MemoryStore>,
        calls: AtomicU32,
        fail_on: fn(u32) -> Option<AppError>,
    }

    #[async_trait]
    impl HoldingStore for FlakyHoldings {
        async fn holding_count(&self, user_id: i64, emote_id: i64) -> AppResult<i64> {
            self.inner.holding_count(user_id, emote_id).await
        }

        async fn increment_holding(&self, user_id: i64, emote_id: i64, by: i64) -> AppResult<i64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(e) = (self.fail_on)(call) {
                return Err(e);
            }
            self.inner.increment_holding(user_id, emote_id, by).await
        }

        async fn insert_holding_if_absent(&self, user_id: i64, emote_id: i64) -> AppResult<bool> {
            self.inner.insert_holding_if_absent(user_id, emote_id).await
        }

        async fn set_holding(&self, user_id: i64, emote_id: i64, count: i64) -> AppResult<()> {
            self.inner.set_holding(user_id, emote_id, count).await
        }

        async fn holdings_for_user(&self, user_id: i64) -> AppResult<Vec<holdings::Model>> {
            self.inner.holdings_for_user(user_id).await
        }

        async fn total_held(&self, emote_id: i64) -> AppResult<i64> {
            self.inner.total_held(emote_id).await
        }
    }

    fn with_flaky_inventory(fail_on: fn(u32) -> Option<AppError>) -> Stores {
        let memory = Arc::new(MemoryStore::new());
        Stores {
            inventory: Arc::new(FlakyInventory {
                inner: memory.clone(),
                calls: AtomicU32::new(0),
                fail_on,
            }),
            ..Stores::from_backend(memory)
        }
    }

    fn with_flaky_holdings(fail_on: fn(u32) -> Option<AppError>) -> Stores {
        let memory = Arc::new(MemoryStore::new());
        Stores {
            holdings: Arc::new(FlakyHoldings {
                inner: memory.clone(),
                calls: AtomicU32::new(0),
                fail_on,
            }),
            ..Stores::from_backend(memory)
        }
    }

    #[tokio::test]
    async fn test_storage_error_skips_one_unit_and_keeps_rolling() {
        let stores = with_flaky_inventory(|call| (call == 2).then(db_down));
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        let wave = common_emote(&stores, "wave", 100).await;

        let outcome = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 300, "pi_blip"))
            .await
            .unwrap();

        assert_eq!(outcome.donation.status, DonationStatus::Completed);
        assert_eq!(outcome.awarded.len(), 2);
        let wave = stores.inventory.find_emote(wave.id).await.unwrap().unwrap();
        assert_eq!(wave.remaining_instances, 98);
        assert_eq!(stores.holdings.total_held(wave.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_repeated_storage_errors_fail_the_donation_without_credits() {
        let stores = with_flaky_inventory(|_| Some(db_down()));
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        common_emote(&stores, "wave", 100).await;

        let result = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 500, "pi_down"))
            .await;
        assert!(matches!(result, Err(AppError::DatabaseError(_))));

        let record = stores
            .donations
            .find_by_payment_ref("pi_down")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, DonationStatus::Failed);
        assert!(record.failure_reason.is_some());
        let streamer = stores.users.find_user(streamer.id).await.unwrap().unwrap();
        assert_eq!(streamer.balance_cents, 0);
        assert!(
            stores
                .donations
                .balance_transactions(streamer.id)
                .await
                .unwrap()
                .is_empty()
        );

        // rolls were attempted, so a redelivery must not start over
        assert!(matches!(
            processor
                .process_confirmed(confirmed(donor.id, streamer.id, 500, "pi_down"))
                .await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_credit_failure_loses_the_unit_instead_of_overselling() {
        let stores = with_flaky_holdings(|call| (call == 1).then(db_down));
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        let wave = common_emote(&stores, "wave", 100).await;

        let outcome = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 200, "pi_lost"))
            .await
            .unwrap();

        assert_eq!(outcome.awarded.len(), 1);
        let wave = stores.inventory.find_emote(wave.id).await.unwrap().unwrap();
        // both units left the pool, only one reached a user
        assert_eq!(wave.remaining_instances, 98);
        assert_eq!(stores.holdings.total_held(wave.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_storage_errors_do_not_abort_the_donation() {
        let stores = with_flaky_inventory(|_| Some(AppError::NotFound("emote".into())));
        let processor = processor_for(&stores);
        let donor = add_user(&stores, "donor").await;
        let streamer = add_user(&stores, "streamer").await;
        common_emote(&stores, "wave", 100).await;

        let outcome = processor
            .process_confirmed(confirmed(donor.id, streamer.id, 500, "pi_odd"))
            .await
            .unwrap();
        assert_eq!(outcome.donation.status, DonationStatus::Completed);
        assert!(outcome.awarded.is_empty());
        let streamer = stores.users.find_user(streamer.id).await.unwrap().unwrap();
        assert_eq!(streamer.balance_cents, outcome.donation.recipient_share_cents);
    }
}
