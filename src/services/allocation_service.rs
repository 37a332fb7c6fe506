use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sea_orm::Iterable;

use super::{RewardCatalog, UserLedger};
use crate::database::{InventoryStore, UserStore};
use crate::entities::{Rarity, emote_entity as emotes, user_entity as users};
use crate::error::{AppError, AppResult};

/// Weighted roll engine and special-tier grants.
///
/// Invariant: a unit is credited only after its decrement succeeded. A crash or
/// persistence error between the two loses the unit rather than overselling it.
#[derive(Clone)]
pub struct AllocationEngine {
    catalog: RewardCatalog,
    inventory: Arc<dyn InventoryStore>,
    users: Arc<dyn UserStore>,
    ledger: UserLedger,
    max_roll_attempts: u32,
    early_adopter_cohort: u64,
}

impl AllocationEngine {
    pub fn new(
        catalog: RewardCatalog,
        inventory: Arc<dyn InventoryStore>,
        users: Arc<dyn UserStore>,
        ledger: UserLedger,
        max_roll_attempts: u32,
        early_adopter_cohort: u64,
    ) -> Self {
        Self {
            catalog,
            inventory,
            users,
            ledger,
            max_roll_attempts: max_roll_attempts.max(1),
            early_adopter_cohort,
        }
    }

    pub fn catalog(&self) -> &RewardCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &UserLedger {
        &self.ledger
    }

    async fn require_user(&self, user_id: i64) -> AppResult<users::Model> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
    }

    /// One weighted roll. `Ok(None)` means nothing was left to win.
    pub async fn roll_reward(&self, user_id: i64) -> AppResult<Option<emotes::Model>> {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        self.require_user(user_id).await?;
        self.roll_with(user_id, &mut rng).await
    }

    /// Same as `roll_reward` without the user lookup; the caller has validated the user.
    pub async fn roll_with<R: Rng + Send>(
        &self,
        user_id: i64,
        rng: &mut R,
    ) -> AppResult<Option<emotes::Model>> {
        let mut snapshot = self.catalog.snapshot().await?;

        for attempt in 1..=self.max_roll_attempts {
            let Some(candidate) = snapshot.draw(rng) else {
                return Ok(None);
            };

            if !candidate.is_unlimited() && !self.inventory.decrement_instance(candidate.id).await?
            {
                debug!(
                    "Lost decrement race for emote {} (attempt {attempt}), redrawing",
                    candidate.id
                );
                snapshot.mark_exhausted(candidate.id);
                continue;
            }

            if let Err(e) = self.ledger.credit(user_id, &candidate).await {
                error!(
                    "Emote {} taken from inventory but not credited to user {user_id}: {e}",
                    candidate.id
                );
                return Err(e);
            }
            return Ok(Some(candidate));
        }

        debug!(
            "No emote secured for user {user_id} after {} attempts",
            self.max_roll_attempts
        );
        Ok(None)
    }

    /// Grants one unit of every emote in a special tier the user does not hold yet.
    /// Idempotent. Returns the emotes granted by this call.
    pub async fn allocate_special(
        &self,
        user_id: i64,
        tier: Rarity,
    ) -> AppResult<Vec<emotes::Model>> {
        if !tier.is_special() {
            return Err(AppError::ValidationError(format!(
                "{tier} is not a special tier"
            )));
        }
        self.require_user(user_id).await?;

        let mut granted = Vec::new();
        for emote in self.catalog.definitions_in(tier).await? {
            if self.grant_special(user_id, &emote).await? {
                granted.push(emote);
            }
        }
        if !granted.is_empty() {
            info!(
                "Granted {} {tier} emote(s) to user {user_id}",
                granted.len()
            );
        }
        Ok(granted)
    }

    async fn grant_special(&self, user_id: i64, emote: &emotes::Model) -> AppResult<bool> {
        if self.ledger.holds(user_id, emote.id).await? {
            return Ok(false);
        }
        if !emote.is_unlimited() && !self.inventory.decrement_instance(emote.id).await? {
            debug!("Special emote {} is sold out", emote.id);
            return Ok(false);
        }
        let created = self.ledger.grant_special_once(user_id, emote.id).await?;
        if !created {
            warn!(
                "Concurrent grant of emote {} to user {user_id}, unit not credited twice",
                emote.id
            );
        }
        Ok(created)
    }

    /// Users currently eligible for a special tier
    pub async fn eligible_user_ids(&self, tier: Rarity) -> AppResult<Vec<i64>> {
        match tier {
            Rarity::Pity => self.users.all_user_ids().await,
            Rarity::EarlyDays => {
                self.users
                    .earliest_user_ids(self.early_adopter_cohort)
                    .await
            }
            other => match other.staff_role() {
                Some(role) => self.users.user_ids_with_role(role).await,
                None => Ok(Vec::new()),
            },
        }
    }

    pub async fn is_eligible(&self, user: &users::Model, tier: Rarity) -> AppResult<bool> {
        Ok(match tier {
            Rarity::Pity => true,
            Rarity::EarlyDays => self
                .users
                .earliest_user_ids(self.early_adopter_cohort)
                .await?
                .contains(&user.id),
            other => other.staff_role().is_some_and(|role| user.has_role(role)),
        })
    }

    /// Hands a newly created special emote to everyone eligible. Returns the number of grants.
    pub async fn distribute_special(&self, emote: &emotes::Model) -> AppResult<usize> {
        if !emote.is_special() {
            return Ok(0);
        }
        let mut granted = 0;
        for user_id in self.eligible_user_ids(emote.rarity).await? {
            if self.grant_special(user_id, emote).await? {
                granted += 1;
            }
        }
        info!(
            "Distributed {} emote {} to {granted} user(s)",
            emote.rarity, emote.id
        );
        Ok(granted)
    }

    /// Grants every special tier a new user qualifies for
    pub async fn onboard(&self, user: &users::Model) -> AppResult<Vec<emotes::Model>> {
        let mut granted = Vec::new();
        for tier in Rarity::iter().filter(|r| r.is_special()) {
            if self.is_eligible(user, tier).await? {
                granted.extend(self.allocate_special(user.id, tier).await?);
            }
        }
        Ok(granted)
    }
}
