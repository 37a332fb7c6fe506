use std::sync::Arc;

use log::info;

use super::AllocationEngine;
use crate::database::{DonationStore, InventoryStore, NewUser, UserStore};
use crate::entities::{Rarity, StaffRole, emote_entity as emotes, user_entity as users};
use crate::error::{AppError, AppResult};
use crate::models::{
    BalanceTransactionResponse, CreateUserRequest, DonationResponse, HoldingResponse,
    UserResponse,
};

#[derive(Clone)]
pub struct UserService {
    engine: AllocationEngine,
    users: Arc<dyn UserStore>,
    inventory: Arc<dyn InventoryStore>,
    donations: Arc<dyn DonationStore>,
}

impl UserService {
    pub fn new(
        engine: AllocationEngine,
        users: Arc<dyn UserStore>,
        inventory: Arc<dyn InventoryStore>,
        donations: Arc<dyn DonationStore>,
    ) -> Self {
        Self {
            engine,
            users,
            inventory,
            donations,
        }
    }

    async fn require_user(&self, user_id: i64) -> AppResult<users::Model> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn require_emote(&self, emote_id: i64) -> AppResult<emotes::Model> {
        self.inventory
            .find_emote(emote_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Emote {emote_id} not found")))
    }

    /// Registers a user behind an external login id and grants every special tier they qualify for.
    /// A known external id refreshes the profile and grants nothing; roles are left to `set_role`.
    pub async fn onboard_user(
        &self,
        request: CreateUserRequest,
    ) -> AppResult<(users::Model, Vec<emotes::Model>)> {
        let username = request.username.trim().to_string();
        if username.len() < 2 || username.len() > 32 {
            return Err(AppError::ValidationError(
                "Username length must be between 2 and 32 characters".to_string(),
            ));
        }
        if request.external_id.trim().is_empty() {
            return Err(AppError::ValidationError(
                "External id is required".to_string(),
            ));
        }

        let external_id = request.external_id.trim().to_string();
        if let Some(existing) = self.users.find_user_by_external_id(&external_id).await? {
            let user = self
                .users
                .update_profile(existing.id, username, request.display_name)
                .await?;
            info!("User {} ({}) signed in again", user.id, user.username);
            return Ok((user, Vec::new()));
        }

        let user = self
            .users
            .insert_user(NewUser {
                external_id,
                username,
                display_name: request.display_name,
                is_artist: request.roles.contains(&StaffRole::Artist),
                is_developer: request.roles.contains(&StaffRole::Developer),
                is_founder: request.roles.contains(&StaffRole::Founder),
                is_admin: request.is_admin,
            })
            .await?;

        let granted = self.engine.onboard(&user).await?;
        info!(
            "Onboarded user {} ({}) with {} special emote(s)",
            user.id,
            user.username,
            granted.len()
        );
        Ok((user, granted))
    }

    /// Flips a staff role; turning it on grants that role's tier
    pub async fn set_role(
        &self,
        user_id: i64,
        role: StaffRole,
        enabled: bool,
    ) -> AppResult<(users::Model, Vec<emotes::Model>)> {
        let user = self.users.set_role(user_id, role, enabled).await?;
        let granted = if enabled {
            self.engine
                .allocate_special(user_id, Rarity::for_staff_role(role))
                .await?
        } else {
            Vec::new()
        };
        Ok((user, granted))
    }

    pub async fn get_profile(&self, user_id: i64) -> AppResult<UserResponse> {
        Ok(self.require_user(user_id).await?.into())
    }

    pub async fn get_holdings(&self, user_id: i64) -> AppResult<Vec<HoldingResponse>> {
        self.require_user(user_id).await?;
        let mut list = Vec::new();
        for h in self.engine.ledger().holdings(user_id).await? {
            if let Some(emote) = self.inventory.find_emote(h.emote_id).await? {
                list.push(HoldingResponse {
                    emote: emote.into(),
                    count: h.count,
                });
            }
        }
        Ok(list)
    }

    pub async fn get_donations(&self, user_id: i64) -> AppResult<Vec<DonationResponse>> {
        Ok(self
            .donations
            .donations_by_donor(user_id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    pub async fn get_transactions(
        &self,
        user_id: i64,
    ) -> AppResult<Vec<BalanceTransactionResponse>> {
        Ok(self
            .donations
            .balance_transactions(user_id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// Admin override of a special emote count
    pub async fn override_special_count(
        &self,
        user_id: i64,
        emote_id: i64,
        count: i64,
    ) -> AppResult<HoldingResponse> {
        self.require_user(user_id).await?;
        let emote = self.require_emote(emote_id).await?;
        self.engine
            .ledger()
            .override_special_count(user_id, &emote, count)
            .await?;
        info!("Set user {user_id} count of emote {emote_id} to {count}");
        Ok(HoldingResponse {
            emote: emote.into(),
            count,
        })
    }
}
