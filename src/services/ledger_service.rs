use std::sync::Arc;

use crate::database::HoldingStore;
use crate::entities::{emote_entity as emotes, user_emote_entity as holdings};
use crate::error::{AppError, AppResult};

/// Per-user emote counts. Rolled emotes accumulate, special emotes are capped at one
/// unless an admin overrides the count.
#[derive(Clone)]
pub struct UserLedger {
    holdings: Arc<dyn HoldingStore>,
}

impl UserLedger {
    pub fn new(holdings: Arc<dyn HoldingStore>) -> Self {
        Self { holdings }
    }

    /// Credits one unit. Callers must have taken the unit from inventory first.
    pub async fn credit(&self, user_id: i64, emote: &emotes::Model) -> AppResult<i64> {
        if emote.is_special() {
            self.holdings
                .insert_holding_if_absent(user_id, emote.id)
                .await?;
            return self.holdings.holding_count(user_id, emote.id).await;
        }
        self.holdings.increment_holding(user_id, emote.id, 1).await
    }

    pub async fn holds(&self, user_id: i64, emote_id: i64) -> AppResult<bool> {
        Ok(self.holdings.holding_count(user_id, emote_id).await? > 0)
    }

    /// Returns false when the user already had the emote
    pub async fn grant_special_once(&self, user_id: i64, emote_id: i64) -> AppResult<bool> {
        self.holdings
            .insert_holding_if_absent(user_id, emote_id)
            .await
    }

    pub async fn override_special_count(
        &self,
        user_id: i64,
        emote: &emotes::Model,
        count: i64,
    ) -> AppResult<()> {
        if !emote.is_special() {
            return Err(AppError::ValidationError(format!(
                "Emote {} is {}, only special emotes can be overridden",
                emote.id, emote.rarity
            )));
        }
        if count < 1 {
            return Err(AppError::ValidationError(
                "Override count must be at least 1".to_string(),
            ));
        }
        self.holdings.set_holding(user_id, emote.id, count).await
    }

    pub async fn holdings(&self, user_id: i64) -> AppResult<Vec<holdings::Model>> {
        self.holdings.holdings_for_user(user_id).await
    }

    pub async fn total_held(&self, emote_id: i64) -> AppResult<i64> {
        self.holdings.total_held(emote_id).await
    }
}
