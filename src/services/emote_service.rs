use std::sync::Arc;

use log::info;

use super::AllocationEngine;
use crate::database::{InventoryStore, NewEmote, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{CreateEmoteRequest, CreateEmoteResponse, EmoteResponse};

const MAX_NAME_LEN: usize = 64;

/// Catalog administration and the public catalog listing
#[derive(Clone)]
pub struct EmoteService {
    engine: AllocationEngine,
    inventory: Arc<dyn InventoryStore>,
    users: Arc<dyn UserStore>,
}

impl EmoteService {
    pub fn new(
        engine: AllocationEngine,
        inventory: Arc<dyn InventoryStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            engine,
            inventory,
            users,
        }
    }

    pub async fn list_catalog(&self) -> AppResult<Vec<EmoteResponse>> {
        let table = self.engine.catalog().table();
        Ok(self
            .engine
            .catalog()
            .list()
            .await?
            .into_iter()
            .map(|m| EmoteResponse::from_model(m, table))
            .collect())
    }

    /// Creates an emote and, for special tiers, grants it to every eligible user
    pub async fn create_emote(&self, request: CreateEmoteRequest) -> AppResult<CreateEmoteResponse> {
        let name = request.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::ValidationError(format!(
                "Emote name must be 1 to {MAX_NAME_LEN} characters"
            )));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AppError::ValidationError(
                "Emote name may only contain letters, digits and underscores".to_string(),
            ));
        }
        if let Some(artist_id) = request.artist_id
            && self.users.find_user(artist_id).await?.is_none()
        {
            return Err(AppError::NotFound(format!("Artist {artist_id} not found")));
        }

        let table = self.engine.catalog().table();
        let max_instances = request
            .max_instances
            .unwrap_or_else(|| table.max_instances(request.rarity));
        if max_instances < 0 {
            return Err(AppError::ValidationError(
                "max_instances must not be negative".to_string(),
            ));
        }

        let emote = self
            .inventory
            .insert_emote(NewEmote {
                name,
                rarity: request.rarity,
                artist_id: request.artist_id,
                max_instances,
            })
            .await?;
        info!(
            "Created {} emote {} ({}), max_instances={}",
            emote.rarity, emote.id, emote.name, emote.max_instances
        );

        let granted_to = self.engine.distribute_special(&emote).await?;
        Ok(CreateEmoteResponse {
            emote: EmoteResponse::from_model(emote, table),
            granted_to,
        })
    }
}
