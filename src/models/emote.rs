use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::{Rarity, emote_entity as emotes};
use crate::services::RarityTable;
use crate::utils::format_odds;

/// Catalog entry with live stock and odds
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmoteResponse {
    pub id: i64,
    pub name: String,
    pub rarity: Rarity,
    pub artist_id: Option<i64>,
    /// 0 = unlimited
    pub max_instances: i64,
    pub remaining_instances: i64,
    pub unlimited: bool,
    /// Tier roll chance in percent, 0 for special tiers
    pub roll_chance: f64,
    /// e.g. "0.01% (about 1 in 10,000)"
    pub odds: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl EmoteResponse {
    pub fn from_model(m: emotes::Model, table: &RarityTable) -> Self {
        let roll_chance = table.roll_chance(m.rarity);
        Self {
            unlimited: m.is_unlimited(),
            id: m.id,
            name: m.name,
            rarity: m.rarity,
            artist_id: m.artist_id,
            max_instances: m.max_instances,
            remaining_instances: m.remaining_instances,
            roll_chance,
            odds: format_odds(roll_chance),
            created_at: m.created_at,
        }
    }
}

/// Minimal emote info embedded in other responses
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmoteSummary {
    pub id: i64,
    pub name: String,
    pub rarity: Rarity,
}

impl From<emotes::Model> for EmoteSummary {
    fn from(m: emotes::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            rarity: m.rarity,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CreateEmoteRequest {
    #[schema(example = "PogWave")]
    pub name: String,
    pub rarity: Rarity,
    pub artist_id: Option<i64>,
    /// Defaults to the tier ceiling; 0 = unlimited
    pub max_instances: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateEmoteResponse {
    pub emote: EmoteResponse,
    /// Users who received the emote through special-tier eligibility
    pub granted_to: usize,
}
