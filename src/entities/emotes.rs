use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::users::StaffRole;

/// Rarity tiers. The first five are special: granted by eligibility, never rolled.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    ToSchema,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "emote_rarity")]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    #[sea_orm(string_value = "pity")]
    Pity,
    #[sea_orm(string_value = "earlydays")]
    #[serde(rename = "earlydays")]
    EarlyDays,
    #[sea_orm(string_value = "developer")]
    Developer,
    #[sea_orm(string_value = "artist")]
    Artist,
    #[sea_orm(string_value = "founder")]
    Founder,
    #[sea_orm(string_value = "common")]
    Common,
    #[sea_orm(string_value = "uncommon")]
    Uncommon,
    #[sea_orm(string_value = "rare")]
    Rare,
    #[sea_orm(string_value = "epic")]
    Epic,
    #[sea_orm(string_value = "legendary")]
    Legendary,
    #[sea_orm(string_value = "exotic")]
    Exotic,
    #[sea_orm(string_value = "mythic")]
    Mythic,
    #[sea_orm(string_value = "novelty")]
    Novelty,
}

impl Rarity {
    pub fn is_special(self) -> bool {
        matches!(
            self,
            Rarity::Pity | Rarity::EarlyDays | Rarity::Developer | Rarity::Artist | Rarity::Founder
        )
    }

    /// Staff role whose holders are eligible for this tier
    pub fn staff_role(self) -> Option<StaffRole> {
        match self {
            Rarity::Artist => Some(StaffRole::Artist),
            Rarity::Developer => Some(StaffRole::Developer),
            Rarity::Founder => Some(StaffRole::Founder),
            _ => None,
        }
    }

    /// Tier unlocked by a staff role
    pub fn for_staff_role(role: StaffRole) -> Rarity {
        match role {
            StaffRole::Artist => Rarity::Artist,
            StaffRole::Developer => Rarity::Developer,
            StaffRole::Founder => Rarity::Founder,
        }
    }

    /// Built-in roll chance in percent; 0 for special tiers
    pub fn default_roll_chance(self) -> f64 {
        match self {
            Rarity::Common => 70.0,
            Rarity::Uncommon => 25.0,
            Rarity::Rare => 5.0,
            Rarity::Epic => 1.0,
            Rarity::Legendary => 0.01,
            Rarity::Exotic => 0.001,
            Rarity::Mythic => 0.0001,
            Rarity::Novelty => 0.00001,
            _ => 0.0,
        }
    }

    /// Built-in per-emote instance ceiling; 0 (unlimited) for special tiers
    pub fn default_max_instances(self) -> i64 {
        match self {
            Rarity::Common => 1_000_000_000,
            Rarity::Uncommon => 500_000_000,
            Rarity::Rare => 100_000_000,
            Rarity::Epic => 10_000_000,
            Rarity::Legendary => 1_000_000,
            Rarity::Exotic => 100_000,
            Rarity::Mythic => 10_000,
            Rarity::Novelty => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rarity::Pity => "pity",
            Rarity::EarlyDays => "earlydays",
            Rarity::Developer => "developer",
            Rarity::Artist => "artist",
            Rarity::Founder => "founder",
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
            Rarity::Exotic => "exotic",
            Rarity::Mythic => "mythic",
            Rarity::Novelty => "novelty",
        };
        write!(f, "{s}")
    }
}

/// Reward definition.
/// - max_instances: total supply, 0 = unlimited
/// - remaining_instances: authoritative stock counter, only ever decremented
/// - artist_id: user credited with the artist share of donations that award this emote first
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "emotes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub rarity: Rarity,
    pub artist_id: Option<i64>,
    pub max_instances: i64,
    pub remaining_instances: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn is_unlimited(&self) -> bool {
        self.max_instances == 0
    }

    /// Unlimited or stock left
    pub fn is_available(&self) -> bool {
        self.is_unlimited() || self.remaining_instances > 0
    }

    pub fn is_special(&self) -> bool {
        self.rarity.is_special()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn test_special_tiers_have_no_roll_chance() {
        for rarity in Rarity::iter() {
            if rarity.is_special() {
                assert_eq!(rarity.default_roll_chance(), 0.0, "{rarity}");
                assert_eq!(rarity.default_max_instances(), 0, "{rarity}");
            } else {
                assert!(rarity.default_roll_chance() > 0.0, "{rarity}");
                assert!(rarity.default_max_instances() > 0, "{rarity}");
            }
        }
    }

    #[test]
    fn test_serde_names_match_db_values() {
        assert_eq!(serde_json::to_string(&Rarity::EarlyDays).unwrap(), "\"earlydays\"");
        assert_eq!(serde_json::to_string(&Rarity::Legendary).unwrap(), "\"legendary\"");
        assert_eq!(Rarity::EarlyDays.to_string(), "earlydays");
    }
}
