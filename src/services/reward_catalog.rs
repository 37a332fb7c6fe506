use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use sea_orm::Iterable;

use crate::config::AllocationConfig;
use crate::database::InventoryStore;
use crate::entities::{Rarity, emote_entity as emotes};
use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSpec {
    /// Percent, used as a relative weight
    pub roll_chance: f64,
    /// Default supply for new emotes of the tier, 0 = unlimited
    pub max_instances: i64,
}

/// Per-tier roll chance and supply ceiling
#[derive(Debug, Clone)]
pub struct RarityTable {
    tiers: BTreeMap<Rarity, TierSpec>,
}

impl RarityTable {
    pub fn from_config(config: &AllocationConfig) -> Self {
        let mut tiers: BTreeMap<Rarity, TierSpec> = Rarity::iter()
            .map(|r| {
                (
                    r,
                    TierSpec {
                        roll_chance: r.default_roll_chance(),
                        max_instances: r.default_max_instances(),
                    },
                )
            })
            .collect();

        for rule in &config.tiers {
            if let Some(spec) = tiers.get_mut(&rule.rarity) {
                if let Some(chance) = rule.roll_chance
                    && !rule.rarity.is_special()
                {
                    spec.roll_chance = chance.max(0.0);
                }
                if let Some(max) = rule.max_instances {
                    spec.max_instances = max.max(0);
                }
            }
        }

        Self { tiers }
    }

    pub fn spec(&self, rarity: Rarity) -> TierSpec {
        self.tiers.get(&rarity).copied().unwrap_or(TierSpec {
            roll_chance: 0.0,
            max_instances: 0,
        })
    }

    pub fn roll_chance(&self, rarity: Rarity) -> f64 {
        self.spec(rarity).roll_chance
    }

    pub fn max_instances(&self, rarity: Rarity) -> i64 {
        self.spec(rarity).max_instances
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rarity, TierSpec)> + '_ {
        self.tiers.iter().map(|(r, s)| (*r, *s))
    }
}

impl Default for RarityTable {
    fn default() -> Self {
        Self::from_config(&AllocationConfig::default())
    }
}

/// Point-in-time view of the catalog used for one roll
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    emotes: Vec<emotes::Model>,
    table: Arc<RarityTable>,
}

impl CatalogSnapshot {
    pub fn new(emotes: Vec<emotes::Model>, table: Arc<RarityTable>) -> Self {
        Self { emotes, table }
    }

    /// Rollable tiers with at least one available emote, with their weights
    pub fn eligible_tiers(&self) -> Vec<(Rarity, f64)> {
        self.table
            .iter()
            .filter(|(rarity, spec)| {
                !rarity.is_special()
                    && spec.roll_chance > 0.0
                    && self
                        .emotes
                        .iter()
                        .any(|e| e.rarity == *rarity && e.is_available())
            })
            .map(|(rarity, spec)| (rarity, spec.roll_chance))
            .collect()
    }

    pub fn available_in(&self, tier: Rarity) -> Vec<&emotes::Model> {
        self.emotes
            .iter()
            .filter(|e| e.rarity == tier && e.is_available())
            .collect()
    }

    /// Drops a limited emote from further draws after a lost decrement
    pub fn mark_exhausted(&mut self, emote_id: i64) {
        if let Some(e) = self
            .emotes
            .iter_mut()
            .find(|e| e.id == emote_id && !e.is_unlimited())
        {
            e.remaining_instances = 0;
        }
    }

    /// Item weight: remaining stock, or the tier ceiling for unlimited emotes
    fn item_weight(&self, emote: &emotes::Model) -> u64 {
        if emote.is_unlimited() {
            self.table.max_instances(emote.rarity).max(1) as u64
        } else {
            emote.remaining_instances.max(0) as u64
        }
    }

    /// Tier by raw roll chance, then emote by stock
    pub fn draw<R: Rng>(&self, rng: &mut R) -> Option<emotes::Model> {
        let tiers = self.eligible_tiers();
        let total: f64 = tiers.iter().map(|(_, w)| *w).sum();
        if tiers.is_empty() || total <= 0.0 {
            return None;
        }

        let pick = rng.random_range(0.0..total);
        let mut acc = 0.0;
        let mut tier = tiers[tiers.len() - 1].0;
        for (rarity, weight) in &tiers {
            acc += *weight;
            if pick < acc {
                tier = *rarity;
                break;
            }
        }

        let items = self.available_in(tier);
        let total_stock: u64 = items.iter().map(|e| self.item_weight(e)).sum();
        if total_stock == 0 {
            return None;
        }

        let pick = rng.random_range(0..total_stock);
        let mut acc = 0u64;
        for item in &items {
            acc += self.item_weight(item);
            if pick < acc {
                return Some((*item).clone());
            }
        }
        items.last().map(|e| (*e).clone())
    }
}

/// Read side of the emote catalog
#[derive(Clone)]
pub struct RewardCatalog {
    inventory: Arc<dyn InventoryStore>,
    table: Arc<RarityTable>,
}

impl RewardCatalog {
    pub fn new(inventory: Arc<dyn InventoryStore>, table: RarityTable) -> Self {
        Self {
            inventory,
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &RarityTable {
        &self.table
    }

    pub async fn snapshot(&self) -> AppResult<CatalogSnapshot> {
        let emotes = self.inventory.list_emotes().await?;
        Ok(CatalogSnapshot::new(emotes, self.table.clone()))
    }

    pub async fn eligible_tiers(&self) -> AppResult<Vec<(Rarity, f64)>> {
        Ok(self.snapshot().await?.eligible_tiers())
    }

    pub async fn definitions_in(&self, tier: Rarity) -> AppResult<Vec<emotes::Model>> {
        Ok(self
            .inventory
            .list_emotes()
            .await?
            .into_iter()
            .filter(|e| e.rarity == tier)
            .collect())
    }

    pub async fn list(&self) -> AppResult<Vec<emotes::Model>> {
        self.inventory.list_emotes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierRule;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn emote(id: i64, rarity: Rarity, max: i64, remaining: i64) -> emotes::Model {
        emotes::Model {
            id,
            name: format!("emote{id}"),
            rarity,
            artist_id: None,
            max_instances: max,
            remaining_instances: remaining,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_config_overrides_only_named_tiers() {
        let config = AllocationConfig {
            tiers: vec![
                TierRule {
                    rarity: Rarity::Legendary,
                    roll_chance: Some(2.0),
                    max_instances: None,
                },
                TierRule {
                    rarity: Rarity::Pity,
                    roll_chance: Some(50.0),
                    max_instances: Some(10),
                },
            ],
            ..AllocationConfig::default()
        };
        let table = RarityTable::from_config(&config);
        assert_eq!(table.roll_chance(Rarity::Legendary), 2.0);
        assert_eq!(table.max_instances(Rarity::Legendary), 1_000_000);
        assert_eq!(table.roll_chance(Rarity::Common), 70.0);
        // special tiers never become rollable
        assert_eq!(table.roll_chance(Rarity::Pity), 0.0);
        assert_eq!(table.max_instances(Rarity::Pity), 10);
    }

    #[test]
    fn test_eligible_tiers_skip_special_and_empty() {
        let snapshot = CatalogSnapshot::new(
            vec![
                emote(1, Rarity::Common, 10, 10),
                emote(2, Rarity::Legendary, 1, 0),
                emote(3, Rarity::Pity, 0, 0),
                emote(4, Rarity::Rare, 0, 0),
            ],
            Arc::new(RarityTable::default()),
        );
        let tiers: Vec<Rarity> = snapshot.eligible_tiers().into_iter().map(|(r, _)| r).collect();
        // rare is unlimited, legendary is sold out, pity is special
        assert_eq!(tiers, vec![Rarity::Common, Rarity::Rare]);
    }

    #[test]
    fn test_draw_never_returns_sold_out_emote() {
        let snapshot = CatalogSnapshot::new(
            vec![
                emote(1, Rarity::Common, 1_000_000_000, 1_000_000_000),
                emote(2, Rarity::Legendary, 1_000_000, 0),
            ],
            Arc::new(RarityTable::default()),
        );
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let drawn = snapshot.draw(&mut rng).unwrap();
            assert_eq!(drawn.id, 1);
        }
    }

    #[test]
    fn test_draw_weights_items_by_stock() {
        let snapshot = CatalogSnapshot::new(
            vec![
                emote(1, Rarity::Common, 100, 99),
                emote(2, Rarity::Common, 100, 1),
            ],
            Arc::new(RarityTable::default()),
        );
        let mut rng = StdRng::seed_from_u64(42);
        let heavy = (0..2_000)
            .filter(|_| snapshot.draw(&mut rng).map(|e| e.id) == Some(1))
            .count();
        assert!(heavy > 1_800, "heavy item drawn {heavy} times");
    }

    #[test]
    fn test_mark_exhausted_removes_tier_when_last_item_gone() {
        let mut snapshot = CatalogSnapshot::new(
            vec![emote(5, Rarity::Epic, 3, 2)],
            Arc::new(RarityTable::default()),
        );
        assert_eq!(snapshot.eligible_tiers().len(), 1);
        snapshot.mark_exhausted(5);
        assert!(snapshot.eligible_tiers().is_empty());
        assert!(snapshot.draw(&mut StdRng::seed_from_u64(1)).is_none());
    }
}
