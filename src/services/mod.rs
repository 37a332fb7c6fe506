pub mod allocation_service;
pub mod donation_service;
pub mod emote_service;
pub mod ledger_service;
pub mod payout_service;
pub mod reward_catalog;
pub mod user_service;

pub use allocation_service::*;
pub use donation_service::*;
pub use emote_service::*;
pub use ledger_service::*;
pub use payout_service::*;
pub use reward_catalog::*;
pub use user_service::*;

use crate::config::Config;
use crate::database::Stores;

/// Every service wired over one set of stores
#[derive(Clone)]
pub struct AppServices {
    pub engine: AllocationEngine,
    pub donations: DonationProcessor,
    pub emotes: EmoteService,
    pub users: UserService,
    pub payouts: PayoutService,
}

impl AppServices {
    pub fn new(stores: &Stores, config: &Config) -> Self {
        let catalog = RewardCatalog::new(
            stores.inventory.clone(),
            RarityTable::from_config(&config.allocation),
        );
        let engine = AllocationEngine::new(
            catalog,
            stores.inventory.clone(),
            stores.users.clone(),
            UserLedger::new(stores.holdings.clone()),
            config.allocation.max_roll_attempts,
            config.allocation.early_adopter_cohort,
        );
        Self {
            donations: DonationProcessor::new(
                engine.clone(),
                stores.users.clone(),
                stores.donations.clone(),
                stores.inventory.clone(),
                config.fees.clone(),
                config.allocation.max_consecutive_failures,
            ),
            emotes: EmoteService::new(
                engine.clone(),
                stores.inventory.clone(),
                stores.users.clone(),
            ),
            users: UserService::new(
                engine.clone(),
                stores.users.clone(),
                stores.inventory.clone(),
                stores.donations.clone(),
            ),
            payouts: PayoutService::new(stores.donations.clone()),
            engine,
        }
    }
}
