pub mod balance_transactions;
pub mod donation_rewards;
pub mod donations;
pub mod emotes;
pub mod payouts;
pub mod user_emotes;
pub mod users;

pub use balance_transactions as balance_transaction_entity;
pub use donation_rewards as donation_reward_entity;
pub use donations as donation_entity;
pub use emotes as emote_entity;
pub use payouts as payout_entity;
pub use user_emotes as user_emote_entity;
pub use users as user_entity;

pub use balance_transactions::BalanceTransactionKind;
pub use donations::DonationStatus;
pub use emotes::Rarity;
pub use payouts::{PayoutMethod, PayoutStatus};
pub use users::StaffRole;
