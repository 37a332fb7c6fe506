pub mod admin;
pub mod emote;
pub mod user;
pub mod webhook;

pub use admin::admin_config;
pub use emote::emote_config;
pub use user::user_config;
pub use webhook::webhook_config;
