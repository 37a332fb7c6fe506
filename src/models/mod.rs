pub mod common;
pub mod donation;
pub mod emote;
pub mod user;

pub use common::*;
pub use donation::*;
pub use emote::*;
pub use user::*;
