use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Emotes awarded by a donation, `position` keeps roll order
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "donation_rewards")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub donation_id: i64,
    pub emote_id: i64,
    pub position: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
