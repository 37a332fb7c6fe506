use sea_orm_migration::prelude::extension::postgres::{Type, TypeCreateStatement};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

fn enum_type(name: &str, values: &[&str]) -> TypeCreateStatement {
    Type::create()
        .as_enum(Alias::new(name))
        .values(values.iter().map(|v| Alias::new(*v)).collect::<Vec<_>>())
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(enum_type(
                "emote_rarity",
                &[
                    "pity",
                    "earlydays",
                    "developer",
                    "artist",
                    "founder",
                    "common",
                    "uncommon",
                    "rare",
                    "epic",
                    "legendary",
                    "exotic",
                    "mythic",
                    "novelty",
                ],
            ))
            .await?;

        manager
            .create_type(enum_type(
                "donation_status",
                &["pending", "completed", "failed"],
            ))
            .await?;

        manager
            .create_type(enum_type(
                "balance_transaction_kind",
                &["donation_share", "artist_share", "payout"],
            ))
            .await?;

        manager
            .create_type(enum_type("payout_method", &["paypal", "stripe"]))
            .await?;

        manager
            .create_type(enum_type(
                "payout_status",
                &["pending", "completed", "failed"],
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "payout_status",
            "payout_method",
            "balance_transaction_kind",
            "donation_status",
            "emote_rarity",
        ] {
            manager
                .drop_type(Type::drop().if_exists().name(Alias::new(name)).to_owned())
                .await?;
        }
        Ok(())
    }
}
