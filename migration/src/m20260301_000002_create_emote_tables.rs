use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    ExternalId,
    Username,
    DisplayName,
    IsArtist,
    IsDeveloper,
    IsFounder,
    IsAdmin,
    BalanceCents,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Emotes {
    Table,
    Id,
    Name,
    Rarity,
    ArtistId,
    MaxInstances,
    RemainingInstances,
    CreatedAt,
    UpdatedAt,
}

/// (user, emote) holdings
#[derive(DeriveIden)]
enum UserEmotes {
    Table,
    Id,
    UserId,
    EmoteId,
    Count,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Donations {
    Table,
    Id,
    PaymentRef,
    DonorId,
    RecipientId,
    AmountCents,
    FeeCents,
    NetCents,
    RecipientShareCents,
    PlatformShareCents,
    ArtistShareCents,
    ArtistId,
    RollCount,
    Status,
    FailureReason,
    CreatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum DonationRewards {
    Table,
    Id,
    DonationId,
    EmoteId,
    Position,
}

#[derive(DeriveIden)]
enum BalanceTransactions {
    Table,
    Id,
    UserId,
    Kind,
    AmountCents,
    BalanceAfter,
    DonationId,
    PayoutId,
    Description,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Payouts {
    Table,
    Id,
    UserId,
    AmountCents,
    Method,
    Status,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

fn id_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn now_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .default(Expr::cust("NOW()"))
        .to_owned()
}

fn cents_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

/// Instance counter; 0 on `max_instances` marks an unlimited emote
fn count_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(&mut id_col(Users::Id))
                    .col(
                        ColumnDef::new(Users::ExternalId)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Users::Username)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Users::DisplayName).string_len(255).null())
                    .col(ColumnDef::new(Users::IsArtist).boolean().not_null().default(false))
                    .col(ColumnDef::new(Users::IsDeveloper).boolean().not_null().default(false))
                    .col(ColumnDef::new(Users::IsFounder).boolean().not_null().default(false))
                    .col(ColumnDef::new(Users::IsAdmin).boolean().not_null().default(false))
                    .col(&mut cents_col(Users::BalanceCents))
                    .col(&mut now_col(Users::CreatedAt))
                    .col(ColumnDef::new(Users::UpdatedAt).timestamp_with_time_zone().null())
                    .check(Expr::col(Users::BalanceCents).gte(0))
                    .to_owned(),
            )
            .await?;

        // earlydays cohort lookup
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_users_created_at")
                    .table(Users::Table)
                    .col(Users::CreatedAt)
                    .col(Users::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Emotes::Table)
                    .if_not_exists()
                    .col(&mut id_col(Emotes::Id))
                    .col(
                        ColumnDef::new(Emotes::Name)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Emotes::Rarity)
                            .custom(Alias::new("emote_rarity"))
                            .not_null(),
                    )
                    .col(ColumnDef::new(Emotes::ArtistId).big_integer().null())
                    .col(&mut count_col(Emotes::MaxInstances))
                    .col(&mut count_col(Emotes::RemainingInstances))
                    .col(&mut now_col(Emotes::CreatedAt))
                    .col(&mut now_col(Emotes::UpdatedAt))
                    .check(Expr::col(Emotes::RemainingInstances).gte(0))
                    .check(Expr::col(Emotes::MaxInstances).gte(0))
                    .check(
                        Expr::col(Emotes::MaxInstances).eq(0).or(Expr::col(
                            Emotes::RemainingInstances,
                        )
                        .lte(Expr::col(Emotes::MaxInstances))),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_emotes_artist")
                            .from(Emotes::Table, Emotes::ArtistId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserEmotes::Table)
                    .if_not_exists()
                    .col(&mut id_col(UserEmotes::Id))
                    .col(ColumnDef::new(UserEmotes::UserId).big_integer().not_null())
                    .col(ColumnDef::new(UserEmotes::EmoteId).big_integer().not_null())
                    .col(ColumnDef::new(UserEmotes::Count).big_integer().not_null().default(1))
                    .col(&mut now_col(UserEmotes::CreatedAt))
                    .col(&mut now_col(UserEmotes::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_emotes_user")
                            .from(UserEmotes::Table, UserEmotes::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_emotes_emote")
                            .from(UserEmotes::Table, UserEmotes::EmoteId)
                            .to(Emotes::Table, Emotes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Upserts in the holdings store conflict on this pair
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_user_emotes_user_emote_unique")
                    .table(UserEmotes::Table)
                    .col(UserEmotes::UserId)
                    .col(UserEmotes::EmoteId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Donations::Table)
                    .if_not_exists()
                    .col(&mut id_col(Donations::Id))
                    .col(
                        ColumnDef::new(Donations::PaymentRef)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Donations::DonorId).big_integer().null())
                    .col(ColumnDef::new(Donations::RecipientId).big_integer().null())
                    .col(&mut cents_col(Donations::AmountCents))
                    .col(&mut cents_col(Donations::FeeCents))
                    .col(&mut cents_col(Donations::NetCents))
                    .col(&mut cents_col(Donations::RecipientShareCents))
                    .col(&mut cents_col(Donations::PlatformShareCents))
                    .col(&mut cents_col(Donations::ArtistShareCents))
                    .col(ColumnDef::new(Donations::ArtistId).big_integer().null())
                    .col(&mut cents_col(Donations::RollCount))
                    .col(
                        ColumnDef::new(Donations::Status)
                            .custom(Alias::new("donation_status"))
                            .not_null(),
                    )
                    .col(ColumnDef::new(Donations::FailureReason).text().null())
                    .col(&mut now_col(Donations::CreatedAt))
                    .col(
                        ColumnDef::new(Donations::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_donations_donor")
                            .from(Donations::Table, Donations::DonorId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_donations_recipient")
                            .from(Donations::Table, Donations::RecipientId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_donations_donor")
                    .table(Donations::Table)
                    .col(Donations::DonorId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DonationRewards::Table)
                    .if_not_exists()
                    .col(&mut id_col(DonationRewards::Id))
                    .col(
                        ColumnDef::new(DonationRewards::DonationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DonationRewards::EmoteId).big_integer().not_null())
                    .col(ColumnDef::new(DonationRewards::Position).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_donation_rewards_donation")
                            .from(DonationRewards::Table, DonationRewards::DonationId)
                            .to(Donations::Table, Donations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_donation_rewards_emote")
                            .from(DonationRewards::Table, DonationRewards::EmoteId)
                            .to(Emotes::Table, Emotes::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_donation_rewards_donation_position")
                    .table(DonationRewards::Table)
                    .col(DonationRewards::DonationId)
                    .col(DonationRewards::Position)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Payouts::Table)
                    .if_not_exists()
                    .col(&mut id_col(Payouts::Id))
                    .col(ColumnDef::new(Payouts::UserId).big_integer().not_null())
                    .col(&mut cents_col(Payouts::AmountCents))
                    .col(
                        ColumnDef::new(Payouts::Method)
                            .custom(Alias::new("payout_method"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payouts::Status)
                            .custom(Alias::new("payout_status"))
                            .not_null(),
                    )
                    .col(&mut now_col(Payouts::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payouts_user")
                            .from(Payouts::Table, Payouts::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BalanceTransactions::Table)
                    .if_not_exists()
                    .col(&mut id_col(BalanceTransactions::Id))
                    .col(
                        ColumnDef::new(BalanceTransactions::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalanceTransactions::Kind)
                            .custom(Alias::new("balance_transaction_kind"))
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalanceTransactions::AmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalanceTransactions::BalanceAfter)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalanceTransactions::DonationId)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(BalanceTransactions::PayoutId).big_integer().null())
                    .col(ColumnDef::new(BalanceTransactions::Description).text().null())
                    .col(&mut now_col(BalanceTransactions::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_balance_transactions_user")
                            .from(BalanceTransactions::Table, BalanceTransactions::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_balance_transactions_donation")
                            .from(BalanceTransactions::Table, BalanceTransactions::DonationId)
                            .to(Donations::Table, Donations::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_balance_transactions_payout")
                            .from(BalanceTransactions::Table, BalanceTransactions::PayoutId)
                            .to(Payouts::Table, Payouts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_balance_transactions_user")
                    .table(BalanceTransactions::Table)
                    .col(BalanceTransactions::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Children first
        manager
            .drop_table(Table::drop().if_exists().table(BalanceTransactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Payouts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(DonationRewards::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Donations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(UserEmotes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Emotes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}
