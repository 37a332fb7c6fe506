use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set,
    SqlErr, Statement, TransactionTrait, UpdateResult,
};

use super::store::{
    BalanceCredit, DonationClaim, DonationSettlement, DonationStore, HoldingStore, InventoryStore,
    NewDonation, NewEmote, NewUser, UserStore,
};
use crate::entities::{
    BalanceTransactionKind, DonationStatus, PayoutMethod, PayoutStatus, StaffRole,
    balance_transaction_entity as btx, donation_entity as donations,
    donation_reward_entity as rewards, emote_entity as emotes, payout_entity as payouts,
    user_emote_entity as holdings, user_entity as users,
};
use crate::error::{AppError, AppResult};

/// sea-orm backed store (Postgres)
#[derive(Clone)]
pub struct PgStore {
    pool: DatabaseConnection,
}

impl PgStore {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }
}

/// Unique violations become `Conflict`, everything else stays a database error
fn conflict_on_duplicate(err: DbErr, what: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::Conflict(format!("{what} already exists"))
        }
        _ => AppError::DatabaseError(err),
    }
}

/// Applies a signed balance change and writes its ledger row inside `txn`
async fn apply_balance_change(
    txn: &DatabaseTransaction,
    user_id: i64,
    kind: BalanceTransactionKind,
    amount_cents: i64,
    donation_id: Option<i64>,
    payout_id: Option<i64>,
    description: Option<String>,
) -> AppResult<()> {
    let updated: UpdateResult = users::Entity::update_many()
        .col_expr(
            users::Column::BalanceCents,
            Expr::col(users::Column::BalanceCents).add(amount_cents),
        )
        .col_expr(users::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(users::Column::Id.eq(user_id))
        .exec(txn)
        .await?;
    if updated.rows_affected != 1 {
        return Err(AppError::NotFound(format!("User {user_id} not found")));
    }

    let balance_after = users::Entity::find_by_id(user_id)
        .one(txn)
        .await?
        .map(|u| u.balance_cents)
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

    btx::ActiveModel {
        user_id: Set(user_id),
        kind: Set(kind),
        amount_cents: Set(amount_cents),
        balance_after: Set(balance_after),
        donation_id: Set(donation_id),
        payout_id: Set(payout_id),
        description: Set(description),
        created_at: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(txn)
    .await?;
    Ok(())
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn list_emotes(&self) -> AppResult<Vec<emotes::Model>> {
        let list = emotes::Entity::find()
            .order_by_asc(emotes::Column::Id)
            .all(&self.pool)
            .await?;
        Ok(list)
    }

    async fn find_emote(&self, emote_id: i64) -> AppResult<Option<emotes::Model>> {
        Ok(emotes::Entity::find_by_id(emote_id).one(&self.pool).await?)
    }

    async fn insert_emote(&self, new: NewEmote) -> AppResult<emotes::Model> {
        let now = Utc::now();
        let name = new.name.clone();
        emotes::ActiveModel {
            name: Set(new.name),
            rarity: Set(new.rarity),
            artist_id: Set(new.artist_id),
            max_instances: Set(new.max_instances),
            remaining_instances: Set(new.max_instances),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&self.pool)
        .await
        .map_err(|e| conflict_on_duplicate(e, &format!("Emote name '{name}'")))
    }

    async fn decrement_instance(&self, emote_id: i64) -> AppResult<bool> {
        // UPDATE emotes SET remaining_instances = remaining_instances - 1
        // WHERE id = ? AND remaining_instances > 0
        let update_result: UpdateResult = emotes::Entity::update_many()
            .col_expr(
                emotes::Column::RemainingInstances,
                Expr::col(emotes::Column::RemainingInstances).sub(1),
            )
            .filter(emotes::Column::Id.eq(emote_id))
            .filter(emotes::Column::RemainingInstances.gt(0))
            .exec(&self.pool)
            .await?;

        if update_result.rows_affected == 1 {
            return Ok(true);
        }
        // Distinguish "sold out" from "no such emote"
        match emotes::Entity::find_by_id(emote_id).one(&self.pool).await? {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!("Emote {emote_id} not found"))),
        }
    }
}

#[async_trait]
impl HoldingStore for PgStore {
    async fn holding_count(&self, user_id: i64, emote_id: i64) -> AppResult<i64> {
        let holding = holdings::Entity::find()
            .filter(holdings::Column::UserId.eq(user_id))
            .filter(holdings::Column::EmoteId.eq(emote_id))
            .one(&self.pool)
            .await?;
        Ok(holding.map(|h| h.count).unwrap_or(0))
    }

    async fn increment_holding(&self, user_id: i64, emote_id: i64, by: i64) -> AppResult<i64> {
        let row = self
            .pool
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
INSERT INTO user_emotes (user_id, emote_id, count, created_at, updated_at)
VALUES ($1, $2, $3, NOW(), NOW())
ON CONFLICT (user_id, emote_id)
DO UPDATE SET count = user_emotes.count + EXCLUDED.count, updated_at = NOW()
RETURNING count
"#,
                [user_id.into(), emote_id.into(), by.into()],
            ))
            .await?
            .ok_or_else(|| AppError::InternalError("Holding upsert returned no row".into()))?;
        Ok(row.try_get::<i64>("", "count")?)
    }

    async fn insert_holding_if_absent(&self, user_id: i64, emote_id: i64) -> AppResult<bool> {
        let result = self
            .pool
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
INSERT INTO user_emotes (user_id, emote_id, count, created_at, updated_at)
VALUES ($1, $2, 1, NOW(), NOW())
ON CONFLICT (user_id, emote_id) DO NOTHING
"#,
                [user_id.into(), emote_id.into()],
            ))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_holding(&self, user_id: i64, emote_id: i64, count: i64) -> AppResult<()> {
        self.pool
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
INSERT INTO user_emotes (user_id, emote_id, count, created_at, updated_at)
VALUES ($1, $2, $3, NOW(), NOW())
ON CONFLICT (user_id, emote_id)
DO UPDATE SET count = EXCLUDED.count, updated_at = NOW()
"#,
                [user_id.into(), emote_id.into(), count.into()],
            ))
            .await?;
        Ok(())
    }

    async fn holdings_for_user(&self, user_id: i64) -> AppResult<Vec<holdings::Model>> {
        Ok(holdings::Entity::find()
            .filter(holdings::Column::UserId.eq(user_id))
            .order_by_asc(holdings::Column::EmoteId)
            .all(&self.pool)
            .await?)
    }

    async fn total_held(&self, emote_id: i64) -> AppResult<i64> {
        let row = self
            .pool
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT COALESCE(SUM(count), 0)::BIGINT AS total FROM user_emotes WHERE emote_id = $1",
                [emote_id.into()],
            ))
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<i64>("", "total")?),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, user_id: i64) -> AppResult<Option<users::Model>> {
        Ok(users::Entity::find_by_id(user_id).one(&self.pool).await?)
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> AppResult<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::ExternalId.eq(external_id))
            .one(&self.pool)
            .await?)
    }

    async fn insert_user(&self, new: NewUser) -> AppResult<users::Model> {
        let username = new.username.clone();
        users::ActiveModel {
            external_id: Set(new.external_id),
            username: Set(new.username),
            display_name: Set(new.display_name),
            is_artist: Set(new.is_artist),
            is_developer: Set(new.is_developer),
            is_founder: Set(new.is_founder),
            is_admin: Set(new.is_admin),
            balance_cents: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&self.pool)
        .await
        .map_err(|e| conflict_on_duplicate(e, &format!("User '{username}'")))
    }

    async fn all_user_ids(&self) -> AppResult<Vec<i64>> {
        let ids: Vec<i64> = users::Entity::find()
            .select_only()
            .column(users::Column::Id)
            .order_by_asc(users::Column::Id)
            .into_tuple()
            .all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn earliest_user_ids(&self, limit: u64) -> AppResult<Vec<i64>> {
        let ids: Vec<i64> = users::Entity::find()
            .select_only()
            .column(users::Column::Id)
            .order_by_asc(users::Column::CreatedAt)
            .order_by_asc(users::Column::Id)
            .limit(limit)
            .into_tuple()
            .all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn user_ids_with_role(&self, role: StaffRole) -> AppResult<Vec<i64>> {
        let column = match role {
            StaffRole::Artist => users::Column::IsArtist,
            StaffRole::Developer => users::Column::IsDeveloper,
            StaffRole::Founder => users::Column::IsFounder,
        };
        let ids: Vec<i64> = users::Entity::find()
            .select_only()
            .column(users::Column::Id)
            .filter(column.eq(true))
            .order_by_asc(users::Column::Id)
            .into_tuple()
            .all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn set_role(
        &self,
        user_id: i64,
        role: StaffRole,
        enabled: bool,
    ) -> AppResult<users::Model> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;
        let mut am = user.into_active_model();
        match role {
            StaffRole::Artist => am.is_artist = Set(enabled),
            StaffRole::Developer => am.is_developer = Set(enabled),
            StaffRole::Founder => am.is_founder = Set(enabled),
        }
        am.updated_at = Set(Some(Utc::now()));
        Ok(am.update(&self.pool).await?)
    }

    async fn update_profile(
        &self,
        user_id: i64,
        username: String,
        display_name: Option<String>,
    ) -> AppResult<users::Model> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;
        let label = format!("User '{username}'");
        let mut am = user.into_active_model();
        am.username = Set(username);
        am.display_name = Set(display_name);
        am.updated_at = Set(Some(Utc::now()));
        am.update(&self.pool)
            .await
            .map_err(|e| conflict_on_duplicate(e, &label))
    }
}

#[async_trait]
impl DonationStore for PgStore {
    async fn find_by_payment_ref(&self, payment_ref: &str) -> AppResult<Option<donations::Model>> {
        Ok(donations::Entity::find()
            .filter(donations::Column::PaymentRef.eq(payment_ref))
            .one(&self.pool)
            .await?)
    }

    async fn claim_payment(&self, new: NewDonation) -> AppResult<DonationClaim> {
        let payment_ref = new.payment_ref.clone();
        let inserted = donations::ActiveModel {
            payment_ref: Set(new.payment_ref),
            donor_id: Set(Some(new.donor_id)),
            recipient_id: Set(Some(new.recipient_id)),
            amount_cents: Set(new.amount_cents),
            fee_cents: Set(0),
            net_cents: Set(0),
            recipient_share_cents: Set(0),
            platform_share_cents: Set(0),
            artist_share_cents: Set(0),
            artist_id: Set(None),
            roll_count: Set(new.roll_count),
            status: Set(DonationStatus::Pending),
            failure_reason: Set(None),
            created_at: Set(Some(Utc::now())),
            completed_at: Set(None),
            ..Default::default()
        }
        .insert(&self.pool)
        .await;

        match inserted {
            Ok(model) => Ok(DonationClaim::Created(model)),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                let existing = self.find_by_payment_ref(&payment_ref).await?.ok_or_else(|| {
                    AppError::InternalError(format!(
                        "Payment {payment_ref} conflicted but cannot be found"
                    ))
                })?;
                Ok(DonationClaim::Existing(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn settle(&self, settlement: DonationSettlement) -> AppResult<donations::Model> {
        let txn = self.pool.begin().await?;
        let donation_id = settlement.donation_id;

        let donation = donations::Entity::find_by_id(donation_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Donation {donation_id} not found")))?;
        if donation.status != DonationStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Donation {donation_id} is already {}",
                donation.status
            )));
        }

        if !settlement.awarded.is_empty() {
            let rows = settlement
                .awarded
                .iter()
                .enumerate()
                .map(|(position, emote_id)| rewards::ActiveModel {
                    donation_id: Set(donation_id),
                    emote_id: Set(*emote_id),
                    position: Set(position as i32),
                    ..Default::default()
                });
            rewards::Entity::insert_many(rows).exec(&txn).await?;
        }

        for BalanceCredit {
            user_id,
            kind,
            amount_cents,
            description,
        } in settlement.credits
        {
            apply_balance_change(
                &txn,
                user_id,
                kind,
                amount_cents,
                Some(donation_id),
                None,
                description,
            )
            .await?;
        }

        let mut am = donation.into_active_model();
        am.fee_cents = Set(settlement.fee_cents);
        am.net_cents = Set(settlement.net_cents);
        am.recipient_share_cents = Set(settlement.recipient_share_cents);
        am.platform_share_cents = Set(settlement.platform_share_cents);
        am.artist_share_cents = Set(settlement.artist_share_cents);
        am.artist_id = Set(settlement.artist_id);
        am.status = Set(DonationStatus::Completed);
        am.completed_at = Set(Some(Utc::now()));
        let updated = am.update(&txn).await?;

        txn.commit().await?;
        Ok(updated)
    }

    async fn mark_failed(&self, payment_ref: &str, reason: &str) -> AppResult<donations::Model> {
        // Guarded on status so a concurrent settle that commits first is never overwritten
        let fail_unless_completed = || {
            donations::Entity::update_many()
                .set(donations::ActiveModel {
                    status: Set(DonationStatus::Failed),
                    failure_reason: Set(Some(reason.to_string())),
                    ..Default::default()
                })
                .filter(donations::Column::PaymentRef.eq(payment_ref))
                .filter(donations::Column::Status.ne(DonationStatus::Completed))
        };

        fail_unless_completed().exec(&self.pool).await?;
        if let Some(existing) = self.find_by_payment_ref(payment_ref).await? {
            return Ok(existing);
        }

        let inserted = donations::ActiveModel {
            payment_ref: Set(payment_ref.to_string()),
            donor_id: Set(None),
            recipient_id: Set(None),
            amount_cents: Set(0),
            fee_cents: Set(0),
            net_cents: Set(0),
            recipient_share_cents: Set(0),
            platform_share_cents: Set(0),
            artist_share_cents: Set(0),
            artist_id: Set(None),
            roll_count: Set(0),
            status: Set(DonationStatus::Failed),
            failure_reason: Set(Some(reason.to_string())),
            created_at: Set(Some(Utc::now())),
            completed_at: Set(None),
            ..Default::default()
        }
        .insert(&self.pool)
        .await;

        match inserted {
            Ok(model) => Ok(model),
            // a claim for the same reference landed in between
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                fail_unless_completed().exec(&self.pool).await?;
                self.find_by_payment_ref(payment_ref).await?.ok_or_else(|| {
                    AppError::InternalError(format!(
                        "Payment {payment_ref} conflicted but cannot be found"
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reopen_failed(&self, new: NewDonation) -> AppResult<Option<donations::Model>> {
        let reopened: UpdateResult = donations::Entity::update_many()
            .set(donations::ActiveModel {
                donor_id: Set(Some(new.donor_id)),
                recipient_id: Set(Some(new.recipient_id)),
                amount_cents: Set(new.amount_cents),
                roll_count: Set(new.roll_count),
                status: Set(DonationStatus::Pending),
                failure_reason: Set(None),
                ..Default::default()
            })
            .filter(donations::Column::PaymentRef.eq(new.payment_ref.as_str()))
            .filter(donations::Column::Status.eq(DonationStatus::Failed))
            .filter(donations::Column::RollCount.eq(0))
            .exec(&self.pool)
            .await?;

        if reopened.rows_affected != 1 {
            return Ok(None);
        }
        self.find_by_payment_ref(&new.payment_ref).await
    }

    async fn awarded_emote_ids(&self, donation_id: i64) -> AppResult<Vec<i64>> {
        let ids: Vec<i64> = rewards::Entity::find()
            .select_only()
            .column(rewards::Column::EmoteId)
            .filter(rewards::Column::DonationId.eq(donation_id))
            .order_by_asc(rewards::Column::Position)
            .into_tuple()
            .all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn donations_by_donor(&self, donor_id: i64) -> AppResult<Vec<donations::Model>> {
        Ok(donations::Entity::find()
            .filter(donations::Column::DonorId.eq(donor_id))
            .order_by_desc(donations::Column::Id)
            .all(&self.pool)
            .await?)
    }

    async fn balance_transactions(&self, user_id: i64) -> AppResult<Vec<btx::Model>> {
        Ok(btx::Entity::find()
            .filter(btx::Column::UserId.eq(user_id))
            .order_by_desc(btx::Column::Id)
            .all(&self.pool)
            .await?)
    }

    async fn create_payout(
        &self,
        user_id: i64,
        amount_cents: i64,
        method: PayoutMethod,
    ) -> AppResult<payouts::Model> {
        let txn = self.pool.begin().await?;

        let user = users::Entity::find_by_id(user_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;
        if user.balance_cents < amount_cents {
            return Err(AppError::ValidationError(format!(
                "Insufficient balance: {} cents available",
                user.balance_cents
            )));
        }

        let payout = payouts::ActiveModel {
            user_id: Set(user_id),
            amount_cents: Set(amount_cents),
            method: Set(method),
            status: Set(PayoutStatus::Pending),
            created_at: Set(Some(Utc::now())),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        apply_balance_change(
            &txn,
            user_id,
            BalanceTransactionKind::Payout,
            -amount_cents,
            None,
            Some(payout.id),
            Some(format!("Payout via {method:?}")),
        )
        .await?;

        txn.commit().await?;
        Ok(payout)
    }
}
