use std::sync::Arc;

use log::info;

use crate::database::DonationStore;
use crate::error::{AppError, AppResult};
use crate::models::{PayoutRequest, PayoutResponse};
use crate::utils::format_cents;

const MIN_PAYOUT_CENTS: i64 = 100;

#[derive(Clone)]
pub struct PayoutService {
    donations: Arc<dyn DonationStore>,
}

impl PayoutService {
    pub fn new(donations: Arc<dyn DonationStore>) -> Self {
        Self { donations }
    }

    pub async fn request_payout(
        &self,
        user_id: i64,
        request: PayoutRequest,
    ) -> AppResult<PayoutResponse> {
        if request.amount_cents < MIN_PAYOUT_CENTS {
            return Err(AppError::ValidationError(format!(
                "Payout must be at least {}",
                format_cents(MIN_PAYOUT_CENTS)
            )));
        }
        let payout = self
            .donations
            .create_payout(user_id, request.amount_cents, request.method)
            .await?;
        info!(
            "User {user_id} requested payout {} of {} via {:?}",
            payout.id,
            format_cents(payout.amount_cents),
            payout.method
        );
        Ok(payout.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        BalanceCredit, DonationClaim, DonationSettlement, NewDonation, NewUser, Stores,
    };
    use crate::entities::{BalanceTransactionKind, PayoutMethod, PayoutStatus};

    /// Creates a user holding `cents` from a settled donation
    async fn funded_user(stores: &Stores, cents: i64) -> i64 {
        let new_user = |name: &str| NewUser {
            external_id: format!("ext-{name}"),
            username: name.to_string(),
            display_name: None,
            is_artist: false,
            is_developer: false,
            is_founder: false,
            is_admin: false,
        };
        let donor = stores.users.insert_user(new_user("donor")).await.unwrap();
        let streamer = stores.users.insert_user(new_user("streamer")).await.unwrap();
        let DonationClaim::Created(donation) = stores
            .donations
            .claim_payment(NewDonation {
                payment_ref: "pi_fund".to_string(),
                donor_id: donor.id,
                recipient_id: streamer.id,
                amount_cents: 1_000,
                roll_count: 10,
            })
            .await
            .unwrap()
        else {
            panic!("payment reference already claimed");
        };
        stores
            .donations
            .settle(DonationSettlement {
                donation_id: donation.id,
                fee_cents: 0,
                net_cents: cents,
                recipient_share_cents: cents,
                platform_share_cents: 0,
                artist_share_cents: 0,
                artist_id: None,
                awarded: Vec::new(),
                credits: vec![BalanceCredit {
                    user_id: streamer.id,
                    kind: BalanceTransactionKind::DonationShare,
                    amount_cents: cents,
                    description: None,
                }],
            })
            .await
            .unwrap();
        streamer.id
    }

    #[tokio::test]
    async fn test_payout_below_minimum_is_rejected() {
        let stores = Stores::in_memory();
        let service = PayoutService::new(stores.donations.clone());
        let user = funded_user(&stores, 847).await;

        assert!(matches!(
            service
                .request_payout(
                    user,
                    PayoutRequest {
                        amount_cents: 99,
                        method: PayoutMethod::Paypal,
                    },
                )
                .await,
            Err(AppError::ValidationError(_))
        ));
        let balance = stores.users.find_user(user).await.unwrap().unwrap();
        assert_eq!(balance.balance_cents, 847);
    }

    #[tokio::test]
    async fn test_payout_debits_balance_and_cannot_overdraw() {
        let stores = Stores::in_memory();
        let service = PayoutService::new(stores.donations.clone());
        let user = funded_user(&stores, 847).await;

        let payout = service
            .request_payout(
                user,
                PayoutRequest {
                    amount_cents: 500,
                    method: PayoutMethod::Stripe,
                },
            )
            .await
            .unwrap();
        assert_eq!(payout.amount_cents, 500);
        assert_eq!(payout.status, PayoutStatus::Pending);
        let balance = stores.users.find_user(user).await.unwrap().unwrap();
        assert_eq!(balance.balance_cents, 347);
        let ledger = stores.donations.balance_transactions(user).await.unwrap();
        assert!(ledger.iter().any(|t| t.kind == BalanceTransactionKind::Payout
            && t.amount_cents == -500
            && t.balance_after == 347));

        assert!(matches!(
            service
                .request_payout(
                    user,
                    PayoutRequest {
                        amount_cents: 348,
                        method: PayoutMethod::Paypal,
                    },
                )
                .await,
            Err(AppError::ValidationError(_))
        ));
    }
}
