use std::collections::HashMap;

use stripe::{Event, EventObject, EventType, PaymentIntent, Webhook};

use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};
use crate::services::{PaymentConfirmed, PaymentEvent, PaymentFailed};

/// Stripe webhook boundary: signature check and translation into payment events.
/// Charging itself happens on the client side and is not driven from here.
#[derive(Clone)]
pub struct StripeService {
    config: StripeConfig,
}

impl StripeService {
    pub fn new(config: StripeConfig) -> Self {
        Self { config }
    }

    pub fn verify_webhook_signature(&self, payload: &str, signature: &str) -> AppResult<Event> {
        if self.config.webhook_secret.is_empty() {
            return Err(AppError::ConfigError(
                "Stripe webhook secret is not configured".to_string(),
            ));
        }
        Webhook::construct_event(payload, signature, &self.config.webhook_secret)
            .map_err(|e| AppError::AuthError(format!("Invalid webhook signature: {e}")))
    }

    /// `None` for events that do not concern donations
    pub fn to_payment_event(&self, event: Event) -> AppResult<Option<PaymentEvent>> {
        let intent = match (&event.type_, event.data.object) {
            (
                EventType::PaymentIntentSucceeded | EventType::PaymentIntentPaymentFailed,
                EventObject::PaymentIntent(pi),
            ) => pi,
            _ => return Ok(None),
        };
        let succeeded = event.type_ == EventType::PaymentIntentSucceeded;
        payment_event_from_intent(succeeded, &intent).map(Some)
    }
}

fn payment_event_from_intent(succeeded: bool, intent: &PaymentIntent) -> AppResult<PaymentEvent> {
    let failure = intent
        .last_payment_error
        .as_ref()
        .and_then(|e| e.message.clone());
    payment_event_from_parts(
        succeeded,
        intent.id.as_str(),
        intent.amount,
        &intent.metadata,
        failure,
    )
}

fn metadata_id(metadata: &HashMap<String, String>, key: &str) -> AppResult<i64> {
    metadata
        .get(key)
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| AppError::ValidationError(format!("Missing or invalid {key} in metadata")))
}

fn payment_event_from_parts(
    succeeded: bool,
    payment_ref: &str,
    amount_cents: i64,
    metadata: &HashMap<String, String>,
    failure: Option<String>,
) -> AppResult<PaymentEvent> {
    if !succeeded {
        return Ok(PaymentEvent::Failed(PaymentFailed {
            payment_ref: payment_ref.to_string(),
            reason: failure.unwrap_or_else(|| "payment_failed".to_string()),
        }));
    }
    Ok(PaymentEvent::Confirmed(PaymentConfirmed {
        donor_id: metadata_id(metadata, "donor_id")?,
        recipient_id: metadata_id(metadata, "recipient_id")?,
        amount_cents,
        payment_ref: payment_ref.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_succeeded_intent_becomes_confirmed() {
        let event = payment_event_from_parts(
            true,
            "pi_1",
            1000,
            &metadata(&[("donor_id", "3"), ("recipient_id", "4")]),
            None,
        )
        .unwrap();
        assert_eq!(
            event,
            PaymentEvent::Confirmed(PaymentConfirmed {
                donor_id: 3,
                recipient_id: 4,
                amount_cents: 1000,
                payment_ref: "pi_1".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_metadata_is_rejected() {
        let result =
            payment_event_from_parts(true, "pi_2", 500, &metadata(&[("donor_id", "3")]), None);
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_failed_intent_keeps_reason() {
        let event = payment_event_from_parts(
            false,
            "pi_3",
            500,
            &HashMap::new(),
            Some("Your card was declined.".to_string()),
        )
        .unwrap();
        assert!(matches!(
            event,
            PaymentEvent::Failed(PaymentFailed { ref reason, .. }) if reason == "Your card was declined."
        ));
    }

    #[test]
    fn test_unconfigured_secret_rejects_webhooks() {
        let service = StripeService::new(StripeConfig::default());
        assert!(matches!(
            service.verify_webhook_signature("{}", "t=1,v1=abc"),
            Err(AppError::ConfigError(_))
        ));
    }
}
