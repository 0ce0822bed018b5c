//! Scripted Host Session
//!
//! Walks the whole command surface once, logging every response.

use bridge_core::{MethodCall, MethodResponse, MethodSender};
use serde_json::{Value, json};
use tracing::{info, warn};

/// Visa test card
const TEST_CARD: &str = "4242424242424242";

pub async fn run(
    bridge: &MethodSender,
    publishable_key: &str,
    intent_secret: Option<&str>,
) -> anyhow::Result<()> {
    step(bridge, "init", json!({ "publishableKey": publishable_key })).await?;
    step(bridge, "initCustomerSession", Value::Null).await?;
    step(bridge, "retrieveCurrentCustomer", Value::Null).await?;

    step(
        bridge,
        "updateCurrentCustomer",
        json!({
            "shippingAddress": {
                "name": "Jenny Rosen",
                "line1": "510 Townsend St",
                "city": "San Francisco",
                "state": "CA",
                "postalCode": "94103",
                "country": "US"
            }
        }),
    )
    .await?;

    let created = step(
        bridge,
        "createPaymentMethodCard",
        json!({
            "cardNumber": TEST_CARD,
            "cardExpMonth": 12,
            "cardExpYear": 2034,
            "cardCvv": "123",
            "billingDetailsName": "Jenny Rosen",
            "billingDetailsEmail": "jenny.rosen@example.com"
        }),
    )
    .await?;

    let payment_method_id = created
        .success_payload()
        .and_then(|pm| pm["id"].as_str())
        .map(str::to_owned);

    match payment_method_id {
        Some(id) => {
            step(bridge, "attachPaymentMethod", json!({ "id": id })).await?;
            step(bridge, "getPaymentMethods", json!({ "type": "card" })).await?;
            step(bridge, "detachPaymentMethod", json!({ "id": id })).await?;
        }
        None => warn!("No payment method created, skipping attach and detach"),
    }

    match intent_secret {
        Some(secret) => {
            step(bridge, "authenticatePayment", json!({ "paymentIntentSecret": secret })).await?;
        }
        None => info!("PAYMENT_INTENT_SECRET not set, skipping authenticatePayment"),
    }

    step(bridge, "endCustomerSession", Value::Null).await?;
    step(bridge, "retrieveCurrentCustomer", Value::Null).await?;
    step(bridge, "presentPaymentSheet", Value::Null).await?;

    Ok(())
}

async fn step(
    bridge: &MethodSender,
    method: &str,
    arguments: Value,
) -> anyhow::Result<MethodResponse> {
    let response = bridge.call(MethodCall::new(method, arguments)).await?;
    let rendered = serde_json::to_string(&response)?;

    match &response {
        MethodResponse::Success { .. } => info!(method, response = %rendered, "✓"),
        MethodResponse::Error(_) => warn!(method, response = %rendered, "✗"),
        MethodResponse::NotImplemented => warn!(method, "Not implemented"),
    }
    Ok(response)
}
