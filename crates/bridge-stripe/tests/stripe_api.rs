//! Stripe REST processor against a mock HTTP server.

use std::sync::Arc;

use bridge_core::confirmation::{ConfirmationEngine, ConfirmationOutcome};
use bridge_core::mock::MockAuthenticationContext;
use bridge_core::{
    BillingDetails, BridgeError, CardParams, ClientSecret, EphemeralKey, PaymentMethodKind,
    PaymentMethodParams, PaymentProcessor, PublishableKey, ShippingAddress,
};
use bridge_stripe::{DEFAULT_API_VERSION, StripeApi, StripeConfig};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, method, path, query_param},
};

fn api(server: &MockServer) -> StripeApi {
    StripeApi::new(
        StripeConfig::default()
            .with_api_base(server.uri())
            .with_return_url("shop://stripe-return"),
    )
    .unwrap()
}

fn ephemeral_key() -> EphemeralKey {
    EphemeralKey::from_json(&json!({
        "id": "ephkey_1",
        "secret": "ek_test_abc",
        "expires": 4_102_444_800_i64,
        "associated_objects": [{"type": "customer", "id": "cus_123"}]
    }))
    .unwrap()
}

fn publishable_key() -> PublishableKey {
    PublishableKey::new("pk_test_123").unwrap()
}

// ============================================================================
// Customer-scoped calls
// ============================================================================

#[tokio::test]
async fn test_retrieve_customer_uses_ephemeral_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/customers/cus_123"))
        .and(header("authorization", "Bearer ek_test_abc"))
        .and(header("stripe-version", DEFAULT_API_VERSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cus_123",
            "object": "customer",
            "email": "jenny@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let customer = api(&server).retrieve_customer(&ephemeral_key()).await.unwrap();
    assert_eq!(customer["email"], "jenny@example.com");
}

#[tokio::test]
async fn test_update_shipping_sends_form_fields() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/customers/cus_123"))
        .and(body_string_contains("shipping%5Bname%5D=Jenny+Rosen"))
        .and(body_string_contains("shipping%5Baddress%5D%5Bline1%5D=1+Main+St"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cus_123",
            "shipping": {"name": "Jenny Rosen", "address": {"line1": "1 Main St"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let shipping = ShippingAddress {
        name: Some("Jenny Rosen".into()),
        line1: Some("1 Main St".into()),
        ..Default::default()
    };
    let customer = api(&server)
        .update_customer_shipping(&ephemeral_key(), &shipping)
        .await
        .unwrap();
    assert_eq!(customer["shipping"]["name"], "Jenny Rosen");
}

#[tokio::test]
async fn test_list_payment_methods_unwraps_data() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/payment_methods"))
        .and(query_param("customer", "cus_123"))
        .and(query_param("type", "card_present"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "pm_1", "type": "card_present"},
                {"id": "pm_2", "type": "card_present"}
            ],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let methods = api(&server)
        .list_payment_methods(&ephemeral_key(), PaymentMethodKind::CardPresent)
        .await
        .unwrap();
    let ids: Vec<_> = methods.iter().map(|pm| pm["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["pm_1", "pm_2"]);
}

#[tokio::test]
async fn test_attach_and_detach() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_methods/pm_1/attach"))
        .and(body_string_contains("customer=cus_123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "pm_1", "customer": "cus_123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_methods/pm_1/detach"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "pm_1", "customer": null})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = api(&server);
    let attached = api.attach_payment_method(&ephemeral_key(), "pm_1").await.unwrap();
    assert_eq!(attached["customer"], "cus_123");

    let detached = api.detach_payment_method(&ephemeral_key(), "pm_1").await.unwrap();
    assert!(detached["customer"].is_null());
}

// ============================================================================
// Publishable-key calls
// ============================================================================

#[tokio::test]
async fn test_create_payment_method_echoes_record() {
    let server = MockServer::start().await;

    let record = json!({
        "id": "pm_card_visa",
        "object": "payment_method",
        "type": "card",
        "card": {"brand": "visa", "last4": "4242", "exp_month": 12, "exp_year": 2030},
        "billing_details": {"name": "Jenny Rosen", "email": "jenny@example.com"}
    });

    Mock::given(method("POST"))
        .and(path("/v1/payment_methods"))
        .and(header("authorization", "Bearer pk_test_123"))
        .and(body_string_contains("type=card"))
        .and(body_string_contains("card%5Bnumber%5D=4242424242424242"))
        .and(body_string_contains("billing_details%5Bemail%5D=jenny%40example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(record.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let params = PaymentMethodParams::card(
        CardParams {
            number: Some("4242424242424242".into()),
            exp_month: Some(12),
            exp_year: Some(2030),
            cvc: Some("123".into()),
        },
        BillingDetails {
            name: Some("Jenny Rosen".into()),
            email: Some("jenny@example.com".into()),
        },
    );

    let created = api(&server)
        .create_payment_method(&publishable_key(), &params)
        .await
        .unwrap();
    assert_eq!(serde_json::Value::Object(created), record);
}

#[tokio::test]
async fn test_confirmation_against_stripe() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_1"))
        .and(query_param("client_secret", "pi_1_secret_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_1",
            "status": "requires_confirmation",
            "next_action": null
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_1/confirm"))
        .and(body_string_contains("client_secret=pi_1_secret_abc"))
        .and(body_string_contains("return_url=shop%3A%2F%2Fstripe-return"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_1",
            "status": "succeeded",
            "next_action": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = ConfirmationEngine::new(
        Arc::new(api(&server)),
        Arc::new(MockAuthenticationContext::completing()),
        3,
    );
    let secret = ClientSecret::parse("pi_1_secret_abc").unwrap();

    let outcome = engine
        .authenticate_payment(&publishable_key(), &secret)
        .await
        .unwrap();
    assert_eq!(outcome, ConfirmationOutcome::Succeeded);
}

// ============================================================================
// Error mapping
// ============================================================================

#[tokio::test]
async fn test_card_error_maps_to_processor_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_methods"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "message": "Your card was declined."
            }
        })))
        .mount(&server)
        .await;

    let result = api(&server)
        .create_payment_method(&publishable_key(), &PaymentMethodParams::default())
        .await;
    assert!(matches!(
        result,
        Err(BridgeError::Processor(message)) if message == "Your card was declined."
    ));
}

#[tokio::test]
async fn test_expired_key_maps_to_authentication_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/customers/cus_123"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "Expired API Key provided"}
        })))
        .mount(&server)
        .await;

    let result = api(&server).retrieve_customer(&ephemeral_key()).await;
    assert!(matches!(result, Err(BridgeError::Authentication(_))));
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/payment_methods"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = api(&server)
        .list_payment_methods(&ephemeral_key(), PaymentMethodKind::Card)
        .await;
    assert!(matches!(result, Err(BridgeError::Unavailable(_))));
}

#[tokio::test]
async fn test_non_object_body_is_a_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/customers/cus_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["not", "an", "object"])))
        .mount(&server)
        .await;

    let result = api(&server).retrieve_customer(&ephemeral_key()).await;
    assert!(matches!(result, Err(BridgeError::Decode(_))));
}
