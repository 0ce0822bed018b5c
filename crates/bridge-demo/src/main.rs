//! Payments bridge demo host
//!
//! Runs the bridge in-process and drives it the way an application would:
//! method calls over a channel, ephemeral keys relayed from a merchant
//! backend, challenges shown on the console.
//!
//! With `STRIPE_PUBLISHABLE_KEY` and `EPHEMERAL_KEY_URL` set it talks to
//! Stripe; otherwise it runs against the in-memory processor.

mod host;
mod script;

use std::sync::Arc;

use bridge_core::confirmation::IntentStatus;
use bridge_core::mock::{IntentScript, MockAuthenticationContext, MockProcessor};
use bridge_core::{
    AuthenticationContext, Bridge, BridgeConfig, ChannelHost, MethodSender, PaymentProcessor,
};
use bridge_stripe::StripeApi;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::host::{ConsoleAuthenticationContext, KeySource};

const MOCK_CUSTOMER: &str = "cus_demo";

struct Setup {
    processor: Arc<dyn PaymentProcessor>,
    auth: Arc<dyn AuthenticationContext>,
    keys: KeySource,
    publishable_key: String,
    intent_secret: Option<String>,
}

fn stripe_setup(publishable_key: String, backend_url: String) -> anyhow::Result<Setup> {
    let api = StripeApi::from_env()?;
    tracing::info!(api_base = %api.config().api_base, "✓ Stripe configured");

    Ok(Setup {
        processor: Arc::new(api),
        auth: Arc::new(ConsoleAuthenticationContext),
        keys: KeySource::Backend {
            client: reqwest::Client::new(),
            url: backend_url,
        },
        publishable_key,
        intent_secret: std::env::var("PAYMENT_INTENT_SECRET").ok(),
    })
}

fn mock_setup() -> Setup {
    tracing::warn!("⚠ Stripe not configured - using the in-memory processor");
    tracing::warn!("  Set STRIPE_PUBLISHABLE_KEY and EPHEMERAL_KEY_URL in .env");

    let processor = Arc::new(MockProcessor::new());
    let secret = processor.script_intent(
        "pi_demo",
        IntentScript::challenged(IntentStatus::Succeeded),
    );

    Setup {
        auth: Arc::new(MockAuthenticationContext::completing()),
        keys: KeySource::Mock {
            processor: processor.clone(),
            customer_id: MOCK_CUSTOMER.into(),
        },
        processor: processor as Arc<dyn PaymentProcessor>,
        publishable_key: "pk_test_demo".into(),
        intent_secret: Some(secret.expose().to_owned()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,bridge_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let setup = match (
        std::env::var("STRIPE_PUBLISHABLE_KEY").ok(),
        std::env::var("EPHEMERAL_KEY_URL").ok(),
    ) {
        (Some(publishable_key), Some(backend_url)) => stripe_setup(publishable_key, backend_url)?,
        _ => mock_setup(),
    };

    let (host, events) = ChannelHost::new();
    let (sender, calls) = MethodSender::channel(32);

    let bridge = Arc::new(Bridge::new(
        setup.processor,
        Arc::new(host),
        setup.auth,
        BridgeConfig::from_env(),
    ));

    tokio::spawn(bridge.serve(calls));
    tokio::spawn(host::answer_key_requests(events, sender.clone(), setup.keys));

    script::run(&sender, &setup.publishable_key, setup.intent_secret.as_deref()).await?;

    tracing::info!("Demo finished");
    Ok(())
}
