//! Stripe REST Processor
//!
//! Customer-scoped calls authenticate with the ephemeral key secret, payment
//! method and payment intent calls with the publishable key.

use std::time::Duration;

use async_trait::async_trait;
use bridge_core::confirmation::ClientSecret;
use bridge_core::processor::{CustomerRecord, JsonMap, PaymentMethodRecord};
use bridge_core::{
    EphemeralKey, PaymentMethodKind, PaymentMethodParams, PaymentProcessor, PublishableKey,
    ShippingAddress,
};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::StripeConfig;
use crate::error::{Result, StripeApiError};
use crate::form::{FormPairs, confirm_form, payment_method_form, shipping_form};

/// Stripe REST API client
pub struct StripeApi {
    config: StripeConfig,
    base: Url,
    client: reqwest::Client,
}

impl StripeApi {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let base = Url::parse(&config.api_base).map_err(|e| {
            StripeApiError::Config(format!("invalid api base {}: {e}", config.api_base))
        })?;
        if base.cannot_be_a_base() {
            return Err(StripeApiError::Config(format!(
                "api base {} cannot carry a path",
                config.api_base
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(StripeConfig::from_env())
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    async fn get(
        &self,
        bearer: &str,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<JsonMap> {
        let request = self.client.get(self.url(segments)).query(query);
        self.send(Method::GET, segments, request, bearer).await
    }

    async fn post(&self, bearer: &str, segments: &[&str], form: &FormPairs) -> Result<JsonMap> {
        let request = self.client.post(self.url(segments)).form(form);
        self.send(Method::POST, segments, request, bearer).await
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        request: RequestBuilder,
        bearer: &str,
    ) -> Result<JsonMap> {
        let path = segments.join("/");

        let response = request
            .bearer_auth(bearer)
            .header("Stripe-Version", &self.config.api_version)
            .send()
            .await
            .inspect_err(|e| warn!(%method, path = %path, error = %e, "Stripe request failed"))?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = response.bytes().await?;

        debug!(
            %method,
            path = %path,
            status = status.as_u16(),
            request_id = %request_id,
            "Stripe response"
        );

        if !status.is_success() {
            let err = StripeApiError::from_response(status.as_u16(), &body);
            warn!(
                %method,
                path = %path,
                request_id = %request_id,
                error = %err,
                "Stripe returned an error"
            );
            return Err(err);
        }

        match serde_json::from_slice(&body) {
            Ok(Value::Object(object)) => Ok(object),
            Ok(other) => Err(StripeApiError::UnexpectedResponse(format!(
                "expected an object from {path}, got {other}"
            ))),
            Err(e) => Err(StripeApiError::UnexpectedResponse(format!(
                "invalid JSON from {path}: {e}"
            ))),
        }
    }
}

fn list_data(mut list: JsonMap) -> Result<Vec<JsonMap>> {
    let Some(Value::Array(data)) = list.remove("data") else {
        return Err(StripeApiError::UnexpectedResponse(
            "list response has no data array".into(),
        ));
    };

    data.into_iter()
        .map(|item| match item {
            Value::Object(object) => Ok(object),
            other => Err(StripeApiError::UnexpectedResponse(format!(
                "list item is not an object: {other}"
            ))),
        })
        .collect()
}

#[async_trait]
impl PaymentProcessor for StripeApi {
    fn name(&self) -> &str {
        "Stripe"
    }

    fn api_version(&self) -> &str {
        &self.config.api_version
    }

    async fn retrieve_customer(&self, key: &EphemeralKey) -> bridge_core::Result<CustomerRecord> {
        Ok(self
            .get(key.secret(), &["customers", key.customer_id.as_str()], &[])
            .await?)
    }

    async fn update_customer_shipping(
        &self,
        key: &EphemeralKey,
        shipping: &ShippingAddress,
    ) -> bridge_core::Result<CustomerRecord> {
        Ok(self
            .post(
                key.secret(),
                &["customers", key.customer_id.as_str()],
                &shipping_form(shipping),
            )
            .await?)
    }

    async fn list_payment_methods(
        &self,
        key: &EphemeralKey,
        kind: PaymentMethodKind,
    ) -> bridge_core::Result<Vec<PaymentMethodRecord>> {
        let list = self
            .get(
                key.secret(),
                &["payment_methods"],
                &[("customer", key.customer_id.as_str()), ("type", kind.as_str())],
            )
            .await?;
        Ok(list_data(list)?)
    }

    async fn attach_payment_method(
        &self,
        key: &EphemeralKey,
        payment_method_id: &str,
    ) -> bridge_core::Result<PaymentMethodRecord> {
        let form = vec![("customer".to_owned(), key.customer_id.clone())];
        Ok(self
            .post(
                key.secret(),
                &["payment_methods", payment_method_id, "attach"],
                &form,
            )
            .await?)
    }

    async fn detach_payment_method(
        &self,
        key: &EphemeralKey,
        payment_method_id: &str,
    ) -> bridge_core::Result<PaymentMethodRecord> {
        Ok(self
            .post(
                key.secret(),
                &["payment_methods", payment_method_id, "detach"],
                &FormPairs::new(),
            )
            .await?)
    }

    async fn create_payment_method(
        &self,
        publishable_key: &PublishableKey,
        params: &PaymentMethodParams,
    ) -> bridge_core::Result<PaymentMethodRecord> {
        Ok(self
            .post(
                publishable_key.as_str(),
                &["payment_methods"],
                &payment_method_form(params),
            )
            .await?)
    }

    async fn retrieve_payment_intent(
        &self,
        publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> bridge_core::Result<JsonMap> {
        Ok(self
            .get(
                publishable_key.as_str(),
                &["payment_intents", client_secret.intent_id()],
                &[("client_secret", client_secret.expose())],
            )
            .await?)
    }

    async fn confirm_payment_intent(
        &self,
        publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> bridge_core::Result<JsonMap> {
        let form = confirm_form(client_secret.expose(), self.config.return_url.as_deref());
        Ok(self
            .post(
                publishable_key.as_str(),
                &["payment_intents", client_secret.intent_id(), "confirm"],
                &form,
            )
            .await?)
    }
}
