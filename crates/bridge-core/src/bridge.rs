//! Bridge Context
//!
//! Owns the bridge-wide state (publishable key, the one key broker, the
//! current customer session) and dispatches host commands to the session
//! manager, the payment method factory and the confirmation engine.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::channel::{Envelope, HostChannel, MethodCall, MethodResponse};
use crate::command::{Command, CommandName};
use crate::config::{BridgeConfig, PublishableKey};
use crate::confirmation::{
    AuthenticationContext, ClientSecret, ConfirmationEngine, ConfirmationOutcome,
};
use crate::error::{BridgeError, ErrorPayload, Result};
use crate::key_broker::{KeyJson, KeyBroker, KeyRequestId};
use crate::payment_method::{PaymentMethodFactory, PaymentMethodParams};
use crate::processor::{
    CustomerRecord, PaymentMethodKind, PaymentMethodRecord, PaymentProcessor, ShippingAddress,
};
use crate::session::{CustomerSession, SessionId};

/// The payments bridge
pub struct Bridge {
    config: BridgeConfig,
    publishable_key: RwLock<Option<PublishableKey>>,
    broker: Arc<KeyBroker>,
    processor: Arc<dyn PaymentProcessor>,
    session: RwLock<Option<Arc<CustomerSession>>>,
    factory: PaymentMethodFactory,
    confirmation: ConfirmationEngine,
}

impl Bridge {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        host: Arc<dyn HostChannel>,
        auth: Arc<dyn AuthenticationContext>,
        config: BridgeConfig,
    ) -> Self {
        let broker = KeyBroker::new(host).with_timeout(config.key_request_timeout);

        Self {
            factory: PaymentMethodFactory::new(processor.clone()),
            confirmation: ConfirmationEngine::new(
                processor.clone(),
                auth,
                config.max_authentication_rounds,
            ),
            broker: Arc::new(broker),
            processor,
            publishable_key: RwLock::new(None),
            session: RwLock::new(None),
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn key_broker(&self) -> &Arc<KeyBroker> {
        &self.broker
    }

    /// Set (or replace) the merchant's publishable key
    pub fn init(&self, publishable_key: PublishableKey) {
        info!(
            publishable_key = %publishable_key.redacted(),
            livemode = publishable_key.is_live(),
            processor = self.processor.name(),
            "Bridge initialized"
        );
        *self
            .publishable_key
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(publishable_key);
    }

    pub fn publishable_key(&self) -> Result<PublishableKey> {
        self.publishable_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BridgeError::NotInitialized)
    }

    /// Start a session bound to the shared key broker, replacing any current one
    pub fn init_customer_session(&self) -> SessionId {
        let session = Arc::new(CustomerSession::new(
            self.broker.clone(),
            self.processor.clone(),
            &self.config,
        ));
        let id = session.id();
        let session_started = session.created_at();

        let replaced = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session);

        if let Some(previous) = replaced {
            debug!(session_id = %previous.id(), "Replacing customer session");
        }
        info!(session_id = %id, created_at = %session_started, "Customer session started");
        id
    }

    /// Release the current session and its caches.
    ///
    /// Returns whether a session was active.
    pub fn end_customer_session(&self) -> bool {
        let ended = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match ended {
            Some(session) => {
                session.clear_cache();
                info!(session_id = %session.id(), "Customer session ended");
                true
            }
            None => {
                debug!("No customer session to end");
                false
            }
        }
    }

    /// Current session; operations in flight keep the session they started with
    pub fn session(&self) -> Result<Arc<CustomerSession>> {
        self.publishable_key()?;
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BridgeError::NoSession)
    }

    pub fn on_key_update(&self, request_id: Option<KeyRequestId>, key: KeyJson) -> bool {
        self.broker.on_key_update(request_id, key)
    }

    pub fn on_key_update_failure(
        &self,
        request_id: Option<KeyRequestId>,
        code: i64,
        message: impl Into<String>,
    ) -> bool {
        self.broker.on_key_update_failure(request_id, code, message)
    }

    pub async fn retrieve_current_customer(&self) -> Result<CustomerRecord> {
        self.session()?.retrieve_customer().await
    }

    pub async fn update_current_customer(
        &self,
        shipping: &ShippingAddress,
    ) -> Result<CustomerRecord> {
        self.session()?.update_customer(shipping).await
    }

    pub async fn get_payment_methods(
        &self,
        kind: PaymentMethodKind,
    ) -> Result<Vec<PaymentMethodRecord>> {
        self.session()?.list_payment_methods(kind).await
    }

    pub async fn attach_payment_method(&self, id: &str) -> Result<PaymentMethodRecord> {
        self.session()?.attach_payment_method(id).await
    }

    pub async fn detach_payment_method(&self, id: &str) -> Result<PaymentMethodRecord> {
        self.session()?.detach_payment_method(id).await
    }

    /// Tokenize a card; needs the publishable key but no session
    pub async fn create_payment_method_card(
        &self,
        params: &PaymentMethodParams,
    ) -> Result<PaymentMethodRecord> {
        let publishable_key = self.publishable_key()?;
        self.factory.create_card(&publishable_key, params).await
    }

    pub async fn authenticate_payment(
        &self,
        client_secret: &ClientSecret,
    ) -> Result<ConfirmationOutcome> {
        let publishable_key = self.publishable_key()?;
        self.confirmation
            .authenticate_payment(&publishable_key, client_secret)
            .await
    }

    /// Handle one host method call and produce its single response
    pub async fn handle(&self, call: MethodCall) -> MethodResponse {
        match self.begin(&call) {
            Begun::Answered(response) => response,
            Begun::Pending(name, step) => self.complete(name, step).await,
        }
    }

    /// Handle calls until the host drops its sender.
    ///
    /// Calls are begun in arrival order: state changes apply before the next
    /// call is read, and processor operations capture the publishable key and
    /// session current at arrival. Only the processor round trip runs on its
    /// own task, so key replies can arrive while session operations wait.
    pub async fn serve(self: Arc<Self>, mut calls: mpsc::Receiver<Envelope>) {
        info!("Bridge serving host calls");

        while let Some(Envelope { call, reply }) = calls.recv().await {
            match self.begin(&call) {
                Begun::Answered(response) => respond(&call.method, reply, response),
                Begun::Pending(name, step) => {
                    let bridge = self.clone();
                    let method = call.method;
                    tokio::spawn(async move {
                        let response = bridge.complete(name, step).await;
                        respond(&method, reply, response);
                    });
                }
            }
        }

        info!("Host channel closed, bridge stopped");
    }

    fn begin(&self, call: &MethodCall) -> Begun {
        let Some(name) = CommandName::from_method(&call.method) else {
            warn!(method = %call.method, "Method not implemented");
            return Begun::Answered(MethodResponse::NotImplemented);
        };

        match Command::parse(name, call).and_then(|command| self.apply(command)) {
            Ok(Step::Done) => Begun::Answered(MethodResponse::ok()),
            Ok(step) => Begun::Pending(name, step),
            Err(e) => Begun::Answered(failure_response(name, &e)),
        }
    }

    fn apply(&self, command: Command) -> Result<Step> {
        debug!(command = %command.name(), "Handling command");

        let step = match command {
            Command::Init { publishable_key } => {
                self.init(publishable_key);
                Step::Done
            }
            Command::InitCustomerSession => {
                self.init_customer_session();
                Step::Done
            }
            Command::OnKeyUpdate { request_id, key } => {
                self.on_key_update(request_id, key);
                Step::Done
            }
            Command::OnKeyUpdateFailure {
                request_id,
                code,
                message,
            } => {
                self.on_key_update_failure(request_id, code, message);
                Step::Done
            }
            Command::EndCustomerSession => {
                self.end_customer_session();
                Step::Done
            }
            Command::RetrieveCurrentCustomer => Step::Session(self.session()?, SessionOp::Retrieve),
            Command::UpdateCurrentCustomer { shipping } => {
                Step::Session(self.session()?, SessionOp::Update(shipping))
            }
            Command::GetPaymentMethods { kind } => {
                Step::Session(self.session()?, SessionOp::List(kind))
            }
            Command::AttachPaymentMethod { id } => {
                Step::Session(self.session()?, SessionOp::Attach(id))
            }
            Command::DetachPaymentMethod { id } => {
                Step::Session(self.session()?, SessionOp::Detach(id))
            }
            Command::CreatePaymentMethodCard { params } => {
                Step::CreateCard(self.publishable_key()?, params)
            }
            Command::AuthenticatePayment { client_secret } => {
                Step::Authenticate(self.publishable_key()?, client_secret)
            }
        };
        Ok(step)
    }

    async fn complete(&self, name: CommandName, step: Step) -> MethodResponse {
        match self.run(step).await {
            Ok(None) => MethodResponse::ok(),
            Ok(Some(payload)) => MethodResponse::payload(payload),
            Err(e) => failure_response(name, &e),
        }
    }

    async fn run(&self, step: Step) -> Result<Option<Value>> {
        match step {
            Step::Done => Ok(None),
            Step::Session(session, op) => match op {
                SessionOp::Retrieve => {
                    let customer = session.retrieve_customer().await?;
                    Ok(Some(Value::Object(customer)))
                }
                SessionOp::Update(shipping) => {
                    session.update_customer(&shipping).await?;
                    Ok(None)
                }
                SessionOp::List(kind) => {
                    let methods = session.list_payment_methods(kind).await?;
                    Ok(Some(Value::Array(
                        methods.into_iter().map(Value::Object).collect(),
                    )))
                }
                SessionOp::Attach(id) => {
                    session.attach_payment_method(&id).await?;
                    Ok(None)
                }
                SessionOp::Detach(id) => {
                    session.detach_payment_method(&id).await?;
                    Ok(None)
                }
            },
            Step::CreateCard(publishable_key, params) => {
                let record = self.factory.create_card(&publishable_key, &params).await?;
                Ok(Some(Value::Object(record)))
            }
            Step::Authenticate(publishable_key, client_secret) => {
                let outcome = self
                    .confirmation
                    .authenticate_payment(&publishable_key, &client_secret)
                    .await?;
                match outcome {
                    ConfirmationOutcome::Succeeded => Ok(None),
                    outcome => Err(BridgeError::Processor(format!(
                        "payment intent {} ended {outcome:?}",
                        client_secret.intent_id()
                    ))),
                }
            }
        }
    }
}

/// Where a call stands once its synchronous half has run
enum Begun {
    Answered(MethodResponse),
    Pending(CommandName, Step),
}

/// Work left after the synchronous half, with the state captured at arrival
enum Step {
    Done,
    Session(Arc<CustomerSession>, SessionOp),
    CreateCard(PublishableKey, PaymentMethodParams),
    Authenticate(PublishableKey, ClientSecret),
}

enum SessionOp {
    Retrieve,
    Update(ShippingAddress),
    List(PaymentMethodKind),
    Attach(String),
    Detach(String),
}

fn respond(method: &str, reply: oneshot::Sender<MethodResponse>, response: MethodResponse) {
    if reply.send(response).is_err() {
        debug!(method, "Caller went away before the response");
    }
}

fn failure_response(name: CommandName, err: &BridgeError) -> MethodResponse {
    if err.is_flattened() {
        warn!(
            command = %name,
            error = %err,
            retryable = err.is_retryable(),
            "Command failed"
        );
        MethodResponse::Error(ErrorPayload::generic(name.failure_message()))
    } else {
        debug!(command = %name, code = err.code(), error = %err, "Command rejected");
        MethodResponse::Error(ErrorPayload::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelHost, HostEvent, MethodSender};
    use crate::confirmation::IntentStatus;
    use crate::mock::{IntentScript, MockAuthenticationContext, MockProcessor};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        bridge: Arc<Bridge>,
        processor: Arc<MockProcessor>,
    }

    /// Bridge whose host answers key requests over the command surface, the
    /// way a real host relays its backend's response
    fn fixture(auth: MockAuthenticationContext) -> Fixture {
        let processor = Arc::new(MockProcessor::new());
        let (host, mut events) = ChannelHost::new();
        let bridge = Arc::new(Bridge::new(
            processor.clone(),
            Arc::new(host),
            Arc::new(auth),
            BridgeConfig::default(),
        ));

        tokio::spawn({
            let bridge = bridge.clone();
            let processor = processor.clone();
            async move {
                while let Some(HostEvent::CreateEphemeralKey { request_id, .. }) =
                    events.recv().await
                {
                    let key = processor.issue_ephemeral_key("cus_123");
                    bridge
                        .handle(MethodCall::new(
                            "onKeyUpdate",
                            json!({"requestId": request_id.to_string(), "stripeResponseJson": key}),
                        ))
                        .await;
                }
            }
        });

        Fixture { bridge, processor }
    }

    async fn call(bridge: &Bridge, method: &str, arguments: Value) -> MethodResponse {
        bridge.handle(MethodCall::new(method, arguments)).await
    }

    async fn ready(auth: MockAuthenticationContext) -> Fixture {
        let f = fixture(auth);
        let init = call(&f.bridge, "init", json!({"publishableKey": "pk_test_123"})).await;
        assert!(init.is_success());
        assert!(call(&f.bridge, "initCustomerSession", Value::Null).await.is_success());
        f
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_implemented() {
        let f = fixture(MockAuthenticationContext::completing());
        assert_eq!(
            call(&f.bridge, "chargeEverything", Value::Null).await,
            MethodResponse::NotImplemented
        );
    }

    #[tokio::test]
    async fn test_requires_publishable_key() {
        let f = fixture(MockAuthenticationContext::completing());
        call(&f.bridge, "initCustomerSession", Value::Null).await;

        for method in ["retrieveCurrentCustomer", "createPaymentMethodCard"] {
            let response = call(&f.bridge, method, json!({})).await;
            assert_eq!(response.error().unwrap().code, "not_initialized");
        }
        assert!(f.processor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_customer_round_trip() {
        let f = ready(MockAuthenticationContext::completing()).await;

        let response = call(&f.bridge, "retrieveCurrentCustomer", Value::Null).await;
        assert_eq!(response.success_payload().unwrap()["id"], "cus_123");
    }

    #[tokio::test]
    async fn test_end_session_then_retrieve() {
        let f = ready(MockAuthenticationContext::completing()).await;
        call(&f.bridge, "retrieveCurrentCustomer", Value::Null).await;

        assert!(call(&f.bridge, "endCustomerSession", Value::Null).await.is_success());
        let response = call(&f.bridge, "retrieveCurrentCustomer", Value::Null).await;
        assert_eq!(response.error().unwrap().code, "no_session");

        // Ending twice is harmless
        assert!(call(&f.bridge, "endCustomerSession", Value::Null).await.is_success());
    }

    #[tokio::test]
    async fn test_bogus_type_lists_cards() {
        let f = ready(MockAuthenticationContext::completing()).await;
        f.processor.issue_ephemeral_key("cus_123");
        f.processor.seed_payment_method(Some("cus_123"), PaymentMethodKind::Card);
        f.processor.seed_payment_method(Some("cus_123"), PaymentMethodKind::Ideal);

        let bogus = call(&f.bridge, "getPaymentMethods", json!({"type": "bogus"})).await;
        let card = call(&f.bridge, "getPaymentMethods", json!({"type": "card"})).await;
        assert_eq!(bogus, card);
        assert_eq!(card.success_payload().unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_and_detach_over_the_wire() {
        let f = ready(MockAuthenticationContext::completing()).await;
        let pm = f.processor.seed_payment_method(None, PaymentMethodKind::Card);

        let attached = call(&f.bridge, "attachPaymentMethod", json!({"id": pm})).await;
        assert_eq!(attached, MethodResponse::ok());
        assert_eq!(f.processor.payment_method(&pm).unwrap()["customer"], "cus_123");

        let detached = call(&f.bridge, "detachPaymentMethod", json!({"id": pm})).await;
        assert_eq!(detached, MethodResponse::ok());

        // Detaching again is a processor failure, flattened
        let again = call(&f.bridge, "detachPaymentMethod", json!({"id": pm})).await;
        let error = again.error().unwrap();
        assert_eq!(error.code, "0");
        assert_eq!(
            error.message,
            "Failed to detach payment method. Possible connection issues."
        );
        assert!(error.details.is_none());
    }

    #[tokio::test]
    async fn test_update_customer_requires_address() {
        let f = ready(MockAuthenticationContext::completing()).await;

        let missing = call(&f.bridge, "updateCurrentCustomer", Value::Null).await;
        assert_eq!(missing.error().unwrap().code, "invalid_argument");

        let response = call(
            &f.bridge,
            "updateCurrentCustomer",
            json!({"shippingAddress": {"name": "Jenny Rosen", "line1": "1 Main St"}}),
        )
        .await;
        assert_eq!(response, MethodResponse::ok());
        assert_eq!(
            f.processor.customer("cus_123").unwrap()["shipping"]["address"]["line1"],
            "1 Main St"
        );
    }

    #[tokio::test]
    async fn test_processor_failures_are_flattened() {
        let f = ready(MockAuthenticationContext::completing()).await;
        f.processor.set_offline(true);

        let response = call(&f.bridge, "retrieveCurrentCustomer", Value::Null).await;
        assert_eq!(
            response,
            MethodResponse::Error(ErrorPayload::generic(
                "Failed to retrieve current customer. Possible connection issues."
            ))
        );
    }

    #[tokio::test]
    async fn test_key_failure_is_flattened() {
        let processor = Arc::new(MockProcessor::new());
        let (host, mut events) = ChannelHost::new();
        let bridge = Arc::new(Bridge::new(
            processor,
            Arc::new(host),
            Arc::new(MockAuthenticationContext::completing()),
            BridgeConfig::default(),
        ));
        bridge.init(PublishableKey::new("pk_test_123").unwrap());
        bridge.init_customer_session();

        tokio::spawn({
            let bridge = bridge.clone();
            async move {
                if events.recv().await.is_some() {
                    bridge
                        .handle(MethodCall::new(
                            "onKeyUpdateFailure",
                            json!({"responseCode": 402, "message": "declined"}),
                        ))
                        .await;
                }
            }
        });

        let response = call(&bridge, "getPaymentMethods", json!({"type": "card"})).await;
        let error = response.error().unwrap();
        assert_eq!(error.code, "0");
        assert_eq!(error.message, "Failed to get payment methods. Possible connection issues.");
        assert_eq!(bridge.key_broker().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_create_card_echoes_processor_record() {
        let f = fixture(MockAuthenticationContext::completing());
        call(&f.bridge, "init", json!({"publishableKey": "pk_test_123"})).await;

        let response = call(
            &f.bridge,
            "createPaymentMethodCard",
            json!({
                "cardNumber": "4242424242424242",
                "cardExpMonth": 12,
                "cardExpYear": 2030,
                "cardCvv": "123",
                "billingDetailsName": "Jenny Rosen",
                "billingDetailsEmail": "jenny@example.com"
            }),
        )
        .await;

        let payload = response.success_payload().unwrap();
        let id = payload["id"].as_str().unwrap();
        assert_eq!(
            Some(payload),
            f.processor.payment_method(id).map(Value::Object).as_ref()
        );
    }

    #[tokio::test]
    async fn test_declined_card() {
        let f = fixture(MockAuthenticationContext::completing());
        call(&f.bridge, "init", json!({"publishableKey": "pk_test_123"})).await;

        let response = call(
            &f.bridge,
            "createPaymentMethodCard",
            json!({"cardNumber": crate::mock::DECLINED_CARD}),
        )
        .await;
        assert_eq!(
            response,
            MethodResponse::Error(ErrorPayload::generic("Failed to create payment method."))
        );
    }

    #[tokio::test]
    async fn test_authenticate_outcomes() {
        let f = ready(MockAuthenticationContext::completing()).await;

        let succeeded = f.processor.script_intent("pi_ok", IntentScript::frictionless());
        let canceled = f
            .processor
            .script_intent("pi_canceled", IntentScript::already(IntentStatus::Canceled));
        let failed = f.processor.script_intent(
            "pi_failed",
            IntentScript::challenged(IntentStatus::RequiresPaymentMethod),
        );

        let authenticate = |secret: ClientSecret| {
            let bridge = f.bridge.clone();
            async move {
                call(
                    &bridge,
                    "authenticatePayment",
                    json!({"paymentIntentSecret": secret.expose()}),
                )
                .await
            }
        };

        let ok = authenticate(succeeded).await;
        assert_eq!(ok, MethodResponse::ok());
        assert!(ok.success_payload().is_none());

        let canceled = authenticate(canceled).await;
        let failed = authenticate(failed).await;
        assert_eq!(canceled, failed);
        assert_eq!(
            canceled,
            MethodResponse::Error(ErrorPayload::generic("Failed to authenticate payment."))
        );

        f.processor.set_offline(true);
        let offline = f.processor.script_intent("pi_offline", IntentScript::frictionless());
        assert_eq!(authenticate(offline).await, canceled);
    }

    #[tokio::test]
    async fn test_typed_outcome_keeps_detail() {
        let f = ready(MockAuthenticationContext::canceling()).await;
        let secret = f.processor.script_intent(
            "pi_3ds",
            IntentScript::challenged(IntentStatus::Succeeded),
        );

        let outcome = f.bridge.authenticate_payment(&secret).await.unwrap();
        assert_eq!(outcome, ConfirmationOutcome::Canceled);
    }

    #[tokio::test]
    async fn test_malformed_client_secret() {
        let f = ready(MockAuthenticationContext::completing()).await;

        let response = call(
            &f.bridge,
            "authenticatePayment",
            json!({"paymentIntentSecret": "pi_1"}),
        )
        .await;
        assert_eq!(response.error().unwrap().code, "invalid_argument");
        assert!(f.processor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_serve_handles_key_replies_concurrently() {
        let processor = Arc::new(MockProcessor::new());
        let (host, mut events) = ChannelHost::new();
        let bridge = Arc::new(Bridge::new(
            processor.clone(),
            Arc::new(host),
            Arc::new(MockAuthenticationContext::completing()),
            BridgeConfig::default(),
        ));
        let (sender, calls) = MethodSender::channel(8);
        tokio::spawn(bridge.serve(calls));

        // Host side: relay keys through the same inbound channel
        tokio::spawn({
            let sender = sender.clone();
            async move {
                while let Some(HostEvent::CreateEphemeralKey { request_id, .. }) =
                    events.recv().await
                {
                    let key = processor.issue_ephemeral_key("cus_123");
                    sender
                        .call(MethodCall::new(
                            "onKeyUpdate",
                            json!({"requestId": request_id.to_string(), "stripeResponseJson": key}),
                        ))
                        .await
                        .unwrap();
                }
            }
        });

        sender
            .call(MethodCall::new("init", json!({"publishableKey": "pk_test_123"})))
            .await
            .unwrap();
        sender.call(MethodCall::bare("initCustomerSession")).await.unwrap();

        let response = sender
            .call(MethodCall::bare("retrieveCurrentCustomer"))
            .await
            .unwrap();
        assert_eq!(response.success_payload().unwrap()["id"], "cus_123");
    }

    fn queued(method: &str, arguments: Value) -> (Envelope, oneshot::Receiver<MethodResponse>) {
        let (reply, response) = oneshot::channel();
        let call = MethodCall::new(method, arguments);
        (Envelope { call, reply }, response)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serve_applies_calls_in_arrival_order() {
        for _ in 0..50 {
            let f = fixture(MockAuthenticationContext::completing());
            let pm = f.processor.seed_payment_method(None, PaymentMethodKind::Card);
            let (tx, calls) = mpsc::channel(8);
            tokio::spawn(f.bridge.clone().serve(calls));

            // Queued back to back, no reply awaited in between
            let mut replies = Vec::new();
            for (method, arguments) in [
                ("init", json!({"publishableKey": "pk_test_123"})),
                ("initCustomerSession", Value::Null),
                ("attachPaymentMethod", json!({"id": pm})),
                ("endCustomerSession", Value::Null),
                ("retrieveCurrentCustomer", Value::Null),
            ] {
                let (envelope, reply) = queued(method, arguments);
                tx.send(envelope).await.unwrap();
                replies.push(reply);
            }

            let mut responses = Vec::new();
            for reply in replies {
                responses.push(reply.await.unwrap());
            }

            // The attach started on the live session and finishes on it
            assert_eq!(responses[2], MethodResponse::ok());
            assert_eq!(responses[3], MethodResponse::ok());
            assert_eq!(responses[4].error().unwrap().code, "no_session");
        }
    }

    #[tokio::test]
    async fn test_challenge_failure_is_generic_on_the_wire() {
        let f = ready(MockAuthenticationContext::failing("no activity to present from")).await;
        let secret = f.processor.script_intent(
            "pi_3ds",
            IntentScript::challenged(IntentStatus::Succeeded),
        );

        let response = call(
            &f.bridge,
            "authenticatePayment",
            json!({"paymentIntentSecret": secret.expose()}),
        )
        .await;
        assert_eq!(
            response,
            MethodResponse::Error(ErrorPayload::generic("Failed to authenticate payment."))
        );

        let outcome = f.bridge.authenticate_payment(&secret).await;
        assert!(matches!(outcome, Ok(ConfirmationOutcome::Failed)));
    }

    #[tokio::test]
    async fn test_unreadable_request_id_still_settles() {
        let processor = Arc::new(MockProcessor::new());
        let (host, mut events) = ChannelHost::new();
        let bridge = Arc::new(Bridge::new(
            processor.clone(),
            Arc::new(host),
            Arc::new(MockAuthenticationContext::completing()),
            BridgeConfig::default(),
        ));
        bridge.init(PublishableKey::new("pk_test_123").unwrap());
        bridge.init_customer_session();

        tokio::spawn({
            let bridge = bridge.clone();
            async move {
                if events.recv().await.is_some() {
                    let key = processor.issue_ephemeral_key("cus_123");
                    let reply = bridge
                        .handle(MethodCall::new(
                            "onKeyUpdate",
                            json!({"requestId": "req-7", "stripeResponseJson": key}),
                        ))
                        .await;
                    assert_eq!(reply, MethodResponse::ok());
                }
            }
        });

        let response = call(&bridge, "retrieveCurrentCustomer", Value::Null).await;
        assert_eq!(response.success_payload().unwrap()["id"], "cus_123");
        assert_eq!(bridge.key_broker().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unanswered_key_request_times_out() {
        let (host, _events) = ChannelHost::new();
        let bridge = Bridge::new(
            Arc::new(MockProcessor::new()),
            Arc::new(host),
            Arc::new(MockAuthenticationContext::completing()),
            BridgeConfig::default().with_key_request_timeout(Duration::from_millis(50)),
        );
        assert_eq!(
            bridge.config().key_request_timeout,
            Some(Duration::from_millis(50))
        );
        bridge.init(PublishableKey::new("pk_test_123").unwrap());
        bridge.init_customer_session();

        let response = call(&bridge, "retrieveCurrentCustomer", Value::Null).await;
        assert_eq!(
            response,
            MethodResponse::Error(ErrorPayload::generic(
                "Failed to retrieve current customer. Possible connection issues."
            ))
        );
        assert_eq!(bridge.key_broker().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_typed_operations() {
        let f = ready(MockAuthenticationContext::completing()).await;

        let customer = f.bridge.retrieve_current_customer().await.unwrap();
        assert_eq!(customer["id"], "cus_123");

        let shipping = ShippingAddress {
            city: Some("Berlin".into()),
            ..Default::default()
        };
        let updated = f.bridge.update_current_customer(&shipping).await.unwrap();
        assert_eq!(updated["shipping"]["address"]["city"], "Berlin");

        let created = f
            .bridge
            .create_payment_method_card(&PaymentMethodParams::default())
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_owned();

        f.bridge.attach_payment_method(&id).await.unwrap();
        let methods = f.bridge.get_payment_methods(PaymentMethodKind::Card).await.unwrap();
        assert_eq!(methods.len(), 1);

        f.bridge.detach_payment_method(&id).await.unwrap();
        let methods = f.bridge.get_payment_methods(PaymentMethodKind::Card).await.unwrap();
        assert!(methods.is_empty());
    }
}
