//! The per-session bridge between a buyer client and an upstream server.
//!
//! The bridge owns both transports exclusively. Requests flowing toward
//! the upstream are recorded in a bounded pending map so their responses
//! can be correlated; responses flowing back run through the
//! [`X402Middleware`], which may convert a 402 into a payment retry. The
//! retry is sent under a synthetic id carrying the
//! [`RETRY_ID_PREFIX`](p402_proto::RETRY_ID_PREFIX) prefix, and the
//! buyer's original id is restored before the eventual reply is delivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use p402_proto::jsonrpc::{self, RequestId};
use p402_proto::{BoxFuture, ORIGINAL_ID_META_KEY, RETRY_ID_PREFIX};

use crate::middleware::X402Middleware;
use crate::transport::{Transport, TransportError, TransportEvents};

/// Default ceiling on in-flight upstream requests per bridge.
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// JSON-RPC error code surfaced to the buyer when the pending ceiling is hit.
pub const BACKPRESSURE_ERROR_CODE: i64 = -32000;

const INTERNAL_ERROR_CODE: i64 = -32603;

/// A session bridge. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("max_pending", &self.inner.max_pending)
            .field("closing", &self.inner.closing.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct Inner {
    server: Arc<dyn Transport>,
    upstream: Arc<dyn Transport>,
    middleware: X402Middleware,
    pending: Mutex<HashMap<RequestId, Value>>,
    max_pending: usize,
    started: AtomicBool,
    closing: AtomicBool,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Bridge {
    /// Creates a bridge with the default pending ceiling.
    #[must_use]
    pub fn new(
        server: Arc<dyn Transport>,
        upstream: Arc<dyn Transport>,
        middleware: X402Middleware,
    ) -> Self {
        Self::with_max_pending(server, upstream, middleware, DEFAULT_MAX_PENDING)
    }

    /// Creates a bridge with an explicit pending ceiling.
    #[must_use]
    pub fn with_max_pending(
        server: Arc<dyn Transport>,
        upstream: Arc<dyn Transport>,
        middleware: X402Middleware,
        max_pending: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                server,
                upstream,
                middleware,
                pending: Mutex::new(HashMap::new()),
                max_pending,
                started: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                on_close: Mutex::new(None),
            }),
        }
    }

    /// Registers the hook invoked exactly once when the bridge closes.
    /// The session registry uses this to deregister the session.
    pub fn set_on_close(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.on_close.lock().expect("close hook lock poisoned") = Some(Box::new(hook));
    }

    /// The bridge's payment middleware.
    #[must_use]
    pub fn middleware(&self) -> &X402Middleware {
        &self.inner.middleware
    }

    /// Number of requests currently awaiting an upstream response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().expect("pending lock poisoned").len()
    }

    /// Whether the bridge has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Wires both transports to this bridge and makes them live.
    ///
    /// Idempotent: a second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first [`TransportError`] raised by either transport.
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner
            .server
            .start(Arc::new(Side {
                inner: Arc::downgrade(&self.inner),
                from_server: true,
            }))
            .await?;
        self.inner
            .upstream
            .start(Arc::new(Side {
                inner: Arc::downgrade(&self.inner),
                from_server: false,
            }))
            .await?;
        Ok(())
    }

    /// Closes both transports, discards unsettled authorizations, and
    /// fires the close hook. Idempotent.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

/// Event sink for one direction; holds only a weak back-reference so the
/// bridge's ownership of its transports stays acyclic.
struct Side {
    inner: Weak<Inner>,
    from_server: bool,
}

impl TransportEvents for Side {
    fn on_message(&self, message: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(inner) = self.inner.upgrade() else {
                return;
            };
            if self.from_server {
                inner.handle_client_message(message).await;
            } else {
                inner.handle_upstream_message(message).await;
            }
        })
    }

    fn on_error(&self, error: TransportError) -> BoxFuture<'_, ()> {
        // Transport errors do not close the bridge; the peer drives clean
        // shutdown.
        let side = if self.from_server { "client" } else { "upstream" };
        tracing::warn!(side, error = %error, "transport error");
        Box::pin(async {})
    }

    fn on_close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(inner) = self.inner.upgrade() {
                inner.close().await;
            }
        })
    }
}

impl Inner {
    /// Buyer → upstream.
    async fn handle_client_message(&self, message: Value) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }

        if !jsonrpc::is_request(&message) {
            // Client responses and notifications pass through untouched.
            self.forward_upstream(message).await;
            return;
        }
        let id = jsonrpc::request_id(&message).expect("is_request implies an id");

        let over_ceiling = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            if pending.len() >= self.max_pending {
                true
            } else {
                pending.insert(id.clone(), message.clone());
                false
            }
        };
        if over_ceiling {
            tracing::warn!(%id, max_pending = self.max_pending, "back-pressure ceiling hit, failing request");
            let error = jsonrpc::error_response(
                &id,
                BACKPRESSURE_ERROR_CODE,
                "too many in-flight requests",
            );
            self.forward_server(error).await;
            return;
        }

        if let Err(e) = self.upstream.send(message).await {
            self.pending.lock().expect("pending lock poisoned").remove(&id);
            tracing::warn!(%id, error = %e, "failed to forward request upstream");
            let error = jsonrpc::error_response(
                &id,
                INTERNAL_ERROR_CODE,
                &format!("upstream send failed: {e}"),
            );
            self.forward_server(error).await;
        }
    }

    /// Upstream → buyer.
    async fn handle_upstream_message(&self, mut message: Value) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }

        // Notifications and server-initiated requests pass through verbatim.
        let Some(id) = jsonrpc::request_id(&message) else {
            self.forward_server(message).await;
            return;
        };
        if jsonrpc::is_request(&message) {
            self.forward_server(message).await;
            return;
        }

        // Always drop the pending entry before any further processing so
        // a failure below cannot leak it.
        let original = self.pending.lock().expect("pending lock poisoned").remove(&id);
        let Some(original) = original else {
            self.forward_server(message).await;
            return;
        };

        // If the original is a payment retry, restore the buyer's id
        // before the middleware (and the buyer) see the response.
        let buyer_id = jsonrpc::request_meta(&original)
            .and_then(|meta| meta.get(ORIGINAL_ID_META_KEY))
            .and_then(|raw| serde_json::from_value::<RequestId>(raw.clone()).ok());
        if let Some(buyer_id) = &buyer_id {
            jsonrpc::set_request_id(&mut message, buyer_id);
        }

        match self.middleware.on_message(&original, &message).await {
            Ok(Some(mut retry)) => {
                // The double-pay guard means `original` is never itself a
                // retry here, so `id` is the buyer's id.
                let retry_id = RequestId::String(format!("{RETRY_ID_PREFIX}{id}"));
                if let Some(meta) = jsonrpc::request_meta_mut(&mut retry) {
                    meta.insert(ORIGINAL_ID_META_KEY.to_owned(), id.to_value());
                }
                jsonrpc::set_request_id(&mut retry, &retry_id);
                let payment_id = jsonrpc::request_meta(&retry)
                    .and_then(|meta| meta.get(p402_proto::PAYMENT_ID_META_KEY))
                    .and_then(Value::as_str)
                    .map(str::to_owned);

                // The slot freed by the pop above keeps this within the
                // ceiling.
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .insert(retry_id.clone(), retry.clone());

                tracing::debug!(original_id = %id, %retry_id, "retrying request with payment");
                if let Err(e) = self.upstream.send(retry).await {
                    self.pending
                        .lock()
                        .expect("pending lock poisoned")
                        .remove(&retry_id);
                    if let Some(payment_id) = payment_id {
                        self.middleware
                            .fail_authorization(&payment_id, format!("upstream send failed: {e}"))
                            .await;
                    }
                    tracing::warn!(%retry_id, error = %e, "failed to send payment retry, forwarding 402");
                    self.forward_server(message).await;
                }
            }
            Ok(None) => self.forward_server(message).await,
            Err(e) => {
                tracing::error!(%id, error = %e, "payment middleware failed, forwarding response");
                self.forward_server(message).await;
            }
        }
    }

    async fn forward_server(&self, message: Value) {
        if let Err(e) = self.server.send(message).await {
            tracing::warn!(error = %e, "failed to deliver message to client");
        }
    }

    async fn forward_upstream(&self, message: Value) {
        if let Err(e) = self.upstream.send(message).await {
            tracing::warn!(error = %e, "failed to forward message upstream");
        }
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.upstream.close().await;
        self.server.close().await;

        let dropped = self.middleware.drain();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded unsettled authorizations on close");
        }
        self.pending.lock().expect("pending lock poisoned").clear();

        let hook = self.on_close.lock().expect("close hook lock poisoned").take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use p402_proto::timestamp::UnixTimestamp;
    use p402_proto::types::{ExactAuthorization, ExactPayload, PaymentPayload, PaymentRequirements};
    use p402_treasurer::{
        Authorization, PaymentContext, PaymentStatus, Treasurer, TreasurerError,
    };

    struct MockTransport {
        sent: Mutex<Vec<Value>>,
        events: Mutex<Option<Arc<dyn TransportEvents>>>,
        close_count: AtomicUsize,
        fail_next_send: AtomicBool,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                events: Mutex::new(None),
                close_count: AtomicUsize::new(0),
                fail_next_send: AtomicBool::new(false),
            })
        }

        fn fail_next_send(&self) {
            self.fail_next_send.store(true, Ordering::SeqCst);
        }

        /// Injects a message from this transport's peer into the bridge.
        async fn emit(&self, message: Value) {
            let events = self.events.lock().unwrap().clone();
            if let Some(events) = events {
                events.on_message(message).await;
            }
        }

        /// Simulates the peer closing this transport.
        async fn emit_close(&self) {
            let events = self.events.lock().unwrap().clone();
            if let Some(events) = events {
                events.on_close().await;
            }
        }

        fn sent(&self) -> Vec<Value> {
            self.sent.lock().unwrap().clone()
        }

        fn close_count(&self) -> usize {
            self.close_count.load(Ordering::SeqCst)
        }
    }

    impl Transport for MockTransport {
        fn start(&self, events: Arc<dyn TransportEvents>) -> BoxFuture<'_, Result<(), TransportError>> {
            *self.events.lock().unwrap() = Some(events);
            Box::pin(async { Ok(()) })
        }

        fn send(&self, message: Value) -> BoxFuture<'_, Result<(), TransportError>> {
            if self.fail_next_send.swap(false, Ordering::SeqCst) {
                return Box::pin(async { Err(TransportError::Http("injected failure".to_owned())) });
            }
            self.sent.lock().unwrap().push(message);
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            self.close_count.fetch_add(1, Ordering::SeqCst);
            *self.events.lock().unwrap() = None;
            Box::pin(async {})
        }
    }

    struct StubTreasurer {
        approve: bool,
        counter: AtomicUsize,
        statuses: Mutex<Vec<PaymentStatus>>,
    }

    impl StubTreasurer {
        fn new(approve: bool) -> Arc<Self> {
            Arc::new(Self {
                approve,
                counter: AtomicUsize::new(0),
                statuses: Mutex::new(Vec::new()),
            })
        }

        fn statuses(&self) -> Vec<PaymentStatus> {
            self.statuses.lock().unwrap().clone()
        }

        fn stub_payment() -> PaymentPayload {
            PaymentPayload {
                x402_version: 1,
                scheme: "exact".to_owned(),
                network: "base-sepolia".to_owned(),
                payload: ExactPayload {
                    signature: "0xsig".to_owned(),
                    authorization: ExactAuthorization {
                        from: "0x1111111111111111111111111111111111111111".to_owned(),
                        to: "0x2222222222222222222222222222222222222222".to_owned(),
                        value: "10000".to_owned(),
                        valid_after: UnixTimestamp::from_secs(0),
                        valid_before: UnixTimestamp::from_secs(300),
                        nonce: "0x00".to_owned(),
                    },
                },
            }
        }
    }

    impl Treasurer for StubTreasurer {
        fn on_payment_required(
            &self,
            accepts: &[PaymentRequirements],
            _context: &PaymentContext,
        ) -> BoxFuture<'_, Result<Option<Authorization>, TreasurerError>> {
            let approve = self.approve && !accepts.is_empty();
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(approve.then(|| Authorization {
                    authorization_id: format!("auth-{n}"),
                    payment: Self::stub_payment(),
                }))
            })
        }

        fn on_status(
            &self,
            status: PaymentStatus,
            _authorization: &Authorization,
            _context: &PaymentContext,
        ) -> BoxFuture<'_, ()> {
            self.statuses.lock().unwrap().push(status);
            Box::pin(async {})
        }
    }

    async fn setup(
        approve: bool,
        max_pending: usize,
    ) -> (Bridge, Arc<MockTransport>, Arc<MockTransport>, Arc<StubTreasurer>) {
        let server = MockTransport::new();
        let upstream = MockTransport::new();
        let treasurer = StubTreasurer::new(approve);
        let middleware = X402Middleware::new(treasurer.clone());
        let bridge = Bridge::with_max_pending(
            server.clone(),
            upstream.clone(),
            middleware,
            max_pending,
        );
        bridge.start().await.unwrap();
        (bridge, server, upstream, treasurer)
    }

    fn request(id: i64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": "x", "arguments": {}}
        })
    }

    fn payment_required_response(id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": 402,
                "message": "Payment Required",
                "data": {
                    "x402Version": 1,
                    "accepts": [{
                        "scheme": "exact",
                        "network": "base-sepolia",
                        "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                        "payTo": "0x9876543210987654321098765432109876543210",
                        "maxAmountRequired": "10000",
                        "resource": "x",
                        "description": "d",
                        "mimeType": "application/json",
                        "maxTimeoutSeconds": 300
                    }]
                }
            }
        })
    }

    fn settle_success_response(id: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{"type": "text", "text": "ok"}],
                "_meta": {"x402/payment-response": {"success": true, "transaction": "0xTX"}}
            }
        })
    }

    #[tokio::test]
    async fn test_happy_path_payment_retry() {
        let (bridge, server, upstream, treasurer) = setup(true, DEFAULT_MAX_PENDING).await;

        server.emit(request(7)).await;
        assert_eq!(upstream.sent().len(), 1);
        assert_eq!(upstream.sent()[0]["id"], 7);
        assert_eq!(bridge.pending_requests(), 1);

        upstream.emit(payment_required_response(json!(7))).await;

        // The 402 is suppressed; a retry with payment goes out instead.
        assert!(server.sent().is_empty());
        let sent = upstream.sent();
        assert_eq!(sent.len(), 2);
        let retry = &sent[1];
        assert_eq!(retry["id"], "retry_with_payment__7");
        assert_eq!(retry["params"]["_meta"]["p402/original-id"], 7);
        assert_eq!(
            retry["params"]["_meta"]["x402/payment"]["payload"]["authorization"]["value"],
            "10000"
        );
        assert_eq!(retry["params"]["_meta"]["p402/paymentId"], "auth-0");
        assert_eq!(bridge.pending_requests(), 1);
        assert_eq!(bridge.middleware().pending_authorizations(), 1);

        upstream
            .emit(settle_success_response("retry_with_payment__7"))
            .await;

        // The buyer sees one response, under its original id, with the
        // settlement meta intact.
        let delivered = server.sent();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["id"], 7);
        assert_eq!(
            delivered[0]["result"]["_meta"]["x402/payment-response"]["success"],
            true
        );
        assert_eq!(bridge.pending_requests(), 0);
        assert_eq!(bridge.middleware().pending_authorizations(), 0);
        assert_eq!(
            treasurer.statuses(),
            vec![PaymentStatus::Sending, PaymentStatus::Accepted]
        );
    }

    #[tokio::test]
    async fn test_decline_forwards_original_402() {
        let (bridge, server, upstream, treasurer) = setup(false, DEFAULT_MAX_PENDING).await;

        server.emit(request(7)).await;
        upstream.emit(payment_required_response(json!(7))).await;

        // No retry, the buyer gets the 402 verbatim.
        assert_eq!(upstream.sent().len(), 1);
        let delivered = server.sent();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["id"], 7);
        assert_eq!(delivered[0]["error"]["code"], 402);
        assert_eq!(bridge.pending_requests(), 0);
        assert!(treasurer.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_retry_answered_with_402_is_not_paid_again() {
        let (bridge, server, upstream, treasurer) = setup(true, DEFAULT_MAX_PENDING).await;

        server.emit(request(7)).await;
        upstream.emit(payment_required_response(json!(7))).await;
        assert_eq!(upstream.sent().len(), 2);

        // The retry itself gets a 402 back.
        upstream
            .emit(payment_required_response(json!("retry_with_payment__7")))
            .await;

        // No third attempt; the buyer receives the 402 under id 7.
        assert_eq!(upstream.sent().len(), 2);
        let delivered = server.sent();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["id"], 7);
        assert_eq!(delivered[0]["error"]["code"], 402);
        assert_eq!(bridge.pending_requests(), 0);
        assert_eq!(treasurer.statuses(), vec![PaymentStatus::Sending]);

        // The never-settled authorization is discarded on close.
        assert_eq!(bridge.middleware().pending_authorizations(), 1);
        bridge.close().await;
        assert_eq!(bridge.middleware().pending_authorizations(), 0);
    }

    #[tokio::test]
    async fn test_settle_without_payment_id_forwards_response() {
        let (bridge, server, upstream, treasurer) = setup(true, DEFAULT_MAX_PENDING).await;

        server.emit(request(7)).await;
        // Upstream claims a settlement for a request that never paid.
        upstream.emit(settle_success_response_with_id(json!(7))).await;

        let delivered = server.sent();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["id"], 7);
        assert!(treasurer.statuses().is_empty());
        assert_eq!(bridge.pending_requests(), 0);
        assert_eq!(bridge.middleware().pending_authorizations(), 0);
    }

    fn settle_success_response_with_id(id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "_meta": {"x402/payment-response": {"success": true, "transaction": "0xTX"}}
            }
        })
    }

    #[tokio::test]
    async fn test_failed_retry_send_fails_the_authorization() {
        let (bridge, server, upstream, treasurer) = setup(true, DEFAULT_MAX_PENDING).await;

        server.emit(request(7)).await;
        upstream.fail_next_send();
        upstream.emit(payment_required_response(json!(7))).await;

        // The retry never went out: the buyer gets the 402, the treasurer
        // hears Sending then Error, and nothing leaks.
        let delivered = server.sent();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["error"]["code"], 402);
        assert_eq!(
            treasurer.statuses(),
            vec![PaymentStatus::Sending, PaymentStatus::Error]
        );
        assert_eq!(bridge.pending_requests(), 0);
        assert_eq!(bridge.middleware().pending_authorizations(), 0);
    }

    #[tokio::test]
    async fn test_backpressure_ceiling() {
        let (bridge, server, upstream, _treasurer) = setup(true, 2).await;

        server.emit(request(1)).await;
        server.emit(request(2)).await;
        server.emit(request(3)).await;

        // Two forwarded, the third failed back to the buyer.
        assert_eq!(upstream.sent().len(), 2);
        let delivered = server.sent();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["id"], 3);
        assert_eq!(delivered[0]["error"]["code"], BACKPRESSURE_ERROR_CODE);
        assert_eq!(bridge.pending_requests(), 2);

        // The bridge recovers once pending drains.
        upstream
            .emit(json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
            .await;
        server.emit(request(4)).await;
        assert_eq!(upstream.sent().len(), 3);
        assert_eq!(bridge.pending_requests(), 2);
    }

    #[tokio::test]
    async fn test_notifications_pass_through_both_ways() {
        let (_bridge, server, upstream, _treasurer) = setup(true, DEFAULT_MAX_PENDING).await;

        let client_note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let upstream_note = json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}});

        server.emit(client_note.clone()).await;
        upstream.emit(upstream_note.clone()).await;

        assert_eq!(upstream.sent(), vec![client_note]);
        assert_eq!(server.sent(), vec![upstream_note]);
    }

    #[tokio::test]
    async fn test_unknown_response_id_forwarded_unchanged() {
        let (_bridge, server, upstream, _treasurer) = setup(true, DEFAULT_MAX_PENDING).await;

        let response = json!({"jsonrpc": "2.0", "id": 99, "result": {"ok": true}});
        upstream.emit(response.clone()).await;
        assert_eq!(server.sent(), vec![response]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_propagates() {
        let (bridge, server, upstream, _treasurer) = setup(true, DEFAULT_MAX_PENDING).await;
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let closed = closed.clone();
            bridge.set_on_close(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }

        // The upstream peer goes away; both sides close exactly once.
        upstream.emit_close().await;
        assert!(bridge.is_closed());
        assert_eq!(server.close_count(), 1);
        assert_eq!(upstream.close_count(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        bridge.close().await;
        assert_eq!(server.close_count(), 1);
        assert_eq!(upstream.close_count(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_mid_flight_drops_late_reply() {
        let (bridge, server, upstream, _treasurer) = setup(true, DEFAULT_MAX_PENDING).await;

        server.emit(request(7)).await;
        bridge.close().await;
        assert_eq!(bridge.pending_requests(), 0);

        // A reply arriving after teardown is dropped, not delivered.
        upstream
            .emit(json!({"jsonrpc": "2.0", "id": 7, "result": {}}))
            .await;
        assert!(server.sent().is_empty());
    }
}
