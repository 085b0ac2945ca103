//! Buyer-facing transport fed by the proxy's HTTP server.
//!
//! The HTTP layer hands each posted JSON-RPC message to
//! [`ServerHttpTransport::handle_message`]. Requests suspend the HTTP
//! response until the bridge delivers the matching reply through
//! [`Transport::send`]; notifications and client responses are
//! acknowledged immediately. The transport mints the MCP session id when
//! it sees `initialize` and reports it through a one-shot callback so the
//! proxy can register the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use p402_proto::BoxFuture;
use p402_proto::jsonrpc::{self, RequestId};

use crate::transport::{Transport, TransportError, TransportEvents};

/// What the HTTP layer should answer for a handled message.
#[derive(Debug)]
pub enum ServerReply {
    /// A JSON-RPC response body (HTTP 200).
    Response(Value),
    /// The message needs no body (HTTP 202).
    Accepted,
}

type SessionHook = Box<dyn FnOnce(String) + Send>;

/// Buyer-facing transport.
pub struct ServerHttpTransport {
    session_id: Mutex<Option<String>>,
    waiters: Mutex<HashMap<RequestId, oneshot::Sender<Value>>>,
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
    on_session: Mutex<Option<SessionHook>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ServerHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHttpTransport")
            .field("session_id", &self.session_id())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for ServerHttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHttpTransport {
    /// Creates an idle transport. The session id does not exist until the
    /// buyer sends `initialize`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Mutex::new(None),
            waiters: Mutex::new(HashMap::new()),
            events: Mutex::new(None),
            on_session: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers the hook called once, with the freshly minted session id,
    /// when the buyer initializes.
    pub fn on_session_initialized(&self, hook: impl FnOnce(String) + Send + 'static) {
        *self.on_session.lock().expect("session hook lock poisoned") = Some(Box::new(hook));
    }

    /// The session id, once issued.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().expect("session id lock poisoned").clone()
    }

    /// Feeds one buyer message into the bridge.
    ///
    /// For requests this suspends until the bridge sends back the response
    /// with the same id; the proxy's HTTP handler awaits it as the POST
    /// body. Notifications and client responses return
    /// [`ServerReply::Accepted`] right away.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the transport is closed, or
    /// closes while the request is waiting for its response.
    pub async fn handle_message(&self, message: Value) -> Result<ServerReply, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        if !jsonrpc::is_request(&message) {
            self.dispatch(message).await;
            return Ok(ServerReply::Accepted);
        }
        let id = jsonrpc::request_id(&message).expect("is_request implies an id");

        if jsonrpc::method(&message) == Some("initialize") {
            self.issue_session_id();
        }

        let receiver = {
            let (sender, receiver) = oneshot::channel();
            // A duplicate in-flight id replaces the old waiter; the
            // earlier HTTP request fails rather than hanging forever.
            self.waiters
                .lock()
                .expect("waiters lock poisoned")
                .insert(id, sender);
            receiver
        };

        self.dispatch(message).await;

        match receiver.await {
            Ok(response) => Ok(ServerReply::Response(response)),
            Err(_) => Err(TransportError::Closed),
        }
    }

    fn issue_session_id(&self) {
        let mut slot = self.session_id.lock().expect("session id lock poisoned");
        if slot.is_some() {
            return;
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        *slot = Some(session_id.clone());
        drop(slot);

        tracing::debug!(session_id, "session initialized");
        let hook = self.on_session.lock().expect("session hook lock poisoned").take();
        if let Some(hook) = hook {
            hook(session_id);
        }
    }

    async fn dispatch(&self, message: Value) {
        let events = self.events.lock().expect("events lock poisoned").clone();
        if let Some(events) = events {
            events.on_message(message).await;
        } else {
            tracing::warn!("server transport received a message before the bridge started");
        }
    }
}

impl Transport for ServerHttpTransport {
    fn start(&self, events: Arc<dyn TransportEvents>) -> BoxFuture<'_, Result<(), TransportError>> {
        *self.events.lock().expect("events lock poisoned") = Some(events);
        Box::pin(async { Ok(()) })
    }

    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            let waiter = jsonrpc::request_id(&message).and_then(|id| {
                self.waiters
                    .lock()
                    .expect("waiters lock poisoned")
                    .remove(&id)
            });

            match waiter {
                Some(sender) => {
                    // The buyer may have disconnected while the response
                    // was in flight; that is not the bridge's problem.
                    let _ = sender.send(message);
                }
                None => {
                    // Upstream notifications and server-initiated requests
                    // have no waiting POST in this transport; there is no
                    // open stream to push them down.
                    tracing::debug!("dropping message with no waiting client request");
                }
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            *self.events.lock().expect("events lock poisoned") = None;
            // Dropping the senders fails every suspended POST with Closed.
            self.waiters.lock().expect("waiters lock poisoned").clear();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Echoes every request straight back as a response, like a
    /// zero-latency bridge.
    struct EchoSink {
        transport: Arc<ServerHttpTransport>,
    }

    impl TransportEvents for EchoSink {
        fn on_message(&self, message: Value) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                if let Some(id) = jsonrpc::request_id(&message) {
                    let response = json!({"jsonrpc": "2.0", "id": id.to_value(), "result": {"echo": true}});
                    self.transport.send(response).await.unwrap();
                }
            })
        }

        fn on_error(&self, _error: TransportError) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }

        fn on_close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    async fn started_transport() -> Arc<ServerHttpTransport> {
        let transport = Arc::new(ServerHttpTransport::new());
        let sink = Arc::new(EchoSink {
            transport: transport.clone(),
        });
        transport.start(sink).await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_request_suspends_until_response() {
        let transport = started_transport().await;
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}});

        match transport.handle_message(request).await.unwrap() {
            ServerReply::Response(response) => {
                assert_eq!(response["id"], 1);
                assert_eq!(response["result"]["echo"], true);
            }
            ServerReply::Accepted => panic!("expected a response body"),
        }
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let transport = started_transport().await;
        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(matches!(
            transport.handle_message(note).await.unwrap(),
            ServerReply::Accepted
        ));
    }

    #[tokio::test]
    async fn test_session_id_minted_on_initialize_only_once() {
        let transport = started_transport().await;
        let issued: Arc<Mutex<Vec<String>>> = Arc::default();
        {
            let issued = issued.clone();
            transport.on_session_initialized(move |sid| issued.lock().unwrap().push(sid));
        }
        assert!(transport.session_id().is_none());

        let init = json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}});
        transport.handle_message(init.clone()).await.unwrap();
        let first = transport.session_id().unwrap();

        transport.handle_message(init).await.unwrap();
        assert_eq!(transport.session_id().unwrap(), first);
        assert_eq!(issued.lock().unwrap().as_slice(), &[first]);
    }

    #[tokio::test]
    async fn test_close_fails_suspended_requests() {
        let transport = Arc::new(ServerHttpTransport::new());

        /// Swallows requests so they stay suspended.
        struct NullSink;
        impl TransportEvents for NullSink {
            fn on_message(&self, _message: Value) -> BoxFuture<'_, ()> {
                Box::pin(async {})
            }
            fn on_error(&self, _error: TransportError) -> BoxFuture<'_, ()> {
                Box::pin(async {})
            }
            fn on_close(&self) -> BoxFuture<'_, ()> {
                Box::pin(async {})
            }
        }
        transport.start(Arc::new(NullSink)).await.unwrap();

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .handle_message(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
                    .await
            })
        };
        tokio::task::yield_now().await;

        transport.close().await;
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
