//! Elicitation coordination
//!
//! Servers ask for structured user input with an [`ElicitationRequest`]. The
//! [`ElicitationCoordinator`] hands the request to each registered
//! [`ElicitationHandler`] in turn until one returns a usable answer:
//!
//! - an `Err` (or a panic) from a handler is logged and the next one is tried
//! - an `accept` whose values fail [`validate_values`] is discarded the same way
//! - `decline` and `cancel` are returned as-is, minus any stray values
//!
//! When no handler produces an answer the request is cancelled with the
//! reason `"No elicitation handler available"`. Every request is tracked in
//! the active set from arrival until its answer is produced.

mod validation;

pub use validation::validate_values;

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use relaymcp_protocol::elicitation::{ElicitationAction, ElicitationRequest, ElicitationResponse};
use relaymcp_protocol::{McpError, McpResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::handlers::ElicitationHandler;
use crate::subscribers::{SubscriberRegistry, Subscription};

/// Reason attached to the fallback `cancel` response
pub const NO_HANDLER_REASON: &str = "No elicitation handler available";

const INVALID_FORMAT: &str = "Invalid elicitation request format";
const ALREADY_ACTIVE: &str = "Elicitation request with this id is already in progress";

/// Routes elicitation requests through the registered handlers
pub struct ElicitationCoordinator {
    handlers: Arc<SubscriberRegistry<dyn ElicitationHandler>>,
    active: Mutex<Vec<ElicitationRequest>>,
}

impl ElicitationCoordinator {
    /// Coordinator with no handlers
    pub fn new() -> Self {
        Self {
            handlers: SubscriberRegistry::new(),
            active: Mutex::new(Vec::new()),
        }
    }

    /// Add a handler after those already registered
    pub fn register_handler(&self, handler: Arc<dyn ElicitationHandler>) -> Subscription {
        let subscription = self.handlers.subscribe(handler);
        debug!(handler = %subscription.id(), "Elicitation handler registered");
        subscription
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Requests currently being handled, in arrival order
    pub fn active_requests(&self) -> Vec<ElicitationRequest> {
        self.active.lock().clone()
    }

    /// Whether a request with `id` is being handled
    pub fn is_active(&self, id: &str) -> bool {
        self.active.lock().iter().any(|request| request.id == id)
    }

    /// Parse a raw request and handle it
    ///
    /// # Errors
    ///
    /// Returns [`McpError::invalid_request`] when `value` is not a well-formed
    /// elicitation request, or for the reasons listed on
    /// [`handle_request`](Self::handle_request).
    pub async fn handle_value(&self, value: Value) -> McpResult<ElicitationResponse> {
        self.handle_request(parse_request(value)?).await
    }

    /// Produce exactly one response for `request`
    ///
    /// # Errors
    ///
    /// Returns [`McpError::invalid_request`] when the id or title is empty,
    /// when two fields share a name, or when a request with the same id is
    /// already being handled. No handler is invoked in those cases.
    pub async fn handle_request(&self, request: ElicitationRequest) -> McpResult<ElicitationResponse> {
        check_shape(&request)?;
        let Some(active) = self.begin(&request) else {
            return Err(McpError::invalid_request(ALREADY_ACTIVE).with_request_id(request.id));
        };
        Ok(self.resolve(request, active).await)
    }

    /// Like [`handle_value`](Self::handle_value), but a request whose id is
    /// already being handled yields `Ok(None)` instead of an error
    ///
    /// The duplicate check and the insertion into the active set happen under
    /// one lock, so of several concurrent requests sharing an id exactly one
    /// gets `Some`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::invalid_request`] when `value` is not a well-formed
    /// elicitation request.
    pub async fn try_handle_value(&self, value: Value) -> McpResult<Option<ElicitationResponse>> {
        let request = parse_request(value)?;
        check_shape(&request)?;
        let Some(active) = self.begin(&request) else {
            debug!(request_id = %request.id, "Ignoring request for an id already in progress");
            return Ok(None);
        };
        Ok(Some(self.resolve(request, active).await))
    }

    async fn resolve(&self, request: ElicitationRequest, _active: ActiveGuard<'_>) -> ElicitationResponse {
        let id = request.id.clone();

        for handler in self.handlers.snapshot() {
            let outcome = AssertUnwindSafe(handler.handle_elicitation(request.clone()))
                .catch_unwind()
                .await;

            let response = match outcome {
                Ok(Ok(response)) => response.normalized(&id),
                Ok(Err(e)) => {
                    let error = McpError::from(&e);
                    warn!(
                        request_id = %id,
                        ?handler,
                        kind = %error.kind,
                        error = %error.message,
                        "Elicitation handler failed"
                    );
                    continue;
                }
                Err(_) => {
                    warn!(request_id = %id, ?handler, "Elicitation handler panicked");
                    continue;
                }
            };

            if response.action() == ElicitationAction::Accept {
                let values = response.values().cloned().unwrap_or_default();
                let errors = validate_values(&request.fields, &values);
                if !errors.is_empty() {
                    let summary: Vec<String> = errors.iter().map(ToString::to_string).collect();
                    warn!(
                        request_id = %id,
                        errors = ?summary,
                        "Discarding elicitation answer that failed validation"
                    );
                    continue;
                }
            }

            debug!(request_id = %id, action = %response.action(), "Elicitation resolved");
            return response;
        }

        debug!(request_id = %id, "No handler answered the elicitation");
        ElicitationResponse::cancel(id, Some(NO_HANDLER_REASON.to_string()))
    }

    /// Add `request` to the active set unless its id is already there; the
    /// guard removes it again
    fn begin(&self, request: &ElicitationRequest) -> Option<ActiveGuard<'_>> {
        let mut active = self.active.lock();
        if active.iter().any(|existing| existing.id == request.id) {
            warn!(request_id = %request.id, "Elicitation id is already active");
            return None;
        }
        active.push(request.clone());
        Some(ActiveGuard {
            active: &self.active,
            id: request.id.clone(),
        })
    }
}

impl Default for ElicitationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ElicitationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElicitationCoordinator")
            .field("handlers", &self.handlers.len())
            .field("active", &self.active.lock().len())
            .finish()
    }
}

struct ActiveGuard<'a> {
    active: &'a Mutex<Vec<ElicitationRequest>>,
    id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().retain(|request| request.id != self.id);
    }
}

fn parse_request(value: Value) -> McpResult<ElicitationRequest> {
    serde_json::from_value(value).map_err(|e| {
        debug!(error = %e, "Unparseable elicitation request");
        McpError::invalid_request(INVALID_FORMAT)
    })
}

/// Non-empty id and title, unique field names
fn check_shape(request: &ElicitationRequest) -> McpResult<()> {
    let mut names = HashSet::with_capacity(request.fields.len());
    let unique = request.fields.iter().all(|field| names.insert(field.name.as_str()));
    if request.id.is_empty() || request.title.is_empty() || !unique {
        return Err(McpError::invalid_request(INVALID_FORMAT).with_request_id(request.id.clone()));
    }
    Ok(())
}
