use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::transport::{Action, ActionRequest, Backend, DispatchError};

/// Global "request outstanding" indicator shared by every dispatch.
#[derive(Debug, Clone)]
pub struct BusyIndicator {
    outstanding: Arc<AtomicUsize>,
    tx: Arc<watch::Sender<bool>>,
}

impl BusyIndicator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            outstanding: Arc::new(AtomicUsize::new(0)),
            tx: Arc::new(tx),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) > 0
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn enter(&self) -> BusyGuard {
        if self.outstanding.fetch_add(1, Ordering::SeqCst) == 0 {
            self.tx.send_replace(true);
        }
        BusyGuard {
            indicator: self.clone(),
        }
    }
}

impl Default for BusyIndicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the indicator raised until dropped.
pub struct BusyGuard {
    indicator: BusyIndicator,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.indicator.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.indicator.tx.send_replace(false);
        }
    }
}

/// The single outbound channel for backend calls.
///
/// Attaches the session credential to every request. Concurrent calls are
/// allowed; callers disable their own triggering control while waiting.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    credential: Arc<str>,
    busy: BusyIndicator,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, credential: impl Into<String>) -> Self {
        Self {
            backend,
            credential: Arc::from(credential.into()),
            busy: BusyIndicator::new(),
        }
    }

    pub fn busy(&self) -> &BusyIndicator {
        &self.busy
    }

    /// Dispatch with the busy indicator raised for the duration of the call.
    pub async fn send(&self, action: Action, payload: Value) -> Result<Value, DispatchError> {
        let _guard = self.busy.enter();
        self.dispatch(action, payload).await
    }

    /// Dispatch without touching the busy indicator.
    pub async fn send_quiet(&self, action: Action, payload: Value) -> Result<Value, DispatchError> {
        self.dispatch(action, payload).await
    }

    async fn dispatch(&self, action: Action, payload: Value) -> Result<Value, DispatchError> {
        let request = ActionRequest {
            request_id: Uuid::new_v4(),
            action,
            credential: self.credential.to_string(),
            payload,
        };
        let request_id = request.request_id;

        tracing::debug!(
            %request_id,
            action = action.as_str(),
            backend = self.backend.name(),
            "dispatching request"
        );

        let result = match self.backend.dispatch(request).await {
            Ok(envelope) => envelope.into_result(),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => tracing::debug!(%request_id, action = action.as_str(), "request succeeded"),
            Err(e) => tracing::warn!(
                %request_id,
                action = action.as_str(),
                kind = ?e.kind(),
                "request failed: {}",
                e
            ),
        }

        result
    }
}
