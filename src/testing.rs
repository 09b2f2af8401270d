//! Scripted backend used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::transport::{Action, ActionRequest, Backend, DispatchError, Envelope};

type Handler = Box<dyn Fn(&ActionRequest) -> Result<Envelope, DispatchError> + Send + Sync>;

/// Records every request and answers from per-action handlers.
///
/// Actions without a handler succeed with an empty-but-valid body. An action
/// can be held so its responses wait for an explicit release.
pub struct MockBackend {
    calls: Mutex<Vec<ActionRequest>>,
    handlers: Mutex<HashMap<Action, Arc<Handler>>>,
    gates: Mutex<HashMap<Action, Arc<Notify>>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn respond<F>(&self, action: Action, handler: F)
    where
        F: Fn(&ActionRequest) -> Result<Envelope, DispatchError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(action, Arc::new(Box::new(handler)));
    }

    /// Hold responses for `action`; each `notify_one` releases one of them.
    pub fn hold(&self, action: Action) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(action, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<ActionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, action: Action) -> Vec<ActionRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == action)
            .collect()
    }

    fn default_response(action: Action) -> Envelope {
        match action {
            Action::LoadHistory => Envelope::ok(json!({ "projects": [], "conversations": [] })),
            Action::LoadNotes => Envelope::ok(json!({ "notes": "" })),
            Action::Chat => Envelope::ok(json!({ "reply": "ok", "conversation_id": null })),
            _ => Envelope::ok(json!({})),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn dispatch(&self, request: ActionRequest) -> Result<Envelope, DispatchError> {
        self.calls.lock().unwrap().push(request.clone());

        let gate = self.gates.lock().unwrap().get(&request.action).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let handler = self.handlers.lock().unwrap().get(&request.action).cloned();
        match handler {
            Some(handler) => handler(&request),
            None => Ok(Self::default_response(request.action)),
        }
    }
}
