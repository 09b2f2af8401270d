use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

const GENERIC_FAILURE: &str = "The request could not be completed.";

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The request never reached the server or no response came back.
    #[error("Network error: {0}")]
    Transport(String),

    /// The server answered but rejected the operation.
    #[error("{0}")]
    Application(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be encoded; nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Application,
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Application(_) | DispatchError::InvalidRequest(_) => {
                FailureKind::Application
            }
            DispatchError::Transport(_) | DispatchError::InvalidResponse(_) => {
                FailureKind::Transport
            }
        }
    }
}

/// Every action the session client sends to the backend endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    LoadHistory,
    CreateProject,
    DeleteProject,
    DeleteConversation,
    LoadConversation,
    Chat,
    LoadNotes,
    SaveNotes,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::LoadHistory => "load_history",
            Action::CreateProject => "create_project",
            Action::DeleteProject => "delete_project",
            Action::DeleteConversation => "delete_conversation",
            Action::LoadConversation => "load_conversation",
            Action::Chat => "chat",
            Action::LoadNotes => "load_notes",
            Action::SaveNotes => "save_notes",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "load_history" => Some(Action::LoadHistory),
            "create_project" => Some(Action::CreateProject),
            "delete_project" => Some(Action::DeleteProject),
            "delete_conversation" => Some(Action::DeleteConversation),
            "load_conversation" => Some(Action::LoadConversation),
            "chat" => Some(Action::Chat),
            "load_notes" => Some(Action::LoadNotes),
            "save_notes" => Some(Action::SaveNotes),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ActionRequest {
    pub request_id: Uuid,
    pub action: Action,
    pub credential: String,
    /// A JSON object (or `Null` for actions without arguments).
    pub payload: Value,
}

impl std::fmt::Debug for ActionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRequest")
            .field("request_id", &self.request_id)
            .field("action", &self.action)
            .field("credential", &"***")
            .field("payload", &self.payload)
            .finish()
    }
}

/// Response body of the action endpoint: `{success, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::json!({ "message": message.into() }),
        }
    }

    pub fn into_result(self) -> Result<Value, DispatchError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(DispatchError::Application(failure_message(&self.data)))
        }
    }
}

fn failure_message(data: &Value) -> String {
    let message = match data {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("message").and_then(Value::as_str),
        _ => None,
    };
    match message {
        Some(m) if !m.trim().is_empty() => m.to_string(),
        _ => GENERIC_FAILURE.to_string(),
    }
}
