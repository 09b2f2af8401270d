use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::ids::deserialize_optional;
use crate::models::{Conversation, ConversationId, Message, Project, ProjectId};
use crate::services::dispatcher::Dispatcher;
use crate::transport::{Action, DispatchError};

/// Everything the history panel shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct History {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadedConversation {
    #[serde(default)]
    pub messages: Vec<Message>,
    pub project_id: ProjectId,
    #[serde(default)]
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    /// Set when the server minted (or confirmed) the conversation.
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub conversation_id: Option<ConversationId>,
}

#[derive(Deserialize)]
struct CreatedProject {
    #[serde(alias = "project_id")]
    id: ProjectId,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct LoadedNotes {
    #[serde(default)]
    notes: Option<String>,
}

fn decode<T: DeserializeOwned>(action: Action, data: Value) -> Result<T, DispatchError> {
    serde_json::from_value(data).map_err(|e| {
        DispatchError::InvalidResponse(format!("unexpected {} response: {}", action.as_str(), e))
    })
}

/// Typed calls for every action the session client consumes.
#[derive(Clone)]
pub struct SessionApi {
    dispatcher: Dispatcher,
}

impl SessionApi {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn load_history(&self) -> Result<History, DispatchError> {
        let data = self.dispatcher.send(Action::LoadHistory, Value::Null).await?;
        decode(Action::LoadHistory, data)
    }

    pub async fn create_project(&self, name: &str) -> Result<Project, DispatchError> {
        let data = self
            .dispatcher
            .send(Action::CreateProject, json!({ "name": name }))
            .await?;
        let created: CreatedProject = decode(Action::CreateProject, data)?;
        Ok(Project {
            id: created.id,
            name: created
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| name.to_string()),
        })
    }

    pub async fn delete_project(&self, id: ProjectId) -> Result<(), DispatchError> {
        self.dispatcher
            .send(Action::DeleteProject, json!({ "project_id": id }))
            .await?;
        Ok(())
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> Result<(), DispatchError> {
        self.dispatcher
            .send(Action::DeleteConversation, json!({ "conversation_id": id }))
            .await?;
        Ok(())
    }

    pub async fn load_conversation(
        &self,
        id: ConversationId,
    ) -> Result<LoadedConversation, DispatchError> {
        let data = self
            .dispatcher
            .send(Action::LoadConversation, json!({ "conversation_id": id }))
            .await?;
        decode(Action::LoadConversation, data)
    }

    pub async fn chat(
        &self,
        message: &str,
        project_id: ProjectId,
        conversation_id: Option<ConversationId>,
    ) -> Result<ChatReply, DispatchError> {
        let data = self
            .dispatcher
            .send(
                Action::Chat,
                json!({
                    "message": message,
                    "project_id": project_id,
                    "conversation_id": conversation_id,
                }),
            )
            .await?;
        decode(Action::Chat, data)
    }

    pub async fn load_notes(&self, project_id: ProjectId) -> Result<String, DispatchError> {
        let data = self
            .dispatcher
            .send(Action::LoadNotes, json!({ "project_id": project_id }))
            .await?;
        let notes: LoadedNotes = decode(Action::LoadNotes, data)?;
        Ok(notes.notes.unwrap_or_default())
    }

    /// Explicit save; raises the busy indicator like any other call.
    pub async fn save_notes(
        &self,
        project_id: ProjectId,
        content: &str,
        revision: u64,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .send(Action::SaveNotes, Self::notes_payload(project_id, content, revision))
            .await?;
        Ok(())
    }

    /// Background save used by autosave; never raises the busy indicator.
    pub async fn autosave_notes(
        &self,
        project_id: ProjectId,
        content: &str,
        revision: u64,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .send_quiet(Action::SaveNotes, Self::notes_payload(project_id, content, revision))
            .await?;
        Ok(())
    }

    fn notes_payload(project_id: ProjectId, content: &str, revision: u64) -> Value {
        json!({
            "project_id": project_id,
            "notes": content,
            "revision": revision,
        })
    }
}
