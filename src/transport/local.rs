use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::Backend;
use super::types::{Action, ActionRequest, DispatchError, Envelope};
use crate::models::ids::deserialize_optional;
use crate::models::{ConversationId, Message, Note, Project, ProjectId, Sender};
use crate::services::database::Database;

/// Produces the assistant side of a chat exchange for the local backend.
pub trait Responder: Send + Sync {
    fn reply(&self, project: &Project, history: &[Message], message: &str) -> String;
}

/// Acknowledges each message without any inference.
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn reply(&self, project: &Project, history: &[Message], message: &str) -> String {
        let turn = history.iter().filter(|m| m.sender == Sender::User).count();
        format!(
            "[{} #{}] You said: {}",
            project.name,
            turn,
            message.trim()
        )
    }
}

/// Serves the action endpoint in-process on top of [`Database`].
pub struct LocalBackend {
    db: Database,
    credential: String,
    responder: Arc<dyn Responder>,
    latency: Option<Duration>,
}

#[derive(Deserialize)]
struct ChatArgs {
    message: String,
    project_id: ProjectId,
    #[serde(default, deserialize_with = "deserialize_optional")]
    conversation_id: Option<ConversationId>,
}

#[derive(Deserialize)]
struct ProjectArgs {
    project_id: ProjectId,
}

#[derive(Deserialize)]
struct ConversationArgs {
    conversation_id: ConversationId,
}

#[derive(Deserialize)]
struct CreateProjectArgs {
    name: String,
}

#[derive(Deserialize)]
struct SaveNotesArgs {
    project_id: ProjectId,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    revision: u64,
}

fn args<T: for<'de> Deserialize<'de>>(request: &ActionRequest) -> Result<T, String> {
    serde_json::from_value(request.payload.clone())
        .map_err(|e| format!("Invalid {} request: {}", request.action.as_str(), e))
}

impl LocalBackend {
    pub fn new(db: Database, credential: impl Into<String>) -> Self {
        Self {
            db,
            credential: credential.into(),
            responder: Arc::new(EchoResponder),
            latency: None,
        }
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = responder;
        self
    }

    /// Delay every response, to exercise slow-network behaviour.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn handle(&self, request: &ActionRequest) -> Result<Value, String> {
        match request.action {
            Action::LoadHistory => {
                let projects = self.db.list_projects().await.map_err(internal)?;
                let conversations = self.db.list_conversations().await.map_err(internal)?;
                Ok(json!({ "projects": projects, "conversations": conversations }))
            }
            Action::CreateProject => {
                let CreateProjectArgs { name } = args(request)?;
                let name = name.trim();
                if name.is_empty() {
                    return Err("Project name cannot be empty.".to_string());
                }
                let project = self.db.insert_project(name).await.map_err(internal)?;
                Ok(json!({ "id": project.id, "name": project.name }))
            }
            Action::DeleteProject => {
                let ProjectArgs { project_id } = args(request)?;
                if !self.db.delete_project(project_id).await.map_err(internal)? {
                    return Err("Project not found.".to_string());
                }
                Ok(json!({ "message": "Project deleted." }))
            }
            Action::DeleteConversation => {
                let ConversationArgs { conversation_id } = args(request)?;
                if !self
                    .db
                    .delete_conversation(conversation_id)
                    .await
                    .map_err(internal)?
                {
                    return Err("Conversation not found.".to_string());
                }
                Ok(json!({ "message": "Conversation deleted." }))
            }
            Action::LoadConversation => {
                let ConversationArgs { conversation_id } = args(request)?;
                let conversation = self
                    .db
                    .get_conversation(conversation_id)
                    .await
                    .map_err(internal)?
                    .ok_or_else(|| "Conversation not found.".to_string())?;
                let project = self.project(conversation.project_id).await?;
                let messages = self
                    .db
                    .list_messages(conversation_id)
                    .await
                    .map_err(internal)?;
                Ok(json!({
                    "messages": messages,
                    "project_id": project.id,
                    "project_name": project.name,
                }))
            }
            Action::Chat => self.chat(args(request)?).await,
            Action::LoadNotes => {
                let ProjectArgs { project_id } = args(request)?;
                self.project(project_id).await?;
                let note = self.db.get_note(project_id).await.map_err(internal)?;
                Ok(json!({ "notes": note.map(|n| n.content).unwrap_or_default() }))
            }
            Action::SaveNotes => {
                let SaveNotesArgs {
                    project_id,
                    notes,
                    revision,
                } = args(request)?;
                self.project(project_id).await?;
                self.db
                    .upsert_note(&Note {
                        project_id,
                        content: notes,
                        revision,
                    })
                    .await
                    .map_err(internal)?;
                Ok(json!({ "message": "Notes saved." }))
            }
        }
    }

    async fn chat(&self, args: ChatArgs) -> Result<Value, String> {
        let message = args.message.trim();
        if message.is_empty() {
            return Err("Message cannot be empty.".to_string());
        }
        let project = self.project(args.project_id).await?;

        let conversation_id = match args.conversation_id {
            Some(id) => {
                let conversation = self
                    .db
                    .get_conversation(id)
                    .await
                    .map_err(internal)?
                    .ok_or_else(|| "Conversation not found.".to_string())?;
                if conversation.project_id != project.id {
                    return Err("Conversation does not belong to this project.".to_string());
                }
                id
            }
            None => {
                self.db
                    .insert_conversation(project.id, &truncate_title(message))
                    .await
                    .map_err(internal)?
                    .id
            }
        };

        self.db
            .insert_message(conversation_id, &Message::new(Sender::User, message))
            .await
            .map_err(internal)?;

        let history = self
            .db
            .list_messages(conversation_id)
            .await
            .map_err(internal)?;
        let reply = self.responder.reply(&project, &history, message);

        self.db
            .insert_message(conversation_id, &Message::new(Sender::Assistant, reply.clone()))
            .await
            .map_err(internal)?;
        if let Err(e) = self.db.touch_conversation(conversation_id).await {
            tracing::warn!("Failed to update conversation timestamp: {}", e);
        }

        Ok(json!({ "reply": reply, "conversation_id": conversation_id }))
    }

    async fn project(&self, id: ProjectId) -> Result<Project, String> {
        self.db
            .get_project(id)
            .await
            .map_err(internal)?
            .ok_or_else(|| "Project not found.".to_string())
    }
}

fn internal(e: anyhow::Error) -> String {
    tracing::error!("Local backend failure: {:#}", e);
    "An internal error occurred.".to_string()
}

/// Truncate text to a short title for conversations.
pub fn truncate_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.len() > 50 {
        let boundary = first_line
            .char_indices()
            .take_while(|(i, _)| *i < 47)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(47);
        format!("{}...", &first_line[..boundary])
    } else {
        first_line.to_string()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn dispatch(&self, request: ActionRequest) -> Result<Envelope, DispatchError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if request.credential != self.credential {
            return Ok(Envelope::failure("Security check failed."));
        }

        Ok(match self.handle(&request).await {
            Ok(data) => Envelope::ok(data),
            Err(message) => Envelope::failure(message),
        })
    }
}
