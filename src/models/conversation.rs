use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, ProjectId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    pub project_id: ProjectId,
}

impl Conversation {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled chat"
        } else {
            &self.title
        }
    }
}
