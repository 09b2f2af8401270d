use crate::models::{Conversation, ConversationId, Project, ProjectId};
use crate::services::api::History;

pub const NO_PROJECTS_PLACEHOLDER: &str = "No projects yet.";
pub const NO_CONVERSATIONS_PLACEHOLDER: &str = "No conversations yet.";

/// One rendered row of the history panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryRow {
    Loading,
    Placeholder(&'static str),
    Project {
        id: ProjectId,
        name: String,
        active: bool,
    },
    Conversation {
        id: ConversationId,
        title: String,
        project_id: ProjectId,
        active: bool,
    },
}

/// The last loaded history, replaced wholesale on every load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HistoryView {
    #[default]
    Loading,
    Loaded(History),
}

impl HistoryView {
    pub fn replace(&mut self, history: History) {
        *self = HistoryView::Loaded(history);
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, HistoryView::Loaded(_))
    }

    pub fn projects(&self) -> &[Project] {
        match self {
            HistoryView::Loaded(h) => &h.projects,
            HistoryView::Loading => &[],
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        match self {
            HistoryView::Loaded(h) => &h.conversations,
            HistoryView::Loading => &[],
        }
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects().iter().find(|p| p.id == id)
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations().iter().find(|c| c.id == id)
    }

    pub fn project_rows(&self, active: Option<ProjectId>) -> Vec<HistoryRow> {
        match self {
            HistoryView::Loading => vec![HistoryRow::Loading],
            HistoryView::Loaded(h) if h.projects.is_empty() => {
                vec![HistoryRow::Placeholder(NO_PROJECTS_PLACEHOLDER)]
            }
            HistoryView::Loaded(h) => h
                .projects
                .iter()
                .map(|p| HistoryRow::Project {
                    id: p.id,
                    name: p.name.clone(),
                    active: Some(p.id) == active,
                })
                .collect(),
        }
    }

    pub fn conversation_rows(&self, active: Option<ConversationId>) -> Vec<HistoryRow> {
        match self {
            HistoryView::Loading => vec![HistoryRow::Loading],
            HistoryView::Loaded(h) if h.conversations.is_empty() => {
                vec![HistoryRow::Placeholder(NO_CONVERSATIONS_PLACEHOLDER)]
            }
            HistoryView::Loaded(h) => h
                .conversations
                .iter()
                .map(|c| HistoryRow::Conversation {
                    id: c.id,
                    title: c.display_title().to_string(),
                    project_id: c.project_id,
                    active: Some(c.id) == active,
                })
                .collect(),
        }
    }
}
