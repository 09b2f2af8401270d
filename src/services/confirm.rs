use crate::models::{ConversationId, ProjectId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Project { id: ProjectId, name: String },
    Conversation { id: ConversationId, title: String },
}

impl DeleteTarget {
    pub fn prompt(&self) -> String {
        match self {
            DeleteTarget::Project { name, .. } => format!(
                "Delete project \"{}\"? All of its conversations and notes will be removed.",
                name
            ),
            DeleteTarget::Conversation { title, .. } => {
                format!("Delete conversation \"{}\"?", title)
            }
        }
    }

    pub fn done_message(&self) -> String {
        match self {
            DeleteTarget::Project { name, .. } => format!("Project \"{}\" deleted.", name),
            DeleteTarget::Conversation { title, .. } => {
                format!("Conversation \"{}\" deleted.", title)
            }
        }
    }
}

/// An inline confirm/cancel affordance for a pending delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub target: DeleteTarget,
    pub prompt: String,
}

/// Two-step gate in front of delete calls. Only [`Confirmer::confirm`] hands
/// a target back for dispatch.
#[derive(Debug, Default)]
pub struct Confirmer {
    pending: Option<Confirmation>,
}

impl Confirmer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a confirmation, replacing any other pending one.
    pub fn request(&mut self, target: DeleteTarget) -> &Confirmation {
        let prompt = target.prompt();
        self.pending.insert(Confirmation { target, prompt })
    }

    pub fn pending(&self) -> Option<&Confirmation> {
        self.pending.as_ref()
    }

    pub fn confirm(&mut self) -> Option<DeleteTarget> {
        self.pending.take().map(|c| c.target)
    }

    pub fn cancel(&mut self) -> Option<DeleteTarget> {
        self.pending.take().map(|c| c.target)
    }
}
