use crate::error::PreconditionFailure;
use crate::models::{ConversationId, ProjectId};

/// Where the active conversation stands. The client never invents ids, so a
/// first send moves `Unset` to `Pending` until the server answers with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationSlot {
    #[default]
    Unset,
    Pending,
    Active(ConversationId),
}

impl ConversationSlot {
    pub fn id(&self) -> Option<ConversationId> {
        match self {
            ConversationSlot::Active(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoProjectSelected,
    NoConversation(ProjectId),
    ConversationActive(ProjectId, ConversationId),
}

/// The session pointer as it was when a request was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerSnapshot {
    epoch: u64,
    pub project_id: Option<ProjectId>,
}

/// Active project and conversation. Mutated only through the named
/// transitions below.
///
/// Invariant: the conversation slot is `Unset` whenever no project is active.
#[derive(Debug, Default)]
pub struct SessionState {
    project: Option<ProjectId>,
    conversation: ConversationSlot,
    epoch: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_project(&self) -> Option<ProjectId> {
        self.project
    }

    pub fn conversation(&self) -> ConversationSlot {
        self.conversation
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.conversation.id()
    }

    pub fn phase(&self) -> Phase {
        match (self.project, self.conversation) {
            (None, _) => Phase::NoProjectSelected,
            (Some(p), ConversationSlot::Active(c)) => Phase::ConversationActive(p, c),
            (Some(p), _) => Phase::NoConversation(p),
        }
    }

    pub fn snapshot(&self) -> PointerSnapshot {
        PointerSnapshot {
            epoch: self.epoch,
            project_id: self.project,
        }
    }

    /// False once any navigation happened after `snapshot` was taken.
    pub fn is_current(&self, snapshot: &PointerSnapshot) -> bool {
        self.epoch == snapshot.epoch
    }

    /// Invalidate responses to requests dispatched so far.
    pub fn begin_navigation(&mut self) {
        self.epoch += 1;
    }

    pub fn check_invariant(&self) -> Result<(), PreconditionFailure> {
        if self.project.is_none() && self.conversation != ConversationSlot::Unset {
            return Err(PreconditionFailure::NoActiveProject);
        }
        Ok(())
    }

    /// Always leaves the conversation unset, even when re-selecting the same project.
    pub fn select_project(&mut self, project_id: ProjectId) {
        self.project = Some(project_id);
        self.conversation = ConversationSlot::Unset;
        self.begin_navigation();
    }

    pub fn new_chat(&mut self) -> Result<ProjectId, PreconditionFailure> {
        let project_id = self.project.ok_or(PreconditionFailure::NoActiveProject)?;
        self.conversation = ConversationSlot::Unset;
        self.begin_navigation();
        Ok(project_id)
    }

    pub fn select_conversation(&mut self, project_id: ProjectId, conversation_id: ConversationId) {
        self.project = Some(project_id);
        self.conversation = ConversationSlot::Active(conversation_id);
        self.begin_navigation();
    }

    /// Target of the next chat send. An unset slot becomes `Pending`.
    pub fn begin_send(
        &mut self,
    ) -> Result<(ProjectId, Option<ConversationId>), PreconditionFailure> {
        self.check_invariant()?;
        let project_id = self.project.ok_or(PreconditionFailure::NoActiveProject)?;
        match self.conversation {
            ConversationSlot::Active(id) => Ok((project_id, Some(id))),
            ConversationSlot::Pending => Ok((project_id, None)),
            ConversationSlot::Unset => {
                self.conversation = ConversationSlot::Pending;
                Ok((project_id, None))
            }
        }
    }

    /// Take the id minted by the server. Only a pending slot adopts.
    pub fn adopt_conversation(&mut self, conversation_id: ConversationId) -> bool {
        if self.conversation == ConversationSlot::Pending && self.project.is_some() {
            self.conversation = ConversationSlot::Active(conversation_id);
            true
        } else {
            false
        }
    }

    pub fn abandon_pending(&mut self) {
        if self.conversation == ConversationSlot::Pending {
            self.conversation = ConversationSlot::Unset;
        }
    }

    /// Back to "new chat" within the active project.
    pub fn clear_conversation(&mut self) {
        self.conversation = ConversationSlot::Unset;
        self.begin_navigation();
    }

    pub fn reset(&mut self) {
        self.project = None;
        self.conversation = ConversationSlot::Unset;
        self.begin_navigation();
    }
}
