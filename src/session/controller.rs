use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::error::PreconditionFailure;
use crate::models::{ConversationId, Note, Project, ProjectId};
use crate::services::api::{ChatReply, History, LoadedConversation, SessionApi};
use crate::services::confirm::{Confirmation, Confirmer, DeleteTarget};
use crate::services::dispatcher::Dispatcher;
use crate::services::export::export_to_markdown;
use crate::services::history::{HistoryRow, HistoryView};
use crate::services::notes::{DebounceTicket, NotesEngine, SaveStatus};
use crate::session::state::{Phase, PointerSnapshot, SessionState};
use crate::session::view::{Notice, NoticeLevel, Transcript, TranscriptEntry};
use crate::transport::DispatchError;

/// User intents coming from the front end.
#[derive(Debug, Clone)]
pub enum SessionMsg {
    Init,
    RefreshHistory,
    CreateProject(String),
    SelectProject(ProjectId),
    NewChat,
    SelectConversation(ConversationId),
    ComposerChanged(String),
    SendMessage(String),
    NoteEdited(String),
    SaveNotes,
    RequestDeleteProject(ProjectId),
    RequestDeleteConversation(ConversationId),
    ConfirmDelete,
    CancelDelete,
}

/// Completions reported back by spawned work.
#[derive(Debug)]
pub enum SessionCmd {
    HistoryLoaded {
        seq: u64,
        result: Result<History, DispatchError>,
    },
    ProjectCreated(Result<Project, DispatchError>),
    ConversationLoaded {
        snapshot: PointerSnapshot,
        seq: u64,
        conversation_id: ConversationId,
        result: Result<LoadedConversation, DispatchError>,
    },
    ChatReplied {
        snapshot: PointerSnapshot,
        sent_conversation: Option<ConversationId>,
        result: Result<ChatReply, DispatchError>,
    },
    NotesLoaded {
        project_id: ProjectId,
        revision: u64,
        result: Result<String, DispatchError>,
    },
    NoteSaved {
        project_id: ProjectId,
        revision: u64,
        explicit: bool,
        result: Result<(), DispatchError>,
    },
    AutosaveDue {
        project_id: ProjectId,
        generation: u64,
    },
    Deleted {
        target: DeleteTarget,
        result: Result<(), DispatchError>,
    },
}

impl SessionCmd {
    fn completes_request(&self) -> bool {
        !matches!(self, SessionCmd::AutosaveDue { .. })
    }
}

/// Owns the session and applies every mutation on the caller's task.
///
/// Requests run on spawned tasks and report back as [`SessionCmd`]s, which
/// the owner feeds to [`SessionController::update_cmd`].
pub struct SessionController {
    api: SessionApi,
    state: SessionState,
    history: HistoryView,
    transcript: Transcript,
    notes: NotesEngine,
    confirmer: Confirmer,
    notices: Vec<Notice>,
    composer: String,
    sending: bool,
    project_name: Option<String>,
    conversation_title: Option<String>,
    in_flight: usize,
    /// Last history load dispatched, and the newest one applied.
    history_requested: u64,
    history_applied: u64,
    /// Latest conversation open; only its response may switch the session.
    open_seq: u64,
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
}

impl SessionController {
    pub fn new(dispatcher: Dispatcher, autosave_debounce: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            api: SessionApi::new(dispatcher),
            state: SessionState::new(),
            history: HistoryView::default(),
            transcript: Transcript::default(),
            notes: NotesEngine::new(autosave_debounce),
            confirmer: Confirmer::new(),
            notices: Vec::new(),
            composer: String::new(),
            sending: false,
            project_name: None,
            conversation_title: None,
            in_flight: 0,
            history_requested: 0,
            history_applied: 0,
            open_seq: 0,
            cmd_tx,
            cmd_rx,
        }
    }

    // --- Read side ---

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn history(&self) -> &HistoryView {
        &self.history
    }

    pub fn project_rows(&self) -> Vec<HistoryRow> {
        self.history.project_rows(self.state.active_project())
    }

    pub fn conversation_rows(&self) -> Vec<HistoryRow> {
        self.history
            .conversation_rows(self.state.active_conversation())
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn conversation_title(&self) -> Option<&str> {
        self.conversation_title.as_deref()
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn note_text(&self) -> &str {
        match self.state.active_project() {
            Some(p) => self.notes.text(p),
            None => "",
        }
    }

    pub fn note_status(&self) -> Option<SaveStatus> {
        self.state.active_project().map(|p| self.notes.status(p))
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Whether the send control is enabled.
    pub fn can_send(&self) -> bool {
        !self.sending && self.state.active_project().is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.api.dispatcher().busy().is_busy()
    }

    pub fn busy_updates(&self) -> watch::Receiver<bool> {
        self.api.dispatcher().busy().subscribe()
    }

    pub fn confirmation(&self) -> Option<&Confirmation> {
        self.confirmer.pending()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn export_markdown(&self) -> Result<String, PreconditionFailure> {
        let project_name = self
            .project_name
            .as_deref()
            .ok_or(PreconditionFailure::NoActiveProject)?;
        Ok(export_to_markdown(
            project_name,
            self.conversation_title.as_deref(),
            self.transcript.entries(),
            Utc::now(),
        ))
    }

    // --- Event loop plumbing ---

    pub async fn next_cmd(&mut self) -> Option<SessionCmd> {
        self.cmd_rx.recv().await
    }

    pub fn try_next_cmd(&mut self) -> Option<SessionCmd> {
        self.cmd_rx.try_recv().ok()
    }

    /// Apply completions until no request is outstanding. Debounce timers
    /// that fire meanwhile are applied too, but are not waited for.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.cmd_rx.recv().await {
                Some(cmd) => self.update_cmd(cmd),
                None => break,
            }
        }
    }

    /// Flush the active note and wait for outstanding requests.
    pub async fn shutdown(&mut self) {
        self.flush_active_notes();
        self.settle().await;
    }

    fn command<F>(&mut self, work: F)
    where
        F: Future<Output = SessionCmd> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(work.await);
        });
    }

    fn notify(&mut self, level: NoticeLevel, text: impl Into<String>) {
        self.notices.push(Notice {
            level,
            text: text.into(),
        });
    }

    // --- Intents ---

    /// Handle a user intent. Local rejections are returned and also raised as
    /// a warning notice.
    pub fn update(&mut self, msg: SessionMsg) -> Result<(), PreconditionFailure> {
        let result = match msg {
            SessionMsg::Init | SessionMsg::RefreshHistory => {
                self.refresh_history();
                Ok(())
            }
            SessionMsg::CreateProject(name) => self.handle_create_project(name),
            SessionMsg::SelectProject(id) => {
                self.enter_project(id, None);
                Ok(())
            }
            SessionMsg::NewChat => self.handle_new_chat(),
            SessionMsg::SelectConversation(id) => {
                self.handle_select_conversation(id);
                Ok(())
            }
            SessionMsg::ComposerChanged(text) => {
                self.composer = text;
                Ok(())
            }
            SessionMsg::SendMessage(text) => self.handle_send(text),
            SessionMsg::NoteEdited(text) => self.handle_note_edit(text),
            SessionMsg::SaveNotes => self.handle_save_notes(),
            SessionMsg::RequestDeleteProject(id) => {
                let name = self
                    .history
                    .project(id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| format!("#{}", id));
                self.confirmer.request(DeleteTarget::Project { id, name });
                Ok(())
            }
            SessionMsg::RequestDeleteConversation(id) => {
                let title = self
                    .history
                    .conversation(id)
                    .map(|c| c.display_title().to_string())
                    .unwrap_or_else(|| format!("#{}", id));
                self.confirmer
                    .request(DeleteTarget::Conversation { id, title });
                Ok(())
            }
            SessionMsg::ConfirmDelete => self.handle_confirm_delete(),
            SessionMsg::CancelDelete => self
                .confirmer
                .cancel()
                .map(|_| ())
                .ok_or(PreconditionFailure::NothingToConfirm),
        };

        if let Err(failure) = &result {
            self.notify(NoticeLevel::Warning, failure.to_string());
        }
        result
    }

    fn refresh_history(&mut self) {
        self.history_requested += 1;
        let seq = self.history_requested;
        let api = self.api.clone();
        self.command(async move {
            SessionCmd::HistoryLoaded {
                seq,
                result: api.load_history().await,
            }
        });
    }

    fn handle_create_project(&mut self, name: String) -> Result<(), PreconditionFailure> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(PreconditionFailure::EmptyProjectName);
        }
        let api = self.api.clone();
        self.command(async move { SessionCmd::ProjectCreated(api.create_project(&name).await) });
        Ok(())
    }

    fn enter_project(&mut self, project_id: ProjectId, name: Option<String>) {
        self.flush_active_notes();
        self.state.select_project(project_id);

        let name = name
            .or_else(|| self.history.project(project_id).map(|p| p.name.clone()))
            .unwrap_or_else(|| format!("#{}", project_id));
        self.show_new_chat(&name);
        self.project_name = Some(name);
        self.load_notes(project_id);
    }

    fn handle_new_chat(&mut self) -> Result<(), PreconditionFailure> {
        let project_id = self.state.new_chat()?;
        let name = self
            .project_name
            .clone()
            .unwrap_or_else(|| format!("#{}", project_id));
        self.show_new_chat(&name);
        Ok(())
    }

    fn show_new_chat(&mut self, project_name: &str) {
        self.conversation_title = None;
        self.transcript.replace(vec![TranscriptEntry::system(format!(
            "New chat started in project: {}",
            project_name
        ))]);
    }

    fn handle_select_conversation(&mut self, conversation_id: ConversationId) {
        self.flush_active_notes();
        // The pointer only moves once the load succeeds.
        self.open_seq += 1;
        let seq = self.open_seq;
        let snapshot = self.state.snapshot();
        let api = self.api.clone();
        self.command(async move {
            SessionCmd::ConversationLoaded {
                snapshot,
                seq,
                conversation_id,
                result: api.load_conversation(conversation_id).await,
            }
        });
    }

    fn handle_send(&mut self, text: String) -> Result<(), PreconditionFailure> {
        self.state.check_invariant()?;
        if self.state.active_project().is_none() {
            return Err(PreconditionFailure::NoActiveProject);
        }
        let message = text.trim().to_string();
        if message.is_empty() {
            return Err(PreconditionFailure::EmptyMessage);
        }
        if self.sending {
            return Err(PreconditionFailure::SendInProgress);
        }

        let (project_id, conversation_id) = self.state.begin_send()?;

        self.transcript.push(TranscriptEntry::user(message.clone()));
        self.composer.clear();
        self.sending = true;

        let snapshot = self.state.snapshot();
        let api = self.api.clone();
        self.command(async move {
            SessionCmd::ChatReplied {
                snapshot,
                sent_conversation: conversation_id,
                result: api.chat(&message, project_id, conversation_id).await,
            }
        });
        Ok(())
    }

    fn handle_note_edit(&mut self, text: String) -> Result<(), PreconditionFailure> {
        let project_id = self
            .state
            .active_project()
            .ok_or(PreconditionFailure::NoActiveProject)?;
        let ticket = self.notes.edit(project_id, text);
        self.arm_autosave(ticket);
        Ok(())
    }

    fn handle_save_notes(&mut self) -> Result<(), PreconditionFailure> {
        let project_id = self
            .state
            .active_project()
            .ok_or(PreconditionFailure::NoActiveProject)?;
        if self.notes.text(project_id).trim().is_empty() {
            return Err(PreconditionFailure::EmptyNote);
        }
        let note = self.notes.take_for_save(project_id);
        self.save_note(note, true);
        Ok(())
    }

    fn handle_confirm_delete(&mut self) -> Result<(), PreconditionFailure> {
        let target = self
            .confirmer
            .confirm()
            .ok_or(PreconditionFailure::NothingToConfirm)?;
        let api = self.api.clone();
        self.command(async move {
            let result = match &target {
                DeleteTarget::Project { id, .. } => api.delete_project(*id).await,
                DeleteTarget::Conversation { id, .. } => api.delete_conversation(*id).await,
            };
            SessionCmd::Deleted { target, result }
        });
        Ok(())
    }

    // --- Notes plumbing ---

    fn arm_autosave(&self, ticket: DebounceTicket) {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ticket.cancel.cancelled() => {}
                _ = tokio::time::sleep(ticket.delay) => {
                    let _ = tx.send(SessionCmd::AutosaveDue {
                        project_id: ticket.project_id,
                        generation: ticket.generation,
                    });
                }
            }
        });
    }

    /// Queue a save for the active project's pending draft without waiting.
    fn flush_active_notes(&mut self) {
        if let Some(project_id) = self.state.active_project() {
            if let Some(note) = self.notes.flush_pending(project_id) {
                self.save_note(note, false);
            }
        }
    }

    fn save_note(&mut self, note: Note, explicit: bool) {
        let api = self.api.clone();
        self.command(async move {
            let result = if explicit {
                api.save_notes(note.project_id, &note.content, note.revision)
                    .await
            } else {
                api.autosave_notes(note.project_id, &note.content, note.revision)
                    .await
            };
            SessionCmd::NoteSaved {
                project_id: note.project_id,
                revision: note.revision,
                explicit,
                result,
            }
        });
    }

    fn load_notes(&mut self, project_id: ProjectId) {
        let revision = self.notes.revision(project_id);
        let api = self.api.clone();
        self.command(async move {
            SessionCmd::NotesLoaded {
                project_id,
                revision,
                result: api.load_notes(project_id).await,
            }
        });
    }

    // --- Completions ---

    pub fn update_cmd(&mut self, cmd: SessionCmd) {
        if cmd.completes_request() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }

        match cmd {
            SessionCmd::HistoryLoaded { seq, .. } if seq <= self.history_applied => {
                tracing::debug!(seq, "discarding superseded history load");
            }
            SessionCmd::HistoryLoaded {
                seq,
                result: Ok(history),
            } => {
                self.history_applied = seq;
                self.history.replace(history);
                if let Some(id) = self.state.active_conversation() {
                    if let Some(conversation) = self.history.conversation(id) {
                        self.conversation_title = Some(conversation.display_title().to_string());
                    }
                }
            }
            SessionCmd::HistoryLoaded { result: Err(e), .. } => {
                self.notify(NoticeLevel::Error, e.to_string());
            }
            SessionCmd::ProjectCreated(Ok(project)) => {
                self.notify(
                    NoticeLevel::Info,
                    format!("Project \"{}\" created.", project.name),
                );
                self.enter_project(project.id, Some(project.name));
                self.refresh_history();
            }
            SessionCmd::ProjectCreated(Err(e)) => {
                self.notify(NoticeLevel::Error, e.to_string());
            }
            SessionCmd::ConversationLoaded {
                snapshot,
                seq,
                conversation_id,
                result,
            } => self.apply_conversation(snapshot, seq, conversation_id, result),
            SessionCmd::ChatReplied {
                snapshot,
                sent_conversation,
                result,
            } => self.apply_chat_reply(snapshot, sent_conversation, result),
            SessionCmd::NotesLoaded {
                project_id,
                revision,
                result,
            } => {
                if self.state.active_project() != Some(project_id) {
                    tracing::debug!(%project_id, "dropping notes for inactive project");
                    return;
                }
                match result {
                    Ok(text) => {
                        if !self.notes.loaded(project_id, text, revision) {
                            tracing::debug!(%project_id, "keeping local note edits over loaded copy");
                        }
                    }
                    Err(e) => self.notify(NoticeLevel::Warning, e.to_string()),
                }
            }
            SessionCmd::NoteSaved {
                project_id,
                revision,
                explicit,
                result,
            } => {
                self.notes.saved(project_id, revision, result.is_ok());
                match result {
                    Ok(()) if explicit => self.notify(NoticeLevel::Info, "Notes saved."),
                    Ok(()) => {}
                    Err(e) => self.notify(
                        NoticeLevel::Warning,
                        format!("Notes could not be saved: {}", e),
                    ),
                }
            }
            SessionCmd::AutosaveDue {
                project_id,
                generation,
            } => {
                if let Some(note) = self.notes.timer_elapsed(project_id, generation) {
                    self.save_note(note, false);
                }
            }
            SessionCmd::Deleted { target, result } => self.apply_delete(target, result),
        }
    }

    fn apply_conversation(
        &mut self,
        snapshot: PointerSnapshot,
        seq: u64,
        conversation_id: ConversationId,
        result: Result<LoadedConversation, DispatchError>,
    ) {
        if !self.state.is_current(&snapshot) || seq != self.open_seq {
            tracing::debug!(%conversation_id, "discarding stale conversation load");
            return;
        }

        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                self.notify(NoticeLevel::Error, e.to_string());
                return;
            }
        };

        let previous_project = self.state.active_project();
        self.state
            .select_conversation(loaded.project_id, conversation_id);

        self.project_name = Some(if loaded.project_name.trim().is_empty() {
            self.history
                .project(loaded.project_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("#{}", loaded.project_id))
        } else {
            loaded.project_name
        });
        self.conversation_title = self
            .history
            .conversation(conversation_id)
            .map(|c| c.display_title().to_string());
        self.transcript
            .replace(loaded.messages.into_iter().map(TranscriptEntry::from).collect());

        if previous_project != Some(loaded.project_id) {
            self.load_notes(loaded.project_id);
        }
    }

    fn apply_chat_reply(
        &mut self,
        snapshot: PointerSnapshot,
        sent_conversation: Option<ConversationId>,
        result: Result<ChatReply, DispatchError>,
    ) {
        self.sending = false;

        let minted = match &result {
            Ok(reply) => sent_conversation.is_none() && reply.conversation_id.is_some(),
            Err(_) => false,
        };

        if !self.state.is_current(&snapshot) {
            tracing::debug!(
                project_id = ?snapshot.project_id,
                "discarding chat reply for a session that is no longer active"
            );
            if minted {
                self.refresh_history();
            }
            return;
        }

        match result {
            Ok(reply) => {
                self.transcript.push(TranscriptEntry::assistant(reply.reply));
                match reply.conversation_id {
                    Some(id) if self.state.adopt_conversation(id) => self.refresh_history(),
                    _ => self.state.abandon_pending(),
                }
            }
            Err(e) => {
                self.state.abandon_pending();
                self.transcript
                    .push(TranscriptEntry::error(format!("Error: {}", e)));
                self.notify(NoticeLevel::Error, e.to_string());
            }
        }
    }

    fn apply_delete(&mut self, target: DeleteTarget, result: Result<(), DispatchError>) {
        if let Err(e) = result {
            self.notify(NoticeLevel::Error, e.to_string());
            return;
        }

        self.notify(NoticeLevel::Info, target.done_message());
        match target {
            DeleteTarget::Project { id, .. } => {
                self.notes.forget(id);
                if self.state.active_project() == Some(id) {
                    self.state.reset();
                    self.transcript.clear();
                    self.project_name = None;
                    self.conversation_title = None;
                }
            }
            DeleteTarget::Conversation { id, .. } => {
                if self.state.active_conversation() == Some(id) {
                    self.state.clear_conversation();
                    let name = self.project_name.clone().unwrap_or_default();
                    self.show_new_chat(&name);
                }
            }
        }
        self.refresh_history();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::models::Sender;
    use crate::session::state::ConversationSlot;
    use crate::testing::MockBackend;
    use crate::transport::{Action, ActionRequest, Backend, Envelope};

    const DEBOUNCE: Duration = Duration::from_millis(1500);

    fn controller(backend: &Arc<MockBackend>) -> SessionController {
        SessionController::new(Dispatcher::new(backend.clone(), "nonce"), DEBOUNCE)
    }

    /// Project "Acme" (7); the first chat mints conversation 42.
    fn acme_backend() -> Arc<MockBackend> {
        let backend = MockBackend::new();
        let created = Arc::new(AtomicBool::new(false));
        let chatted = Arc::new(AtomicBool::new(false));

        let c = created.clone();
        backend.respond(Action::CreateProject, move |_| {
            c.store(true, Ordering::SeqCst);
            Ok(Envelope::ok(json!({ "id": 7, "name": "Acme" })))
        });

        let c = created.clone();
        let t = chatted.clone();
        backend.respond(Action::LoadHistory, move |_| {
            let projects = if c.load(Ordering::SeqCst) {
                json!([{ "id": 7, "name": "Acme" }])
            } else {
                json!([])
            };
            let conversations = if t.load(Ordering::SeqCst) {
                json!([{ "id": 42, "title": "Hello", "project_id": 7 }])
            } else {
                json!([])
            };
            Ok(Envelope::ok(json!({ "projects": projects, "conversations": conversations })))
        });

        let t = chatted.clone();
        backend.respond(Action::Chat, move |req| {
            t.store(true, Ordering::SeqCst);
            let id = req.payload["conversation_id"].as_i64().unwrap_or(42);
            Ok(Envelope::ok(json!({ "reply": "Hi! How can I help?", "conversation_id": id })))
        });
        backend
    }

    /// Two projects with conversation 42 living in project 2.
    fn two_project_backend() -> Arc<MockBackend> {
        let backend = MockBackend::new();
        backend.respond(Action::LoadHistory, |_| {
            Ok(Envelope::ok(json!({
                "projects": [{ "id": 1, "name": "Acme" }, { "id": 2, "name": "Beta" }],
                "conversations": [{ "id": 42, "title": "Launch plan", "project_id": 2 }],
            })))
        });
        backend.respond(Action::LoadConversation, |_| {
            Ok(Envelope::ok(json!({
                "messages": [
                    { "sender": "user", "content": "Plan the launch" },
                    { "sender": "assistant", "content": "Here is a plan" },
                ],
                "project_id": 2,
                "project_name": "Beta",
            })))
        });
        backend
    }

    async fn with_history(backend: &Arc<MockBackend>) -> SessionController {
        let mut c = controller(backend);
        c.update(SessionMsg::Init).unwrap();
        c.settle().await;
        c
    }

    #[tokio::test]
    async fn test_acme_scenario() {
        let backend = acme_backend();
        let mut c = with_history(&backend).await;
        assert_eq!(
            c.project_rows(),
            vec![HistoryRow::Placeholder(crate::services::history::NO_PROJECTS_PLACEHOLDER)]
        );

        c.update(SessionMsg::CreateProject("Acme".to_string())).unwrap();
        c.settle().await;
        assert_eq!(c.phase(), Phase::NoConversation(ProjectId(7)));

        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        assert_eq!(
            c.transcript().entries(),
            &[TranscriptEntry::system("New chat started in project: Acme")]
        );
        c.settle().await;

        let history_loads = backend.calls_for(Action::LoadHistory).len();
        c.update(SessionMsg::ComposerChanged("Hello".to_string())).unwrap();
        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();

        // Optimistic: rendered before the server answers
        assert_eq!(c.transcript().entries().last(), Some(&TranscriptEntry::user("Hello")));
        assert_eq!(c.composer(), "");
        assert!(!c.can_send());
        assert_eq!(c.state().conversation(), ConversationSlot::Pending);

        c.settle().await;

        let entries = c.transcript().entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2], TranscriptEntry::assistant("Hi! How can I help?"));
        assert_eq!(c.phase(), Phase::ConversationActive(ProjectId(7), ConversationId(42)));
        assert_eq!(backend.calls_for(Action::LoadHistory).len(), history_loads + 1);
        assert!(c.conversation_rows().iter().any(|row| matches!(
            row,
            HistoryRow::Conversation { id: ConversationId(42), active: true, .. }
        )));
        assert_eq!(c.conversation_title(), Some("Hello"));

        let chat = &backend.calls_for(Action::Chat)[0];
        assert_eq!(chat.payload["project_id"], 7);
        assert!(chat.payload["conversation_id"].is_null());

        // Follow-ups reuse the adopted id and do not refresh history again
        c.update(SessionMsg::SendMessage("More".to_string())).unwrap();
        c.settle().await;
        assert_eq!(backend.calls_for(Action::Chat)[1].payload["conversation_id"], 42);
        assert_eq!(backend.calls_for(Action::LoadHistory).len(), history_loads + 1);
    }

    #[tokio::test]
    async fn test_send_without_project_makes_no_call() {
        let backend = MockBackend::new();
        let mut c = controller(&backend);

        let result = c.update(SessionMsg::SendMessage("Hello".to_string()));
        assert_eq!(result, Err(PreconditionFailure::NoActiveProject));
        assert!(backend.calls().is_empty());
        assert_eq!(c.in_flight(), 0);

        let notices = c.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert!(c.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected_locally() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;

        let result = c.update(SessionMsg::SendMessage("   \n".to_string()));
        assert_eq!(result, Err(PreconditionFailure::EmptyMessage));
        assert!(backend.calls_for(Action::Chat).is_empty());
        assert_eq!(c.state().conversation(), ConversationSlot::Unset);
    }

    #[tokio::test]
    async fn test_project_switches_clear_conversation() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.settle().await;
        assert_eq!(c.state().active_conversation(), Some(ConversationId(42)));

        for id in [8, 7, 7] {
            c.update(SessionMsg::SelectProject(ProjectId(id))).unwrap();
            assert_eq!(c.state().conversation(), ConversationSlot::Unset);
            c.settle().await;
        }

        c.update(SessionMsg::SendMessage("Again".to_string())).unwrap();
        c.settle().await;
        c.update(SessionMsg::NewChat).unwrap();
        assert_eq!(c.phase(), Phase::NoConversation(ProjectId(7)));
    }

    #[tokio::test]
    async fn test_selecting_conversation_adopts_its_project() {
        let backend = two_project_backend();
        let mut c = with_history(&backend).await;
        c.update(SessionMsg::SelectProject(ProjectId(1))).unwrap();
        c.settle().await;

        c.update(SessionMsg::SelectConversation(ConversationId(42))).unwrap();
        c.settle().await;

        assert_eq!(c.phase(), Phase::ConversationActive(ProjectId(2), ConversationId(42)));
        assert_eq!(c.project_name(), Some("Beta"));
        let rows = c.project_rows();
        assert!(matches!(rows[0], HistoryRow::Project { id: ProjectId(1), active: false, .. }));
        assert!(matches!(rows[1], HistoryRow::Project { id: ProjectId(2), active: true, .. }));

        // Replaced wholesale, not appended to the new-chat line
        let entries = c.transcript().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sender, Sender::User);
        assert_eq!(entries[1].content, "Here is a plan");

        // Notes follow the newly active project
        let loads = backend.calls_for(Action::LoadNotes);
        assert_eq!(loads.last().unwrap().payload["project_id"], 2);
    }

    #[tokio::test]
    async fn test_deleting_active_project_resets_session() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.settle().await;

        c.update(SessionMsg::RequestDeleteProject(ProjectId(7))).unwrap();
        assert!(backend.calls_for(Action::DeleteProject).is_empty());
        assert!(c.confirmation().is_some());

        let loads = backend.calls_for(Action::LoadHistory).len();
        c.update(SessionMsg::ConfirmDelete).unwrap();
        assert!(c.confirmation().is_none());
        c.settle().await;

        assert_eq!(backend.calls_for(Action::DeleteProject).len(), 1);
        assert_eq!(c.phase(), Phase::NoProjectSelected);
        assert!(c.transcript().is_empty());
        assert_eq!(backend.calls_for(Action::LoadHistory).len(), loads + 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_delete_dispatches_nothing() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.settle().await;

        c.update(SessionMsg::RequestDeleteConversation(ConversationId(42))).unwrap();
        let prompt = c.confirmation().unwrap().prompt.clone();
        assert!(prompt.contains("Hello"));
        c.settle().await;
        assert!(backend.calls_for(Action::DeleteConversation).is_empty());

        c.update(SessionMsg::CancelDelete).unwrap();
        assert!(c.confirmation().is_none());
        assert_eq!(c.phase(), Phase::ConversationActive(ProjectId(7), ConversationId(42)));
        assert!(backend.calls_for(Action::DeleteConversation).is_empty());

        assert_eq!(
            c.update(SessionMsg::ConfirmDelete),
            Err(PreconditionFailure::NothingToConfirm)
        );
    }

    #[tokio::test]
    async fn test_deleting_active_conversation_starts_new_chat() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        c.update(SessionMsg::CreateProject("Acme".to_string())).unwrap();
        c.settle().await;
        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.settle().await;

        c.update(SessionMsg::RequestDeleteConversation(ConversationId(42))).unwrap();
        c.update(SessionMsg::ConfirmDelete).unwrap();
        c.settle().await;

        assert_eq!(c.phase(), Phase::NoConversation(ProjectId(7)));
        assert_eq!(
            c.transcript().entries(),
            &[TranscriptEntry::system("New chat started in project: Acme")]
        );
    }

    #[tokio::test]
    async fn test_failed_delete_changes_nothing() {
        let backend = acme_backend();
        backend.respond(Action::DeleteProject, |_| {
            Ok(Envelope::failure("You do not own this project."))
        });
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;
        c.take_notices();

        let loads = backend.calls_for(Action::LoadHistory).len();
        c.update(SessionMsg::RequestDeleteProject(ProjectId(7))).unwrap();
        c.update(SessionMsg::ConfirmDelete).unwrap();
        c.settle().await;

        assert_eq!(c.phase(), Phase::NoConversation(ProjectId(7)));
        assert_eq!(c.transcript().entries().len(), 1);
        assert_eq!(backend.calls_for(Action::LoadHistory).len(), loads);
        let notices = c.take_notices();
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[0].text, "You do not own this project.");
    }

    #[tokio::test]
    async fn test_chat_failure_is_shown_inline() {
        let backend = acme_backend();
        backend.respond(Action::Chat, |_| Ok(Envelope::failure("Quota exceeded")));
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;

        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.settle().await;

        let entries = c.transcript().entries();
        assert_eq!(entries[1], TranscriptEntry::user("Hello"));
        assert_eq!(entries[2], TranscriptEntry::error("Error: Quota exceeded"));
        assert_eq!(c.state().conversation(), ConversationSlot::Unset);
        assert!(c.can_send());
        assert!(c.notices().iter().any(|n| n.text == "Quota exceeded"));
        // No automatic retry
        assert_eq!(backend.calls_for(Action::Chat).len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_raises_notice() {
        let backend = acme_backend();
        backend.respond(Action::Chat, |_| {
            Err(DispatchError::Transport("connection reset".to_string()))
        });
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.settle().await;

        assert!(c
            .notices()
            .iter()
            .any(|n| n.level == NoticeLevel::Error && n.text.contains("connection reset")));
        assert!(!c.is_sending());
    }

    #[tokio::test]
    async fn test_second_send_waits_for_first() {
        let backend = acme_backend();
        let gate = backend.hold(Action::Chat);
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();

        c.update(SessionMsg::SendMessage("one".to_string())).unwrap();
        assert_eq!(
            c.update(SessionMsg::SendMessage("two".to_string())),
            Err(PreconditionFailure::SendInProgress)
        );

        gate.notify_one();
        c.settle().await;
        assert_eq!(backend.calls_for(Action::Chat).len(), 1);
        assert!(c.can_send());
    }

    #[tokio::test]
    async fn test_stale_reply_is_discarded_after_project_switch() {
        let backend = acme_backend();
        let gate = backend.hold(Action::Chat);
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;

        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.update(SessionMsg::SelectProject(ProjectId(8))).unwrap();

        let loads = backend.calls_for(Action::LoadHistory).len();
        gate.notify_one();
        c.settle().await;

        assert_eq!(c.phase(), Phase::NoConversation(ProjectId(8)));
        assert!(c
            .transcript()
            .entries()
            .iter()
            .all(|e| e.content != "Hi! How can I help?"));
        assert!(!c.is_sending());
        assert!(!c.is_busy());
        // The server still minted a conversation, so the list catches up.
        assert_eq!(backend.calls_for(Action::LoadHistory).len(), loads + 1);
    }

    #[tokio::test]
    async fn test_busy_indicator_follows_requests() {
        let backend = acme_backend();
        let gate = backend.hold(Action::LoadHistory);
        let mut c = controller(&backend);
        let mut busy = c.busy_updates();

        c.update(SessionMsg::Init).unwrap();
        busy.changed().await.unwrap();
        assert!(*busy.borrow_and_update());
        assert!(c.is_busy());

        gate.notify_one();
        c.settle().await;
        assert!(!c.is_busy());
        assert!(!*busy.borrow());
        assert_eq!(c.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_open_keeps_in_flight_reply() {
        let backend = acme_backend();
        backend.respond(Action::LoadConversation, |_| {
            Ok(Envelope::failure("Conversation not found."))
        });
        let gate = backend.hold(Action::Chat);
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;

        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.update(SessionMsg::SelectConversation(ConversationId(99))).unwrap();

        // The chat is held, so the failed open lands first.
        let cmd = c.next_cmd().await.unwrap();
        assert!(matches!(cmd, SessionCmd::ConversationLoaded { .. }));
        c.update_cmd(cmd);
        assert_eq!(c.state().conversation(), ConversationSlot::Pending);
        assert!(c.notices().iter().any(|n| n.text == "Conversation not found."));

        gate.notify_one();
        c.settle().await;

        assert_eq!(c.phase(), Phase::ConversationActive(ProjectId(7), ConversationId(42)));
        assert_eq!(
            c.transcript().entries().last(),
            Some(&TranscriptEntry::assistant("Hi! How can I help?"))
        );

        gate.notify_one();
        c.update(SessionMsg::SendMessage("More".to_string())).unwrap();
        c.settle().await;
        assert_eq!(backend.calls_for(Action::Chat)[1].payload["conversation_id"], 42);
    }

    #[tokio::test]
    async fn test_latest_open_wins() {
        let backend = two_project_backend();
        let mut c = with_history(&backend).await;

        c.update(SessionMsg::SelectConversation(ConversationId(42))).unwrap();
        c.update(SessionMsg::SelectConversation(ConversationId(43))).unwrap();
        c.settle().await;

        assert_eq!(c.phase(), Phase::ConversationActive(ProjectId(2), ConversationId(43)));
        assert_eq!(backend.calls_for(Action::LoadConversation).len(), 2);
    }

    /// The first history load is slow, later ones answer at once and include
    /// the created project.
    struct SlowFirstHistory {
        history_calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for SlowFirstHistory {
        fn name(&self) -> &'static str {
            "slow-first-history"
        }

        async fn dispatch(&self, request: ActionRequest) -> Result<Envelope, DispatchError> {
            Ok(match request.action {
                Action::LoadHistory => {
                    if self.history_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Envelope::ok(json!({
                            "projects": [{ "id": 1, "name": "Old" }],
                            "conversations": [],
                        }))
                    } else {
                        Envelope::ok(json!({
                            "projects": [{ "id": 1, "name": "Old" }, { "id": 2, "name": "New" }],
                            "conversations": [],
                        }))
                    }
                }
                Action::CreateProject => Envelope::ok(json!({ "id": 2, "name": "New" })),
                Action::LoadNotes => Envelope::ok(json!({ "notes": "" })),
                _ => Envelope::ok(json!({})),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_history_load_does_not_overwrite_newer() {
        let backend = Arc::new(SlowFirstHistory {
            history_calls: AtomicUsize::new(0),
        });
        let mut c = SessionController::new(Dispatcher::new(backend, "nonce"), DEBOUNCE);

        c.update(SessionMsg::Init).unwrap();
        c.update(SessionMsg::CreateProject("New".to_string())).unwrap();
        c.settle().await;

        let names: Vec<_> = c.history().projects().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Old", "New"]);
        assert!(matches!(
            c.project_rows()[1],
            HistoryRow::Project { id: ProjectId(2), active: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_stale_conversation_load_is_discarded() {
        let backend = two_project_backend();
        let gate = backend.hold(Action::LoadConversation);
        let mut c = with_history(&backend).await;

        c.update(SessionMsg::SelectConversation(ConversationId(42))).unwrap();
        c.update(SessionMsg::SelectProject(ProjectId(1))).unwrap();
        gate.notify_one();
        c.settle().await;

        assert_eq!(c.phase(), Phase::NoConversation(ProjectId(1)));
        assert_eq!(c.transcript().entries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_fires_once_after_quiet_period() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;

        for text in ["a", "ab", "abc"] {
            c.update(SessionMsg::NoteEdited(text.to_string())).unwrap();
            tokio::time::advance(Duration::from_millis(1000)).await;
            tokio::task::yield_now().await;
            assert!(c.try_next_cmd().is_none());
        }
        assert!(backend.calls_for(Action::SaveNotes).is_empty());

        // Quiet long enough: exactly one save with the latest text
        let cmd = c.next_cmd().await.unwrap();
        assert!(matches!(cmd, SessionCmd::AutosaveDue { .. }));
        c.update_cmd(cmd);
        assert!(!c.is_busy());
        c.settle().await;

        let saves = backend.calls_for(Action::SaveNotes);
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].payload["notes"], "abc");
        assert_eq!(saves[0].payload["revision"], 3);
        assert_eq!(c.note_status(), Some(SaveStatus::Saved));
        assert!(c.notices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_project_switch_flushes_pending_note() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;

        c.update(SessionMsg::NoteEdited("draft".to_string())).unwrap();
        c.update(SessionMsg::SelectProject(ProjectId(8))).unwrap();
        c.settle().await;

        let saves = backend.calls_for(Action::SaveNotes);
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].payload["project_id"], 7);
        assert_eq!(saves[0].payload["notes"], "draft");

        // The superseded timer never produces a second save
        tokio::time::advance(DEBOUNCE * 2).await;
        tokio::task::yield_now().await;
        while let Some(cmd) = c.try_next_cmd() {
            c.update_cmd(cmd);
        }
        c.settle().await;
        assert_eq!(backend.calls_for(Action::SaveNotes).len(), 1);
        assert_eq!(c.note_text(), "");
    }

    #[tokio::test]
    async fn test_loaded_note_does_not_overwrite_typing() {
        let backend = acme_backend();
        backend.respond(Action::LoadNotes, |_| Ok(Envelope::ok(json!({ "notes": "server" }))));
        let gate = backend.hold(Action::LoadNotes);
        let mut c = controller(&backend);

        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.update(SessionMsg::NoteEdited("mine".to_string())).unwrap();
        gate.notify_one();
        c.settle().await;
        assert_eq!(c.note_text(), "mine");
    }

    #[tokio::test]
    async fn test_loaded_note_is_shown() {
        let backend = acme_backend();
        backend.respond(Action::LoadNotes, |_| Ok(Envelope::ok(json!({ "notes": "server" }))));
        let mut c = controller(&backend);

        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;
        assert_eq!(c.note_text(), "server");
    }

    #[tokio::test]
    async fn test_explicit_save_rejects_empty_note() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        assert_eq!(
            c.update(SessionMsg::SaveNotes),
            Err(PreconditionFailure::NoActiveProject)
        );

        c.update(SessionMsg::SelectProject(ProjectId(7))).unwrap();
        c.settle().await;
        assert_eq!(c.update(SessionMsg::SaveNotes), Err(PreconditionFailure::EmptyNote));

        c.update(SessionMsg::NoteEdited("keep".to_string())).unwrap();
        c.update(SessionMsg::SaveNotes).unwrap();
        c.settle().await;
        assert_eq!(backend.calls_for(Action::SaveNotes).len(), 1);
        assert!(c.notices().iter().any(|n| n.text == "Notes saved."));
    }

    #[tokio::test]
    async fn test_export_requires_project() {
        let backend = acme_backend();
        let mut c = controller(&backend);
        assert!(c.export_markdown().is_err());

        c.update(SessionMsg::CreateProject("Acme".to_string())).unwrap();
        c.settle().await;
        c.update(SessionMsg::SendMessage("Hello".to_string())).unwrap();
        c.settle().await;

        let md = c.export_markdown().unwrap();
        assert!(md.starts_with("# Hello"));
        assert!(md.contains("Project: Acme"));
    }
}
