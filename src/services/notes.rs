use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::{Note, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Idle,
    Pending,
    Saving,
    Saved,
    Failed,
}

/// A debounce timer the caller must arm. Dropping it without arming is fine;
/// the draft stays pending until the next edit or flush.
#[derive(Debug, Clone)]
pub struct DebounceTicket {
    pub project_id: ProjectId,
    pub generation: u64,
    pub delay: Duration,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct PendingFlush {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Draft {
    text: String,
    revision: u64,
    saved_revision: u64,
    pending: Option<PendingFlush>,
    status: SaveStatus,
}

/// Debounced, per-project note autosave.
///
/// The engine is pure bookkeeping: it hands out tickets for timers and
/// [`Note`]s to flush, and the owner performs the actual waiting and saving.
#[derive(Debug)]
pub struct NotesEngine {
    debounce: Duration,
    drafts: HashMap<ProjectId, Draft>,
    next_generation: u64,
}

impl NotesEngine {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            drafts: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn text(&self, project_id: ProjectId) -> &str {
        self.drafts
            .get(&project_id)
            .map(|d| d.text.as_str())
            .unwrap_or("")
    }

    pub fn revision(&self, project_id: ProjectId) -> u64 {
        self.drafts.get(&project_id).map(|d| d.revision).unwrap_or(0)
    }

    pub fn status(&self, project_id: ProjectId) -> SaveStatus {
        self.drafts
            .get(&project_id)
            .map(|d| d.status)
            .unwrap_or_default()
    }

    pub fn has_pending_flush(&self, project_id: ProjectId) -> bool {
        self.drafts
            .get(&project_id)
            .is_some_and(|d| d.pending.is_some())
    }

    /// Record a keystroke and restart the debounce window.
    pub fn edit(&mut self, project_id: ProjectId, text: impl Into<String>) -> DebounceTicket {
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();

        let draft = self.drafts.entry(project_id).or_default();
        if let Some(previous) = draft.pending.take() {
            previous.cancel.cancel();
        }
        draft.text = text.into();
        draft.revision += 1;
        draft.status = SaveStatus::Pending;
        draft.pending = Some(PendingFlush {
            generation,
            cancel: cancel.clone(),
        });

        DebounceTicket {
            project_id,
            generation,
            delay: self.debounce,
            cancel,
        }
    }

    /// The debounce timer fired. Returns the note to save unless the timer was
    /// superseded by a later edit or an earlier flush.
    pub fn timer_elapsed(&mut self, project_id: ProjectId, generation: u64) -> Option<Note> {
        let draft = self.drafts.get_mut(&project_id)?;
        match &draft.pending {
            Some(p) if p.generation == generation => {
                draft.pending = None;
                draft.status = SaveStatus::Saving;
                Some(Note {
                    project_id,
                    content: draft.text.clone(),
                    revision: draft.revision,
                })
            }
            _ => None,
        }
    }

    /// Flush a pending draft immediately, cancelling its timer.
    pub fn flush_pending(&mut self, project_id: ProjectId) -> Option<Note> {
        let draft = self.drafts.get_mut(&project_id)?;
        let pending = draft.pending.take()?;
        pending.cancel.cancel();
        draft.status = SaveStatus::Saving;
        Some(Note {
            project_id,
            content: draft.text.clone(),
            revision: draft.revision,
        })
    }

    /// Snapshot for an explicit save, cancelling any pending timer.
    pub fn take_for_save(&mut self, project_id: ProjectId) -> Note {
        if let Some(note) = self.flush_pending(project_id) {
            return note;
        }
        let draft = self.drafts.entry(project_id).or_default();
        draft.status = SaveStatus::Saving;
        Note {
            project_id,
            content: draft.text.clone(),
            revision: draft.revision,
        }
    }

    /// Apply text loaded from the server, unless the user has edited since
    /// the load was dispatched (`revision_at_request`) or holds unsaved text.
    pub fn loaded(&mut self, project_id: ProjectId, text: String, revision_at_request: u64) -> bool {
        let draft = self.drafts.entry(project_id).or_default();
        if draft.revision != revision_at_request || draft.revision > draft.saved_revision {
            return false;
        }
        draft.text = text;
        draft.saved_revision = draft.revision;
        draft.status = SaveStatus::Idle;
        true
    }

    pub fn saved(&mut self, project_id: ProjectId, revision: u64, ok: bool) {
        let Some(draft) = self.drafts.get_mut(&project_id) else {
            return;
        };
        if ok {
            draft.saved_revision = draft.saved_revision.max(revision);
        }
        // A newer edit owns the status now.
        if draft.revision == revision && draft.pending.is_none() {
            draft.status = if ok { SaveStatus::Saved } else { SaveStatus::Failed };
        }
    }

    pub fn is_dirty(&self, project_id: ProjectId) -> bool {
        self.drafts
            .get(&project_id)
            .is_some_and(|d| d.revision > d.saved_revision)
    }

    /// Drop everything held for a deleted project.
    pub fn forget(&mut self, project_id: ProjectId) {
        if let Some(draft) = self.drafts.remove(&project_id) {
            if let Some(pending) = draft.pending {
                pending.cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: ProjectId = ProjectId(7);

    #[test]
    fn test_only_latest_timer_flushes() {
        let mut engine = NotesEngine::new(Duration::from_millis(1500));
        let first = engine.edit(P, "a");
        let second = engine.edit(P, "ab");

        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());
        assert!(engine.timer_elapsed(P, first.generation).is_none());

        let note = engine.timer_elapsed(P, second.generation).unwrap();
        assert_eq!(note.content, "ab");
        assert_eq!(note.revision, 2);
        assert_eq!(engine.status(P), SaveStatus::Saving);

        // Already flushed
        assert!(engine.timer_elapsed(P, second.generation).is_none());
    }

    #[test]
    fn test_flush_pending_cancels_timer() {
        let mut engine = NotesEngine::new(Duration::from_millis(1500));
        let ticket = engine.edit(P, "draft");
        assert!(engine.has_pending_flush(P));

        let note = engine.flush_pending(P).unwrap();
        assert!(!engine.has_pending_flush(P));
        assert_eq!(note.content, "draft");
        assert!(ticket.cancel.is_cancelled());
        assert!(engine.flush_pending(P).is_none());
        assert!(engine.timer_elapsed(P, ticket.generation).is_none());
    }

    #[test]
    fn test_load_does_not_clobber_newer_edits() {
        let mut engine = NotesEngine::new(Duration::from_millis(1500));
        let at_request = engine.revision(P);
        engine.edit(P, "typed while loading");

        assert!(!engine.loaded(P, "server copy".to_string(), at_request));
        assert_eq!(engine.text(P), "typed while loading");

        let other = ProjectId(8);
        assert!(engine.loaded(other, "server copy".to_string(), engine.revision(other)));
        assert_eq!(engine.text(other), "server copy");
        assert!(!engine.is_dirty(other));
    }

    #[test]
    fn test_saved_tracks_revisions() {
        let mut engine = NotesEngine::new(Duration::from_millis(1500));
        let ticket = engine.edit(P, "one");
        let note = engine.timer_elapsed(P, ticket.generation).unwrap();
        assert!(engine.is_dirty(P));

        engine.edit(P, "two");
        engine.saved(P, note.revision, true);
        // Still dirty: revision 2 is not saved yet and keeps its pending status.
        assert!(engine.is_dirty(P));
        assert_eq!(engine.status(P), SaveStatus::Pending);

        let note = engine.flush_pending(P).unwrap();
        engine.saved(P, note.revision, false);
        assert_eq!(engine.status(P), SaveStatus::Failed);
        assert!(engine.is_dirty(P));
    }

    #[test]
    fn test_forget_cancels_pending_timer() {
        let mut engine = NotesEngine::new(Duration::from_millis(1500));
        let ticket = engine.edit(P, "bye");
        engine.forget(P);
        assert!(ticket.cancel.is_cancelled());
        assert_eq!(engine.text(P), "");
    }
}
