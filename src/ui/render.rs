use crate::models::Sender;
use crate::services::confirm::Confirmation;
use crate::services::history::HistoryRow;
use crate::services::notes::SaveStatus;
use crate::session::view::{Notice, NoticeLevel, Transcript, TranscriptEntry};

/// Prints the transcript incrementally, redrawing it when it was replaced.
#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    revision: Option<u64>,
    shown: usize,
}

impl TranscriptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines that have not been printed yet.
    pub fn pending_lines(&mut self, transcript: &Transcript) -> Vec<String> {
        let mut lines = Vec::new();
        if self.revision != Some(transcript.revision()) {
            if self.revision.is_some() {
                lines.push(String::from("────────"));
            }
            self.revision = Some(transcript.revision());
            self.shown = 0;
        }

        let entries = transcript.entries();
        if self.shown < entries.len() {
            lines.extend(entries[self.shown..].iter().map(format_entry));
            self.shown = entries.len();
        }
        lines
    }
}

pub fn format_entry(entry: &TranscriptEntry) -> String {
    match entry.sender {
        Sender::User => format!("you> {}", entry.content),
        Sender::Assistant => format!("assistant> {}", entry.content),
        Sender::System if entry.error => format!("!! {}", entry.content),
        Sender::System => format!("-- {}", entry.content),
    }
}

pub fn format_notice(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Warning => "warning",
        NoticeLevel::Error => "error",
    };
    format!("[{}] {}", tag, notice.text)
}

pub fn format_history(projects: &[HistoryRow], conversations: &[HistoryRow]) -> Vec<String> {
    let mut lines = vec![String::from("Projects:")];
    lines.extend(projects.iter().map(format_row));
    lines.push(String::from("Conversations:"));
    lines.extend(conversations.iter().map(format_row));
    lines
}

fn format_row(row: &HistoryRow) -> String {
    let marker = |active: bool| if active { '*' } else { ' ' };
    match row {
        HistoryRow::Loading => String::from("  Loading..."),
        HistoryRow::Placeholder(text) => format!("  {}", text),
        HistoryRow::Project { id, name, active } => {
            format!("{} {:>4}  {}", marker(*active), id, name)
        }
        HistoryRow::Conversation {
            id,
            title,
            project_id,
            active,
        } => format!("{} {:>4}  {} (project {})", marker(*active), id, title, project_id),
    }
}

/// Shown when the busy indicator is raised or cleared.
pub fn format_busy(waiting: bool) -> &'static str {
    if waiting {
        "(waiting for the server...)"
    } else {
        "(ready)"
    }
}

pub fn format_confirmation(confirmation: &Confirmation) -> String {
    format!("{} [/yes or /no]", confirmation.prompt)
}

pub fn format_note(text: &str, status: Option<SaveStatus>) -> Vec<String> {
    let status = match status {
        None | Some(SaveStatus::Idle) => "",
        Some(SaveStatus::Pending) => " (unsaved)",
        Some(SaveStatus::Saving) => " (saving)",
        Some(SaveStatus::Saved) => " (saved)",
        Some(SaveStatus::Failed) => " (save failed)",
    };
    let mut lines = vec![format!("Notes{}:", status)];
    if text.is_empty() {
        lines.push(String::from("  (empty)"));
    } else {
        lines.extend(text.lines().map(|l| format!("  {}", l)));
    }
    lines
}
