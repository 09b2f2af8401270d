use chrono::{DateTime, Utc};

use crate::session::view::TranscriptEntry;
use crate::models::Sender;

pub fn export_to_markdown(
    project_name: &str,
    conversation_title: Option<&str>,
    entries: &[TranscriptEntry],
    exported_at: DateTime<Utc>,
) -> String {
    let mut output = format!("# {}\n\n", conversation_title.unwrap_or("New chat"));
    output.push_str(&format!(
        "> Project: {} | Exported: {}\n\n",
        project_name,
        exported_at.format("%Y-%m-%d %H:%M")
    ));

    output.push_str("---\n\n");

    for entry in entries {
        let label = match entry.sender {
            Sender::User => "You",
            Sender::Assistant => "Assistant",
            Sender::System if entry.error => "Error",
            Sender::System => "System",
        };
        output.push_str(&format!("### {}\n\n{}\n\n", label, entry.content));
    }

    output
}
