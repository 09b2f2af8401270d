use serde::{Deserialize, Serialize};

use super::ids::ProjectId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

/// The free-text note attached to a project. One per project, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub project_id: ProjectId,
    pub content: String,
    /// Client-side edit counter at the time the note was written.
    pub revision: u64,
}
