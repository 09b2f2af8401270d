use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::models::{Conversation, ConversationId, Message, Note, Project, ProjectId, Sender};

/// SQLite store behind the in-process backend.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("database connection lock poisoned"))
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Create an in-memory database (used for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE conversations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
                );

                CREATE TABLE messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id INTEGER NOT NULL,
                    sender TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE INDEX idx_conversations_project ON conversations(project_id);
                CREATE INDEX idx_conversations_updated ON conversations(updated_at DESC);
                CREATE INDEX idx_messages_conversation ON messages(conversation_id);

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS notes (
                    project_id INTEGER PRIMARY KEY,
                    content TEXT NOT NULL,
                    revision INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL,
                    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
                );

                UPDATE schema_version SET version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Projects ---

    pub async fn insert_project(&self, name: &str) -> Result<Project> {
        let conn = self.conn.clone();
        let name = name.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO projects (name, created_at) VALUES (?1, ?2)",
                params![name, Utc::now().to_rfc3339()],
            )?;
            Ok(Project {
                id: ProjectId(conn.last_insert_rowid()),
                name,
            })
        })
        .await?
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let project = conn
                .query_row(
                    "SELECT id, name FROM projects WHERE id = ?1",
                    params![id.get()],
                    |row| {
                        Ok(Project {
                            id: ProjectId(row.get(0)?),
                            name: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(project)
        })
        .await?
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare("SELECT id, name FROM projects ORDER BY name, id")?;
            let projects = stmt
                .query_map([], |row| {
                    Ok(Project {
                        id: ProjectId(row.get(0)?),
                        name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(projects)
        })
        .await?
    }

    /// Returns `false` when no such project existed.
    pub async fn delete_project(&self, id: ProjectId) -> Result<bool> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let removed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id.get()])?;
            Ok(removed > 0)
        })
        .await?
    }

    // --- Conversations ---

    pub async fn insert_conversation(
        &self,
        project_id: ProjectId,
        title: &str,
    ) -> Result<Conversation> {
        let conn = self.conn.clone();
        let title = title.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO conversations (project_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![project_id.get(), title, now],
            )?;
            Ok(Conversation {
                id: ConversationId(conn.last_insert_rowid()),
                title,
                project_id,
            })
        })
        .await?
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let conversation = conn
                .query_row(
                    "SELECT id, title, project_id FROM conversations WHERE id = ?1",
                    params![id.get()],
                    Self::row_to_conversation,
                )
                .optional()?;
            Ok(conversation)
        })
        .await?
    }

    /// Most recently active conversations first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, title, project_id FROM conversations
                 ORDER BY updated_at DESC, id DESC",
            )?;
            let conversations = stmt
                .query_map([], Self::row_to_conversation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await?
    }

    pub async fn touch_conversation(&self, id: ConversationId) -> Result<()> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.get()],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let removed =
                conn.execute("DELETE FROM conversations WHERE id = ?1", params![id.get()])?;
            Ok(removed > 0)
        })
        .await?
    }

    // --- Messages ---

    pub async fn insert_message(&self, conversation_id: ConversationId, message: &Message) -> Result<()> {
        let conn = self.conn.clone();
        let message = message.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO messages (conversation_id, sender, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation_id.get(),
                    message.sender.as_str(),
                    message.content,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT sender, content FROM messages
                 WHERE conversation_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![conversation_id.get()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(sender, content)| {
                    let sender = Sender::from_str(&sender)
                        .ok_or_else(|| anyhow!("Unknown sender: {}", sender))?;
                    Ok(Message { sender, content })
                })
                .collect()
        })
        .await?
    }

    // --- Notes ---

    pub async fn get_note(&self, project_id: ProjectId) -> Result<Option<Note>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let note = conn
                .query_row(
                    "SELECT content, revision FROM notes WHERE project_id = ?1",
                    params![project_id.get()],
                    |row| {
                        Ok(Note {
                            project_id,
                            content: row.get(0)?,
                            revision: row.get::<_, i64>(1)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(note)
        })
        .await?
    }

    /// Last write wins; the revision is stored as given.
    pub async fn upsert_note(&self, note: &Note) -> Result<()> {
        let conn = self.conn.clone();
        let note = note.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO notes (project_id, content, revision, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(project_id) DO UPDATE SET
                    content = excluded.content,
                    revision = excluded.revision,
                    updated_at = excluded.updated_at",
                params![
                    note.project_id.get(),
                    note.content,
                    note.revision as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        Ok(Conversation {
            id: ConversationId(row.get(0)?),
            title: row.get(1)?,
            project_id: ProjectId(row.get(2)?),
        })
    }
}
