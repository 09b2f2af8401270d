pub mod conversation;
pub mod ids;
pub mod message;
pub mod project;

pub use conversation::Conversation;
pub use ids::{ConversationId, ProjectId};
pub use message::{Message, Sender};
pub use project::{Note, Project};
