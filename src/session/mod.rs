pub mod controller;
pub mod state;
pub mod view;

pub use controller::{SessionCmd, SessionController, SessionMsg};
pub use state::{ConversationSlot, Phase, SessionState};
pub use view::{Notice, NoticeLevel, Transcript, TranscriptEntry};
