pub mod api;
pub mod confirm;
pub mod database;
pub mod dispatcher;
pub mod export;
pub mod history;
pub mod notes;

pub use api::SessionApi;
pub use confirm::{Confirmation, Confirmer, DeleteTarget};
pub use database::Database;
pub use dispatcher::{BusyIndicator, Dispatcher};
pub use history::{HistoryRow, HistoryView};
pub use notes::NotesEngine;
