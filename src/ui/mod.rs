//! Line-oriented terminal front end.

pub mod render;
pub mod repl;
