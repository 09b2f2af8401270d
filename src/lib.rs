//! Session synchronization client for a private assistant service.
//!
//! Projects, conversations and per-project notes are kept in sync with a
//! remote action endpoint (or the in-process [`transport::LocalBackend`]).
//! [`session::SessionController`] owns all session state; front ends feed it
//! [`session::SessionMsg`]s and render its view model.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
pub mod transport;
pub mod ui;

#[cfg(test)]
mod testing;
