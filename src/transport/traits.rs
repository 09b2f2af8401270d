use async_trait::async_trait;

use super::types::{ActionRequest, DispatchError, Envelope};

/// A single action-dispatch endpoint.
///
/// Implementations only move requests and envelopes; interpreting the
/// `success` flag is left to the dispatcher.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn dispatch(&self, request: ActionRequest) -> Result<Envelope, DispatchError>;
}
