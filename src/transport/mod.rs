pub mod http;
pub mod local;
pub mod traits;
pub mod types;

pub use http::HttpBackend;
pub use local::{EchoResponder, LocalBackend, Responder};
pub use traits::Backend;
pub use types::{Action, ActionRequest, DispatchError, Envelope, FailureKind};
