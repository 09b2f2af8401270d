use thiserror::Error;

/// Client-side rejections raised before any request is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionFailure {
    #[error("Please select or create a project first.")]
    NoActiveProject,

    #[error("Please enter a message.")]
    EmptyMessage,

    #[error("The note is empty.")]
    EmptyNote,

    #[error("Please enter a project name.")]
    EmptyProjectName,

    #[error("Please wait for the current reply.")]
    SendInProgress,

    #[error("Nothing is awaiting confirmation.")]
    NothingToConfirm,
}
