#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown job handle: {0}")]
    UnknownHandle(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}
