/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    /// Malformed timeout, coefficient, or retry configuration.
    ///
    /// Raised at construction time; a policy is never partially built.
    #[error("validation error: {0}")]
    Validation(String),
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Retryable HTTP status that kept failing after the status budget ran out.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// No adapter is mounted for the request URL.
    #[error("no adapter mounted for '{url}'")]
    NoAdapter { url: String },
}

impl ResilienceError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
