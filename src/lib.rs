//! `resilient-http` adds timeout scaling and retry/backoff policies to
//! `reqwest`-based HTTP clients.
//!
//! - [`TimeoutPolicy`] derives effective connect/read timeouts from base
//!   values and a coefficient.
//! - [`RetryPolicy`] turns a retry count (or a pre-built [`RetrySchedule`])
//!   into adapters mounted on a [`Transport`].
//! - [`ClientFactory::build`] wires both into a [`ConfiguredClient`].

mod client;
mod error;
mod options;
mod retry;
mod timeout;
mod transport;

pub use client::{ClientFactory, ConfiguredClient, PendingRequest};
pub use error::ResilienceError;
pub use options::ResilienceOptions;
pub use retry::{
    Retries, RetryBudget, RetryCause, RetryPolicy, RetrySchedule, DEFAULT_ALLOWED_METHODS,
    DEFAULT_BACKOFF_MAX,
};
pub use timeout::{
    EffectiveTimeout, TimeoutInput, TimeoutOverrides, TimeoutPolicy, TimeoutPolicyBuilder,
};
pub use transport::{RetryAdapter, Transport};

pub type Result<T> = std::result::Result<T, ResilienceError>;
