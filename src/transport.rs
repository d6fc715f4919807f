use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// tokio::time::sleep is only available on non-WASM targets.
#[cfg(not(target_arch = "wasm32"))]
use tokio::time::sleep;

use crate::{ResilienceError, Result, RetryCause, RetrySchedule};

/// Adapter mounted on a URL prefix; runs the retry loop for its requests.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryAdapter {
    schedule: RetrySchedule,
}

impl RetryAdapter {
    pub fn new(schedule: RetrySchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Sends `request`, retrying transient failures within the schedule's budget.
    ///
    /// Requests whose body cannot be cloned are sent exactly once; a
    /// forcelisted status on such a request is returned as a response.
    pub async fn send(
        &self,
        http: &reqwest::Client,
        request: reqwest::Request,
    ) -> Result<reqwest::Response> {
        let method = request.method().clone();
        let mut budget = self.schedule.budget();
        let mut pending = request;

        #[cfg(all(feature = "tracing", not(target_arch = "wasm32")))]
        let started = std::time::Instant::now();

        loop {
            let next = pending.try_clone();

            let (cause, failure) = match http.execute(pending).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !self
                        .schedule
                        .is_retryable(&method, RetryCause::Status(status))
                    {
                        #[cfg(all(feature = "tracing", not(target_arch = "wasm32")))]
                        tracing::trace!(
                            status,
                            retries = budget.taken(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "request completed"
                        );
                        return Ok(response);
                    }
                    (RetryCause::Status(status), Failure::Status(response))
                }
                Err(err) => match classify_transport(&err) {
                    Some(cause) if self.schedule.is_retryable(&method, cause) => {
                        (cause, Failure::Transport(err))
                    }
                    _ => return Err(ResilienceError::Transport(err)),
                },
            };

            let Some(next) = next else {
                return failure.into_unretried();
            };
            let Some(retry) = budget.consume(cause) else {
                #[cfg(feature = "tracing")]
                tracing::warn!(?cause, retries = budget.taken(), "retry budget exhausted");
                return Err(failure.into_error().await);
            };

            pending = next;
            self.wait_before_retry(retry, cause).await;
        }
    }

    /// Waits before the next retry attempt.
    ///
    /// On native targets: exponential backoff sleep via `tokio::time::sleep`.
    /// On WASM targets: no-op, `tokio::time::sleep` is not available.
    async fn wait_before_retry(&self, retry: u32, cause: RetryCause) {
        let delay = self.schedule.backoff_delay(retry);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            ?cause,
            retry,
            delay_ms = delay.as_millis() as u64,
            "retrying request"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = cause;

        #[cfg(not(target_arch = "wasm32"))]
        if !delay.is_zero() {
            sleep(delay).await;
        }

        // WASM: no sleep implementation, suppress unused variable warning.
        #[cfg(target_arch = "wasm32")]
        let _ = delay;
    }
}

enum Failure {
    Status(reqwest::Response),
    Transport(reqwest::Error),
}

impl Failure {
    /// Outcome for a request that could not be replayed.
    fn into_unretried(self) -> Result<reqwest::Response> {
        match self {
            Self::Status(response) => Ok(response),
            Self::Transport(err) => Err(ResilienceError::Transport(err)),
        }
    }

    async fn into_error(self) -> ResilienceError {
        match self {
            Self::Status(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => ResilienceError::Http { status, body },
                    Err(err) => ResilienceError::Transport(err),
                }
            }
            Self::Transport(err) => ResilienceError::Transport(err),
        }
    }
}

/// Maps a `reqwest` failure to the budget it is charged against.
///
/// `None` means the error is not transient and is returned immediately.
fn classify_transport(err: &reqwest::Error) -> Option<RetryCause> {
    // is_connect() is not available on wasm32 targets (no TCP)
    #[cfg(not(target_arch = "wasm32"))]
    if err.is_connect() {
        return Some(RetryCause::Connect);
    }
    if err.is_timeout() || err.is_request() || err.is_body() {
        return Some(RetryCause::Read);
    }
    None
}

/// HTTP transport: a `reqwest` client plus adapters keyed by URL prefix.
///
/// Prefixes are matched case-insensitively, longest first. A new transport
/// carries retry-free adapters for `http://` and `https://`.
#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    adapters: Vec<(String, Arc<RetryAdapter>)>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self::from_client(reqwest::Client::new())
    }

    /// Wraps an existing client, sharing its connection pool.
    pub fn from_client(http: reqwest::Client) -> Self {
        let adapter = Arc::new(RetryAdapter::new(RetrySchedule::none()));
        let mut transport = Self {
            http,
            adapters: Vec::new(),
        };
        transport.mount("http://", Arc::clone(&adapter));
        transport.mount("https://", adapter);
        transport
    }

    /// Builds a fresh client with a connect limit.
    ///
    /// `connect_timeout` is ignored on wasm32, where the Fetch API has no
    /// separate connect phase.
    pub fn with_connect_timeout(connect_timeout: Option<Duration>) -> Result<Self> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = match connect_timeout {
            Some(connect_timeout) => builder.connect_timeout(connect_timeout),
            None => builder,
        };
        #[cfg(target_arch = "wasm32")]
        let _ = connect_timeout;

        let http = builder.build().map_err(ResilienceError::Transport)?;
        Ok(Self::from_client(http))
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Mounts `adapter` on `prefix`, replacing any adapter already there.
    pub fn mount(&mut self, prefix: impl Into<String>, adapter: Arc<RetryAdapter>) {
        let prefix = prefix.into().to_ascii_lowercase();

        #[cfg(feature = "tracing")]
        tracing::debug!(%prefix, total = adapter.schedule().total(), "mounting retry adapter");

        match self.adapters.iter_mut().find(|(mounted, _)| *mounted == prefix) {
            Some(slot) => slot.1 = adapter,
            None => {
                self.adapters.push((prefix, adapter));
                self.adapters
                    .sort_by(|(left, _), (right, _)| right.len().cmp(&left.len()));
            }
        }
    }

    /// Adapter whose prefix matches `url`.
    pub fn adapter_for(&self, url: &str) -> Result<&Arc<RetryAdapter>> {
        let lowered = url.to_ascii_lowercase();
        self.adapters
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix.as_str()))
            .map(|(_, adapter)| adapter)
            .ok_or_else(|| ResilienceError::NoAdapter {
                url: url.to_owned(),
            })
    }

    /// Mounted `(prefix, adapter)` pairs, longest prefix first.
    pub fn mounted(&self) -> impl Iterator<Item = (&str, &RetryAdapter)> {
        self.adapters
            .iter()
            .map(|(prefix, adapter)| (prefix.as_str(), adapter.as_ref()))
    }

    /// Sends `request` through the adapter mounted for its URL.
    pub async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let adapter = self.adapter_for(request.url().as_str())?;
        adapter.send(&self.http, request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Failure, RetryAdapter, Transport};
    use crate::{ResilienceError, RetrySchedule};

    #[test]
    fn new_transport_mounts_retry_free_adapters() {
        let transport = Transport::new();
        let prefixes: Vec<&str> = transport.mounted().map(|(prefix, _)| prefix).collect();
        assert_eq!(prefixes, vec!["https://", "http://"]);
        for (_, adapter) in transport.mounted() {
            assert_eq!(adapter.schedule(), &RetrySchedule::none());
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let mut transport = Transport::new();
        let special = Arc::new(RetryAdapter::new(RetrySchedule::new(7)));
        transport.mount("https://api.example.com/", Arc::clone(&special));

        let matched = transport
            .adapter_for("HTTPS://api.example.com/v1/items")
            .unwrap();
        assert!(Arc::ptr_eq(matched, &special));

        let other = transport.adapter_for("https://example.org/").unwrap();
        assert_eq!(other.schedule().total(), 0);
    }

    #[test]
    fn unknown_scheme_has_no_adapter() {
        let err = Transport::new()
            .adapter_for("ftp://example.com/file")
            .expect_err("ftp must not match");
        assert!(matches!(err, ResilienceError::NoAdapter { .. }));
    }

    #[test]
    fn clones_do_not_share_mounts() {
        let original = Transport::new();
        let mut copy = original.clone();
        copy.mount(
            "http://",
            Arc::new(RetryAdapter::new(RetrySchedule::uniform(4))),
        );

        assert_eq!(
            original.adapter_for("http://x/").unwrap().schedule().total(),
            0
        );
        assert_eq!(copy.adapter_for("http://x/").unwrap().schedule().total(), 4);
    }

    #[test]
    fn unreplayable_status_is_returned_as_response() {
        let raw = axum::http::Response::builder()
            .status(503)
            .body("busy")
            .expect("response must build");
        let response = Failure::Status(reqwest::Response::from(raw))
            .into_unretried()
            .expect("status must not become an error");
        assert_eq!(response.status().as_u16(), 503);
    }
}
