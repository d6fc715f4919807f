use std::fmt;
use std::time::Duration;

use reqwest::{
    header::{HeaderName, HeaderValue},
    IntoUrl, Method,
};
use serde::Serialize;

use crate::{ResilienceError, Result, RetryPolicy, TimeoutPolicy, Transport};

/// Wires a [`RetryPolicy`] and a default [`TimeoutPolicy`] onto a transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientFactory;

impl ClientFactory {
    /// Builds a [`ConfiguredClient`].
    ///
    /// Without a `transport`, a fresh one is created; its client-level
    /// connect limit comes from `timeout_policy`. A supplied transport is
    /// kept as-is apart from the retry adapters mounted on it.
    pub fn build(
        transport: Option<Transport>,
        retry_policy: RetryPolicy,
        timeout_policy: TimeoutPolicy,
    ) -> Result<ConfiguredClient> {
        let connect = connect_limit(&timeout_policy);
        let mut transport = match transport {
            Some(transport) => {
                #[cfg(feature = "tracing")]
                if let Some(connect) = connect {
                    tracing::debug!(
                        connect_ms = connect.as_millis() as u64,
                        "supplied transport keeps its own connect timeout, policy value not applied"
                    );
                }
                transport
            }
            None => Transport::with_connect_timeout(connect)?,
        };
        retry_policy.install(&mut transport);

        Ok(ConfiguredClient {
            transport,
            retry_policy,
            timeout_policy,
        })
    }
}

#[derive(Clone)]
/// HTTP client that retries transient failures and applies default timeouts.
pub struct ConfiguredClient {
    transport: Transport,
    retry_policy: RetryPolicy,
    timeout_policy: TimeoutPolicy,
}

impl fmt::Debug for ConfiguredClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredClient")
            .field("retry_policy", &self.retry_policy)
            .field("timeout_policy", &self.timeout_policy)
            .finish_non_exhaustive()
    }
}

impl ConfiguredClient {
    /// Starts a request; the default timeout applies unless overridden.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> PendingRequest<'_> {
        PendingRequest {
            client: self,
            builder: self.transport.http().request(method, url),
            timeout: None,
        }
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> PendingRequest<'_> {
        self.request(Method::GET, url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> PendingRequest<'_> {
        self.request(Method::POST, url)
    }

    /// Sends a prebuilt request, applying the default timeout when the
    /// request carries none.
    pub async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        if request.timeout().is_none() {
            if let Some(read) = read_limit(&self.timeout_policy) {
                *request.timeout_mut() = Some(read);
            }
        }
        self.transport.send(request).await
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn timeout_policy(&self) -> &TimeoutPolicy {
        &self.timeout_policy
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

/// Request under construction on a [`ConfiguredClient`].
pub struct PendingRequest<'a> {
    client: &'a ConfiguredClient,
    builder: reqwest::RequestBuilder,
    timeout: Option<TimeoutPolicy>,
}

impl PendingRequest<'_> {
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, payload: &T) -> Self {
        self.builder = self.builder.json(payload);
        self
    }

    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Self {
        self.builder = self.builder.query(query);
        self
    }

    /// Replaces the client's default timeout for this request only.
    ///
    /// The read value becomes the request timeout. The connect value is a
    /// client-level setting in `reqwest` and is not applied per request.
    pub fn timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn send(self) -> Result<reqwest::Response> {
        #[cfg(feature = "tracing")]
        if let Some(connect) = self.timeout.as_ref().and_then(connect_limit) {
            tracing::debug!(
                connect_ms = connect.as_millis() as u64,
                "connect timeout is client-level, per-request value not applied"
            );
        }

        let policy = self.timeout.unwrap_or(self.client.timeout_policy);
        let mut builder = self.builder;
        if let Some(read) = read_limit(&policy) {
            builder = builder.timeout(read);
        }
        let request = builder.build().map_err(ResilienceError::Transport)?;
        self.client.transport.send(request).await
    }
}

fn read_limit(policy: &TimeoutPolicy) -> Option<Duration> {
    policy.effective().and_then(|timeout| timeout.read_duration())
}

/// Connect half of the policy's transport argument, if it sets one.
fn connect_limit(policy: &TimeoutPolicy) -> Option<Duration> {
    policy
        .effective()
        .and_then(|timeout| timeout.connect_duration())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{connect_limit, read_limit, ClientFactory};
    use crate::{RetryPolicy, RetrySchedule, TimeoutPolicy, Transport};

    #[test]
    fn build_installs_policy_on_both_schemes() {
        let client = ClientFactory::build(
            None,
            RetryPolicy::new(3),
            TimeoutPolicy::from_read(5.0).unwrap(),
        )
        .unwrap();

        let transport = client.transport();
        let http = transport.adapter_for("http://localhost/").unwrap();
        let https = transport.adapter_for("https://localhost/").unwrap();
        assert!(Arc::ptr_eq(http, https));
        assert_eq!(http.schedule(), &RetrySchedule::uniform(3));
        assert_eq!(client.timeout_policy().read(), Some(5.0));
    }

    #[test]
    fn supplied_transport_keeps_extra_mounts() {
        let mut transport = Transport::new();
        RetryPolicy::new(9).install(&mut transport);
        transport.mount(
            "http://internal/",
            Arc::new(crate::RetryAdapter::new(RetrySchedule::none())),
        );

        let client =
            ClientFactory::build(Some(transport), RetryPolicy::new(2), TimeoutPolicy::default())
                .unwrap();
        let transport = client.transport();
        assert_eq!(
            transport.adapter_for("http://internal/x").unwrap().schedule(),
            &RetrySchedule::none()
        );
        assert_eq!(
            transport.adapter_for("http://public/x").unwrap().schedule(),
            &RetrySchedule::uniform(2)
        );
    }

    #[test]
    fn separate_builds_do_not_share_adapters() {
        let first =
            ClientFactory::build(None, RetryPolicy::new(0), TimeoutPolicy::default()).unwrap();
        let second =
            ClientFactory::build(None, RetryPolicy::new(5), TimeoutPolicy::default()).unwrap();

        let first_adapter = first.transport().adapter_for("https://a/").unwrap();
        let second_adapter = second.transport().adapter_for("https://a/").unwrap();
        assert!(!Arc::ptr_eq(first_adapter, second_adapter));
        assert_eq!(first_adapter.schedule().total(), 0);
        assert_eq!(second_adapter.schedule().total(), 5);
    }

    #[test]
    fn connect_limit_only_for_full_pairs() {
        let pair = TimeoutPolicy::from_read((2.0, 5.0)).unwrap();
        assert_eq!(connect_limit(&pair), Some(Duration::from_secs(2)));
        assert_eq!(read_limit(&pair), Some(Duration::from_secs(5)));

        let read_only = TimeoutPolicy::from_read(5.0).unwrap();
        assert_eq!(connect_limit(&read_only), None);

        let zero_connect = TimeoutPolicy::from_read((0.0, 5.0)).unwrap();
        assert_eq!(connect_limit(&zero_connect), None);
        assert_eq!(connect_limit(&TimeoutPolicy::default()), None);
    }

    #[test]
    fn debug_lists_policies() {
        let client =
            ClientFactory::build(None, RetryPolicy::default(), TimeoutPolicy::default()).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("retry_policy"));
        assert!(debug.contains("timeout_policy"));
    }
}
