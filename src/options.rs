use serde::{Deserialize, Serialize};

use crate::{
    retry::parse_retry_count, ResilienceError, Result, Retries, RetryPolicy, TimeoutInput,
    TimeoutPolicy,
};

/// Configures timeout and retry behavior from plain values.
///
/// Every field is optional; absent values fall back to the policy defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceOptions {
    /// Read timeout in seconds, or `[connect, read]`.
    pub read_timeout: Option<TimeoutInput>,
    /// Connect timeout in seconds.
    pub connect_timeout: Option<f64>,
    /// Multiplier applied to both timeouts.
    pub timeout_coefficient: Option<f64>,
    /// Retries after the initial attempt.
    pub retries: Option<u32>,
    /// Base delay in seconds for exponential backoff.
    pub backoff_factor: Option<f64>,
}

impl ResilienceOptions {
    /// Parses options from JSON.
    ///
    /// Wrongly typed values (e.g. `"read_timeout": "abc"`) are validation errors.
    ///
    /// ```
    /// use resilient_http::ResilienceOptions;
    ///
    /// let opts = ResilienceOptions::from_json(r#"{"read_timeout": [2, 10], "retries": 3}"#).unwrap();
    /// assert_eq!(opts.timeout_policy().unwrap().as_pair(), (Some(2.0), Some(10.0)));
    /// ```
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| ResilienceError::validation(format!("invalid options JSON: {err}")))
    }

    /// Reads options from environment variables.
    ///
    /// Reads:
    /// - `HTTP_READ_TIMEOUT`: `"5"` or `"2,5"` (connect, read)
    /// - `HTTP_CONNECT_TIMEOUT`
    /// - `HTTP_TIMEOUT_COEFFICIENT`
    /// - `HTTP_RETRIES`
    /// - `HTTP_BACKOFF_FACTOR`
    ///
    /// Unset or empty variables stay absent; unparsable ones are errors.
    ///
    /// **Not available on `wasm32` targets**: environment variables do not
    /// exist in browser runtimes.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Result<Self> {
        use crate::timeout::parse_seconds;

        Ok(Self {
            read_timeout: env_value("HTTP_READ_TIMEOUT", str::parse::<TimeoutInput>)?,
            connect_timeout: env_value("HTTP_CONNECT_TIMEOUT", |raw| {
                parse_seconds("connect", raw)
            })?,
            timeout_coefficient: env_value("HTTP_TIMEOUT_COEFFICIENT", |raw| {
                parse_seconds("coefficient", raw)
            })?,
            retries: env_value("HTTP_RETRIES", parse_retry_count)?,
            backoff_factor: env_value("HTTP_BACKOFF_FACTOR", |raw| {
                parse_seconds("backoff_factor", raw)
            })?,
        })
    }

    pub fn timeout_policy(&self) -> Result<TimeoutPolicy> {
        TimeoutPolicy::new(
            self.read_timeout,
            self.connect_timeout,
            self.timeout_coefficient,
        )
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::from_parts(self.retries.map(Retries::Count), self.backoff_factor)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn env_value<T>(name: &str, parse: impl FnOnce(&str) -> Result<T>) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => parse(&raw).map(Some).map_err(|err| match err {
            ResilienceError::Validation(message) => {
                ResilienceError::validation(format!("{name}: {message}"))
            }
            other => other,
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ResilienceError::validation(format!(
            "{name} is not valid unicode"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::ResilienceOptions;
    use crate::{EffectiveTimeout, ResilienceError};

    #[test]
    fn empty_json_yields_defaults() {
        let opts = ResilienceOptions::from_json("{}").unwrap();
        assert_eq!(opts, ResilienceOptions::default());

        let retry = opts.retry_policy().unwrap();
        assert_eq!(retry.total_attempts(), 1);
        assert_eq!(retry.backoff_factor(), 0.0);
        assert_eq!(opts.timeout_policy().unwrap().effective(), None);
    }

    #[test]
    fn json_builds_scaled_policies() {
        let opts = ResilienceOptions::from_json(
            r#"{
                "read_timeout": 5,
                "connect_timeout": 2,
                "timeout_coefficient": 2,
                "retries": 4,
                "backoff_factor": 0.3
            }"#,
        )
        .unwrap();

        let timeout = opts.timeout_policy().unwrap();
        assert_eq!(
            timeout.effective(),
            Some(EffectiveTimeout::Pair {
                connect: 4.0,
                read: 10.0
            })
        );

        let retry = opts.retry_policy().unwrap();
        assert_eq!(retry.total_attempts(), 4);
        assert_eq!(retry.schedule().backoff_factor(), 0.3);
    }

    #[test]
    fn json_rejects_wrong_types() {
        for raw in [
            r#"{"read_timeout": "abc"}"#,
            r#"{"retries": "abc"}"#,
            r#"{"retries": -2}"#,
            r#"{"read_timeout": [1, 2, 3]}"#,
            r#"{"unknown": 1}"#,
        ] {
            let err = ResilienceOptions::from_json(raw).expect_err(raw);
            assert!(matches!(err, ResilienceError::Validation(_)), "{raw}");
        }
    }

    #[test]
    fn json_negative_backoff_fails_when_building_policy() {
        let opts = ResilienceOptions::from_json(r#"{"backoff_factor": -1}"#).unwrap();
        assert!(matches!(
            opts.retry_policy(),
            Err(ResilienceError::Validation(_))
        ));
    }

    #[test]
    fn env_values_are_parsed_and_validated() {
        std::env::set_var("HTTP_READ_TIMEOUT", "3,9");
        std::env::set_var("HTTP_RETRIES", "2");
        std::env::remove_var("HTTP_CONNECT_TIMEOUT");
        std::env::remove_var("HTTP_TIMEOUT_COEFFICIENT");
        std::env::set_var("HTTP_BACKOFF_FACTOR", " ");

        let opts = ResilienceOptions::from_env().unwrap();
        assert_eq!(
            opts.timeout_policy().unwrap().as_pair(),
            (Some(3.0), Some(9.0))
        );
        assert_eq!(opts.retries, Some(2));
        assert_eq!(opts.backoff_factor, None);

        std::env::set_var("HTTP_RETRIES", "abc");
        assert!(matches!(
            ResilienceOptions::from_env(),
            Err(ResilienceError::Validation(_))
        ));

        std::env::set_var("HTTP_RETRIES", "-1");
        assert!(matches!(
            ResilienceOptions::from_env(),
            Err(ResilienceError::Validation(_))
        ));

        for name in ["HTTP_READ_TIMEOUT", "HTTP_RETRIES", "HTTP_BACKOFF_FACTOR"] {
            std::env::remove_var(name);
        }
    }
}
