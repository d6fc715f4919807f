use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;

use crate::{timeout::check_seconds, ResilienceError, Result, RetryAdapter, Transport};

/// Upper bound on a single backoff delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Failure category a retry is charged against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryCause {
    /// Connection could not be established.
    Connect,
    /// Connection was made but the response did not arrive in time or broke off.
    Read,
    /// Server answered with a status from the schedule's forcelist.
    Status(u16),
}

/// Methods whose read failures and forcelisted statuses may be retried.
pub const DEFAULT_ALLOWED_METHODS: [Method; 6] = [
    Method::HEAD,
    Method::GET,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
];

/// Per-category retry budgets plus backoff parameters.
///
/// `total` caps every retry; `connect`, `read` and `status` further cap
/// their own category when set. Status codes are only retried when they
/// appear in the forcelist. Read and status retries are limited to the
/// allowed methods; connect failures are retried for any method since
/// nothing reached the server.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrySchedule {
    total: u32,
    connect: Option<u32>,
    read: Option<u32>,
    status: Option<u32>,
    backoff_factor: f64,
    backoff_max: Duration,
    status_forcelist: Vec<u16>,
    allowed_methods: Vec<Method>,
}

impl RetrySchedule {
    /// Schedule bounded only by `total`, no backoff.
    pub fn new(total: u32) -> Self {
        Self {
            total,
            connect: None,
            read: None,
            status: None,
            backoff_factor: 0.0,
            backoff_max: DEFAULT_BACKOFF_MAX,
            status_forcelist: Vec::new(),
            allowed_methods: DEFAULT_ALLOWED_METHODS.to_vec(),
        }
    }

    /// Schedule that never retries.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Same budget for total, connect and read failures.
    pub fn uniform(retries: u32) -> Self {
        Self::new(retries).with_connect(retries).with_read(retries)
    }

    pub fn with_connect(mut self, retries: u32) -> Self {
        self.connect = Some(retries);
        self
    }

    pub fn with_read(mut self, retries: u32) -> Self {
        self.read = Some(retries);
        self
    }

    pub fn with_status(mut self, retries: u32) -> Self {
        self.status = Some(retries);
        self
    }

    pub fn with_status_forcelist(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.status_forcelist = statuses.into_iter().collect();
        self
    }

    /// Replaces the methods eligible for read and status retries.
    pub fn with_allowed_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allowed_methods = methods.into_iter().collect();
        self
    }

    pub fn with_backoff_max(mut self, backoff_max: Duration) -> Self {
        self.backoff_max = backoff_max;
        self
    }

    /// Sets the backoff factor in seconds; must be finite and non-negative.
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Result<Self> {
        self.backoff_factor = check_seconds("backoff_factor", backoff_factor)?;
        Ok(self)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn connect(&self) -> Option<u32> {
        self.connect
    }

    pub fn read(&self) -> Option<u32> {
        self.read
    }

    pub fn status(&self) -> Option<u32> {
        self.status
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    pub fn status_forcelist(&self) -> &[u16] {
        &self.status_forcelist
    }

    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed_methods
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Whether a failure of `method` with `cause` may be retried at all,
    /// budget aside.
    pub fn is_retryable(&self, method: &Method, cause: RetryCause) -> bool {
        match cause {
            RetryCause::Connect => true,
            RetryCause::Read => self.allowed_methods.contains(method),
            RetryCause::Status(status) => {
                self.is_retryable_status(status) && self.allowed_methods.contains(method)
            }
        }
    }

    /// Delay before the `retry`-th retry (1-based).
    ///
    /// `backoff_factor * 2^(retry - 1)`, capped at `backoff_max`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if retry == 0 || self.backoff_factor == 0.0 {
            return Duration::ZERO;
        }
        let exp = retry.saturating_sub(1).min(63) as i32;
        let seconds = (self.backoff_factor * 2f64.powi(exp)).min(self.backoff_max.as_secs_f64());
        Duration::try_from_secs_f64(seconds).unwrap_or(self.backoff_max)
    }

    /// Fresh counters for one request.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            total: self.total,
            connect: self.connect,
            read: self.read,
            status: self.status,
            taken: 0,
        }
    }
}

/// Remaining retries for a single request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    total: u32,
    connect: Option<u32>,
    read: Option<u32>,
    status: Option<u32>,
    taken: u32,
}

impl RetryBudget {
    /// Charges one retry to `cause`.
    ///
    /// Returns the 1-based index of the retry about to happen, or `None`
    /// when the total or the category budget is spent. A refused charge
    /// leaves the budget unchanged.
    pub fn consume(&mut self, cause: RetryCause) -> Option<u32> {
        if self.total == 0 {
            return None;
        }
        let category = match cause {
            RetryCause::Connect => &mut self.connect,
            RetryCause::Read => &mut self.read,
            RetryCause::Status(_) => &mut self.status,
        };
        if let Some(left) = category {
            *left = left.checked_sub(1)?;
        }
        self.total -= 1;
        self.taken += 1;
        Some(self.taken)
    }

    /// Retries charged so far.
    pub fn taken(&self) -> u32 {
        self.taken
    }
}

/// Retry argument: a uniform count or a pre-built schedule used verbatim.
#[derive(Clone, Debug, PartialEq)]
pub enum Retries {
    Count(u32),
    Schedule(RetrySchedule),
}

impl From<u32> for Retries {
    fn from(count: u32) -> Self {
        Self::Count(count)
    }
}

impl From<RetrySchedule> for Retries {
    fn from(schedule: RetrySchedule) -> Self {
        Self::Schedule(schedule)
    }
}

impl TryFrom<i64> for Retries {
    type Error = ResilienceError;

    fn try_from(count: i64) -> Result<Self> {
        non_negative_count(count).map(Self::Count)
    }
}

impl FromStr for Retries {
    type Err = ResilienceError;

    fn from_str(raw: &str) -> Result<Self> {
        parse_retry_count(raw).map(Self::Count)
    }
}

pub(crate) fn parse_retry_count(raw: &str) -> Result<u32> {
    let count = raw.trim().parse::<i64>().map_err(|_| {
        ResilienceError::validation(format!("retries must be an integer, got '{raw}'"))
    })?;
    non_negative_count(count)
}

fn non_negative_count(count: i64) -> Result<u32> {
    u32::try_from(count).map_err(|_| {
        ResilienceError::validation(format!(
            "retries must be a non-negative integer, got {count}"
        ))
    })
}

/// Retry budget and backoff factor installed on a [`Transport`].
///
/// Defaults to one retry with no delay between attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    retries: Retries,
    backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: Retries::Count(1),
            backoff_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Uniform budget of `retries` for total, connect and read failures.
    pub fn new(retries: u32) -> Self {
        Self::from_retries(Retries::Count(retries))
    }

    /// Pre-built schedule, used verbatim.
    pub fn from_schedule(schedule: RetrySchedule) -> Self {
        Self::from_retries(Retries::Schedule(schedule))
    }

    pub fn from_retries(retries: impl Into<Retries>) -> Self {
        Self {
            retries: retries.into(),
            ..Self::default()
        }
    }

    /// Builds a policy from optional parts, applying the defaults.
    pub fn from_parts(retries: Option<Retries>, backoff_factor: Option<f64>) -> Result<Self> {
        let policy = retries.map(Self::from_retries).unwrap_or_default();
        match backoff_factor {
            Some(backoff_factor) => policy.with_backoff_factor(backoff_factor),
            None => Ok(policy),
        }
    }

    /// Sets the backoff factor used when the schedule is synthesized from a
    /// count. A pre-built schedule keeps its own factor.
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Result<Self> {
        self.backoff_factor = check_seconds("backoff_factor", backoff_factor)?;
        Ok(self)
    }

    pub fn retries(&self) -> &Retries {
        &self.retries
    }

    pub fn total_attempts(&self) -> u32 {
        match &self.retries {
            Retries::Count(count) => *count,
            Retries::Schedule(schedule) => schedule.total(),
        }
    }

    pub fn backoff_factor(&self) -> f64 {
        match &self.retries {
            Retries::Count(_) => self.backoff_factor,
            Retries::Schedule(schedule) => schedule.backoff_factor(),
        }
    }

    /// Schedule handed to the transport adapters.
    pub fn schedule(&self) -> RetrySchedule {
        match &self.retries {
            Retries::Count(count) => RetrySchedule {
                backoff_factor: self.backoff_factor,
                ..RetrySchedule::uniform(*count)
            },
            Retries::Schedule(schedule) => schedule.clone(),
        }
    }

    /// Mounts one adapter carrying this policy for both `http://` and
    /// `https://`, replacing whatever was mounted there.
    pub fn install(&self, transport: &mut Transport) {
        let adapter = Arc::new(RetryAdapter::new(self.schedule()));
        transport.mount("http://", Arc::clone(&adapter));
        transport.mount("https://", adapter);
    }
}
