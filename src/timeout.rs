use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ResilienceError, Result};

/// Timeout argument accepted for the read slot.
///
/// A bare number is the read timeout; a pair is understood as
/// `(connect, read)` and replaces any separately supplied connect value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutInput {
    /// Read timeout in seconds.
    Scalar(f64),
    /// `(connect, read)` in seconds.
    Pair(f64, f64),
}

impl From<f64> for TimeoutInput {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<u32> for TimeoutInput {
    fn from(value: u32) -> Self {
        Self::Scalar(f64::from(value))
    }
}

impl From<(f64, f64)> for TimeoutInput {
    fn from((connect, read): (f64, f64)) -> Self {
        Self::Pair(connect, read)
    }
}

impl FromStr for TimeoutInput {
    type Err = ResilienceError;

    /// Parses `"5"`, `"5,10"`, `"(5, 10)"` or `"[5, 10]"`.
    fn from_str(raw: &str) -> Result<Self> {
        let inner = raw
            .trim()
            .trim_start_matches(['(', '['])
            .trim_end_matches([')', ']']);
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [read] => Ok(Self::Scalar(parse_seconds("read", read)?)),
            [connect, read] => Ok(Self::Pair(
                parse_seconds("connect", connect)?,
                parse_seconds("read", read)?,
            )),
            _ => Err(ResilienceError::validation(format!(
                "timeout must be a number or a (connect, read) pair, got '{raw}'"
            ))),
        }
    }
}

/// Value handed to a transport as its timeout argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EffectiveTimeout {
    /// Read timeout only; there is no independent connect limit.
    Single(f64),
    /// Separate connect and read limits, in that order.
    Pair { connect: f64, read: f64 },
}

impl EffectiveTimeout {
    /// Read limit as a [`Duration`]; `None` when zero (no limit).
    pub fn read_duration(&self) -> Option<Duration> {
        match *self {
            Self::Single(read) | Self::Pair { read, .. } => limit_duration(read),
        }
    }

    /// Connect limit as a [`Duration`]; `None` for [`EffectiveTimeout::Single`].
    pub fn connect_duration(&self) -> Option<Duration> {
        match *self {
            Self::Single(_) => None,
            Self::Pair { connect, .. } => limit_duration(connect),
        }
    }
}

/// Connect/read timeouts scaled by an optional coefficient.
///
/// Values are seconds. The raw connect base never exceeds the raw read base:
/// it is clamped down on every construction path, before any scaling.
///
/// ```
/// use resilient_http::TimeoutPolicy;
///
/// let policy = TimeoutPolicy::from_read(5.0).unwrap();
/// assert_eq!(policy.with_coefficient(0.7).unwrap().read(), Some(3.5));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeoutPolicy {
    read: Option<f64>,
    connect: Option<f64>,
    coefficient: Option<f64>,
}

impl TimeoutPolicy {
    /// Builds a policy from raw values.
    ///
    /// A [`TimeoutInput::Pair`] unpacks into connect/read and takes
    /// precedence over `connect`.
    pub fn new(
        read: Option<TimeoutInput>,
        connect: Option<f64>,
        coefficient: Option<f64>,
    ) -> Result<Self> {
        let (connect, read) = match read {
            Some(TimeoutInput::Pair(connect, read)) => (Some(connect), Some(read)),
            Some(TimeoutInput::Scalar(read)) => (connect, Some(read)),
            None => (connect, None),
        };

        let read = read.map(|value| check_seconds("read", value)).transpose()?;
        let connect = connect
            .map(|value| check_seconds("connect", value))
            .transpose()?;
        let coefficient = coefficient
            .map(|value| check_seconds("coefficient", value))
            .transpose()?;

        let connect = match (connect, read) {
            (Some(connect), Some(read)) if connect > read => Some(read),
            _ => connect,
        };

        Ok(Self {
            read,
            connect,
            coefficient,
        })
    }

    /// Starts an empty builder.
    pub fn builder() -> TimeoutPolicyBuilder {
        TimeoutPolicyBuilder::default()
    }

    /// Shorthand for a policy with only a read value (or a pair).
    pub fn from_read(read: impl Into<TimeoutInput>) -> Result<Self> {
        Self::new(Some(read.into()), None, None)
    }

    /// Effective read timeout, `None` when no read base was given.
    pub fn read(&self) -> Option<f64> {
        self.read.map(|base| base * self.multiplier())
    }

    /// Effective connect timeout, `None` when no connect base was given.
    pub fn connect(&self) -> Option<f64> {
        self.connect.map(|base| base * self.multiplier())
    }

    /// Coefficient as supplied, without defaulting.
    pub fn coefficient(&self) -> Option<f64> {
        self.coefficient
    }

    /// Raw `(connect, read)` bases before scaling.
    pub fn bases(&self) -> (Option<f64>, Option<f64>) {
        (self.connect, self.read)
    }

    /// Effective values as `(connect, read)`.
    pub fn as_pair(&self) -> (Option<f64>, Option<f64>) {
        (self.connect(), self.read())
    }

    /// Chooses the transport timeout argument.
    ///
    /// A pair is returned only when both connect and read are set limits
    /// (present and non-zero). Anything else collapses to the read value
    /// alone, which is `None` when no read base exists.
    pub fn effective(&self) -> Option<EffectiveTimeout> {
        let read = self.read()?;
        match self.connect() {
            Some(connect) if is_set_limit(connect) && is_set_limit(read) => {
                Some(EffectiveTimeout::Pair { connect, read })
            }
            _ => Some(EffectiveTimeout::Single(read)),
        }
    }

    /// Same bases, new coefficient.
    pub fn with_coefficient(&self, coefficient: f64) -> Result<Self> {
        self.with_overrides(TimeoutOverrides::default().coefficient(coefficient))
    }

    /// Copy with any subset of read/connect/coefficient replaced.
    ///
    /// Unset override fields keep the current raw values.
    pub fn with_overrides(&self, overrides: TimeoutOverrides) -> Result<Self> {
        Self::new(
            overrides.read.or(self.read.map(TimeoutInput::Scalar)),
            overrides.connect.or(self.connect),
            overrides.coefficient.or(self.coefficient),
        )
    }

    // A zero coefficient behaves like an absent one.
    fn multiplier(&self) -> f64 {
        match self.coefficient {
            Some(coefficient) if coefficient != 0.0 => coefficient,
            _ => 1.0,
        }
    }
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.read() {
            Some(read) => write!(f, "{read}"),
            None => f.write_str("None"),
        }
    }
}

/// Collects optional timeout values for [`TimeoutPolicy::new`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeoutPolicyBuilder {
    read: Option<TimeoutInput>,
    connect: Option<f64>,
    coefficient: Option<f64>,
}

/// Fields to replace in [`TimeoutPolicy::with_overrides`].
pub type TimeoutOverrides = TimeoutPolicyBuilder;

impl TimeoutPolicyBuilder {
    pub fn read(mut self, read: impl Into<TimeoutInput>) -> Self {
        self.read = Some(read.into());
        self
    }

    pub fn connect(mut self, connect: f64) -> Self {
        self.connect = Some(connect);
        self
    }

    pub fn coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = Some(coefficient);
        self
    }

    pub fn build(self) -> Result<TimeoutPolicy> {
        TimeoutPolicy::new(self.read, self.connect, self.coefficient)
    }
}

/// Present and non-zero.
fn is_set_limit(seconds: f64) -> bool {
    seconds != 0.0
}

fn limit_duration(seconds: f64) -> Option<Duration> {
    if is_set_limit(seconds) {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}

pub(crate) fn check_seconds(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(ResilienceError::validation(format!(
            "{name} must be a finite non-negative number, got {value}"
        )));
    }
    Ok(value)
}

pub(crate) fn parse_seconds(name: &str, raw: &str) -> Result<f64> {
    let value = raw.trim().parse::<f64>().map_err(|_| {
        ResilienceError::validation(format!("{name} must be numeric, got '{raw}'"))
    })?;
    check_seconds(name, value)
}
