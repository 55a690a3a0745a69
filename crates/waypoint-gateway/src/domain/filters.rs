//! Typed filter configuration parsed from untyped [`FilterDeclaration`]s.
//!
//! Parsing is all-or-nothing per declaration: a missing or malformed
//! required argument yields an [`AssemblyError`] and the assembler skips
//! that one filter.

use crate::domain::config::humantime_serde::parse_duration;
use crate::domain::error::kinds;
use crate::domain::route::FilterDeclaration;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Recognised filter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    RateLimiter,
    CircuitBreaker,
    Retry,
    TimeLimiter,
}

impl FilterKind {
    /// Exact, case-sensitive name lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RequestRateLimiter" => Some(FilterKind::RateLimiter),
            "CircuitBreaker" => Some(FilterKind::CircuitBreaker),
            "Retry" => Some(FilterKind::Retry),
            "TimeLimiter" => Some(FilterKind::TimeLimiter),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::RateLimiter => "RequestRateLimiter",
            FilterKind::CircuitBreaker => "CircuitBreaker",
            FilterKind::Retry => "Retry",
            FilterKind::TimeLimiter => "TimeLimiter",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A declaration that could not be turned into a filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("unknown filter '{name}'")]
    UnknownFilter { name: String },

    #[error("{filter}: missing required argument '{key}'")]
    MissingArg { filter: &'static str, key: &'static str },

    #[error("{filter}: invalid value '{value}' for '{key}': {reason}")]
    InvalidArg {
        filter: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where a filter sends the client once it gives up on the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// `forward:<uri>`: replay the request against another target in-process
    Forward(String),
    /// Any other URI: answer 307 with a `Location` header
    Redirect(String),
}

impl Fallback {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Some(target) = raw.strip_prefix("forward:") {
            let target = target.trim();
            if target.is_empty() {
                return Err("forward target is empty".into());
            }
            return Ok(Fallback::Forward(target.to_string()));
        }
        if raw.is_empty() {
            return Err("fallback uri is empty".into());
        }
        Ok(Fallback::Redirect(raw.to_string()))
    }

    pub fn target(&self) -> &str {
        match self {
            Fallback::Forward(target) | Fallback::Redirect(target) => target,
        }
    }
}

/// Error kind names a retry filter may retry on.
///
/// Matching is exact and case-sensitive; there is no hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableErrors(Vec<String>);

impl RetryableErrors {
    /// Parse a comma list. Blank entries are ignored.
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// An empty allow-list; nothing is retried on kind name alone.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.0.iter().any(|name| name == kind)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

/// Transport failures are retryable unless `retryExceptions` says otherwise.
impl Default for RetryableErrors {
    fn default() -> Self {
        Self(vec![
            kinds::CONNECT.to_string(),
            kinds::TIMEOUT.to_string(),
            kinds::BODY.to_string(),
        ])
    }
}

/// What a circuit breaker records as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePredicateKind {
    /// Transport errors, timeouts and 5xx/429 statuses
    #[default]
    Default,
    /// Default plus 429/5xx markers found in error messages
    Response,
}

impl FailurePredicateKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "default" => Some(FailurePredicateKind::Default),
            "response" | "responsepredicate" => Some(FailurePredicateKind::Response),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub route_id: String,
    pub max_attempts: u32,
    pub wait_duration: Duration,
    pub retryable_errors: RetryableErrors,
    pub fallback: Option<Fallback>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub route_id: String,
    pub name: String,
    pub sliding_window_size: u32,
    /// Percentage in `(0, 100]`
    pub failure_rate_threshold: f32,
    pub wait_duration_in_open_state: Duration,
    pub permitted_calls_in_half_open: u32,
    pub fallback: Option<Fallback>,
    pub failure_predicate: FailurePredicateKind,
    pub automatic_transition: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLimiterConfig {
    pub route_id: String,
    pub timeout_duration: Duration,
    pub cancel_on_timeout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub route_id: String,
    /// Tokens added per second
    pub replenish_rate: u32,
    pub burst_capacity: u32,
    pub requested_tokens: u32,
}

/// One parsed filter declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    RateLimiter(RateLimiterConfig),
    CircuitBreaker(CircuitBreakerConfig),
    Retry(RetryConfig),
    TimeLimiter(TimeLimiterConfig),
}

impl FilterSpec {
    pub fn parse(route_id: &str, decl: &FilterDeclaration) -> Result<Self, AssemblyError> {
        let kind = FilterKind::from_name(&decl.name).ok_or_else(|| AssemblyError::UnknownFilter {
            name: decl.name.clone(),
        })?;
        let args = Args {
            filter: kind.name(),
            args: &decl.args,
        };
        let route_id = route_id.to_string();

        match kind {
            FilterKind::RateLimiter => Ok(FilterSpec::RateLimiter(RateLimiterConfig {
                route_id,
                replenish_rate: args.positive("replenishRate")?,
                burst_capacity: args.positive("burstCapacity")?,
                requested_tokens: args.positive("requestedTokens")?,
            })),
            FilterKind::CircuitBreaker => Ok(FilterSpec::CircuitBreaker(CircuitBreakerConfig {
                route_id,
                name: args.required("name")?.to_string(),
                sliding_window_size: args.positive("slidingWindowSize")?,
                failure_rate_threshold: args.percentage("failureRateThreshold")?,
                wait_duration_in_open_state: args.duration("waitDurationInOpenState")?,
                permitted_calls_in_half_open: args
                    .positive("permittedNumberOfCallsInHalfOpenState")?,
                automatic_transition: args
                    .boolean("automaticTransitionFromOpenToHalfOpenEnabled")?,
                fallback: args.fallback("fallbackUri")?,
                failure_predicate: match args.optional("recordFailurePredicate") {
                    None => FailurePredicateKind::Default,
                    Some(raw) => FailurePredicateKind::parse(raw).ok_or_else(|| {
                        args.invalid("recordFailurePredicate", raw, "expected 'default' or 'response'")
                    })?,
                },
            })),
            FilterKind::Retry => Ok(FilterSpec::Retry(RetryConfig {
                route_id,
                max_attempts: args.positive("maxAttempts")?,
                wait_duration: args.duration("waitDuration")?,
                retryable_errors: args
                    .optional("retryExceptions")
                    .map(RetryableErrors::parse)
                    .unwrap_or_default(),
                fallback: args.fallback("fallbackUri")?,
            })),
            FilterKind::TimeLimiter => {
                let timeout_duration = args.duration("timeoutDuration")?;
                if timeout_duration.is_zero() {
                    return Err(args.invalid("timeoutDuration", "0", "must be greater than zero"));
                }
                Ok(FilterSpec::TimeLimiter(TimeLimiterConfig {
                    route_id,
                    timeout_duration,
                    cancel_on_timeout: args.boolean("cancelRunningFuture")?,
                }))
            }
        }
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            FilterSpec::RateLimiter(_) => FilterKind::RateLimiter,
            FilterSpec::CircuitBreaker(_) => FilterKind::CircuitBreaker,
            FilterSpec::Retry(_) => FilterKind::Retry,
            FilterSpec::TimeLimiter(_) => FilterKind::TimeLimiter,
        }
    }
}

/// Required-key lookup over a declaration's arguments.
struct Args<'a> {
    filter: &'static str,
    args: &'a BTreeMap<String, String>,
}

impl<'a> Args<'a> {
    fn required(&self, key: &'static str) -> Result<&'a str, AssemblyError> {
        self.optional(key).ok_or(AssemblyError::MissingArg {
            filter: self.filter,
            key,
        })
    }

    fn optional(&self, key: &str) -> Option<&'a str> {
        self.args
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn invalid(&self, key: &'static str, value: &str, reason: impl Into<String>) -> AssemblyError {
        AssemblyError::InvalidArg {
            filter: self.filter,
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn positive(&self, key: &'static str) -> Result<u32, AssemblyError> {
        let raw = self.required(key)?;
        match raw.parse::<u32>() {
            Ok(0) => Err(self.invalid(key, raw, "must be at least 1")),
            Ok(value) => Ok(value),
            Err(e) => Err(self.invalid(key, raw, e.to_string())),
        }
    }

    fn percentage(&self, key: &'static str) -> Result<f32, AssemblyError> {
        let raw = self.required(key)?;
        let value = raw
            .parse::<f32>()
            .map_err(|e| self.invalid(key, raw, e.to_string()))?;
        if value > 0.0 && value <= 100.0 {
            Ok(value)
        } else {
            Err(self.invalid(key, raw, "must be in (0, 100]"))
        }
    }

    fn duration(&self, key: &'static str) -> Result<Duration, AssemblyError> {
        let raw = self.required(key)?;
        parse_duration(raw).map_err(|reason| self.invalid(key, raw, reason))
    }

    fn boolean(&self, key: &'static str) -> Result<bool, AssemblyError> {
        let raw = self.required(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(self.invalid(key, raw, "expected true or false")),
        }
    }

    fn fallback(&self, key: &'static str) -> Result<Option<Fallback>, AssemblyError> {
        self.optional(key)
            .map(|raw| Fallback::parse(raw).map_err(|reason| self.invalid(key, raw, reason)))
            .transpose()
    }
}
