// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Retry policy: backoff computation and rate-limit header parsing.
//!
//! The policy never sleeps.  It computes a delay; the event loop turns that
//! into a timer keyed by agent id, which a Ctrl-C can cancel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Header names honored when computing a rate-limit delay.
const RETRY_AFTER: &str = "retry-after";
const RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
const RESET_TOKENS: &str = "x-ratelimit-reset-tokens";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), honoring server hints.
    ///
    /// Returns `None` once the attempt cap is reached — the error is then
    /// terminal and surfaced to the agent.
    pub fn next_delay<'a, I>(&self, attempt: u32, headers: I) -> Option<Duration>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(delay_from_headers(headers).unwrap_or_else(|| self.backoff(attempt)))
    }

    /// Exponential backoff: `min(cap, base · 2^attempt)` plus uniform jitter
    /// in `[0, base]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let capped = exp.min(self.cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Effective delay from response headers: the *minimum* of every hint that
/// parses.  Returns `None` when no recognized header parses.
pub fn delay_from_headers<'a, I>(headers: I) -> Option<Duration>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let now = Utc::now();
    headers
        .into_iter()
        .filter_map(|(name, value)| match name.to_ascii_lowercase().as_str() {
            RETRY_AFTER => parse_retry_after(value, now),
            RESET_REQUESTS | RESET_TOKENS => parse_reset_duration(value),
            _ => None,
        })
        .min()
}

/// `Retry-After` is either a non-negative integer of seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    delta.to_std().ok()
}

/// Duration grammar `(NUMBER (h|m|s))+`, case-insensitive.
///
/// A number with no unit is invalid, as is an empty string or trailing
/// garbage: `1h30m45s` → 5445 s, `30s` → 30 s, `90` → `None`.
pub fn parse_reset_duration(value: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut chars = value.trim().chars().peekable();
    let mut any = false;

    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return None;
        }
        let n: u64 = digits.parse().ok()?;
        let unit = chars.next()?;
        let secs = match unit.to_ascii_lowercase() {
            'h' => n.checked_mul(3600)?,
            'm' => n.checked_mul(60)?,
            's' => n,
            _ => return None,
        };
        total += Duration::from_secs(secs);
        any = true;
    }

    any.then_some(total)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Duration grammar ──────────────────────────────────────────────────────

    #[test]
    fn compound_duration_parses() {
        assert_eq!(parse_reset_duration("1h30m45s"), Some(Duration::from_secs(5445)));
    }

    #[test]
    fn single_unit_durations() {
        assert_eq!(parse_reset_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_reset_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_reset_duration("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn duration_units_are_case_insensitive() {
        assert_eq!(parse_reset_duration("1H30M45S"), Some(Duration::from_secs(5445)));
    }

    #[test]
    fn bare_number_is_invalid() {
        assert_eq!(parse_reset_duration("90"), None);
    }

    #[test]
    fn empty_and_garbage_are_invalid() {
        assert_eq!(parse_reset_duration(""), None);
        assert_eq!(parse_reset_duration("abc"), None);
        assert_eq!(parse_reset_duration("5x"), None);
        assert_eq!(parse_reset_duration("1h30"), None);
    }

    // ── Retry-After ───────────────────────────────────────────────────────────

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("30", Utc::now()), Some(Duration::from_secs(30)));
    }

    #[test]
    fn retry_after_http_date() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        let delay = parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now).unwrap();
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn retry_after_past_date_is_none() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:27:00 GMT", now), None);
    }

    #[test]
    fn retry_after_garbage_is_none() {
        assert_eq!(parse_retry_after("soon", Utc::now()), None);
    }

    // ── Header minimum ────────────────────────────────────────────────────────

    #[test]
    fn minimum_of_multiple_hints_wins() {
        let headers = [
            ("x-ratelimit-reset-requests", "30s"),
            ("x-ratelimit-reset-tokens", "60s"),
        ];
        assert_eq!(delay_from_headers(headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn reset_tokens_header_alone() {
        let headers = [("x-ratelimit-reset-tokens", "1h30m45s")];
        assert_eq!(delay_from_headers(headers), Some(Duration::from_secs(5445)));
    }

    #[test]
    fn header_names_case_insensitive() {
        let headers = [("Retry-After", "10")];
        assert_eq!(delay_from_headers(headers), Some(Duration::from_secs(10)));
    }

    #[test]
    fn unparseable_hints_are_skipped() {
        let headers = [
            ("retry-after", "later"),
            ("x-ratelimit-reset-tokens", "15s"),
        ];
        assert_eq!(delay_from_headers(headers), Some(Duration::from_secs(15)));
    }

    #[test]
    fn no_hints_returns_none() {
        let headers = [("content-type", "application/json")];
        assert_eq!(delay_from_headers(headers), None);
    }

    // ── Backoff ───────────────────────────────────────────────────────────────

    #[test]
    fn backoff_grows_exponentially_with_jitter_bound() {
        let policy = RetryPolicy::default();
        // attempt 0: 1s ≤ d ≤ 1s + base
        let d0 = policy.backoff(0);
        assert!(d0 >= Duration::from_secs(1) && d0 <= Duration::from_secs(2), "{d0:?}");
        // attempt 3: 8s ≤ d ≤ 9s
        let d3 = policy.backoff(3);
        assert!(d3 >= Duration::from_secs(8) && d3 <= Duration::from_secs(9), "{d3:?}");
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        let d = policy.backoff(20);
        assert!(d <= Duration::from_secs(61), "{d:?}");
    }

    #[test]
    fn next_delay_respects_attempt_cap() {
        let policy = RetryPolicy::default();
        assert!(policy.next_delay(4, std::iter::empty()).is_some());
        assert!(policy.next_delay(5, std::iter::empty()).is_none());
        assert!(policy.next_delay(9, std::iter::empty()).is_none());
    }

    #[test]
    fn next_delay_prefers_header_hint() {
        let policy = RetryPolicy::default();
        let headers = [("retry-after", "42")];
        assert_eq!(policy.next_delay(0, headers), Some(Duration::from_secs(42)));
    }
}
