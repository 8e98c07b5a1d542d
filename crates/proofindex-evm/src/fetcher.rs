//! Adaptive `eth_getLogs` fetcher.
//!
//! Providers cap the block range (or result count) of a single `eth_getLogs`
//! call and throttle bursts. [`AdaptiveLogFetcher`] walks `[from, to]` as an
//! explicit work queue of sub-ranges:
//!
//! - range rejected → re-split using the width hinted by the error, else bisect
//! - throttled → back off and retry the same sub-range
//! - anything else → propagate
//!
//! The narrowest width a provider ever hinted is remembered and used as the
//! ceiling for every later call on the same fetcher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use proofindex_core::config::FetchConfig;
use proofindex_rpc::{ChainReader, RawLog, RetryConfig, RetryPolicy, TransportError};

/// Phrases providers use when a range is too wide or returns too much.
const RANGE_PHRASES: &[&str] = &[
    "block range",
    "range",
    "exceed",
    "too many",
    "more than",
    "limited to",
    "too large",
    "response size",
];

/// Words that, right before a number, mark it as a block width.
const WIDTH_PREFIXES: &[&str] = &["range", "max", "maximum", "is", "of", "limit"];

const NO_LIMIT: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    from: u64,
    to: u64,
    attempts: u32,
}

impl Pending {
    fn new(from: u64, to: u64) -> Self {
        Self { from, to, attempts: 0 }
    }

    fn width(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// Range-splitting, backoff-retrying log retrieval over a [`ChainReader`].
pub struct AdaptiveLogFetcher {
    reader: Arc<dyn ChainReader>,
    policy: RetryPolicy,
    max_range: AtomicU64,
}

impl AdaptiveLogFetcher {
    pub fn new(reader: Arc<dyn ChainReader>, policy: RetryPolicy) -> Self {
        Self {
            reader,
            policy,
            max_range: AtomicU64::new(NO_LIMIT),
        }
    }

    pub fn from_config(reader: Arc<dyn ChainReader>, config: &FetchConfig) -> Self {
        let fetcher = Self::new(
            reader,
            RetryPolicy::new(RetryConfig {
                max_retries: config.max_retries,
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                max_backoff: Duration::from_millis(config.max_backoff_ms),
            }),
        );
        if let Some(width) = config.initial_max_range {
            fetcher.narrow(width);
        }
        fetcher
    }

    /// Narrowest block width learned so far, if any.
    pub fn max_range(&self) -> Option<u64> {
        match self.max_range.load(Ordering::Relaxed) {
            NO_LIMIT => None,
            w => Some(w),
        }
    }

    fn narrow(&self, width: u64) {
        self.max_range.fetch_min(width.max(1), Ordering::Relaxed);
    }

    /// All logs of `address` with `topic0` in `[from, to]`, in block order.
    pub async fn fetch(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, TransportError> {
        if to < from {
            return Ok(vec![]);
        }

        let mut queue = VecDeque::from([Pending::new(from, to)]);
        let mut logs = Vec::new();

        while let Some(mut next) = queue.pop_front() {
            if let Some(cap) = self.max_range() {
                if next.width() > cap {
                    split_front(&mut queue, next, cap);
                    continue;
                }
            }

            match self.reader.get_logs(address, topic0, next.from, next.to).await {
                Ok(batch) => {
                    debug!(from = next.from, to = next.to, logs = batch.len(), "getLogs ok");
                    logs.extend(batch);
                }
                Err(e) if e.is_rate_limited() => {
                    next.attempts += 1;
                    let Some(delay) = self.policy.next_delay(next.attempts) else {
                        warn!(
                            from = next.from,
                            to = next.to,
                            attempts = next.attempts,
                            error = %e,
                            "getLogs still throttled, giving up"
                        );
                        return Err(e);
                    };
                    warn!(
                        from = next.from,
                        to = next.to,
                        attempt = next.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "getLogs throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    queue.push_front(next);
                }
                Err(e) if is_range_error(&e) => {
                    let width = next.width();
                    if width == 1 {
                        return Err(e);
                    }
                    let hint = range_hint(&e.message()).filter(|w| *w < width);
                    let sub = match hint {
                        Some(w) => {
                            self.narrow(w);
                            w
                        }
                        None => width.div_ceil(2),
                    };
                    debug!(
                        from = next.from,
                        to = next.to,
                        sub_width = sub,
                        hinted = hint.is_some(),
                        "range rejected, splitting"
                    );
                    split_front(&mut queue, next, sub);
                }
                Err(e) => return Err(e),
            }
        }

        logs.sort_by_key(RawLog::position);
        Ok(logs)
    }
}

/// Replace `range` at the head of `queue` by consecutive pieces of `width`.
fn split_front(queue: &mut VecDeque<Pending>, range: Pending, width: u64) {
    let mut pieces = Vec::new();
    let mut start = range.from;
    loop {
        let end = start.saturating_add(width - 1).min(range.to);
        pieces.push(Pending::new(start, end));
        if end == range.to {
            break;
        }
        start = end + 1;
    }
    for piece in pieces.into_iter().rev() {
        queue.push_front(piece);
    }
}

fn is_range_error(e: &TransportError) -> bool {
    match e {
        TransportError::Rpc(_) | TransportError::Http(_) | TransportError::Other(_) => {
            let msg = e.message().to_lowercase();
            RANGE_PHRASES.iter().any(|p| msg.contains(p))
        }
        _ => false,
    }
}

/// Extract the block width a provider says it would accept.
///
/// Understands an accepted `[0xA, 0xB]` pair, and numbers such as `2K`,
/// `10,000` or `5000` attached to "block"/"range" wording.
pub fn range_hint(message: &str) -> Option<u64> {
    if let Some(width) = bracket_hint(message) {
        return Some(width);
    }

    let tokens: Vec<&str> = message.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        let Some(n) = parse_count(token) else { continue };
        let next = tokens.get(i + 1).map(|t| word(t));
        if next.is_some_and(|w| w.starts_with("block") || w == "range") {
            return Some(n);
        }
        let prev = i.checked_sub(1).map(|j| word(tokens[j]));
        if prev.is_some_and(|w| WIDTH_PREFIXES.contains(&w.as_str())) {
            return Some(n);
        }
    }
    None
}

fn bracket_hint(message: &str) -> Option<u64> {
    let open = message.find('[')?;
    let close = open + message[open..].find(']')?;
    let (a, b) = message[open + 1..close].split_once(',')?;
    let a = proofindex_rpc::parse_hex_u64(a.trim())?;
    let b = proofindex_rpc::parse_hex_u64(b.trim())?;
    (b >= a).then(|| b - a + 1)
}

fn parse_count(token: &str) -> Option<u64> {
    let t = token
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .replace(',', "");
    let (digits, mult) = match t.strip_suffix(|c: char| c == 'k' || c == 'K') {
        Some(d) => (d, 1_000),
        None => (t.as_str(), 1),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .and_then(|n| n.checked_mul(mult))
}

fn word(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_lowercase()
}
