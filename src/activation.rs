//! Bringing the notepad widget up on a page.
//!
//! The host integration (script injection, messaging) sits behind
//! [`Activator`]; this module only owns the retry policy and the rule for
//! which pages can host the widget at all.
use log::{debug, info, warn};
use tokio::time::{self, Duration};

use crate::{PadError, Result};

/// URL prefixes of browser-internal pages that refuse injected scripts
const RESTRICTED_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "chrome-search://",
    "edge://",
    "about:",
    "moz-extension://",
    "devtools://",
];

/// Host side of widget activation
pub trait Activator {
    /// Whether the widget is already up on the page
    fn is_active(&self) -> bool;

    /// One attempt at bringing the widget up
    fn activate(&mut self) -> Result<()>;
}

/// How hard `ensure_active` tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after the first failed attempt; grows linearly with each retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Whether a page can never host the widget
pub fn is_restricted_url(url: &str) -> bool {
    RESTRICTED_PREFIXES.iter().any(|prefix| url.starts_with(prefix)) || !url.starts_with("http")
}

/// Makes sure the widget is up on `url`.
///
/// Idempotent: returns `Ok(0)` without calling the activator when the widget
/// is already active. Otherwise returns the number of attempts it took.
pub async fn ensure_active<A: Activator>(
    activator: &mut A,
    url: &str,
    policy: RetryPolicy,
) -> Result<u32> {
    if is_restricted_url(url) {
        info!("Cannot open the notepad on restricted page {}", url);
        return Err(PadError::ActivationRefused {
            url: url.to_string(),
        });
    }

    if activator.is_active() {
        debug!("Notepad already active on {}", url);
        return Ok(0);
    }

    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::from("widget did not report active");

    for attempt in 1..=attempts {
        match activator.activate() {
            Ok(()) if activator.is_active() => {
                info!("Notepad activated on {} after {} attempt(s)", url, attempt);
                return Ok(attempt);
            }
            Ok(()) => {
                warn!("Activation attempt {} on {} did not take", attempt, url);
            }
            Err(e) => {
                warn!("Activation attempt {} on {} failed: {}", attempt, url, e);
                last_error = e.to_string();
            }
        }

        if attempt < attempts {
            time::sleep(policy.delay * attempt).await;
        }
    }

    Err(PadError::ActivationFailed {
        attempts,
        message: last_error,
    })
}
