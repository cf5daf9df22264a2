//! Ordered credential-strategy fallback.
//!
//! Acquisition is attempted under an ordered list of opaque credential
//! strategies; each is tried in turn when the previous one fails. The
//! combinator knows nothing about strategy internals, only the ordering
//! and the fallback-on-failure policy. When every strategy fails, the
//! surfaced error is the last strategy's; earlier failures are logged.

use crate::extract::{AuthStrategy, ExtractError};
use std::path::Path;

/// Browser cookie sources tried after an on-disk cookies file.
const BROWSER_SOURCES: [&str; 3] = ["chrome", "firefox", "edge"];

/// Build the ordered strategy list: cookies file when present, then
/// browser cookie stores, then no credentials at all.
pub fn strategy_chain(cookies_dir: &Path) -> Vec<AuthStrategy> {
    let mut chain = Vec::new();

    let cookie_file = cookies_dir.join("cookies.txt");
    if cookie_file.is_file() {
        chain.push(AuthStrategy::CookieFile(cookie_file));
    }
    for browser in BROWSER_SOURCES {
        chain.push(AuthStrategy::BrowserCookies(browser.to_string()));
    }
    chain.push(AuthStrategy::Anonymous);

    chain
}

/// Try each strategy in order until one succeeds.
///
/// Cancellation short-circuits the chain; any other failure falls through
/// to the next strategy, and the last attempt's error is what callers see.
pub fn run_with_fallback<T>(
    strategies: &[AuthStrategy],
    mut attempt: impl FnMut(&AuthStrategy) -> Result<T, ExtractError>,
) -> Result<T, ExtractError> {
    let mut last_error = ExtractError::Failed("no strategies configured".to_string());

    for strategy in strategies {
        match attempt(strategy) {
            Ok(value) => return Ok(value),
            Err(ExtractError::Cancelled) => return Err(ExtractError::Cancelled),
            Err(e) => {
                tracing::debug!(%strategy, "strategy failed: {e}");
                last_error = e;
            }
        }
    }

    Err(last_error)
}
