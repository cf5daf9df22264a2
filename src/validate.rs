//! Admission validation.
//!
//! Everything here runs synchronously at request time, before any job
//! exists. The format selector is passed to an external process, so it is
//! checked against a shell-metacharacter set in addition to length bounds.

use crate::error::Error;
use url::Url;

const MAX_SELECTOR_LEN: usize = 500;

/// Characters never allowed in a format selector.
const FORBIDDEN_SELECTOR_CHARS: [char; 9] = [';', '&', '|', '`', '$', '(', ')', '\n', '\r'];

/// Parse and validate a download URL against the domain allow-list.
pub fn validate_url(raw: &str, allowed_domains: &[String]) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|e| Error::validation(format!("invalid URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::validation("URL has no host"))?
        .to_ascii_lowercase();
    let domain = host.strip_prefix("www.").unwrap_or(&host);

    let allowed = allowed_domains.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        domain == entry || domain.ends_with(&format!(".{entry}"))
    });
    if !allowed {
        return Err(Error::validation(format!("unsupported domain: {domain}")));
    }

    Ok(url)
}

/// Validate a format selector string.
pub fn validate_selector(selector: &str) -> Result<(), Error> {
    if selector.is_empty() {
        return Err(Error::validation("format selector must not be empty"));
    }
    if selector.len() > MAX_SELECTOR_LEN {
        return Err(Error::validation(format!(
            "format selector exceeds {MAX_SELECTOR_LEN} characters"
        )));
    }
    if let Some(c) = selector.chars().find(|c| FORBIDDEN_SELECTOR_CHARS.contains(c)) {
        return Err(Error::validation(format!(
            "format selector contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

/// Validate a full download request.
pub fn validate_request(
    raw_url: &str,
    selector: &str,
    allowed_domains: &[String],
) -> Result<Url, Error> {
    validate_selector(selector)?;
    validate_url(raw_url, allowed_domains)
}
