use crate::UrlError;
use url::Url;

/// Tracking query parameters removed during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "spm",
    "ref",
    "source",
];

/// Normalizes a URL into the form used for dedup keys
///
/// # Normalization Steps
///
/// 1. Lowercase the scheme and host
/// 2. Remove tracking query parameters, keeping the order of the rest
/// 3. Remove trailing slashes from the path (root `/` is kept)
///
/// Nothing else is rewritten: fragments and the remaining query survive
/// byte for byte. Input that does not parse as an absolute URL is returned
/// trimmed, so the function is total and idempotent.
///
/// # Examples
///
/// ```
/// use tidewatch::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM/news/?utm_source=x&id=7");
/// assert_eq!(url, "http://example.com/news?id=7");
/// ```
pub fn normalize_url(url_str: &str) -> String {
    match try_normalize(url_str) {
        Ok(url) => url.to_string(),
        Err(_) => url_str.trim().to_string(),
    }
}

/// Normalizes a URL, reporting why it could not be parsed
pub fn try_normalize(url_str: &str) -> Result<Url, UrlError> {
    // Parsing lowercases the scheme and host
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.cannot_be_a_base() {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    let path = trim_trailing_slashes(url.path());
    url.set_path(&path);

    if let Some(query) = url.query() {
        let (kept, removed) = strip_tracking_params(query);
        if removed {
            if kept.is_empty() {
                url.set_query(None);
            } else {
                url.set_query(Some(&kept));
            }
        }
    }

    Ok(url)
}

fn trim_trailing_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Drops tracking pairs from a raw query string without re-encoding the rest
fn strip_tracking_params(query: &str) -> (String, bool) {
    let mut removed = false;
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            if pair.is_empty() {
                removed = true;
                return false;
            }
            let key = pair.split('=').next().unwrap_or_default();
            let tracking = TRACKING_PARAMS
                .iter()
                .any(|p| key.eq_ignore_ascii_case(p));
            if tracking {
                removed = true;
            }
            !tracking
        })
        .collect();
    (kept.join("&"), removed)
}
