use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// URLs whose content only exists inside the browser (blob:, data:, filesystem:).
/// The server has no way to fetch them.
pub fn is_transient_url(url: &str) -> bool {
    static TRANSIENT: OnceLock<Option<Regex>> = OnceLock::new();
    TRANSIENT
        .get_or_init(|| Regex::new(r"(?i)^\s*(blob|data|filesystem):").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(url))
}

/// Last path segment of the URL, percent-decoded. Empty when there is none.
pub fn filename_from_url(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string(),
    };

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);

    sanitize_filename(&decoded)
}

/// `cdn.files.example.com` -> `files.example.com`. None for bare registrable
/// domains and IP addresses.
pub fn parent_domain(host: &str) -> Option<String> {
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let host = host.trim_start_matches('.');
    let (_, parent) = host.split_once('.')?;
    if parent.contains('.') {
        Some(parent.to_string())
    } else {
        None
    }
}
