//! URL helper functions used throughout the crawler

use url::Url;

/// Accept only absolute http(s) URLs.
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    match Url::parse(url) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

/// Extract the host portion of a URL, keeping an explicit port.
pub fn get_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Resolve a link against the provided base URL
pub fn resolve_url(link: &str, base_url: &str) -> Option<String> {
    let base = Url::parse(base_url).ok()?;
    let absolute = base.join(link).ok()?;
    Some(absolute.to_string())
}

/// Normalize CLI input by adding https:// when no scheme is provided
pub fn normalize_url_for_cli(url: &str) -> String {
    let trimmed = url.trim();

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }

    format!("https://{}", trimmed)
}

/// Check if a content type represents HTML
pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml")
}
