use url::Url;

/// Resolves an `href`/`src` attribute against the page it appeared on
///
/// Returns `None` for links that can never be fetched:
/// - empty values and fragment-only anchors
/// - `javascript:`, `mailto:`, `tel:` and `data:` schemes
/// - anything that does not resolve to an HTTP(S) URL
///
/// Protocol-relative values (`//host/path`) inherit the page's scheme.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute)
}

/// Returns the lowercase file extension of a URL's last path segment
///
/// # Examples
///
/// ```
/// use crawlpool::url::file_extension;
///
/// assert_eq!(file_extension("https://example.com/a/b/photo.JPG?w=200"), Some("jpg".to_string()));
/// assert_eq!(file_extension("https://example.com/a/b/"), None);
/// ```
pub fn file_extension(locator: &str) -> Option<String> {
    let path = match Url::parse(locator) {
        Ok(url) => url.path().to_string(),
        Err(_) => locator.split(|c: char| c == '?' || c == '#').next().unwrap_or("").to_string(),
    };
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
