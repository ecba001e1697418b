use url::Url;

/// Returns the lowercase host of a URL, if it has one
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Builds the `Referer` value sent along with a page request
///
/// The referer is the origin of the requested page,
/// `scheme://host[:port]`. Returns `None` when the locator is not an
/// absolute URL with a host.
///
/// # Examples
///
/// ```
/// use crawlpool::url::referer_for;
///
/// assert_eq!(
///     referer_for("https://example.com/gallery?page=2"),
///     Some("https://example.com".to_string())
/// );
/// assert_eq!(referer_for("not a url"), None);
/// ```
pub fn referer_for(locator: &str) -> Option<String> {
    let url = Url::parse(locator).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Checks a host against a domain pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the
/// bare domain and every subdomain beneath it.
pub fn matches_domain(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || (host.len() > base.len()
                    && host.ends_with(base)
                    && host.as_bytes()[host.len() - base.len() - 1] == b'.')
        }
        None => host == pattern,
    }
}

/// True if the URL's host matches any of the patterns
pub fn in_domains<S: AsRef<str>>(url: &Url, patterns: &[S]) -> bool {
    match extract_domain(url) {
        Some(host) => patterns
            .iter()
            .any(|pattern| matches_domain(&pattern.as_ref().to_lowercase(), &host)),
        None => false,
    }
}
