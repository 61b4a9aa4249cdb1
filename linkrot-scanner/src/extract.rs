use crate::normalize::normalize_relative;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static BASE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("base[href]").expect("valid base selector"));

/// True for `text/html` and `application/xhtml+xml`, ignoring parameters.
pub fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Pull outbound anchor links out of a page body.
///
/// Links are resolved against the page URL (or its `<base href>`), normalized,
/// restricted to http(s) and deduplicated in document order. The HTML parser
/// is error-tolerant, so malformed markup yields whatever anchors it could
/// recover instead of failing.
pub fn extract_links(page_url: &Url, body: &[u8], content_type: &str) -> Vec<Url> {
    if !is_html(content_type) {
        return Vec::new();
    }

    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);

    let base = document
        .select(&BASE_SELECTOR)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        match normalize_relative(&base, href) {
            Ok(url) => {
                if seen.insert(url.as_str().to_string()) {
                    links.push(url);
                }
            }
            Err(e) => debug!("Skipping link on {}: {}", page_url, e),
        }
    }

    links
}
