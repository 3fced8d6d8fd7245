//! HTML extraction shared by the selector-driven strategies
//!
//! All functions here are synchronous: a parsed document is never held
//! across an await point.

use crate::config::SourceConfig;
use crate::ConfigError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// One entry of a list page
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub summary: Option<String>,
}

/// CSS selectors describing a list page
///
/// Read from the source options `item_selector` (default `li`),
/// `title_selector` and `link_selector` (default `a`), `date_selector`,
/// `author_selector`, `summary_selector` and `date_format`.
#[derive(Debug, Clone)]
pub struct ListSelectors {
    pub item: Selector,
    pub title: Selector,
    pub link: Selector,
    pub date: Option<Selector>,
    pub author: Option<Selector>,
    pub summary: Option<Selector>,
    pub date_format: Option<String>,
}

impl ListSelectors {
    pub fn from_source(source: &SourceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            item: required_selector(source, "item_selector", "li")?,
            title: required_selector(source, "title_selector", "a")?,
            link: required_selector(source, "link_selector", "a")?,
            date: optional_selector(source, "date_selector")?,
            author: optional_selector(source, "author_selector")?,
            summary: optional_selector(source, "summary_selector")?,
            date_format: source.option_str("date_format").map(str::to_string),
        })
    }
}

/// Compiles a selector option, falling back to `default`
pub fn required_selector(
    source: &SourceConfig,
    option: &str,
    default: &str,
) -> Result<Selector, ConfigError> {
    compile(source, option, source.option_str(option).unwrap_or(default))
}

/// Compiles a selector option if present
pub fn optional_selector(source: &SourceConfig, option: &str) -> Result<Option<Selector>, ConfigError> {
    source
        .option_str(option)
        .map(|css| compile(source, option, css))
        .transpose()
}

fn compile(source: &SourceConfig, option: &str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::InvalidOption {
        source_id: source.id.clone(),
        option: option.to_string(),
        message: format!("invalid CSS selector '{}': {:?}", css, e),
    })
}

/// Extracts list entries from a page
///
/// Entries without a resolvable link or with an empty title are skipped.
pub fn extract_list(html: &str, base_url: &Url, selectors: &ListSelectors) -> Vec<ListEntry> {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();

    for item in document.select(&selectors.item) {
        let link = item
            .select(&selectors.link)
            .next()
            .or_else(|| is_anchor(item).then_some(item));
        let Some(href) = link.and_then(|a| a.value().attr("href")) else {
            continue;
        };
        let Some(url) = resolve_link(href, base_url) else {
            continue;
        };

        let title = item
            .select(&selectors.title)
            .next()
            .map(|t| element_text(&t))
            .or_else(|| link.map(|a| element_text(&a)))
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        let published_at = selectors
            .date
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|d| parse_date(&element_text(&d), selectors.date_format.as_deref()));
        let author = selectors
            .author
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .map(|a| element_text(&a))
            .filter(|a| !a.is_empty());
        let summary = selectors
            .summary
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .map(|s| element_text(&s))
            .filter(|s| !s.is_empty());

        entries.push(ListEntry {
            title,
            url,
            published_at,
            author,
            summary,
        });
    }

    entries
}

fn is_anchor(element: ElementRef<'_>) -> bool {
    element.value().name() == "a"
}

/// Text and inner HTML of the first match of `selector`
pub fn extract_block(html: &str, selector: &Selector) -> Option<(String, String)> {
    let document = Html::parse_document(html);
    let element = document.select(selector).next()?;
    let text = element_block_text(&element);
    if text.is_empty() {
        return None;
    }
    Some((text, element.inner_html()))
}

/// Visible text of a page (or of the first match of `selector`), one line per block
pub fn page_text(html: &str, selector: Option<&Selector>) -> String {
    let document = Html::parse_document(html);
    let root = match selector {
        Some(sel) => document.select(sel).next(),
        None => Some(document.root_element()),
    };
    root.map(|el| element_block_text(&el)).unwrap_or_default()
}

/// Plain text of an HTML fragment
pub fn html_to_text(fragment: &str) -> String {
    let document = Html::parse_fragment(fragment);
    crate::dedup::collapse_whitespace(&document.root_element().text().collect::<String>())
}

fn element_text(element: &ElementRef<'_>) -> String {
    crate::dedup::collapse_whitespace(&element.text().collect::<String>())
}

/// Text with each text node on its own line, blank lines dropped
fn element_block_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolves a link href to an absolute URL
///
/// Returns None for `javascript:`, `mailto:`, `tel:` and `data:` links,
/// fragment-only links and anything that does not resolve to HTTP(S).
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute.to_string())
        }
        _ => None,
    }
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日", "%d %B %Y", "%B %d, %Y"];

/// Parses a date as it appears on list pages
///
/// Tries `format` first, then RFC 3339, RFC 2822 and common layouts.
/// Dates without an offset are taken as UTC.
pub fn parse_date(text: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    let text = text
        .trim()
        .trim_start_matches(['[', '(', '【'])
        .trim_end_matches([']', ')', '】'])
        .trim();
    if text.is_empty() {
        return None;
    }

    if let Some(format) = format {
        if let Some(dt) = parse_with(text, format) {
            return Some(dt);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }

    DATE_TIME_FORMATS
        .iter()
        .chain(DATE_FORMATS.iter())
        .find_map(|format| parse_with(text, format))
}

fn parse_with(text: &str, format: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
        return Some(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}
