//! New-item detection against the previous run
//!
//! Items are keyed by the hash of their normalized URL. An item is new
//! iff that key is absent from the previous snapshot's key set.

mod hash;
mod normalize;

pub use hash::{collapse_whitespace, content_hash, url_hash};
pub use normalize::{normalize_url, try_normalize};

use crate::crawler::CrawledItem;
use std::collections::HashSet;

/// A crawled item annotated with its dedup key
#[derive(Debug, Clone)]
pub struct MarkedItem<'a> {
    pub item: &'a CrawledItem,
    pub url_hash: String,
    pub is_new: bool,
}

/// Annotates every item of `batch` with `is_new` relative to `previous`
pub fn mark_new<'a>(batch: &'a [CrawledItem], previous: &HashSet<String>) -> Vec<MarkedItem<'a>> {
    batch
        .iter()
        .map(|item| {
            let key = url_hash(&item.url);
            let is_new = !previous.contains(&key);
            MarkedItem {
                item,
                url_hash: key,
                is_new,
            }
        })
        .collect()
}

/// Number of new items in an annotated batch
pub fn count_new(marked: &[MarkedItem<'_>]) -> usize {
    marked.iter().filter(|m| m.is_new).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> CrawledItem {
        CrawledItem::new("title", url, "src", "tech")
    }

    #[test]
    fn test_mark_new_against_empty_baseline() {
        let batch = vec![item("https://a.com/1"), item("https://a.com/2")];
        let marked = mark_new(&batch, &HashSet::new());
        assert!(marked.iter().all(|m| m.is_new));
        assert_eq!(count_new(&marked), 2);
    }

    #[test]
    fn test_mark_new_uses_normalized_urls() {
        let previous: HashSet<String> = [url_hash("https://a.com/1")].into_iter().collect();
        let batch = vec![
            item("HTTPS://A.com/1/?utm_source=feed"),
            item("https://a.com/2"),
        ];
        let marked = mark_new(&batch, &previous);
        assert!(!marked[0].is_new);
        assert!(marked[1].is_new);
        assert_eq!(marked[0].url_hash, url_hash("https://a.com/1"));
    }
}
