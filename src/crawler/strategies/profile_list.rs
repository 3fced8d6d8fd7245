//! People and position listings (faculty pages, leadership rosters)

use super::html::{required_selector, optional_selector, resolve_link};
use super::PageLoader;
use crate::config::SourceConfig;
use crate::crawler::{CrawlContext, CrawledItem, Crawler};
use crate::dedup::{collapse_whitespace, content_hash};
use crate::{ConfigError, CrawlError};
use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

/// One person on a roster page
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub position: Option<String>,
    pub department: Option<String>,
    pub link: Option<String>,
}

/// Emits one item per person
///
/// Options: `profile_selector` (default `.profile`), `name_selector`
/// (default `.name`), `position_selector`, `department_selector`,
/// `link_selector` (default `a`). Profiles without a link get a stable
/// per-person URL on the roster page, so a position change shows up as a
/// new item.
pub struct ProfileListCrawler {
    source: SourceConfig,
    base_url: Url,
    loader: PageLoader,
    profile: Selector,
    name: Selector,
    position: Option<Selector>,
    department: Option<Selector>,
    link: Selector,
}

impl ProfileListCrawler {
    pub fn new(source: &SourceConfig, ctx: &CrawlContext) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&source.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", source.url, e)))?;
        Ok(Self {
            source: source.clone(),
            base_url,
            loader: PageLoader::for_source(source, ctx),
            profile: required_selector(source, "profile_selector", ".profile")?,
            name: required_selector(source, "name_selector", ".name")?,
            position: optional_selector(source, "position_selector")?,
            department: optional_selector(source, "department_selector")?,
            link: required_selector(source, "link_selector", "a")?,
        })
    }

    fn extract(&self, html: &str) -> Vec<Profile> {
        let document = Html::parse_document(html);
        let text_of = |block: &scraper::ElementRef<'_>, sel: &Selector| {
            block
                .select(sel)
                .next()
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .filter(|t| !t.is_empty())
        };

        document
            .select(&self.profile)
            .filter_map(|block| {
                let name = text_of(&block, &self.name)?;
                Some(Profile {
                    name,
                    position: self.position.as_ref().and_then(|sel| text_of(&block, sel)),
                    department: self.department.as_ref().and_then(|sel| text_of(&block, sel)),
                    link: block
                        .select(&self.link)
                        .next()
                        .and_then(|a| a.value().attr("href"))
                        .and_then(|href| resolve_link(href, &self.base_url)),
                })
            })
            .collect()
    }

    fn to_item(&self, profile: Profile) -> CrawledItem {
        let key = format!(
            "{}|{}",
            profile.name,
            profile.position.as_deref().unwrap_or_default()
        );
        let url = match &profile.link {
            Some(link) => link.clone(),
            None => format!("{}#profile-{}", self.source.url, &content_hash(&key)[..12]),
        };
        let title = match &profile.position {
            Some(position) => format!("{} ({})", profile.name, position),
            None => profile.name.clone(),
        };

        let mut item = CrawledItem::new(title, url, &self.source.id, &self.source.dimension)
            .with_content(Some(key))
            .with_tags(vec!["personnel".to_string()])
            .with_extra("name", profile.name);
        if let Some(position) = profile.position {
            item = item.with_extra("position", position);
        }
        if let Some(department) = profile.department {
            item = item.with_extra("department", department);
        }
        item
    }
}

#[async_trait]
impl Crawler for ProfileListCrawler {
    async fn fetch_and_parse(&self) -> Result<Vec<CrawledItem>, CrawlError> {
        let html = self.loader.load(&self.source.url).await?;
        let profiles = self.extract(&html);
        Ok(profiles.into_iter().map(|p| self.to_item(p)).collect())
    }
}
