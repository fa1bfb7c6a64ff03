//! NHK News Web Easy article scraper.
//!
//! This module scrapes [NHK News Web Easy](https://www3.nhk.or.jp/news/easy/),
//! NHK's simplified-Japanese news site for learners.
//!
//! # URL Pattern
//!
//! Articles are identified by `ne<digits>` tokens and live at
//! `<base>/<id>/<id>.html`.
//!
//! # Page quirks
//!
//! - A consent interstitial may precede content. When its confirm control
//!   links somewhere, that target is fetched once; an inline overlay is
//!   ignored because extraction only reads the article selectors.
//! - The top page shows a subset of articles behind a `.button-more`
//!   control, expanded once per listing.
//! - Paragraphs carry `<ruby>` readings; `<rt>`/`<rp>` text is excluded.

use crate::error::SourceError;
use crate::scrapers::{ArticleBody, SourceReader};
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www3.nhk.or.jp/news/easy/";

/// Feed behind the "load more" control when it carries no explicit target.
const NEWS_LIST_FEED: &str = "news-list.json";

static LINK_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/news/easy/(ne[0-9]+)/").unwrap());
static FEED_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""news_id"\s*:\s*"(ne[0-9]+)""#).unwrap());
static CONSENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"understand|確認しました").unwrap());
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})日").unwrap());

static CONSENT_CONTROL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"button, input[type="submit"], input[type="button"]"#).unwrap()
});
static LOAD_MORE: Lazy<Selector> = Lazy::new(|| Selector::parse(".button-more").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(".article-title").unwrap());
static DATE: Lazy<Selector> = Lazy::new(|| Selector::parse(".article-date").unwrap());
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse(".article-body").unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());

/// Where the "load more" control leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMore {
    /// An HTML page or fragment with more article links.
    Link(Url),
    /// The JSON listing feed.
    Feed(Url),
}

/// Parse the source's `YYYY年M月D日` date. Anything else yields `None`.
pub fn parse_publish_date(text: &str) -> Option<DateTime<Utc>> {
    let caps = DATE_RE.captures(text)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Article identifiers linked from a page, first occurrence wins.
pub fn extract_candidate_ids(html: &str) -> Vec<String> {
    LINK_ID_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .unique()
        .collect()
}

/// Article identifiers listed in the JSON feed.
pub fn extract_feed_ids(text: &str) -> Vec<String> {
    FEED_ID_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .unique()
        .collect()
}

fn resolve_target(element: ElementRef<'_>, page_url: &Url, attrs: &[&str]) -> Option<Url> {
    attrs
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(str::trim)
        .find(|href| !href.is_empty() && *href != "#" && !href.starts_with("javascript:"))
        .and_then(|href| page_url.join(href).ok())
}

/// Article identifier in a URL path, if it points at an article.
fn article_id_of(url: &Url) -> Option<String> {
    LINK_ID_RE.captures(url.path()).map(|c| c[1].to_string())
}

/// Visible label of a form control.
fn control_label(control: ElementRef<'_>) -> String {
    match control.value().name() {
        "input" => control.value().attr("value").unwrap_or_default().to_string(),
        _ => control.text().collect(),
    }
}

/// Where submitting `control` leads: its own target attributes first, then
/// the action of the form it sits in.
fn control_target(control: ElementRef<'_>, page_url: &Url) -> Option<Url> {
    resolve_target(control, page_url, &["formaction", "data-href", "data-url"]).or_else(|| {
        control
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "form")
            .and_then(|form| resolve_target(form, page_url, &["action"]))
    })
}

/// Confirmation target of a consent interstitial, if the page shows one that
/// navigates somewhere.
///
/// Only form controls count as consent controls; plain links never do, since
/// headlines routinely contain the same wording. A target that names a
/// different article than `page_url` is never followed.
///
/// # Arguments
///
/// * `html` - The fetched page
/// * `page_url` - URL the page was fetched from, used to resolve relative targets
///
/// # Returns
///
/// The URL to fetch instead of `page_url`, or `None` when there is no
/// navigating consent control.
pub fn find_consent_target(html: &str, page_url: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let page_article = article_id_of(page_url);
    document
        .select(&CONSENT_CONTROL)
        .filter(|el| CONSENT_RE.is_match(&control_label(*el)))
        .find_map(|el| {
            control_target(el, page_url).filter(|target| {
                target != page_url
                    && article_id_of(target).is_none_or(|id| page_article.as_deref() == Some(id.as_str()))
            })
        })
}

/// Listing order: first-page IDs, then new IDs from the expansion, each once.
pub fn merge_listing(first: Vec<String>, extra: Vec<String>) -> Vec<String> {
    first.into_iter().chain(extra).unique().collect()
}

/// The "load more" expansion for a listing page.
pub fn find_load_more(html: &str, page_url: &Url) -> Option<LoadMore> {
    let document = Html::parse_document(html);
    let control = document.select(&LOAD_MORE).next()?;
    match resolve_target(control, page_url, &["data-url", "href"]) {
        Some(url) => Some(LoadMore::Link(url)),
        None => page_url.join(NEWS_LIST_FEED).ok().map(LoadMore::Feed),
    }
}

/// Text content of an element without ruby annotations.
///
/// Each source line is trimmed and the lines are joined without separators,
/// since line breaks in the markup are layout, not content.
pub fn text_without_ruby(element: ElementRef<'_>) -> String {
    let raw: String = element
        .descendants()
        .filter(|node| {
            !node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| matches!(e.name(), "rt" | "rp"))
            })
        })
        .filter_map(|node| node.value().as_text().map(|t| &**t))
        .collect();
    raw.lines().map(str::trim).collect()
}

/// Extract title, date and paragraphs from an article page.
pub fn extract_article(html: &str, url: &str) -> Result<ArticleBody, SourceError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(text_without_ruby)
        .filter(|t| !t.is_empty())
        .ok_or(SourceError::MissingElement("article-title"))?;

    let published_at = document
        .select(&DATE)
        .next()
        .and_then(|el| parse_publish_date(&el.text().collect::<String>()));

    let body = document
        .select(&BODY)
        .next()
        .ok_or(SourceError::MissingElement("article-body"))?;

    let paragraphs: Vec<String> = body
        .select(&PARAGRAPH)
        .map(text_without_ruby)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() {
        return Err(SourceError::EmptyArticle);
    }

    Ok(ArticleBody {
        url: url.to_string(),
        title,
        published_at,
        paragraphs,
    })
}

/// HTTP reader for NHK News Web Easy.
#[derive(Debug, Clone)]
pub struct NhkEasyReader {
    http: reqwest::Client,
    base_url: Url,
}

impl NhkEasyReader {
    /// Create a reader rooted at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared client; its timeout bounds every page fetch
    /// * `base_url` - Listing page URL; a trailing slash is added when missing
    ///   so article URLs resolve beneath it
    ///
    /// # Errors
    ///
    /// [`SourceError::Url`] when `base_url` does not parse.
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, SourceError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    /// `<base>/<id>/<id>.html`
    pub fn article_url(&self, id: &str) -> Result<Url, SourceError> {
        Ok(self.base_url.join(&format!("{id}/{id}.html"))?)
    }

    async fn get_text(&self, url: &Url) -> Result<String, SourceError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }

    /// Fetch a page, passing through a consent interstitial once.
    async fn get_page(&self, url: &Url) -> Result<String, SourceError> {
        let html = self.get_text(url).await?;
        match find_consent_target(&html, url) {
            Some(target) => {
                debug!(%url, %target, "Dismissing consent interstitial");
                self.get_text(&target).await
            }
            None => Ok(html),
        }
    }

    async fn expand_listing(&self, load_more: LoadMore) -> Result<Vec<String>, SourceError> {
        match load_more {
            LoadMore::Link(url) => {
                let text = self.get_text(&url).await?;
                let mut ids = extract_candidate_ids(&text);
                ids.extend(extract_feed_ids(&text));
                Ok(ids)
            }
            LoadMore::Feed(url) => Ok(extract_feed_ids(&self.get_text(&url).await?)),
        }
    }
}

impl SourceReader for NhkEasyReader {
    #[instrument(level = "info", skip_all, fields(base = %self.base_url))]
    async fn list_candidates(&self) -> Result<Vec<String>, SourceError> {
        let page = self.get_page(&self.base_url).await?;
        let first = extract_candidate_ids(&page);
        let base_count = first.len();

        let extra = match find_load_more(&page, &self.base_url) {
            Some(load_more) => match self.expand_listing(load_more).await {
                Ok(extra) => extra,
                Err(e) => {
                    warn!(error = %e, "Load-more expansion failed; keeping first page");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let ids = merge_listing(first, extra);
        info!(count = ids.len(), first_page = base_count, "Indexed NHK Easy article IDs");
        debug!(ids = ?ids, "NHK Easy IDs");
        Ok(ids)
    }

    #[instrument(level = "info", skip_all, fields(id = %id))]
    async fn fetch_article(&self, id: &str) -> Result<ArticleBody, SourceError> {
        let url = self.article_url(id)?;
        let page = self.get_page(&url).await?;
        let body = extract_article(&page, url.as_str())?;
        info!(
            paragraphs = body.paragraphs.len(),
            dated = body.published_at.is_some(),
            "Parsed NHK Easy article"
        );
        Ok(body)
    }
}
