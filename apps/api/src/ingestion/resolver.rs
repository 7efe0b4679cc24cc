//! Original-URL resolution from aggregator detail pages.
//!
//! Aggregator sites republish announcements and bury the government source
//! URL somewhere in the page. Resolution is pluggable: the default resolver
//! tries cheap structural extraction first and reports which strategy won so
//! operators can see when pages change shape.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::ingestion::IngestionRecord;

/// How the original URL was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListUrlSource {
    /// Derived from the list URL itself, no page fetch needed.
    UrlParse,
    /// Extracted from the detail page markup.
    HtmlExtract,
    /// Recovered by the language model from unstructured page text.
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedUrl {
    pub url: String,
    pub source: ListUrlSource,
}

/// Seam for turning a list-page entry into the announcement's original URL.
#[async_trait]
pub trait ListPageResolver: Send + Sync {
    /// Resolves the original URL given the list URL and, when already
    /// fetched, the detail page HTML. `Ok(None)` means the page held no
    /// recognizable source link.
    async fn resolve_original_url(
        &self,
        list_url: &str,
        page_html: Option<&str>,
    ) -> Result<Option<ResolvedUrl>, AppError>;

    /// Derives the aggregator page URL for a record discovered without one.
    /// `None` means the record carries too little to address a page.
    fn list_url(&self, record: &IngestionRecord) -> Option<ResolvedUrl>;
}

/// Default resolver: query-parameter passthrough, then anchor-text and
/// marker-based HTML extraction. URL synthesis addresses the aggregator's
/// per-announcement page by external id, falling back to a filtered list
/// page for records that only carry region and exam-type codes.
pub struct UrlPatternResolver {
    detail_base: String,
    list_base: String,
}

impl Default for UrlPatternResolver {
    fn default() -> Self {
        UrlPatternResolver {
            detail_base: "https://www.fenbi.com/page/exam-information-detail".to_string(),
            list_base: "https://www.fenbi.com/page/exams-information-list".to_string(),
        }
    }
}

/// Anchor texts that label the source link on aggregator pages.
const SOURCE_LINK_MARKERS: [&str; 3] = ["原文", "来源", "查看原文"];

fn is_external_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Pulls an `url=` style passthrough parameter out of the list URL.
fn original_from_query(list_url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(list_url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "url" || k == "target" || k == "link")
        .map(|(_, v)| v.into_owned())
        .filter(|v| is_external_http(v))
}

/// Scans anchors whose text names the original source.
fn original_from_anchors(document: &Html) -> Option<String> {
    let sel = Selector::parse("a[href]").ok()?;
    for node in document.select(&sel) {
        let text: String = node.text().collect();
        if SOURCE_LINK_MARKERS.iter().any(|m| text.contains(m)) {
            if let Some(href) = node.value().attr("href") {
                if is_external_http(href) {
                    return Some(href.to_string());
                }
            }
        }
    }
    None
}

/// Falls back to a bare URL printed right after a "原文网址" marker in the
/// page text.
fn original_from_marker_text(html: &str) -> Option<String> {
    let idx = html.find("原文网址").or_else(|| html.find("原文链接"))?;
    let tail = &html[idx..];
    let start = tail.find("http")?;
    let url: String = tail[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '<' && *c != '"' && *c != '\'')
        .collect();
    is_external_http(&url).then_some(url)
}

#[async_trait]
impl ListPageResolver for UrlPatternResolver {
    async fn resolve_original_url(
        &self,
        list_url: &str,
        page_html: Option<&str>,
    ) -> Result<Option<ResolvedUrl>, AppError> {
        if let Some(url) = original_from_query(list_url) {
            return Ok(Some(ResolvedUrl {
                url,
                source: ListUrlSource::UrlParse,
            }));
        }
        let Some(html) = page_html else {
            return Ok(None);
        };
        let document = Html::parse_document(html);
        if let Some(url) = original_from_anchors(&document) {
            return Ok(Some(ResolvedUrl {
                url,
                source: ListUrlSource::HtmlExtract,
            }));
        }
        if let Some(url) = original_from_marker_text(html) {
            return Ok(Some(ResolvedUrl {
                url,
                source: ListUrlSource::HtmlExtract,
            }));
        }
        Ok(None)
    }

    fn list_url(&self, record: &IngestionRecord) -> Option<ResolvedUrl> {
        if !record.external_id.is_empty() {
            return Some(ResolvedUrl {
                url: format!("{}/{}", self.detail_base, record.external_id),
                source: ListUrlSource::UrlParse,
            });
        }
        if record.region_code.is_empty() {
            return None;
        }
        let mut url = format!("{}?region={}", self.list_base, record.region_code);
        if !record.exam_type.is_empty() {
            url.push_str(&format!("&exam_type={}", record.exam_type));
        }
        if record.year > 0 {
            url.push_str(&format!("&year={}", record.year));
        }
        Some(ResolvedUrl {
            url,
            source: ListUrlSource::UrlParse,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_passthrough_wins_without_fetch() {
        let resolver = UrlPatternResolver::default();
        let resolved = resolver
            .resolve_original_url(
                "https://list.example.com/jump?url=https://gov.example.cn/notice/1.html",
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.url, "https://gov.example.cn/notice/1.html");
        assert_eq!(resolved.source, ListUrlSource::UrlParse);
    }

    #[tokio::test]
    async fn test_anchor_with_source_marker_text() {
        let html = r#"
            <html><body>
            <a href="/internal">首页</a>
            <a href="https://gov.example.cn/gk/2025.html">查看原文</a>
            </body></html>
        "#;
        let resolver = UrlPatternResolver::default();
        let resolved = resolver
            .resolve_original_url("https://list.example.com/detail/9", Some(html))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.url, "https://gov.example.cn/gk/2025.html");
        assert_eq!(resolved.source, ListUrlSource::HtmlExtract);
    }

    #[tokio::test]
    async fn test_marker_text_with_plain_url() {
        let html = "<p>原文网址在这里</p><p>https://t.example.com/s/Ab12Cd</p>";
        let resolver = UrlPatternResolver::default();
        let resolved = resolver
            .resolve_original_url("https://list.example.com/detail/9", Some(html))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.url, "https://t.example.com/s/Ab12Cd");
        assert_eq!(resolved.source, ListUrlSource::HtmlExtract);
    }

    #[tokio::test]
    async fn test_relative_anchors_are_skipped() {
        let html = r#"<a href="/local/path">原文</a>"#;
        let resolver = UrlPatternResolver::default();
        let resolved = resolver
            .resolve_original_url("https://list.example.com/detail/9", Some(html))
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_no_html_and_no_query_yields_none() {
        let resolver = UrlPatternResolver::default();
        let resolved = resolver
            .resolve_original_url("https://list.example.com/detail/9", None)
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    fn record(external_id: &str, region_code: &str, exam_type: &str, year: i32) -> IngestionRecord {
        IngestionRecord {
            id: 1,
            external_id: external_id.to_string(),
            title: String::new(),
            list_url: None,
            original_url: None,
            final_url: None,
            region_code: region_code.to_string(),
            exam_type: exam_type.to_string(),
            year,
            crawl_status: crate::models::ingestion::CrawlStatus::Pending,
            sync_to_position: false,
            linked_position_id: None,
            claimed_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_list_url_derived_from_external_id() {
        let resolver = UrlPatternResolver::default();
        let resolved = resolver.list_url(&record("12345", "", "", 0)).unwrap();
        assert_eq!(
            resolved.url,
            "https://www.fenbi.com/page/exam-information-detail/12345"
        );
        assert_eq!(resolved.source, ListUrlSource::UrlParse);
    }

    #[test]
    fn test_list_url_from_region_and_exam_type_codes() {
        let resolver = UrlPatternResolver::default();
        let resolved = resolver.list_url(&record("", "4400", "gwy", 2025)).unwrap();
        assert_eq!(
            resolved.url,
            "https://www.fenbi.com/page/exams-information-list?region=4400&exam_type=gwy&year=2025"
        );
        assert_eq!(resolved.source, ListUrlSource::UrlParse);
    }

    #[test]
    fn test_list_url_needs_an_id_or_a_region() {
        let resolver = UrlPatternResolver::default();
        assert!(resolver.list_url(&record("", "", "gwy", 2025)).is_none());
    }
}
