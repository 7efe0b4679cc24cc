use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

/// Crawl progress of an externally discovered announcement.
/// Transitions are strictly monotonic: pending → list_crawled → detail_crawled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "crawl_status", rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    ListCrawled,
    DetailCrawled,
}

/// Durable work-queue row tracking an external announcement's crawl progress.
/// `external_id` is unique; duplicate discovery is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IngestionRecord {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub list_url: Option<String>,
    pub original_url: Option<String>,
    pub final_url: Option<String>,
    pub region_code: String,
    pub exam_type: String,
    pub year: i32,
    pub crawl_status: CrawlStatus,
    pub sync_to_position: bool,
    pub linked_position_id: Option<String>,
    /// In-progress marker for exclusive claiming; NULL when unclaimed.
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal statuses are never reopened; a retry creates a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "parse_task_status", rename_all = "snake_case")]
pub enum ParseTaskStatus {
    Pending,
    Running,
    Parsing,
    Completed,
    Failed,
    Skipped,
}

impl ParseTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParseTaskStatus::Completed | ParseTaskStatus::Failed | ParseTaskStatus::Skipped
        )
    }
}

/// The six parse steps in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    DiscoverListUrl,
    ResolveOriginalUrl,
    ResolveFinalUrl,
    FetchContent,
    LlmParse,
    Persist,
}

impl StepName {
    pub const CANONICAL_ORDER: [StepName; 6] = [
        StepName::DiscoverListUrl,
        StepName::ResolveOriginalUrl,
        StepName::ResolveFinalUrl,
        StepName::FetchContent,
        StepName::LlmParse,
        StepName::Persist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::DiscoverListUrl => "discover_list_url",
            StepName::ResolveOriginalUrl => "resolve_original_url",
            StepName::ResolveFinalUrl => "resolve_final_url",
            StepName::FetchContent => "fetch_content",
            StepName::LlmParse => "llm_parse",
            StepName::Persist => "persist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Skipped,
    Failed,
}

impl StepStatus {
    /// A step counts as done for resume purposes when it cannot be re-run.
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Skipped)
    }
}

/// One entry in a parse task's ordered `steps` array. Appended before
/// execution and updated in place on completion, so partial progress
/// survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseStep {
    pub name: StepName,
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Counts reported by the persist step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseSummary {
    pub positions_created: u32,
    pub positions_updated: u32,
}

/// Unit of work converting one ingestion record into persisted positions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParseTask {
    pub id: i64,
    pub record_id: i64,
    pub status: ParseTaskStatus,
    pub message: String,
    pub steps: Json<Vec<ParseStep>>,
    pub summary: Json<ParseSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// True when `steps` is a prefix of the canonical order, the structural
/// invariant every recorded task must satisfy.
pub fn is_canonical_prefix(steps: &[ParseStep]) -> bool {
    steps.len() <= StepName::CANONICAL_ORDER.len()
        && steps
            .iter()
            .zip(StepName::CANONICAL_ORDER.iter())
            .all(|(step, name)| step.name == *name)
}

/// Index of the first step to (re)execute when resuming a task: the first
/// step that is not in a done state, or the next canonical step when all
/// recorded steps are done.
pub fn resume_index(steps: &[ParseStep]) -> usize {
    steps
        .iter()
        .position(|s| !s.status.is_done())
        .unwrap_or(steps.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: StepName, status: StepStatus) -> ParseStep {
        ParseStep {
            name,
            status,
            message: String::new(),
            data: None,
            attempts: 1,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        }
    }

    #[test]
    fn test_crawl_status_is_ordered() {
        assert!(CrawlStatus::Pending < CrawlStatus::ListCrawled);
        assert!(CrawlStatus::ListCrawled < CrawlStatus::DetailCrawled);
    }

    #[test]
    fn test_step_names_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&StepName::DiscoverListUrl).unwrap(),
            "\"discover_list_url\""
        );
        assert_eq!(StepName::LlmParse.as_str(), "llm_parse");
    }

    #[test]
    fn test_canonical_prefix_accepts_in_order_steps() {
        let steps = vec![
            step(StepName::DiscoverListUrl, StepStatus::Success),
            step(StepName::ResolveOriginalUrl, StepStatus::Skipped),
            step(StepName::ResolveFinalUrl, StepStatus::Running),
        ];
        assert!(is_canonical_prefix(&steps));
    }

    #[test]
    fn test_canonical_prefix_rejects_out_of_order_steps() {
        let steps = vec![
            step(StepName::FetchContent, StepStatus::Success),
            step(StepName::DiscoverListUrl, StepStatus::Success),
        ];
        assert!(!is_canonical_prefix(&steps));
    }

    #[test]
    fn test_resume_skips_done_steps() {
        let steps = vec![
            step(StepName::DiscoverListUrl, StepStatus::Success),
            step(StepName::ResolveOriginalUrl, StepStatus::Skipped),
            step(StepName::ResolveFinalUrl, StepStatus::Failed),
        ];
        assert_eq!(resume_index(&steps), 2);
    }

    #[test]
    fn test_resume_continues_past_all_done_steps() {
        let steps = vec![
            step(StepName::DiscoverListUrl, StepStatus::Success),
            step(StepName::ResolveOriginalUrl, StepStatus::Success),
        ];
        assert_eq!(resume_index(&steps), 2);
    }

    #[test]
    fn test_resume_empty_starts_at_zero() {
        assert_eq!(resume_index(&[]), 0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ParseTaskStatus::Completed.is_terminal());
        assert!(ParseTaskStatus::Failed.is_terminal());
        assert!(ParseTaskStatus::Skipped.is_terminal());
        assert!(!ParseTaskStatus::Running.is_terminal());
        assert!(!ParseTaskStatus::Parsing.is_terminal());
    }
}
