use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

/// Publication status of a position. `Offline` is the tombstone; positions
/// are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "position_status", rename_all = "snake_case")]
pub enum PositionStatus {
    Pending,
    Published,
    Offline,
}

/// A recruitment position with structured requirements and lifecycle dates.
///
/// `position_id` is the stable business key (external id used for
/// deduplication on re-parse); `id` is the numeric surrogate.
/// `updated_at` doubles as the position version for cache invalidation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: i64,
    pub position_id: String,
    pub position_name: String,
    pub department_name: String,
    pub department_level: String,
    pub recruit_count: i32,

    // Requirements
    pub education: String,
    pub degree: String,
    pub major_list: Json<Vec<String>>,
    pub major_categories: Json<Vec<String>>,
    pub is_unlimited_major: bool,
    pub political_status: String,
    pub age_min: Option<i32>,
    pub age_max: Option<i32>,
    pub work_experience_years: i32,
    /// None = unconstrained, Some(true) = fresh graduates only,
    /// Some(false) = experienced candidates only.
    pub is_for_fresh_graduate: Option<bool>,
    pub gender: String,
    pub hukou_provinces: Json<Vec<String>>,

    // Location / exam info
    pub province: String,
    pub city: String,
    pub exam_type: String,

    // Lifecycle dates are all optional; absence is NULL, never a zero date
    pub registration_start: Option<NaiveDate>,
    pub registration_end: Option<NaiveDate>,
    pub exam_date: Option<NaiveDate>,
    pub interview_date: Option<NaiveDate>,

    pub source_url: String,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Version used as part of the match-cache key.
    pub fn version(&self) -> i64 {
        self.updated_at.timestamp()
    }
}

/// Brief projection for list responses.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionBrief {
    pub id: i64,
    pub position_id: String,
    pub position_name: String,
    pub department_name: String,
    pub department_level: String,
    pub recruit_count: i32,
    pub education: String,
    pub is_unlimited_major: bool,
    pub is_for_fresh_graduate: Option<bool>,
    pub province: String,
    pub city: String,
    pub exam_type: String,
    pub registration_end: Option<NaiveDate>,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when a parsed announcement or an admin creates/updates a
/// position. Everything the requirement evaluator consumes is here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpsert {
    pub position_id: String,
    pub position_name: String,
    #[serde(default)]
    pub department_name: String,
    #[serde(default)]
    pub department_level: String,
    #[serde(default = "default_recruit_count")]
    pub recruit_count: i32,
    #[serde(default)]
    pub education: String,
    #[serde(default)]
    pub degree: String,
    #[serde(default)]
    pub major_list: Vec<String>,
    #[serde(default)]
    pub major_categories: Vec<String>,
    #[serde(default)]
    pub is_unlimited_major: bool,
    #[serde(default)]
    pub political_status: String,
    pub age_min: Option<i32>,
    pub age_max: Option<i32>,
    #[serde(default)]
    pub work_experience_years: i32,
    pub is_for_fresh_graduate: Option<bool>,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub hukou_provinces: Vec<String>,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub exam_type: String,
    pub registration_start: Option<NaiveDate>,
    pub registration_end: Option<NaiveDate>,
    pub exam_date: Option<NaiveDate>,
    pub interview_date: Option<NaiveDate>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub extra: Option<Value>,
}

fn default_recruit_count() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PositionStatus::Published).unwrap(),
            "\"published\""
        );
        let s: PositionStatus = serde_json::from_str("\"offline\"").unwrap();
        assert_eq!(s, PositionStatus::Offline);
    }

    #[test]
    fn test_upsert_defaults_fresh_graduate_to_unconstrained() {
        let json = r#"{"position_id": "p-1", "position_name": "科员"}"#;
        let u: PositionUpsert = serde_json::from_str(json).unwrap();
        assert_eq!(u.is_for_fresh_graduate, None);
        assert_eq!(u.recruit_count, 1);
        assert!(!u.is_unlimited_major);
    }
}
