//! Position persistence: filtered listing and idempotent upserts keyed by
//! the external position id.

use serde::Deserialize;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use crate::errors::AppError;
use crate::models::ingestion::ParseSummary;
use crate::models::position::{Position, PositionBrief, PositionStatus, PositionUpsert};

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionFilter {
    pub keyword: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub exam_type: Option<String>,
    pub education: Option<String>,
    pub is_unlimited_major: Option<bool>,
    pub is_for_fresh_graduate: Option<bool>,
    pub status: Option<PositionStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl PositionFilter {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.page < 1 {
            return Err(AppError::Validation("page must be >= 1".into()));
        }
        if !(1..=100).contains(&self.page_size) {
            return Err(AppError::Validation("page_size must be 1..=100".into()));
        }
        Ok(())
    }
}

const FILTER_WHERE: &str = r#"
    ($1::text IS NULL OR position_name ILIKE '%' || $1 || '%'
        OR department_name ILIKE '%' || $1 || '%')
    AND ($2::text IS NULL OR province = $2)
    AND ($3::text IS NULL OR city = $3)
    AND ($4::text IS NULL OR exam_type = $4)
    AND ($5::text IS NULL OR education = $5)
    AND ($6::bool IS NULL OR is_unlimited_major = $6)
    AND ($7::bool IS NULL OR is_for_fresh_graduate = $7)
    AND ($8::position_status IS NULL OR status = $8)
"#;

/// Filtered, paginated listing plus the unpaginated total.
pub async fn list(
    pool: &PgPool,
    filter: &PositionFilter,
) -> Result<(Vec<PositionBrief>, i64), AppError> {
    filter.validate()?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM positions WHERE {FILTER_WHERE}"
    ))
    .bind(&filter.keyword)
    .bind(&filter.province)
    .bind(&filter.city)
    .bind(&filter.exam_type)
    .bind(&filter.education)
    .bind(filter.is_unlimited_major)
    .bind(filter.is_for_fresh_graduate)
    .bind(filter.status)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as::<_, PositionBrief>(&format!(
        r#"
        SELECT id, position_id, position_name, department_name, department_level,
               recruit_count, education, is_unlimited_major, is_for_fresh_graduate,
               province, city, exam_type, registration_end, status, created_at
        FROM positions WHERE {FILTER_WHERE}
        ORDER BY registration_end DESC NULLS LAST, id DESC
        LIMIT $9 OFFSET $10
        "#
    ))
    .bind(&filter.keyword)
    .bind(&filter.province)
    .bind(&filter.city)
    .bind(&filter.exam_type)
    .bind(&filter.education)
    .bind(filter.is_unlimited_major)
    .bind(filter.is_for_fresh_graduate)
    .bind(filter.status)
    .bind(filter.page_size)
    .bind((filter.page - 1) * filter.page_size)
    .fetch_all(pool)
    .await?;

    Ok((items, total))
}

pub async fn get_by_position_id(pool: &PgPool, position_id: &str) -> Result<Position, AppError> {
    sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE position_id = $1")
        .bind(position_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("position {position_id}")))
}

/// Inserts or updates one position keyed by `position_id`. Returns true
/// when the row was newly created. Re-parsing the same announcement is an
/// update, never a duplicate.
pub async fn upsert(pool: &PgPool, item: &PositionUpsert) -> Result<(Position, bool), AppError> {
    if item.position_id.is_empty() {
        return Err(AppError::Validation("position_id is required".into()));
    }
    if item.position_name.is_empty() {
        return Err(AppError::Validation("position_name is required".into()));
    }

    // created_at == updated_at only on the inserting transaction; the
    // update arm always bumps updated_at.
    let (position, created): (Position, bool) = sqlx::query_as::<_, Position>(
        r#"
        INSERT INTO positions
            (position_id, position_name, department_name, department_level,
             recruit_count, education, degree, major_list, major_categories,
             is_unlimited_major, political_status, age_min, age_max,
             work_experience_years, is_for_fresh_graduate, gender,
             hukou_provinces, province, city, exam_type, registration_start,
             registration_end, exam_date, interview_date, source_url, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, 'published')
        ON CONFLICT (position_id) DO UPDATE SET
            position_name = EXCLUDED.position_name,
            department_name = EXCLUDED.department_name,
            department_level = EXCLUDED.department_level,
            recruit_count = EXCLUDED.recruit_count,
            education = EXCLUDED.education,
            degree = EXCLUDED.degree,
            major_list = EXCLUDED.major_list,
            major_categories = EXCLUDED.major_categories,
            is_unlimited_major = EXCLUDED.is_unlimited_major,
            political_status = EXCLUDED.political_status,
            age_min = EXCLUDED.age_min,
            age_max = EXCLUDED.age_max,
            work_experience_years = EXCLUDED.work_experience_years,
            is_for_fresh_graduate = EXCLUDED.is_for_fresh_graduate,
            gender = EXCLUDED.gender,
            hukou_provinces = EXCLUDED.hukou_provinces,
            province = EXCLUDED.province,
            city = EXCLUDED.city,
            exam_type = EXCLUDED.exam_type,
            registration_start = EXCLUDED.registration_start,
            registration_end = EXCLUDED.registration_end,
            exam_date = EXCLUDED.exam_date,
            interview_date = EXCLUDED.interview_date,
            source_url = EXCLUDED.source_url,
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(&item.position_id)
    .bind(&item.position_name)
    .bind(&item.department_name)
    .bind(&item.department_level)
    .bind(item.recruit_count)
    .bind(&item.education)
    .bind(&item.degree)
    .bind(Json(&item.major_list))
    .bind(Json(&item.major_categories))
    .bind(item.is_unlimited_major)
    .bind(&item.political_status)
    .bind(item.age_min)
    .bind(item.age_max)
    .bind(item.work_experience_years)
    .bind(item.is_for_fresh_graduate)
    .bind(&item.gender)
    .bind(Json(&item.hukou_provinces))
    .bind(&item.province)
    .bind(&item.city)
    .bind(&item.exam_type)
    .bind(item.registration_start)
    .bind(item.registration_end)
    .bind(item.exam_date)
    .bind(item.interview_date)
    .bind(&item.source_url)
    .fetch_one(pool)
    .await
    .map(|p: Position| {
        let created = p.created_at == p.updated_at;
        (p, created)
    })?;

    debug!(
        "{} position {}",
        if created { "created" } else { "updated" },
        position.position_id
    );
    Ok((position, created))
}

/// Upserts a parsed batch, reporting counts and which rows were updates
/// (those need cache invalidation and calendar reprojection downstream).
pub async fn upsert_many(
    pool: &PgPool,
    items: &[PositionUpsert],
) -> Result<(ParseSummary, Vec<(Position, bool)>), AppError> {
    let mut summary = ParseSummary::default();
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let (position, created) = upsert(pool, item).await?;
        if created {
            summary.positions_created += 1;
        } else {
            summary.positions_updated += 1;
        }
        results.push((position, created));
    }
    Ok((summary, results))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PositionFilter {
        PositionFilter {
            keyword: None,
            province: None,
            city: None,
            exam_type: None,
            education: None,
            is_unlimited_major: None,
            is_for_fresh_graduate: None,
            status: None,
            page: 1,
            page_size: 20,
        }
    }

    #[test]
    fn test_filter_rejects_bad_pagination() {
        let mut f = filter();
        f.page = 0;
        assert!(f.validate().is_err());

        let mut f = filter();
        f.page_size = 500;
        assert!(f.validate().is_err());

        assert!(filter().validate().is_ok());
    }

    #[test]
    fn test_filter_defaults_from_empty_query() {
        let f: PositionFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(f.page, 1);
        assert_eq!(f.page_size, 20);
        assert!(f.keyword.is_none());
    }
}
