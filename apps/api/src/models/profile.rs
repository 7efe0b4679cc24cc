use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// The user's self-reported attributes used as match inputs.
/// `updated_at` doubles as the profile version for cache invalidation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub id: i64,
    pub user_id: i64,

    pub education: String,
    pub degree: String,
    pub graduate_year: Option<i32>,
    pub is_current_student: bool,
    pub is_fresh_graduate: bool,

    pub major: String,
    pub major_code: String,
    pub major_category: String,
    pub second_major_code: String,

    pub gender: String,
    pub birth_date: Option<NaiveDate>,
    pub political_status: String,
    pub work_years: i32,
    pub grassroots_exp_years: i32,

    pub hukou_province: String,
    pub hukou_city: String,
    pub identity_type: String,

    pub profile_completeness: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Version used as part of the match-cache key.
    pub fn version(&self) -> i64 {
        self.updated_at.timestamp()
    }

    /// Age on a given date. None when no birth date is on file.
    pub fn age_on(&self, date: NaiveDate) -> Option<i32> {
        let birth = self.birth_date?;
        let mut age = date.year() - birth.year();
        if (date.month(), date.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        Some(age)
    }

    /// Derived completeness score, 0–100. Weighted field checklist: the
    /// attributes the hard conditions gate on count double.
    pub fn completeness(&self) -> i32 {
        let mut score = 0;
        if !self.education.is_empty() {
            score += 2;
        }
        if !self.degree.is_empty() {
            score += 1;
        }
        if self.graduate_year.is_some() {
            score += 1;
        }
        if !self.major.is_empty() || !self.major_code.is_empty() {
            score += 2;
        }
        if !self.major_category.is_empty() {
            score += 1;
        }
        if !self.gender.is_empty() {
            score += 1;
        }
        if self.birth_date.is_some() {
            score += 2;
        }
        if !self.political_status.is_empty() {
            score += 2;
        }
        if !self.identity_type.is_empty() {
            score += 1;
        }
        if !self.hukou_province.is_empty() {
            score += 1;
        }
        (score * 100 / 14).min(100)
    }
}

/// Matching strategy selected by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "match_strategy", rename_all = "snake_case")]
pub enum MatchStrategy {
    Strict,
    Loose,
    #[default]
    Smart,
}

/// Weighting and strategy inputs to the match. Contributes to the soft
/// score only; preferences never gate eligibility.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserPreference {
    pub id: i64,
    pub user_id: i64,
    pub preferred_provinces: Json<Vec<String>>,
    pub preferred_cities: Json<Vec<String>>,
    pub preferred_departments: Json<Vec<String>>,
    pub exam_types: Json<Vec<String>>,
    pub department_levels: Json<Vec<String>>,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub accept_unlimited_major: bool,
    pub accept_fresh_grad_only: bool,
    pub match_strategy: MatchStrategy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_birth(birth: NaiveDate) -> UserProfile {
        UserProfile {
            id: 1,
            user_id: 1,
            education: "本科".to_string(),
            degree: "学士".to_string(),
            graduate_year: Some(2021),
            is_current_student: false,
            is_fresh_graduate: false,
            major: "计算机科学与技术".to_string(),
            major_code: "080901".to_string(),
            major_category: "计算机类".to_string(),
            second_major_code: String::new(),
            gender: "男".to_string(),
            birth_date: Some(birth),
            political_status: "中共党员".to_string(),
            work_years: 1,
            grassroots_exp_years: 0,
            hukou_province: "440000".to_string(),
            hukou_city: "440100".to_string(),
            identity_type: "社会人员".to_string(),
            profile_completeness: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_age_counts_birthday_not_yet_reached() {
        let p = profile_with_birth(NaiveDate::from_ymd_opt(1999, 5, 1).unwrap());
        // Exam the day before the birthday: still 25.
        let exam = NaiveDate::from_ymd_opt(2025, 4, 30).unwrap();
        assert_eq!(p.age_on(exam), Some(25));
        // On the birthday itself: 26.
        let exam = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        assert_eq!(p.age_on(exam), Some(26));
    }

    #[test]
    fn test_age_none_without_birth_date() {
        let mut p = profile_with_birth(NaiveDate::from_ymd_opt(1999, 5, 1).unwrap());
        p.birth_date = None;
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()), None);
    }

    #[test]
    fn test_completeness_full_profile_is_100() {
        let p = profile_with_birth(NaiveDate::from_ymd_opt(1999, 5, 1).unwrap());
        assert_eq!(p.completeness(), 100);
    }

    #[test]
    fn test_completeness_empty_profile_is_0() {
        let mut p = profile_with_birth(NaiveDate::from_ymd_opt(1999, 5, 1).unwrap());
        p.education = String::new();
        p.degree = String::new();
        p.graduate_year = None;
        p.major = String::new();
        p.major_code = String::new();
        p.major_category = String::new();
        p.gender = String::new();
        p.birth_date = None;
        p.political_status = String::new();
        p.identity_type = String::new();
        p.hukou_province = String::new();
        assert_eq!(p.completeness(), 0);
    }

    #[test]
    fn test_match_strategy_default_is_smart() {
        assert_eq!(MatchStrategy::default(), MatchStrategy::Smart);
    }
}
