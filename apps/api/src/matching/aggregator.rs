//! Score aggregation: folds per-condition details into hard/soft percentages
//! and the blended 0-100 match score.

use crate::matching::evaluator::Evaluation;
use crate::matching::weights::{self, HARD_WEIGHT, SOFT_WEIGHT};
use crate::models::match_cache::MatchDetail;

/// Aggregated result, ready to be cached and returned.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub match_score: i32,
    pub hard_score: i32,
    pub soft_score: i32,
    pub star_level: i32,
    pub match_level: String,
    pub is_eligible: bool,
    pub details: Vec<MatchDetail>,
    pub unmatch_reasons: Vec<String>,
    pub suggestions: Vec<String>,
}

fn percent(details: &[MatchDetail], hard: bool) -> f64 {
    let (earned, max) = details
        .iter()
        .filter(|d| d.is_hard_match == hard)
        .fold((0i64, 0i64), |(e, m), d| (e + d.score as i64, m + d.max_score as i64));
    if max == 0 {
        // No conditions of this kind: treat as fully satisfied so the
        // blend never divides by zero.
        return 100.0;
    }
    earned as f64 * 100.0 / max as f64
}

/// Blends the evaluation into the final score. The blend uses unrounded
/// percentages; each stored field rounds independently.
pub fn aggregate(eval: Evaluation) -> MatchOutcome {
    let hard = percent(&eval.details, true);
    let soft = percent(&eval.details, false);
    let blended = HARD_WEIGHT * hard + SOFT_WEIGHT * soft;

    let match_score = blended.round() as i32;
    let star_level = weights::star_level(match_score);

    MatchOutcome {
        match_score,
        hard_score: hard.round() as i32,
        soft_score: soft.round() as i32,
        star_level,
        match_level: weights::match_level(star_level).to_string(),
        is_eligible: eval.is_eligible,
        details: eval.details,
        unmatch_reasons: eval.unmatch_reasons,
        suggestions: eval.suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::evaluator::evaluate;
    use crate::models::position::{Position, PositionStatus};
    use crate::models::profile::{MatchStrategy, UserPreference, UserProfile};
    use chrono::{NaiveDate, Utc};
    use sqlx::types::Json;

    fn profile() -> UserProfile {
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
            birth_date: Some(NaiveDate::from_ymd_opt(1999, 5, 1).unwrap()),
            political_status: "中共党员".to_string(),
            work_years: 1,
            grassroots_exp_years: 0,
            hukou_province: "440000".to_string(),
            hukou_city: "440100".to_string(),
            identity_type: "社会人员".to_string(),
            profile_completeness: 100,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn position() -> Position {
        Position {
            id: 1,
            position_id: "gd-2025-001".to_string(),
            position_name: "综合管理岗".to_string(),
            department_name: "广州市税务局".to_string(),
            department_level: "市级".to_string(),
            recruit_count: 2,
            education: "本科".to_string(),
            degree: "学士".to_string(),
            major_list: Json(vec!["080901".to_string()]),
            major_categories: Json(vec!["计算机类".to_string()]),
            is_unlimited_major: false,
            political_status: "不限".to_string(),
            age_min: Some(18),
            age_max: Some(35),
            work_experience_years: 0,
            is_for_fresh_graduate: None,
            gender: "不限".to_string(),
            hukou_provinces: Json(vec![]),
            province: "440000".to_string(),
            city: "440100".to_string(),
            exam_type: "省考".to_string(),
            registration_start: None,
            registration_end: None,
            exam_date: Some(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()),
            interview_date: None,
            source_url: String::new(),
            status: PositionStatus::Published,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn preference() -> UserPreference {
        UserPreference {
            id: 1,
            user_id: 1,
            preferred_provinces: Json(vec!["440000".to_string()]),
            preferred_cities: Json(vec![]),
            preferred_departments: Json(vec![]),
            exam_types: Json(vec![]),
            department_levels: Json(vec![]),
            salary_min: None,
            salary_max: None,
            accept_unlimited_major: true,
            accept_fresh_grad_only: false,
            match_strategy: MatchStrategy::Smart,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn test_perfect_match_scores_100_five_stars() {
        let eval = evaluate(&profile(), Some(&preference()), &position(), MatchStrategy::Smart, today());
        let out = aggregate(eval);
        assert_eq!(out.hard_score, 100);
        assert_eq!(out.soft_score, 100);
        assert_eq!(out.match_score, 100);
        assert_eq!(out.star_level, 5);
        assert_eq!(out.match_level, "极高");
        assert!(out.is_eligible);
        assert!(out.unmatch_reasons.is_empty());
    }

    #[test]
    fn test_failed_major_blends_to_82() {
        let mut p = profile();
        p.major_code = "999999".to_string();
        p.major_category = "历史学类".to_string();
        let eval = evaluate(&p, Some(&preference()), &position(), MatchStrategy::Smart, today());
        let out = aggregate(eval);
        // Hard: 70/90 earned = 77.78 rounded to 78; blend uses the
        // unrounded value: 0.8 * 77.78 + 0.2 * 100 = 82.2 -> 82.
        assert_eq!(out.hard_score, 78);
        assert_eq!(out.soft_score, 100);
        assert_eq!(out.match_score, 82);
        assert_eq!(out.star_level, 5);
        assert!(!out.is_eligible);
        assert_eq!(out.unmatch_reasons.len(), 1);
    }

    #[test]
    fn test_category_half_credit_keeps_eligibility() {
        let mut p = profile();
        p.major_code = "080999".to_string();
        let eval = evaluate(&p, Some(&preference()), &position(), MatchStrategy::Smart, today());
        let out = aggregate(eval);
        assert!(out.is_eligible);
        // Hard: 80/90 = 88.89 -> 89.
        assert_eq!(out.hard_score, 89);
        assert_eq!(out.match_score, (0.8f64 * (80.0 * 100.0 / 90.0) + 0.2 * 100.0).round() as i32);
    }

    #[test]
    fn test_no_preference_soft_is_full() {
        let eval = evaluate(&profile(), None, &position(), MatchStrategy::Smart, today());
        let out = aggregate(eval);
        assert_eq!(out.soft_score, 100);
    }

    #[test]
    fn test_unmatched_region_preference_lowers_soft_only() {
        let mut pref = preference();
        pref.preferred_provinces = Json(vec!["110000".to_string()]);
        let eval = evaluate(&profile(), Some(&pref), &position(), MatchStrategy::Smart, today());
        let out = aggregate(eval);
        assert!(out.is_eligible, "preferences never gate eligibility");
        assert_eq!(out.hard_score, 100);
        // Soft: 5/10 earned (region 0, dept 3, exam 2) = 50.
        assert_eq!(out.soft_score, 50);
        assert_eq!(out.match_score, 90);
    }
}
