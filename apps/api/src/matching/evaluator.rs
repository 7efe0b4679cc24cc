//! Requirement evaluator: pure function over (profile, preference, position)
//! producing one `MatchDetail` per condition plus an eligibility verdict.
//!
//! Hard conditions gate eligibility; soft conditions only contribute bonus
//! score. A condition the position does not impose counts as matched at full
//! marks. A profile attribute required by a hard condition but empty on the
//! profile fails that condition with a "profile incomplete" reason.

use chrono::NaiveDate;

use crate::matching::weights;
use crate::models::match_cache::MatchDetail;
use crate::models::position::Position;
use crate::models::profile::{MatchStrategy, UserPreference, UserProfile};

const UNRESTRICTED: &str = "不限";

/// Full evaluator output, fed into the score aggregator.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub details: Vec<MatchDetail>,
    pub unmatch_reasons: Vec<String>,
    pub suggestions: Vec<String>,
    pub is_eligible: bool,
}

/// A hard condition that did not pass, with enough context for the loose
/// strategy (closeness) and the smart strategy (near-miss suggestions).
struct GatingFailure {
    reason: String,
    suggestion: Option<String>,
    /// Within one education rank or one year of age of passing.
    is_close: bool,
}

struct ConditionOutcome {
    detail: MatchDetail,
    failure: Option<GatingFailure>,
}

fn pass(condition: &str, user: String, required: String, max: i32) -> ConditionOutcome {
    ConditionOutcome {
        detail: MatchDetail {
            condition: condition.to_string(),
            user_value: user,
            required,
            is_match: true,
            is_hard_match: true,
            score: max,
            max_score: max,
            weight: max,
        },
        failure: None,
    }
}

fn fail(
    condition: &str,
    user: String,
    required: String,
    max: i32,
    failure: GatingFailure,
) -> ConditionOutcome {
    ConditionOutcome {
        detail: MatchDetail {
            condition: condition.to_string(),
            user_value: user,
            required,
            is_match: false,
            is_hard_match: true,
            score: 0,
            max_score: max,
            weight: max,
        },
        failure: Some(failure),
    }
}

fn incomplete(condition: &str, field: &str, required: String, max: i32) -> ConditionOutcome {
    fail(
        condition,
        "未填写".to_string(),
        required,
        max,
        GatingFailure {
            reason: format!("profile incomplete: {field}"),
            suggestion: Some(format!("完善个人资料中的{condition}信息以参与匹配")),
            is_close: false,
        },
    )
}

/// Rank order: college < bachelor < master < doctor. Unknown strings rank
/// as None and are treated as missing data.
fn education_rank(education: &str) -> Option<u8> {
    match education {
        "大专" | "专科" => Some(1),
        "本科" | "大学本科" => Some(2),
        "硕士" | "硕士研究生" | "研究生" => Some(3),
        "博士" | "博士研究生" => Some(4),
        _ => None,
    }
}

fn degree_rank(degree: &str) -> Option<u8> {
    match degree {
        "学士" => Some(1),
        "硕士" => Some(2),
        "博士" => Some(3),
        _ => None,
    }
}

fn normalize_political(status: &str) -> &str {
    match status {
        "党员" => "中共党员",
        "团员" => "共青团员",
        _ => status,
    }
}

fn check_education(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "学历要求";
    let required = &position.education;
    if required.is_empty() || required == UNRESTRICTED {
        return pass(NAME, profile.education.clone(), UNRESTRICTED.into(), weights::EDUCATION_MAX);
    }
    let Some(required_rank) = education_rank(required) else {
        // Unknown requirement text: do not penalize the candidate.
        return pass(NAME, profile.education.clone(), required.clone(), weights::EDUCATION_MAX);
    };
    if profile.education.is_empty() {
        return incomplete(NAME, "education", required.clone(), weights::EDUCATION_MAX);
    }
    let Some(user_rank) = education_rank(&profile.education) else {
        return incomplete(NAME, "education", required.clone(), weights::EDUCATION_MAX);
    };
    if user_rank >= required_rank {
        pass(NAME, profile.education.clone(), required.clone(), weights::EDUCATION_MAX)
    } else {
        fail(
            NAME,
            profile.education.clone(),
            required.clone(),
            weights::EDUCATION_MAX,
            GatingFailure {
                reason: format!("学历不符合要求（要求：{required}，您：{}）", profile.education),
                suggestion: Some(format!("该职位要求{required}及以上学历")),
                is_close: required_rank - user_rank == 1,
            },
        )
    }
}

fn check_degree(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "学位要求";
    let required = &position.degree;
    if required.is_empty() || required == UNRESTRICTED {
        return pass(NAME, profile.degree.clone(), UNRESTRICTED.into(), weights::DEGREE_MAX);
    }
    if profile.degree.is_empty() {
        return incomplete(NAME, "degree", required.clone(), weights::DEGREE_MAX);
    }
    let required_rank = degree_rank(required);
    let user_rank = degree_rank(&profile.degree);
    let matched = match (user_rank, required_rank) {
        (Some(u), Some(r)) => u >= r,
        _ => profile.degree == *required,
    };
    if matched {
        pass(NAME, profile.degree.clone(), required.clone(), weights::DEGREE_MAX)
    } else {
        fail(
            NAME,
            profile.degree.clone(),
            required.clone(),
            weights::DEGREE_MAX,
            GatingFailure {
                reason: format!("学位不符合要求（要求：{required}，您：{}）", profile.degree),
                suggestion: Some(format!("该职位要求{required}学位")),
                is_close: false,
            },
        )
    }
}

fn check_major(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "专业要求";
    if position.is_unlimited_major {
        return pass(NAME, profile.major.clone(), "专业不限".into(), weights::MAJOR_MAX);
    }
    let required = format_major_requirement(position);
    if profile.major_code.is_empty() && profile.major_category.is_empty() {
        return incomplete(NAME, "major", required, weights::MAJOR_MAX);
    }

    let code_match = position
        .major_list
        .iter()
        .any(|code| *code == profile.major_code || *code == profile.second_major_code);
    if code_match {
        return pass(NAME, profile.major.clone(), required, weights::MAJOR_MAX);
    }

    // Same category, different code: half marks, still matched.
    let category_match = !profile.major_category.is_empty()
        && position
            .major_categories
            .iter()
            .any(|cat| *cat == profile.major_category);
    if category_match {
        return ConditionOutcome {
            detail: MatchDetail {
                condition: NAME.to_string(),
                user_value: profile.major.clone(),
                required,
                is_match: true,
                is_hard_match: true,
                score: weights::MAJOR_MAX / 2,
                max_score: weights::MAJOR_MAX,
                weight: weights::MAJOR_MAX,
            },
            failure: None,
        };
    }

    fail(
        NAME,
        profile.major.clone(),
        required,
        weights::MAJOR_MAX,
        GatingFailure {
            reason: format!("专业不符合要求（您：{}）", profile.major),
            suggestion: Some("可关注专业不限的职位，或考虑第二学位".to_string()),
            is_close: false,
        },
    )
}

fn format_major_requirement(position: &Position) -> String {
    if position.major_list.is_empty() && position.major_categories.is_empty() {
        return "专业不限".to_string();
    }
    let joined = position.major_list.join("、");
    if joined.chars().count() > 50 {
        let truncated: String = joined.chars().take(50).collect();
        format!("{truncated}...")
    } else if joined.is_empty() {
        position.major_categories.join("、")
    } else {
        joined
    }
}

fn check_political(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "政治面貌";
    let required = normalize_political(&position.political_status);
    if required.is_empty() || required == UNRESTRICTED {
        return pass(NAME, profile.political_status.clone(), UNRESTRICTED.into(), weights::POLITICAL_MAX);
    }
    if profile.political_status.is_empty() {
        return incomplete(NAME, "political_status", required.to_string(), weights::POLITICAL_MAX);
    }
    let user = normalize_political(&profile.political_status);
    let matched = if required == "中共党员" {
        user == "中共党员" || user == "预备党员"
    } else {
        user == required
    };
    if matched {
        pass(NAME, profile.political_status.clone(), required.to_string(), weights::POLITICAL_MAX)
    } else {
        let suggestion = if required == "中共党员" {
            Some("可考虑向党组织递交入党申请书".to_string())
        } else {
            None
        };
        fail(
            NAME,
            profile.political_status.clone(),
            required.to_string(),
            weights::POLITICAL_MAX,
            GatingFailure {
                reason: format!("政治面貌不符合要求（要求：{required}，您：{user}）"),
                suggestion,
                is_close: false,
            },
        )
    }
}

fn check_age(profile: &UserProfile, position: &Position, today: NaiveDate) -> ConditionOutcome {
    const NAME: &str = "年龄要求";
    if position.age_min.is_none() && position.age_max.is_none() {
        return pass(NAME, format_age(profile, today), UNRESTRICTED.into(), weights::AGE_MAX);
    }
    let required = format_age_range(position.age_min, position.age_max);
    // Age is computed at the written-exam date when known, else today.
    let as_of = position.exam_date.unwrap_or(today);
    let Some(age) = profile.age_on(as_of) else {
        return incomplete(NAME, "birth_date", required, weights::AGE_MAX);
    };

    let below = position.age_min.map(|min| age < min).unwrap_or(false);
    let above = position.age_max.map(|max| age > max).unwrap_or(false);
    if !below && !above {
        return pass(NAME, format!("{age}岁"), required, weights::AGE_MAX);
    }

    let is_close = position.age_min.map(|min| age == min - 1).unwrap_or(false)
        || position.age_max.map(|max| age == max + 1).unwrap_or(false);
    fail(
        NAME,
        format!("{age}岁"),
        required.clone(),
        weights::AGE_MAX,
        GatingFailure {
            reason: format!("年龄不符合要求（要求：{required}，您：{age}岁）"),
            suggestion: None,
            is_close,
        },
    )
}

fn format_age(profile: &UserProfile, today: NaiveDate) -> String {
    match profile.age_on(today) {
        Some(age) => format!("{age}岁"),
        None => "未填写".to_string(),
    }
}

fn format_age_range(min: Option<i32>, max: Option<i32>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("{min}-{max}岁"),
        (Some(min), None) => format!("{min}岁以上"),
        (None, Some(max)) => format!("{max}岁以下"),
        (None, None) => UNRESTRICTED.to_string(),
    }
}

fn check_gender(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "性别要求";
    let required = &position.gender;
    if required.is_empty() || required == UNRESTRICTED {
        return pass(NAME, profile.gender.clone(), UNRESTRICTED.into(), weights::GENDER_MAX);
    }
    if profile.gender.is_empty() {
        return incomplete(NAME, "gender", required.clone(), weights::GENDER_MAX);
    }
    if profile.gender == *required {
        pass(NAME, profile.gender.clone(), required.clone(), weights::GENDER_MAX)
    } else {
        fail(
            NAME,
            profile.gender.clone(),
            required.clone(),
            weights::GENDER_MAX,
            GatingFailure {
                reason: format!("性别不符合要求（要求：{required}）"),
                suggestion: None,
                is_close: false,
            },
        )
    }
}

fn check_work_years(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "工作经验";
    let required_years = position.work_experience_years;
    let user = format!("{}年", profile.work_years);
    if required_years <= 0 {
        return pass(NAME, user, UNRESTRICTED.into(), weights::WORK_YEARS_MAX);
    }
    let required = format!("{required_years}年以上");
    if profile.work_years >= required_years {
        pass(NAME, user, required, weights::WORK_YEARS_MAX)
    } else {
        fail(
            NAME,
            user,
            required.clone(),
            weights::WORK_YEARS_MAX,
            GatingFailure {
                reason: format!("工作经验不足（要求：{required}，您：{}年）", profile.work_years),
                suggestion: Some(format!("该职位需要{required_years}年以上工作经验")),
                is_close: false,
            },
        )
    }
}

fn check_fresh_graduate(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "应届要求";
    let user = if profile.is_fresh_graduate { "应届毕业生" } else { "非应届" };
    // None = unconstrained. Never treat a missing flag as "forbids fresh
    // graduates".
    match position.is_for_fresh_graduate {
        None => pass(NAME, user.into(), UNRESTRICTED.into(), weights::FRESH_GRAD_MAX),
        Some(true) => {
            if profile.is_fresh_graduate {
                pass(NAME, user.into(), "仅限应届毕业生".into(), weights::FRESH_GRAD_MAX)
            } else {
                fail(
                    NAME,
                    user.into(),
                    "仅限应届毕业生".into(),
                    weights::FRESH_GRAD_MAX,
                    GatingFailure {
                        reason: "该职位仅限应届毕业生报考".to_string(),
                        suggestion: None,
                        is_close: false,
                    },
                )
            }
        }
        Some(false) => {
            if profile.is_fresh_graduate {
                fail(
                    NAME,
                    user.into(),
                    "面向社会人员".into(),
                    weights::FRESH_GRAD_MAX,
                    GatingFailure {
                        reason: "该职位面向社会人员招录".to_string(),
                        suggestion: None,
                        is_close: false,
                    },
                )
            } else {
                pass(NAME, user.into(), "面向社会人员".into(), weights::FRESH_GRAD_MAX)
            }
        }
    }
}

fn check_hukou(profile: &UserProfile, position: &Position) -> ConditionOutcome {
    const NAME: &str = "户籍要求";
    let allowed = &position.hukou_provinces;
    if allowed.is_empty() {
        return pass(NAME, profile.hukou_province.clone(), UNRESTRICTED.into(), weights::HUKOU_MAX);
    }
    let required = allowed.join("/");
    if profile.hukou_province.is_empty() {
        return incomplete(NAME, "hukou_province", required, weights::HUKOU_MAX);
    }
    let matched = allowed
        .iter()
        .any(|code| *code == profile.hukou_province || *code == profile.hukou_city);
    if matched {
        pass(NAME, profile.hukou_province.clone(), required, weights::HUKOU_MAX)
    } else {
        fail(
            NAME,
            profile.hukou_province.clone(),
            required.clone(),
            weights::HUKOU_MAX,
            GatingFailure {
                reason: format!("户籍不符合要求（要求：{required}）"),
                suggestion: None,
                is_close: false,
            },
        )
    }
}

fn soft_detail(condition: &str, user: String, required: String, matched: bool, applicable: bool, max: i32) -> MatchDetail {
    // An inapplicable soft condition (no preference expressed) scores full
    // marks so it never drags the soft score down.
    let (is_match, score) = if !applicable {
        (true, max)
    } else if matched {
        (true, max)
    } else {
        (false, 0)
    };
    MatchDetail {
        condition: condition.to_string(),
        user_value: user,
        required,
        is_match,
        is_hard_match: false,
        score,
        max_score: max,
        weight: max,
    }
}

fn check_region_preference(preference: Option<&UserPreference>, position: &Position) -> MatchDetail {
    let provinces: &[String] = preference.map(|p| p.preferred_provinces.as_slice()).unwrap_or(&[]);
    let applicable = !provinces.is_empty();
    let matched = provinces.iter().any(|p| *p == position.province);
    soft_detail(
        "地区偏好",
        provinces.join("、"),
        position.province.clone(),
        matched,
        applicable,
        weights::REGION_PREF_MAX,
    )
}

fn check_department_preference(preference: Option<&UserPreference>, position: &Position) -> MatchDetail {
    let departments: &[String] = preference.map(|p| p.preferred_departments.as_slice()).unwrap_or(&[]);
    let applicable = !departments.is_empty();
    let matched = departments.iter().any(|d| position.department_name.contains(d.as_str()));
    soft_detail(
        "单位偏好",
        departments.join("、"),
        position.department_name.clone(),
        matched,
        applicable,
        weights::DEPARTMENT_PREF_MAX,
    )
}

fn check_exam_type_preference(preference: Option<&UserPreference>, position: &Position) -> MatchDetail {
    let exam_types: &[String] = preference.map(|p| p.exam_types.as_slice()).unwrap_or(&[]);
    let applicable = !exam_types.is_empty();
    let matched = exam_types.iter().any(|t| *t == position.exam_type);
    soft_detail(
        "考试类型偏好",
        exam_types.join("、"),
        position.exam_type.clone(),
        matched,
        applicable,
        weights::EXAM_TYPE_PREF_MAX,
    )
}

/// Evaluates every condition the position expresses, in a fixed order.
pub fn evaluate(
    profile: &UserProfile,
    preference: Option<&UserPreference>,
    position: &Position,
    strategy: MatchStrategy,
    today: NaiveDate,
) -> Evaluation {
    let outcomes = vec![
        check_education(profile, position),
        check_degree(profile, position),
        check_major(profile, position),
        check_political(profile, position),
        check_age(profile, position, today),
        check_gender(profile, position),
        check_work_years(profile, position),
        check_fresh_graduate(profile, position),
        check_hukou(profile, position),
    ];

    let mut details = Vec::with_capacity(outcomes.len() + 3);
    let mut failures = Vec::new();
    for outcome in outcomes {
        details.push(outcome.detail);
        if let Some(f) = outcome.failure {
            failures.push(f);
        }
    }

    details.push(check_region_preference(preference, position));
    details.push(check_department_preference(preference, position));
    details.push(check_exam_type_preference(preference, position));

    let is_eligible = match strategy {
        MatchStrategy::Strict | MatchStrategy::Smart => failures.is_empty(),
        MatchStrategy::Loose => failures.iter().all(|f| f.is_close),
    };

    let unmatch_reasons: Vec<String> = failures.iter().map(|f| f.reason.clone()).collect();
    let suggestions: Vec<String> = if strategy == MatchStrategy::Smart && !is_eligible {
        failures.iter().filter_map(|f| f.suggestion.clone()).take(3).collect()
    } else {
        Vec::new()
    };

    Evaluation {
        details,
        unmatch_reasons,
        suggestions,
        is_eligible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;

    fn base_profile() -> UserProfile {
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

    fn base_position() -> Position {
        Position {
            id: 1,
            position_id: "gd-2025-001".to_string(),
            position_name: "综合管理岗".to_string(),
            department_name: "广州市税务局".to_string(),
            department_level: "市级".to_string(),
            recruit_count: 2,
            education: "本科".to_string(),
            degree: "学士".to_string(),
            major_list: Json(vec!["080901".to_string(), "080902".to_string()]),
            major_categories: Json(vec!["计算机类".to_string()]),
            is_unlimited_major: false,
            political_status: UNRESTRICTED.to_string(),
            age_min: Some(18),
            age_max: Some(35),
            work_experience_years: 0,
            is_for_fresh_graduate: None,
            gender: UNRESTRICTED.to_string(),
            hukou_provinces: Json(vec![]),
            province: "440000".to_string(),
            city: "440100".to_string(),
            exam_type: "省考".to_string(),
            registration_start: Some(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()),
            registration_end: Some(NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()),
            exam_date: Some(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()),
            interview_date: None,
            source_url: String::new(),
            status: crate::models::position::PositionStatus::Published,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn base_preference() -> UserPreference {
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
    fn test_fully_matching_profile_passes_all_hard_conditions() {
        let eval = evaluate(
            &base_profile(),
            Some(&base_preference()),
            &base_position(),
            MatchStrategy::Smart,
            today(),
        );
        assert!(eval.is_eligible);
        assert!(eval.unmatch_reasons.is_empty());
        assert!(eval.details.iter().filter(|d| d.is_hard_match).all(|d| d.is_match));
        // Region bonus fires.
        let region = eval.details.iter().find(|d| d.condition == "地区偏好").unwrap();
        assert_eq!(region.score, region.max_score);
    }

    #[test]
    fn test_education_below_requirement_fails_hard() {
        let mut position = base_position();
        position.education = "硕士".to_string();
        let eval = evaluate(&base_profile(), None, &position, MatchStrategy::Smart, today());
        assert!(!eval.is_eligible);
        let edu = eval.details.iter().find(|d| d.condition == "学历要求").unwrap();
        assert!(!edu.is_match);
        assert_eq!(edu.score, 0);
        assert!(eval.unmatch_reasons.iter().any(|r| r.contains("学历")));
        // Smart strategy lists the required rank in the suggestions.
        assert!(eval.suggestions.iter().any(|s| s.contains("硕士")));
    }

    #[test]
    fn test_loose_strategy_accepts_one_rank_education_gap() {
        let mut position = base_position();
        position.education = "硕士".to_string();
        let strict = evaluate(&base_profile(), None, &position, MatchStrategy::Strict, today());
        assert!(!strict.is_eligible);
        let loose = evaluate(&base_profile(), None, &position, MatchStrategy::Loose, today());
        assert!(loose.is_eligible);

        // Two ranks below is not close.
        position.education = "博士".to_string();
        let loose = evaluate(&base_profile(), None, &position, MatchStrategy::Loose, today());
        assert!(!loose.is_eligible);
    }

    #[test]
    fn test_age_boundary_at_exam_date_is_inclusive() {
        let mut profile = base_profile();
        let mut position = base_position();
        position.exam_date = Some(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap());
        position.age_max = Some(35);
        // Turns exactly 35 before the exam: eligible.
        profile.birth_date = Some(NaiveDate::from_ymd_opt(1990, 3, 15).unwrap());
        let eval = evaluate(&profile, None, &position, MatchStrategy::Strict, today());
        assert!(eval.is_eligible, "age exactly age_max must be eligible");
        // One year older: not eligible.
        profile.birth_date = Some(NaiveDate::from_ymd_opt(1989, 3, 15).unwrap());
        let eval = evaluate(&profile, None, &position, MatchStrategy::Strict, today());
        assert!(!eval.is_eligible);
    }

    #[test]
    fn test_age_one_year_over_is_close_for_loose() {
        let mut profile = base_profile();
        let mut position = base_position();
        position.age_max = Some(25);
        // 25 years and 10 months at exam date → age 25? No: born 1999-05-01,
        // exam 2025-03-15 → 25. Push the birth date back one year for 26.
        profile.birth_date = Some(NaiveDate::from_ymd_opt(1998, 5, 1).unwrap());
        let eval = evaluate(&profile, None, &position, MatchStrategy::Loose, today());
        assert!(eval.is_eligible, "one year over age_max is close under loose");
    }

    #[test]
    fn test_unlimited_major_always_full_marks() {
        let mut profile = base_profile();
        profile.major_code = "999999".to_string();
        profile.major_category = "历史学类".to_string();
        let mut position = base_position();
        position.is_unlimited_major = true;
        let eval = evaluate(&profile, None, &position, MatchStrategy::Strict, today());
        let major = eval.details.iter().find(|d| d.condition == "专业要求").unwrap();
        assert!(major.is_match);
        assert_eq!(major.score, major.max_score);
    }

    #[test]
    fn test_category_match_scores_half() {
        let mut profile = base_profile();
        profile.major_code = "080903".to_string(); // not in the list
        let eval = evaluate(&profile, None, &base_position(), MatchStrategy::Strict, today());
        let major = eval.details.iter().find(|d| d.condition == "专业要求").unwrap();
        assert!(major.is_match);
        assert_eq!(major.score, major.max_score / 2);
        assert!(eval.is_eligible);
    }

    #[test]
    fn test_second_major_code_counts() {
        let mut profile = base_profile();
        profile.major_code = "999999".to_string();
        profile.major_category = String::new();
        profile.second_major_code = "080902".to_string();
        let eval = evaluate(&profile, None, &base_position(), MatchStrategy::Strict, today());
        let major = eval.details.iter().find(|d| d.condition == "专业要求").unwrap();
        assert_eq!(major.score, major.max_score);
    }

    #[test]
    fn test_party_member_requirement_accepts_probationary() {
        let mut position = base_position();
        position.political_status = "中共党员".to_string();
        let mut profile = base_profile();
        profile.political_status = "预备党员".to_string();
        let eval = evaluate(&profile, None, &position, MatchStrategy::Strict, today());
        assert!(eval.is_eligible);

        profile.political_status = "群众".to_string();
        let eval = evaluate(&profile, None, &position, MatchStrategy::Smart, today());
        assert!(!eval.is_eligible);
        assert!(eval.suggestions.iter().any(|s| s.contains("入党")));
    }

    #[test]
    fn test_null_fresh_graduate_flag_is_unconstrained() {
        let mut profile = base_profile();
        profile.is_fresh_graduate = true;
        let mut position = base_position();
        position.is_for_fresh_graduate = None;
        let eval = evaluate(&profile, None, &position, MatchStrategy::Strict, today());
        let fresh = eval.details.iter().find(|d| d.condition == "应届要求").unwrap();
        assert!(fresh.is_match);
        assert_eq!(fresh.score, fresh.max_score);
    }

    #[test]
    fn test_fresh_only_position_rejects_experienced() {
        let mut position = base_position();
        position.is_for_fresh_graduate = Some(true);
        let eval = evaluate(&base_profile(), None, &position, MatchStrategy::Strict, today());
        assert!(!eval.is_eligible);

        // And a social-only position rejects fresh graduates.
        position.is_for_fresh_graduate = Some(false);
        let mut profile = base_profile();
        profile.is_fresh_graduate = true;
        let eval = evaluate(&profile, None, &position, MatchStrategy::Strict, today());
        assert!(!eval.is_eligible);
    }

    #[test]
    fn test_missing_birth_date_fails_with_incomplete_reason() {
        let mut profile = base_profile();
        profile.birth_date = None;
        let eval = evaluate(&profile, None, &base_position(), MatchStrategy::Strict, today());
        assert!(!eval.is_eligible);
        assert!(eval
            .unmatch_reasons
            .iter()
            .any(|r| r == "profile incomplete: birth_date"));
    }

    #[test]
    fn test_hukou_constraint_checks_allowed_set() {
        let mut position = base_position();
        position.hukou_provinces = Json(vec!["440000".to_string(), "450000".to_string()]);
        let eval = evaluate(&base_profile(), None, &position, MatchStrategy::Strict, today());
        assert!(eval.is_eligible);

        let mut profile = base_profile();
        profile.hukou_province = "110000".to_string();
        profile.hukou_city = "110100".to_string();
        let eval = evaluate(&profile, None, &position, MatchStrategy::Strict, today());
        assert!(!eval.is_eligible);
    }

    #[test]
    fn test_no_preference_scores_soft_full() {
        let eval = evaluate(&base_profile(), None, &base_position(), MatchStrategy::Strict, today());
        for d in eval.details.iter().filter(|d| !d.is_hard_match) {
            assert_eq!(d.score, d.max_score, "inapplicable soft condition must score full");
        }
    }

    #[test]
    fn test_department_preference_substring_match() {
        let mut pref = base_preference();
        pref.preferred_departments = Json(vec!["税务".to_string()]);
        let eval = evaluate(&base_profile(), Some(&pref), &base_position(), MatchStrategy::Strict, today());
        let dept = eval.details.iter().find(|d| d.condition == "单位偏好").unwrap();
        assert_eq!(dept.score, dept.max_score);

        pref.preferred_departments = Json(vec!["海关".to_string()]);
        let eval = evaluate(&base_profile(), Some(&pref), &base_position(), MatchStrategy::Strict, today());
        let dept = eval.details.iter().find(|d| d.condition == "单位偏好").unwrap();
        assert_eq!(dept.score, 0);
    }

    #[test]
    fn test_suggestions_capped_at_three() {
        let mut profile = base_profile();
        profile.education = "大专".to_string();
        profile.degree = String::new();
        profile.political_status = "群众".to_string();
        profile.major_code = "999999".to_string();
        profile.major_category = "历史学类".to_string();
        let mut position = base_position();
        position.education = "硕士".to_string();
        position.political_status = "中共党员".to_string();
        position.work_experience_years = 5;
        let eval = evaluate(&profile, None, &position, MatchStrategy::Smart, today());
        assert!(!eval.is_eligible);
        assert!(eval.suggestions.len() <= 3);
        assert!(!eval.suggestions.is_empty());
    }
}
