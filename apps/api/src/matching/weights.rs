//! Fixed scoring weights for the requirement evaluator and aggregator.
//!
//! Every condition carries a fixed `max_score`; the hard/soft blend ratio is
//! a named constant so the split is visible in one place.

/// Share of the total score contributed by hard (gating) conditions.
pub const HARD_WEIGHT: f64 = 0.8;
/// Share of the total score contributed by soft (preference) conditions.
pub const SOFT_WEIGHT: f64 = 0.2;

// Hard conditions
pub const EDUCATION_MAX: i32 = 20;
pub const DEGREE_MAX: i32 = 5;
pub const MAJOR_MAX: i32 = 20;
pub const POLITICAL_MAX: i32 = 10;
pub const AGE_MAX: i32 = 10;
pub const GENDER_MAX: i32 = 5;
pub const WORK_YEARS_MAX: i32 = 10;
pub const FRESH_GRAD_MAX: i32 = 5;
pub const HUKOU_MAX: i32 = 5;

// Soft conditions
pub const REGION_PREF_MAX: i32 = 5;
pub const DEPARTMENT_PREF_MAX: i32 = 3;
pub const EXAM_TYPE_PREF_MAX: i32 = 2;

/// Star rating from the blended 0–100 match score.
pub fn star_level(match_score: i32) -> i32 {
    match match_score {
        i32::MIN..=19 => 1,
        20..=39 => 2,
        40..=59 => 3,
        60..=79 => 4,
        _ => 5,
    }
}

/// Display bucket label, indexed by star level.
pub fn match_level(star: i32) -> &'static str {
    match star {
        1 => "极低",
        2 => "较低",
        3 => "中等",
        4 => "较高",
        _ => "极高",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_weights_sum_to_one() {
        assert!((HARD_WEIGHT + SOFT_WEIGHT - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_star_bucket_boundaries() {
        assert_eq!(star_level(0), 1);
        assert_eq!(star_level(19), 1);
        assert_eq!(star_level(20), 2);
        assert_eq!(star_level(39), 2);
        assert_eq!(star_level(40), 3);
        assert_eq!(star_level(59), 3);
        assert_eq!(star_level(60), 4);
        assert_eq!(star_level(79), 4);
        assert_eq!(star_level(80), 5);
        assert_eq!(star_level(100), 5);
    }

    #[test]
    fn test_match_level_labels() {
        assert_eq!(match_level(1), "极低");
        assert_eq!(match_level(3), "中等");
        assert_eq!(match_level(5), "极高");
    }
}
