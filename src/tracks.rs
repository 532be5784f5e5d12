use crate::categorizer::normalize_code;
use crate::config::EngineConfig;
use crate::models::RawCourseRecord;

pub const CALCULUS: &str = "Calculus";
pub const PRE_CALCULUS: &str = "Pre-Calculus";
pub const APPLIED_PROJECT: &str = "Applied Project";
pub const ENGINEERING_SENIOR_PROJECT: &str = "Engineering Senior Project";

const CALCULUS_CODES: [&str; 2] = ["MATH141", "MATH142"];
const CALCULUS_TITLES: [&str; 4] = ["CALCULUS I", "CALCULUS II", "CALCULUS 1", "CALCULUS 2"];
const PRE_CALCULUS_TITLES: [&str; 3] = ["PRE-CALCULUS", "PRECALCULUS", "PRE CALCULUS"];

/// Capstone options in the order they are checked.
const CAPSTONE_PATTERNS: [(&str, &[&str]); 5] = [
    ("Undergraduate BA Thesis", &["BUSA400A", "BUSA400B"]),
    ("Undergraduate CS Thesis", &["CS491", "CS492"]),
    ("Entrepreneurship", &["BUSA401A", "BUSA401B"]),
    (ENGINEERING_SENIOR_PROJECT, &["ENGR401"]),
    (APPLIED_PROJECT, &["BUSA410"]),
];

fn mentions(courses: &[RawCourseRecord], codes: &[&str], titles: &[&str]) -> bool {
    courses.iter().any(|course| {
        let code = normalize_code(&course.code);
        let title = course.title.to_uppercase();
        codes.iter().any(|pattern| code.contains(pattern))
            || titles.iter().any(|pattern| title.contains(pattern))
    })
}

pub fn detect_math_track(courses: &[RawCourseRecord]) -> &'static str {
    let is_calculus = |course: &RawCourseRecord| {
        let code = normalize_code(&course.code);
        let title = course.title.to_uppercase();
        // "PRE-CALCULUS I" also contains "CALCULUS I".
        let pre_calculus_title = PRE_CALCULUS_TITLES.iter().any(|p| title.contains(p));
        CALCULUS_CODES.iter().any(|p| code.contains(p))
            || (!pre_calculus_title && CALCULUS_TITLES.iter().any(|p| title.contains(p)))
    };

    // Pre-calculus courses and an empty history both land on Pre-Calculus,
    // which the student can change later.
    if courses.iter().any(is_calculus) {
        CALCULUS
    } else {
        PRE_CALCULUS
    }
}

pub fn detect_capstone_option(
    courses: &[RawCourseRecord],
    major_code: &str,
    config: &EngineConfig,
) -> &'static str {
    if config.is_engineering(major_code) {
        return ENGINEERING_SENIOR_PROJECT;
    }

    CAPSTONE_PATTERNS
        .iter()
        .find(|(_, codes)| mentions(courses, codes, &[]))
        .map(|(option, _)| *option)
        .unwrap_or(APPLIED_PROJECT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn course(code: &str, title: &str) -> RawCourseRecord {
        RawCourseRecord {
            code: code.to_string(),
            title: title.to_string(),
            credits: Decimal::ONE,
            grade: "B".to_string(),
        }
    }

    #[test]
    fn calculus_codes_select_calculus_track() {
        let courses = vec![course("MATH 141", "Calculus I"), course("CS111", "Intro")];
        assert_eq!(detect_math_track(&courses), CALCULUS);
    }

    #[test]
    fn pre_calculus_titles_do_not_count_as_calculus() {
        let courses = vec![course("MATH999", "Pre-Calculus I")];
        assert_eq!(detect_math_track(&courses), PRE_CALCULUS);
        assert_eq!(detect_math_track(&[]), PRE_CALCULUS);
    }

    #[test]
    fn capstone_detection_follows_priority() {
        let config = EngineConfig::default();
        let thesis = vec![course("CS491", "Thesis I"), course("BUSA410", "Applied Project")];
        assert_eq!(detect_capstone_option(&thesis, "CS", &config), "Undergraduate CS Thesis");
        assert_eq!(detect_capstone_option(&[], "BA", &config), APPLIED_PROJECT);
        assert_eq!(
            detect_capstone_option(&thesis, "ME", &config),
            ENGINEERING_SENIOR_PROJECT
        );
    }
}
