use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::models::{CourseStatus, ReferenceData, StudentProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeOutcome {
    pub status: CourseStatus,
    pub passed: bool,
    pub retake_needed: bool,
    /// False when a non-empty grade is missing from the grade scale.
    pub recognized: bool,
}

/// Trimmed and upper-cased, the way the grade scale spells grades.
pub fn normalize_grade(grade: &str) -> String {
    grade.trim().to_uppercase()
}

/// Minimum grade a student must earn in `course_code`.
///
/// An explicit per-major requirement wins; prerequisite courses and the
/// elevated categories need the elevated minimum; everything else the default.
pub fn minimum_grade(
    course_code: &str,
    category_name: &str,
    profile: &StudentProfile,
    reference: &ReferenceData,
    config: &EngineConfig,
) -> String {
    let explicit = reference.grade_requirements.iter().find(|req| {
        req.course_code == course_code
            && req.major_code == profile.major_code
            && req.cohorts.contains(profile.cohort_year)
    });
    if let Some(requirement) = explicit {
        return requirement.minimum_grade.clone();
    }

    let is_prerequisite = reference
        .prerequisite_courses
        .iter()
        .any(|code| code == course_code);
    let elevated_category = config.elevated_categories.iter().any(|c| c == category_name);

    if is_prerequisite || elevated_category {
        config.elevated_minimum_grade.clone()
    } else {
        config.default_minimum_grade.clone()
    }
}

/// Grades `grade` against `minimum`.
///
/// Only an empty grade leaves a course planned. A grade the scale does not
/// know (a withdrawal, a typo) earns no credit and is flagged through
/// `recognized`, so the course stays outstanding.
pub fn evaluate(grade: &str, minimum: &str, config: &EngineConfig) -> GradeOutcome {
    let grade = normalize_grade(grade);

    if grade.is_empty() {
        return GradeOutcome {
            status: CourseStatus::Planned,
            passed: false,
            retake_needed: false,
            recognized: true,
        };
    }

    if grade.eq_ignore_ascii_case(&config.pass_grade) {
        return GradeOutcome {
            status: CourseStatus::Completed,
            passed: true,
            retake_needed: false,
            recognized: true,
        };
    }

    let Some(point) = config.grade_point(&grade) else {
        return GradeOutcome {
            status: CourseStatus::Failed,
            passed: false,
            retake_needed: true,
            recognized: false,
        };
    };

    let floor = config
        .grade_point(minimum)
        .map(|min| min.numeric_value)
        .unwrap_or(Decimal::ZERO);
    let passed = point.is_passing && point.numeric_value >= floor;

    GradeOutcome {
        status: if passed {
            CourseStatus::Completed
        } else {
            CourseStatus::Failed
        },
        passed,
        retake_needed: !passed,
        recognized: true,
    }
}

/// A passing but weak grade may be retaken while attempts remain.
pub fn voluntary_retake_possible(
    grade: &str,
    outcome: &GradeOutcome,
    total_attempts: u32,
    config: &EngineConfig,
) -> bool {
    outcome.passed
        && total_attempts < config.retake_attempt_limit
        && config
            .voluntary_retake_grades
            .iter()
            .any(|g| g.eq_ignore_ascii_case(grade.trim()))
}
