use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::models::{
    CategorizedCourse, CategoryProgress, CourseStatistics, CourseStatus, GraduationSummary,
    GroupProgress, ProgressReport, ProgressWarning, RequirementDefinition, SemesterMapping,
    SemesterSummary, StudentProfile,
};

/// Completion ratio as a percentage, clamped to [0, 100] and rounded to two
/// places.
pub fn clamped_percentage(completed: Decimal, required: Decimal) -> Decimal {
    if required > Decimal::ZERO {
        (completed / required * Decimal::ONE_HUNDRED)
            .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
            .round_dp(2)
    } else {
        Decimal::ZERO
    }
}

fn shortfall(required: Decimal, completed: Decimal) -> Decimal {
    (required - completed).max(Decimal::ZERO)
}

/// Requirement rows that apply to the student's major and cohort, merged by
/// (category, sub-category) in first-appearance order. Duplicate rows add up.
pub fn applicable_requirements(
    profile: &StudentProfile,
    requirements: &[RequirementDefinition],
) -> Vec<RequirementDefinition> {
    let mut merged: Vec<RequirementDefinition> = Vec::new();
    for requirement in requirements.iter().filter(|req| {
        req.major_code == profile.major_code && req.cohorts.contains(profile.cohort_year)
    }) {
        match merged.iter_mut().find(|existing| {
            existing.category_name == requirement.category_name
                && existing.sub_category == requirement.sub_category
        }) {
            Some(existing) => {
                existing.min_credits += requirement.min_credits;
                existing.min_courses += requirement.min_courses;
            }
            None => merged.push(requirement.clone()),
        }
    }
    merged
}

fn matches_requirement(course: &CategorizedCourse, requirement: &RequirementDefinition) -> bool {
    course.category_name == requirement.category_name
        && requirement
            .sub_category
            .as_ref()
            .map_or(true, |sub| course.sub_category.as_ref() == Some(sub))
}

/// Whether a record counts toward completion.
fn counts(course: &CategorizedCourse, include_planned: bool) -> bool {
    course.is_latest_attempt
        && match course.status {
            CourseStatus::Completed => course.passed,
            CourseStatus::Planned => include_planned,
            CourseStatus::Failed => false,
        }
}

pub fn category_progress(
    courses: &[CategorizedCourse],
    requirement: &RequirementDefinition,
    include_planned: bool,
    config: &EngineConfig,
) -> CategoryProgress {
    let (credits_completed, courses_completed) = courses
        .iter()
        .filter(|course| matches_requirement(course, requirement) && counts(course, include_planned))
        .fold((Decimal::ZERO, 0), |(credits, count), course| {
            (credits + course.credits, count + 1)
        });

    let credits_required = requirement.min_credits;
    let courses_required = requirement.min_courses;
    let progress_percentage = clamped_percentage(credits_completed, credits_required);
    let requirement_met = if credits_required > Decimal::ZERO {
        credits_completed >= credits_required
    } else {
        courses_completed >= courses_required
    };

    CategoryProgress {
        parent_category: config.parent_category(&requirement.category_name).to_string(),
        category_name: requirement.category_name.clone(),
        sub_category: requirement.sub_category.clone(),
        credits_required,
        credits_completed,
        credits_remaining: shortfall(credits_required, credits_completed),
        courses_required,
        courses_completed,
        courses_remaining: (courses_required - courses_completed).max(0),
        progress_percentage,
        requirement_met,
    }
}

/// Rolls categories up by parent category, in first-appearance order.
pub fn group_progress(categories: &[CategoryProgress]) -> Vec<GroupProgress> {
    let mut groups: Vec<GroupProgress> = Vec::new();
    for category in categories {
        let index = match groups
            .iter()
            .position(|group| group.parent_category == category.parent_category)
        {
            Some(index) => index,
            None => {
                groups.push(GroupProgress {
                    parent_category: category.parent_category.clone(),
                    credits_required: Decimal::ZERO,
                    credits_completed: Decimal::ZERO,
                    credits_remaining: Decimal::ZERO,
                    progress_percentage: Decimal::ZERO,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        group.credits_required += category.credits_required;
        group.credits_completed += category.credits_completed;
    }

    for group in &mut groups {
        group.credits_remaining = shortfall(group.credits_required, group.credits_completed);
        group.progress_percentage =
            clamped_percentage(group.credits_completed, group.credits_required);
    }
    groups
}

pub fn graduation_summary(categories: &[CategoryProgress], config: &EngineConfig) -> GraduationSummary {
    let credits_required: Decimal = categories.iter().map(|c| c.credits_required).sum();
    let credits_completed: Decimal = categories.iter().map(|c| c.credits_completed).sum();
    let requirements_completed = categories.iter().filter(|c| c.requirement_met).count();
    let requirements_remaining = categories.len() - requirements_completed;

    let ratio_on_track = credits_required > Decimal::ZERO
        && credits_completed / credits_required >= config.on_track_threshold;

    GraduationSummary {
        overall_percentage: clamped_percentage(credits_completed, credits_required),
        credits_completed,
        credits_remaining: shortfall(credits_required, credits_completed),
        requirements_completed,
        requirements_remaining,
        on_track: requirements_remaining == 0 || ratio_on_track,
    }
}

/// Per-category progress, group rollups and the graduation summary.
///
/// Every applicable requirement produces a category entry, including those no
/// course maps to; those also raise an `InconsistentRequirementData` warning.
pub fn compute_progress(
    profile: &StudentProfile,
    courses: &[CategorizedCourse],
    requirements: &[RequirementDefinition],
    include_planned: bool,
    config: &EngineConfig,
) -> ProgressReport {
    let applicable = applicable_requirements(profile, requirements);
    let mut warnings = Vec::new();
    let mut reported = HashSet::new();

    let categories: Vec<CategoryProgress> = applicable
        .iter()
        .map(|requirement| {
            let mapped = courses.iter().any(|course| matches_requirement(course, requirement));
            if !mapped && reported.insert(requirement.category_name.clone()) {
                warn!(
                    student_id = %profile.student_id,
                    category = %requirement.category_name,
                    "requirement has no mapped courses"
                );
                warnings.push(ProgressWarning::InconsistentRequirementData {
                    category_name: requirement.category_name.clone(),
                });
            }
            category_progress(courses, requirement, include_planned, config)
        })
        .collect();

    let groups = group_progress(&categories);
    let graduation = graduation_summary(&categories, config);

    debug!(
        student_id = %profile.student_id,
        categories = categories.len(),
        overall = %graduation.overall_percentage,
        "progress computed"
    );

    ProgressReport {
        categories,
        groups,
        graduation,
        warnings,
    }
}

/// Totals over every attempt on record, retakes included.
pub fn course_statistics(courses: &[CategorizedCourse]) -> CourseStatistics {
    courses.iter().fold(CourseStatistics::default(), |mut stats, course| {
        stats.credits_taken += course.credits;
        stats.courses_total += 1;
        if course.passed {
            stats.credits_passed += course.credits;
            stats.courses_passed += 1;
        }
        stats
    })
}

#[derive(Default)]
struct GpaTotals {
    points: Decimal,
    credits: Decimal,
}

impl GpaTotals {
    fn gpa(&self) -> Option<Decimal> {
        (self.credits > Decimal::ZERO).then(|| (self.points / self.credits).round_dp(2))
    }
}

/// Credit and GPA summary per mapped semester, in program order.
///
/// Only graded attempts on the grade scale enter the GPA; pass/fail and
/// planned courses do not. The cumulative GPA runs over all earlier
/// semesters including this one.
pub fn semester_summaries(
    mappings: &[SemesterMapping],
    courses: &[CategorizedCourse],
    config: &EngineConfig,
) -> Vec<SemesterSummary> {
    let mut ordered: Vec<&SemesterMapping> = mappings.iter().collect();
    ordered.sort_by_key(|mapping| mapping.chronological_key());

    let mut cumulative = GpaTotals::default();
    ordered
        .into_iter()
        .map(|mapping| {
            let mut summary = SemesterSummary {
                source_label: mapping.source_label.clone(),
                program_year: mapping.program_year,
                program_semester: mapping.program_semester,
                is_summer: mapping.is_summer,
                credits_attempted: Decimal::ZERO,
                credits_registered: Decimal::ZERO,
                credits_passed: Decimal::ZERO,
                grade_points: Decimal::ZERO,
                semester_gpa: None,
                cumulative_gpa: None,
            };
            let mut term = GpaTotals::default();

            for course in courses.iter().filter(|c| c.source_label == mapping.source_label) {
                summary.credits_attempted += course.credits;
                if course.status == CourseStatus::Planned {
                    summary.credits_registered += course.credits;
                    continue;
                }
                if course.passed {
                    summary.credits_passed += course.credits;
                }
                if let Some(point) = config.grade_point(&course.grade) {
                    term.points += point.numeric_value * course.credits;
                    term.credits += course.credits;
                }
            }

            cumulative.points += term.points;
            cumulative.credits += term.credits;
            summary.grade_points = term.points;
            summary.semester_gpa = term.gpa();
            summary.cumulative_gpa = cumulative.gpa();
            summary
        })
        .collect()
}
