use std::cmp::Ordering;
use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::debug;

use crate::categorizer::{matching_rule, normalize_code, StudentContext};
use crate::config::EngineConfig;
use crate::models::{
    CategorizationRule, CategorizedCourse, CategoryProgress, ElectivePlaceholder,
    ReferenceData, RemainingRequirementEntry, RequirementType, StudentProfile,
};

/// Required concrete courses for the student, one rule per course code.
///
/// A code counts as required only when the rule the categorization cascade
/// selects for it is marked required.
pub fn required_courses<'r>(
    profile: &StudentProfile,
    rules: &'r [CategorizationRule],
    config: &EngineConfig,
) -> Vec<&'r CategorizationRule> {
    let student = StudentContext::for_profile(profile);
    let mut seen = HashSet::new();
    rules
        .iter()
        .filter(|rule| rule.is_required && student.admits(rule) && student.in_major_group(rule, config))
        .filter_map(|rule| {
            let code = normalize_code(&rule.course_code);
            if !seen.insert(code.clone()) {
                return None;
            }
            matching_rule(&code, &student, rules, config).filter(|winner| winner.is_required)
        })
        .collect()
}

fn latest_attempts(courses: &[CategorizedCourse]) -> impl Iterator<Item = &CategorizedCourse> {
    courses.iter().filter(|course| course.is_latest_attempt)
}

/// Latest attempts that must be retaken, for required courses only.
pub fn retake_stream(
    courses: &[CategorizedCourse],
    required: &[&CategorizationRule],
) -> Vec<RemainingRequirementEntry> {
    let required_codes: HashSet<String> = required
        .iter()
        .map(|rule| normalize_code(&rule.course_code))
        .collect();

    latest_attempts(courses)
        .filter(|course| {
            course.retake_needed && !course.passed && required_codes.contains(&course.course_code)
        })
        .map(|course| RemainingRequirementEntry {
            parent_category: course.parent_category.clone(),
            category_name: course.category_name.clone(),
            sub_category: course.sub_category.clone(),
            course_code: Some(course.course_code.clone()),
            course_title: course.course_title.clone(),
            credits: course.credits,
            recommended_year: None,
            recommended_semester: None,
            requirement_type: RequirementType::RetakeRequired,
            priority_order: 0,
        })
        .collect()
}

/// Required courses with no attempt on record, ranked within their category
/// by recommended year then semester (unset values last).
pub fn concrete_stream(
    courses: &[CategorizedCourse],
    required: &[&CategorizationRule],
    config: &EngineConfig,
) -> Vec<RemainingRequirementEntry> {
    let attempted: HashSet<&str> = latest_attempts(courses)
        .map(|course| course.course_code.as_str())
        .collect();

    let mut outstanding: Vec<&CategorizationRule> = required
        .iter()
        .copied()
        .filter(|rule| !attempted.contains(normalize_code(&rule.course_code).as_str()))
        .collect();
    outstanding.sort_by(|a, b| {
        a.category_name
            .cmp(&b.category_name)
            .then_with(|| nulls_last(&a.recommended_year, &b.recommended_year))
            .then_with(|| nulls_last(&a.recommended_semester, &b.recommended_semester))
    });

    let mut entries: Vec<RemainingRequirementEntry> = Vec::with_capacity(outstanding.len());
    for rule in outstanding {
        let rank = entries
            .iter()
            .filter(|entry| entry.category_name == rule.category_name)
            .count() as i32
            + 1;
        entries.push(RemainingRequirementEntry {
            parent_category: config.parent_category(&rule.category_name).to_string(),
            category_name: rule.category_name.clone(),
            sub_category: None,
            course_code: Some(normalize_code(&rule.course_code)),
            course_title: rule.course_title.clone(),
            credits: rule.credits,
            recommended_year: rule.recommended_year,
            recommended_semester: rule.recommended_semester,
            requirement_type: RequirementType::RequiredCourse,
            priority_order: rank,
        });
    }
    entries
}

/// `count` numbered slots for one placeholder definition.
pub fn expand_placeholder(placeholder: &ElectivePlaceholder) -> Vec<String> {
    (1..=placeholder.count.max(0))
        .map(|n| format!("{} {n}", placeholder.title_prefix))
        .collect()
}

fn same_slot(placeholder: &ElectivePlaceholder, progress: &CategoryProgress) -> bool {
    placeholder.parent_category == progress.parent_category
        && placeholder.category_name == progress.category_name
        && placeholder.sub_category == progress.sub_category
}

/// Elective slots for categories that still need courses, at most as many as
/// the category has courses remaining.
pub fn placeholder_stream(
    profile: &StudentProfile,
    progress: &[CategoryProgress],
    placeholders: &[ElectivePlaceholder],
) -> Vec<RemainingRequirementEntry> {
    let applicable: Vec<&ElectivePlaceholder> = placeholders
        .iter()
        .filter(|p| p.major_code == profile.major_code && p.cohorts.contains(profile.cohort_year))
        .collect();

    let mut entries = Vec::new();
    for category in progress.iter().filter(|c| c.courses_remaining > 0) {
        let mut slots: Vec<(String, Decimal)> = applicable
            .iter()
            .filter(|placeholder| same_slot(placeholder, category))
            .flat_map(|placeholder| {
                expand_placeholder(placeholder)
                    .into_iter()
                    .map(move |title| (title, placeholder.credits))
            })
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        entries.extend(
            slots
                .into_iter()
                .take(category.courses_remaining as usize)
                .enumerate()
                .map(|(index, (title, credits))| RemainingRequirementEntry {
                    parent_category: category.parent_category.clone(),
                    category_name: category.category_name.clone(),
                    sub_category: category.sub_category.clone(),
                    course_code: None,
                    course_title: title,
                    credits,
                    recommended_year: None,
                    recommended_semester: None,
                    requirement_type: RequirementType::ElectivePlaceholder,
                    priority_order: index as i32 + 1,
                }),
        );
    }
    entries
}

fn nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn final_order(a: &RemainingRequirementEntry, b: &RemainingRequirementEntry) -> Ordering {
    a.priority_order
        .cmp(&b.priority_order)
        .then_with(|| nulls_last(&a.recommended_year, &b.recommended_year))
        .then_with(|| nulls_last(&a.recommended_semester, &b.recommended_semester))
        .then_with(|| a.parent_category.cmp(&b.parent_category))
        .then_with(|| a.category_name.cmp(&b.category_name))
        .then_with(|| nulls_last(&a.sub_category, &b.sub_category))
}

/// Ranked list of everything the student still has to take.
///
/// The three streams are concatenated (retakes, required courses, elective
/// slots) and then stable-sorted, so stream order breaks any remaining ties.
pub fn compute_remaining(
    profile: &StudentProfile,
    courses: &[CategorizedCourse],
    progress: &[CategoryProgress],
    reference: &ReferenceData,
    config: &EngineConfig,
) -> Vec<RemainingRequirementEntry> {
    let required = required_courses(profile, &reference.rules, config);

    let retakes = retake_stream(courses, &required);
    let concrete = concrete_stream(courses, &required, config);
    let electives = placeholder_stream(profile, progress, &reference.placeholders);
    debug!(
        student_id = %profile.student_id,
        retakes = retakes.len(),
        required = concrete.len(),
        electives = electives.len(),
        "remaining requirements resolved"
    );

    let mut entries: Vec<RemainingRequirementEntry> = retakes
        .into_iter()
        .chain(concrete)
        .chain(electives)
        .collect();
    entries.sort_by(final_order);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::compute_progress;
    use crate::categorizer::categorize_history;
    use crate::models::{
        CohortRange, CourseAttempt, RawCourseRecord, RawSemesterRecord, RequirementDefinition,
        StudentSnapshot,
    };
    use crate::sequencer::sequence_at;
    use rust_decimal_macros::dec;

    fn profile() -> StudentProfile {
        StudentProfile {
            student_id: "S1".to_string(),
            full_name: "Yaw Darko".to_string(),
            major_code: "CS".to_string(),
            cohort_year: 2021,
            math_track: Some("Calculus".to_string()),
            capstone_option: None,
        }
    }

    fn rule(code: &str, category: &str, year: Option<i32>, semester: Option<i32>) -> CategorizationRule {
        CategorizationRule {
            course_code: code.to_string(),
            course_title: format!("{code} title"),
            credits: dec!(3.0),
            category_name: category.to_string(),
            major_group: Some("CS".to_string()),
            is_required: true,
            recommended_year: year,
            recommended_semester: semester,
            cohorts: CohortRange::default(),
            math_track: None,
            capstone_option: None,
        }
    }

    fn course(code: &str, category: &str, year: i32, passed: bool, latest: bool) -> CategorizedCourse {
        CategorizedCourse {
            source_label: format!("Semester 1 {year}"),
            course_code: code.to_string(),
            course_title: format!("{code} title"),
            parent_category: EngineConfig::default().parent_category(category).to_string(),
            category_name: category.to_string(),
            sub_category: None,
            status: if passed {
                crate::models::CourseStatus::Completed
            } else {
                crate::models::CourseStatus::Failed
            },
            grade: if passed { "B".to_string() } else { "E".to_string() },
            program_year: year,
            program_semester: 1,
            is_summer: false,
            is_latest_attempt: latest,
            passed,
            retake_needed: !passed,
            voluntary_retake_possible: false,
            total_attempts: 1,
            retake_limit_reached: false,
            credits: dec!(3.0),
        }
    }

    #[test]
    fn retaken_and_passed_course_is_listed_nowhere() {
        let config = EngineConfig::default();
        let rules = vec![rule("CS212", "Computing", Some(1), Some(2))];
        let required = required_courses(&profile(), &rules, &config);
        let courses = vec![
            course("CS212", "Computing", 1, false, false),
            course("CS212", "Computing", 2, true, true),
        ];
        assert!(retake_stream(&courses, &required).is_empty());
        assert!(concrete_stream(&courses, &required, &config).is_empty());
    }

    #[test]
    fn failed_required_course_is_only_a_retake() {
        let config = EngineConfig::default();
        let rules = vec![rule("CS212", "Computing", Some(1), Some(2))];
        let reference = ReferenceData {
            rules,
            ..ReferenceData::default()
        };
        let courses = vec![course("CS212", "Computing", 1, false, true)];

        let remaining = compute_remaining(&profile(), &courses, &[], &reference, &config);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].requirement_type, RequirementType::RetakeRequired);
        assert_eq!(remaining[0].priority_order, 0);
    }

    #[test]
    fn failed_elective_is_not_a_retake() {
        let courses = vec![course("ART101", "Non-Major Electives", 1, false, true)];
        assert!(retake_stream(&courses, &[]).is_empty());
    }

    #[test]
    fn concrete_courses_rank_by_recommendation_with_unset_last() {
        let config = EngineConfig::default();
        let rules = vec![
            rule("CS400", "Computing", None, None),
            rule("CS313", "Computing", Some(3), Some(1)),
            rule("CS212", "Computing", Some(2), Some(2)),
            rule("CS211", "Computing", Some(2), Some(1)),
        ];
        let required = required_courses(&profile(), &rules, &config);
        let entries = concrete_stream(&[], &required, &config);

        let order: Vec<_> = entries
            .iter()
            .map(|e| (e.course_code.clone().unwrap_or_default(), e.priority_order))
            .collect();
        assert_eq!(
            order,
            vec![
                ("CS211".to_string(), 1),
                ("CS212".to_string(), 2),
                ("CS313".to_string(), 3),
                ("CS400".to_string(), 4),
            ]
        );
    }

    #[test]
    fn optional_and_foreign_rules_are_not_required() {
        let config = EngineConfig::default();
        let mut optional = rule("CS350", "Computing", None, None);
        optional.is_required = false;
        let mut other_major = rule("BUSA210", "Business", None, None);
        other_major.major_group = Some("BA".to_string());
        let mut engineering = rule("ENGR112", "Required Major Classes", None, None);
        engineering.major_group = Some("ENG".to_string());

        let rules = vec![optional, other_major, engineering];
        assert!(required_courses(&profile(), &rules, &config).is_empty());
    }

    fn progress(category: &str, courses_remaining: i32) -> CategoryProgress {
        CategoryProgress {
            parent_category: EngineConfig::default().parent_category(category).to_string(),
            category_name: category.to_string(),
            sub_category: None,
            credits_required: dec!(4.0),
            credits_completed: dec!(0.0),
            credits_remaining: dec!(4.0),
            courses_required: 4,
            courses_completed: 4 - courses_remaining,
            courses_remaining,
            progress_percentage: dec!(0.0),
            requirement_met: courses_remaining == 0,
        }
    }

    fn placeholder(category: &str, prefix: &str, count: i32) -> ElectivePlaceholder {
        ElectivePlaceholder {
            major_code: "CS".to_string(),
            parent_category: EngineConfig::default().parent_category(category).to_string(),
            category_name: category.to_string(),
            sub_category: None,
            title_prefix: prefix.to_string(),
            count,
            credits: dec!(1.0),
            cohorts: CohortRange::default(),
        }
    }

    #[test]
    fn placeholders_stop_at_courses_remaining() {
        let placeholders = vec![placeholder("Major Electives", "Major Elective", 4)];
        let entries = placeholder_stream(
            &profile(),
            &[progress("Major Electives", 2)],
            &placeholders,
        );
        let titles: Vec<_> = entries.iter().map(|e| e.course_title.as_str()).collect();
        assert_eq!(titles, vec!["Major Elective 1", "Major Elective 2"]);
        assert!(entries.iter().all(|e| e.course_code.is_none()));
    }

    #[test]
    fn satisfied_categories_get_no_placeholders() {
        let placeholders = vec![placeholder("Major Electives", "Major Elective", 4)];
        let entries = placeholder_stream(&profile(), &[progress("Major Electives", 0)], &placeholders);
        assert!(entries.is_empty());
    }

    #[test]
    fn retakes_sort_before_everything() {
        let config = EngineConfig::default();
        let reference = ReferenceData {
            rules: vec![
                rule("CS111", "Computing", Some(1), Some(1)),
                rule("CS212", "Computing", Some(4), Some(2)),
            ],
            placeholders: vec![placeholder("Major Electives", "Major Elective", 1)],
            ..ReferenceData::default()
        };
        let courses = vec![course("CS212", "Computing", 1, false, true)];
        let remaining = compute_remaining(
            &profile(),
            &courses,
            &[progress("Major Electives", 1)],
            &reference,
            &config,
        );

        let kinds: Vec<_> = remaining.iter().map(|e| e.requirement_type).collect();
        assert_eq!(
            kinds,
            vec![
                RequirementType::RetakeRequired,
                RequirementType::RequiredCourse,
                RequirementType::ElectivePlaceholder,
            ]
        );
        let codes: HashSet<_> = remaining.iter().filter_map(|e| e.course_code.clone()).collect();
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn stream_order_breaks_full_ties() {
        let config = EngineConfig::default();
        let reference = ReferenceData {
            rules: vec![rule("CS313", "Major Electives", None, None)],
            placeholders: vec![placeholder("Major Electives", "Major Elective", 1)],
            ..ReferenceData::default()
        };
        let remaining = compute_remaining(
            &profile(),
            &[],
            &[progress("Major Electives", 1)],
            &reference,
            &config,
        );

        assert_eq!(remaining.len(), 2);
        for entry in &remaining {
            assert_eq!(entry.priority_order, 1);
            assert_eq!((entry.recommended_year, entry.recommended_semester), (None, None));
            assert_eq!(entry.category_name, "Major Electives");
            assert_eq!(entry.sub_category, None);
        }
        assert_eq!(remaining[0].requirement_type, RequirementType::RequiredCourse);
        assert_eq!(remaining[0].course_code.as_deref(), Some("CS313"));
        assert_eq!(remaining[1].requirement_type, RequirementType::ElectivePlaceholder);
    }

    #[test]
    fn withdrawn_required_course_stays_outstanding() {
        let config = EngineConfig::default();
        let mappings = vec![crate::models::SemesterMapping {
            source_label: "Semester 1 2021-2022".to_string(),
            academic_year_range: "2021-2022".to_string(),
            program_year: 1,
            program_semester: 1,
            is_summer: false,
            course_count: 1,
        }];
        let reference = ReferenceData {
            rules: vec![rule("CS212", "Computing", Some(1), Some(2))],
            ..ReferenceData::default()
        };
        for grade in ["W", "F", "b-"] {
            let snapshot = StudentSnapshot {
                profile: profile(),
                mappings: mappings.clone(),
                attempts: vec![CourseAttempt {
                    source_label: "Semester 1 2021-2022".to_string(),
                    course: RawCourseRecord {
                        code: "CS212".to_string(),
                        title: "Programming II".to_string(),
                        credits: dec!(1.0),
                        grade: grade.to_string(),
                    },
                }],
            };
            let (courses, warnings) = categorize_history(&snapshot, &reference, &config);
            assert_eq!(warnings.len(), 1, "grade {grade}");

            let remaining = compute_remaining(&snapshot.profile, &courses, &[], &reference, &config);
            assert_eq!(remaining.len(), 1, "grade {grade}");
            assert_eq!(remaining[0].requirement_type, RequirementType::RetakeRequired);
            assert_eq!(remaining[0].course_code.as_deref(), Some("CS212"));
        }
    }

    #[test]
    fn two_semester_computing_scenario() {
        let config = EngineConfig::default();
        let raw = |code: &str, title: &str| RawCourseRecord {
            code: code.to_string(),
            title: title.to_string(),
            credits: dec!(3.0),
            grade: "B".to_string(),
        };
        let semesters = vec![
            RawSemesterRecord {
                label: "Semester 1 2021-2022".to_string(),
                courses: vec![
                    raw("CS111", "Programming I"),
                    raw("ENGL112", "Written Communication"),
                    raw("MATH141", "Calculus I"),
                ],
            },
            RawSemesterRecord {
                label: "Semester 2 2021-2022".to_string(),
                courses: vec![
                    raw("CS112", "Programming II"),
                    raw("IS201", "Information Systems"),
                    raw("ECON101", "Microeconomics"),
                ],
            },
        ];

        let outcome = sequence_at(&semesters, &config, 2025);
        let placements: Vec<_> = outcome
            .mappings
            .iter()
            .map(|m| (m.program_year, m.program_semester, m.is_summer))
            .collect();
        assert_eq!(placements, vec![(1, 1, false), (1, 2, false)]);
        assert!(!outcome.needs_verification);

        let attempts = semesters
            .iter()
            .flat_map(|semester| {
                semester.courses.iter().map(|course| CourseAttempt {
                    source_label: semester.label.clone(),
                    course: course.clone(),
                })
            })
            .collect();
        let snapshot = StudentSnapshot {
            profile: profile(),
            mappings: outcome.mappings,
            attempts,
        };

        let reference = ReferenceData {
            rules: vec![rule("CS211", "Computing", Some(2), Some(1))],
            requirements: vec![RequirementDefinition {
                major_code: "CS".to_string(),
                category_name: "Computing".to_string(),
                sub_category: None,
                min_credits: dec!(12.0),
                min_courses: 4,
                cohorts: CohortRange::default(),
            }],
            placeholders: vec![placeholder("Computing", "Computing Elective", 3)],
            ..ReferenceData::default()
        };

        let (courses, _) = categorize_history(&snapshot, &reference, &config);
        let report = compute_progress(&snapshot.profile, &courses, &reference.requirements, false, &config);
        let computing = &report.categories[0];
        // CS111, CS112 and IS201 fall to Computing by prefix.
        assert_eq!(computing.courses_completed, 3);
        assert_eq!(computing.credits_completed, dec!(9.0));
        assert_eq!(computing.progress_percentage, dec!(75));
        assert_eq!(computing.courses_remaining, 1);

        let remaining = compute_remaining(&snapshot.profile, &courses, &report.categories, &reference, &config);
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].requirement_type, RequirementType::RequiredCourse);
        assert_eq!(remaining[0].course_code.as_deref(), Some("CS211"));
        assert_eq!(remaining[0].recommended_year, Some(2));
        assert_eq!(remaining[0].recommended_semester, Some(1));
        assert_eq!(remaining[1].requirement_type, RequirementType::ElectivePlaceholder);
        assert_eq!(remaining[1].course_title, "Computing Elective 1");
    }
}
