use std::fmt::Write;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::audit::StudentAudit;
use crate::models::{CategorizedCourse, CourseStatus, RequirementType};

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub status: CourseStatus,
    pub count: usize,
    pub credits: Decimal,
}

/// Latest attempts grouped by status, most frequent first.
pub fn summarize_by_status(courses: &[CategorizedCourse]) -> Vec<StatusSummary> {
    let mut summaries: Vec<StatusSummary> = Vec::new();

    for course in courses.iter().filter(|c| c.is_latest_attempt) {
        match summaries.iter_mut().find(|s| s.status == course.status) {
            Some(summary) => {
                summary.count += 1;
                summary.credits += course.credits;
            }
            None => summaries.push(StatusSummary {
                status: course.status,
                count: 1,
                credits: course.credits,
            }),
        }
    }

    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

fn gpa_label(gpa: Option<Decimal>) -> String {
    gpa.map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

fn requirement_label(kind: RequirementType) -> &'static str {
    match kind {
        RequirementType::RetakeRequired => "retake",
        RequirementType::RequiredCourse => "required",
        RequirementType::ElectivePlaceholder => "elective",
    }
}

pub fn build_report(audit: &StudentAudit, generated_on: NaiveDate) -> String {
    let profile = &audit.profile;
    let mut output = String::new();

    let _ = writeln!(output, "# Degree Audit: {}", profile.full_name);
    let _ = writeln!(
        output,
        "Student {} · {} major · cohort {} (generated {})",
        profile.student_id, profile.major_code, profile.cohort_year, generated_on
    );
    if let (Some(track), Some(capstone)) = (&profile.math_track, &profile.capstone_option) {
        let _ = writeln!(output, "Math track: {track}; capstone: {capstone}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Semester Timeline");
    if audit.mappings.is_empty() {
        let _ = writeln!(output, "No semesters on record.");
    } else {
        for mapping in &audit.mappings {
            let term = if mapping.is_summer {
                "Summer".to_string()
            } else {
                format!("Semester {}", mapping.program_semester)
            };
            let _ = writeln!(
                output,
                "- Year {} {}: {} ({} courses)",
                mapping.program_year, term, mapping.source_label, mapping.course_count
            );
        }
    }

    if !audit.semesters.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Semester Credits");
        let _ = writeln!(output, "| Semester | Attempted | Passed | Registered | GPA | Cumulative GPA |");
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for semester in &audit.semesters {
            let _ = writeln!(
                output,
                "| {} | {:.1} | {:.1} | {:.1} | {} | {} |",
                semester.source_label,
                semester.credits_attempted,
                semester.credits_passed,
                semester.credits_registered,
                gpa_label(semester.semester_gpa),
                gpa_label(semester.cumulative_gpa)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Course Status");
    let summaries = summarize_by_status(&audit.courses);
    if summaries.is_empty() {
        let _ = writeln!(output, "No courses on record.");
    } else {
        let stats = &audit.statistics;
        let _ = writeln!(
            output,
            "{} of {} attempts passed ({:.1} of {:.1} credits).",
            stats.courses_passed, stats.courses_total, stats.credits_passed, stats.credits_taken
        );
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} courses ({:.1} credits)",
                summary.status, summary.count, summary.credits
            );
        }
    }

    let latest: Vec<&CategorizedCourse> =
        audit.courses.iter().filter(|c| c.is_latest_attempt).collect();
    let voluntary: Vec<&str> = latest
        .iter()
        .filter(|c| c.voluntary_retake_possible)
        .map(|c| c.course_code.as_str())
        .collect();
    if !voluntary.is_empty() {
        let _ = writeln!(output, "Voluntary retake possible: {}", voluntary.join(", "));
    }
    for course in latest.iter().filter(|c| c.retake_limit_reached) {
        let _ = writeln!(
            output,
            "Attempt limit reached: {} ({} attempts, latest grade {})",
            course.course_code, course.total_attempts, course.grade
        );
    }

    let progress = &audit.progress;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Category Progress");
    let _ = writeln!(output, "| Group | Category | Credits | Courses | Progress |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for category in &progress.categories {
        let name = match &category.sub_category {
            Some(sub) if *sub != category.category_name => {
                format!("{} / {}", category.category_name, sub)
            }
            _ => category.category_name.clone(),
        };
        let _ = writeln!(
            output,
            "| {} | {} | {:.1} / {:.1} | {} / {} | {:.0}%{} |",
            category.parent_category,
            name,
            category.credits_completed,
            category.credits_required,
            category.courses_completed,
            category.courses_required,
            category.progress_percentage,
            if category.requirement_met { " ✓" } else { "" }
        );
    }

    let _ = writeln!(output);
    for group in &progress.groups {
        let _ = writeln!(
            output,
            "- {}: {:.1} of {:.1} credits ({:.0}%), {:.1} remaining",
            group.parent_category,
            group.credits_completed,
            group.credits_required,
            group.progress_percentage,
            group.credits_remaining
        );
    }

    let graduation = &progress.graduation;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Graduation Outlook");
    let _ = writeln!(
        output,
        "Overall {:.1}% complete: {:.1} credits earned, {:.1} remaining.",
        graduation.overall_percentage, graduation.credits_completed, graduation.credits_remaining
    );
    let _ = writeln!(
        output,
        "{} requirements met, {} outstanding. {}",
        graduation.requirements_completed,
        graduation.requirements_remaining,
        if graduation.on_track {
            "On track to graduate."
        } else {
            "Not yet on track."
        }
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Remaining Requirements");
    if audit.remaining.is_empty() {
        let _ = writeln!(output, "Nothing outstanding.");
    } else {
        for entry in &audit.remaining {
            let when = match (entry.recommended_year, entry.recommended_semester) {
                (Some(year), Some(semester)) => format!(" (year {year}, semester {semester})"),
                (Some(year), None) => format!(" (year {year})"),
                _ => String::new(),
            };
            let _ = writeln!(
                output,
                "- [{}] {}{}: {}{}",
                requirement_label(entry.requirement_type),
                entry.course_code.as_deref().map(|c| format!("{c} ")).unwrap_or_default(),
                entry.course_title,
                entry.category_name,
                when
            );
        }
    }

    if !progress.warnings.is_empty() || !audit.warnings.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Data Warnings");
        for warning in &progress.warnings {
            let _ = writeln!(output, "- {warning}");
        }
        for warning in &audit.warnings {
            let _ = writeln!(output, "- {warning}");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CourseStatistics, GraduationSummary, ProgressReport, ProgressWarning,
        RemainingRequirementEntry, SemesterSummary, StudentProfile,
    };
    use rust_decimal_macros::dec;

    fn course(code: &str, status: CourseStatus, latest: bool) -> CategorizedCourse {
        CategorizedCourse {
            source_label: "Semester 1 2022-2023".to_string(),
            course_code: code.to_string(),
            course_title: code.to_string(),
            parent_category: "MAJOR".to_string(),
            category_name: "Required Major Classes".to_string(),
            sub_category: None,
            status,
            grade: String::new(),
            program_year: 1,
            program_semester: 1,
            is_summer: false,
            is_latest_attempt: latest,
            passed: status == CourseStatus::Completed,
            retake_needed: status == CourseStatus::Failed,
            voluntary_retake_possible: false,
            total_attempts: 1,
            retake_limit_reached: false,
            credits: dec!(1.0),
        }
    }

    #[test]
    fn summaries_count_latest_attempts_only() {
        let courses = vec![
            course("CS111", CourseStatus::Completed, true),
            course("CS212", CourseStatus::Failed, false),
            course("CS212", CourseStatus::Completed, true),
            course("CS313", CourseStatus::Planned, true),
        ];
        let summaries = summarize_by_status(&courses);
        assert_eq!(summaries[0].status, CourseStatus::Completed);
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries.len(), 2);
    }

    #[test]
    fn report_lists_sections_and_warnings() {
        let audit = StudentAudit {
            profile: StudentProfile {
                student_id: "S1".to_string(),
                full_name: "Kwame Mensah".to_string(),
                major_code: "CS".to_string(),
                cohort_year: 2022,
                math_track: Some("Calculus".to_string()),
                capstone_option: Some("Applied Project".to_string()),
            },
            mappings: Vec::new(),
            semesters: Vec::new(),
            courses: Vec::new(),
            statistics: CourseStatistics::default(),
            progress: ProgressReport {
                categories: Vec::new(),
                groups: Vec::new(),
                graduation: GraduationSummary {
                    overall_percentage: Decimal::ZERO,
                    credits_completed: Decimal::ZERO,
                    credits_remaining: Decimal::ZERO,
                    requirements_completed: 0,
                    requirements_remaining: 0,
                    on_track: true,
                },
                warnings: vec![ProgressWarning::InconsistentRequirementData {
                    category_name: "Capstone".to_string(),
                }],
            },
            remaining: vec![RemainingRequirementEntry {
                parent_category: "MAJOR".to_string(),
                category_name: "Major Electives".to_string(),
                sub_category: None,
                course_code: None,
                course_title: "Major Elective 1".to_string(),
                credits: dec!(1.0),
                recommended_year: None,
                recommended_semester: None,
                requirement_type: RequirementType::ElectivePlaceholder,
                priority_order: 1,
            }],
            warnings: Vec::new(),
        };

        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let report = build_report(&audit, date);
        assert!(report.starts_with("# Degree Audit: Kwame Mensah"));
        assert!(report.contains("## Remaining Requirements"));
        assert!(report.contains("- [elective] Major Elective 1: Major Electives"));
        assert!(report.contains("no courses map to required category Capstone"));
    }

    #[test]
    fn course_status_shows_retake_options_and_semester_credits() {
        let mut weak = course("CS212", CourseStatus::Completed, true);
        weak.grade = "D+".to_string();
        weak.voluntary_retake_possible = true;
        let mut exhausted = course("MATH141", CourseStatus::Failed, true);
        exhausted.grade = "E".to_string();
        exhausted.total_attempts = 3;
        exhausted.retake_limit_reached = true;

        let audit = StudentAudit {
            profile: StudentProfile {
                student_id: "S2".to_string(),
                full_name: "Esi Quaye".to_string(),
                major_code: "CS".to_string(),
                cohort_year: 2022,
                math_track: None,
                capstone_option: None,
            },
            mappings: Vec::new(),
            semesters: vec![SemesterSummary {
                source_label: "Semester 1 2022-2023".to_string(),
                program_year: 1,
                program_semester: 1,
                is_summer: false,
                credits_attempted: dec!(2.0),
                credits_passed: dec!(1.0),
                credits_registered: Decimal::ZERO,
                grade_points: dec!(1.5),
                semester_gpa: Some(dec!(0.75)),
                cumulative_gpa: Some(dec!(0.75)),
            }],
            courses: vec![weak, exhausted],
            statistics: CourseStatistics {
                credits_taken: dec!(2.0),
                credits_passed: dec!(1.0),
                courses_total: 2,
                courses_passed: 1,
            },
            progress: ProgressReport {
                categories: Vec::new(),
                groups: Vec::new(),
                graduation: GraduationSummary {
                    overall_percentage: Decimal::ZERO,
                    credits_completed: Decimal::ZERO,
                    credits_remaining: Decimal::ZERO,
                    requirements_completed: 0,
                    requirements_remaining: 0,
                    on_track: true,
                },
                warnings: Vec::new(),
            },
            remaining: Vec::new(),
            warnings: Vec::new(),
        };

        let report = build_report(&audit, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert!(report.contains("| Semester 1 2022-2023 | 2.0 | 1.0 | 0.0 | 0.75 | 0.75 |"));
        assert!(report.contains("1 of 2 attempts passed (1.0 of 2.0 credits)."));
        assert!(report.contains("Voluntary retake possible: CS212"));
        assert!(report.contains("Attempt limit reached: MATH141 (3 attempts, latest grade E)"));
    }
}
