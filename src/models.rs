use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCourseRecord {
    pub code: String,
    pub title: String,
    pub credits: Decimal,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSemesterRecord {
    pub label: String,
    pub courses: Vec<RawCourseRecord>,
}

/// Canonical placement of one transcript semester on the program timeline.
///
/// `program_semester` is 0 for summer terms, otherwise 1 or 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemesterMapping {
    pub source_label: String,
    pub academic_year_range: String,
    pub program_year: i32,
    pub program_semester: i32,
    pub is_summer: bool,
    #[serde(default)]
    pub course_count: i32,
}

impl SemesterMapping {
    /// A summer term carries the year the counters had already advanced to,
    /// so (year, semester) orders summers correctly as semester 0.
    pub fn chronological_key(&self) -> (i32, i32) {
        (self.program_year, self.program_semester)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Completed,
    Planned,
    Failed,
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CourseStatus::Completed => "completed",
            CourseStatus::Planned => "planned",
            CourseStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedCourse {
    pub source_label: String,
    pub course_code: String,
    pub course_title: String,
    pub parent_category: String,
    pub category_name: String,
    pub sub_category: Option<String>,
    pub status: CourseStatus,
    pub grade: String,
    pub program_year: i32,
    pub program_semester: i32,
    pub is_summer: bool,
    pub is_latest_attempt: bool,
    pub passed: bool,
    pub retake_needed: bool,
    pub voluntary_retake_possible: bool,
    pub total_attempts: u32,
    pub retake_limit_reached: bool,
    pub credits: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub full_name: String,
    pub major_code: String,
    pub cohort_year: i32,
    pub math_track: Option<String>,
    pub capstone_option: Option<String>,
}

/// Inclusive cohort window; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortRange {
    pub from: Option<i32>,
    pub until: Option<i32>,
}

impl CohortRange {
    pub fn contains(&self, cohort_year: i32) -> bool {
        self.from.map_or(true, |from| cohort_year >= from)
            && self.until.map_or(true, |until| cohort_year <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationRule {
    pub course_code: String,
    pub course_title: String,
    pub credits: Decimal,
    pub category_name: String,
    pub major_group: Option<String>,
    pub is_required: bool,
    pub recommended_year: Option<i32>,
    pub recommended_semester: Option<i32>,
    pub cohorts: CohortRange,
    pub math_track: Option<String>,
    pub capstone_option: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementDefinition {
    pub major_code: String,
    pub category_name: String,
    pub sub_category: Option<String>,
    pub min_credits: Decimal,
    pub min_courses: i32,
    pub cohorts: CohortRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectivePlaceholder {
    pub major_code: String,
    pub parent_category: String,
    pub category_name: String,
    pub sub_category: Option<String>,
    pub title_prefix: String,
    pub count: i32,
    pub credits: Decimal,
    pub cohorts: CohortRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRequirement {
    pub major_code: String,
    pub course_code: String,
    pub minimum_grade: String,
    pub cohorts: CohortRange,
}

/// Institutional reference data, read once per audit run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub rules: Vec<CategorizationRule>,
    pub requirements: Vec<RequirementDefinition>,
    pub placeholders: Vec<ElectivePlaceholder>,
    pub grade_requirements: Vec<GradeRequirement>,
    pub prerequisite_courses: Vec<String>,
    pub course_aliases: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAttempt {
    pub source_label: String,
    pub course: RawCourseRecord,
}

/// Everything persisted for one student: mappings plus raw attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSnapshot {
    pub profile: StudentProfile,
    pub mappings: Vec<SemesterMapping>,
    pub attempts: Vec<CourseAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryProgress {
    pub parent_category: String,
    pub category_name: String,
    pub sub_category: Option<String>,
    pub credits_required: Decimal,
    pub credits_completed: Decimal,
    pub credits_remaining: Decimal,
    pub courses_required: i32,
    pub courses_completed: i32,
    pub courses_remaining: i32,
    pub progress_percentage: Decimal,
    pub requirement_met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupProgress {
    pub parent_category: String,
    pub credits_required: Decimal,
    pub credits_completed: Decimal,
    pub credits_remaining: Decimal,
    pub progress_percentage: Decimal,
}

/// Credits and GPA for one mapped semester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemesterSummary {
    pub source_label: String,
    pub program_year: i32,
    pub program_semester: i32,
    pub is_summer: bool,
    /// Every course on the semester, graded or not.
    pub credits_attempted: Decimal,
    /// Courses still without a grade.
    pub credits_registered: Decimal,
    pub credits_passed: Decimal,
    pub grade_points: Decimal,
    pub semester_gpa: Option<Decimal>,
    pub cumulative_gpa: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseStatistics {
    pub credits_taken: Decimal,
    pub credits_passed: Decimal,
    pub courses_total: usize,
    pub courses_passed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduationSummary {
    pub overall_percentage: Decimal,
    pub credits_completed: Decimal,
    pub credits_remaining: Decimal,
    pub requirements_completed: usize,
    pub requirements_remaining: usize,
    pub on_track: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressWarning {
    /// Requirement configured for a category no course maps to.
    InconsistentRequirementData { category_name: String },
}

impl fmt::Display for ProgressWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressWarning::InconsistentRequirementData { category_name } => {
                write!(f, "no courses map to required category {category_name}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub categories: Vec<CategoryProgress>,
    pub groups: Vec<GroupProgress>,
    pub graduation: GraduationSummary,
    pub warnings: Vec<ProgressWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    RetakeRequired,
    RequiredCourse,
    ElectivePlaceholder,
}

impl fmt::Display for RequirementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequirementType::RetakeRequired => "retake_required",
            RequirementType::RequiredCourse => "required_course",
            RequirementType::ElectivePlaceholder => "elective_placeholder",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemainingRequirementEntry {
    pub parent_category: String,
    pub category_name: String,
    pub sub_category: Option<String>,
    pub course_code: Option<String>,
    pub course_title: String,
    pub credits: Decimal,
    pub recommended_year: Option<i32>,
    pub recommended_semester: Option<i32>,
    pub requirement_type: RequirementType,
    pub priority_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
            VerificationStatus::Modified => "modified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(VerificationStatus::Pending),
            "approved" => Some(VerificationStatus::Approved),
            "rejected" => Some(VerificationStatus::Rejected),
            "modified" => Some(VerificationStatus::Modified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub token: String,
    pub student_id: String,
    pub status: VerificationStatus,
    pub original_mappings: Vec<SemesterMapping>,
    pub updated_mappings: Option<Vec<SemesterMapping>>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// One transcript import, written to the store as a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptImport {
    pub profile: StudentProfile,
    pub mappings: Vec<SemesterMapping>,
    pub attempts: Vec<CourseAttempt>,
    pub verification: Option<VerificationRecord>,
}
