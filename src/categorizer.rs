use std::collections::HashMap;

use tracing::debug;

use crate::config::{EngineConfig, UNIVERSAL_GROUP};
use crate::error::InputWarning;
use crate::grading;
use crate::models::{
    CategorizationRule, CategorizedCourse, ReferenceData, SemesterMapping, StudentProfile,
    StudentSnapshot,
};

/// What the rule cascade needs to know about the student.
#[derive(Debug, Clone, Copy)]
pub struct StudentContext<'a> {
    pub major_code: &'a str,
    pub cohort_year: Option<i32>,
    pub math_track: Option<&'a str>,
    pub capstone_option: Option<&'a str>,
}

impl<'a> StudentContext<'a> {
    pub fn major_only(major_code: &'a str) -> Self {
        Self {
            major_code,
            cohort_year: None,
            math_track: None,
            capstone_option: None,
        }
    }

    pub fn for_profile(profile: &'a StudentProfile) -> Self {
        Self {
            major_code: &profile.major_code,
            cohort_year: Some(profile.cohort_year),
            math_track: profile.math_track.as_deref(),
            capstone_option: profile.capstone_option.as_deref(),
        }
    }

    /// Cohort, math-track and capstone constraints on a rule. Unknown student
    /// attributes do not exclude anything.
    pub fn admits(&self, rule: &CategorizationRule) -> bool {
        let cohort_ok = self
            .cohort_year
            .map_or(true, |year| rule.cohorts.contains(year));
        let track_ok = match (rule.math_track.as_deref(), self.math_track) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        };
        let capstone_ok = match (rule.capstone_option.as_deref(), self.capstone_option) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        };
        cohort_ok && track_ok && capstone_ok
    }

    /// Whether the rule's major group applies to this student at all.
    pub fn in_major_group(&self, rule: &CategorizationRule, config: &EngineConfig) -> bool {
        match rule.major_group.as_deref() {
            None => true,
            Some(group) => {
                group == self.major_code
                    || group == UNIVERSAL_GROUP
                    || group == config.major_group(self.major_code)
            }
        }
    }
}

/// Strips whitespace and upper-cases: "math 141" becomes "MATH141".
pub fn normalize_code(code: &str) -> String {
    code.split_whitespace().collect::<String>().to_uppercase()
}

/// Rewrites a historical course code to its current code.
pub fn resolve_alias(code: &str, reference: &ReferenceData) -> String {
    reference
        .course_aliases
        .iter()
        .find(|(historical, _)| historical == code)
        .map(|(_, current)| current.clone())
        .unwrap_or_else(|| code.to_string())
}

/// Leading letters of a course code: "CS313" gives "CS", "BUSA400A" gives "BUSA".
pub fn code_prefix(code: &str) -> String {
    code.chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase()
}

pub fn categorize(
    course_code: &str,
    major_code: &str,
    rules: &[CategorizationRule],
    config: &EngineConfig,
) -> String {
    categorize_for(course_code, &StudentContext::major_only(major_code), rules, config)
}

/// Resolves the category of one course. Always returns a category.
///
/// Rules are tried in three tiers: exact major, the universal group, then
/// the student's engineering/non-engineering group. Within a tier the first
/// rule in table order wins. With no rule, the code-prefix heuristic decides.
pub fn categorize_for(
    course_code: &str,
    student: &StudentContext<'_>,
    rules: &[CategorizationRule],
    config: &EngineConfig,
) -> String {
    let code = normalize_code(course_code);
    match matching_rule(&code, student, rules, config) {
        Some(rule) => rule.category_name.clone(),
        None => prefix_category(&code, student.major_code, config),
    }
}

/// The rule the cascade selects for an already-normalized code, if any.
pub fn matching_rule<'r>(
    code: &str,
    student: &StudentContext<'_>,
    rules: &'r [CategorizationRule],
    config: &EngineConfig,
) -> Option<&'r CategorizationRule> {
    let major_group = config.major_group(student.major_code);
    let tier = |group: Option<&str>| match group {
        Some(group) if group == student.major_code => Some(0),
        None | Some(UNIVERSAL_GROUP) => Some(1),
        Some(group) if group == major_group => Some(2),
        _ => None,
    };

    // min_by_key keeps the first of equal tiers, so table order decides within one
    rules
        .iter()
        .filter(|rule| normalize_code(&rule.course_code) == code && student.admits(rule))
        .filter_map(|rule| tier(rule.major_group.as_deref()).map(|rank| (rank, rule)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, rule)| rule)
}

/// The code-prefix heuristic used when no categorization rule matches.
pub fn prefix_category(code: &str, major_code: &str, config: &EngineConfig) -> String {
    let prefix = code_prefix(code);
    let engineering = config.is_engineering(major_code);

    config
        .prefix_rules
        .iter()
        .find(|rule| rule.prefixes.iter().any(|p| *p == prefix))
        .map(|rule| match (&rule.engineering_category, engineering) {
            (Some(category), true) => category.clone(),
            _ => rule.category.clone(),
        })
        .unwrap_or_else(|| config.fallback_category.clone())
}

/// Turns a student's persisted attempts into categorized course records.
///
/// Exactly one record per course code carries `is_latest_attempt`: the one in
/// the chronologically last semester (input order breaks ties).
pub fn categorize_history(
    snapshot: &StudentSnapshot,
    reference: &ReferenceData,
    config: &EngineConfig,
) -> (Vec<CategorizedCourse>, Vec<InputWarning>) {
    let profile = &snapshot.profile;
    let student = StudentContext::for_profile(profile);
    let mappings: HashMap<&str, &SemesterMapping> = snapshot
        .mappings
        .iter()
        .map(|m| (m.source_label.as_str(), m))
        .collect();

    let mut warnings = Vec::new();
    let mut placed = Vec::with_capacity(snapshot.attempts.len());
    for (index, attempt) in snapshot.attempts.iter().enumerate() {
        match mappings.get(attempt.source_label.as_str()) {
            Some(mapping) => placed.push((index, *mapping, attempt)),
            None => warnings.push(InputWarning::UnmappedSemester {
                label: attempt.source_label.clone(),
                code: attempt.course.code.clone(),
            }),
        }
    }
    placed.sort_by_key(|(index, mapping, _)| (mapping.chronological_key(), *index));

    let codes: Vec<String> = placed
        .iter()
        .map(|(_, _, attempt)| resolve_alias(&normalize_code(&attempt.course.code), reference))
        .collect();

    let mut attempt_counts: HashMap<&str, u32> = HashMap::new();
    let mut latest: HashMap<&str, usize> = HashMap::new();
    for (position, code) in codes.iter().enumerate() {
        *attempt_counts.entry(code.as_str()).or_default() += 1;
        // placed is chronological, so the last position seen is the latest
        latest.insert(code.as_str(), position);
    }

    let mut sub_category_hits = 0usize;
    let mut records = Vec::with_capacity(placed.len());
    for (position, (_, mapping, attempt)) in placed.iter().enumerate() {
        let code = &codes[position];
        let course = &attempt.course;
        let category_name = categorize_for(code, &student, &reference.rules, config);

        let sub_category = if category_name == config.fallback_category {
            Some(title_sub_category(&course.title, &mut sub_category_hits, config))
        } else {
            None
        };

        let minimum = grading::minimum_grade(code, &category_name, profile, reference, config);
        let outcome = grading::evaluate(&course.grade, &minimum, config);
        if !outcome.recognized {
            warnings.push(InputWarning::UnknownGrade {
                code: code.clone(),
                grade: grading::normalize_grade(&course.grade),
            });
        }
        let total_attempts = attempt_counts.get(code.as_str()).copied().unwrap_or(1);

        records.push(CategorizedCourse {
            source_label: attempt.source_label.clone(),
            course_code: code.clone(),
            course_title: course.title.clone(),
            parent_category: config.parent_category(&category_name).to_string(),
            category_name,
            sub_category,
            status: outcome.status,
            grade: grading::normalize_grade(&course.grade),
            program_year: mapping.program_year,
            program_semester: mapping.program_semester,
            is_summer: mapping.is_summer,
            is_latest_attempt: latest.get(code.as_str()) == Some(&position),
            passed: outcome.passed,
            retake_needed: outcome.retake_needed,
            voluntary_retake_possible: grading::voluntary_retake_possible(
                &course.grade,
                &outcome,
                total_attempts,
                config,
            ),
            total_attempts,
            retake_limit_reached: total_attempts >= config.retake_attempt_limit,
            credits: course.credits,
        });
    }

    debug!(
        student_id = %profile.student_id,
        courses = records.len(),
        warnings = warnings.len(),
        "history categorized"
    );
    (records, warnings)
}

/// Sub-category for a course that fell back to the fallback category.
fn title_sub_category(title: &str, hits: &mut usize, config: &EngineConfig) -> String {
    if let Some(rule) = &config.title_sub_category {
        let title = title.to_lowercase();
        let matches = rule
            .keywords
            .iter()
            .any(|keyword| title.contains(&keyword.to_lowercase()));
        if matches && *hits < rule.limit {
            *hits += 1;
            return rule.sub_category.clone();
        }
    }
    config.fallback_category.clone()
}
