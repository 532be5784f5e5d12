use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{Datelike, Utc};
use regex::Regex;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::InputWarning;
use crate::models::{RawSemesterRecord, SemesterMapping};

const SUMMER_ORDINAL: u32 = 3;

#[derive(Debug, Clone)]
pub struct SequenceOutcome {
    pub mappings: Vec<SemesterMapping>,
    pub needs_verification: bool,
    pub warnings: Vec<InputWarning>,
}

/// Chronology signals pulled out of one free-text semester label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLabel {
    pub academic_year: String,
    pub start_year: i32,
    pub end_year: i32,
    pub ordinal: u32,
    pub year_found: bool,
    pub ordinal_found: bool,
}

fn year_range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{4})[-/](\d{4})").expect("valid year range pattern"))
}

fn year_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{4}").expect("valid year token pattern"))
}

fn ordinal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)semester\s+(\d+)").expect("valid ordinal pattern"))
}

pub fn parse_label(label: &str, current_year: i32) -> ParsedLabel {
    let years = year_range_pattern()
        .captures(label)
        .and_then(|caps| Some((caps[1].parse().ok()?, caps[2].parse().ok()?)))
        .or_else(|| {
            let tokens: Vec<i32> = year_token_pattern()
                .find_iter(label)
                .filter_map(|m| m.as_str().parse().ok())
                .take(2)
                .collect();
            match tokens.as_slice() {
                [start, end] => Some((*start, *end)),
                _ => None,
            }
        });

    let ordinal = ordinal_pattern()
        .captures(label)
        .and_then(|caps| caps[1].parse::<u32>().ok());

    let (start_year, end_year) = years.unwrap_or((current_year - 1, current_year));

    ParsedLabel {
        academic_year: format!("{start_year}-{end_year}"),
        start_year,
        end_year,
        ordinal: ordinal.unwrap_or(1),
        year_found: years.is_some(),
        ordinal_found: ordinal.is_some(),
    }
}

/// Ordinal 3 is summer, except in the configured exception years.
pub fn classify_summer(parsed: &ParsedLabel, config: &EngineConfig) -> bool {
    parsed.ordinal == SUMMER_ORDINAL && !is_documented_summer_exception(parsed, config)
}

/// The institutional exception: "Semester 3" of a listed academic year
/// ran as a regular term.
pub fn is_documented_summer_exception(parsed: &ParsedLabel, config: &EngineConfig) -> bool {
    parsed.ordinal == SUMMER_ORDINAL && config.is_summer_exception(&parsed.academic_year)
}

pub fn sequence(records: &[RawSemesterRecord], config: &EngineConfig) -> SequenceOutcome {
    sequence_at(records, config, Utc::now().year())
}

/// Sequences records against a fixed "current year" used for label fallbacks.
pub fn sequence_at(
    records: &[RawSemesterRecord],
    config: &EngineConfig,
    current_year: i32,
) -> SequenceOutcome {
    let mut parsed: Vec<(ParsedLabel, &RawSemesterRecord)> = records
        .iter()
        .map(|record| (parse_label(&record.label, current_year), record))
        .collect();

    parsed.sort_by(|(a, ra), (b, rb)| {
        (a.start_year, a.end_year, a.ordinal)
            .cmp(&(b.start_year, b.end_year, b.ordinal))
            .then_with(|| ra.label.cmp(&rb.label))
            .then_with(|| course_codes(ra).cmp(&course_codes(rb)))
    });

    let mut warnings = Vec::new();
    let mut seen_terms = HashSet::new();
    let mut mappings = Vec::with_capacity(parsed.len());
    let mut year = 1;
    let mut semester = 1;

    for (label, record) in parsed {
        if !label.year_found {
            warnings.push(InputWarning::MissingAcademicYear {
                label: record.label.clone(),
                fallback: label.academic_year.clone(),
            });
        }
        if !label.ordinal_found {
            warnings.push(InputWarning::MissingSemesterOrdinal {
                label: record.label.clone(),
            });
        }
        if is_documented_summer_exception(&label, config) {
            warnings.push(InputWarning::SummerException {
                label: record.label.clone(),
                academic_year: label.academic_year.clone(),
            });
        }
        if !seen_terms.insert((label.start_year, label.end_year, label.ordinal)) {
            warnings.push(InputWarning::DuplicateTerm {
                label: record.label.clone(),
            });
        }

        let is_summer = classify_summer(&label, config);
        let mapping = SemesterMapping {
            source_label: record.label.clone(),
            academic_year_range: label.academic_year.clone(),
            program_year: year,
            program_semester: if is_summer { 0 } else { semester },
            is_summer,
            course_count: record.courses.len() as i32,
        };
        debug!(
            label = %mapping.source_label,
            program_year = mapping.program_year,
            program_semester = mapping.program_semester,
            is_summer,
            "semester mapped"
        );
        mappings.push(mapping);

        if !is_summer {
            semester += 1;
            if semester > 2 {
                year += 1;
                semester = 1;
            }
        }
    }

    let needs_verification = !warnings.is_empty();
    info!(
        event = "sequence.completed",
        semesters = mappings.len(),
        warnings = warnings.len(),
        needs_verification,
    );

    SequenceOutcome {
        mappings,
        needs_verification,
        warnings,
    }
}

fn course_codes(record: &RawSemesterRecord) -> Vec<&str> {
    record.courses.iter().map(|c| c.code.as_str()).collect()
}
