use std::io::Read;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{AuditError, InputWarning, Result};
use crate::models::{CourseAttempt, RawCourseRecord, RawSemesterRecord};

#[derive(Debug, Deserialize)]
struct TranscriptRow {
    semester: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    credits: String,
    #[serde(default)]
    grade: String,
}

/// Parsed transcript plus the rows that needed a fallback.
#[derive(Debug, Default)]
pub struct Transcript {
    pub semesters: Vec<RawSemesterRecord>,
    pub warnings: Vec<InputWarning>,
}

impl Transcript {
    /// One attempt per course, in arrival order.
    pub fn attempts(&self) -> Vec<CourseAttempt> {
        self.semesters
            .iter()
            .flat_map(|semester| {
                semester.courses.iter().map(|course| CourseAttempt {
                    source_label: semester.label.clone(),
                    course: course.clone(),
                })
            })
            .collect()
    }

    pub fn courses(&self) -> Vec<RawCourseRecord> {
        self.semesters
            .iter()
            .flat_map(|semester| semester.courses.iter().cloned())
            .collect()
    }
}

pub fn read_transcript(path: &Path) -> Result<Transcript> {
    let file = std::fs::File::open(path).map_err(|err| {
        AuditError::MalformedInput(format!("cannot open {}: {err}", path.display()))
    })?;
    parse_transcript(file)
}

/// Reads `semester,code,title,credits,grade` rows. Semesters keep the order
/// in which their label first appears.
pub fn parse_transcript<R: Read>(reader: R) -> Result<Transcript> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut transcript = Transcript::default();
    for result in csv_reader.deserialize::<TranscriptRow>() {
        let row = result.map_err(|err| AuditError::MalformedInput(err.to_string()))?;

        if row.code.is_empty() {
            transcript.warnings.push(InputWarning::MissingCourseCode {
                semester: row.semester,
                title: row.title,
            });
            continue;
        }

        let credits = match row.credits.parse::<Decimal>() {
            Ok(value) if !value.is_sign_negative() => value,
            _ => {
                transcript.warnings.push(InputWarning::InvalidCredits {
                    code: row.code.clone(),
                    value: row.credits.clone(),
                });
                Decimal::ZERO
            }
        };

        let course = RawCourseRecord {
            code: row.code,
            title: row.title,
            credits,
            grade: row.grade,
        };
        match transcript
            .semesters
            .iter_mut()
            .find(|semester| semester.label == row.semester)
        {
            Some(semester) => semester.courses.push(course),
            None => transcript.semesters.push(RawSemesterRecord {
                label: row.semester,
                courses: vec![course],
            }),
        }
    }

    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_rows_by_first_appearance() {
        let data = "\
semester,code,title,credits,grade
Semester 2 2021-2022,CS212,Programming II,1,B
Semester 1 2021-2022,CS111,Intro to Computing,1,A
Semester 2 2021-2022,MATH142,Calculus II,1,C+
";
        let transcript = parse_transcript(data.as_bytes()).unwrap();
        let labels: Vec<_> = transcript.semesters.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Semester 2 2021-2022", "Semester 1 2021-2022"]);
        assert_eq!(transcript.semesters[0].courses.len(), 2);
        assert_eq!(transcript.attempts().len(), 3);
        assert!(transcript.warnings.is_empty());
        assert_eq!(transcript.semesters[0].courses[1].credits, Decimal::new(1, 0));
    }

    #[test]
    fn fractional_credits_are_kept_exactly() {
        let data = "\
semester,code,title,credits,grade
Semester 1 2021-2022,MATH141,Calculus I,0.7,A
Semester 1 2021-2022,MATH142,Calculus II,-1,A
";
        let transcript = parse_transcript(data.as_bytes()).unwrap();
        let courses = transcript.courses();
        assert_eq!(courses[0].credits, Decimal::new(7, 1));
        assert_eq!(courses[1].credits, Decimal::ZERO);
        assert_eq!(transcript.warnings.len(), 1);
    }

    #[test]
    fn bad_rows_become_warnings() {
        let data = "\
semester,code,title,credits,grade
Semester 1 2021-2022,,Orientation,0,P
Semester 1 2021-2022,ENGL112,Written Communication,one,B
Semester 1 2021-2022,AS111,Leadership I,1,
";
        let transcript = parse_transcript(data.as_bytes()).unwrap();
        let courses = transcript.courses();
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].credits, Decimal::ZERO);
        assert_eq!(courses[1].grade, "");
        assert_eq!(transcript.warnings.len(), 2);
        assert!(matches!(
            transcript.warnings[0],
            InputWarning::MissingCourseCode { .. }
        ));
    }
}
