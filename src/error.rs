use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors surfaced by the audit engine.
///
/// Unparseable input never appears here as a failure: sequencing and
/// categorisation recover locally and report [`InputWarning`]s instead.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("verification token is stale or unknown")]
    StaleVerification,

    #[error("verification {token} is already finalized")]
    AlreadyFinalized { token: String },

    #[error("student {student_id} has semester mappings awaiting verification")]
    UnverifiedMappings { student_id: String },

    #[error("student not found: {0}")]
    StudentNotFound(String),

    #[error("invalid semester mapping for {label}: {reason}")]
    InvalidMapping { label: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Recoverable input problems recorded while the pipeline keeps going.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputWarning {
    MissingAcademicYear { label: String, fallback: String },
    MissingSemesterOrdinal { label: String },
    SummerException { label: String, academic_year: String },
    DuplicateTerm { label: String },
    MissingCourseCode { semester: String, title: String },
    InvalidCredits { code: String, value: String },
    UnmappedSemester { label: String, code: String },
    UnknownGrade { code: String, grade: String },
}

impl std::fmt::Display for InputWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputWarning::MissingAcademicYear { label, fallback } => {
                write!(f, "no academic year in \"{label}\", assumed {fallback}")
            }
            InputWarning::MissingSemesterOrdinal { label } => {
                write!(f, "no semester number in \"{label}\", assumed 1")
            }
            InputWarning::SummerException {
                label,
                academic_year,
            } => write!(
                f,
                "\"{label}\" treated as a regular term ({academic_year} exception)"
            ),
            InputWarning::DuplicateTerm { label } => {
                write!(f, "\"{label}\" repeats an earlier year and semester")
            }
            InputWarning::MissingCourseCode { semester, title } => {
                write!(f, "course \"{title}\" in {semester} has no code and was skipped")
            }
            InputWarning::InvalidCredits { code, value } => {
                write!(f, "{code} has unreadable credits \"{value}\", counted as 0")
            }
            InputWarning::UnmappedSemester { label, code } => {
                write!(f, "{code} belongs to unmapped semester \"{label}\" and was skipped")
            }
            InputWarning::UnknownGrade { code, grade } => {
                write!(f, "{code} has unrecognised grade \"{grade}\", counted as not passed")
            }
        }
    }
}
