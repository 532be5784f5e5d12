use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AuditError, Result};
use crate::models::{SemesterMapping, VerificationRecord, VerificationStatus};
use crate::store::{AuditStore, VerificationCommit};

/// Outcome of a verification submission as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitResult {
    Success,
    StaleVerification,
    AlreadyFinalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationAction {
    Approve,
    Edit,
    Reject,
}

/// 64 lowercase hex characters.
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn new_record(
    student_id: &str,
    mappings: &[SemesterMapping],
    now: DateTime<Utc>,
) -> VerificationRecord {
    VerificationRecord {
        token: generate_token(),
        student_id: student_id.to_string(),
        status: VerificationStatus::Pending,
        original_mappings: mappings.to_vec(),
        updated_mappings: None,
        created_at: now,
        verified_at: None,
    }
}

/// Validated status transition.
///
/// Only a pending record moves. A rejected record behaves like an unknown
/// token; an approved or modified one has already been committed.
pub fn transition(
    record: &VerificationRecord,
    action: VerificationAction,
) -> Result<VerificationStatus> {
    match (record.status, action) {
        (VerificationStatus::Pending, VerificationAction::Approve) => Ok(VerificationStatus::Approved),
        (VerificationStatus::Pending, VerificationAction::Edit) => Ok(VerificationStatus::Modified),
        (VerificationStatus::Pending, VerificationAction::Reject) => Ok(VerificationStatus::Rejected),
        (VerificationStatus::Rejected, _) => Err(AuditError::StaleVerification),
        (VerificationStatus::Approved | VerificationStatus::Modified, _) => {
            Err(AuditError::AlreadyFinalized {
                token: record.token.clone(),
            })
        }
    }
}

fn invalid(mapping: &SemesterMapping, reason: &str) -> AuditError {
    AuditError::InvalidMapping {
        label: mapping.source_label.clone(),
        reason: reason.to_string(),
    }
}

/// Checks every edited mapping; the first problem rejects the whole edit.
pub fn validate_edits(original: &[SemesterMapping], edits: &[SemesterMapping]) -> Result<()> {
    let known: HashSet<&str> = original.iter().map(|m| m.source_label.as_str()).collect();
    let mut edited = HashSet::new();

    for mapping in edits {
        if !known.contains(mapping.source_label.as_str()) {
            return Err(invalid(mapping, "unknown semester label"));
        }
        if !edited.insert(mapping.source_label.as_str()) {
            return Err(invalid(mapping, "edited more than once"));
        }
        if mapping.program_year < 1 {
            return Err(invalid(mapping, "program year must be at least 1"));
        }
        match (mapping.is_summer, mapping.program_semester) {
            (true, 0) | (false, 1) | (false, 2) => {}
            (true, _) => return Err(invalid(mapping, "summer terms use semester 0")),
            (false, _) => return Err(invalid(mapping, "regular terms use semester 1 or 2")),
        }
    }
    Ok(())
}

/// Reads reviewer edits from a JSON array of mappings.
pub fn parse_edits(raw: &str) -> Result<Vec<SemesterMapping>> {
    Ok(serde_json::from_str(raw)?)
}

/// Original mappings with edits laid over them, matched by source label.
pub fn apply_edits(original: &[SemesterMapping], edits: &[SemesterMapping]) -> Vec<SemesterMapping> {
    original
        .iter()
        .map(|mapping| {
            edits
                .iter()
                .find(|edit| edit.source_label == mapping.source_label)
                .map(|edit| SemesterMapping {
                    course_count: mapping.course_count,
                    ..edit.clone()
                })
                .unwrap_or_else(|| mapping.clone())
        })
        .collect()
}

/// Decides a submission against the locked record. Nothing is written when
/// this returns an error.
pub fn decide_submission(
    record: &VerificationRecord,
    edits: Option<&[SemesterMapping]>,
    now: DateTime<Utc>,
) -> Result<VerificationCommit> {
    let edits = edits.filter(|edits| !edits.is_empty());
    let action = if edits.is_some() {
        VerificationAction::Edit
    } else {
        VerificationAction::Approve
    };
    let status = transition(record, action)?;

    let mappings = match edits {
        Some(edits) => {
            validate_edits(&record.original_mappings, edits)?;
            apply_edits(&record.original_mappings, edits)
        }
        None => record.original_mappings.clone(),
    };

    Ok(VerificationCommit {
        record: VerificationRecord {
            status,
            updated_mappings: edits.map(|_| mappings.clone()),
            verified_at: Some(now),
            ..record.clone()
        },
        mappings: Some(mappings),
    })
}

pub fn decide_rejection(record: &VerificationRecord, now: DateTime<Utc>) -> Result<VerificationCommit> {
    let status = transition(record, VerificationAction::Reject)?;
    Ok(VerificationCommit {
        record: VerificationRecord {
            status,
            verified_at: Some(now),
            ..record.clone()
        },
        mappings: None,
    })
}

fn surface(token: &str, outcome: Result<VerificationRecord>) -> Result<CommitResult> {
    match outcome {
        Ok(record) => {
            info!(
                event = "verification.committed",
                student_id = %record.student_id,
                status = ?record.status,
            );
            Ok(CommitResult::Success)
        }
        Err(AuditError::StaleVerification) => {
            warn!(token, "stale verification token");
            Ok(CommitResult::StaleVerification)
        }
        Err(AuditError::AlreadyFinalized { .. }) => {
            warn!(token, "verification already finalized");
            Ok(CommitResult::AlreadyFinalized)
        }
        Err(err) => Err(err),
    }
}

/// Approves a pending verification, applying `edits` when given, in one
/// atomic store commit.
pub async fn submit_verification(
    store: &dyn AuditStore,
    token: &str,
    edits: Option<&[SemesterMapping]>,
) -> Result<CommitResult> {
    let now = Utc::now();
    let outcome = store
        .commit_verification(token, &|record: &VerificationRecord| decide_submission(record, edits, now))
        .await;
    surface(token, outcome)
}

pub async fn reject_verification(store: &dyn AuditStore, token: &str) -> Result<CommitResult> {
    let now = Utc::now();
    let outcome = store
        .commit_verification(token, &|record: &VerificationRecord| decide_rejection(record, now))
        .await;
    surface(token, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StudentProfile, TranscriptImport};
    use crate::store::MemoryStore;

    fn mapping(label: &str, year: i32, semester: i32, summer: bool) -> SemesterMapping {
        SemesterMapping {
            source_label: label.to_string(),
            academic_year_range: "2022-2023".to_string(),
            program_year: year,
            program_semester: semester,
            is_summer: summer,
            course_count: 2,
        }
    }

    fn mappings() -> Vec<SemesterMapping> {
        vec![
            mapping("Semester 1 2022-2023", 1, 1, false),
            mapping("Semester 3 2022-2023", 2, 0, true),
        ]
    }

    #[test]
    fn edits_parse_without_course_counts() {
        let raw = r#"[{"source_label": "Semester 3 2022-2023", "academic_year_range": "2022-2023",
            "program_year": 2, "program_semester": 1, "is_summer": false}]"#;
        let edits = parse_edits(raw).unwrap();
        assert_eq!(edits[0].course_count, 0);
        assert!(matches!(parse_edits("{"), Err(AuditError::Serialization(_))));
    }

    async fn seeded_store() -> (MemoryStore, String) {
        let store = MemoryStore::default();
        let record = new_record("S1", &mappings(), Utc::now());
        let token = record.token.clone();
        store
            .save_import(&TranscriptImport {
                profile: StudentProfile {
                    student_id: "S1".to_string(),
                    full_name: "Akosua Owusu".to_string(),
                    major_code: "BA".to_string(),
                    cohort_year: 2022,
                    math_track: None,
                    capstone_option: None,
                },
                mappings: mappings(),
                attempts: Vec::new(),
                verification: Some(record),
            })
            .await
            .unwrap();
        (store, token)
    }

    #[test]
    fn tokens_are_64_hex_characters() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn only_pending_records_transition() {
        let mut record = new_record("S1", &mappings(), Utc::now());
        assert_eq!(
            transition(&record, VerificationAction::Edit).unwrap(),
            VerificationStatus::Modified
        );

        record.status = VerificationStatus::Rejected;
        assert!(matches!(
            transition(&record, VerificationAction::Approve),
            Err(AuditError::StaleVerification)
        ));

        record.status = VerificationStatus::Modified;
        assert!(matches!(
            transition(&record, VerificationAction::Edit),
            Err(AuditError::AlreadyFinalized { .. })
        ));
    }

    #[test]
    fn edits_must_respect_summer_semantics() {
        let original = mappings();
        let bad = vec![mapping("Semester 3 2022-2023", 2, 1, true)];
        assert!(matches!(
            validate_edits(&original, &bad),
            Err(AuditError::InvalidMapping { .. })
        ));

        let unknown = vec![mapping("Semester 9 2030-2031", 1, 1, false)];
        assert!(validate_edits(&original, &unknown).is_err());

        let fine = vec![mapping("Semester 3 2022-2023", 1, 2, false)];
        assert!(validate_edits(&original, &fine).is_ok());
    }

    #[tokio::test]
    async fn approval_applies_mappings_once() {
        let (store, token) = seeded_store().await;

        let first = submit_verification(&store, &token, None).await.unwrap();
        assert_eq!(first, CommitResult::Success);
        let record = store.verification(&token).await.unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Approved);
        assert!(record.verified_at.is_some());

        let second = submit_verification(&store, &token, None).await.unwrap();
        assert_eq!(second, CommitResult::AlreadyFinalized);
    }

    #[tokio::test]
    async fn edited_submission_marks_modified_and_updates_student() {
        let (store, token) = seeded_store().await;
        let edits = vec![mapping("Semester 3 2022-2023", 1, 2, false)];

        let result = submit_verification(&store, &token, Some(&edits)).await.unwrap();
        assert_eq!(result, CommitResult::Success);

        let record = store.verification(&token).await.unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Modified);
        let snapshot = store.load_snapshot("S1").await.unwrap();
        let edited = snapshot
            .mappings
            .iter()
            .find(|m| m.source_label == "Semester 3 2022-2023")
            .unwrap();
        assert_eq!((edited.program_year, edited.program_semester, edited.is_summer), (1, 2, false));
    }

    #[tokio::test]
    async fn invalid_edit_leaves_everything_pending() {
        let (store, token) = seeded_store().await;
        let edits = vec![
            mapping("Semester 1 2022-2023", 1, 2, false),
            mapping("Semester 3 2022-2023", 0, 0, true),
        ];

        let result = submit_verification(&store, &token, Some(&edits)).await;
        assert!(matches!(result, Err(AuditError::InvalidMapping { .. })));

        let record = store.verification(&token).await.unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Pending);
        let snapshot = store.load_snapshot("S1").await.unwrap();
        assert_eq!(snapshot.mappings, mappings());
    }

    #[tokio::test]
    async fn rejected_and_unknown_tokens_are_stale() {
        let (store, token) = seeded_store().await;
        assert_eq!(
            reject_verification(&store, &token).await.unwrap(),
            CommitResult::Success
        );
        assert_eq!(
            submit_verification(&store, &token, None).await.unwrap(),
            CommitResult::StaleVerification
        );
        assert_eq!(
            submit_verification(&store, "feedface", None).await.unwrap(),
            CommitResult::StaleVerification
        );
    }

    #[tokio::test]
    async fn concurrent_submissions_apply_once() {
        let (store, token) = seeded_store().await;
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                submit_verification(store.as_ref(), &token, None).await.unwrap()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                CommitResult::Success => successes += 1,
                other => assert_eq!(other, CommitResult::AlreadyFinalized),
            }
        }
        assert_eq!(successes, 1);
    }
}
