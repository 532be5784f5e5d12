//! Persistence seam for the audit engine.
//!
//! `PgStore` in `db` is the production backend; `MemoryStore` satisfies the
//! same contract in memory for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AuditError, Result};
use crate::models::{
    ReferenceData, SemesterMapping, StudentSnapshot, TranscriptImport, VerificationRecord,
    VerificationStatus,
};

/// What a verification decision writes: the updated record and, when the
/// student's mappings change, the full replacement set.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationCommit {
    pub record: VerificationRecord,
    pub mappings: Option<Vec<SemesterMapping>>,
}

/// Decision run against the locked verification record.
pub type DecideFn<'a> = dyn Fn(&VerificationRecord) -> Result<VerificationCommit> + Send + Sync + 'a;

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn load_reference(&self) -> Result<ReferenceData>;

    /// Profile, mappings and raw attempts. `StudentNotFound` when absent.
    async fn load_snapshot(&self, student_id: &str) -> Result<StudentSnapshot>;

    /// Replaces the student's profile, mappings and attempts, and records the
    /// verification if one is attached, all or nothing. Verifications still
    /// pending from an earlier import are rejected, so their tokens go stale.
    async fn save_import(&self, import: &TranscriptImport) -> Result<()>;

    async fn verification(&self, token: &str) -> Result<Option<VerificationRecord>>;

    async fn pending_verification(&self, student_id: &str) -> Result<Option<VerificationRecord>>;

    /// Locks the record for `token`, runs `decide` on it and writes the result
    /// in one atomic step. Unknown tokens fail with `StaleVerification`; an
    /// error from `decide` leaves the store untouched.
    async fn commit_verification(
        &self,
        token: &str,
        decide: &DecideFn<'_>,
    ) -> Result<VerificationRecord>;
}

#[derive(Debug, Default)]
struct MemoryState {
    reference: ReferenceData,
    snapshots: HashMap<String, StudentSnapshot>,
    verifications: HashMap<String, VerificationRecord>,
}

/// In-memory store; a single mutex makes every operation atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn with_reference(reference: ReferenceData) -> Self {
        let store = Self::default();
        store.lock().reference = reference;
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn load_reference(&self) -> Result<ReferenceData> {
        Ok(self.lock().reference.clone())
    }

    async fn load_snapshot(&self, student_id: &str) -> Result<StudentSnapshot> {
        self.lock()
            .snapshots
            .get(student_id)
            .cloned()
            .ok_or_else(|| AuditError::StudentNotFound(student_id.to_string()))
    }

    async fn save_import(&self, import: &TranscriptImport) -> Result<()> {
        let mut state = self.lock();
        let student_id = import.profile.student_id.clone();
        state.snapshots.insert(
            student_id,
            StudentSnapshot {
                profile: import.profile.clone(),
                mappings: import.mappings.clone(),
                attempts: import.attempts.clone(),
            },
        );
        let superseded_at = Utc::now();
        for record in state.verifications.values_mut().filter(|r| {
            r.student_id == import.profile.student_id && r.status == VerificationStatus::Pending
        }) {
            record.status = VerificationStatus::Rejected;
            record.verified_at = Some(superseded_at);
        }
        if let Some(record) = &import.verification {
            state.verifications.insert(record.token.clone(), record.clone());
        }
        Ok(())
    }

    async fn verification(&self, token: &str) -> Result<Option<VerificationRecord>> {
        Ok(self.lock().verifications.get(token).cloned())
    }

    async fn pending_verification(&self, student_id: &str) -> Result<Option<VerificationRecord>> {
        let state = self.lock();
        let mut pending: Vec<&VerificationRecord> = state
            .verifications
            .values()
            .filter(|r| r.student_id == student_id && r.status == VerificationStatus::Pending)
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending.last().map(|r| (*r).clone()))
    }

    async fn commit_verification(
        &self,
        token: &str,
        decide: &DecideFn<'_>,
    ) -> Result<VerificationRecord> {
        let mut state = self.lock();
        let current = state
            .verifications
            .get(token)
            .cloned()
            .ok_or(AuditError::StaleVerification)?;
        let commit = decide(&current)?;

        if let Some(mappings) = commit.mappings {
            let snapshot = state
                .snapshots
                .get_mut(&current.student_id)
                .ok_or_else(|| AuditError::StudentNotFound(current.student_id.clone()))?;
            snapshot.mappings = mappings;
        }
        state
            .verifications
            .insert(token.to_string(), commit.record.clone());
        Ok(commit.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentProfile;
    use chrono::Duration;

    fn profile() -> StudentProfile {
        StudentProfile {
            student_id: "S7".to_string(),
            full_name: "Nana Adjei".to_string(),
            major_code: "MIS".to_string(),
            cohort_year: 2023,
            math_track: None,
            capstone_option: None,
        }
    }

    fn record(token: &str, status: VerificationStatus, age_days: i64) -> VerificationRecord {
        VerificationRecord {
            token: token.to_string(),
            student_id: "S7".to_string(),
            status,
            original_mappings: Vec::new(),
            updated_mappings: None,
            created_at: Utc::now() - Duration::days(age_days),
            verified_at: None,
        }
    }

    #[tokio::test]
    async fn unknown_student_is_reported() {
        let store = MemoryStore::default();
        let err = store.load_snapshot("missing").await.unwrap_err();
        assert!(matches!(err, AuditError::StudentNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn reimport_supersedes_pending_verification() {
        let store = MemoryStore::default();
        for (token, status, age) in [
            ("old", VerificationStatus::Pending, 3),
            ("done", VerificationStatus::Approved, 0),
            ("new", VerificationStatus::Pending, 1),
        ] {
            store
                .save_import(&TranscriptImport {
                    profile: profile(),
                    mappings: Vec::new(),
                    attempts: Vec::new(),
                    verification: Some(record(token, status, age)),
                })
                .await
                .unwrap();
        }

        let pending = store.pending_verification("S7").await.unwrap().unwrap();
        assert_eq!(pending.token, "new");
        let old = store.verification("old").await.unwrap().unwrap();
        assert_eq!(old.status, VerificationStatus::Rejected);
        let done = store.verification("done").await.unwrap().unwrap();
        assert_eq!(done.status, VerificationStatus::Approved);
        assert!(store.pending_verification("S8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_decision_writes_nothing() {
        let store = MemoryStore::default();
        store
            .save_import(&TranscriptImport {
                profile: profile(),
                mappings: Vec::new(),
                attempts: Vec::new(),
                verification: Some(record("tok", VerificationStatus::Pending, 0)),
            })
            .await
            .unwrap();

        let result = store
            .commit_verification("tok", &|_: &VerificationRecord| {
                Err(AuditError::MalformedInput("nope".to_string()))
            })
            .await;
        assert!(result.is_err());
        let stored = store.verification("tok").await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::Pending);
    }
}
