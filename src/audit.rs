use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::aggregator;
use crate::categorizer;
use crate::config::EngineConfig;
use crate::error::{AuditError, InputWarning, Result};
use crate::models::{
    CategorizedCourse, CourseStatistics, ProgressReport, RemainingRequirementEntry,
    SemesterMapping, SemesterSummary, StudentProfile, StudentSnapshot, TranscriptImport,
    VerificationRecord,
};
use crate::resolver;
use crate::sequencer;
use crate::store::AuditStore;
use crate::tracks;
use crate::transcript::Transcript;
use crate::verification::{self, CommitResult};

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub student_id: String,
    pub full_name: String,
    pub major_code: String,
    pub cohort_year: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub student_id: String,
    pub mappings: Vec<SemesterMapping>,
    pub needs_verification: bool,
    pub verification_token: Option<String>,
    pub math_track: String,
    pub capstone_option: String,
    pub statistics: CourseStatistics,
    pub semesters: Vec<SemesterSummary>,
    pub warnings: Vec<InputWarning>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditOptions {
    /// Count planned (ungraded) latest attempts as if completed.
    pub include_planned: bool,
    /// Run even while the student's mappings await verification.
    pub allow_unverified: bool,
}

/// Everything the markdown report needs for one student.
#[derive(Debug, Clone, Serialize)]
pub struct StudentAudit {
    pub profile: StudentProfile,
    pub mappings: Vec<SemesterMapping>,
    pub semesters: Vec<SemesterSummary>,
    pub courses: Vec<CategorizedCourse>,
    pub statistics: CourseStatistics,
    pub progress: ProgressReport,
    pub remaining: Vec<RemainingRequirementEntry>,
    pub warnings: Vec<InputWarning>,
}

/// Store-backed entry point: sequencing on import, then categorize,
/// aggregate and resolve on demand.
pub struct AuditEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S: AuditStore> AuditEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self, transcript), fields(student_id = %request.student_id))]
    pub async fn import_transcript(
        &self,
        request: ImportRequest,
        transcript: &Transcript,
    ) -> Result<ImportOutcome> {
        if transcript.semesters.is_empty() {
            return Err(AuditError::MalformedInput(format!(
                "transcript for {} has no courses",
                request.student_id
            )));
        }

        let outcome = sequencer::sequence(&transcript.semesters, &self.config);
        let courses = transcript.courses();
        let math_track = tracks::detect_math_track(&courses);
        let capstone_option =
            tracks::detect_capstone_option(&courses, &request.major_code, &self.config);

        let profile = StudentProfile {
            student_id: request.student_id,
            full_name: request.full_name,
            major_code: request.major_code,
            cohort_year: request.cohort_year,
            math_track: Some(math_track.to_string()),
            capstone_option: Some(capstone_option.to_string()),
        };
        let verification = outcome
            .needs_verification
            .then(|| verification::new_record(&profile.student_id, &outcome.mappings, Utc::now()));
        let verification_token = verification.as_ref().map(|record| record.token.clone());
        let snapshot = StudentSnapshot {
            profile,
            mappings: outcome.mappings,
            attempts: transcript.attempts(),
        };

        self.store
            .save_import(&TranscriptImport {
                profile: snapshot.profile.clone(),
                mappings: snapshot.mappings.clone(),
                attempts: snapshot.attempts.clone(),
                verification,
            })
            .await?;

        // provisional until the mappings are verified
        let reference = self.store.load_reference().await?;
        let (courses, categorize_warnings) =
            categorizer::categorize_history(&snapshot, &reference, &self.config);
        let statistics = aggregator::course_statistics(&courses);
        let semesters = aggregator::semester_summaries(&snapshot.mappings, &courses, &self.config);

        let mut warnings = transcript.warnings.clone();
        warnings.extend(outcome.warnings);
        warnings.extend(categorize_warnings);
        info!(
            event = "transcript.imported",
            semesters = snapshot.mappings.len(),
            needs_verification = outcome.needs_verification,
            credits_taken = %statistics.credits_taken,
            warnings = warnings.len(),
        );

        Ok(ImportOutcome {
            student_id: snapshot.profile.student_id,
            mappings: snapshot.mappings,
            needs_verification: outcome.needs_verification,
            verification_token,
            math_track: math_track.to_string(),
            capstone_option: capstone_option.to_string(),
            statistics,
            semesters,
            warnings,
        })
    }

    async fn verified_snapshot(
        &self,
        student_id: &str,
        options: AuditOptions,
    ) -> Result<StudentSnapshot> {
        if !options.allow_unverified && self.store.pending_verification(student_id).await?.is_some() {
            return Err(AuditError::UnverifiedMappings {
                student_id: student_id.to_string(),
            });
        }
        self.store.load_snapshot(student_id).await
    }

    #[instrument(skip(self))]
    pub async fn audit(&self, student_id: &str, options: AuditOptions) -> Result<StudentAudit> {
        let snapshot = self.verified_snapshot(student_id, options).await?;
        let reference = self.store.load_reference().await?;

        let (courses, warnings) = categorizer::categorize_history(&snapshot, &reference, &self.config);
        let progress = aggregator::compute_progress(
            &snapshot.profile,
            &courses,
            &reference.requirements,
            options.include_planned,
            &self.config,
        );
        let semesters = aggregator::semester_summaries(&snapshot.mappings, &courses, &self.config);
        let statistics = aggregator::course_statistics(&courses);
        let remaining = resolver::compute_remaining(
            &snapshot.profile,
            &courses,
            &progress.categories,
            &reference,
            &self.config,
        );

        Ok(StudentAudit {
            profile: snapshot.profile,
            mappings: snapshot.mappings,
            semesters,
            courses,
            statistics,
            progress,
            remaining,
            warnings,
        })
    }

    pub async fn compute_progress(
        &self,
        student_id: &str,
        options: AuditOptions,
    ) -> Result<ProgressReport> {
        Ok(self.audit(student_id, options).await?.progress)
    }

    pub async fn compute_remaining(
        &self,
        student_id: &str,
        options: AuditOptions,
    ) -> Result<Vec<RemainingRequirementEntry>> {
        Ok(self.audit(student_id, options).await?.remaining)
    }

    /// The verification behind `token`, for a reviewer to inspect or edit.
    pub async fn verification(&self, token: &str) -> Result<VerificationRecord> {
        self.store
            .verification(token)
            .await?
            .ok_or(AuditError::StaleVerification)
    }

    pub async fn submit_verification(
        &self,
        token: &str,
        edits: Option<&[SemesterMapping]>,
    ) -> Result<CommitResult> {
        verification::submit_verification(&self.store, token, edits).await
    }

    pub async fn reject_verification(&self, token: &str) -> Result<CommitResult> {
        verification::reject_verification(&self.store, token).await
    }
}
