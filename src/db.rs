use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AuditError, Result};
use crate::models::{
    CategorizationRule, CohortRange, CourseAttempt, ElectivePlaceholder, GradeRequirement,
    RawCourseRecord, ReferenceData, RequirementDefinition, SemesterMapping, StudentProfile,
    StudentSnapshot, TranscriptImport, VerificationRecord, VerificationStatus,
};
use crate::store::{AuditStore, DecideFn};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    use anyhow::Context;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed store. Every multi-row write runs in one transaction.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replaces the institutional reference data with `reference`.
    pub async fn replace_reference(&self, reference: &ReferenceData) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "categorization_rules",
            "degree_requirements",
            "elective_placeholders",
            "grade_requirements",
            "course_aliases",
            "prerequisite_courses",
        ] {
            sqlx::query(&format!("DELETE FROM degree_audit.{table}"))
                .execute(&mut *tx)
                .await?;
        }

        for rule in &reference.rules {
            sqlx::query(
                r#"
                INSERT INTO degree_audit.categorization_rules
                (course_code, course_title, credits, category_name, major_group, is_required,
                 recommended_year, recommended_semester, applicable_from_cohort,
                 applicable_until_cohort, math_track, capstone_option)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(&rule.course_code)
            .bind(&rule.course_title)
            .bind(rule.credits)
            .bind(&rule.category_name)
            .bind(&rule.major_group)
            .bind(rule.is_required)
            .bind(rule.recommended_year)
            .bind(rule.recommended_semester)
            .bind(rule.cohorts.from)
            .bind(rule.cohorts.until)
            .bind(&rule.math_track)
            .bind(&rule.capstone_option)
            .execute(&mut *tx)
            .await?;
        }

        for requirement in &reference.requirements {
            sqlx::query(
                r#"
                INSERT INTO degree_audit.degree_requirements
                (major_code, category_name, sub_category, min_credits, min_courses,
                 applicable_from_cohort, applicable_until_cohort)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&requirement.major_code)
            .bind(&requirement.category_name)
            .bind(&requirement.sub_category)
            .bind(requirement.min_credits)
            .bind(requirement.min_courses)
            .bind(requirement.cohorts.from)
            .bind(requirement.cohorts.until)
            .execute(&mut *tx)
            .await?;
        }

        for placeholder in &reference.placeholders {
            sqlx::query(
                r#"
                INSERT INTO degree_audit.elective_placeholders
                (major_code, parent_category, category_name, sub_category, title_prefix,
                 slot_count, credits, applicable_from_cohort, applicable_until_cohort)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&placeholder.major_code)
            .bind(&placeholder.parent_category)
            .bind(&placeholder.category_name)
            .bind(&placeholder.sub_category)
            .bind(&placeholder.title_prefix)
            .bind(placeholder.count)
            .bind(placeholder.credits)
            .bind(placeholder.cohorts.from)
            .bind(placeholder.cohorts.until)
            .execute(&mut *tx)
            .await?;
        }

        for requirement in &reference.grade_requirements {
            sqlx::query(
                r#"
                INSERT INTO degree_audit.grade_requirements
                (major_code, course_code, minimum_grade, applicable_from_cohort,
                 applicable_until_cohort)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&requirement.major_code)
            .bind(&requirement.course_code)
            .bind(&requirement.minimum_grade)
            .bind(requirement.cohorts.from)
            .bind(requirement.cohorts.until)
            .execute(&mut *tx)
            .await?;
        }

        for (historical, current) in &reference.course_aliases {
            sqlx::query(
                "INSERT INTO degree_audit.course_aliases (historical_code, current_code) VALUES ($1, $2)",
            )
            .bind(historical)
            .bind(current)
            .execute(&mut *tx)
            .await?;
        }

        for code in &reference.prerequisite_courses {
            sqlx::query("INSERT INTO degree_audit.prerequisite_courses (course_code) VALUES ($1)")
                .bind(code)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            rules = reference.rules.len(),
            requirements = reference.requirements.len(),
            "reference data replaced"
        );
        Ok(())
    }
}

fn cohorts(row: &PgRow) -> Result<CohortRange> {
    Ok(CohortRange {
        from: row.try_get("applicable_from_cohort")?,
        until: row.try_get("applicable_until_cohort")?,
    })
}

fn verification_from_row(row: &PgRow) -> Result<VerificationRecord> {
    let status: String = row.try_get("status")?;
    let status = VerificationStatus::parse(&status)
        .ok_or_else(|| AuditError::MalformedInput(format!("unknown verification status {status}")))?;
    let original: Json<Vec<SemesterMapping>> = row.try_get("original_mappings")?;
    let updated: Option<Json<Vec<SemesterMapping>>> = row.try_get("updated_mappings")?;

    Ok(VerificationRecord {
        token: row.try_get("token")?,
        student_id: row.try_get("student_id")?,
        status,
        original_mappings: original.0,
        updated_mappings: updated.map(|json| json.0),
        created_at: row.try_get("created_at")?,
        verified_at: row.try_get("verified_at")?,
    })
}

async fn write_mappings(
    tx: &mut Transaction<'_, Postgres>,
    student_id: &str,
    mappings: &[SemesterMapping],
) -> Result<()> {
    sqlx::query("DELETE FROM degree_audit.semester_mappings WHERE student_id = $1")
        .bind(student_id)
        .execute(&mut **tx)
        .await?;

    for (position, mapping) in mappings.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO degree_audit.semester_mappings
            (student_id, source_label, academic_year_range, program_year, program_semester,
             is_summer, course_count, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(student_id)
        .bind(&mapping.source_label)
        .bind(&mapping.academic_year_range)
        .bind(mapping.program_year)
        .bind(mapping.program_semester)
        .bind(mapping.is_summer)
        .bind(mapping.course_count)
        .bind(position as i32)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn write_verification(
    tx: &mut Transaction<'_, Postgres>,
    record: &VerificationRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO degree_audit.verifications
        (token, student_id, status, original_mappings, updated_mappings, created_at, verified_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (token) DO UPDATE
        SET status = EXCLUDED.status,
            updated_mappings = EXCLUDED.updated_mappings,
            verified_at = EXCLUDED.verified_at
        "#,
    )
    .bind(&record.token)
    .bind(&record.student_id)
    .bind(record.status.as_str())
    .bind(Json(&record.original_mappings))
    .bind(record.updated_mappings.as_ref().map(Json))
    .bind(record.created_at)
    .bind(record.verified_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

const VERIFICATION_COLUMNS: &str = "token, student_id, status, original_mappings, \
     updated_mappings, created_at, verified_at";

#[async_trait]
impl AuditStore for PgStore {
    async fn load_reference(&self) -> Result<ReferenceData> {
        let mut reference = ReferenceData::default();

        for row in sqlx::query("SELECT * FROM degree_audit.categorization_rules ORDER BY id")
            .fetch_all(&self.pool)
            .await?
        {
            reference.rules.push(CategorizationRule {
                course_code: row.try_get("course_code")?,
                course_title: row.try_get("course_title")?,
                credits: row.try_get("credits")?,
                category_name: row.try_get("category_name")?,
                major_group: row.try_get("major_group")?,
                is_required: row.try_get("is_required")?,
                recommended_year: row.try_get("recommended_year")?,
                recommended_semester: row.try_get("recommended_semester")?,
                cohorts: cohorts(&row)?,
                math_track: row.try_get("math_track")?,
                capstone_option: row.try_get("capstone_option")?,
            });
        }

        for row in sqlx::query("SELECT * FROM degree_audit.degree_requirements ORDER BY id")
            .fetch_all(&self.pool)
            .await?
        {
            reference.requirements.push(RequirementDefinition {
                major_code: row.try_get("major_code")?,
                category_name: row.try_get("category_name")?,
                sub_category: row.try_get("sub_category")?,
                min_credits: row.try_get("min_credits")?,
                min_courses: row.try_get("min_courses")?,
                cohorts: cohorts(&row)?,
            });
        }

        for row in sqlx::query("SELECT * FROM degree_audit.elective_placeholders ORDER BY id")
            .fetch_all(&self.pool)
            .await?
        {
            reference.placeholders.push(ElectivePlaceholder {
                major_code: row.try_get("major_code")?,
                parent_category: row.try_get("parent_category")?,
                category_name: row.try_get("category_name")?,
                sub_category: row.try_get("sub_category")?,
                title_prefix: row.try_get("title_prefix")?,
                count: row.try_get("slot_count")?,
                credits: row.try_get("credits")?,
                cohorts: cohorts(&row)?,
            });
        }

        for row in sqlx::query("SELECT * FROM degree_audit.grade_requirements ORDER BY id")
            .fetch_all(&self.pool)
            .await?
        {
            reference.grade_requirements.push(GradeRequirement {
                major_code: row.try_get("major_code")?,
                course_code: row.try_get("course_code")?,
                minimum_grade: row.try_get("minimum_grade")?,
                cohorts: cohorts(&row)?,
            });
        }

        for row in sqlx::query(
            "SELECT historical_code, current_code FROM degree_audit.course_aliases \
             ORDER BY historical_code",
        )
        .fetch_all(&self.pool)
        .await?
        {
            reference
                .course_aliases
                .push((row.try_get("historical_code")?, row.try_get("current_code")?));
        }

        for row in sqlx::query(
            "SELECT course_code FROM degree_audit.prerequisite_courses ORDER BY course_code",
        )
        .fetch_all(&self.pool)
        .await?
        {
            reference.prerequisite_courses.push(row.try_get("course_code")?);
        }

        debug!(rules = reference.rules.len(), "reference data loaded");
        Ok(reference)
    }

    async fn load_snapshot(&self, student_id: &str) -> Result<StudentSnapshot> {
        let row = sqlx::query(
            r#"
            SELECT student_id, full_name, major_code, cohort_year, math_track, capstone_option
            FROM degree_audit.students
            WHERE student_id = $1
            "#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuditError::StudentNotFound(student_id.to_string()))?;

        let profile = StudentProfile {
            student_id: row.try_get("student_id")?,
            full_name: row.try_get("full_name")?,
            major_code: row.try_get("major_code")?,
            cohort_year: row.try_get("cohort_year")?,
            math_track: row.try_get("math_track")?,
            capstone_option: row.try_get("capstone_option")?,
        };

        let mut mappings = Vec::new();
        for row in sqlx::query(
            r#"
            SELECT source_label, academic_year_range, program_year, program_semester,
                   is_summer, course_count
            FROM degree_audit.semester_mappings
            WHERE student_id = $1
            ORDER BY position
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?
        {
            mappings.push(SemesterMapping {
                source_label: row.try_get("source_label")?,
                academic_year_range: row.try_get("academic_year_range")?,
                program_year: row.try_get("program_year")?,
                program_semester: row.try_get("program_semester")?,
                is_summer: row.try_get("is_summer")?,
                course_count: row.try_get("course_count")?,
            });
        }

        let mut attempts = Vec::new();
        for row in sqlx::query(
            r#"
            SELECT source_label, code, title, credits, grade
            FROM degree_audit.course_attempts
            WHERE student_id = $1
            ORDER BY position
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?
        {
            attempts.push(CourseAttempt {
                source_label: row.try_get("source_label")?,
                course: RawCourseRecord {
                    code: row.try_get("code")?,
                    title: row.try_get("title")?,
                    credits: row.try_get("credits")?,
                    grade: row.try_get("grade")?,
                },
            });
        }

        Ok(StudentSnapshot {
            profile,
            mappings,
            attempts,
        })
    }

    async fn save_import(&self, import: &TranscriptImport) -> Result<()> {
        let profile = &import.profile;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO degree_audit.students
            (student_id, full_name, major_code, cohort_year, math_track, capstone_option)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                major_code = EXCLUDED.major_code,
                cohort_year = EXCLUDED.cohort_year,
                math_track = EXCLUDED.math_track,
                capstone_option = EXCLUDED.capstone_option,
                updated_at = now()
            "#,
        )
        .bind(&profile.student_id)
        .bind(&profile.full_name)
        .bind(&profile.major_code)
        .bind(profile.cohort_year)
        .bind(&profile.math_track)
        .bind(&profile.capstone_option)
        .execute(&mut *tx)
        .await?;

        write_mappings(&mut tx, &profile.student_id, &import.mappings).await?;

        sqlx::query("DELETE FROM degree_audit.course_attempts WHERE student_id = $1")
            .bind(&profile.student_id)
            .execute(&mut *tx)
            .await?;
        for (position, attempt) in import.attempts.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO degree_audit.course_attempts
                (id, student_id, position, source_label, code, title, credits, grade)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&profile.student_id)
            .bind(position as i32)
            .bind(&attempt.source_label)
            .bind(&attempt.course.code)
            .bind(&attempt.course.title)
            .bind(attempt.course.credits)
            .bind(&attempt.course.grade)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE degree_audit.verifications
            SET status = 'rejected', verified_at = now()
            WHERE student_id = $1 AND status = 'pending'
            "#,
        )
        .bind(&profile.student_id)
        .execute(&mut *tx)
        .await?;

        if let Some(record) = &import.verification {
            write_verification(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn verification(&self, token: &str) -> Result<Option<VerificationRecord>> {
        let query = format!("SELECT {VERIFICATION_COLUMNS} FROM degree_audit.verifications WHERE token = $1");
        sqlx::query(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| verification_from_row(&row))
            .transpose()
    }

    async fn pending_verification(&self, student_id: &str) -> Result<Option<VerificationRecord>> {
        let query = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM degree_audit.verifications \
             WHERE student_id = $1 AND status = 'pending' \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query(&query)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| verification_from_row(&row))
            .transpose()
    }

    async fn commit_verification(
        &self,
        token: &str,
        decide: &DecideFn<'_>,
    ) -> Result<VerificationRecord> {
        let mut tx = self.pool.begin().await?;

        // The row lock serializes concurrent commits on the same token.
        let query = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM degree_audit.verifications \
             WHERE token = $1 FOR UPDATE"
        );
        let current = match sqlx::query(&query)
            .bind(token)
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => verification_from_row(&row)?,
            None => return Err(AuditError::StaleVerification),
        };

        // Dropping `tx` on an error path rolls back.
        let commit = decide(&current)?;
        if let Some(mappings) = &commit.mappings {
            write_mappings(&mut tx, &current.student_id, mappings).await?;
        }
        write_verification(&mut tx, &commit.record).await?;

        tx.commit().await?;
        Ok(commit.record)
    }
}

fn rule(
    code: &str,
    title: &str,
    category: &str,
    group: &str,
    recommended: Option<(i32, i32)>,
) -> CategorizationRule {
    CategorizationRule {
        course_code: code.to_string(),
        course_title: title.to_string(),
        credits: Decimal::ONE,
        category_name: category.to_string(),
        major_group: Some(group.to_string()),
        is_required: recommended.is_some(),
        recommended_year: recommended.map(|(year, _)| year),
        recommended_semester: recommended.map(|(_, semester)| semester),
        cohorts: CohortRange {
            from: Some(2021),
            until: None,
        },
        math_track: None,
        capstone_option: None,
    }
}

fn pinned(mut rule: CategorizationRule, math_track: Option<&str>, capstone: Option<&str>) -> CategorizationRule {
    rule.math_track = math_track.map(str::to_string);
    rule.capstone_option = capstone.map(str::to_string);
    rule
}

fn requirement(major: &str, category: &str, sub: Option<&str>, courses: i32) -> RequirementDefinition {
    RequirementDefinition {
        major_code: major.to_string(),
        category_name: category.to_string(),
        sub_category: sub.map(str::to_string),
        min_credits: Decimal::from(courses),
        min_courses: courses,
        cohorts: CohortRange {
            from: Some(2021),
            until: None,
        },
    }
}

fn placeholder(
    major: &str,
    parent: &str,
    category: &str,
    sub: Option<&str>,
    prefix: &str,
    count: i32,
) -> ElectivePlaceholder {
    ElectivePlaceholder {
        major_code: major.to_string(),
        parent_category: parent.to_string(),
        category_name: category.to_string(),
        sub_category: sub.map(str::to_string),
        title_prefix: prefix.to_string(),
        count,
        credits: Decimal::ONE,
        cohorts: CohortRange {
            from: Some(2021),
            until: None,
        },
    }
}

/// Reference data for the CS, BA and CE programmes, cohorts 2021 onward.
pub fn seed_reference() -> ReferenceData {
    use crate::config::{CORE_PARENT, FALLBACK_CATEGORY, MAJOR_PARENT};
    use crate::tracks::{APPLIED_PROJECT, CALCULUS, PRE_CALCULUS};

    let rules = vec![
        rule("ENGL112", "Written and Oral Communication", "Humanities & Social Sciences", "ALL", Some((1, 1))),
        rule("AS111", "Leadership Seminar I", "Humanities & Social Sciences", "ALL", Some((1, 1))),
        rule("SOAN111", "Social Theory", "Humanities & Social Sciences", "ALL", Some((1, 2))),
        rule("BUSA161", "Foundations of Design and Entrepreneurship I", "Business", "ALL", Some((1, 2))),
        rule("ECON101", "Microeconomics", "Business", "NON-ENG", None),
        rule("CS111", "Introduction to Computing", "Computing", "ALL", Some((1, 1))),
        pinned(
            rule("MATH141", "Calculus I", "Mathematics & Quantitative", "ALL", Some((1, 1))),
            Some(CALCULUS),
            None,
        ),
        pinned(
            rule("MATH121", "Pre-Calculus I", "Mathematics & Quantitative", "ALL", Some((1, 1))),
            Some(PRE_CALCULUS),
            None,
        ),
        rule("MATH142", "Calculus II", "Mathematics & Quantitative", "NON-ENG", None),
        rule("SC113", "Physics I", "Science", "ALL", Some((2, 1))),
        rule("CS212", "Computer Programming for CS", "Required Major Classes", "CS", Some((1, 2))),
        rule("CS222", "Data Structures and Algorithms", "Required Major Classes", "CS", Some((2, 1))),
        rule("MATH221", "Calculus III", "Required Major Classes", "CS", Some((2, 1))),
        rule("CS313", "Intermediate Computer Programming", "Required Major Classes", "CS", Some((2, 2))),
        rule("CS415", "Software Engineering", "Required Major Classes", "CS", Some((3, 2))),
        rule("CS433", "Machine Learning", "Major Electives", "CS", None),
        pinned(
            rule("CS491", "Undergraduate Thesis I", "Capstone", "CS", Some((4, 1))),
            None,
            Some("Undergraduate CS Thesis"),
        ),
        pinned(
            rule("BUSA410", "Applied Project", "Capstone", "ALL", Some((4, 2))),
            None,
            Some(APPLIED_PROJECT),
        ),
        rule("BUSA210", "Financial Accounting", "Required Major Classes", "BA", Some((2, 1))),
        rule("BUSA220", "Principles of Marketing", "Required Major Classes", "BA", Some((2, 2))),
        rule("ENGR112", "Introduction to Engineering", "Required Major Classes", "ENG", Some((1, 2))),
        rule("ENGR213", "Circuits and Electronics", "Required Major Classes", "ENG", Some((2, 2))),
        pinned(
            rule("ENGR401", "Engineering Senior Project", "Capstone", "ENG", Some((4, 1))),
            None,
            Some("Engineering Senior Project"),
        ),
    ];

    let mut requirements = Vec::new();
    let mut placeholders = Vec::new();
    for major in ["CS", "BA", "CE"] {
        requirements.extend([
            requirement(major, "Humanities & Social Sciences", None, 3),
            requirement(major, "Business", None, 1),
            requirement(major, "Mathematics & Quantitative", None, 1),
            requirement(major, "Computing", None, 1),
            requirement(major, "Science", None, 1),
            requirement(major, FALLBACK_CATEGORY, Some(FALLBACK_CATEGORY), 2),
            requirement(major, FALLBACK_CATEGORY, Some("Africana"), 1),
            requirement(major, "Required Major Classes", None, if major == "BA" { 2 } else { 5 }),
            requirement(major, "Major Electives", None, 3),
            requirement(major, "Capstone", None, 1),
        ]);
        placeholders.extend([
            placeholder(major, CORE_PARENT, FALLBACK_CATEGORY, Some(FALLBACK_CATEGORY), "Non-Major Elective", 2),
            placeholder(major, CORE_PARENT, FALLBACK_CATEGORY, Some("Africana"), "Africana Elective", 1),
            placeholder(major, MAJOR_PARENT, "Major Electives", None, "Major Elective", 3),
        ]);
    }

    ReferenceData {
        rules,
        requirements,
        placeholders,
        grade_requirements: vec![GradeRequirement {
            major_code: "CS".to_string(),
            course_code: "CS212".to_string(),
            minimum_grade: "C".to_string(),
            cohorts: CohortRange {
                from: Some(2021),
                until: None,
            },
        }],
        prerequisite_courses: vec!["CS111".to_string(), "CS212".to_string(), "MATH141".to_string()],
        course_aliases: vec![
            ("CS112".to_string(), "CS212".to_string()),
            ("ENGL111".to_string(), "ENGL112".to_string()),
        ],
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    PgStore::new(pool.clone())
        .replace_reference(&seed_reference())
        .await?;
    Ok(())
}
