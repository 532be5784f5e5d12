use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const FALLBACK_CATEGORY: &str = "Non-Major Electives";
pub const MAJOR_PARENT: &str = "MAJOR";
pub const CORE_PARENT: &str = "LIBERAL ARTS & SCIENCES CORE";
pub const UNIVERSAL_GROUP: &str = "ALL";
pub const ENGINEERING_GROUP: &str = "ENG";
pub const NON_ENGINEERING_GROUP: &str = "NON-ENG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradePoint {
    pub grade: String,
    pub numeric_value: Decimal,
    pub is_passing: bool,
}

/// Heuristic category for a course-code prefix.
///
/// `engineering_category` overrides `category` for students whose major is in
/// the engineering group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixRule {
    pub prefixes: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub engineering_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleSubCategoryRule {
    pub sub_category: String,
    pub keywords: Vec<String>,
    pub limit: usize,
}

/// Institutional policy the engine runs under.
///
/// Loaded from a JSON file when one is given; any field left out keeps its
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Academic years whose "Semester 3" is a regular term, not summer.
    pub summer_exception_years: Vec<String>,
    pub engineering_majors: Vec<String>,
    pub major_categories: Vec<String>,
    pub core_categories: Vec<String>,
    pub prefix_rules: Vec<PrefixRule>,
    pub fallback_category: String,
    pub grade_scale: Vec<GradePoint>,
    pub pass_grade: String,
    pub default_minimum_grade: String,
    pub elevated_minimum_grade: String,
    pub elevated_categories: Vec<String>,
    pub voluntary_retake_grades: Vec<String>,
    pub retake_attempt_limit: u32,
    pub title_sub_category: Option<TitleSubCategoryRule>,
    pub on_track_threshold: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            summer_exception_years: vec!["2023-2024".to_string()],
            engineering_majors: strings(&["CE", "EE", "ME"]),
            major_categories: strings(&["Required Major Classes", "Major Electives", "Capstone"]),
            core_categories: strings(&[
                "Humanities & Social Sciences",
                "Business",
                "Mathematics & Quantitative",
                "Computing",
                "Science",
                "Research / Project Prep.",
                "Non-Major Electives",
            ]),
            prefix_rules: default_prefix_rules(),
            fallback_category: FALLBACK_CATEGORY.to_string(),
            grade_scale: default_grade_scale(),
            pass_grade: "P".to_string(),
            default_minimum_grade: "D".to_string(),
            elevated_minimum_grade: "D+".to_string(),
            elevated_categories: strings(&["Required Major Classes"]),
            voluntary_retake_grades: strings(&["D+", "D"]),
            retake_attempt_limit: 3,
            title_sub_category: Some(TitleSubCategoryRule {
                sub_category: "Africana".to_string(),
                keywords: strings(&["africa", "ghana", "politics"]),
                limit: 1,
            }),
            on_track_threshold: dec!(0.8),
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse policy file {}", path.display()))?;
        Ok(config)
    }

    pub fn is_engineering(&self, major_code: &str) -> bool {
        self.engineering_majors
            .iter()
            .any(|major| major.eq_ignore_ascii_case(major_code))
    }

    /// "ENG" or "NON-ENG" for the given major.
    pub fn major_group(&self, major_code: &str) -> &'static str {
        if self.is_engineering(major_code) {
            ENGINEERING_GROUP
        } else {
            NON_ENGINEERING_GROUP
        }
    }

    pub fn is_summer_exception(&self, academic_year: &str) -> bool {
        self.summer_exception_years
            .iter()
            .any(|year| year == academic_year)
    }

    pub fn parent_category(&self, category_name: &str) -> &'static str {
        if self.major_categories.iter().any(|c| c == category_name) {
            MAJOR_PARENT
        } else {
            CORE_PARENT
        }
    }

    pub fn grade_point(&self, grade: &str) -> Option<&GradePoint> {
        let grade = grade.trim();
        self.grade_scale
            .iter()
            .find(|point| point.grade.eq_ignore_ascii_case(grade))
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn default_prefix_rules() -> Vec<PrefixRule> {
    let rule = |prefixes: &[&str], category: &str, engineering: Option<&str>| PrefixRule {
        prefixes: strings(prefixes),
        category: category.to_string(),
        engineering_category: engineering.map(str::to_string),
    };

    vec![
        rule(&["CS"], "Computing", Some("Required Major Classes")),
        rule(&["IS", "CSIS", "AI", "MS", "SYS"], "Computing", None),
        rule(&["MATH"], "Mathematics & Quantitative", None),
        rule(&["BUSA", "ECON"], "Business", None),
        rule(
            &["ENGR", "CE", "EE", "ME"],
            FALLBACK_CATEGORY,
            Some("Required Major Classes"),
        ),
        rule(&["CHEM", "SC"], "Science", None),
        rule(
            &["AS", "ENGL", "FRENC", "POLS", "SOAN"],
            "Humanities & Social Sciences",
            None,
        ),
    ]
}

fn default_grade_scale() -> Vec<GradePoint> {
    let point = |grade: &str, numeric_value: Decimal, is_passing: bool| GradePoint {
        grade: grade.to_string(),
        numeric_value,
        is_passing,
    };

    vec![
        point("A+", dec!(4.0), true),
        point("A", dec!(4.0), true),
        point("B+", dec!(3.5), true),
        point("B", dec!(3.0), true),
        point("C+", dec!(2.5), true),
        point("C", dec!(2.0), true),
        point("D+", dec!(1.5), true),
        point("D", dec!(1.0), true),
        point("E", dec!(0.0), false),
        point("I", dec!(0.0), false),
    ]
}

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
