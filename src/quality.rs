// ✅ Data Quality Engine - range checks on the unified schools
//
// Every school gets the same rule set. Failures become QualityIssues in the
// anomaly log; nothing is dropped or corrected.

use crate::anomaly::{QualityIssue, Severity};
use crate::record::{BoundingBox, SatScore, SchoolProfile, NYC_BOUNDS};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rule_name: String,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn pass(rule_name: &str, field: &str) -> Self {
        ValidationResult {
            passed: true,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: String::new(),
            severity: Severity::Info,
        }
    }

    pub fn fail(rule_name: &str, field: &str, message: &str, severity: Severity) -> Self {
        ValidationResult {
            passed: false,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            severity,
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub key: String,
    pub validations: Vec<ValidationResult>,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn passed_count(&self) -> usize {
        self.validations.iter().filter(|v| v.passed).count()
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Warning)
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct QualityEngine {
    sat_range: RangeInclusive<f64>,
    percent_range: RangeInclusive<f64>,
    safety_range: RangeInclusive<f64>,
    bounds: BoundingBox,
    /// Allowed gap between the stored SAT total and the sum of sections
    total_tolerance: f64,
}

impl QualityEngine {
    pub fn new() -> Self {
        QualityEngine {
            sat_range: SatScore::MIN as f64..=SatScore::MAX as f64,
            percent_range: 0.0..=100.0,
            safety_range: 0.0..=10.0,
            bounds: NYC_BOUNDS,
            total_tolerance: 0.5,
        }
    }

    pub fn validate(&self, profile: &SchoolProfile) -> QualityReport {
        let mut validations = Vec::new();

        // Rule 1: SAT sections in range
        for (field, value) in [
            ("sat_reading", profile.sat_reading),
            ("sat_math", profile.sat_math),
            ("sat_writing", profile.sat_writing),
        ] {
            if let Some(v) = value {
                validations.push(self.validate_range(
                    "sat_section_range",
                    field,
                    v,
                    &self.sat_range,
                ));
            }
        }

        // Rule 2: SAT total matches its parts (sections out of range already failed rule 1)
        if let (Some(scores), Some(total)) = (profile.sat_scores(), profile.sat_total) {
            validations.push(self.validate_sat_total(f64::from(scores.total()), total));
        }

        // Rule 3: percentages
        for (label, value) in &profile.demographics {
            if let Some(v) = value {
                validations.push(self.validate_range(
                    "percentage_range",
                    label,
                    *v,
                    &self.percent_range,
                ));
            }
        }
        if let Some(rate) = profile.graduation_rate {
            validations.push(self.validate_range(
                "percentage_range",
                "graduation_rate",
                rate,
                &self.percent_range,
            ));
        }

        // Rule 4: safety scores
        for (label, value) in &profile.safety {
            if let Some(v) = value {
                validations.push(self.validate_range(
                    "safety_range",
                    &format!("safety_{}", label),
                    *v,
                    &self.safety_range,
                ));
            }
        }

        // Rule 5: inside the city
        if let Some(point) = profile.coordinates {
            if self.bounds.contains(point) {
                validations.push(ValidationResult::pass("within_bounds", "coordinates"));
            } else {
                validations.push(ValidationResult::fail(
                    "within_bounds",
                    "coordinates",
                    &format!(
                        "({:.6}, {:.6}) is outside the NYC bounding box",
                        point.latitude, point.longitude
                    ),
                    Severity::Info,
                ));
            }
        }

        // Rule 6: enough data to be useful
        if profile.name.is_none() && !profile.has_sat_data() {
            validations.push(ValidationResult::fail(
                "sparse_record",
                "record",
                "No school name and no SAT data",
                Severity::Info,
            ));
        }

        let issues = validations
            .iter()
            .filter(|v| !v.passed)
            .map(|v| QualityIssue {
                key: profile.key.clone(),
                severity: v.severity,
                field: v.field.clone(),
                issue: v.message.clone(),
            })
            .collect();

        QualityReport {
            key: profile.key.to_string(),
            validations,
            issues,
        }
    }

    pub fn validate_batch(&self, profiles: &[SchoolProfile]) -> Vec<QualityReport> {
        profiles.iter().map(|p| self.validate(p)).collect()
    }

    pub fn batch_summary(&self, reports: &[QualityReport]) -> BatchSummary {
        let issues = reports.iter().flat_map(|r| &r.issues);
        let (warnings, infos) = issues.fold((0, 0), |(w, i), issue| match issue.severity {
            Severity::Warning => (w + 1, i),
            Severity::Info => (w, i + 1),
        });

        BatchSummary {
            records_checked: reports.len(),
            records_with_issues: reports.iter().filter(|r| !r.issues.is_empty()).count(),
            warning_count: warnings,
            info_count: infos,
        }
    }

    // ========================================================================
    // VALIDATION RULES
    // ========================================================================

    fn validate_range(
        &self,
        rule_name: &str,
        field: &str,
        value: f64,
        range: &RangeInclusive<f64>,
    ) -> ValidationResult {
        if range.contains(&value) {
            return ValidationResult::pass(rule_name, field);
        }
        ValidationResult::fail(
            rule_name,
            field,
            &format!(
                "{} is outside {}..={}",
                value,
                range.start(),
                range.end()
            ),
            Severity::Warning,
        )
    }

    fn validate_sat_total(&self, expected: f64, total: f64) -> ValidationResult {
        if (expected - total).abs() <= self.total_tolerance {
            return ValidationResult::pass("sat_total_sum", "sat_total");
        }
        ValidationResult::fail(
            "sat_total_sum",
            "sat_total",
            &format!("total {} but sections sum to {}", total, expected),
            Severity::Warning,
        )
    }
}

impl Default for QualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub records_checked: usize,
    pub records_with_issues: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

impl BatchSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} schools checked: {} with issues | {} warnings, {} info",
            self.records_checked, self.records_with_issues, self.warning_count, self.info_count
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::SchoolKey;
    use crate::record::Coordinates;
    use std::collections::BTreeMap;

    fn create_valid_profile() -> SchoolProfile {
        let mut demographics = BTreeMap::new();
        demographics.insert("hispanic".to_string(), Some(53.8));
        demographics.insert("white".to_string(), None);
        let mut safety = BTreeMap::new();
        safety.insert("students".to_string(), Some(6.1));

        SchoolProfile {
            key: SchoolKey::new("01M292"),
            name: Some("HENRY STREET SCHOOL FOR INTERNATIONAL STUDIES".to_string()),
            borough: Some("Manhattan".to_string()),
            district: Some("01".to_string()),
            sat_reading: Some(355.0),
            sat_math: Some(404.0),
            sat_writing: Some(363.0),
            sat_total: Some(1122.0),
            demographics,
            safety,
            graduation_rate: Some(78.9),
            coordinates: Some(Coordinates {
                latitude: 40.713764,
                longitude: -73.985260,
            }),
        }
    }

    #[test]
    fn test_validate_clean_profile() {
        let engine = QualityEngine::new();
        let report = engine.validate(&create_valid_profile());

        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(report.passed_count(), report.validations.len());
    }

    #[test]
    fn test_sat_section_out_of_range() {
        let engine = QualityEngine::new();
        let mut profile = create_valid_profile();
        profile.sat_math = Some(850.0);

        let report = engine.validate(&profile);
        let fields: Vec<&str> = report.issues.iter().map(|i| i.field.as_str()).collect();

        // no typed sections, so the total isn't checked a second time
        assert_eq!(fields, vec!["sat_math"]);
        assert!(report.has_warnings());
    }

    #[test]
    fn test_sat_total_must_match_sections() {
        let engine = QualityEngine::new();
        let mut profile = create_valid_profile();
        profile.sat_total = Some(1200.0);

        let report = engine.validate(&profile);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].field, "sat_total");
        assert!(report.issues[0].issue.contains("sum to 1122"));
    }

    #[test]
    fn test_percent_and_safety_ranges() {
        let engine = QualityEngine::new();
        let mut profile = create_valid_profile();
        profile.demographics.insert("hispanic".to_string(), Some(104.0));
        profile.safety.insert("students".to_string(), Some(11.0));

        let report = engine.validate(&profile);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|i| i.severity == Severity::Warning));
    }

    #[test]
    fn test_outside_nyc_is_info() {
        let engine = QualityEngine::new();
        let mut profile = create_valid_profile();
        profile.coordinates = Some(Coordinates {
            latitude: 42.65,
            longitude: -73.75,
        });

        let report = engine.validate(&profile);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Severity::Info);
        assert!(!report.has_warnings());
    }

    #[test]
    fn test_sparse_record_and_summary() {
        let engine = QualityEngine::new();
        let sparse = SchoolProfile {
            key: SchoolKey::new("75X012"),
            name: None,
            borough: None,
            district: Some("75".to_string()),
            sat_reading: None,
            sat_math: None,
            sat_writing: None,
            sat_total: None,
            demographics: BTreeMap::new(),
            safety: BTreeMap::new(),
            graduation_rate: None,
            coordinates: None,
        };

        let reports = engine.validate_batch(&[create_valid_profile(), sparse]);
        let summary = engine.batch_summary(&reports);

        assert_eq!(summary.records_checked, 2);
        assert_eq!(summary.records_with_issues, 1);
        assert_eq!(summary.warning_count, 0);
        assert_eq!(summary.info_count, 1);
        assert!(summary.summary().contains("2 schools checked"));
    }
}
