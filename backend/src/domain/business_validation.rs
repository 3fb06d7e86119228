//! Plausibility checks that the store holds real customer data.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::health::RecordCounts;
use crate::domain::ports::{RequestStore, RequestStoreError};

/// Company names that only ever appear in test data.
pub const DEFAULT_TEST_COMPANIES: [&str; 6] = [
    "test company",
    "test corp",
    "prestwood fabric green",
    "demo company",
    "sample company",
    "fake company",
];

/// Substrings that make a company name suspicious.
pub const SUSPICIOUS_PATTERNS: [&str; 6] = ["test", "demo", "sample", "fake", "lorem", "placeholder"];

/// Below this many records the volume is flagged.
pub const LOW_VOLUME_THRESHOLD: u64 = 3;

/// Verdict of a business data validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessDataStatus {
    /// No critical findings.
    Clean,
    /// Test or placeholder data was found.
    Contaminated,
}

/// Findings of a business data validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessValidation {
    /// Overall verdict.
    pub status: BusinessDataStatus,
    /// Critical findings.
    pub issues: Vec<String>,
    /// Suspicious but non-critical findings.
    pub warnings: Vec<String>,
    /// Distinct company names seen.
    pub total_companies: usize,
    /// How many reference companies are present.
    pub reference_companies_found: usize,
    /// Active plus archived requests.
    pub total_records: u64,
}

/// Company lists driving the validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessRules {
    /// Names that only ever appear in test data.
    pub known_test_companies: Vec<String>,
    /// Real customers expected in production data.
    pub reference_companies: Vec<String>,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            known_test_companies: DEFAULT_TEST_COMPANIES
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
            reference_companies: Vec::new(),
        }
    }
}

impl BusinessRules {
    /// Judge the distinct active company names and the record volume.
    ///
    /// `total_records` covers both tables, so an archive run that empties
    /// the active table is not mistaken for data loss.
    #[must_use]
    pub fn evaluate<'a>(
        &self,
        companies: impl IntoIterator<Item = &'a str>,
        total_records: u64,
    ) -> BusinessValidation {
        let companies: BTreeSet<String> = companies
            .into_iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        for test_company in &self.known_test_companies {
            if companies.contains(&test_company.to_lowercase()) {
                issues.push(format!("test company found in active data: '{test_company}'"));
            }
        }
        for company in &companies {
            for pattern in SUSPICIOUS_PATTERNS {
                if company.contains(pattern) {
                    warnings.push(format!(
                        "suspicious company name: '{company}' (contains '{pattern}')"
                    ));
                }
            }
        }

        let reference_companies_found = self
            .reference_companies
            .iter()
            .map(|reference| reference.to_lowercase())
            .filter(|reference| companies.iter().any(|company| company.contains(reference)))
            .count();
        if !self.reference_companies.is_empty()
            && reference_companies_found == 0
            && !companies.is_empty()
        {
            warnings.push(
                "no known reference companies found; data may be from a different period"
                    .to_owned(),
            );
        }

        if total_records == 0 {
            issues.push("no records found; the database may be empty".to_owned());
        } else if total_records < LOW_VOLUME_THRESHOLD {
            warnings.push(format!(
                "very low record count ({total_records}); monitor for data loss"
            ));
        }

        BusinessValidation {
            status: if issues.is_empty() {
                BusinessDataStatus::Clean
            } else {
                BusinessDataStatus::Contaminated
            },
            issues,
            warnings,
            total_companies: companies.len(),
            reference_companies_found,
            total_records,
        }
    }
}

/// Reads the store and applies [`BusinessRules`].
#[derive(Clone)]
pub struct BusinessDataValidator {
    store: Arc<dyn RequestStore>,
    rules: BusinessRules,
}

impl BusinessDataValidator {
    /// Create a validator reading company names from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>, rules: BusinessRules) -> Self {
        Self { store, rules }
    }

    /// Validate the current contents of the store.
    pub async fn validate(&self) -> Result<BusinessValidation, RequestStoreError> {
        let mut tx = self.store.begin().await?;
        let read = async {
            let active = tx.list_active().await?;
            let counts = RecordCounts::read(tx.as_mut()).await?;
            Ok::<_, RequestStoreError>((active, counts))
        }
        .await;
        tx.rollback().await?;
        let (active, counts) = read?;

        Ok(self.rules.evaluate(
            active
                .iter()
                .filter_map(|request| request.details.company_name.as_deref()),
            counts.all_records(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn rules() -> BusinessRules {
        BusinessRules {
            reference_companies: vec!["Harbour Upholstery".to_owned()],
            ..BusinessRules::default()
        }
    }

    #[rstest]
    fn real_data_is_clean(rules: BusinessRules) {
        let result = rules.evaluate(["Harbour Upholstery Ltd", "Weaver & Co"], 40);
        assert_eq!(result.status, BusinessDataStatus::Clean);
        assert!(result.issues.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.reference_companies_found, 1);
        assert_eq!(result.total_companies, 2);
    }

    #[rstest]
    fn known_test_company_is_critical(rules: BusinessRules) {
        let result = rules.evaluate(["Test Company", "Harbour Upholstery"], 12);
        assert_eq!(result.status, BusinessDataStatus::Contaminated);
        assert_eq!(
            result.issues,
            vec!["test company found in active data: 'test company'".to_owned()]
        );
        assert!(result.warnings.iter().any(|w| w.contains("contains 'test'")));
    }

    #[rstest]
    #[case("Demo Drapes", "demo")]
    #[case("Lorem Linens", "lorem")]
    #[case("Placeholder Ltd", "placeholder")]
    fn suspicious_names_only_warn(rules: BusinessRules, #[case] name: &str, #[case] pattern: &str) {
        let result = rules.evaluate([name, "Harbour Upholstery"], 10);
        assert_eq!(result.status, BusinessDataStatus::Clean);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains(&format!("contains '{pattern}'"))));
    }

    #[rstest]
    #[case(0, BusinessDataStatus::Contaminated, 0)]
    #[case(2, BusinessDataStatus::Clean, 1)]
    #[case(3, BusinessDataStatus::Clean, 0)]
    fn volume_thresholds(
        #[case] total: u64,
        #[case] status: BusinessDataStatus,
        #[case] warnings: usize,
    ) {
        let result = BusinessRules::default().evaluate(std::iter::empty(), total);
        assert_eq!(result.status, status);
        assert_eq!(result.warnings.len(), warnings);
    }

    #[rstest]
    fn missing_reference_companies_warn(rules: BusinessRules) {
        let result = rules.evaluate(["Weaver & Co"], 10);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.starts_with("no known reference companies")));
    }
}
