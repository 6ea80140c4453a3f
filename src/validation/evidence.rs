//! Evidence verification against repository ground truth.
//!
//! An agent's citation is verified when the cited file exists in the snapshot
//! and, if a line is given, the line falls inside the file. Every item is
//! checked; one bad citation never hides the result of another.

use serde::{Deserialize, Serialize};

use crate::agents::Evidence;
use crate::context::RepoData;

/// Reason recorded when the cited file is not in the snapshot.
pub const FILE_NOT_FOUND: &str = "File not found in repository";

/// Reason recorded when the cited line is past the end of the file.
pub const LINE_OUT_OF_RANGE: &str = "Line number exceeds file length";

/// Reason recorded when the cited line is zero or negative.
pub const LINE_NOT_POSITIVE: &str = "Line number must be positive";

/// Evidence with verification results filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceReport {
    pub items: Vec<Evidence>,
    pub verified_count: usize,
    pub total_count: usize,
}

impl EvidenceReport {
    /// Fraction of items verified; 0 when there are none.
    pub fn verification_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.verified_count as f64 / self.total_count as f64
        }
    }
}

/// Verify every evidence item against `repo`.
pub fn validate(evidence: &[Evidence], repo: &RepoData) -> EvidenceReport {
    let items: Vec<Evidence> = evidence
        .iter()
        .map(|item| {
            let mut checked = item.clone();
            match check(item, repo) {
                Ok(()) => {
                    checked.verified = true;
                    checked.error = None;
                }
                Err(reason) => {
                    checked.verified = false;
                    checked.error = Some(reason.to_string());
                }
            }
            checked
        })
        .collect();

    let verified_count = items.iter().filter(|e| e.verified).count();
    EvidenceReport {
        total_count: items.len(),
        verified_count,
        items,
    }
}

fn check(item: &Evidence, repo: &RepoData) -> Result<(), &'static str> {
    let path = normalize_path(&item.file);
    if !repo.contains_file(path) {
        return Err(FILE_NOT_FOUND);
    }

    let Some(line) = item.line else {
        return Ok(());
    };
    if line < 1 {
        return Err(LINE_NOT_POSITIVE);
    }
    let line_count = repo.line_count(path).unwrap_or(0);
    if line as u64 > line_count as u64 {
        return Err(LINE_OUT_OF_RANGE);
    }
    Ok(())
}

/// Strip a leading `./` or `/` so model citations match snapshot paths.
fn normalize_path(path: &str) -> &str {
    let path = path.trim();
    path.strip_prefix("./")
        .or_else(|| path.strip_prefix('/'))
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Severity;

    fn repo() -> RepoData {
        RepoData::new("https://example.com/app")
            .with_file("src/main.rs", 50)
            .with_file("README.md", 3)
    }

    #[test]
    fn test_existing_file_and_line_verified() {
        let report = validate(
            &[Evidence::new("panic", "src/main.rs", Some(50), Severity::High)],
            &repo(),
        );
        assert!(report.items[0].verified);
        assert!(report.items[0].error.is_none());
        assert_eq!(report.verified_count, 1);
    }

    #[test]
    fn test_file_without_line_verified() {
        let report = validate(
            &[Evidence::new("docs", "README.md", None, Severity::Low)],
            &repo(),
        );
        assert!(report.items[0].verified);
    }

    #[test]
    fn test_every_item_checked() {
        let evidence = vec![
            Evidence::new("ghost", "src/ghost.rs", Some(1), Severity::Medium),
            Evidence::new("too far", "src/main.rs", Some(51), Severity::Medium),
            Evidence::new("zero", "src/main.rs", Some(0), Severity::Low),
            Evidence::new("ok", "./src/main.rs", Some(1), Severity::Critical),
        ];
        let report = validate(&evidence, &repo());

        assert_eq!(report.total_count, 4);
        assert_eq!(report.verified_count, 1);
        assert_eq!(report.items[0].error.as_deref(), Some(FILE_NOT_FOUND));
        assert_eq!(report.items[1].error.as_deref(), Some(LINE_OUT_OF_RANGE));
        assert_eq!(report.items[2].error.as_deref(), Some(LINE_NOT_POSITIVE));
        assert!(report.items[3].verified);
        assert_eq!(report.verification_rate(), 0.25);
    }

    #[test]
    fn test_previous_verdict_is_recomputed() {
        let mut claimed = Evidence::new("lie", "nope.rs", None, Severity::Low);
        claimed.verified = true;
        let report = validate(&[claimed], &repo());
        assert!(!report.items[0].verified);
    }

    #[test]
    fn test_empty_evidence() {
        let report = validate(&[], &repo());
        assert_eq!(report.total_count, 0);
        assert_eq!(report.verification_rate(), 0.0);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/a.rs"), "src/a.rs");
        assert_eq!(normalize_path("/src/a.rs"), "src/a.rs");
        assert_eq!(normalize_path("src/a.rs"), "src/a.rs");
    }
}
