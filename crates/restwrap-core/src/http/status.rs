//! Status classification for the retry loop
//!
//! Maps a status code onto success, retry or terminal, given the retry budget
//! of the call in progress.

use crate::http::retry::RetryBudget;

/// Status codes treated as a successful exchange.
///
/// 204 is deliberately absent: an empty-bodied reply is not a success here.
pub const SUCCESS_STATUS_CODES: [u16; 7] = [200, 201, 202, 203, 205, 206, 207];

/// Outcome of classifying a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The exchange succeeded; parse and return the body
    Success,
    /// The status has a retry policy with budget left
    RetryCandidate,
    /// No further attempt will be made
    Terminal,
}

/// Check whether a status code counts as a success
pub fn is_success(code: u16) -> bool {
    SUCCESS_STATUS_CODES.contains(&code)
}

/// Classify a status against the remaining retry budget.
///
/// `None` means no status could be read at all (a bare transport failure),
/// which is always terminal.
pub fn classify(code: Option<u16>, budget: &RetryBudget) -> Classification {
    match code {
        Some(code) if is_success(code) => Classification::Success,
        Some(code) if budget.can_retry(code) => Classification::RetryCandidate,
        _ => Classification::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::retry::RetryTable;

    #[test]
    fn test_success_codes() {
        for code in SUCCESS_STATUS_CODES {
            assert!(is_success(code), "{code} should be a success");
        }
        assert!(!is_success(204));
        assert!(!is_success(301));
        assert!(!is_success(404));
    }

    #[test]
    fn test_classification_with_budget() {
        let table = RetryTable::default();
        let mut budget = table.budget();

        assert_eq!(classify(Some(200), &budget), Classification::Success);
        assert_eq!(classify(Some(401), &budget), Classification::RetryCandidate);
        assert_eq!(classify(Some(500), &budget), Classification::Terminal);
        assert_eq!(classify(None, &budget), Classification::Terminal);

        budget.record(401);
        assert_eq!(classify(Some(401), &budget), Classification::Terminal);
        assert_eq!(classify(Some(429), &budget), Classification::RetryCandidate);
    }
}
