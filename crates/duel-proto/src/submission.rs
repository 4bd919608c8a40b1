//! Submission-result wire shapes and the canonical adapter.
//!
//! The server produces three overlapping "result" payloads: the run-tests
//! HTTP reply, the submit HTTP reply, and the realtime `test_result` push.
//! They stay distinct types at the boundary; everything past this module
//! sees exactly one shape, [`SubmissionResult`], via a total adapter.

use serde::{Deserialize, Serialize};

/// The one canonical result shape consumed by view code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub is_correct: bool,
    pub passed: u32,
    pub total: u32,
    pub error: Option<String>,
    /// Human-readable per-test detail lines.
    pub details: Vec<String>,
}

impl SubmissionResult {
    /// An error outcome carries no test counts; `passed`/`total` stay zero
    /// rather than echoing misleading numbers from a failed run.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            is_correct: false,
            passed: 0,
            total: 0,
            error: Some(message.into()),
            details: Vec::new(),
        }
    }

    fn from_counts(
        is_correct: bool,
        passed: u32,
        total: u32,
        error: Option<String>,
        details: Vec<String>,
    ) -> Self {
        Self {
            is_correct,
            // A buggy payload must not report more passes than tests.
            passed: passed.min(total),
            total,
            error,
            details,
        }
    }
}

/// Per-test entry shared by the HTTP reply shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDetail {
    #[serde(default)]
    pub test_number: Option<u32>,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl TestCaseDetail {
    fn render(&self, index: usize) -> String {
        let number = self.test_number.unwrap_or(index as u32 + 1);
        let verdict = if self.passed { "passed" } else { "failed" };
        match &self.message {
            Some(message) => format!("Test {number}: {verdict} - {message}"),
            None => format!("Test {number}: {verdict}"),
        }
    }
}

/// HTTP reply to "run tests against the duel's problem".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuelTestResponse {
    pub success: bool,
    #[serde(default)]
    pub passed_tests: u32,
    #[serde(default)]
    pub total_tests: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub results: Vec<TestCaseDetail>,
}

/// HTTP reply to "submit solution".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub is_correct: bool,
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub test_results: Vec<TestCaseDetail>,
}

/// Realtime `test_result` push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultPush {
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default, alias = "passed_tests")]
    pub passed: u32,
    #[serde(default, alias = "total_tests")]
    pub total: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
}

impl From<DuelTestResponse> for SubmissionResult {
    fn from(response: DuelTestResponse) -> Self {
        if !response.success && response.total_tests == 0 {
            return SubmissionResult::from_error(
                response
                    .error
                    .unwrap_or_else(|| "test run failed".to_string()),
            );
        }
        let details = response
            .results
            .iter()
            .enumerate()
            .map(|(i, d)| d.render(i))
            .collect();
        SubmissionResult::from_counts(
            response.success,
            response.passed_tests,
            response.total_tests,
            response.error,
            details,
        )
    }
}

impl From<SubmissionResponse> for SubmissionResult {
    fn from(response: SubmissionResponse) -> Self {
        let details = response
            .test_results
            .iter()
            .enumerate()
            .map(|(i, d)| d.render(i))
            .collect();
        SubmissionResult::from_counts(
            response.is_correct,
            response.passed,
            response.total,
            response.message,
            details,
        )
    }
}

impl From<TestResultPush> for SubmissionResult {
    fn from(push: TestResultPush) -> Self {
        if push.error.is_some() && push.total == 0 {
            let mut result = SubmissionResult::from_error(push.error.unwrap_or_default());
            result.details = push.details;
            return result;
        }
        SubmissionResult::from_counts(
            push.is_correct,
            push.passed,
            push.total,
            push.error,
            push.details,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duel_test_response_adapts() {
        let response = DuelTestResponse {
            success: true,
            passed_tests: 3,
            total_tests: 3,
            error: None,
            results: vec![
                TestCaseDetail {
                    test_number: Some(1),
                    passed: true,
                    message: None,
                },
                TestCaseDetail {
                    test_number: None,
                    passed: true,
                    message: Some("ok".to_string()),
                },
            ],
        };
        let result = SubmissionResult::from(response);
        assert!(result.is_correct);
        assert_eq!(result.passed, 3);
        assert_eq!(result.total, 3);
        assert_eq!(result.details[0], "Test 1: passed");
        assert_eq!(result.details[1], "Test 2: passed - ok");
    }

    #[test]
    fn test_error_payloads_never_carry_misleading_counts() {
        let response = DuelTestResponse {
            success: false,
            passed_tests: 0,
            total_tests: 0,
            error: Some("compilation failed".to_string()),
            results: vec![],
        };
        let result = SubmissionResult::from(response);
        assert!(!result.is_correct);
        assert_eq!(result.passed, 0);
        assert_eq!(result.total, 0);
        assert_eq!(result.error.as_deref(), Some("compilation failed"));

        let push = TestResultPush {
            is_correct: false,
            passed: 0,
            total: 0,
            error: Some("runtime error".to_string()),
            details: vec![],
        };
        let result = SubmissionResult::from(push);
        assert_eq!((result.passed, result.total), (0, 0));
    }

    #[test]
    fn test_passed_clamped_to_total() {
        let push = TestResultPush {
            is_correct: false,
            passed: 9,
            total: 5,
            error: None,
            details: vec![],
        };
        let result = SubmissionResult::from(push);
        assert!(result.passed <= result.total);
        assert_eq!(result.passed, 5);
    }

    #[test]
    fn test_incorrect_but_counted_run_is_not_an_error() {
        let response = SubmissionResponse {
            is_correct: false,
            passed: 2,
            total: 5,
            message: None,
            test_results: vec![],
        };
        let result = SubmissionResult::from(response);
        assert!(!result.is_correct);
        assert_eq!(result.passed, 2);
        assert_eq!(result.total, 5);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_push_accepts_aliased_count_fields() {
        let push: TestResultPush = serde_json::from_str(
            r#"{"is_correct":true,"passed_tests":4,"total_tests":4}"#,
        )
        .unwrap();
        assert_eq!(push.passed, 4);
        assert_eq!(push.total, 4);
    }
}
