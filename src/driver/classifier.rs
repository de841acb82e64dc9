//! # Rule-Based Error Classification
//!
//! Control-plane APIs report failures as an error code plus a free-form message.
//! Whether a failure is transient usually depends on both: the same
//! `ResourceNotFoundException` is fatal in general, but retryable when its message
//! shows the referenced identity was created moments ago and has not propagated.
//!
//! [`RuleClassifier`] evaluates an ordered list of [`ClassificationRule`]s and falls
//! back to a default class when none match. Drivers embed one to implement
//! [`ResourceDriver::classify_error`](super::ResourceDriver::classify_error).

use serde::{Deserialize, Serialize};

use super::{ErrorClass, RemoteError};

/// Error codes that mean "slow down or try again" on most control planes
pub const TRANSIENT_CODES: [&str; 6] = [
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalError",
    "RequestTimeout",
];

/// Codes returned when a request was rejected before the remote side acted on it.
/// Only these make a repeated create safe.
pub const REJECTION_CODES: [&str; 3] = ["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Match on error code, and optionally on the start of the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub code: String,
    pub message_prefix: Option<String>,
    pub class: ErrorClass,
}

impl ClassificationRule {
    pub fn retryable(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message_prefix: None,
            class: ErrorClass::Retryable,
        }
    }

    pub fn fatal(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message_prefix: None,
            class: ErrorClass::Fatal,
        }
    }

    pub fn with_message_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.message_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, error: &RemoteError) -> bool {
        error.code == self.code
            && self
                .message_prefix
                .as_deref()
                .map_or(true, |prefix| error.message.starts_with(prefix))
    }
}

/// First matching rule wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleClassifier {
    rules: Vec<ClassificationRule>,
    default_class: ErrorClass,
}

impl RuleClassifier {
    pub fn new(default_class: ErrorClass) -> Self {
        Self {
            rules: Vec::new(),
            default_class,
        }
    }

    /// Fatal by default, with the common throttling and availability codes retryable
    pub fn standard() -> Self {
        TRANSIENT_CODES
            .iter()
            .fold(Self::new(ErrorClass::Fatal), |classifier, code| {
                classifier.with_rule(ClassificationRule::retryable(*code))
            })
    }

    /// Fatal by default, retryable only for requests rejected unprocessed
    pub fn rejections_only() -> Self {
        REJECTION_CODES
            .iter()
            .fold(Self::new(ErrorClass::Fatal), |classifier, code| {
                classifier.with_rule(ClassificationRule::retryable(*code))
            })
    }

    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Insert a rule ahead of the existing ones
    pub fn with_priority_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn classify(&self, error: &RemoteError) -> ErrorClass {
        self.rules
            .iter()
            .find(|rule| rule.matches(error))
            .map_or(self.default_class, |rule| rule.class)
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_classifier_retries_throttling() {
        let classifier = RuleClassifier::standard();

        assert_eq!(
            classifier.classify(&RemoteError::new("RequestLimitExceeded", "slow down")),
            ErrorClass::Retryable
        );
        assert_eq!(
            classifier.classify(&RemoteError::new("UnauthorizedOperation", "denied")),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_message_prefix_narrows_match() {
        let classifier = RuleClassifier::new(ErrorClass::Fatal).with_rule(
            ClassificationRule::retryable("ResourceNotFoundException")
                .with_message_prefix("Unable to find user with ARN"),
        );

        assert_eq!(
            classifier.classify(&RemoteError::new(
                "ResourceNotFoundException",
                "Unable to find user with ARN arn:aws:iam::1:user/ops"
            )),
            ErrorClass::Retryable
        );
        assert_eq!(
            classifier.classify(&RemoteError::new(
                "ResourceNotFoundException",
                "Stack not found"
            )),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let classifier = RuleClassifier::standard()
            .with_priority_rule(ClassificationRule::fatal("InternalError"));

        assert_eq!(
            classifier.classify(&RemoteError::new("InternalError", "boom")),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_rejections_only_excludes_ambiguous_failures() {
        let classifier = RuleClassifier::rejections_only();

        assert_eq!(
            classifier.classify(&RemoteError::new("Throttling", "rate exceeded")),
            ErrorClass::Retryable
        );
        for code in ["InternalError", "RequestTimeout", "ServiceUnavailable"] {
            assert_eq!(
                classifier.classify(&RemoteError::new(code, "try again")),
                ErrorClass::Fatal
            );
        }
    }
}
