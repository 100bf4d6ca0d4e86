//! Per-run check results recorded by the gate pipeline.

use serde::Serialize;
use std::collections::BTreeMap;

/// Pipeline checks, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    Authentication,
    AccountLock,
    Origin,
    Directory,
    Role,
    Capabilities,
    Session,
    TwoFactor,
    ThreatScan,
}

impl CheckId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckId::Authentication => "authentication",
            CheckId::AccountLock => "account_lock",
            CheckId::Origin => "origin",
            CheckId::Directory => "directory",
            CheckId::Role => "role",
            CheckId::Capabilities => "capabilities",
            CheckId::Session => "session",
            CheckId::TwoFactor => "two_factor",
            CheckId::ThreatScan => "threat_scan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Success,
    Failed,
    Required,
    NotRequired,
    Scanned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl CheckResult {
    pub fn new(status: CheckStatus, diagnostics: Option<String>) -> Self {
        Self { status, diagnostics }
    }
}

/// Results for one evaluation, keyed by check id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CheckReport(BTreeMap<CheckId, CheckResult>);

impl CheckReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: CheckId, status: CheckStatus, diagnostics: Option<String>) {
        self.0.insert(id, CheckResult::new(status, diagnostics));
    }

    pub fn success(&mut self, id: CheckId) {
        self.record(id, CheckStatus::Success, None);
    }

    pub fn fail(&mut self, id: CheckId, reason: impl Into<String>) {
        self.record(id, CheckStatus::Failed, Some(reason.into()));
    }

    pub fn get(&self, id: CheckId) -> Option<&CheckResult> {
        self.0.get(&id)
    }

    pub fn status(&self, id: CheckId) -> Option<CheckStatus> {
        self.0.get(&id).map(|r| r.status)
    }

    /// Check ids whose status is `failed`.
    pub fn failed(&self) -> Vec<CheckId> {
        self.0
            .iter()
            .filter(|(_, r)| r.status == CheckStatus::Failed)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Diagnostics of every failed check, in pipeline order.
    pub fn failure_reasons(&self) -> Vec<String> {
        self.0
            .values()
            .filter(|r| r.status == CheckStatus::Failed)
            .filter_map(|r| r.diagnostics.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CheckId, &CheckResult)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons_follow_pipeline_order() {
        let mut report = CheckReport::new();
        report.fail(CheckId::Role, "role too low");
        report.success(CheckId::Authentication);
        report.fail(CheckId::Directory, "not an admin");

        assert_eq!(report.failed(), vec![CheckId::Directory, CheckId::Role]);
        assert_eq!(report.failure_reasons(), vec!["not an admin", "role too low"]);
    }

    #[test]
    fn test_record_overwrites_previous_result() {
        let mut report = CheckReport::new();
        report.record(CheckId::TwoFactor, CheckStatus::Required, None);
        report.success(CheckId::TwoFactor);

        assert_eq!(report.len(), 1);
        assert_eq!(report.status(CheckId::TwoFactor), Some(CheckStatus::Success));
    }
}
