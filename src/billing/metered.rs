//! Metered usage reporting.
//!
//! Reports are deliberately NOT deduplicated: each protected call is a
//! distinct billable event even under client retry, so every report carries
//! a freshly minted ULID and the provider records them all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;

use crate::config::MeteredConfig;

use super::error::BillingError;

/// One billable usage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    /// Fresh per-report id, never reused
    pub report_id: String,
    pub account_id: String,
    pub endpoint: String,
    pub amount_micros: i64,
}

impl UsageReport {
    pub fn new(account_id: &str, endpoint: &str, amount_micros: i64) -> Self {
        Self {
            report_id: Ulid::new().to_string(),
            account_id: account_id.to_string(),
            endpoint: endpoint.to_string(),
            amount_micros,
        }
    }
}

/// Metered-billing provider interface.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    /// Reporter name for logging
    fn name(&self) -> &'static str;

    async fn report(&self, usage: &UsageReport) -> Result<(), BillingError>;
}

/// HTTP reporter posting usage events to the external billing provider.
pub struct HttpUsageReporter {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpUsageReporter {
    pub fn new(config: &MeteredConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BillingError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl UsageReporter for HttpUsageReporter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn report(&self, usage: &UsageReport) -> Result<(), BillingError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(usage)
            .send()
            .await
            .map_err(|e| BillingError::ReportFailed(format!("provider unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::ReportFailed(format!(
                "provider returned {}",
                status
            )));
        }

        Ok(())
    }
}

/// Counting reporter for development and tests.
#[cfg(any(test, feature = "mock-api"))]
pub struct MockUsageReporter {
    fail: std::sync::atomic::AtomicBool,
    reports: std::sync::Mutex<Vec<UsageReport>>,
}

#[cfg(any(test, feature = "mock-api"))]
impl MockUsageReporter {
    pub fn new() -> Self {
        Self {
            fail: std::sync::atomic::AtomicBool::new(false),
            reports: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn fail_reports(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn reports(&self) -> Vec<UsageReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "mock-api"))]
impl Default for MockUsageReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "mock-api"))]
#[async_trait]
impl UsageReporter for MockUsageReporter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn report(&self, usage: &UsageReport) -> Result<(), BillingError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BillingError::ReportFailed("mock failure".to_string()));
        }
        self.reports.lock().unwrap().push(usage.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_ids_are_unique_per_call() {
        let a = UsageReport::new("acct-1", "/api/v1/scan", 1000);
        let b = UsageReport::new("acct-1", "/api/v1/scan", 1000);
        // Same account, same endpoint, same amount: still distinct events
        assert_ne!(a.report_id, b.report_id);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = UsageReport::new("acct-1", "/api/v1/scan", 1000);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("reportId"));
        assert!(json.contains("accountId"));
        assert!(json.contains("amountMicros"));
    }

    #[tokio::test]
    async fn test_mock_reporter_records_and_fails() {
        let reporter = MockUsageReporter::new();
        let usage = UsageReport::new("acct-1", "/api/v1/scan", 1000);
        reporter.report(&usage).await.unwrap();
        assert_eq!(reporter.reports().len(), 1);

        reporter.fail_reports();
        assert!(reporter.report(&usage).await.is_err());
    }
}
