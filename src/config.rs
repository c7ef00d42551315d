use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL for the settlement ledger
    pub postgres_url: String,
    /// Explicit development-mode bypass. When true and no facilitator is
    /// configured, priced requests pass through un-charged. A production
    /// config must set this to false and provide a facilitator.
    #[serde(default)]
    pub development_mode: bool,
    /// Settlement counterparty. Absent only in development mode.
    #[serde(default)]
    pub facilitator: Option<FacilitatorConfig>,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FacilitatorConfig {
    /// Base URL; `/verify` and `/settle` are appended
    pub url: String,
    #[serde(default = "default_facilitator_timeout_ms")]
    pub timeout_ms: u64,
    /// Fixed delay before the single retry on connection failure / 5xx
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_facilitator_timeout_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Price of one protected call, plus the accepted settlement networks.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PriceConfig {
    pub amount_micros: i64,
    pub asset: String,
    #[serde(default)]
    pub description: String,
    pub networks: Vec<NetworkConfig>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            amount_micros: 1_000,
            asset: "USDC".to_string(),
            description: String::new(),
            networks: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub network: String,
    /// Receiving address for this network
    pub pay_to: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweeperConfig {
    pub scan_interval_secs: u64,
    /// Age after which a SETTLING/EXECUTING row is considered abandoned
    pub stale_threshold_secs: u64,
    pub batch_size: i64,
    pub max_attempts: i32,
    /// Reservation lifetime; past this, RESERVED rows are expired
    pub reservation_ttl_secs: u64,
    pub webhook_retention_days: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            stale_threshold_secs: 120,
            batch_size: 50,
            max_attempts: 5,
            reservation_ttl_secs: 600,
            webhook_retention_days: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BillingConfig {
    /// Shared secret for decoding client JWTs. Issuance lives elsewhere.
    #[serde(default)]
    pub jwt_secret: String,
    /// Metered-billing provider. Absent means credits-only billing.
    #[serde(default)]
    pub metered: Option<MeteredConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MeteredConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_facilitator_timeout_ms")]
    pub timeout_ms: u64,
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }

    /// A facilitator-less config is only legal with the explicit dev flag.
    pub fn validate(&self) -> Result<(), String> {
        if self.facilitator.is_none() && !self.development_mode {
            return Err(
                "no facilitator configured and development_mode is false; refusing to run \
                 a production configuration that would skip charge verification"
                    .to_string(),
            );
        }
        if self.facilitator.is_some() && self.price.networks.is_empty() {
            return Err("facilitator configured but price.networks is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml(dev_mode: bool, with_facilitator: bool) -> String {
        let facilitator = if with_facilitator {
            "facilitator:\n  url: \"http://localhost:8403\"\n"
        } else {
            ""
        };
        format!(
            r#"
log_level: "info"
log_dir: "./logs"
log_file: "test.log"
use_json: false
rotation: "never"
enable_tracing: true
gateway:
  host: "127.0.0.1"
  port: 8402
postgres_url: "postgresql://localhost/test"
development_mode: {dev_mode}
{facilitator}price:
  amount_micros: 1000
  asset: "USDC"
  networks:
    - network: "base-sepolia"
      pay_to: "0xabc"
"#
        )
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: AppConfig = serde_yaml::from_str(&minimal_yaml(true, true)).unwrap();
        assert_eq!(config.gateway.port, 8402);
        assert_eq!(config.price.amount_micros, 1000);
        let facilitator = config.facilitator.unwrap();
        assert_eq!(facilitator.timeout_ms, 5_000);
        assert_eq!(facilitator.retry_delay_ms, 500);
    }

    #[test]
    fn test_sweeper_defaults() {
        let config: AppConfig = serde_yaml::from_str(&minimal_yaml(true, false)).unwrap();
        assert_eq!(config.sweeper.scan_interval_secs, 30);
        assert_eq!(config.sweeper.max_attempts, 5);
        assert_eq!(config.sweeper.reservation_ttl_secs, 600);
    }

    #[test]
    fn test_validate_rejects_silent_bypass() {
        let config: AppConfig = serde_yaml::from_str(&minimal_yaml(false, false)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_explicit_dev_mode() {
        let config: AppConfig = serde_yaml::from_str(&minimal_yaml(true, false)).unwrap();
        assert!(config.validate().is_ok());
    }
}
