//! Controller configuration from flags and environment

use std::time::Duration;

use clap::Parser;
use kgateway_common::telemetry::LogFormat;
use kgateway_common::KGATEWAY_SYSTEM_NAMESPACE;
use kgateway_policy::RefGrantMode;

/// ConfigMap holding the persisted JWKS cache
pub const DEFAULT_JWKS_CONFIGMAP: &str = "jwks-store";

/// kgateway control-plane controller
#[derive(Parser, Debug, Clone)]
#[command(name = "kgateway-controller", version, about, long_about = None)]
pub struct ControllerConfig {
    /// Namespace where the JWKS ConfigMap lives
    #[arg(long, env = "KGATEWAY_NAMESPACE", default_value = KGATEWAY_SYSTEM_NAMESPACE)]
    pub namespace: String,

    /// Name of the JWKS ConfigMap
    #[arg(long, env = "KGATEWAY_JWKS_CONFIGMAP", default_value = DEFAULT_JWKS_CONFIGMAP)]
    pub jwks_configmap: String,

    /// Timeout for one JWKS HTTP request, in seconds
    #[arg(long, env = "KGATEWAY_JWKS_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub jwks_fetch_timeout_secs: u64,

    /// Refresh interval for remote JWKS without a cacheDuration, in seconds
    #[arg(long, env = "KGATEWAY_DEFAULT_JWKS_TTL_SECS", default_value_t = 300)]
    pub default_jwks_ttl_secs: u64,

    /// Log output format (json or text)
    #[arg(long, env = "KGATEWAY_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Allow cross-namespace references without a ReferenceGrant
    #[arg(long, env = "KGATEWAY_DISABLE_REF_GRANT_VALIDATION")]
    pub disable_ref_grant_validation: bool,
}

impl ControllerConfig {
    /// JWKS HTTP timeout
    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.jwks_fetch_timeout_secs)
    }

    /// TTL for remote JWKS without a cacheDuration
    pub fn default_jwks_ttl(&self) -> Duration {
        Duration::from_secs(self.default_jwks_ttl_secs)
    }

    /// Cross-namespace reference checking
    pub fn ref_grant_mode(&self) -> RefGrantMode {
        if self.disable_ref_grant_validation {
            RefGrantMode::Skip
        } else {
            RefGrantMode::Validate
        }
    }
}
