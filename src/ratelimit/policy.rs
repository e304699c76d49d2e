//! Rate limit policies and route matching.
//!
//! A [`PolicyTable`] maps request routes to named [`RateLimitConfig`]s. Routes
//! are matched by path prefix, optionally narrowed by HTTP method, with the
//! longest matching prefix taking precedence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Default rejection message surfaced to throttled callers.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Quota settings for a route or class of routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Length of the fixed window in milliseconds
    pub window_duration_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Message returned to throttled callers
    #[serde(default = "default_message")]
    pub rejection_message: String,
    /// Give back the quota used by requests that complete successfully
    #[serde(default)]
    pub skip_successful_requests: bool,
    /// Give back the quota used by requests that fail
    #[serde(default)]
    pub skip_failed_requests: bool,
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

impl RateLimitConfig {
    /// Create a config with the default message and no skip flags.
    pub fn new(window_duration_ms: u64, max_requests: u64) -> Self {
        Self {
            window_duration_ms,
            max_requests,
            rejection_message: default_message(),
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }

    /// Replace the rejection message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    /// Set the skip flags.
    pub fn with_skips(mut self, successful: bool, failed: bool) -> Self {
        self.skip_successful_requests = successful;
        self.skip_failed_requests = failed;
        self
    }

    /// Whether a completed request with this outcome should be uncounted.
    pub fn should_refund(&self, succeeded: bool) -> bool {
        if succeeded {
            self.skip_successful_requests
        } else {
            self.skip_failed_requests
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.window_duration_ms == 0 {
            return Err(TurnstileError::Policy(format!(
                "policy '{}': window_duration_ms must be greater than zero",
                name
            )));
        }
        if self.max_requests == 0 {
            return Err(TurnstileError::Policy(format!(
                "policy '{}': max_requests must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

/// Binds a route prefix (and optionally a set of methods) to a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Path prefix to match
    pub path_prefix: String,
    /// Methods to match; matches any method when absent
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    /// Name of the policy to apply
    pub policy: String,
}

impl RouteRule {
    fn matches(&self, method: &str, path: &str) -> bool {
        if !prefix_matches(&self.path_prefix, path) {
            return false;
        }

        match &self.methods {
            Some(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
            None => true,
        }
    }
}

/// Prefix match on path segment boundaries, so `/api/order` does not claim
/// `/api/orders`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }

    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// The complete set of policies and route bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Named policies
    #[serde(default)]
    pub policies: BTreeMap<String, RateLimitConfig>,
    /// Route bindings
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    /// Policy for routes no rule matches; unmatched routes are unthrottled when unset
    #[serde(default)]
    pub default_policy: Option<String>,
}

impl PolicyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard operation categories.
    ///
    /// Authentication routes get the tightest quota, financial routes sit
    /// between, and everything else splits into reads and writes by method.
    pub fn standard() -> Self {
        const MINUTE_MS: u64 = 60_000;
        let read_methods = Some(vec!["GET".to_string(), "HEAD".to_string()]);

        let mut policies = BTreeMap::new();
        policies.insert("read".to_string(), RateLimitConfig::new(MINUTE_MS, 100));
        policies.insert(
            "write".to_string(),
            RateLimitConfig::new(MINUTE_MS, 30)
                .with_message("Too many write requests, please slow down."),
        );
        policies.insert("financial_read".to_string(), RateLimitConfig::new(MINUTE_MS, 60));
        policies.insert(
            "financial_write".to_string(),
            RateLimitConfig::new(MINUTE_MS, 10)
                .with_message("Too many financial operations, please try again later."),
        );
        policies.insert(
            "auth".to_string(),
            RateLimitConfig::new(15 * MINUTE_MS, 5)
                .with_message("Too many authentication attempts, please try again later."),
        );

        let routes = vec![
            RouteRule {
                path_prefix: "/api/auth".to_string(),
                methods: None,
                policy: "auth".to_string(),
            },
            RouteRule {
                path_prefix: "/api/payments".to_string(),
                methods: read_methods.clone(),
                policy: "financial_read".to_string(),
            },
            RouteRule {
                path_prefix: "/api/payments".to_string(),
                methods: None,
                policy: "financial_write".to_string(),
            },
            RouteRule {
                path_prefix: "/".to_string(),
                methods: read_methods,
                policy: "read".to_string(),
            },
        ];

        Self {
            policies,
            routes,
            default_policy: Some("write".to_string()),
        }
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a table from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: PolicyTable = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Policy(format!("Failed to parse policy table: {}", e)))?;
        table.validate()?;
        Ok(table)
    }

    /// Check quotas and that every referenced policy exists.
    pub fn validate(&self) -> Result<()> {
        for (name, config) in &self.policies {
            config.validate(name)?;
        }

        for rule in &self.routes {
            if !self.policies.contains_key(&rule.policy) {
                return Err(TurnstileError::Policy(format!(
                    "route '{}' references unknown policy '{}'",
                    rule.path_prefix, rule.policy
                )));
            }
        }

        if let Some(name) = &self.default_policy {
            if !self.policies.contains_key(name) {
                return Err(TurnstileError::Policy(format!(
                    "default policy '{}' is not defined",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&RateLimitConfig> {
        self.policies.get(name)
    }

    /// Find the policy governing a request.
    ///
    /// The longest matching prefix wins; rules with equal prefixes are tried
    /// in declaration order.
    pub fn resolve(&self, method: &str, path: &str) -> Option<(&str, &RateLimitConfig)> {
        let mut best: Option<&RouteRule> = None;

        for rule in &self.routes {
            if !rule.matches(method, path) {
                continue;
            }

            let longer = best.map_or(true, |current| {
                rule.path_prefix.trim_end_matches('/').len()
                    > current.path_prefix.trim_end_matches('/').len()
            });
            if longer {
                best = Some(rule);
            }
        }

        let name = match best {
            Some(rule) => rule.policy.as_str(),
            None => self.default_policy.as_deref()?,
        };

        self.named(name)
    }

    /// Look up a policy by name, returning the stored name alongside it.
    pub fn named(&self, name: &str) -> Option<(&str, &RateLimitConfig)> {
        self.policies
            .get_key_value(name)
            .map(|(name, config)| (name.as_str(), config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_table() {
        let yaml = r#"
policies:
  api:
    window_duration_ms: 60000
    max_requests: 100
routes:
  - path_prefix: /api
    policy: api
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        let api = table.get("api").unwrap();
        assert_eq!(api.max_requests, 100);
        assert_eq!(api.rejection_message, DEFAULT_MESSAGE);
        assert!(!api.skip_successful_requests);
        assert!(!api.skip_failed_requests);
    }

    #[test]
    fn test_parse_full_policy() {
        let yaml = r#"
policies:
  login:
    window_duration_ms: 900000
    max_requests: 5
    rejection_message: Slow down
    skip_successful_requests: true
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        let login = table.get("login").unwrap();
        assert_eq!(login.rejection_message, "Slow down");
        assert!(login.should_refund(true));
        assert!(!login.should_refund(false));
    }

    #[test]
    fn test_zero_quota_is_rejected() {
        let yaml = r#"
policies:
  broken:
    window_duration_ms: 1000
    max_requests: 0
"#;
        let err = PolicyTable::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("max_requests"));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let yaml = r#"
policies:
  broken:
    window_duration_ms: 0
    max_requests: 10
"#;
        assert!(PolicyTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_policy_reference_is_rejected() {
        let yaml = r#"
policies:
  api:
    window_duration_ms: 1000
    max_requests: 10
routes:
  - path_prefix: /admin
    policy: missing
"#;
        let err = PolicyTable::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_resolve_longest_prefix_wins() {
        let table = PolicyTable::standard();

        let (name, _) = table.resolve("POST", "/api/auth/login").unwrap();
        assert_eq!(name, "auth");

        let (name, config) = table.resolve("GET", "/api/payments/42").unwrap();
        assert_eq!(name, "financial_read");
        assert_eq!(config.max_requests, 60);

        let (name, _) = table.resolve("POST", "/api/payments").unwrap();
        assert_eq!(name, "financial_write");
    }

    #[test]
    fn test_resolve_method_split_and_default() {
        let table = PolicyTable::standard();

        let (name, _) = table.resolve("GET", "/api/orders").unwrap();
        assert_eq!(name, "read");

        let (name, _) = table.resolve("head", "/api/orders").unwrap();
        assert_eq!(name, "read");

        // No rule covers DELETE outside the special prefixes.
        let (name, _) = table.resolve("DELETE", "/api/orders/7").unwrap();
        assert_eq!(name, "write");
    }

    #[test]
    fn test_prefix_respects_segment_boundaries() {
        let yaml = r#"
policies:
  tight:
    window_duration_ms: 1000
    max_requests: 1
routes:
  - path_prefix: /api/order
    policy: tight
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();

        assert!(table.resolve("GET", "/api/order").is_some());
        assert!(table.resolve("GET", "/api/order/1").is_some());
        assert!(table.resolve("GET", "/api/orders").is_none());
    }

    #[test]
    fn test_unmatched_route_without_default_is_unthrottled() {
        let table = PolicyTable::new();
        assert!(table.resolve("GET", "/anything").is_none());
    }

    #[test]
    fn test_standard_table_is_valid() {
        PolicyTable::standard().validate().unwrap();
    }

    #[test]
    fn test_shipped_policy_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/policies.yaml");
        let table = PolicyTable::from_file(path).unwrap();

        let (name, config) = table.resolve("POST", "/api/auth/login").unwrap();
        assert_eq!(name, "auth");
        assert!(config.skip_successful_requests);
        assert_eq!(table.resolve("PATCH", "/api/orders/1").unwrap().0, "write");
    }
}
