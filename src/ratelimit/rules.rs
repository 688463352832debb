//! Rate limit policies and per-route overrides.
//!
//! A rule set carries one default policy and any number of route-specific
//! overrides, keyed by route key. Rule sets load from YAML:
//!
//! ```yaml
//! default:
//!   limit: 300
//!   period_seconds: 30
//! routes:
//!   - route: login
//!     limit: 20
//!     period_seconds: 60
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::window::MAX_PERIOD_SECONDS;
use crate::error::{MealmatchError, Result};

/// Default maximum requests per window for every protected route.
pub const DEFAULT_LIMIT: u64 = 300;
/// Default window length in seconds.
pub const DEFAULT_PERIOD_SECONDS: u64 = 30;

/// Rules shared between request steps and the reload task.
pub type SharedRules = Arc<RwLock<RateLimitRules>>;

/// The budget applied to one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Maximum requests per window
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Window length in seconds
    #[serde(default = "default_period")]
    pub period_seconds: u64,
    /// Whether responses carry the `X-RateLimit-*` headers
    #[serde(default = "default_send_headers")]
    pub send_headers: bool,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            period_seconds: DEFAULT_PERIOD_SECONDS,
            send_headers: true,
        }
    }
}

impl RatePolicy {
    /// Create a policy that sends headers.
    pub fn new(limit: u64, period_seconds: u64) -> Self {
        Self {
            limit,
            period_seconds,
            send_headers: true,
        }
    }

    /// Reject policies the limiter could never apply.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(MealmatchError::InvalidConfiguration(
                "limit must be positive".to_string(),
            ));
        }
        if self.period_seconds == 0 {
            return Err(MealmatchError::InvalidConfiguration(
                "period_seconds must be positive".to_string(),
            ));
        }
        if self.period_seconds > MAX_PERIOD_SECONDS {
            return Err(MealmatchError::InvalidConfiguration(format!(
                "period_seconds must not exceed {}",
                MAX_PERIOD_SECONDS
            )));
        }
        Ok(())
    }
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_period() -> u64 {
    DEFAULT_PERIOD_SECONDS
}

fn default_send_headers() -> bool {
    true
}

/// A policy override for a single route key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// The route key this override applies to
    pub route: String,
    #[serde(flatten)]
    pub policy: RatePolicy,
}

/// The complete set of policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// Policy for routes without an override
    #[serde(default)]
    pub default: RatePolicy,
    /// Route-specific overrides
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

impl RateLimitRules {
    /// Create a rule set with only the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| MealmatchError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Validate every policy in the set.
    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for rule in &self.routes {
            if rule.route.is_empty() {
                return Err(MealmatchError::InvalidConfiguration(
                    "route rule with empty route key".to_string(),
                ));
            }
            rule.policy.validate().map_err(|e| {
                MealmatchError::InvalidConfiguration(format!("route '{}': {}", rule.route, e))
            })?;
        }
        Ok(())
    }

    /// Add or replace the override for `route`.
    pub fn with_route(mut self, route: impl Into<String>, policy: RatePolicy) -> Self {
        let route = route.into();
        self.routes.retain(|r| r.route != route);
        self.routes.push(RouteRule { route, policy });
        self
    }

    /// Wrap the rules for sharing.
    pub fn into_shared(self) -> SharedRules {
        Arc::new(RwLock::new(self))
    }

    /// The policy for `route_key`: its override if one exists, else the default.
    ///
    /// When a route is listed more than once the last entry wins.
    pub fn policy_for(&self, route_key: &str) -> RatePolicy {
        self.routes
            .iter()
            .rev()
            .find(|r| r.route == route_key)
            .map(|r| r.policy)
            .unwrap_or(self.default)
    }
}

/// Replace the shared rules with the contents of `path`.
///
/// On failure the previous rules stay in force.
pub fn reload_shared<P: AsRef<Path>>(shared: &SharedRules, path: P) -> Result<()> {
    match RateLimitRules::from_file(path.as_ref()) {
        Ok(rules) => {
            let changed = *shared.read() != rules;
            if changed {
                info!(routes = rules.routes.len(), "Rate limit rules updated");
                *shared.write() = rules;
            }
            Ok(())
        }
        Err(e) => {
            warn!(
                path = %path.as_ref().display(),
                error = %e,
                "Failed to reload rate limit rules, keeping previous rules"
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let rules = RateLimitRules::new();
        let policy = rules.policy_for("anything");

        assert_eq!(policy.limit, 300);
        assert_eq!(policy.period_seconds, 30);
        assert!(policy.send_headers);
    }

    #[test]
    fn test_parse_rules() {
        let yaml = r#"
default:
  limit: 100
  period_seconds: 60
routes:
  - route: login
    limit: 5
    period_seconds: 30
  - route: index
    limit: 50
    period_seconds: 10
    send_headers: false
"#;
        let rules = RateLimitRules::from_yaml(yaml).unwrap();

        assert_eq!(rules.policy_for("other"), RatePolicy::new(100, 60));
        assert_eq!(rules.policy_for("login"), RatePolicy::new(5, 30));

        let index = rules.policy_for("index");
        assert_eq!(index.limit, 50);
        assert!(!index.send_headers);
    }

    #[test]
    fn test_partial_policy_uses_defaults() {
        let yaml = r#"
routes:
  - route: login
    limit: 10
"#;
        let rules = RateLimitRules::from_yaml(yaml).unwrap();
        let login = rules.policy_for("login");

        assert_eq!(login.limit, 10);
        assert_eq!(login.period_seconds, DEFAULT_PERIOD_SECONDS);
        assert_eq!(rules.default, RatePolicy::default());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let yaml = r#"
routes:
  - route: login
    limit: 0
"#;
        let result = RateLimitRules::from_yaml(yaml);
        assert!(matches!(result, Err(MealmatchError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_default_period_rejected() {
        let yaml = r#"
default:
  period_seconds: 0
"#;
        assert!(RateLimitRules::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_oversized_period_rejected() {
        let yaml = r#"
default:
  limit: 1
  period_seconds: 18446744073709551615
"#;
        let result = RateLimitRules::from_yaml(yaml);
        assert!(matches!(result, Err(MealmatchError::InvalidConfiguration(_))));

        assert!(RatePolicy::new(1, MAX_PERIOD_SECONDS).validate().is_ok());
        assert!(RatePolicy::new(1, MAX_PERIOD_SECONDS + 1).validate().is_err());
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let result = RateLimitRules::from_yaml("routes: [");
        assert!(matches!(result, Err(MealmatchError::Config(_))));
    }

    #[test]
    fn test_with_route_replaces_existing() {
        let rules = RateLimitRules::new()
            .with_route("login", RatePolicy::new(5, 30))
            .with_route("login", RatePolicy::new(7, 30));

        assert_eq!(rules.routes.len(), 1);
        assert_eq!(rules.policy_for("login").limit, 7);
    }

    #[test]
    fn test_reload_shared_keeps_rules_on_error() {
        let shared = RateLimitRules::new()
            .with_route("login", RatePolicy::new(5, 30))
            .into_shared();

        let path = std::env::temp_dir().join(format!("mealmatch-rules-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "routes: [").unwrap();
        assert!(reload_shared(&shared, &path).is_err());
        assert_eq!(shared.read().policy_for("login").limit, 5);

        std::fs::write(&path, "routes:\n  - route: login\n    limit: 9\n").unwrap();
        reload_shared(&shared, &path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(shared.read().policy_for("login").limit, 9);
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = RateLimitRules::from_file("/nonexistent/mealmatch/rules.yaml");
        assert!(matches!(result, Err(MealmatchError::Io(_))));
    }
}
