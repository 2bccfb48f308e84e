use crate::error::Result;
use crate::error::SandboxError;

/// Admits outbound network hosts by case-insensitive domain-suffix
/// allow-list. `localhost` is allowed by default, matching §4.2.
#[derive(Debug, Clone)]
pub struct NetworkGuard {
    allowed_suffixes: Vec<String>,
}

impl Default for NetworkGuard {
    fn default() -> Self {
        Self {
            allowed_suffixes: vec!["localhost".to_string()],
        }
    }
}

impl NetworkGuard {
    pub fn new(allowed_suffixes: Vec<String>) -> Self {
        let mut allowed_suffixes: Vec<String> =
            allowed_suffixes.into_iter().map(|s| s.to_lowercase()).collect();
        if !allowed_suffixes.iter().any(|s| s == "localhost") {
            allowed_suffixes.push("localhost".to_string());
        }
        Self { allowed_suffixes }
    }

    pub fn allow(&mut self, suffix: impl Into<String>) {
        self.allowed_suffixes.push(suffix.into().to_lowercase());
    }

    /// STDIO-style URIs (no host component to check) bypass this guard
    /// entirely; callers should not invoke `check` for those.
    pub fn check(&self, host: &str) -> Result<()> {
        let host = host.to_lowercase();
        let admitted = self
            .allowed_suffixes
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")));
        if admitted {
            Ok(())
        } else {
            tracing::warn!(host, "sandbox denied network egress");
            Err(SandboxError::NetworkDenied(host))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_allowed_by_default() {
        let guard = NetworkGuard::default();
        assert!(guard.check("localhost").is_ok());
    }

    #[test]
    fn denies_unlisted_domain() {
        let guard = NetworkGuard::default();
        let err = guard.check("example.com").expect_err("should deny");
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn admits_subdomains_of_allowed_suffix() {
        let guard = NetworkGuard::new(vec!["example.com".to_string()]);
        assert!(guard.check("api.example.com").is_ok());
        assert!(guard.check("EXAMPLE.COM").is_ok());
        assert!(guard.check("notexample.com").is_err());
    }
}
