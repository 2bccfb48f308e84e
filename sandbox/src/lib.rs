//! Filesystem, network, and resource admission checks consulted by the tool
//! executor before a tool runs.

mod command_validator;
mod error;
mod network_guard;
mod path_resolver;
mod resource_limiter;

pub use command_validator::CommandValidator;
pub use error::Result;
pub use error::SandboxError;
pub use network_guard::NetworkGuard;
pub use path_resolver::PathResolver;
pub use path_resolver::DEFAULT_MAX_DEPTH;
pub use resource_limiter::ResourceLimiter;
pub use resource_limiter::ResourceLimits;

use std::path::Path;
use std::path::PathBuf;
use std::sync::RwLock;

/// Composite of the three guards named in §4.2: `CheckPath`, `CheckNetwork`,
/// `AcquireResources`.
///
/// Read-mostly: the allow-lists are populated at construction (or during an
/// explicit settings reload, which takes the exclusive write lock); ordinary
/// checks only take the read lock.
pub struct SandboxManager {
    inner: RwLock<Inner>,
    command_validator: CommandValidator,
    resource_limiter: ResourceLimiter,
}

struct Inner {
    path_resolver: PathResolver,
    network_guard: NetworkGuard,
}

impl SandboxManager {
    pub fn new(
        path_resolver: PathResolver,
        network_guard: NetworkGuard,
        command_validator: CommandValidator,
        resource_limits: ResourceLimits,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner {
                path_resolver,
                network_guard,
            }),
            command_validator,
            resource_limiter: ResourceLimiter::new(resource_limits),
        }
    }

    pub fn check_path(&self, candidate: impl AsRef<Path>) -> Result<PathBuf> {
        self.inner
            .read()
            .expect("sandbox lock poisoned")
            .path_resolver
            .resolve(candidate)
    }

    pub fn check_network(&self, host: &str) -> Result<()> {
        self.inner
            .read()
            .expect("sandbox lock poisoned")
            .network_guard
            .check(host)
    }

    pub fn validate_command(&self, command: &str) -> Result<Vec<String>> {
        self.command_validator.validate(command)
    }

    pub fn acquire_resources(&self, requested: ResourceLimits) -> ResourceLimits {
        self.resource_limiter.acquire(requested)
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        self.resource_limiter.limits()
    }

    /// Replaces the path/network allow-lists under an exclusive lock;
    /// mutation outside construction is only permitted here.
    pub fn reload(&self, path_resolver: PathResolver, network_guard: NetworkGuard) {
        let mut inner = self.inner.write().expect("sandbox lock poisoned");
        inner.path_resolver = path_resolver;
        inner.network_guard = network_guard;
    }
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new(
            PathResolver::default(),
            NetworkGuard::default(),
            CommandValidator::default(),
            ResourceLimits::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal_with_message() {
        let manager = SandboxManager::default();
        let err = manager
            .check_path("/var/../etc/passwd")
            .expect_err("should reject");
        assert!(err.to_string().contains("parent traversal"));
    }

    #[test]
    fn rejects_network_not_on_allow_list() {
        let manager = SandboxManager::default();
        let err = manager.check_network("example.com").expect_err("should deny");
        assert!(err.to_string().contains("denied"));
    }
}
