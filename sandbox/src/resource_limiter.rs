use serde::Deserialize;
use serde::Serialize;

/// Static resource ceilings surfaced in tool responses.
///
/// Enforcement is advisory per §4.2 and the open-question resolution in
/// SPEC_FULL.md §9: this struct is reported, not enforced at the OS/cgroup
/// level. A future kernel-level integration would consult the same fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_cpu_percent: u8,
    pub max_memory_bytes: u64,
    pub max_disk_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_percent: 100,
            max_memory_bytes: 1024 * 1024 * 1024,
            max_disk_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

/// Advisory admission check: always succeeds, but records the limits a
/// caller asked for so they can be echoed back in a tool's metadata.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimiter {
    limits: ResourceLimits,
}

impl ResourceLimiter {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Advisory only: never rejects a claim, just reports the configured
    /// ceiling it would be measured against.
    pub fn acquire(&self, _requested: ResourceLimits) -> ResourceLimits {
        self.limits
    }
}
