use std::path::Path;

use agent_sandbox::ResourceLimits;

/// A short, human-readable summary of the sandbox admission rules a session
/// was configured with, for inclusion in `SessionStart` logging.
pub fn summarize_sandbox_policy(
    writable_roots: &[impl AsRef<Path>],
    network_domains: &[String],
    limits: ResourceLimits,
) -> String {
    let mut summary = String::new();

    if writable_roots.is_empty() {
        summary.push_str("read-only");
    } else {
        let roots = writable_roots
            .iter()
            .map(|p| p.as_ref().to_string_lossy())
            .collect::<Vec<_>>()
            .join(", ");
        summary.push_str(&format!("workspace-write [{roots}]"));
    }

    if network_domains.is_empty() {
        summary.push_str(" (no network access)");
    } else {
        summary.push_str(&format!(
            " (network: {})",
            network_domains.join(", ")
        ));
    }

    summary.push_str(&format!(
        " (limits: cpu<={}%, mem<={}MiB, disk<={}MiB)",
        limits.max_cpu_percent,
        limits.max_memory_bytes / (1024 * 1024),
        limits.max_disk_bytes / (1024 * 1024),
    ));

    summary
}
