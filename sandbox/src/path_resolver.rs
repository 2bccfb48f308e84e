use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;
use crate::error::SandboxError;

/// Default maximum number of path segments a candidate path may have.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Resolves candidate filesystem paths against an allow-list of roots,
/// rejecting parent traversal, over-deep paths, and any symlink encountered
/// along the way (checked with a no-follow stat so a symlink can never be
/// substituted for an intermediate directory).
#[derive(Debug, Clone)]
pub struct PathResolver {
    max_depth: usize,
    allowed_roots: Vec<PathBuf>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl PathResolver {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            allowed_roots: Vec::new(),
        }
    }

    /// Registers `root` as an allowed prefix. Both the raw form and, when it
    /// exists on disk, the symlink-resolved (canonical) form are recorded so
    /// a path reached via either spelling is accepted.
    pub fn add_allowed_root(&mut self, root: impl AsRef<Path>) {
        let root = root.as_ref();
        self.allowed_roots.push(clean(root));
        if let Ok(canonical) = root.canonicalize() {
            self.allowed_roots.push(canonical);
        }
    }

    /// Resolves `candidate`, applying every guard in §4.2 order: empty
    /// check, parent-traversal rejection, depth cap, symlink walk, then
    /// allow-list containment (skipped when no roots are registered).
    pub fn resolve(&self, candidate: impl AsRef<Path>) -> Result<PathBuf> {
        let candidate = candidate.as_ref();
        if candidate.as_os_str().is_empty() {
            return Err(SandboxError::EmptyPath);
        }

        for component in candidate.components() {
            if component == Component::ParentDir {
                tracing::warn!(path = %candidate.display(), "sandbox denied path: parent traversal");
                return Err(SandboxError::ParentTraversal(
                    candidate.display().to_string(),
                ));
            }
        }

        let cleaned = clean(candidate);
        let depth = cleaned
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .count();
        if depth > self.max_depth {
            tracing::warn!(path = %candidate.display(), depth, max = self.max_depth, "sandbox denied path: too deep");
            return Err(SandboxError::TooDeep {
                path: candidate.display().to_string(),
                max: self.max_depth,
            });
        }

        self.reject_symlink_prefixes(&cleaned)?;

        if !self.allowed_roots.is_empty() {
            let matches_root = self
                .allowed_roots
                .iter()
                .any(|root| cleaned.starts_with(root));
            if !matches_root {
                tracing::warn!(path = %cleaned.display(), "sandbox denied path: outside allowed roots");
                return Err(SandboxError::PathDenied(cleaned.display().to_string()));
            }
        }

        Ok(cleaned)
    }

    fn reject_symlink_prefixes(&self, cleaned: &Path) -> Result<()> {
        let mut prefix = PathBuf::new();
        for component in cleaned.components() {
            prefix.push(component);
            if prefix == *cleaned {
                // The final component is the candidate itself: a symlink
                // there is fine (the tool may be creating or replacing it);
                // only *intermediate* segments must be real directories.
                break;
            }
            match std::fs::symlink_metadata(&prefix) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    tracing::warn!(path = %prefix.display(), "sandbox denied path: symlink in intermediate segment");
                    return Err(SandboxError::Symlink(prefix.display().to_string()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Logically normalizes `.` components away without touching the
/// filesystem. `..` has already been rejected by the caller by this point.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        let resolver = PathResolver::default();
        assert!(matches!(resolver.resolve(""), Err(SandboxError::EmptyPath)));
    }

    #[test]
    fn rejects_parent_traversal() {
        let resolver = PathResolver::default();
        let err = resolver
            .resolve("/var/../etc/passwd")
            .expect_err("should reject traversal");
        assert!(matches!(err, SandboxError::ParentTraversal(_)));
    }

    #[test]
    fn rejects_over_deep_paths() {
        let resolver = PathResolver::new(3);
        assert!(resolver.resolve("/a/b/c").is_ok());
        assert!(matches!(
            resolver.resolve("/a/b/c/d"),
            Err(SandboxError::TooDeep { .. })
        ));
    }

    #[test]
    fn resolve_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut resolver = PathResolver::default();
        resolver.add_allowed_root(dir.path());

        let target = dir.path().join("nested").join("file.txt");
        std::fs::create_dir_all(target.parent().expect("has parent")).expect("mkdir");

        let once = resolver.resolve(&target).expect("resolve once");
        let twice = resolver.resolve(&once).expect("resolve twice");
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_symlink_in_intermediate_segment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real_dir = dir.path().join("real");
        std::fs::create_dir(&real_dir).expect("mkdir");
        let link = dir.path().join("link");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&real_dir, &link).expect("symlink");
        #[cfg(unix)]
        {
            let mut resolver = PathResolver::default();
            resolver.add_allowed_root(dir.path());
            let candidate = link.join("file.txt");
            assert!(matches!(
                resolver.resolve(&candidate),
                Err(SandboxError::Symlink(_))
            ));
        }
    }

    #[test]
    fn rejects_path_outside_allowed_roots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut resolver = PathResolver::default();
        resolver.add_allowed_root(dir.path());
        assert!(matches!(
            resolver.resolve("/etc/passwd"),
            Err(SandboxError::PathDenied(_))
        ));
    }
}
