//! Directory reconciliation
//!
//! Archives rarely list every directory explicitly. The reconciler derives
//! the ancestor directories of each file so that every indexed file has a
//! directory record for each of its parents, without ever emitting the same
//! directory twice within a job.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DirectoryReconciler {
    seen: HashSet<String>,
}

impl DirectoryReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ancestor directories of `path` not yet seen, outermost first.
    ///
    /// The returned directories are marked as seen.
    pub fn missing_ancestors(&mut self, path: &str) -> Vec<String> {
        let mut missing = Vec::new();
        for (idx, _) in path.match_indices('/') {
            let ancestor = &path[..idx];
            if !ancestor.is_empty() && self.seen.insert(ancestor.to_string()) {
                missing.push(ancestor.to_string());
            }
        }
        missing
    }

    /// Record an explicit directory entry. Returns `false` if it was already known.
    pub fn register_directory(&mut self, path: &str) -> bool {
        self.seen.insert(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_to_inner() {
        let mut reconciler = DirectoryReconciler::new();
        assert_eq!(reconciler.missing_ancestors("a/b/c/file.rs"), vec!["a", "a/b", "a/b/c"]);
    }

    #[test]
    fn test_each_directory_once() {
        let mut reconciler = DirectoryReconciler::new();
        assert_eq!(reconciler.missing_ancestors("a/b/x.rs"), vec!["a", "a/b"]);
        assert!(reconciler.missing_ancestors("a/b/y.rs").is_empty());
        assert_eq!(reconciler.missing_ancestors("a/c/z.rs"), vec!["a/c"]);
        assert!(!reconciler.register_directory("a/b"));
    }

    #[test]
    fn test_top_level_file_has_no_ancestors() {
        let mut reconciler = DirectoryReconciler::new();
        assert!(reconciler.missing_ancestors("README.md").is_empty());
        assert!(reconciler.register_directory("README.md"));
    }

    #[test]
    fn test_explicit_directories_are_not_synthesized() {
        let mut reconciler = DirectoryReconciler::new();
        assert!(reconciler.register_directory("a"));
        assert!(reconciler.register_directory("a/c"));
        assert!(!reconciler.register_directory("a"));

        assert_eq!(reconciler.missing_ancestors("a/c/d/e.txt"), vec!["a/c/d"]);
    }

    #[test]
    fn test_synthesized_then_explicit() {
        let mut reconciler = DirectoryReconciler::new();
        reconciler.missing_ancestors("a/b.txt");
        assert!(!reconciler.register_directory("a"));
    }
}
