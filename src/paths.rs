//! Path rewriting across the environment boundary.
//!
//! The agent sees the repository at one mount point while the executor
//! runs tools against another. Every path-carrying parameter crosses
//! this boundary, so the mapping must be exact, normalising, and
//! invertible for any path under the configured prefix.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where SWE-bench images bake the repository checkout.
pub const DEFAULT_SOURCE_PREFIX: &str = "/testbed";
/// Where the shared workspace volume mounts the same checkout.
pub const DEFAULT_TARGET_PREFIX: &str = "/workspace/repo";

static ARGS_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<path>([^<]*)</path>").expect("args path regex should compile"));

/// Bidirectional prefix rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapper {
    source_prefix: String,
    target_prefix: String,
}

impl Default for PathMapper {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_PREFIX, DEFAULT_TARGET_PREFIX)
    }
}

impl PathMapper {
    /// Create a mapper with trailing slashes stripped from both prefixes.
    pub fn new(source_prefix: &str, target_prefix: &str) -> Self {
        Self {
            source_prefix: source_prefix.trim_end_matches('/').to_string(),
            target_prefix: target_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn source_prefix(&self) -> &str {
        &self.source_prefix
    }

    pub fn target_prefix(&self) -> &str {
        &self.target_prefix
    }

    /// Rewrite a source-side path into the target namespace.
    ///
    /// The rewrite fires iff the normalised path equals the source
    /// prefix or starts with it plus a separator; anything else passes
    /// through unchanged.
    pub fn map_source_to_target(&self, path: &str) -> String {
        remap(path, &self.source_prefix, &self.target_prefix)
    }

    /// Exact inverse of [`map_source_to_target`](Self::map_source_to_target).
    pub fn map_target_to_source(&self, path: &str) -> String {
        remap(path, &self.target_prefix, &self.source_prefix)
    }

    /// Rewrite `<path>...</path>` spans inside an opaque XML-like
    /// `args` payload. No other XML parsing is performed; the enclosing
    /// system owns the full syntax.
    pub fn map_args_source_to_target(&self, args: &str) -> String {
        ARGS_PATH_RE
            .replace_all(args, |caps: &regex::Captures<'_>| {
                format!("<path>{}</path>", self.map_source_to_target(&caps[1]))
            })
            .into_owned()
    }
}

fn remap(path: &str, from: &str, to: &str) -> String {
    let normalized = normalize_posix(path);
    if normalized == from {
        to.to_string()
    } else if let Some(rest) = normalized.strip_prefix(from) {
        if rest.starts_with('/') {
            format!("{}{}", to, rest)
        } else {
            path.to_string()
        }
    } else {
        path.to_string()
    }
}

/// Collapse `.`, `..`, and duplicate separators, POSIX style.
///
/// `..` at the root of an absolute path is dropped; relative paths keep
/// leading `..` components since there is nothing to pop.
pub fn normalize_posix(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if let Some(last) = stack.last() {
                    if *last != ".." {
                        stack.pop();
                        continue;
                    }
                }
                if !absolute {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }
    if absolute {
        format!("/{}", stack.join("/"))
    } else if stack.is_empty() {
        ".".to_string()
    } else {
        stack.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_posix() {
        assert_eq!(normalize_posix("/testbed//a/./b"), "/testbed/a/b");
        assert_eq!(normalize_posix("/testbed/a/../b"), "/testbed/b");
        assert_eq!(normalize_posix("/../a"), "/a");
        assert_eq!(normalize_posix("a/./b/.."), "a");
        assert_eq!(normalize_posix("../a"), "../a");
        assert_eq!(normalize_posix("/"), "/");
        assert_eq!(normalize_posix(""), "");
    }

    #[test]
    fn test_map_source_to_target() {
        let mapper = PathMapper::default();
        assert_eq!(
            mapper.map_source_to_target("/testbed/django/urls/resolvers.py"),
            "/workspace/repo/django/urls/resolvers.py"
        );
        assert_eq!(mapper.map_source_to_target("/testbed"), "/workspace/repo");
    }

    #[test]
    fn test_unrelated_path_passes_through() {
        let mapper = PathMapper::default();
        assert_eq!(mapper.map_source_to_target("/home/u/f.py"), "/home/u/f.py");
        // Prefix must match on a whole segment, not a substring.
        assert_eq!(
            mapper.map_source_to_target("/testbed2/f.py"),
            "/testbed2/f.py"
        );
    }

    #[test]
    fn test_normalisation_applies_before_matching() {
        let mapper = PathMapper::default();
        assert_eq!(
            mapper.map_source_to_target("/testbed//pkg/./mod.py"),
            "/workspace/repo/pkg/mod.py"
        );
        assert_eq!(
            mapper.map_source_to_target("/testbed/a/../b.py"),
            "/workspace/repo/b.py"
        );
    }

    #[test]
    fn test_inverse_roundtrip() {
        let mapper = PathMapper::default();
        for p in [
            "/testbed",
            "/testbed/a.py",
            "/testbed/deep/nested/dir/file.c",
        ] {
            assert_eq!(
                mapper.map_target_to_source(&mapper.map_source_to_target(p)),
                p
            );
        }
    }

    #[test]
    fn test_mapping_is_idempotent() {
        let mapper = PathMapper::default();
        let once = mapper.map_source_to_target("/testbed/x/y.py");
        assert_eq!(mapper.map_source_to_target(&once), once);
    }

    #[test]
    fn test_args_rewrite() {
        let mapper = PathMapper::default();
        let args = "<file><path>/testbed/a.py</path><line>3</line></file>\
                    <file><path>/etc/hosts</path></file>";
        assert_eq!(
            mapper.map_args_source_to_target(args),
            "<file><path>/workspace/repo/a.py</path><line>3</line></file>\
             <file><path>/etc/hosts</path></file>"
        );
    }

    #[test]
    fn test_custom_prefixes() {
        let mapper = PathMapper::new("/repo/", "/mnt/work");
        assert_eq!(mapper.map_source_to_target("/repo/x"), "/mnt/work/x");
        assert_eq!(mapper.map_target_to_source("/mnt/work/x"), "/repo/x");
    }
}
