//! Local context assembly. The Tree-sitter AST slicer, graph store, and
//! DLP/secret scanner that would populate this in production are out of
//! scope here — this builder is the interface they are consumed
//! through, returning a minimal, fully-specified `ContextPayload` for
//! whatever file list the caller already resolved.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::{CodeSlice, ContextPayload, RedactionReport};

pub struct ContextBuilder;

impl ContextBuilder {
    /// Builds a context payload from already-read file contents. Secret
    /// redaction is a pass-through stub: callers needing real DLP wire a
    /// `RedactionReport` in from an external scanner before this point.
    pub fn build(request_id: Uuid, repo_root: &str, files: &[(String, String)]) -> ContextPayload {
        let code_context: Vec<CodeSlice> = files
            .iter()
            .map(|(path, content)| CodeSlice {
                path: path.clone(),
                content: content.clone(),
                language: language_for(path),
            })
            .collect();

        let repo_fingerprint = fingerprint_paths(repo_root, files);

        ContextPayload {
            request_id,
            code_context,
            redaction: RedactionReport::default(),
            repo_fingerprint,
        }
    }
}

fn language_for(path: &str) -> String {
    match path.rsplit('.').next() {
        Some("rs") => "rust",
        Some("py") => "python",
        Some("js") | Some("mjs") => "javascript",
        Some("ts") => "typescript",
        _ => "text",
    }
    .to_string()
}

fn fingerprint_paths(repo_root: &str, files: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_root.as_bytes());
    let mut sorted: Vec<&(String, String)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (path, content) in sorted {
        hasher.update(path.as_bytes());
        hasher.update(content.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_inferred_from_extension() {
        assert_eq!(language_for("src/main.rs"), "rust");
        assert_eq!(language_for("script.py"), "python");
        assert_eq!(language_for("Makefile"), "text");
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_input_order() {
        let a = fingerprint_paths("/repo", &[("b.rs".into(), "1".into()), ("a.rs".into(), "2".into())]);
        let b = fingerprint_paths("/repo", &[("a.rs".into(), "2".into()), ("b.rs".into(), "1".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn build_produces_one_slice_per_file() {
        let payload = ContextBuilder::build(
            Uuid::nil(),
            "/repo",
            &[("src/lib.rs".into(), "pub fn x() {}".into())],
        );
        assert_eq!(payload.code_context.len(), 1);
        assert_eq!(payload.code_context[0].language, "rust");
    }
}
