//! Inlining of externally referenced XML snippets
//!
//! An `edit-config` action may carry `config: file:<path>` instead of the
//! XML itself. At load time the file is read, minified and substituted so
//! that the resolved plan is self contained.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::plan::{Action, TestPlan};

/// Prefix marking a payload stored in a separate file
pub const FILE_PREFIX: &str = "file:";

/// Replace every `file:` reference in edit-config payloads with the minified
/// file contents. Each distinct reference is read once.
pub fn inline_snippets(plan: &mut TestPlan, base_dir: &Path) -> ConfigResult<()> {
    let mut snippets: HashMap<String, String> = HashMap::new();

    for block in &mut plan.blocks {
        for action in &mut block.actions {
            let Action::RemoteCall(call) = action else {
                continue;
            };
            if call.operation != "edit-config" {
                continue;
            }
            let Some(config) = call.config.as_mut() else {
                continue;
            };
            let Some(reference) = config.strip_prefix(FILE_PREFIX) else {
                continue;
            };

            let inline = match snippets.get(reference) {
                Some(inline) => inline.clone(),
                None => {
                    let path = resolve(base_dir, reference);
                    let raw = std::fs::read_to_string(&path)
                        .map_err(|source| ConfigError::SnippetError { path: path.clone(), source })?;
                    debug!("Inlined snippet {:?} ({} bytes)", path, raw.len());
                    let inline = minify_xml(&raw);
                    snippets.insert(reference.to_string(), inline.clone());
                    inline
                }
            };
            *config = inline;
        }
    }

    Ok(())
}

fn resolve(base_dir: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Strip the XML declaration and the indentation between elements
///
/// A line break between two elements disappears. Any other line break, such
/// as one inside a wrapped start tag or in text content, becomes one space.
pub fn minify_xml(raw: &str) -> String {
    let mut text = raw.trim();
    if text.starts_with("<?xml") {
        if let Some(end) = text.find("?>") {
            text = &text[end + 2..];
        }
    }

    let mut minified = String::with_capacity(text.len());
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !minified.is_empty() && !(minified.ends_with('>') && line.starts_with('<')) {
            minified.push(' ');
        }
        minified.push_str(line);
    }
    minified
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minify_xml() {
        let raw = r#"<?xml version="1.0" encoding="UTF-8"?>
<interfaces xmlns="urn:example">
    <interface>
        <name>eth0</name>
    </interface>
</interfaces>
"#;
        assert_eq!(
            minify_xml(raw),
            r#"<interfaces xmlns="urn:example"><interface><name>eth0</name></interface></interfaces>"#
        );
    }

    #[test]
    fn test_minify_without_declaration() {
        assert_eq!(minify_xml("  <a>\n  <b/>\n</a>  "), "<a><b/></a>");
    }

    #[test]
    fn test_minify_keeps_wrapped_tags_and_text_apart() {
        let raw = "<interface\n    xmlns=\"urn:example\"\n    operation=\"merge\">\n  <description>uplink to\n  core</description>\n</interface>";
        assert_eq!(
            minify_xml(raw),
            r#"<interface xmlns="urn:example" operation="merge"><description>uplink to core</description></interface>"#
        );
    }

    #[test]
    fn test_inline_relative_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("snippet.xml")).unwrap();
        writeln!(file, "<top>\n  <leaf>1</leaf>\n</top>").unwrap();

        let yaml = r#"
clients: 1
configs:
  - hostname: h
    username: u
    password: p
blocks:
  - type: sequential
    actions:
      - netconf:
          hostname: h
          operation: edit-config
          config: file:snippet.xml
      - netconf:
          hostname: h
          operation: get-config
          config: file:ignored.xml
"#;
        let plan = TestPlan::parse_with_base(yaml, dir.path()).unwrap();
        match &plan.blocks[0].actions[0] {
            Action::RemoteCall(call) => {
                assert_eq!(call.config.as_deref(), Some("<top><leaf>1</leaf></top>"))
            }
            other => panic!("expected a remote call, got {:?}", other),
        }
        // only edit-config payloads are resolved
        match &plan.blocks[0].actions[1] {
            Action::RemoteCall(call) => assert_eq!(call.config.as_deref(), Some("file:ignored.xml")),
            other => panic!("expected a remote call, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_snippet_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
clients: 1
configs:
  - hostname: h
    username: u
    password: p
blocks:
  - type: sequential
    actions:
      - netconf:
          hostname: h
          operation: edit-config
          config: file:missing.xml
"#;
        let err = TestPlan::parse_with_base(yaml, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::SnippetError { .. }));
    }
}
