//! Legacy import-directive rewriting
//!
//! Older scripts embed `<import resource="...">` directives instead of
//! calling the import function. Before compilation these directives are
//! rewritten textually into `importScript(...)` calls. Three legacy forms
//! are supported, rewritten in a fixed order so the more specific patterns
//! claim their matches before the catch-all hierarchical form:
//! classpath-prefixed, store-reference (`scheme://store/id`), then
//! absolute hierarchical name path.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

static CLASSPATH_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<import(\s|\n)+resource(\s|\n)*=(\s|\n)*"classpath:(/)?(?P<path>[^"]+)"(\s|\n)*(/)?>"#)
        .expect("valid regex")
});

static NODE_REF_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<import(\s|\n)+resource(\s|\n)*=(\s|\n)*"(?P<node>[^:"]+://[^/"]+/[^"]+)"(\s|\n)*(/)?>"#)
        .expect("valid regex")
});

static LEGACY_NAME_PATH_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<import(\s|\n)+resource(\s|\n)*=(\s|\n)*"(?P<path>/[^"]+)"(\s|\n)*(/)?>"#)
        .expect("valid regex")
});

/// Rewrite all legacy import directives in `source` into import-function
/// calls. Sources without directives pass through unchanged.
pub fn rewrite_import_directives(source: &str) -> String {
    if !source.contains("<import") {
        return source.to_string();
    }
    let classpath_resolved =
        CLASSPATH_IMPORT.replace_all(source, r#"importScript("classpath", "/${path}", true);"#);
    let node_resolved =
        NODE_REF_IMPORT.replace_all(&classpath_resolved, r#"importScript("node", "${node}", true);"#);
    let resolved = LEGACY_NAME_PATH_IMPORT
        .replace_all(&node_resolved, r#"importScript("legacyNamePath", "${path}", true);"#);
    trace!(
        directives = resolved != source,
        "rewrote legacy import directives"
    );
    resolved.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classpath_directive() {
        let source = r#"<import resource="classpath:scripts/util.js">
main();"#;
        let rewritten = rewrite_import_directives(source);
        assert!(rewritten.starts_with(r#"importScript("classpath", "/scripts/util.js", true);"#));
        assert!(rewritten.ends_with("main();"));
    }

    #[test]
    fn test_classpath_directive_with_leading_slash() {
        let source = r#"<import resource="classpath:/scripts/util.js"/>"#;
        assert_eq!(
            rewrite_import_directives(source),
            r#"importScript("classpath", "/scripts/util.js", true);"#
        );
    }

    #[test]
    fn test_node_reference_directive() {
        let source = r#"<import resource="workspace://SpacesStore/0000-1111-2222"/>"#;
        assert_eq!(
            rewrite_import_directives(source),
            r#"importScript("node", "workspace://SpacesStore/0000-1111-2222", true);"#
        );
    }

    #[test]
    fn test_legacy_name_path_directive() {
        let source = r#"<import resource="/Company/Scripts/cleanup.js">"#;
        assert_eq!(
            rewrite_import_directives(source),
            r#"importScript("legacyNamePath", "/Company/Scripts/cleanup.js", true);"#
        );
    }

    #[test]
    fn test_rewrite_order_prefers_specific_schemes() {
        // a node reference also matches the name-path shape once the more
        // specific pass is skipped; order keeps it a node import
        let source = r#"<import resource="classpath:a.js"/>
<import resource="store://s/node-1"/>
<import resource="/legacy/b.js"/>"#;
        let rewritten = rewrite_import_directives(source);
        assert!(rewritten.contains(r#"importScript("classpath", "/a.js", true);"#));
        assert!(rewritten.contains(r#"importScript("node", "store://s/node-1", true);"#));
        assert!(rewritten.contains(r#"importScript("legacyNamePath", "/legacy/b.js", true);"#));
    }

    #[test]
    fn test_directive_with_whitespace_and_newlines() {
        let source = "<import\n  resource = \"classpath:x.js\" />";
        assert_eq!(
            rewrite_import_directives(source),
            r#"importScript("classpath", "/x.js", true);"#
        );
    }

    #[test]
    fn test_source_without_directives_unchanged() {
        let source = "var x = 1; // <not an import>";
        assert_eq!(rewrite_import_directives(source), source);
    }
}
