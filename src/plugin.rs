//! Language parser plugins.
//!
//! The coordinator depends only on the [`Parser`] capability trait; concrete
//! parsers are looked up through a registry keyed by file extension. Real
//! grammar-aware parsers (tree-sitter and friends) live outside this crate
//! and register themselves the same way the built-in one does.

use crate::model::{Symbol, SymbolKind, SymbolReference};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// What a parser produces for one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedUnit {
    pub symbols: Vec<Symbol>,
    pub references: Vec<SymbolReference>,
}

/// A parse failure. Carries the underlying message; the coordinator turns it
/// into a per-file error result.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ParseFailure(pub String);

/// Capability interface for language parsers.
pub trait Parser: Send + Sync {
    /// Language name used for the `language` query filter.
    fn language(&self) -> &str;

    fn parse(&self, path: &Path, content: &[u8]) -> Result<ParsedUnit, ParseFailure>;
}

/// Registry resolving a file path to the parser for its language.
pub struct PluginRegistry {
    by_extension: HashMap<String, Arc<dyn Parser>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    /// Registry preloaded with the identifier parser for common source
    /// extensions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (language, extensions) in [
            ("rust", &["rs"][..]),
            ("python", &["py", "pyi"][..]),
            ("javascript", &["js", "mjs", "cjs"][..]),
            ("typescript", &["ts", "tsx", "jsx"][..]),
            ("go", &["go"][..]),
            ("c", &["c", "h"][..]),
            ("cpp", &["cpp", "cc", "cxx", "hpp", "hh"][..]),
            ("java", &["java"][..]),
            ("ruby", &["rb", "rake"][..]),
            ("shell", &["sh", "bash", "zsh"][..]),
        ] {
            registry.register(extensions, Arc::new(IdentifierParser::new(language)));
        }
        registry
    }

    pub fn register(&mut self, extensions: &[&str], parser: Arc<dyn Parser>) {
        for ext in extensions {
            self.by_extension
                .insert(ext.to_ascii_lowercase(), parser.clone());
        }
    }

    /// Returns the parser for the path's extension, or `None` when the
    /// language is unsupported.
    pub fn resolve(&self, path: &Path) -> Option<Arc<dyn Parser>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension.get(&ext).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Minimum identifier length worth recording.
const MIN_IDENT_LEN: usize = 2;

/// Identifiers longer than this are likely base64 or hex dumps.
const MAX_IDENT_LEN: usize = 128;

/// Lexical fallback parser: records identifiers that follow a definition
/// keyword as symbols and every other identifier as a reference. Good enough
/// to exercise the pipeline end to end; not a substitute for a grammar.
pub struct IdentifierParser {
    language: String,
}

impl IdentifierParser {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    fn keyword_kind(word: &str) -> Option<SymbolKind> {
        match word {
            "fn" | "def" | "func" | "function" | "defp" | "sub" => Some(SymbolKind::Function),
            "struct" | "enum" | "trait" | "class" | "interface" | "union" | "typedef"
            | "type" => Some(SymbolKind::Type),
            "const" | "static" | "final" => Some(SymbolKind::Constant),
            "let" | "var" => Some(SymbolKind::Variable),
            "mod" | "module" | "package" | "namespace" => Some(SymbolKind::Module),
            _ => None,
        }
    }
}

impl Parser for IdentifierParser {
    fn language(&self) -> &str {
        &self.language
    }

    fn parse(&self, _path: &Path, content: &[u8]) -> Result<ParsedUnit, ParseFailure> {
        let text = std::str::from_utf8(content)
            .map_err(|e| ParseFailure(format!("invalid utf-8: {e}")))?;

        let mut unit = ParsedUnit::default();

        for (line_idx, line) in text.lines().enumerate() {
            let line_no = (line_idx + 1) as u32;
            let mut pending_kind: Option<SymbolKind> = None;

            for (column, ident) in identifiers(line) {
                if ident.len() < MIN_IDENT_LEN || ident.len() > MAX_IDENT_LEN {
                    pending_kind = None;
                    continue;
                }

                if let Some(kind) = pending_kind.take() {
                    unit.symbols.push(Symbol {
                        name: ident.to_string(),
                        kind,
                        line: line_no,
                        column: column as u32,
                    });
                    continue;
                }

                if let Some(kind) = Self::keyword_kind(ident) {
                    pending_kind = Some(kind);
                } else {
                    unit.references.push(SymbolReference {
                        name: ident.to_string(),
                        line: line_no,
                    });
                }
            }
        }

        Ok(unit)
    }
}

/// Iterate `(byte_offset, identifier)` pairs in a line. Identifiers are
/// ASCII alphanumeric/underscore runs that don't start with a digit.
fn identifiers(line: &str) -> impl Iterator<Item = (usize, &str)> {
    let bytes = line.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() {
            let b = bytes[pos];
            if b.is_ascii_alphabetic() || b == b'_' {
                let start = pos;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                return Some((start, &line[start..pos]));
            }
            // Skip digit runs entirely so "0x1f" doesn't yield "x1f".
            if b.is_ascii_digit() {
                while pos < bytes.len() && bytes[pos].is_ascii_alphanumeric() {
                    pos += 1;
                }
            } else {
                pos += 1;
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(content: &str) -> ParsedUnit {
        IdentifierParser::new("rust")
            .parse(&PathBuf::from("test.rs"), content.as_bytes())
            .unwrap()
    }

    #[test]
    fn test_function_definition() {
        let unit = parse("fn parse_file(input: &str) -> Output {");
        assert_eq!(unit.symbols.len(), 1);
        assert_eq!(unit.symbols[0].name, "parse_file");
        assert_eq!(unit.symbols[0].kind, SymbolKind::Function);
        assert_eq!(unit.symbols[0].line, 1);
        assert!(unit.references.iter().any(|r| r.name == "Output"));
    }

    #[test]
    fn test_type_definitions() {
        let unit = parse("struct Config {}\nenum Mode { Fast }\n");
        let names: Vec<_> = unit.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Config", "Mode"]);
        assert!(unit.symbols.iter().all(|s| s.kind == SymbolKind::Type));
        assert_eq!(unit.symbols[1].line, 2);
    }

    #[test]
    fn test_invalid_utf8_is_parse_failure() {
        let parser = IdentifierParser::new("rust");
        let result = parser.parse(&PathBuf::from("bad.rs"), &[0xff, 0xfe, 0x00]);
        assert!(result.is_err());
    }

    #[test]
    fn test_registry_resolves_by_extension() {
        let registry = PluginRegistry::with_defaults();
        let parser = registry.resolve(&PathBuf::from("src/lib.rs")).unwrap();
        assert_eq!(parser.language(), "rust");
        assert!(registry.resolve(&PathBuf::from("image.png")).is_none());
        assert!(registry.resolve(&PathBuf::from("Makefile")).is_none());
    }

    #[test]
    fn test_identifiers_skip_numeric_prefixes() {
        let idents: Vec<_> = identifiers("let x2 = 0x1f + value;").collect();
        let names: Vec<_> = idents.iter().map(|(_, s)| *s).collect();
        assert_eq!(names, vec!["let", "x2", "value"]);
    }
}
