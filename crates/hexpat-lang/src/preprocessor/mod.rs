// Preprocessor: #include, #define, #pragma and conditional directives
//
// Works line by line on comment-stripped text. Every directive line becomes an
// empty line in the output and included files are folded onto the line of their
// #include, so line numbers in the output match the outermost source.

pub mod pragma;

use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::PreprocessError;
pub use pragma::{PragmaHandler, PragmaRegistry, Pragmas};

const MAX_INCLUDE_DEPTH: usize = 64;

/// Result of preprocessing
#[derive(Debug, Clone)]
pub struct PreprocessResult {
    pub source: String,
    pub pragmas: Pragmas,
}

/// Resolves `#include` paths to file contents
pub trait IncludeResolver {
    fn resolve(&self, path: &str, is_system: bool) -> Option<String>;
}

/// Resolver that rejects every include
pub struct NoopResolver;

impl IncludeResolver for NoopResolver {
    fn resolve(&self, _path: &str, _is_system: bool) -> Option<String> {
        None
    }
}

/// In-memory resolver keyed by include path
#[derive(Default)]
pub struct MapResolver {
    files: FxHashMap<String, String>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

impl IncludeResolver for MapResolver {
    fn resolve(&self, path: &str, _is_system: bool) -> Option<String> {
        self.files.get(path).cloned()
    }
}

/// Resolver that searches a list of include roots on disk
#[derive(Debug, Clone, Default)]
pub struct FsResolver {
    roots: Vec<PathBuf>,
}

impl FsResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl IncludeResolver for FsResolver {
    fn resolve(&self, path: &str, _is_system: bool) -> Option<String> {
        let requested = Path::new(path);
        if requested.is_absolute() {
            return std::fs::read_to_string(requested).ok();
        }
        self.roots
            .iter()
            .find_map(|root| std::fs::read_to_string(root.join(requested)).ok())
    }
}

#[derive(Debug, Clone, Copy)]
struct IfState {
    active: bool,
    seen_true: bool,
    else_seen: bool,
    line: u32,
}

/// Textual preprocessor. One instance handles one run.
pub struct Preprocessor<'a> {
    defines: FxHashMap<String, String>,
    /// Include paths that declared `#pragma once`
    once: FxHashSet<String>,
    include_stack: Vec<String>,
    resolver: &'a dyn IncludeResolver,
    handlers: &'a PragmaRegistry,
    pragmas: Pragmas,
}

impl<'a> Preprocessor<'a> {
    pub fn new(resolver: &'a dyn IncludeResolver, handlers: &'a PragmaRegistry) -> Self {
        Self {
            defines: FxHashMap::default(),
            once: FxHashSet::default(),
            include_stack: Vec::new(),
            resolver,
            handlers,
            pragmas: Pragmas::default(),
        }
    }

    /// Predefine a macro before processing
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(name.into(), value.into());
    }

    pub fn process(mut self, source: &str) -> Result<PreprocessResult, PreprocessError> {
        let source = self.process_source(source, 0)?;
        tracing::debug!(
            pragmas = self.pragmas.len(),
            defines = self.defines.len(),
            "preprocessing finished"
        );
        Ok(PreprocessResult {
            source,
            pragmas: self.pragmas,
        })
    }

    fn process_source(&mut self, source: &str, depth: usize) -> Result<String, PreprocessError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(PreprocessError::new(
                format!("include depth exceeded (max {})", MAX_INCLUDE_DEPTH),
                0,
            ));
        }

        let stripped = strip_comments(source);
        let mut output = String::with_capacity(stripped.len());
        let mut if_stack: Vec<IfState> = Vec::new();

        for (idx, line) in stripped.split('\n').enumerate() {
            let line_num = idx as u32 + 1;
            if idx > 0 {
                output.push('\n');
            }
            let active = if_stack.iter().all(|s| s.active);

            let Some(directive) = line.trim_start().strip_prefix('#') else {
                if active {
                    output.push_str(&self.expand_macros(line));
                }
                continue;
            };

            let directive = directive.trim();
            let name_len = directive
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .count();
            let (name, rest) = directive.split_at(name_len);
            let rest = rest.trim();

            match name {
                "ifdef" | "ifndef" => {
                    let condition = if active {
                        let defined = self.defines.contains_key(rest);
                        if name == "ifdef" {
                            defined
                        } else {
                            !defined
                        }
                    } else {
                        false
                    };
                    if_stack.push(IfState {
                        active: condition,
                        // A nested conditional in a dead region never activates its #else
                        seen_true: condition || !active,
                        else_seen: false,
                        line: line_num,
                    });
                }
                "else" => {
                    let Some(last_idx) = if_stack.len().checked_sub(1) else {
                        return Err(PreprocessError::new(
                            "#else without matching #ifdef/#ifndef",
                            line_num,
                        ));
                    };
                    if if_stack[last_idx].else_seen {
                        return Err(PreprocessError::new("duplicate #else", line_num));
                    }
                    let state = &mut if_stack[last_idx];
                    state.else_seen = true;
                    state.active = !state.seen_true;
                }
                "endif" => {
                    if if_stack.pop().is_none() {
                        return Err(PreprocessError::new(
                            "#endif without matching #ifdef/#ifndef",
                            line_num,
                        ));
                    }
                }
                _ if !active => {}
                "define" => self.process_define(rest, line_num)?,
                "undef" => {
                    if rest.is_empty() {
                        return Err(PreprocessError::new("#undef requires a name", line_num));
                    }
                    self.defines.remove(rest);
                }
                "include" => {
                    let included = self.process_include(rest, line_num, depth)?;
                    output.push_str(&included);
                }
                "pragma" => self.process_pragma(rest, line_num)?,
                _ => {
                    return Err(PreprocessError::new(
                        format!("unknown preprocessor directive '#{}'", directive),
                        line_num,
                    ));
                }
            }
        }

        if let Some(open) = if_stack.first() {
            return Err(PreprocessError::new(
                "unterminated #ifdef/#ifndef, missing #endif",
                open.line,
            ));
        }

        Ok(output)
    }

    fn process_define(&mut self, rest: &str, line_num: u32) -> Result<(), PreprocessError> {
        let name_len = rest
            .bytes()
            .take_while(|b| is_ident_char(*b))
            .count();
        let (name, value) = rest.split_at(name_len);
        if name.is_empty() || name.as_bytes()[0].is_ascii_digit() {
            return Err(PreprocessError::new("#define requires a valid name", line_num));
        }
        if value.starts_with('(') {
            return Err(PreprocessError::new(
                "function-like macros are not supported",
                line_num,
            ));
        }
        self.defines
            .insert(name.to_string(), value.trim().to_string());
        Ok(())
    }

    fn process_include(
        &mut self,
        rest: &str,
        line_num: u32,
        depth: usize,
    ) -> Result<String, PreprocessError> {
        let (path, is_system) = match rest.as_bytes().first() {
            Some(b'"') => match rest[1..].find('"') {
                Some(end) => (&rest[1..1 + end], false),
                None => {
                    return Err(PreprocessError::new(
                        "missing terminating '\"' character",
                        line_num,
                    ));
                }
            },
            Some(b'<') => match rest[1..].find('>') {
                Some(end) => (&rest[1..1 + end], true),
                None => {
                    return Err(PreprocessError::new(
                        "missing terminating '>' character",
                        line_num,
                    ));
                }
            },
            _ => {
                return Err(PreprocessError::new(
                    "expected '<' or '\"' before file name",
                    line_num,
                ));
            }
        };

        if self.once.contains(path) {
            return Ok(String::new());
        }
        if self.include_stack.iter().any(|p| p == path) {
            return Err(PreprocessError::new(
                format!("circular include of '{}'", path),
                line_num,
            ));
        }
        let Some(content) = self.resolver.resolve(path, is_system) else {
            return Err(PreprocessError::new(
                format!("{}: No such file or directory", path),
                line_num,
            ));
        };

        self.include_stack.push(path.to_string());
        let result = self.process_source(&content, depth + 1);
        self.include_stack.pop();

        // Errors inside the include are reported on the #include line
        let expanded = result.map_err(|e| {
            PreprocessError::new(format!("in '{}': {}", path, e.message), line_num)
        })?;
        Ok(expanded.replace(['\n', '\r'], " "))
    }

    fn process_pragma(&mut self, rest: &str, line_num: u32) -> Result<(), PreprocessError> {
        let key_len = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        let (key, value) = rest.split_at(key_len);
        let value = value.trim();
        if key.is_empty() {
            return Err(PreprocessError::new(
                "no instruction given in #pragma directive",
                line_num,
            ));
        }

        if key == "once" {
            if let Some(current) = self.include_stack.last() {
                self.once.insert(current.clone());
            }
            self.pragmas.push(key, value, line_num);
            return Ok(());
        }

        if value.is_empty() {
            return Err(PreprocessError::new(
                "missing value in #pragma directive",
                line_num,
            ));
        }

        let accepted = match self.handlers.get(key) {
            Some(handler) => handler(value),
            None => match pragma::validate_builtin(key, value) {
                Some(accepted) => accepted,
                None => {
                    return Err(PreprocessError::new(
                        format!("no #pragma handler registered for type {}", key),
                        line_num,
                    ));
                }
            },
        };
        if !accepted {
            return Err(PreprocessError::new(
                format!("invalid value provided to '{}' #pragma directive", key),
                line_num,
            ));
        }

        self.pragmas.push(key, value, line_num);
        Ok(())
    }

    /// Replace whole-word macro occurrences outside of string and char literals.
    fn expand_macros(&self, line: &str) -> String {
        if self.defines.is_empty() {
            return line.to_string();
        }
        let mut expanding = Vec::new();
        self.expand_with(line, &mut expanding)
    }

    fn expand_with<'s>(&'s self, text: &str, expanding: &mut Vec<&'s str>) -> String {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'"' || (b == b'\'' && !(i > 0 && bytes[i - 1].is_ascii_alphanumeric())) {
                let end = literal_end(bytes, i);
                out.push_str(&text[i..end]);
                i = end;
            } else if is_ident_char(b) && !b.is_ascii_digit() {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                let word = &text[start..i];
                match self.defines.get_key_value(word) {
                    Some((name, value)) if !expanding.contains(&name.as_str()) => {
                        expanding.push(name.as_str());
                        out.push_str(&self.expand_with(value, expanding));
                        expanding.pop();
                    }
                    _ => out.push_str(word),
                }
            } else if b.is_ascii_digit() {
                // Skip numeric literals so suffixes are never treated as macro names
                let start = i;
                while i < bytes.len() && (is_ident_char(bytes[i]) || bytes[i] == b'\'') {
                    i += 1;
                }
                out.push_str(&text[start..i]);
            } else {
                let ch_len = text[i..].chars().next().map_or(1, char::len_utf8);
                out.push_str(&text[i..i + ch_len]);
                i += ch_len;
            }
        }
        out
    }
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// End index (exclusive) of the string or char literal starting at `start`.
/// Unterminated literals end at the line break.
fn literal_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Remove `//` and `/* */` comments, keeping line breaks so line numbers survive.
/// An unterminated block comment is left in place for the lexer to report.
fn strip_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut copied_from = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' || (b == b'\'' && !(i > 0 && bytes[i - 1].is_ascii_alphanumeric())) {
            i = literal_end(bytes, i);
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            out.push_str(&source[copied_from..i]);
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            copied_from = i;
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let Some(close) = source[i + 2..].find("*/") else {
                break;
            };
            out.push_str(&source[copied_from..i]);
            let end = i + 2 + close + 2;
            let newlines = source[i..end].matches('\n').count();
            for _ in 0..newlines {
                out.push('\n');
            }
            i = end;
            copied_from = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&source[copied_from..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn preprocess(source: &str) -> PreprocessResult {
        let handlers = PragmaRegistry::new();
        Preprocessor::new(&NoopResolver, &handlers)
            .process(source)
            .expect("preprocessing failed")
    }

    fn preprocess_with(source: &str, resolver: &dyn IncludeResolver) -> Result<PreprocessResult, PreprocessError> {
        let handlers = PragmaRegistry::new();
        Preprocessor::new(resolver, &handlers).process(source)
    }

    fn preprocess_err(source: &str) -> PreprocessError {
        preprocess_with(source, &NoopResolver).expect_err("expected a preprocessing error")
    }

    #[test]
    fn test_define_whole_word() {
        let out = preprocess("#define SIZE 4\nu8 data[SIZE];\nu8 SIZE_X;");
        assert_eq!(out.source, "\nu8 data[4];\nu8 SIZE_X;");
    }

    #[test]
    fn test_predefined_macro() {
        let handlers = PragmaRegistry::new();
        let mut preprocessor = Preprocessor::new(&NoopResolver, &handlers);
        preprocessor.define("COUNT", "3");
        let out = preprocessor.process("#ifdef COUNT\nu8 a[COUNT];\n#endif").unwrap();
        assert_eq!(out.source, "\nu8 a[3];\n");
    }

    #[test]
    fn test_define_not_expanded_in_strings() {
        let out = preprocess("#define NAME x\nstd::print(\"NAME\", NAME);");
        assert_eq!(out.source, "\nstd::print(\"NAME\", x);");
    }

    #[test]
    fn test_define_chained_and_self_referential() {
        let out = preprocess("#define A B\n#define B 7\n#define C C\nA C");
        assert_eq!(out.source, "\n\n\n7 C");
    }

    #[test]
    fn test_function_like_macro_rejected() {
        let err = preprocess_err("#define F(x) x");
        assert!(err.message.contains("function-like"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_ifdef_else_endif() {
        let out = preprocess("#define X\n#ifdef X\na\n#else\nb\n#endif\n#ifndef X\nc\n#endif");
        assert_eq!(out.source, "\n\na\n\n\n\n\n\n");
    }

    #[test]
    fn test_nested_ifdef_in_dead_region() {
        let out = preprocess("#ifdef A\n#ifdef B\nx\n#else\ny\n#endif\n#endif\nz");
        assert_eq!(out.source, "\n\n\n\n\n\n\nz");
    }

    #[test]
    fn test_unterminated_ifdef() {
        let err = preprocess_err("u8 a;\n#ifdef A\nb");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("#endif"));
    }

    #[test]
    fn test_stray_endif() {
        let err = preprocess_err("#endif");
        assert!(err.message.contains("without matching"));
    }

    #[test]
    fn test_unknown_directive() {
        let err = preprocess_err("u8 a;\n#frobnicate");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unknown preprocessor directive"));
    }

    #[test]
    fn test_directives_in_comments_are_ignored() {
        let out = preprocess("// #frobnicate\n/* #include \"x\"\n */u8 a;");
        assert_eq!(out.source, "\n\nu8 a;");
    }

    #[test]
    fn test_include_folds_lines() {
        let mut resolver = MapResolver::new();
        resolver.add("types.pat", "struct A {\n u8 x;\n};");
        let out = preprocess_with("#include \"types.pat\"\nA a @ 0;", &resolver).unwrap();
        assert_eq!(out.source, "struct A {  u8 x; };\nA a @ 0;");
    }

    #[test]
    fn test_system_include() {
        let mut resolver = MapResolver::new();
        resolver.add("std/io.pat", "fn f() {};");
        let out = preprocess_with("#include <std/io.pat>", &resolver).unwrap();
        assert_eq!(out.source, "fn f() {};");
    }

    #[test]
    fn test_missing_include() {
        let err = preprocess_err("\n#include \"nope.pat\"");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("No such file"));
    }

    #[test]
    fn test_unterminated_include_path() {
        let err = preprocess_err("#include \"nope.pat");
        assert!(err.message.contains("missing terminating"));
    }

    #[test]
    fn test_pragma_once_skips_second_include() {
        let mut resolver = MapResolver::new();
        resolver.add("a.pat", "#pragma once\nu8 x;");
        let out = preprocess_with("#include \"a.pat\"\n#include \"a.pat\"", &resolver).unwrap();
        assert_eq!(out.source, " u8 x;\n");
    }

    #[test]
    fn test_self_include_broken_by_once() {
        let mut resolver = MapResolver::new();
        resolver.add("self.pat", "#pragma once\n#include \"self.pat\"\nu8 y;");
        let out = preprocess_with("#include \"self.pat\"", &resolver).unwrap();
        assert_eq!(out.source, "  u8 y;");
    }

    #[test]
    fn test_circular_include() {
        let mut resolver = MapResolver::new();
        resolver.add("a.pat", "#include \"b.pat\"");
        resolver.add("b.pat", "#include \"a.pat\"");
        let err = preprocess_with("\n\n#include \"a.pat\"", &resolver).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("circular include"), "{}", err.message);
    }

    #[test]
    fn test_pragmas_are_recorded() {
        let out = preprocess("#pragma endian big\n#pragma MIME application/x-test\n#pragma MIME text/plain");
        assert_eq!(out.pragmas.get("endian"), Some("big"));
        let mimes: Vec<&str> = out.pragmas.get_all("MIME").collect();
        assert_eq!(mimes, vec!["application/x-test", "text/plain"]);
        assert_eq!(out.source, "\n\n");
    }

    #[test]
    fn test_invalid_builtin_pragma_value() {
        let err = preprocess_err("#pragma endian middle");
        assert!(err.message.contains("invalid value provided to 'endian'"));
        let err = preprocess_err("#pragma eval_depth 0");
        assert!(err.message.contains("invalid value"));
    }

    #[test]
    fn test_unhandled_pragma() {
        let err = preprocess_err("\n#pragma frobnicate yes");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("no #pragma handler registered"));
    }

    #[test]
    fn test_pragma_missing_value() {
        let err = preprocess_err("#pragma endian");
        assert!(err.message.contains("missing value"));
    }

    #[test]
    fn test_custom_pragma_handler_called_per_occurrence() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut handlers = PragmaRegistry::new();
        handlers.add("author", move |value: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
            value != "nobody"
        });
        let out = Preprocessor::new(&NoopResolver, &handlers)
            .process("#pragma author me\n#pragma author you")
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.pragmas.get_all("author").count(), 2);

        let err = Preprocessor::new(&NoopResolver, &handlers)
            .process("#pragma author nobody")
            .unwrap_err();
        assert!(err.message.contains("invalid value provided to 'author'"));
    }

    #[test]
    fn test_idempotent_on_expanded_output() {
        let mut resolver = MapResolver::new();
        resolver.add("a.pat", "#pragma once\n// header\nstruct A { u8 x; };");
        let source = "#include \"a.pat\"\n#define N 3\n/* c */ A a[N] @ 0x00; // tail\n";
        let first = preprocess_with(source, &resolver).unwrap().source;
        let second = preprocess_with(&first, &resolver).unwrap().source;
        assert_eq!(first, second);
    }

    #[test]
    fn test_unterminated_block_comment_left_for_lexer() {
        let out = preprocess("u8 a;\n/* open");
        assert_eq!(out.source, "u8 a;\n/* open");
    }
}
