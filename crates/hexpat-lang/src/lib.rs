// ImHex pattern language runtime: preprocessor, parser, validator and evaluator

pub mod error;
pub mod eval;
pub mod lexer;
pub mod name;
pub mod parser;
pub mod preprocessor;
pub mod span;
pub mod stdlib;
pub mod validator;

pub use name::{Name, StringInterner};

// Re-export key types for public API
pub use error::{Error, ErrorKind, RunError};
pub use eval::console::{Console, Level, LogEntry};
pub use eval::function::{FunctionContext, FunctionRegistry, ParameterCount};
pub use eval::pattern::{parent_of, EnumEntry, Pattern, PatternKind, PALETTE};
pub use eval::provider::{ByteProvider, MemoryProvider, RebasedProvider, SliceProvider};
pub use eval::value::Value;
pub use eval::{Evaluator, Limits};
pub use parser::ast::{Ast, Endianness};
pub use preprocessor::{FsResolver, IncludeResolver, MapResolver, NoopResolver, PragmaRegistry, Pragmas};

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use lexer::Lexer;
use parser::Parser;
use preprocessor::pragma::parse_pragma_int;
use preprocessor::Preprocessor;

/// Per-run configuration. Pragmas in the source override the matching fields.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub recursion_limit: u32,
    pub array_limit: u64,
    pub pattern_limit: u64,
    pub loop_limit: u64,
    pub default_endian: Endianness,
    /// Offset from the base address where reading starts
    pub start_offset: u64,
    /// Cancellation token; the run stops with an `Interrupted` error once it is set
    pub cancellation_token: Option<Arc<AtomicBool>>,
    /// Values for `in` variables
    pub in_variables: FxHashMap<String, Value>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            recursion_limit: limits.recursion,
            array_limit: limits.array,
            pattern_limit: limits.pattern,
            loop_limit: limits.loops,
            default_endian: Endianness::native(),
            start_offset: 0,
            cancellation_token: None,
            in_variables: FxHashMap::default(),
        }
    }
}

impl EvalOptions {
    /// Apply `#pragma` overrides recorded by the preprocessor
    fn with_pragmas(&self, pragmas: &Pragmas) -> Self {
        let mut options = self.clone();
        match pragmas.get("endian") {
            Some("big") => options.default_endian = Endianness::Big,
            Some("little") => options.default_endian = Endianness::Little,
            Some("native") => options.default_endian = Endianness::native(),
            _ => {}
        }
        let int = |key: &str| pragmas.get(key).and_then(parse_pragma_int);
        if let Some(v) = int("eval_depth") {
            options.recursion_limit = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = int("array_limit") {
            options.array_limit = u64::try_from(v).unwrap_or(u64::MAX);
        }
        if let Some(v) = int("pattern_limit") {
            options.pattern_limit = u64::try_from(v).unwrap_or(u64::MAX);
        }
        if let Some(v) = int("loop_limit") {
            options.loop_limit = u64::try_from(v).unwrap_or(u64::MAX);
        }
        options
    }

    fn limits(&self) -> Limits {
        Limits {
            recursion: self.recursion_limit,
            array: self.array_limit,
            pattern: self.pattern_limit,
            loops: self.loop_limit,
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Top-level patterns in placement order
    pub patterns: Vec<Pattern>,
    pub console: Vec<LogEntry>,
    /// Final values of `out` variables, in declaration order
    pub out_variables: Vec<(String, Value)>,
    /// Return value of `main()`, when the program defines it
    pub main_result: Option<Value>,
    /// Base address the run used, after pragma overrides
    pub base_address: u64,
}

/// A validated program, ready to run against any number of providers
#[derive(Clone)]
pub struct Program {
    pub ast: Ast,
    pub interner: StringInterner,
    pub pragmas: Pragmas,
}

/// Tries the directory of the pattern file before the engine's own resolver
struct FileResolver<'a> {
    dir: FsResolver,
    fallback: &'a dyn IncludeResolver,
}

impl IncludeResolver for FileResolver<'_> {
    fn resolve(&self, path: &str, is_system: bool) -> Option<String> {
        self.dir
            .resolve(path, is_system)
            .or_else(|| self.fallback.resolve(path, is_system))
    }
}

fn failed(error: Error, console: Console) -> RunError {
    let mut console = console;
    let already_logged = console
        .entries()
        .last()
        .is_some_and(|e| e.level == Level::Error && e.message == error.message);
    if !already_logged {
        console.error(error.message.clone());
    }
    RunError {
        error,
        console: console.into_entries(),
    }
}

/// Main entry point for the pattern language engine.
/// Bundles include resolution, pragma handlers, native functions and options.
pub struct PatternEngine {
    resolver: Box<dyn IncludeResolver>,
    pragma_handlers: PragmaRegistry,
    functions: FunctionRegistry,
    options: EvalOptions,
    defines: Vec<(String, String)>,
}

impl PatternEngine {
    /// Create a new pattern engine with no include resolver
    pub fn new() -> Self {
        Self {
            resolver: Box::new(NoopResolver),
            pragma_handlers: PragmaRegistry::new(),
            functions: FunctionRegistry::with_std(),
            options: EvalOptions::default(),
            defines: Vec::new(),
        }
    }

    /// Create a new pattern engine with a custom include resolver
    pub fn with_resolver(resolver: impl IncludeResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            ..Self::new()
        }
    }

    pub fn set_options(&mut self, options: EvalOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut EvalOptions {
        &mut self.options
    }

    /// Register a handler for `#pragma name value`; returning false rejects the value
    pub fn add_pragma_handler(
        &mut self,
        name: impl Into<String>,
        handler: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) {
        self.pragma_handlers.add(name, handler);
    }

    /// Predefine a macro for every run, as if the source began with `#define name value`
    pub fn add_define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.push((name.into(), value.into()));
    }

    /// Register a native function callable as `name(...)` from pattern code
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        params: ParameterCount,
        body: impl Fn(&mut FunctionContext<'_>, &[Value]) -> Result<Option<Value>, String>
            + Send
            + Sync
            + 'static,
    ) {
        self.functions.register(name, params, body);
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Preprocess, lex, parse and validate source code
    pub fn parse(&self, source: &str) -> Result<Program, Error> {
        self.parse_with(source, self.resolver.as_ref())
    }

    fn parse_with(&self, source: &str, resolver: &dyn IncludeResolver) -> Result<Program, Error> {
        let mut preprocessor = Preprocessor::new(resolver, &self.pragma_handlers);
        for (name, value) in &self.defines {
            preprocessor.define(name.as_str(), value.as_str());
        }
        let processed = preprocessor.process(source)?;

        let mut interner = StringInterner::new();
        let tokens = Lexer::new(&processed.source, &mut interner).tokenize()?;
        tracing::debug!(tokens = tokens.len(), "lexed source");

        let ast = Parser::new(tokens, &mut interner).parse()?;
        tracing::debug!(statements = ast.stmts.len(), "parsed source");

        validator::validate(&ast, &interner)?;
        tracing::debug!("validated program");

        Ok(Program {
            ast,
            interner,
            pragmas: processed.pragmas,
        })
    }

    /// Run a parsed program against a provider
    pub fn evaluate(&self, provider: &dyn ByteProvider, program: Program) -> Result<RunResult, RunError> {
        let Program {
            ast,
            interner,
            pragmas,
        } = program;
        let options = self.options.with_pragmas(&pragmas);

        let rebased;
        let provider: &dyn ByteProvider = match pragmas
            .get("base_address")
            .and_then(parse_pragma_int)
            .and_then(|b| u64::try_from(b).ok())
        {
            Some(base) => {
                rebased = RebasedProvider::new(provider, base);
                &rebased
            }
            None => provider,
        };

        let mut evaluator = Evaluator::new(provider, &self.functions, interner);
        evaluator.set_limits(options.limits());
        evaluator.set_default_endian(options.default_endian);
        evaluator.set_start_offset(options.start_offset);
        evaluator.set_in_variables(options.in_variables);
        if let Some(token) = options.cancellation_token {
            evaluator.set_cancellation_token(token);
        }

        tracing::debug!(
            size = provider.size(),
            base_address = provider.base_address(),
            "evaluating program"
        );
        match evaluator.evaluate(&ast) {
            Ok(patterns) => Ok(RunResult {
                patterns,
                out_variables: evaluator.out_variables(),
                main_result: evaluator.main_result().cloned(),
                console: evaluator.take_console().into_entries(),
                base_address: provider.base_address(),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "evaluation failed");
                Err(failed(e.into(), evaluator.take_console()))
            }
        }
    }

    /// Parse and evaluate in one step
    pub fn execute_string(&self, provider: &dyn ByteProvider, source: &str) -> Result<RunResult, RunError> {
        let program = self
            .parse(source)
            .map_err(|e| failed(e, Console::new()))?;
        self.evaluate(provider, program)
    }

    /// Load a pattern file and run it; includes resolve relative to its directory first
    pub fn execute_file(&self, provider: &dyn ByteProvider, path: impl AsRef<Path>) -> Result<RunResult, RunError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            failed(
                Error::new(
                    ErrorKind::Preprocessing,
                    0,
                    format!("cannot read pattern file '{}': {}", path.display(), e),
                ),
                Console::new(),
            )
        })?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let resolver = FileResolver {
            dir: FsResolver::new(vec![dir]),
            fallback: self.resolver.as_ref(),
        };
        let program = self
            .parse_with(&source, &resolver)
            .map_err(|e| failed(e, Console::new()))?;
        self.evaluate(provider, program)
    }
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `source` against `provider` with default settings
pub fn execute_string(provider: &dyn ByteProvider, source: &str) -> Result<RunResult, RunError> {
    PatternEngine::new().execute_string(provider, source)
}

/// Run the pattern file at `path` against `provider` with default settings
pub fn execute_file(provider: &dyn ByteProvider, path: impl AsRef<Path>) -> Result<RunResult, RunError> {
    PatternEngine::new().execute_file(provider, path)
}
