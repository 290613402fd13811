//! hexpat - runs an ImHex pattern file against a binary file and prints the pattern tree.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use hexpat_lang::{
    ByteProvider, Endianness, EvalOptions, FsResolver, Level, LogEntry, Pattern, PatternEngine,
    RebasedProvider, SliceProvider, Value,
};
use memmap2::Mmap;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Endian {
    Little,
    Big,
    Native,
}

impl From<Endian> for Endianness {
    fn from(e: Endian) -> Self {
        match e {
            Endian::Little => Endianness::Little,
            Endian::Big => Endianness::Big,
            Endian::Native => Endianness::native(),
        }
    }
}

/// hexpat - evaluates .hexpat pattern files against binary data
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Config {
    /// The pattern file to run
    pattern: PathBuf,
    /// The data file to analyse
    data: PathBuf,
    /// Additional directories searched by `#include`
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,
    /// Predefine a macro, as NAME or NAME=VALUE
    #[arg(short = 'D', long = "define", value_parser = parse_define)]
    defines: Vec<(String, String)>,
    /// Default byte order for reads without `be`/`le`
    #[arg(short, long, value_enum)]
    endian: Option<Endian>,
    /// Address of the first byte of the data
    #[arg(short, long, value_parser = parse_int)]
    base_address: Option<u64>,
    /// Offset from the base address where reading starts
    #[arg(long, value_parser = parse_int)]
    start_offset: Option<u64>,
    #[arg(long)]
    recursion_limit: Option<u32>,
    #[arg(long, value_parser = parse_int)]
    array_limit: Option<u64>,
    #[arg(long, value_parser = parse_int)]
    pattern_limit: Option<u64>,
    #[arg(long, value_parser = parse_int)]
    loop_limit: Option<u64>,
    /// Value for an `in` variable, as NAME=VALUE
    #[arg(long = "in", value_parser = parse_in_variable)]
    in_variables: Vec<(String, Value)>,
    /// Also print hidden patterns
    #[arg(long)]
    show_hidden: bool,
}

fn parse_int(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_define(s: &str) -> Result<(String, String), String> {
    let (name, value) = s.split_once('=').unwrap_or((s, ""));
    if name.is_empty() {
        return Err(format!("expected NAME or NAME=VALUE, got '{}'", s));
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_in_variable(s: &str) -> Result<(String, Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let value = match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        v => match (parse_int(v), v.parse::<i128>(), v.parse::<f64>()) {
            (Ok(u), _, _) => Value::Unsigned(u128::from(u)),
            (_, Ok(i), _) => Value::Signed(i),
            (_, _, Ok(f)) => Value::Float(f),
            _ => Value::String(v.to_string()),
        },
    };
    Ok((name.to_string(), value))
}

/// Files above this size are memory-mapped instead of read
const MMAP_THRESHOLD: u64 = 16 * 1024 * 1024;

enum DataBackend {
    InMemory(Vec<u8>),
    MemoryMapped(Mmap),
}

impl DataBackend {
    fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() > MMAP_THRESHOLD {
            // The data file must not change while the run reads it
            let mmap = unsafe { Mmap::map(&file)? };
            Ok(DataBackend::MemoryMapped(mmap))
        } else {
            Ok(DataBackend::InMemory(std::fs::read(path)?))
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            DataBackend::InMemory(data) => data.as_slice(),
            DataBackend::MemoryMapped(mmap) => &mmap[..],
        }
    }
}

fn print_pattern(pattern: &Pattern, provider: &dyn ByteProvider, depth: usize, show_hidden: bool) {
    if pattern.hidden && !show_hidden {
        return;
    }
    let (indent, child_depth) = if pattern.inlined {
        (None, depth)
    } else {
        (Some("  ".repeat(depth)), depth + 1)
    };
    if let Some(indent) = indent {
        println!(
            "{}{} {} @ 0x{:08X} [0x{:X}] = {}",
            indent,
            pattern.formatted_type_name(),
            pattern.display_name(),
            pattern.offset,
            pattern.size,
            pattern.formatted_value(provider),
        );
    }
    for child in pattern.children() {
        print_pattern(child, provider, child_depth, show_hidden);
    }
}

fn print_console(console: &[LogEntry]) {
    for entry in console {
        let tag = match entry.level {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        eprintln!("[{}] {}", tag, entry.message);
    }
}

fn main() -> ExitCode {
    // Log to stderr; stdout carries the pattern tree
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = Config::parse();

    let data = match DataBackend::open(&config.data) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("cannot read data file '{}': {}", config.data.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let provider = SliceProvider::new(data.bytes()).with_base_address(config.base_address.unwrap_or(0));

    let mut engine = PatternEngine::with_resolver(FsResolver::new(config.include.clone()));
    for (name, value) in &config.defines {
        engine.add_define(name.as_str(), value.as_str());
    }
    let defaults = EvalOptions::default();
    engine.set_options(EvalOptions {
        recursion_limit: config.recursion_limit.unwrap_or(defaults.recursion_limit),
        array_limit: config.array_limit.unwrap_or(defaults.array_limit),
        pattern_limit: config.pattern_limit.unwrap_or(defaults.pattern_limit),
        loop_limit: config.loop_limit.unwrap_or(defaults.loop_limit),
        default_endian: config.endian.map_or(defaults.default_endian, Endianness::from),
        start_offset: config.start_offset.unwrap_or(0),
        cancellation_token: None,
        in_variables: config.in_variables.iter().cloned().collect(),
    });

    tracing::info!(pattern = %config.pattern.display(), data = %config.data.display(), "running pattern");
    match engine.execute_file(&provider, &config.pattern) {
        Ok(result) => {
            print_console(&result.console);
            let rebased;
            let view: &dyn ByteProvider = if result.base_address != provider.base_address() {
                rebased = RebasedProvider::new(&provider, result.base_address);
                &rebased
            } else {
                &provider
            };
            for pattern in &result.patterns {
                print_pattern(pattern, view, 0, config.show_hidden);
            }
            for (name, value) in &result.out_variables {
                println!("out {} = {}", name, value.to_display_string());
            }
            if let Some(value) = &result.main_result {
                println!("main() returned {}", value.to_display_string());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_console(&e.console);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_define() {
        assert_eq!(parse_define("SIZE=4"), Ok(("SIZE".to_string(), "4".to_string())));
        assert_eq!(parse_define("DEBUG"), Ok(("DEBUG".to_string(), String::new())));
        assert!(parse_define("=1").is_err());
    }

    #[test]
    fn test_parse_in_variable() {
        assert_eq!(parse_in_variable("n=0x10"), Ok(("n".to_string(), Value::Unsigned(16))));
        assert_eq!(parse_in_variable("n=-3"), Ok(("n".to_string(), Value::Signed(-3))));
        assert_eq!(parse_in_variable("flag=true"), Ok(("flag".to_string(), Value::Bool(true))));
        assert_eq!(parse_in_variable("s=abc"), Ok(("s".to_string(), Value::String("abc".into()))));
        assert!(parse_in_variable("novalue").is_err());
    }
}
