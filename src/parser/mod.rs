//! Source parser
//!
//! Extracts functions, classes and modules from a single-version checkout.
//! Files are discovered with gitignore-aware walking, parsed in parallel on
//! a bounded worker pool, and emitted as tagged [`ParsedEntity`] records.
//! Invalid, binary and oversized files are skipped with a warning instead
//! of failing the run.

pub mod python;

use crate::config::Config;
use crate::error::{CodelexError, CodelexResult};
use crate::progress::{report, CancellationToken, ProgressObserver, Stage};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Per-file parse timeout isolating pathological files
const PER_FILE_TIMEOUT: Duration = Duration::from_secs(60);

/// A function parameter as written in source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub type_text: Option<String>,
    pub default_text: Option<String>,
}

/// Implementation-category tag for functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCategory {
    Function,
    Method,
    Constructor,
    Dunder,
    Private,
    Test,
    Getter,
    Setter,
}

impl FunctionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionCategory::Function => "function",
            FunctionCategory::Method => "method",
            FunctionCategory::Constructor => "constructor",
            FunctionCategory::Dunder => "dunder",
            FunctionCategory::Private => "private",
            FunctionCategory::Test => "test",
            FunctionCategory::Getter => "getter",
            FunctionCategory::Setter => "setter",
        }
    }
}

/// Refactor score for a function, by body line count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionScore {
    Small,
    Good,
    MediumFunction,
    LargeFunction,
    MonsterFunction,
}

impl FunctionScore {
    pub fn from_body_lines(lines: u32) -> Self {
        match lines {
            0..=49 => FunctionScore::Small,
            50..=99 => FunctionScore::Good,
            100..=199 => FunctionScore::MediumFunction,
            200..=399 => FunctionScore::LargeFunction,
            _ => FunctionScore::MonsterFunction,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FunctionScore::Small => "small",
            FunctionScore::Good => "good",
            FunctionScore::MediumFunction => "medium_function",
            FunctionScore::LargeFunction => "large_function",
            FunctionScore::MonsterFunction => "monster_function",
        }
    }
}

/// Refactor score for a class, by method count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassScore {
    Simple,
    Good,
    MediumClass,
    LargeClass,
    GodClass,
}

impl ClassScore {
    pub fn from_method_count(methods: u32) -> Self {
        match methods {
            0..=9 => ClassScore::Simple,
            10..=19 => ClassScore::Good,
            20..=29 => ClassScore::MediumClass,
            30..=49 => ClassScore::LargeClass,
            _ => ClassScore::GodClass,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClassScore::Simple => "simple",
            ClassScore::Good => "good",
            ClassScore::MediumClass => "medium_class",
            ClassScore::LargeClass => "large_class",
            ClassScore::GodClass => "god_class",
        }
    }
}

/// Refactor score for a module, by function count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleScore {
    Simple,
    Good,
    ModerateFunctions,
    ManyFunctions,
    ExcessiveFunctions,
}

impl ModuleScore {
    pub fn from_function_count(functions: u32) -> Self {
        match functions {
            0..=2 => ModuleScore::Simple,
            3..=9 => ModuleScore::Good,
            10..=19 => ModuleScore::ModerateFunctions,
            20..=29 => ModuleScore::ManyFunctions,
            _ => ModuleScore::ExcessiveFunctions,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleScore::Simple => "simple",
            ModuleScore::Good => "good",
            ModuleScore::ModerateFunctions => "moderate_functions",
            ModuleScore::ManyFunctions => "many_functions",
            ModuleScore::ExcessiveFunctions => "excessive_functions",
        }
    }
}

/// A parsed function or method
#[derive(Debug, Clone)]
pub struct ParsedFunction {
    pub name: String,
    pub qualified_name: String,
    pub module_path: String,
    pub params: Vec<Param>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    /// Checkout-relative defining file
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    /// Lexical body size in lines
    pub body_lines: u32,
    /// Names syntactically called from within the body
    pub calls: BTreeSet<String>,
    pub category: FunctionCategory,
    pub signature: String,
    pub body_hash: String,
}

impl ParsedFunction {
    pub fn score(&self) -> FunctionScore {
        FunctionScore::from_body_lines(self.body_lines)
    }
}

/// A parsed class
#[derive(Debug, Clone)]
pub struct ParsedClass {
    pub name: String,
    pub qualified_name: String,
    pub module_path: String,
    /// Parent class names as written in source
    pub parents: Vec<String>,
    /// Qualified names of enclosed methods
    pub methods: Vec<String>,
    pub docstring: Option<String>,
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: String,
    pub body_hash: String,
}

impl ParsedClass {
    pub fn score(&self) -> ClassScore {
        ClassScore::from_method_count(self.methods.len() as u32)
    }
}

/// A parsed module
#[derive(Debug, Clone)]
pub struct ParsedModule {
    pub dotted_path: String,
    pub file: PathBuf,
    pub top_level_names: BTreeSet<String>,
    pub function_count: u32,
    pub class_count: u32,
}

impl ParsedModule {
    pub fn score(&self) -> ModuleScore {
        ModuleScore::from_function_count(self.function_count)
    }
}

/// Tagged union of everything the parser can produce
#[derive(Debug, Clone)]
pub enum ParsedEntity {
    Function(ParsedFunction),
    Class(ParsedClass),
    Module(ParsedModule),
}

/// A file the parser refused, with the reason
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregate result of parsing one checkout
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub entities: Vec<ParsedEntity>,
    pub skipped: Vec<SkippedFile>,
    /// Parsed files with their entity counts, in parse order
    pub files: Vec<(PathBuf, u32)>,
}

impl ParseOutcome {
    pub fn functions(&self) -> impl Iterator<Item = &ParsedFunction> {
        self.entities.iter().filter_map(|e| match e {
            ParsedEntity::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn classes(&self) -> impl Iterator<Item = &ParsedClass> {
        self.entities.iter().filter_map(|e| match e {
            ParsedEntity::Class(c) => Some(c),
            _ => None,
        })
    }

    pub fn modules(&self) -> impl Iterator<Item = &ParsedModule> {
        self.entities.iter().filter_map(|e| match e {
            ParsedEntity::Module(m) => Some(m),
            _ => None,
        })
    }
}

enum FileResult {
    Parsed {
        path: PathBuf,
        entities: Vec<ParsedEntity>,
    },
    Skipped(SkippedFile),
    Cancelled,
}

/// Parallel, skip-tolerant parser over one checkout tree
pub struct SourceParser {
    max_file_size: u64,
    pool: rayon::ThreadPool,
}

impl SourceParser {
    pub fn new(config: &Config) -> CodelexResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent_parsers)
            .build()
            .map_err(|e| CodelexError::source_error(e.to_string()))?;
        Ok(Self {
            max_file_size: config.max_file_size_bytes(),
            pool,
        })
    }

    /// Parse every Python file under `root`.
    ///
    /// The cancellation token is observed at file boundaries; a cancelled
    /// parse returns the Cancelled error without partial output.
    pub fn parse_checkout(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<ParseOutcome> {
        let mut sources: Vec<PathBuf> = WalkBuilder::new(root)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().map(|e| e == "py").unwrap_or(false))
            .collect();
        sources.sort();

        let total = sources.len();
        report(
            observer,
            Stage::Parsing,
            Some(0.0),
            format!("parsing {} source files", total),
        );

        let max_file_size = self.max_file_size;
        let results: Vec<FileResult> = self.pool.install(|| {
            sources
                .par_iter()
                .map(|path| parse_one(root, path, max_file_size, cancel))
                .collect()
        });

        cancel.checkpoint(Stage::Parsing)?;

        let mut outcome = ParseOutcome::default();
        for result in results {
            match result {
                FileResult::Parsed { path, entities } => {
                    outcome.files.push((path, entities.len() as u32));
                    outcome.entities.extend(entities);
                }
                FileResult::Skipped(skipped) => {
                    warn!(
                        file = %skipped.path.display(),
                        reason = %skipped.reason,
                        "skipping file"
                    );
                    outcome.skipped.push(skipped);
                }
                FileResult::Cancelled => {
                    return Err(CodelexError::cancelled(Stage::Parsing.as_str()));
                }
            }
        }

        report(
            observer,
            Stage::Parsing,
            Some(100.0),
            format!(
                "parsed {} files, skipped {}",
                outcome.files.len(),
                outcome.skipped.len()
            ),
        );
        Ok(outcome)
    }
}

fn parse_one(
    root: &Path,
    path: &Path,
    max_file_size: u64,
    cancel: &CancellationToken,
) -> FileResult {
    if cancel.is_cancelled() {
        return FileResult::Cancelled;
    }
    let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();

    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            return FileResult::Skipped(SkippedFile {
                path: relative,
                reason: format!("unreadable: {}", e),
            })
        }
    };
    if size > max_file_size {
        return FileResult::Skipped(SkippedFile {
            path: relative,
            reason: format!("exceeds size cap ({} bytes)", size),
        });
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return FileResult::Skipped(SkippedFile {
                path: relative,
                reason: format!("unreadable: {}", e),
            })
        }
    };
    let source = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => {
            return FileResult::Skipped(SkippedFile {
                path: relative,
                reason: "binary or non-UTF-8 content".to_string(),
            })
        }
    };

    match python::parse_python_file(&relative, &source, PER_FILE_TIMEOUT) {
        Ok(file_entities) => {
            let mut entities = Vec::new();
            for class in file_entities.classes {
                entities.push(ParsedEntity::Class(class));
            }
            for function in file_entities.functions {
                entities.push(ParsedEntity::Function(function));
            }
            if let Some(module) = file_entities.module {
                entities.push(ParsedEntity::Module(module));
            }
            FileResult::Parsed {
                path: relative,
                entities,
            }
        }
        Err(e) => FileResult::Skipped(SkippedFile {
            path: relative,
            reason: e.to_string(),
        }),
    }
}
