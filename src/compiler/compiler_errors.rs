//! Unified error handling for the Aster compiler.
//!
//! All error surfaces funnel into a single owned [`CompileError`] type with a
//! resolved [`ErrorLocation`] (module-relative path, 1-based line/column and a
//! short source excerpt) plus optional structured metadata.
//!
//! Two flows coexist:
//! - Fatal errors (I/O, lockfile, malformed unit) are returned as
//!   `Result<_, CompileError>` and abort the compilation.
//! - Semantic and type errors discovered during code generation are pushed
//!   onto the compiler state so one pass can report many of them; codegen
//!   continues with placeholder values.
//!
//! The `return_*_error!` macros build and return errors in one step:
//!
//! ```ignore
//! return_syntax_error!("Expected a type after `is`", location, {
//!     CompilationStage => "Declaration Parsing",
//!     PrimarySuggestion => "Write `is <Type>` or use `= <expr>` to infer",
//! });
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

// The final set of errors and warnings emitted from the compiler
#[derive(Debug, Default)]
pub struct CompilerMessages {
    pub errors: Vec<CompileError>,
    pub warnings: Vec<String>,
}

impl CompilerMessages {
    pub fn new() -> Self {
        CompilerMessages {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Eq, Hash, PartialEq, Clone)]
pub enum ErrorMetaDataKey {
    CompilationStage,
    ModuleName,
    VariableName,

    // Optional suggestions for nicer diagnostics
    PrimarySuggestion,

    // Data type information
    ExpectedType,
    FoundType,
}

/// Fully resolved source position for display.
///
/// `scope` is the module-relative file path (never an absolute unit offset),
/// `line`/`column` are 1-based and derived from the owning module's start
/// offset inside the assembled unit.
#[derive(Debug, Clone, Default)]
pub struct ErrorLocation {
    pub scope: PathBuf,
    pub line: usize,
    pub column: usize,

    /// Source excerpt of the offending token, truncated to 40 bytes.
    pub excerpt: String,
}

impl ErrorLocation {
    pub fn new(scope: PathBuf, line: usize, column: usize, excerpt: String) -> ErrorLocation {
        ErrorLocation {
            scope,
            line,
            column,
            excerpt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub msg: String,
    pub location: ErrorLocation,
    pub error_type: ErrorType,

    // Structured details so tooling can act on diagnostics without
    // re-parsing the message text.
    pub metadata: HashMap<ErrorMetaDataKey, &'static str>,
}

impl CompileError {
    pub fn new(msg: impl Into<String>, location: ErrorLocation, error_type: ErrorType) -> Self {
        CompileError {
            msg: msg.into(),
            location,
            error_type,
            metadata: HashMap::new(),
        }
    }

    /// Create a new syntax error with a clear explanation
    pub fn new_syntax_error(msg: impl Into<String>, location: ErrorLocation) -> Self {
        Self::new(msg, location, ErrorType::Syntax)
    }

    /// Create a new type error
    pub fn new_type_error(msg: impl Into<String>, location: ErrorLocation) -> Self {
        Self::new(msg, location, ErrorType::Type)
    }

    /// Create a new rule error (undefined names, ambiguous imports, scope
    /// violations)
    pub fn new_rule_error(msg: impl Into<String>, location: ErrorLocation) -> Self {
        Self::new(msg, location, ErrorType::Rule)
    }

    /// Create a new analysis error (`noalloc` violations)
    pub fn new_analysis_error(msg: impl Into<String>, location: ErrorLocation) -> Self {
        Self::new(msg, location, ErrorType::Analysis)
    }

    /// Create a file system error from a Path
    pub fn file_error(path: &std::path::Path, msg: impl Into<String>) -> Self {
        CompileError {
            msg: msg.into(),
            location: ErrorLocation {
                scope: path.to_path_buf(),
                ..ErrorLocation::default()
            },
            error_type: ErrorType::File,
            metadata: HashMap::new(),
        }
    }

    /// Create a compiler error (internal bug, not the user's fault)
    pub fn compiler_error(msg: impl Into<String>) -> Self {
        Self::new(msg, ErrorLocation::default(), ErrorType::Compiler)
    }

    pub fn with_metadata_entry(mut self, key: ErrorMetaDataKey, value: &'static str) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum ErrorType {
    Syntax,
    Type,
    Rule,
    Analysis,
    File,
    Config,
    Cache,
    Compiler,
}

pub fn error_type_to_str(e_type: &ErrorType) -> &'static str {
    match e_type {
        ErrorType::Syntax => "Syntax Error",
        ErrorType::Type => "Type Error",
        ErrorType::Rule => "Language Rule Violation",
        ErrorType::Analysis => "Analysis Error",
        ErrorType::File => "File Error",
        ErrorType::Config => "Malformed Config",
        ErrorType::Cache => "Cache Issue",
        ErrorType::Compiler => "Compiler Bug",
    }
}

/// Returns a new CompileError for syntax violations.
///
/// Usage:
/// `return_syntax_error!("message", location, { CompilationStage => "Parsing" })`;
#[macro_export]
macro_rules! return_syntax_error {
    ($msg:expr, $loc:expr, { $( $key:ident => $value:expr ),* $(,)? }) => {
        return Err($crate::compiler::compiler_errors::CompileError {
            msg: $msg.into(),
            location: $loc,
            error_type: $crate::compiler::compiler_errors::ErrorType::Syntax,
            metadata: {
                let mut map = std::collections::HashMap::new();
                $( map.insert($crate::compiler::compiler_errors::ErrorMetaDataKey::$key, $value); )*
                map
            },
        })
    };
    ($msg:expr, $loc:expr) => {
        return Err($crate::compiler::compiler_errors::CompileError::new_syntax_error(
            $msg, $loc,
        ))
    };
}

/// Returns a new CompileError for semantic rule violations.
///
/// Usage:
/// `return_rule_error!("Undefined variable", location, { VariableName => "x" })`;
#[macro_export]
macro_rules! return_rule_error {
    ($msg:expr, $loc:expr, { $( $key:ident => $value:expr ),* $(,)? }) => {
        return Err($crate::compiler::compiler_errors::CompileError {
            msg: $msg.into(),
            location: $loc,
            error_type: $crate::compiler::compiler_errors::ErrorType::Rule,
            metadata: {
                let mut map = std::collections::HashMap::new();
                $( map.insert($crate::compiler::compiler_errors::ErrorMetaDataKey::$key, $value); )*
                map
            },
        })
    };
    ($msg:expr, $loc:expr) => {
        return Err($crate::compiler::compiler_errors::CompileError::new_rule_error(
            $msg, $loc,
        ))
    };
}

/// Returns a new CompileError for file system failures.
///
/// Usage: `return_file_error!(path, "message")`;
#[macro_export]
macro_rules! return_file_error {
    ($path:expr, $msg:expr) => {
        return Err($crate::compiler::compiler_errors::CompileError::file_error(
            $path, $msg,
        ))
    };
}

/// Returns a new CompileError for malformed configuration (lockfile directives).
#[macro_export]
macro_rules! return_config_error {
    ($msg:expr, $loc:expr) => {
        return Err($crate::compiler::compiler_errors::CompileError::new(
            $msg,
            $loc,
            $crate::compiler::compiler_errors::ErrorType::Config,
        ))
    };
}

/// Returns a new CompileError for internal compiler bugs.
#[macro_export]
macro_rules! return_compiler_error {
    ($fmt:expr, $($arg:expr),+ $(,)?) => {
        return Err($crate::compiler::compiler_errors::CompileError::compiler_error(
            format!($fmt, $($arg),+),
        ))
    };
    ($msg:expr) => {
        return Err($crate::compiler::compiler_errors::CompileError::compiler_error($msg))
    };
}
