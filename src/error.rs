// Vesper Error Handling Module
// Compile-time and runtime faults share one error type carrying kind, message and location

use std::fmt;
use thiserror::Error;

/// Represents a position in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

/// Represents a span in the source code (start to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Span covering a single point, used where only a line is known
    pub fn line(line: usize) -> Self {
        let pos = Position::new(line, 1, 0);
        Self {
            start: pos,
            end: pos,
        }
    }
}

/// Types of errors raised by the compiler and the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    NameError,
    ImportError,
    TypeError,
    IndexError,
    KeyError,
    ArgumentError,
    AttributeError,
    StackOverflow,
    RuntimeError,
    Halted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::NameError => "NameError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::Halted => "Halted",
        };
        f.write_str(name)
    }
}

/// One activation in a runtime stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function_name: String,
    pub file: String,
    pub line: usize,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  at {} ({}:{})", self.function_name, self.file, self.line)
    }
}

/// Main error type for Vesper
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct VesperError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub file: String,
    pub stack_trace: Vec<StackFrame>,
}

impl VesperError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: Span::default(),
            file: String::new(),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_stack_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.stack_trace = trace;
        self
    }

    pub fn line(&self) -> usize {
        self.span.start.line
    }

    /// `file:line`, or `line N` when the error has no file attached
    pub fn location(&self) -> String {
        if self.file.is_empty() {
            format!("line {}", self.line())
        } else {
            format!("{}:{}", self.file, self.line())
        }
    }

    /// Plain multi-line report: header, location and stack trace
    pub fn format(&self) -> String {
        let mut output = format!("{}: {} at {}\n", self.kind, self.message, self.location());
        for frame in &self.stack_trace {
            output.push_str(&frame.to_string());
            output.push('\n');
        }
        output
    }

    pub fn syntax_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::SyntaxError, message).with_span(span)
    }

    pub fn name_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::NameError, message).with_span(span)
    }

    pub fn import_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::ImportError, message).with_span(span)
    }
}

pub type VesperResult<T> = Result<T, VesperError>;
