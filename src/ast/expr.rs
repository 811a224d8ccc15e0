// Vesper Expression AST Nodes

use super::stmt::Stmt;
use crate::error::Span;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// Short-circuiting operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate, // -
    Not,    // !
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Nil,
}

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expr {
    /// Literal value: 42, "hello", true, nil
    Literal { value: Literal, span: Span },

    /// Variable reference: foo
    Identifier { name: String, span: Span },

    /// Assignment: x = value
    Assign {
        name: String,
        value: Box<Expr>,
        span: Span,
    },

    /// Binary operation: a + b
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Short-circuit operation: a and b
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Unary operation: -x, !x
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    /// Parenthesized expression: (expr)
    Grouping { expr: Box<Expr>, span: Span },

    /// Function call: foo(a, b)
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },

    /// Anonymous function: fun(a, b) { ... }
    Function {
        params: Vec<String>,
        body: Vec<Stmt>,
        span: Span,
    },

    /// Property access: obj.prop
    Get {
        object: Box<Expr>,
        property: String,
        span: Span,
    },

    /// Property assignment: obj.prop = value
    Set {
        object: Box<Expr>,
        property: String,
        value: Box<Expr>,
        span: Span,
    },

    /// Receiver reference inside a method
    This { span: Span },

    /// Superclass member: super.method
    Super { method: String, span: Span },

    /// Array literal: [1, 2, 3]
    Array { elements: Vec<Expr>, span: Span },

    /// Hash literal: {"a": 1, 2: "b"}
    Hash {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },

    /// Index access: arr[0]
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },

    /// Index assignment: arr[0] = value
    IndexSet {
        object: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Grouping { span, .. }
            | Expr::Call { span, .. }
            | Expr::Function { span, .. }
            | Expr::Get { span, .. }
            | Expr::Set { span, .. }
            | Expr::This { span }
            | Expr::Super { span, .. }
            | Expr::Array { span, .. }
            | Expr::Hash { span, .. }
            | Expr::Index { span, .. }
            | Expr::IndexSet { span, .. } => *span,
        }
    }
}
