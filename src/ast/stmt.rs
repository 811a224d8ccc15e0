// Vesper Statement AST Nodes

use super::expr::Expr;
use crate::error::Span;

/// Function definition (used in class methods and standalone functions)
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub exported: bool,
    pub span: Span,
}

/// Class definition
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub superclass: Option<String>,
    pub methods: Vec<FunctionDef>,
    pub exported: bool,
    pub span: Span,
}

/// Statement nodes
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Expression statement: foo()
    Expression { expr: Expr, span: Span },

    /// Print statement: print x
    Print { expr: Expr, span: Span },

    /// Variable declaration: var x = 5, const Y = 3
    Var {
        name: String,
        initializer: Option<Expr>,
        is_const: bool,
        exported: bool,
        span: Span,
    },

    /// Block: { statements }
    Block { statements: Vec<Stmt>, span: Span },

    /// If statement: if (cond) { } else { }
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },

    /// While loop: while (cond) { }
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },

    /// For loop: for (init; cond; step) { }, every clause optional
    For {
        initializer: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },

    /// Break statement
    Break { span: Span },

    /// Continue statement
    Continue { span: Span },

    /// Return statement: return x
    Return { value: Option<Expr>, span: Span },

    /// Function declaration: fun name(params) { }
    Function { def: FunctionDef },

    /// Class declaration: class Name < Super { methods }
    Class { def: ClassDef },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expression { span, .. }
            | Stmt::Print { span, .. }
            | Stmt::Var { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Return { span, .. } => *span,
            Stmt::Function { def } => def.span,
            Stmt::Class { def } => def.span,
        }
    }
}

/// `import "path" as alias`
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub path: String,
    pub alias: String,
    pub span: Span,
}

/// One parsed source file
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub imports: Vec<ImportDecl>,
    pub statements: Vec<Stmt>,
}

/// Anything `Compiler::compile` accepts
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
}

impl<'a> From<&'a Stmt> for Node<'a> {
    fn from(stmt: &'a Stmt) -> Self {
        Node::Stmt(stmt)
    }
}

impl<'a> From<&'a Expr> for Node<'a> {
    fn from(expr: &'a Expr) -> Self {
        Node::Expr(expr)
    }
}
