// Tree builders for tests, standing in for the external parser

use super::*;
use crate::error::Span;

fn sp() -> Span {
    Span::default()
}

pub fn num(n: f64) -> Expr {
    Expr::Literal {
        value: Literal::Number(n),
        span: sp(),
    }
}

pub fn string(s: &str) -> Expr {
    Expr::Literal {
        value: Literal::String(s.to_string()),
        span: sp(),
    }
}

pub fn boolean(b: bool) -> Expr {
    Expr::Literal {
        value: Literal::Boolean(b),
        span: sp(),
    }
}

pub fn nil() -> Expr {
    Expr::Literal {
        value: Literal::Nil,
        span: sp(),
    }
}

pub fn ident(name: &str) -> Expr {
    Expr::Identifier {
        name: name.to_string(),
        span: sp(),
    }
}

pub fn assign(name: &str, value: Expr) -> Expr {
    Expr::Assign {
        name: name.to_string(),
        value: Box::new(value),
        span: sp(),
    }
}

pub fn bin(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
        span: sp(),
    }
}

pub fn and(left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        left: Box::new(left),
        op: LogicalOp::And,
        right: Box::new(right),
        span: sp(),
    }
}

pub fn or(left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        left: Box::new(left),
        op: LogicalOp::Or,
        right: Box::new(right),
        span: sp(),
    }
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
        span: sp(),
    }
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(callee),
        args,
        span: sp(),
    }
}

/// Call whose instruction is attributed to `line`
pub fn call_at(callee: Expr, args: Vec<Expr>, line: usize) -> Expr {
    Expr::Call {
        callee: Box::new(callee),
        args,
        span: Span::line(line),
    }
}

pub fn fun_expr(params: &[&str], body: Vec<Stmt>) -> Expr {
    Expr::Function {
        params: params.iter().map(|p| p.to_string()).collect(),
        body,
        span: sp(),
    }
}

pub fn get(object: Expr, property: &str) -> Expr {
    Expr::Get {
        object: Box::new(object),
        property: property.to_string(),
        span: sp(),
    }
}

pub fn set(object: Expr, property: &str, value: Expr) -> Expr {
    Expr::Set {
        object: Box::new(object),
        property: property.to_string(),
        value: Box::new(value),
        span: sp(),
    }
}

pub fn this() -> Expr {
    Expr::This { span: sp() }
}

pub fn sup(method: &str) -> Expr {
    Expr::Super {
        method: method.to_string(),
        span: sp(),
    }
}

pub fn array(elements: Vec<Expr>) -> Expr {
    Expr::Array {
        elements,
        span: sp(),
    }
}

pub fn hash(entries: Vec<(Expr, Expr)>) -> Expr {
    Expr::Hash {
        entries,
        span: sp(),
    }
}

pub fn index(object: Expr, idx: Expr) -> Expr {
    Expr::Index {
        object: Box::new(object),
        index: Box::new(idx),
        span: sp(),
    }
}

pub fn index_set(object: Expr, idx: Expr, value: Expr) -> Expr {
    Expr::IndexSet {
        object: Box::new(object),
        index: Box::new(idx),
        value: Box::new(value),
        span: sp(),
    }
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expression { expr, span: sp() }
}

/// Expression statement reported at `line`
pub fn expr_stmt_at(expr: Expr, line: usize) -> Stmt {
    Stmt::Expression {
        expr,
        span: Span::line(line),
    }
}

pub fn print(expr: Expr) -> Stmt {
    Stmt::Print { expr, span: sp() }
}

pub fn var(name: &str, initializer: Expr) -> Stmt {
    Stmt::Var {
        name: name.to_string(),
        initializer: Some(initializer),
        is_const: false,
        exported: false,
        span: sp(),
    }
}

pub fn const_(name: &str, initializer: Expr) -> Stmt {
    Stmt::Var {
        name: name.to_string(),
        initializer: Some(initializer),
        is_const: true,
        exported: false,
        span: sp(),
    }
}

pub fn export_var(name: &str, initializer: Expr) -> Stmt {
    Stmt::Var {
        name: name.to_string(),
        initializer: Some(initializer),
        is_const: false,
        exported: true,
        span: sp(),
    }
}

pub fn block(statements: Vec<Stmt>) -> Stmt {
    Stmt::Block {
        statements,
        span: sp(),
    }
}

pub fn if_(condition: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Stmt {
    Stmt::If {
        condition,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
        span: sp(),
    }
}

pub fn while_(condition: Expr, body: Stmt) -> Stmt {
    Stmt::While {
        condition,
        body: Box::new(body),
        span: sp(),
    }
}

pub fn for_(
    initializer: Option<Stmt>,
    condition: Option<Expr>,
    increment: Option<Expr>,
    body: Stmt,
) -> Stmt {
    Stmt::For {
        initializer: initializer.map(Box::new),
        condition,
        increment,
        body: Box::new(body),
        span: sp(),
    }
}

pub fn brk() -> Stmt {
    Stmt::Break { span: sp() }
}

pub fn cont() -> Stmt {
    Stmt::Continue { span: sp() }
}

pub fn ret(value: Option<Expr>) -> Stmt {
    Stmt::Return { value, span: sp() }
}

pub fn method(name: &str, params: &[&str], body: Vec<Stmt>) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body,
        exported: false,
        span: sp(),
    }
}

pub fn fun(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    Stmt::Function {
        def: method(name, params, body),
    }
}

pub fn export_fun(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    let mut def = method(name, params, body);
    def.exported = true;
    Stmt::Function { def }
}

pub fn class(name: &str, superclass: Option<&str>, methods: Vec<FunctionDef>) -> Stmt {
    Stmt::Class {
        def: ClassDef {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            methods,
            exported: false,
            span: sp(),
        },
    }
}

pub fn import(path: &str, alias: &str) -> ImportDecl {
    ImportDecl {
        path: path.to_string(),
        alias: alias.to_string(),
        span: sp(),
    }
}

pub fn module(imports: Vec<ImportDecl>, statements: Vec<Stmt>) -> Module {
    Module {
        imports,
        statements,
    }
}
