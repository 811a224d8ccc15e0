// Vesper Compiler
// Compiles AST to bytecode over one shared constant pool

use super::chunk::{Chunk, JUMP_PLACEHOLDER};
use super::diagnostics::{DiagnosticHandler, TracingDiagnostics};
use super::loop_stack::LoopStack;
use super::module::{LoadedModule, ModuleGraph, ModuleSource};
use super::opcode::OpCode;
use super::program::{CompiledModule, CompiledProgram, DebugEntry};
use super::symbol_table::{ImportBinding, Symbol, SymbolScope, SymbolStack};
use crate::ast::*;
use crate::error::{Span, VesperError, VesperResult};
use crate::vm::{CompiledFunction, Value};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;

const MAX_U8_OPERAND: usize = u8::MAX as usize;
const MAX_U16_OPERAND: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// Compiler state for one function, method or module body
#[derive(Debug)]
struct FunctionScope {
    chunk: Chunk,
    loops: LoopStack,
    kind: FunctionKind,
}

impl FunctionScope {
    fn new(kind: FunctionKind) -> Self {
        Self {
            chunk: Chunk::new(),
            loops: LoopStack::new(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClassContext {
    has_superclass: bool,
}

/// The Vesper bytecode compiler
pub struct Compiler {
    scope: FunctionScope,
    enclosing: Vec<FunctionScope>,
    symbols: SymbolStack,
    classes: Vec<ClassContext>,
    constants: Vec<Value>,
    debug_info: Vec<DebugEntry>,
    modules: Vec<CompiledModule>,
    module_index: usize,
    file: String,
    line: usize,
    diagnostics: Box<dyn DiagnosticHandler>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            scope: FunctionScope::new(FunctionKind::Script),
            enclosing: Vec::new(),
            symbols: SymbolStack::new(),
            classes: Vec::new(),
            constants: Vec::new(),
            debug_info: Vec::new(),
            modules: Vec::new(),
            module_index: 0,
            file: String::new(),
            line: 1,
            diagnostics: Box::new(TracingDiagnostics),
        }
    }

    pub fn with_diagnostics(mut self, handler: Box<dyn DiagnosticHandler>) -> Self {
        self.diagnostics = handler;
        self
    }

    /// File name attached to errors and debug info of single-node compiles
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Compile one statement or expression into the active context
    pub fn compile<'a>(&mut self, node: impl Into<Node<'a>>) -> VesperResult<()> {
        let result = match node.into() {
            Node::Stmt(stmt) => self.compile_stmt(stmt),
            Node::Expr(expr) => self.compile_expr(expr),
        };
        result.map_err(|err| self.report(err))
    }

    /// Wrap everything compiled so far as a one-module program
    pub fn finish(mut self) -> CompiledProgram {
        let scope = std::mem::replace(&mut self.scope, FunctionScope::new(FunctionKind::Script));
        let debug = self.add_debug_entry(scope.chunk.lines);
        self.modules.push(CompiledModule {
            instructions: scope.chunk.code,
            num_globals: self.symbols.current().num_definitions(),
            exports: Vec::new(),
            export_names: Vec::new(),
            debug,
        });
        self.take_program()
    }

    /// Load, order and compile `entry` with all of its imports
    pub fn compile_program(
        &mut self,
        entry: impl AsRef<Path>,
        source: &mut dyn ModuleSource,
    ) -> VesperResult<CompiledProgram> {
        let graph = ModuleGraph::load(entry.as_ref(), source).map_err(|err| self.report(err))?;
        let order = graph.topological_order().map_err(|err| self.report(err))?;

        // Graph index -> compiled module index
        let mut compiled: FxHashMap<usize, usize> = FxHashMap::default();
        for (module_index, &graph_index) in order.iter().enumerate() {
            let loaded = &graph.modules[graph_index];
            self.compile_module(loaded, module_index, &graph, &compiled)?;
            compiled.insert(graph_index, module_index);
        }
        Ok(self.take_program())
    }

    fn take_program(&mut self) -> CompiledProgram {
        CompiledProgram {
            modules: std::mem::take(&mut self.modules),
            constants: std::mem::take(&mut self.constants),
            debug_info: std::mem::take(&mut self.debug_info),
        }
    }

    fn compile_module(
        &mut self,
        loaded: &LoadedModule,
        module_index: usize,
        graph: &ModuleGraph,
        compiled: &FxHashMap<usize, usize>,
    ) -> VesperResult<()> {
        self.scope = FunctionScope::new(FunctionKind::Script);
        self.enclosing.clear();
        self.classes.clear();
        self.symbols = SymbolStack::new();
        self.module_index = module_index;
        self.file = loaded.path.display().to_string();
        tracing::debug!(module = module_index, path = %self.file, "compiling module");

        for (decl, path) in loaded.ast.imports.iter().zip(&loaded.imports) {
            self.line = decl.span.start.line;
            if self.symbols.is_import(&decl.alias) {
                let err = VesperError::name_error(
                    format!("import alias {} is already in use", decl.alias),
                    decl.span,
                );
                return Err(self.report(err));
            }
            let Some(dep) = graph.index_of(path).and_then(|g| compiled.get(&g)) else {
                let err = VesperError::import_error(
                    format!("cannot find module {}", path.display()),
                    decl.span,
                );
                return Err(self.report(err));
            };
            let exports = self.modules[*dep]
                .export_names
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.clone(), idx))
                .collect();
            self.symbols.define_import(
                &decl.alias,
                ImportBinding {
                    module: *dep,
                    exports,
                },
            );
        }

        // Top-level functions and classes are visible before their declaration
        for stmt in &loaded.ast.statements {
            let name = match stmt {
                Stmt::Function { def } => &def.name,
                Stmt::Class { def } => &def.name,
                _ => continue,
            };
            if !self.symbols.is_import(name)
                && !self.symbols.current().declared_in_current_block(name)
            {
                self.symbols.define(name, false);
            }
        }

        let mut first_error = None;
        let mut exports = Vec::new();
        let mut export_names = Vec::new();
        for stmt in &loaded.ast.statements {
            if let Err(err) = self.compile_stmt(stmt) {
                let err = self.report(err);
                first_error.get_or_insert(err);
                continue;
            }
            if let Some(name) = exported_name(stmt) {
                match self.symbols.resolve(name) {
                    Some(symbol) if symbol.scope == SymbolScope::Global => {
                        exports.push(symbol.index);
                        export_names.push(name.to_string());
                    }
                    _ => {}
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let num_globals = self.symbols.current().num_definitions();
        if num_globals > MAX_U16_OPERAND + 1 {
            let err = VesperError::syntax_error("too many global variables", Span::default());
            return Err(self.report(err));
        }

        let scope = std::mem::replace(&mut self.scope, FunctionScope::new(FunctionKind::Script));
        let debug = self.add_debug_entry(scope.chunk.lines);
        self.modules.push(CompiledModule {
            instructions: scope.chunk.code,
            num_globals,
            exports,
            export_names,
            debug,
        });
        Ok(())
    }

    /// Send an error to the handler, attach the current file, and hand it back
    fn report(&mut self, err: VesperError) -> VesperError {
        let err = if err.file.is_empty() && !self.file.is_empty() {
            err.with_file(self.file.clone())
        } else {
            err
        };
        self.diagnostics.error(err.span, &err.message);
        err
    }

    fn warn(&mut self, span: Span, message: &str) {
        self.diagnostics.warn(span, message);
    }

    // ==================== Statements ====================

    fn compile_stmt(&mut self, stmt: &Stmt) -> VesperResult<()> {
        let stmt_span = stmt.span();
        self.line = stmt_span.start.line;
        match stmt {
            Stmt::Expression { expr, .. } => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, &[]);
            }
            Stmt::Print { expr, .. } => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Print, &[]);
            }
            Stmt::Var {
                name,
                initializer,
                is_const,
                exported,
                span,
            } => {
                self.check_export_position(*exported, *span)?;
                self.check_declaration(name, *span)?;
                match initializer {
                    Some(Expr::Function { params, body, span }) => {
                        self.compile_function(
                            Some(name),
                            Some(name),
                            params,
                            body,
                            FunctionKind::Function,
                            *span,
                        )?;
                    }
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.emit(OpCode::Nil, &[]);
                    }
                }
                let symbol = self.symbols.define(name, *is_const);
                self.check_slot(&symbol, *span)?;
                self.emit_set(&symbol, *span)?;
            }
            Stmt::Block { statements, .. } => {
                self.symbols.current_mut().enter_block();
                let result = self.compile_block(statements);
                self.symbols.current_mut().leave_block();
                result?;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.compile_expr(condition)?;
                let then_jump = self.emit(OpCode::JumpIfFalse, &[JUMP_PLACEHOLDER]);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let else_jump = self.emit(OpCode::Jump, &[JUMP_PLACEHOLDER]);
                        self.patch_jump_here(then_jump, stmt_span)?;
                        self.compile_stmt(else_branch)?;
                        self.patch_jump_here(else_jump, stmt_span)?;
                    }
                    None => self.patch_jump_here(then_jump, stmt_span)?,
                }
            }
            Stmt::While {
                condition, body, ..
            } => self.compile_while(condition, body, stmt_span)?,
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                self.symbols.current_mut().enter_block();
                let result = self.compile_for(
                    initializer.as_deref(),
                    condition.as_ref(),
                    increment.as_ref(),
                    body,
                    stmt_span,
                );
                self.symbols.current_mut().leave_block();
                result?;
            }
            Stmt::Break { span } => {
                if self.scope.loops.is_empty() {
                    return Err(VesperError::syntax_error(
                        "break statement outside of loop",
                        *span,
                    ));
                }
                let jump = self.emit(OpCode::Jump, &[JUMP_PLACEHOLDER]);
                if let Some(current) = self.scope.loops.current() {
                    current.breaks.push(jump);
                }
            }
            Stmt::Continue { span } => {
                let target = match self.scope.loops.current() {
                    Some(current) => current.continue_target,
                    None => {
                        return Err(VesperError::syntax_error(
                            "continue statement outside of loop",
                            *span,
                        ))
                    }
                };
                match target {
                    Some(target) => {
                        self.emit_jump_to(target, stmt_span)?;
                    }
                    None => {
                        let jump = self.emit(OpCode::Jump, &[JUMP_PLACEHOLDER]);
                        if let Some(current) = self.scope.loops.current() {
                            current.continues.push(jump);
                        }
                    }
                }
            }
            Stmt::Return { value, span } => self.compile_return(value.as_ref(), *span)?,
            Stmt::Function { def } => {
                self.check_export_position(def.exported, def.span)?;
                let symbol = self.declare_hoisted(&def.name, def.span)?;
                self.compile_function(
                    Some(&def.name),
                    Some(&def.name),
                    &def.params,
                    &def.body,
                    FunctionKind::Function,
                    def.span,
                )?;
                self.emit_set(&symbol, def.span)?;
            }
            Stmt::Class { def } => self.compile_class(def)?,
        }
        Ok(())
    }

    fn compile_block(&mut self, statements: &[Stmt]) -> VesperResult<()> {
        for stmt in statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_while(&mut self, condition: &Expr, body: &Stmt, span: Span) -> VesperResult<()> {
        let loop_start = self.scope.chunk.current_offset();
        self.scope.loops.push(Some(loop_start));

        let result = (|| -> VesperResult<()> {
            self.compile_expr(condition)?;
            let exit_jump = self.emit(OpCode::JumpIfFalse, &[JUMP_PLACEHOLDER]);
            self.compile_stmt(body)?;
            self.emit_jump_to(loop_start, span)?;
            self.patch_jump_here(exit_jump, span)
        })();

        let finished = self.finish_loop(span);
        result.and(finished)
    }

    fn compile_for(
        &mut self,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
        span: Span,
    ) -> VesperResult<()> {
        if let Some(init) = initializer {
            self.compile_stmt(init)?;
        }
        let loop_start = self.scope.chunk.current_offset();
        self.scope.loops.push(None);

        let result = (|| -> VesperResult<()> {
            let exit_jump = match condition {
                Some(cond) => {
                    self.compile_expr(cond)?;
                    Some(self.emit(OpCode::JumpIfFalse, &[JUMP_PLACEHOLDER]))
                }
                None => None,
            };
            self.compile_stmt(body)?;

            let continue_target = self.scope.chunk.current_offset();
            if let Some(current) = self.scope.loops.current() {
                current.continue_target = Some(continue_target);
            }
            if let Some(step) = increment {
                self.compile_expr(step)?;
                self.emit(OpCode::Pop, &[]);
            }
            self.emit_jump_to(loop_start, span)?;
            if let Some(exit) = exit_jump {
                self.patch_jump_here(exit, span)?;
            }
            Ok(())
        })();

        let finished = self.finish_loop(span);
        result.and(finished)
    }

    /// Pop the innermost loop, pointing its breaks past the loop end
    /// and its pending continues at the recorded continue target
    fn finish_loop(&mut self, span: Span) -> VesperResult<()> {
        let end = self.scope.chunk.current_offset();
        let Some(finished) = self.scope.loops.pop() else {
            return Ok(());
        };
        check_jump_target(end, span)?;
        for jump in finished.breaks {
            self.scope.chunk.patch_jump(jump, end);
        }
        let target = finished.continue_target.unwrap_or(end);
        for jump in finished.continues {
            self.scope.chunk.patch_jump(jump, target);
        }
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>, span: Span) -> VesperResult<()> {
        if self.scope.kind == FunctionKind::Initializer {
            if let Some(expr) = value {
                self.warn(span, "init always returns 'this'; the returned value is discarded");
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, &[]);
            }
            self.emit(OpCode::GetLocal, &[0]);
            self.emit(OpCode::ReturnValue, &[]);
            return Ok(());
        }
        match value {
            Some(expr) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::ReturnValue, &[]);
            }
            None => {
                self.emit(OpCode::Return, &[]);
            }
        }
        Ok(())
    }

    fn compile_class(&mut self, def: &ClassDef) -> VesperResult<()> {
        self.check_export_position(def.exported, def.span)?;
        let symbol = self.declare_hoisted(&def.name, def.span)?;

        let has_superclass = match &def.superclass {
            Some(superclass) => {
                if *superclass == def.name {
                    return Err(VesperError::syntax_error(
                        "a class cannot inherit from itself",
                        def.span,
                    ));
                }
                self.compile_identifier(superclass, def.span)?;
                true
            }
            None => {
                self.emit(OpCode::Nil, &[]);
                false
            }
        };

        if def.methods.len() > MAX_U8_OPERAND {
            return Err(VesperError::syntax_error(
                format!("too many methods in class {}", def.name),
                def.span,
            ));
        }

        self.classes.push(ClassContext { has_superclass });
        let result = self.compile_methods(&def.methods);
        self.classes.pop();
        result?;

        let name = self.add_constant(Value::string(&def.name), def.span)?;
        self.line = def.span.start.line;
        self.emit(OpCode::Class, &[name, def.methods.len()]);
        self.emit_set(&symbol, def.span)
    }

    fn compile_methods(&mut self, methods: &[FunctionDef]) -> VesperResult<()> {
        for method in methods {
            let kind = if method.name == "init" {
                FunctionKind::Initializer
            } else {
                FunctionKind::Method
            };
            self.compile_function(
                Some(&method.name),
                None,
                &method.params,
                &method.body,
                kind,
                method.span,
            )?;
        }
        Ok(())
    }

    /// Compile a function body into its own constant and emit the closure
    /// construction in the enclosing context. `self_name` makes the function
    /// callable by that name from inside its own body.
    fn compile_function(
        &mut self,
        name: Option<&str>,
        self_name: Option<&str>,
        params: &[String],
        body: &[Stmt],
        kind: FunctionKind,
        span: Span,
    ) -> VesperResult<()> {
        let receiver = matches!(kind, FunctionKind::Method | FunctionKind::Initializer);
        let num_params = params.len() + usize::from(receiver);
        if num_params > MAX_U8_OPERAND {
            return Err(VesperError::syntax_error("too many parameters", span));
        }

        let outer = std::mem::replace(&mut self.scope, FunctionScope::new(kind));
        self.enclosing.push(outer);
        self.symbols.push_function(self_name.map(str::to_string));

        let result = self.compile_function_body(params, body, receiver, span);

        let finished = std::mem::replace(
            &mut self.scope,
            self.enclosing
                .pop()
                .unwrap_or_else(|| FunctionScope::new(FunctionKind::Script)),
        );
        let table = self.symbols.pop_function();
        result?;
        let Some(table) = table else {
            return Err(VesperError::syntax_error("unbalanced function scope", span));
        };

        let num_locals = table.num_definitions();
        if num_locals > MAX_U8_OPERAND + 1 {
            return Err(VesperError::syntax_error(
                "too many local variables in function",
                span,
            ));
        }
        if table.free_symbols.len() > MAX_U8_OPERAND {
            return Err(VesperError::syntax_error("too many captured variables", span));
        }

        let debug = self.add_debug_entry(finished.chunk.lines);
        let function = CompiledFunction {
            instructions: finished.chunk.code,
            num_locals,
            num_params,
            name: name.map(str::to_string),
            module: self.module_index,
            debug,
        };
        let constant = self.add_constant(Value::Function(Arc::new(function)), span)?;

        self.line = span.start.line;
        for free in &table.free_symbols {
            match free.scope {
                SymbolScope::Local => self.emit(OpCode::MakeCell, &[free.index]),
                SymbolScope::Free => self.emit(OpCode::GetFreeCell, &[free.index]),
                _ => self.emit(OpCode::CurrentClosure, &[]),
            };
        }
        self.emit(OpCode::Closure, &[constant, table.free_symbols.len()]);
        Ok(())
    }

    fn compile_function_body(
        &mut self,
        params: &[String],
        body: &[Stmt],
        receiver: bool,
        span: Span,
    ) -> VesperResult<()> {
        if receiver {
            self.symbols.define("this", true);
        }
        for param in params {
            self.check_declaration(param, span)?;
            self.symbols.define(param, false);
        }
        for stmt in body {
            self.compile_stmt(stmt)?;
        }

        self.line = span.end.line;
        if self.scope.kind == FunctionKind::Initializer {
            self.emit(OpCode::GetLocal, &[0]);
            self.emit(OpCode::ReturnValue, &[]);
        } else {
            self.emit(OpCode::Return, &[]);
        }
        Ok(())
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &Expr) -> VesperResult<()> {
        self.line = expr.span().start.line;
        match expr {
            Expr::Literal { value, span } => match value {
                Literal::Number(n) => self.emit_constant(Value::Number(*n), *span)?,
                Literal::String(s) => self.emit_constant(Value::string(s), *span)?,
                Literal::Boolean(true) => {
                    self.emit(OpCode::True, &[]);
                }
                Literal::Boolean(false) => {
                    self.emit(OpCode::False, &[]);
                }
                Literal::Nil => {
                    self.emit(OpCode::Nil, &[]);
                }
            },
            Expr::Identifier { name, span } => self.compile_identifier(name, *span)?,
            Expr::Assign { name, value, span } => self.compile_assign(name, value, *span)?,
            Expr::Binary {
                left, op, right, ..
            } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.line = expr.span().start.line;
                match op {
                    BinaryOp::Add => self.emit(OpCode::Add, &[]),
                    BinaryOp::Sub => self.emit(OpCode::Sub, &[]),
                    BinaryOp::Mul => self.emit(OpCode::Mul, &[]),
                    BinaryOp::Div => self.emit(OpCode::Div, &[]),
                    BinaryOp::Mod => self.emit(OpCode::Mod, &[]),
                    BinaryOp::Equal => self.emit(OpCode::Equal, &[]),
                    BinaryOp::NotEqual => self.emit(OpCode::NotEqual, &[]),
                    BinaryOp::Greater => self.emit(OpCode::Greater, &[]),
                    BinaryOp::Less => self.emit(OpCode::Less, &[]),
                    BinaryOp::LessEqual => {
                        self.emit(OpCode::Greater, &[]);
                        self.emit(OpCode::Not, &[])
                    }
                    BinaryOp::GreaterEqual => {
                        self.emit(OpCode::Less, &[]);
                        self.emit(OpCode::Not, &[])
                    }
                };
            }
            Expr::Logical {
                left,
                op,
                right,
                span,
            } => {
                self.compile_expr(left)?;
                self.emit(OpCode::Dup, &[]);
                match op {
                    LogicalOp::And => {
                        let end_jump = self.emit(OpCode::JumpIfFalse, &[JUMP_PLACEHOLDER]);
                        self.emit(OpCode::Pop, &[]);
                        self.compile_expr(right)?;
                        self.patch_jump_here(end_jump, *span)?;
                    }
                    LogicalOp::Or => {
                        let else_jump = self.emit(OpCode::JumpIfFalse, &[JUMP_PLACEHOLDER]);
                        let end_jump = self.emit(OpCode::Jump, &[JUMP_PLACEHOLDER]);
                        self.patch_jump_here(else_jump, *span)?;
                        self.emit(OpCode::Pop, &[]);
                        self.compile_expr(right)?;
                        self.patch_jump_here(end_jump, *span)?;
                    }
                }
            }
            Expr::Unary { op, operand, .. } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Negate => self.emit(OpCode::Negate, &[]),
                    UnaryOp::Not => self.emit(OpCode::Not, &[]),
                };
            }
            Expr::Grouping { expr, .. } => self.compile_expr(expr)?,
            Expr::Call { callee, args, span } => {
                if args.len() > MAX_U8_OPERAND {
                    return Err(VesperError::syntax_error("too many arguments", *span));
                }
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.line = span.start.line;
                self.emit(OpCode::Call, &[args.len()]);
            }
            Expr::Function { params, body, span } => {
                self.compile_function(None, None, params, body, FunctionKind::Function, *span)?;
            }
            Expr::Get {
                object,
                property,
                span,
            } => {
                if let Some(alias) = self.import_alias(object) {
                    let alias = alias.to_string();
                    let (module, export) = self.resolve_export(&alias, property, *span)?;
                    self.emit(OpCode::GetExport, &[module, export]);
                } else {
                    self.compile_expr(object)?;
                    let name = self.add_constant(Value::string(property), *span)?;
                    self.emit(OpCode::GetProperty, &[name]);
                }
            }
            Expr::Set {
                object,
                property,
                value,
                span,
            } => {
                if let Some(alias) = self.import_alias(object) {
                    return Err(VesperError::syntax_error(
                        format!("cannot assign to export {} of module {}", property, alias),
                        *span,
                    ));
                }
                self.compile_expr(object)?;
                self.compile_expr(value)?;
                let name = self.add_constant(Value::string(property), *span)?;
                self.emit(OpCode::SetProperty, &[name]);
            }
            Expr::This { span } => {
                if self.classes.is_empty() {
                    return Err(VesperError::syntax_error(
                        "cannot use 'this' outside of a class",
                        *span,
                    ));
                }
                let symbol = self.resolve_this(*span)?;
                self.emit_get(&symbol);
            }
            Expr::Super { method, span } => {
                let Some(class) = self.classes.last().copied() else {
                    return Err(VesperError::syntax_error(
                        "cannot use 'super' outside of a class",
                        *span,
                    ));
                };
                if !class.has_superclass {
                    return Err(VesperError::syntax_error(
                        "cannot use 'super' in a class with no superclass",
                        *span,
                    ));
                }
                let receiver = self.resolve_this(*span)?;
                self.emit_get(&receiver);
                let name = self.add_constant(Value::string(method), *span)?;
                self.emit(OpCode::GetSuper, &[name]);
            }
            Expr::Array { elements, span } => {
                if elements.len() > MAX_U16_OPERAND {
                    return Err(VesperError::syntax_error("too many array elements", *span));
                }
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(OpCode::Array, &[elements.len()]);
            }
            Expr::Hash { entries, span } => {
                if entries.len() * 2 > MAX_U16_OPERAND {
                    return Err(VesperError::syntax_error("too many hash entries", *span));
                }
                for (key, value) in entries {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(OpCode::Hash, &[entries.len() * 2]);
            }
            Expr::Index { object, index, .. } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(OpCode::Index, &[]);
            }
            Expr::IndexSet {
                object,
                index,
                value,
                ..
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit(OpCode::SetIndex, &[]);
            }
        }
        Ok(())
    }

    fn compile_identifier(&mut self, name: &str, span: Span) -> VesperResult<()> {
        if self.symbols.is_import(name) {
            return Err(VesperError::name_error(
                format!("module alias {} can only be used to access its exports", name),
                span,
            ));
        }
        let symbol = self
            .symbols
            .resolve(name)
            .ok_or_else(|| VesperError::name_error(format!("undefined variable {}", name), span))?;
        self.emit_get(&symbol);
        Ok(())
    }

    fn compile_assign(&mut self, name: &str, value: &Expr, span: Span) -> VesperResult<()> {
        if name == "this" {
            return Err(VesperError::syntax_error("cannot assign to 'this'", span));
        }
        if self.symbols.is_import(name) {
            return Err(VesperError::syntax_error(
                format!("cannot assign to module alias {}", name),
                span,
            ));
        }
        let symbol = self
            .symbols
            .resolve(name)
            .ok_or_else(|| VesperError::name_error(format!("undefined variable {}", name), span))?;
        if symbol.is_const {
            let message = match symbol.scope {
                SymbolScope::Native | SymbolScope::Function => format!("cannot assign to {}", name),
                _ => format!("cannot assign to constant {}", name),
            };
            return Err(VesperError::syntax_error(message, span));
        }
        self.compile_expr(value)?;
        self.line = span.start.line;
        self.emit_set(&symbol, span)?;
        self.emit_get(&symbol);
        Ok(())
    }

    fn resolve_this(&mut self, span: Span) -> VesperResult<Symbol> {
        self.symbols.resolve("this").ok_or_else(|| {
            VesperError::syntax_error("cannot use 'this' outside of a method", span)
        })
    }

    /// The alias name when `object` is a bare import alias
    fn import_alias<'e>(&self, object: &'e Expr) -> Option<&'e str> {
        match object {
            Expr::Identifier { name, .. } if self.symbols.is_import(name) => Some(name),
            _ => None,
        }
    }

    fn resolve_export(
        &self,
        alias: &str,
        name: &str,
        span: Span,
    ) -> VesperResult<(usize, usize)> {
        self.symbols.resolve_import(alias, name).ok_or_else(|| {
            VesperError::name_error(format!("module {} has no export named {}", alias, name), span)
        })
    }

    // ==================== Declarations ====================

    fn check_declaration(&self, name: &str, span: Span) -> VesperResult<()> {
        if self.symbols.is_import(name) {
            return Err(VesperError::name_error(
                format!("cannot redeclare import alias {}", name),
                span,
            ));
        }
        let table = self.symbols.current();
        if !table.is_global() && table.declared_in_current_block(name) {
            return Err(VesperError::name_error(
                format!("variable {} is already declared in this scope", name),
                span,
            ));
        }
        Ok(())
    }

    fn check_export_position(&self, exported: bool, span: Span) -> VesperResult<()> {
        if exported && !(self.symbols.depth() == 0 && self.symbols.current().is_top_level()) {
            return Err(VesperError::syntax_error(
                "exports must be declared at module top level",
                span,
            ));
        }
        Ok(())
    }

    /// Reuse a module-level slot reserved for a function or class,
    /// otherwise define a fresh one
    fn declare_hoisted(&mut self, name: &str, span: Span) -> VesperResult<Symbol> {
        let table = self.symbols.current();
        if table.is_global() && table.is_top_level() && table.declared_in_current_block(name) {
            if let Some(symbol) = self.symbols.resolve(name) {
                if !symbol.is_const {
                    return Ok(symbol);
                }
            }
        }
        self.check_declaration(name, span)?;
        let symbol = self.symbols.define(name, false);
        self.check_slot(&symbol, span)?;
        Ok(symbol)
    }

    fn check_slot(&self, symbol: &Symbol, span: Span) -> VesperResult<()> {
        let limit = match symbol.scope {
            SymbolScope::Local => MAX_U8_OPERAND,
            _ => MAX_U16_OPERAND,
        };
        if symbol.index > limit {
            let what = if symbol.scope == SymbolScope::Local {
                "too many local variables in function"
            } else {
                "too many global variables"
            };
            return Err(VesperError::syntax_error(what, span));
        }
        Ok(())
    }

    // ==================== Emission ====================

    fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        self.scope.chunk.emit(op, operands, self.line)
    }

    /// Point the jump at `jump` to the current offset
    fn patch_jump_here(&mut self, jump: usize, span: Span) -> VesperResult<()> {
        let here = self.scope.chunk.current_offset();
        check_jump_target(here, span)?;
        self.scope.chunk.patch_jump(jump, here);
        Ok(())
    }

    /// Unconditional jump to an already known target
    fn emit_jump_to(&mut self, target: usize, span: Span) -> VesperResult<usize> {
        check_jump_target(target, span)?;
        Ok(self.emit(OpCode::Jump, &[target]))
    }

    fn add_constant(&mut self, value: Value, span: Span) -> VesperResult<usize> {
        if self.constants.len() > MAX_U16_OPERAND {
            return Err(VesperError::syntax_error("too many constants in one program", span));
        }
        self.constants.push(value);
        Ok(self.constants.len() - 1)
    }

    fn emit_constant(&mut self, value: Value, span: Span) -> VesperResult<()> {
        let index = self.add_constant(value, span)?;
        self.emit(OpCode::Constant, &[index]);
        Ok(())
    }

    fn add_debug_entry(&mut self, lines: Vec<usize>) -> usize {
        self.debug_info.push(DebugEntry {
            file: self.file.clone(),
            lines,
        });
        self.debug_info.len() - 1
    }

    fn emit_get(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(OpCode::GetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(OpCode::GetFree, &[symbol.index]),
            SymbolScope::Native => self.emit(OpCode::GetNative, &[symbol.index]),
            SymbolScope::Function => self.emit(OpCode::CurrentClosure, &[]),
        };
    }

    fn emit_set(&mut self, symbol: &Symbol, span: Span) -> VesperResult<()> {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::SetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(OpCode::SetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(OpCode::SetFree, &[symbol.index]),
            SymbolScope::Native | SymbolScope::Function => {
                return Err(VesperError::syntax_error(
                    format!("cannot assign to {}", symbol.name),
                    span,
                ))
            }
        };
        Ok(())
    }
}

/// Jump targets are absolute 2-byte offsets
fn check_jump_target(target: usize, span: Span) -> VesperResult<()> {
    if target > MAX_U16_OPERAND {
        return Err(VesperError::syntax_error("too much code to jump over", span));
    }
    Ok(())
}

fn exported_name(stmt: &Stmt) -> Option<&str> {
    match stmt {
        Stmt::Var {
            name,
            exported: true,
            ..
        } => Some(name),
        Stmt::Function { def } if def.exported => Some(&def.name),
        Stmt::Class { def } if def.exported => Some(&def.name),
        _ => None,
    }
}
