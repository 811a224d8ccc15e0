use super::*;
use crate::ast::build::*;
use crate::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use crate::compiler::{Compiler, MemorySource};
use crate::error::{ErrorKind, VesperError};
use std::ops::ControlFlow;

fn vm_for(stmts: &[Stmt]) -> Vm {
    let mut compiler = Compiler::new();
    for stmt in stmts {
        compiler.compile(stmt).unwrap();
    }
    Vm::new(compiler.finish())
}

fn run(stmts: &[Stmt]) -> Vm {
    let mut vm = vm_for(stmts);
    vm.run_program().unwrap();
    vm
}

fn run_err(stmts: &[Stmt]) -> VesperError {
    let mut vm = vm_for(stmts);
    match vm.run_program() {
        Ok(()) => panic!("expected a runtime error"),
        Err(err) => err,
    }
}

fn eval(expr: Expr) -> Value {
    run(&[expr_stmt(expr)]).last_popped().clone()
}

fn output(stmts: &[Stmt]) -> Vec<String> {
    run(stmts).output().to_vec()
}

fn add(l: Expr, r: Expr) -> Expr {
    bin(l, BinaryOp::Add, r)
}

fn sub(l: Expr, r: Expr) -> Expr {
    bin(l, BinaryOp::Sub, r)
}

fn lt(l: Expr, r: Expr) -> Expr {
    bin(l, BinaryOp::Less, r)
}

fn eq(l: Expr, r: Expr) -> Expr {
    bin(l, BinaryOp::Equal, r)
}

// ==================== Expressions ====================

#[test]
fn test_arithmetic() {
    assert_eq!(eval(add(num(1.0), num(2.0))), Value::Number(3.0));
    assert_eq!(eval(bin(num(4.0), BinaryOp::Div, num(2.0))), Value::Number(2.0));
    assert_eq!(eval(bin(num(7.0), BinaryOp::Mod, num(3.0))), Value::Number(1.0));
    assert_eq!(eval(bin(num(2.0), BinaryOp::Mul, num(2.5))), Value::Number(5.0));
    assert_eq!(eval(unary(UnaryOp::Negate, num(5.0))), Value::Number(-5.0));
    assert_eq!(eval(unary(UnaryOp::Not, nil())), Value::Boolean(true));
}

#[test]
fn test_division_by_zero_is_ieee() {
    assert_eq!(
        eval(bin(num(1.0), BinaryOp::Div, num(0.0))),
        Value::Number(f64::INFINITY)
    );
}

#[test]
fn test_string_concatenation() {
    assert_eq!(eval(add(string("foo"), string("bar"))), Value::string("foobar"));
    assert_eq!(
        eval(add(num(42.0), string(" is the answer"))),
        Value::string("42 is the answer")
    );
    assert_eq!(eval(add(string("n="), num(1.5))), Value::string("n=1.5"));
}

#[test]
fn test_comparisons() {
    assert_eq!(eval(bin(num(1.0), BinaryOp::LessEqual, num(1.0))), Value::Boolean(true));
    assert_eq!(eval(bin(num(2.0), BinaryOp::GreaterEqual, num(3.0))), Value::Boolean(false));
    assert_eq!(eval(lt(string("a"), string("b"))), Value::Boolean(true));
    assert_eq!(eval(eq(string("a"), string("a"))), Value::Boolean(true));
    assert_eq!(eval(bin(num(1.0), BinaryOp::NotEqual, string("1"))), Value::Boolean(true));
}

#[test]
fn test_type_mismatch() {
    let err = run_err(&[expr_stmt(sub(num(1.0), string("a")))]);
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "unsupported operand types for -: number and string");

    let err = run_err(&[expr_stmt(add(nil(), num(1.0)))]);
    assert_eq!(err.message, "unsupported operand types for +: nil and number");
}

#[test]
fn test_and_or_return_operands() {
    assert_eq!(eval(and(num(0.0), num(42.0))), Value::Number(0.0));
    assert_eq!(eval(or(num(5.0), num(42.0))), Value::Number(5.0));
    assert_eq!(eval(or(nil(), num(42.0))), Value::Number(42.0));
    assert_eq!(eval(and(boolean(false), num(42.0))), Value::Boolean(false));
}

#[test]
fn test_short_circuit_skips_right_side() {
    // len() with no arguments would fault if it ran
    assert_eq!(
        eval(and(boolean(false), call(ident("len"), vec![]))),
        Value::Boolean(false)
    );
    assert_eq!(eval(or(num(1.0), call(ident("len"), vec![]))), Value::Number(1.0));
}

#[test]
fn test_print_output() {
    let out = output(&[
        print(num(1.0)),
        print(string("two")),
        print(array(vec![num(1.0), nil(), boolean(true)])),
        print(hash(vec![(string("b"), num(2.0)), (string("a"), num(1.0))])),
    ]);
    assert_eq!(out, vec!["1", "two", "[1, nil, true]", "{a: 1, b: 2}"]);
}

// ==================== Variables and control flow ====================

#[test]
fn test_globals_and_blocks() {
    let out = output(&[
        var("x", num(1.0)),
        block(vec![var("x", num(2.0)), print(ident("x"))]),
        print(ident("x")),
    ]);
    // A module-level block gets its own global slot
    assert_eq!(out, vec!["2", "1"]);
}

#[test]
fn test_function_locals_shadow_in_blocks() {
    let out = output(&[
        fun(
            "f",
            &[],
            vec![
                var("x", num(1.0)),
                block(vec![var("x", num(2.0)), print(ident("x"))]),
                print(ident("x")),
            ],
        ),
        expr_stmt(call(ident("f"), vec![])),
    ]);
    assert_eq!(out, vec!["2", "1"]);
}

#[test]
fn test_uninitialized_local_is_nil() {
    let out = output(&[
        fun(
            "f",
            &[],
            vec![
                Stmt::Var {
                    name: "x".into(),
                    initializer: None,
                    is_const: false,
                    exported: false,
                    span: Default::default(),
                },
                ret(Some(ident("x"))),
            ],
        ),
        print(call(ident("f"), vec![])),
    ]);
    assert_eq!(out, vec!["nil"]);
}

#[test]
fn test_while_with_break() {
    let out = output(&[
        var("n", num(0.0)),
        while_(
            boolean(true),
            block(vec![
                expr_stmt(assign("n", add(ident("n"), num(1.0)))),
                if_(eq(ident("n"), num(5.0)), brk(), None),
            ]),
        ),
        print(ident("n")),
    ]);
    assert_eq!(out, vec!["5"]);
}

#[test]
fn test_nested_loops_break_and_continue_innermost() {
    let inner = for_(
        Some(var("j", num(0.0))),
        Some(lt(ident("j"), num(10.0))),
        Some(assign("j", add(ident("j"), num(1.0)))),
        block(vec![
            if_(eq(ident("j"), num(2.0)), cont(), None),
            if_(eq(ident("j"), num(4.0)), brk(), None),
            expr_stmt(assign("total", add(ident("total"), num(1.0)))),
        ]),
    );
    let out = output(&[
        var("total", num(0.0)),
        for_(
            Some(var("i", num(0.0))),
            Some(lt(ident("i"), num(3.0))),
            Some(assign("i", add(ident("i"), num(1.0)))),
            inner,
        ),
        print(ident("total")),
    ]);
    // j = 0, 1, 3 count on each of three outer passes
    assert_eq!(out, vec!["9"]);
}

#[test]
fn test_for_with_omitted_clauses() {
    let out = output(&[
        var("i", num(0.0)),
        for_(
            None,
            None,
            None,
            block(vec![
                if_(eq(ident("i"), num(3.0)), brk(), None),
                expr_stmt(assign("i", add(ident("i"), num(1.0)))),
            ]),
        ),
        print(ident("i")),
    ]);
    assert_eq!(out, vec!["3"]);
}

// ==================== Functions and closures ====================

fn counter_factory() -> Stmt {
    fun(
        "make_counter",
        &[],
        vec![
            var("count", num(0.0)),
            fun(
                "inc",
                &[],
                vec![
                    expr_stmt(assign("count", add(ident("count"), num(1.0)))),
                    ret(Some(ident("count"))),
                ],
            ),
            ret(Some(ident("inc"))),
        ],
    )
}

#[test]
fn test_counter_closures_are_independent() {
    let out = output(&[
        counter_factory(),
        var("c", call(ident("make_counter"), vec![])),
        print(call(ident("c"), vec![])),
        print(call(ident("c"), vec![])),
        print(call(ident("c"), vec![])),
        var("d", call(ident("make_counter"), vec![])),
        print(call(ident("d"), vec![])),
        print(call(ident("c"), vec![])),
    ]);
    assert_eq!(out, vec!["1", "2", "3", "1", "4"]);
}

#[test]
fn test_sibling_closures_share_a_cell() {
    let out = output(&[
        fun(
            "pair",
            &[],
            vec![
                var("n", num(0.0)),
                var(
                    "inc",
                    fun_expr(&[], vec![expr_stmt(assign("n", add(ident("n"), num(1.0))))]),
                ),
                var("read", fun_expr(&[], vec![ret(Some(ident("n")))])),
                // The defining frame also sees writes made through the cell
                expr_stmt(call(ident("inc"), vec![])),
                print(ident("n")),
                ret(Some(array(vec![ident("inc"), ident("read")]))),
            ],
        ),
        var("p", call(ident("pair"), vec![])),
        expr_stmt(call(index(ident("p"), num(0.0)), vec![])),
        expr_stmt(call(index(ident("p"), num(0.0)), vec![])),
        print(call(index(ident("p"), num(1.0)), vec![])),
    ]);
    assert_eq!(out, vec!["1", "3"]);
}

#[test]
fn test_capture_through_intermediate_function() {
    let out = output(&[
        fun(
            "a",
            &[],
            vec![
                var("x", num(10.0)),
                fun(
                    "b",
                    &[],
                    vec![fun("c", &[], vec![ret(Some(ident("x")))]), ret(Some(ident("c")))],
                ),
                ret(Some(ident("b"))),
            ],
        ),
        print(call(call(call(ident("a"), vec![]), vec![]), vec![])),
    ]);
    assert_eq!(out, vec!["10"]);
}

#[test]
fn test_recursive_fibonacci() {
    let out = output(&[
        fun(
            "fib",
            &["n"],
            vec![
                if_(lt(ident("n"), num(2.0)), ret(Some(ident("n"))), None),
                ret(Some(add(
                    call(ident("fib"), vec![sub(ident("n"), num(1.0))]),
                    call(ident("fib"), vec![sub(ident("n"), num(2.0))]),
                ))),
            ],
        ),
        print(call(ident("fib"), vec![num(15.0)])),
    ]);
    assert_eq!(out, vec!["610"]);
}

#[test]
fn test_local_recursive_function() {
    let out = output(&[
        fun(
            "outer",
            &[],
            vec![
                fun(
                    "fact",
                    &["n"],
                    vec![
                        if_(lt(ident("n"), num(2.0)), ret(Some(num(1.0))), None),
                        ret(Some(bin(
                            ident("n"),
                            BinaryOp::Mul,
                            call(ident("fact"), vec![sub(ident("n"), num(1.0))]),
                        ))),
                    ],
                ),
                ret(Some(call(ident("fact"), vec![num(5.0)]))),
            ],
        ),
        print(call(ident("outer"), vec![])),
    ]);
    assert_eq!(out, vec!["120"]);
}

#[test]
fn test_function_without_return_yields_nil() {
    let out = output(&[
        fun("f", &[], vec![expr_stmt(num(1.0))]),
        print(call(ident("f"), vec![])),
    ]);
    assert_eq!(out, vec!["nil"]);
}

#[test]
fn test_wrong_argument_count() {
    let err = run_err(&[
        fun("f", &["a", "b"], vec![]),
        expr_stmt(call(ident("f"), vec![num(1.0)])),
    ]);
    assert_eq!(err.kind, ErrorKind::ArgumentError);
    assert_eq!(err.message, "wrong number of arguments: want=2, got=1");
}

#[test]
fn test_calling_a_non_function() {
    let err = run_err(&[var("x", num(1.0)), expr_stmt(call(ident("x"), vec![]))]);
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "cannot call number");
}

#[test]
fn test_unbounded_recursion_overflows() {
    let err = run_err(&[
        fun("f", &[], vec![ret(Some(call(ident("f"), vec![])))]),
        expr_stmt(call(ident("f"), vec![])),
    ]);
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

// ==================== Classes ====================

fn point_class() -> Stmt {
    class(
        "Point",
        None,
        vec![
            method(
                "init",
                &["x", "y"],
                vec![
                    expr_stmt(set(this(), "x", ident("x"))),
                    expr_stmt(set(this(), "y", ident("y"))),
                ],
            ),
            method(
                "sum",
                &[],
                vec![ret(Some(add(get(this(), "x"), get(this(), "y"))))],
            ),
        ],
    )
}

#[test]
fn test_class_init_and_methods() {
    let out = output(&[
        point_class(),
        var("p", call(ident("Point"), vec![num(1.0), num(2.0)])),
        print(call(get(ident("p"), "sum"), vec![])),
        var("m", get(ident("p"), "sum")),
        expr_stmt(set(ident("p"), "x", num(10.0))),
        print(call(ident("m"), vec![])),
        print(ident("p")),
    ]);
    assert_eq!(out, vec!["3", "12", "<Point instance>"]);
}

#[test]
fn test_init_returns_instance_despite_return_value() {
    let out = output(&[
        class(
            "A",
            None,
            vec![method(
                "init",
                &[],
                vec![expr_stmt(set(this(), "v", num(1.0))), ret(Some(num(99.0)))],
            )],
        ),
        print(get(call(ident("A"), vec![]), "v")),
    ]);
    assert_eq!(out, vec!["1"]);
}

#[test]
fn test_class_without_init_rejects_arguments() {
    let err = run_err(&[
        class("A", None, vec![]),
        expr_stmt(call(ident("A"), vec![num(1.0)])),
    ]);
    assert_eq!(err.kind, ErrorKind::ArgumentError);
    assert_eq!(err.message, "expected 0 arguments but got 1");
}

#[test]
fn test_init_arity_is_checked() {
    let err = run_err(&[
        point_class(),
        expr_stmt(call(ident("Point"), vec![num(1.0)])),
    ]);
    assert_eq!(err.message, "wrong number of arguments: want=2, got=1");
}

#[test]
fn test_super_reaches_overridden_method() {
    let out = output(&[
        class(
            "A",
            None,
            vec![method("greet", &[], vec![ret(Some(string("A")))])],
        ),
        class(
            "B",
            Some("A"),
            vec![method(
                "greet",
                &[],
                vec![ret(Some(add(string("B"), call(sup("greet"), vec![]))))],
            )],
        ),
        print(call(get(call(ident("B"), vec![]), "greet"), vec![])),
    ]);
    assert_eq!(out, vec!["BA"]);
}

#[test]
fn test_super_starts_above_receiver_class() {
    let classes = || {
        vec![
            class(
                "A",
                None,
                vec![
                    method("name", &[], vec![ret(Some(string("A")))]),
                    method("m", &[], vec![ret(Some(string("A")))]),
                ],
            ),
            class(
                "B",
                Some("A"),
                vec![
                    method("name", &[], vec![ret(Some(string("B")))]),
                    method("up", &[], vec![ret(Some(call(sup("name"), vec![])))]),
                    method(
                        "m",
                        &[],
                        vec![ret(Some(add(string("B"), call(sup("m"), vec![]))))],
                    ),
                ],
            ),
            class("C", Some("B"), vec![]),
        ]
    };

    // `up` is defined on B, but the receiver is a C, so super lands on B
    let mut stmts = classes();
    stmts.push(print(call(get(call(ident("C"), vec![]), "up"), vec![])));
    stmts.push(print(call(get(call(ident("B"), vec![]), "up"), vec![])));
    assert_eq!(output(&stmts), vec!["B", "A"]);

    // B.m on a C instance keeps finding B.m through super
    let mut stmts = classes();
    stmts.push(expr_stmt(call(get(call(ident("C"), vec![]), "m"), vec![])));
    let err = run_err(&stmts);
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

#[test]
fn test_inherited_init() {
    let out = output(&[
        point_class(),
        class("Point3", Some("Point"), vec![]),
        print(call(get(call(ident("Point3"), vec![num(2.0), num(3.0)]), "sum"), vec![])),
    ]);
    assert_eq!(out, vec!["5"]);
}

#[test]
fn test_three_level_method_chain() {
    let out = output(&[
        class(
            "A",
            None,
            vec![method("hello", &[], vec![ret(Some(string("hi")))])],
        ),
        class("B", Some("A"), vec![]),
        class("C", Some("B"), vec![]),
        print(call(get(call(ident("C"), vec![]), "hello"), vec![])),
    ]);
    assert_eq!(out, vec!["hi"]);
}

#[test]
fn test_property_errors() {
    let err = run_err(&[
        class("A", None, vec![]),
        expr_stmt(get(call(ident("A"), vec![]), "nope")),
    ]);
    assert_eq!(err.kind, ErrorKind::AttributeError);
    assert_eq!(err.message, "undefined property nope on A");

    let err = run_err(&[var("x", num(1.0)), expr_stmt(get(ident("x"), "y"))]);
    assert_eq!(err.message, "only instances have properties, got number");
}

#[test]
fn test_superclass_must_be_a_class() {
    let err = run_err(&[var("NotAClass", num(1.0)), class("B", Some("NotAClass"), vec![])]);
    assert_eq!(err.message, "superclass must be a class, got number");
}

// ==================== Collections and natives ====================

#[test]
fn test_array_indexing() {
    let out = output(&[
        var("a", array(vec![num(1.0), num(2.0), num(3.0)])),
        print(index(ident("a"), num(1.0))),
        expr_stmt(index_set(ident("a"), num(0.0), num(9.0))),
        print(ident("a")),
        print(index(string("abc"), num(2.0))),
    ]);
    assert_eq!(out, vec!["2", "[9, 2, 3]", "c"]);

    let err = run_err(&[
        var("a", array(vec![num(1.0)])),
        expr_stmt(index(ident("a"), num(1.0))),
    ]);
    assert_eq!(err.kind, ErrorKind::IndexError);
    assert_eq!(err.message, "index out of bounds");

    let err = run_err(&[expr_stmt(index(array(vec![]), num(-1.0)))]);
    assert_eq!(err.message, "index out of bounds");
}

#[test]
fn test_hash_access() {
    let out = output(&[
        var("h", hash(vec![(string("a"), num(1.0)), (num(2.0), string("two"))])),
        print(index(ident("h"), string("a"))),
        print(index(ident("h"), num(2.0))),
        expr_stmt(index_set(ident("h"), boolean(true), num(3.0))),
        print(call(ident("len"), vec![ident("h")])),
    ]);
    assert_eq!(out, vec!["1", "two", "3"]);

    let err = run_err(&[expr_stmt(index(hash(vec![]), string("z")))]);
    assert_eq!(err.kind, ErrorKind::KeyError);
    assert_eq!(err.message, "key 'z' not found in hash map");

    let err = run_err(&[expr_stmt(hash(vec![(array(vec![]), num(1.0))]))]);
    assert_eq!(err.message, "unusable as hash key: array");
}

#[test]
fn test_natives() {
    assert_eq!(eval(call(ident("len"), vec![string("héllo")])), Value::Number(5.0));
    assert!(eval(call(ident("clock"), vec![])).as_number().is_some());

    let err = run_err(&[expr_stmt(call(ident("len"), vec![]))]);
    assert_eq!(err.message, "wrong number of arguments: want=1, got=0");
}

#[test]
fn test_runtime_error_location() {
    let err = run_err(&[expr_stmt(call_at(ident("len"), vec![num(1.0)], 7))]);
    assert_eq!(err.message, "argument to `len` not supported, got number");
    assert_eq!(err.line(), 7);
    assert_eq!(err.stack_trace.len(), 1);
    assert_eq!(err.stack_trace[0].function_name, "<module>");
}

// ==================== Hooks, limits and state ====================

#[test]
fn test_step_hook_sees_every_instruction() {
    let mut vm = vm_for(&[expr_stmt(add(num(1.0), num(2.0)))]);
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let record = seen.clone();
    vm.set_on_step(move |vm| {
        let state = vm.state();
        record.lock().push(state.instruction.map(|i| i.op));
        ControlFlow::Continue(())
    });
    vm.run_program().unwrap();

    use crate::compiler::OpCode;
    assert_eq!(
        *seen.lock(),
        vec![
            Some(OpCode::Constant),
            Some(OpCode::Constant),
            Some(OpCode::Add),
            Some(OpCode::Pop)
        ]
    );
}

#[test]
fn test_step_hook_can_halt() {
    let mut vm = vm_for(&[print(num(1.0)), print(num(2.0))]);
    let mut steps = 0;
    vm.set_on_step(move |_| {
        steps += 1;
        if steps > 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    let err = vm.run_program().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Halted);
    assert_eq!(vm.output(), ["1"]);
}

#[test]
fn test_frame_limit_from_config() {
    let config = VmConfig::from_json(r#"{"max_frames": 4}"#).unwrap();
    assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);

    let mut compiler = Compiler::new();
    for stmt in [
        fun("f", &["n"], vec![ret(Some(call(ident("f"), vec![ident("n")])))]),
        expr_stmt(call(ident("f"), vec![num(1.0)])),
    ] {
        compiler.compile(&stmt).unwrap();
    }
    let mut vm = Vm::with_config(compiler.finish(), config);
    let err = vm.run_program().unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow);
    assert_eq!(err.stack_trace.len(), 4);
}

#[test]
fn test_state_snapshot() {
    let mut vm = vm_for(&[var("x", num(1.0)), var("y", array(vec![ident("x")]))]);
    vm.run_program().unwrap();
    let state = vm.state();
    assert!(state.finished);
    assert!(state.frames.is_empty());
    assert_eq!(
        state.module_globals(0).unwrap(),
        [
            ValueView::Number(1.0),
            ValueView::Array(vec![ValueView::Number(1.0)])
        ]
    );
    assert_eq!(state.constants[0], ValueView::Number(1.0));
}

// ==================== Modules ====================

fn run_modules(source: &mut MemorySource) -> Vm {
    let program = Compiler::new()
        .compile_program("/app/main.vsp", source)
        .unwrap();
    let mut vm = Vm::new(program);
    vm.run_program().unwrap();
    vm
}

#[test]
fn test_module_globals_do_not_collide() {
    let mut source = MemorySource::new()
        .with(
            "/app/lib.vsp",
            module(
                vec![],
                vec![
                    var("x", string("lib")),
                    export_fun("get", &[], vec![ret(Some(ident("x")))]),
                    export_var("version", num(3.0)),
                ],
            ),
        )
        .with(
            "/app/main.vsp",
            module(
                vec![import("./lib.vsp", "lib")],
                vec![
                    var("x", string("main")),
                    print(call(get(ident("lib"), "get"), vec![])),
                    print(ident("x")),
                    print(get(ident("lib"), "version")),
                ],
            ),
        );
    let vm = run_modules(&mut source);
    assert_eq!(vm.output(), ["lib", "main", "3"]);
    assert_eq!(vm.module_globals(1).unwrap()[0], Value::string("main"));
}

#[test]
fn test_shared_dependency_runs_once() {
    let mut source = MemorySource::new()
        .with(
            "/app/base.vsp",
            module(vec![], vec![print(string("base")), export_var("n", num(1.0))]),
        )
        .with(
            "/app/a.vsp",
            module(
                vec![import("./base.vsp", "base")],
                vec![export_var("n", add(get(ident("base"), "n"), num(1.0)))],
            ),
        )
        .with(
            "/app/main.vsp",
            module(
                vec![import("./base.vsp", "base"), import("./a.vsp", "a")],
                vec![print(add(get(ident("base"), "n"), get(ident("a"), "n")))],
            ),
        );
    let vm = run_modules(&mut source);
    assert_eq!(vm.output(), ["base", "3"]);
}
