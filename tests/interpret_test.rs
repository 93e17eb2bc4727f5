use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use loxide::{InterpretResult, VM};

#[derive(Clone)]
struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> (InterpretResult, String) {
    let buffer = Rc::new(RefCell::new(Vec::new()));
    let mut vm = VM::with_output(Box::new(SharedOutput(buffer.clone())));
    let result = vm.interpret(source);
    let output = String::from_utf8(buffer.borrow().clone()).expect("output should be UTF-8");
    (result, output)
}

fn run_ok(source: &str) -> String {
    let (result, output) = run(source);
    assert_eq!(
        result,
        InterpretResult::InterpretOk,
        "program failed:\n{}",
        source
    );
    output
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_ok("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn grouping_overrides_precedence() {
    assert_eq!(run_ok("print (1 + 2) * 3;"), "9\n");
}

#[test]
fn interned_strings_compare_equal() {
    assert_eq!(run_ok("var a = \"hi\"; var b = \"hi\"; print a == b;"), "true\n");
}

#[test]
fn concatenated_strings_compare_equal_to_literals() {
    assert_eq!(run_ok("print \"he\" + \"llo\" == \"hello\";"), "true\n");
}

#[test]
fn closure_counter_keeps_state() {
    let source = "fun mk() {
        var x = 0;
        fun inc() { x = x + 1; return x; }
        return inc;
    }
    var f = mk();
    print f();
    print f();
    print f();";
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn closure_captures_variable_not_value() {
    let source = "var getter;
    {
        var x = 1;
        fun get() { return x; }
        getter = get;
        x = 2;
    }
    print getter();";
    assert_eq!(run_ok(source), "2\n");
}

#[test]
fn sibling_closures_share_one_upvalue() {
    let source = "var get;
    var set;
    fun make() {
        var shared = \"initial\";
        fun getter() { return shared; }
        fun setter(value) { shared = value; }
        get = getter;
        set = setter;
    }
    make();
    set(\"updated\");
    print get();";
    assert_eq!(run_ok(source), "updated\n");
}

#[test]
fn super_dispatches_to_parent_method() {
    let source = "class A { greet() { print \"A\"; } }
    class B < A { greet() { super.greet(); print \"B\"; } }
    B().greet();";
    assert_eq!(run_ok(source), "A\nB\n");
}

#[test]
fn inherited_method_is_callable_on_subclass() {
    let source = "class A { greet() { print \"hello\"; } }
    class B < A {}
    B().greet();";
    assert_eq!(run_ok(source), "hello\n");
}

#[test]
fn initializer_stores_fields() {
    assert_eq!(
        run_ok("class P { init(n) { this.n = n; } } var p = P(7); print p.n;"),
        "7\n"
    );
}

#[test]
fn initializer_returns_the_instance() {
    let source = "class P { init() { this.tag = \"made\"; } }
    var p = P();
    print p.tag;
    print P() == P();";
    assert_eq!(run_ok(source), "made\nfalse\n");
}

#[test]
fn while_loop_counts() {
    assert_eq!(
        run_ok("var i = 0; while (i < 3) { print i; i = i + 1; }"),
        "0\n1\n2\n"
    );
}

#[test]
fn for_loop_with_increment() {
    assert_eq!(
        run_ok("for (var i = 0; i < 3; i = i + 1) { print i; }"),
        "0\n1\n2\n"
    );
}

#[test]
fn if_else_branches() {
    assert_eq!(
        run_ok("if (1 < 2) { print \"then\"; } else { print \"else\"; }"),
        "then\n"
    );
    assert_eq!(
        run_ok("if (2 < 1) { print \"then\"; } else { print \"else\"; }"),
        "else\n"
    );
}

#[test]
fn and_or_short_circuit() {
    assert_eq!(run_ok("print true and \"yes\";"), "yes\n");
    assert_eq!(run_ok("print nil and \"never\";"), "nil\n");
    assert_eq!(run_ok("print false or \"fallback\";"), "fallback\n");
    assert_eq!(run_ok("print \"first\" or \"second\";"), "first\n");
}

#[test]
fn zero_and_empty_string_are_truthy() {
    assert_eq!(run_ok("if (0) print \"zero\";"), "zero\n");
    assert_eq!(run_ok("if (\"\") print \"empty\";"), "empty\n");
    assert_eq!(run_ok("print !nil; print !false; print !0;"), "true\ntrue\nfalse\n");
}

#[test]
fn nan_compares_unequal_to_itself() {
    assert_eq!(run_ok("var nan = 0 / 0; print nan == nan;"), "false\n");
}

#[test]
fn print_formats_by_kind() {
    assert_eq!(run_ok("print nil;"), "nil\n");
    assert_eq!(run_ok("print true;"), "true\n");
    assert_eq!(run_ok("print 1.5;"), "1.5\n");
    assert_eq!(run_ok("fun f() {} print f;"), "<fn f>\n");
    assert_eq!(run_ok("print clock;"), "<native fn>\n");
    assert_eq!(run_ok("class C {} print C;"), "C\n");
    assert_eq!(run_ok("class C {} print C();"), "C instance\n");
    assert_eq!(
        run_ok("class C { m() {} } var c = C(); print c.m;"),
        "<fn m>\n"
    );
}

#[test]
fn bound_method_remembers_its_receiver() {
    let source = "class Speaker {
        speak() { return this.word; }
    }
    var speaker = Speaker();
    speaker.word = \"hi\";
    var method = speaker.speak;
    print method();";
    assert_eq!(run_ok(source), "hi\n");
}

#[test]
fn fields_shadow_methods() {
    let source = "class Box { label() { return \"method\"; } }
    fun replacement() { return \"field\"; }
    var box = Box();
    box.label = replacement;
    print box.label();";
    assert_eq!(run_ok(source), "field\n");
}

#[test]
fn method_overriding_wins_over_copied_parent_method() {
    let source = "class A { name() { return \"A\"; } }
    class B < A { name() { return \"B\"; } }
    print A().name();
    print B().name();";
    assert_eq!(run_ok(source), "A\nB\n");
}

#[test]
fn recursion_works() {
    let source = "fun fib(n) {
        if (n < 2) return n;
        return fib(n - 2) + fib(n - 1);
    }
    print fib(10);";
    assert_eq!(run_ok(source), "55\n");
}

#[test]
fn clock_native_returns_a_number() {
    assert_eq!(run_ok("print clock() > 0;"), "true\n");
    assert_eq!(run_ok("var a = clock(); var b = clock(); print b >= a;"), "true\n");
}

#[test]
fn number_formatting_round_trips_literals() {
    assert_eq!(run_ok("print 7;"), "7\n");
    assert_eq!(run_ok("print 0.5;"), "0.5\n");
    assert_eq!(run_ok("print 123.25;"), "123.25\n");
    assert_eq!(run_ok("print -42;"), "-42\n");
}

#[test]
fn adding_number_and_string_is_a_runtime_error() {
    let (result, output) = run("print 1 + \"a\";");
    assert_eq!(result, InterpretResult::InterpretRuntimeError);
    assert_eq!(output, "");
}

#[test]
fn calling_undeclared_global_is_a_runtime_error() {
    let (result, _) = run("foo();");
    assert_eq!(result, InterpretResult::InterpretRuntimeError);
}

#[test]
fn top_level_return_is_a_compile_error() {
    let (result, _) = run("return 5;");
    assert_eq!(result, InterpretResult::InterpretCompileError);
}

#[test]
fn self_inheritance_is_a_compile_error() {
    let (result, _) = run("class A < A {}");
    assert_eq!(result, InterpretResult::InterpretCompileError);
}

#[test]
fn too_many_locals_is_a_compile_error() {
    let mut source = String::from("fun crowded() {\n");
    for index in 0..260 {
        source.push_str(&format!("var local{} = {};\n", index, index));
    }
    source.push_str("}\n");
    let (result, _) = run(&source);
    assert_eq!(result, InterpretResult::InterpretCompileError);
}

#[test]
fn runtime_error_stops_later_statements() {
    let (result, output) = run("print \"before\"; nope(); print \"after\";");
    assert_eq!(result, InterpretResult::InterpretRuntimeError);
    assert_eq!(output, "before\n");
}

#[test]
fn statements_after_synchronized_error_still_report_compile_error() {
    let (result, _) = run("var = 1; print \"ok\";");
    assert_eq!(result, InterpretResult::InterpretCompileError);
}
