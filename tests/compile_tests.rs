//! End-to-end tests: source files through the resolver and compiler to
//! textual IR, asserting on the emitted text.

use aster::compiler::compile_to_ir;
use aster::compiler::compiler_errors::CompileError;
use aster::compiler::resolver::resolve_unit;
use std::fs;

/// Builds a throwaway workspace from `(relative path, source)` pairs; the
/// first file is the entry.
fn compile(files: &[(&str, &str)]) -> (String, Vec<CompileError>) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("aster.lock"), "lock_version = 0\n").unwrap();
    for (rel, source) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, source).unwrap();
    }
    let entry = dir.path().join(files[0].0);
    let unit = resolve_unit(&entry).expect("resolution should succeed");
    compile_to_ir(&unit)
}

fn compile_one(source: &str) -> (String, Vec<CompileError>) {
    compile(&[("src/main.as", source)])
}

fn assert_clean(errors: &[CompileError]) {
    assert!(
        errors.is_empty(),
        "expected no errors, got: {:#?}",
        errors
    );
}

#[test]
fn minimal_program_emits_main_and_module_header() {
    let (ir, errors) = compile_one("def main() returns i32\n    return 0\n");
    assert_clean(&errors);

    assert!(ir.starts_with("; ModuleID = 'aster'\nsource_filename = \"aster\"\n\n"));
    assert!(ir.contains("declare noalias ptr @calloc(i64, i64)\n"));
    assert!(ir.contains("declare ptr @memcpy(ptr, ptr, i64)\n"));
    assert!(ir.contains("define i32 @main() {\nentry:\n"));
    // The integer literal is 64-bit and gets truncated to the declared
    // return type before the terminator.
    assert!(ir.contains("%t0 = trunc i64 0 to i32\n"));
    assert!(ir.contains("  ret i32 %t0\n"));
}

#[test]
fn short_circuit_and_never_loads_on_the_false_path() {
    let source = "\
def check(p is ref i32) returns i32
    if p is not null and *p == 42 then
        return 1
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);

    // The null test branches before anything loads through `p`.
    let null_check = ir.find("icmp ne ptr %p0, null").expect("null check");
    let first_branch = ir.find("br i1").expect("conditional branch");
    let load = ir.find("load i32, ptr %p0").expect("deref of p");
    assert!(null_check < first_branch);
    assert!(first_branch < load);

    // The load lives in the second condition block, after its label.
    let second_block = ir.find("bb4:").expect("second condition block");
    assert!(second_block < load);

    // The false path only forwards to the else label; it evaluates nothing.
    let false_block = &ir[ir.find("bb3:").unwrap()..];
    let false_body: Vec<&str> = false_block.lines().skip(1).take(1).collect();
    assert_eq!(false_body, vec!["  br label %bb1"]);

    // Exactly one load of p in the whole function.
    assert_eq!(ir.matches("load i32, ptr %p0").count(), 1);
}

#[test]
fn short_circuit_or_skips_the_second_operand_on_true() {
    let source = "\
def pick(p is ref i32) returns i32
    if p == null or *p == 7 then
        return 1
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);

    // The true path of the null test forwards straight to the then label
    // without touching the second operand.
    let true_block = &ir[ir.find("bb4:").unwrap()..];
    let true_body: Vec<&str> = true_block.lines().skip(1).take(1).collect();
    assert_eq!(true_body, vec!["  br label %bb0"]);

    // The dereference only happens in the block the false edge targets.
    let false_block = ir.find("bb3:").unwrap();
    let load = ir.find("load i32, ptr %p0").unwrap();
    assert!(false_block < load);
}

#[test]
fn not_swaps_branch_targets_in_conditions() {
    let source = "\
def f(a is bool, b is bool) returns i32
    if not a and b then
        return 1
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    // `not a` branches with true/false targets swapped: a true `a` jumps
    // to the condition's false label.
    assert!(ir.contains("br i1 %p0, label %bb3, label %bb4"));
    assert!(ir.contains("br i1 %p1, label %bb5, label %bb3"));
}

#[test]
fn address_of_a_local_passes_its_stack_slot() {
    let source = "\
struct Pair
    var a is i32
    var b is i64

extern def fill(p is mut ref Pair)

def main() returns i32
    var x is Pair
    fill(&x)
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("declare void @fill(ptr)"));
    assert!(ir.contains("call void @fill(ptr %l0)"));
}

#[test]
fn boolean_operators_in_value_context_do_not_branch() {
    let source = "\
def both(a is bool, b is bool) returns bool
    var ok is bool = a and b
    return ok
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("and i1 %p0, %p1"));
    assert!(!ir.contains("br i1"));
}

#[test]
fn ambiguous_imported_const_is_diagnosed() {
    let (_, errors) = compile(&[
        (
            "src/main.as",
            "use a\nuse b\n\ndef main() returns i32\n    return MAX\n",
        ),
        ("src/a.as", "const MAX is i32 = 10\n"),
        ("src/b.as", "const MAX is i32 = 20\n"),
    ]);
    assert!(
        errors
            .iter()
            .any(|e| e.msg.contains("Ambiguous reference") && e.msg.contains("MAX")),
        "expected an ambiguity diagnostic, got {:#?}",
        errors
    );
}

#[test]
fn noalloc_violations_propagate_through_the_call_graph() {
    let source = "\
extern def malloc(n is u64) returns ptr of u8

noalloc def a() returns i32
    return b()

def b() returns i32
    return c()

def c() returns i32
    var p is ptr of u8 = malloc(8)
    return 0

def main() returns i32
    return 0
";
    let (_, errors) = compile_one(source);
    let noalloc_errors: Vec<&CompileError> = errors
        .iter()
        .filter(|e| e.msg.contains("noalloc"))
        .collect();
    assert_eq!(noalloc_errors.len(), 1, "exactly one noalloc diagnostic");
    assert!(noalloc_errors[0].msg.contains("`a`"));
}

#[test]
fn noalloc_accepts_whitelisted_libc_helpers() {
    let source = "\
noalloc def copy_bytes(dst is ptr of u8, src is ptr of u8, n is i64)
    memcpy(dst, src, n)

def main() returns i32
    return 0
";
    let (_, errors) = compile_one(source);
    assert_clean(&errors);
}

#[test]
fn pointer_difference_scales_by_element_size() {
    let source = "\
def distance(p is ref i32, q is ref i32) returns i64
    return p - q
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);

    assert!(ir.contains("%t0 = ptrtoint ptr %p0 to i64\n"));
    assert!(ir.contains("%t1 = ptrtoint ptr %p1 to i64\n"));
    assert!(ir.contains("%t2 = sub i64 %t0, %t1\n"));
    assert!(ir.contains("%t3 = sdiv i64 %t2, 4\n"));
    assert!(ir.contains("  ret i64 %t3\n"));
}

#[test]
fn byte_pointer_difference_skips_the_division() {
    let source = "\
def distance(p is ptr of u8, q is ptr of u8) returns i64
    return p - q
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("sub i64"));
    assert!(!ir.contains("sdiv"));
}

#[test]
fn non_entry_functions_are_mangled() {
    let (ir, errors) = compile(&[
        (
            "src/main.as",
            "use core.io\n\ndef main() returns i32\n    return get_fd()\n",
        ),
        ("src/core/io.as", "def get_fd() returns i32\n    return 3\n"),
    ]);
    assert_clean(&errors);
    assert!(ir.contains("define i32 @aster_core_io__get_fd()"));
    assert!(ir.contains("call i32 @aster_core_io__get_fd()"));
    assert!(ir.contains("define i32 @main()"));
}

#[test]
fn module_qualified_references_resolve_through_namespaces() {
    let (ir, errors) = compile(&[
        (
            "src/main.as",
            "use core.io\n\ndef main() returns i32\n    return core.io.get_fd()\n",
        ),
        ("src/core/io.as", "def get_fd() returns i32\n    return 3\n"),
    ]);
    assert_clean(&errors);
    assert!(ir.contains("call i32 @aster_core_io__get_fd()"));
}

#[test]
fn lockfile_deps_compile_with_dep_mangling() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("libraries/mathlib/src")).unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
        dir.path().join("aster.lock"),
        "lock_version = 1\ndep mathlib libraries/mathlib\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("libraries/mathlib/src/lib.as"),
        "def three() returns i32\n    return 3\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("src/main.as"),
        "use mathlib\n\ndef main() returns i32\n    return three()\n",
    )
    .unwrap();

    let unit = resolve_unit(&dir.path().join("src/main.as")).unwrap();
    let (ir, errors) = compile_to_ir(&unit);
    assert_clean(&errors);
    assert!(ir.contains("define i32 @aster_mathlib__three()"));
    assert!(ir.contains("call i32 @aster_mathlib__three()"));
}

#[test]
fn string_constants_emit_after_functions_with_hex_escapes() {
    let source = "\
extern def printf(fmt is String) returns i32

def main() returns i32
    printf(\"hi\\n\")
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);

    assert!(ir.contains("declare i32 @printf(ptr, ...)\n"));
    assert!(ir.contains("call i32 (ptr, ...) @printf(ptr %t0)\n"));
    assert!(ir.contains(
        "@.str0 = private constant [4 x i8] c\"\\68\\69\\0A\\00\", align 1\n"
    ));

    // Strings come after every function body.
    let last_define = ir.rfind("define").unwrap();
    let string_global = ir.find("@.str0 = private").unwrap();
    assert!(string_global > last_define);
}

#[test]
fn struct_layout_field_stores_and_whole_struct_copy() {
    let source = "\
struct Pair
    var a is i32
    var b is i64

def main() returns i32
    var x is Pair
    var y is Pair
    x.a = 1
    y = x
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);

    // a @0, b @8, size 16 (i64 alignment pads the i32).
    assert!(ir.contains("%l0 = alloca [16 x i8], align 8\n"));
    assert!(ir.contains("%l1 = alloca [16 x i8], align 8\n"));
    assert!(ir.contains("getelementptr inbounds i8, ptr %l0, i64 0\n"));
    assert!(ir.contains("call ptr @memcpy(ptr %l1, ptr %l0, i64 16)\n"));
}

#[test]
fn while_loop_break_and_continue_target_the_right_blocks() {
    let source = "\
def main() returns i32
    var i is i64 = 0
    while i < 10 do
        i = i + 1
        if i == 5 then
            continue
        if i == 8 then
            break
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);

    // cond=bb0, body=bb1, end=bb2
    assert!(ir.contains("br label %bb0\nbb0:\n"));
    assert!(ir.contains("icmp slt i64"));
    // continue jumps to the condition, break to the loop end
    assert!(ir.contains("  br label %bb0\n"));
    assert!(ir.contains("  br label %bb2\n"));
}

#[test]
fn while_one_do_is_an_infinite_loop_without_trailing_return() {
    let source = "\
extern def exit(code is i32)

def main() returns i32
    while 1 do
        exit(0)
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("call void @exit("));
    // The loop header branches straight into the body.
    assert!(ir.contains("bb0:\n  br label %bb1\n"));
}

#[test]
fn assignment_through_immutable_reference_is_rejected() {
    let (_, errors) = compile_one("def set(p is ref i32)\n    *p = 1\n");
    assert!(
        errors
            .iter()
            .any(|e| e.msg.contains("immutable reference")),
        "expected a mutability diagnostic, got {:#?}",
        errors
    );
}

#[test]
fn assignment_through_mutable_reference_is_allowed() {
    let (ir, errors) = compile_one("def set(p is mut ref i32)\n    *p = 1\n");
    assert_clean(&errors);
    assert!(ir.contains("store i32"));
}

#[test]
fn immutable_pointer_never_casts_to_mutable_unless_null() {
    let source = "\
def main() returns i32
    var p is mut ref i32 = null
    return 0
";
    let (_, errors) = compile_one(source);
    assert_clean(&errors);

    let source = "\
def take(q is ref i32) returns i32
    var p is mut ref i32 = q
    return 0
";
    let (_, errors) = compile_one(source);
    assert!(
        errors
            .iter()
            .any(|e| e.msg.contains("immutable pointer to a mutable pointer")),
        "expected a pointer mutability diagnostic, got {:#?}",
        errors
    );
}

#[test]
fn var_type_inference_leaves_no_trace() {
    let source = "\
const GREETING is String = \"hi\"

def main() returns i32
    var x = 40 + 2
    var s = GREETING
    x = x + 1
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);

    // Inferred i64 for the arithmetic initializer, pointer for the string.
    assert!(ir.contains("%l0 = alloca i64, align 8\n"));
    assert!(ir.contains("%l1 = alloca ptr, align 8\n"));

    // The dry run discarded its temporaries and recorded nothing: the one
    // string constant appears exactly once, and temp numbering starts at 0.
    assert_eq!(ir.matches("@.str0 = private").count(), 1);
    assert!(ir.contains("%t0 = add i64 40, 2\n"));

    // Determinism: a fresh resolve + compile emits identical text.
    let (ir_again, _) = compile_one(source);
    assert_eq!(ir, ir_again);
}

#[test]
fn multiple_semantic_errors_are_reported_in_one_pass() {
    let source = "\
def main() returns i32
    var x is i64 = missing_one
    var y is i64 = missing_two
    return 0
";
    let (_, errors) = compile_one(source);
    let unknowns = errors
        .iter()
        .filter(|e| e.msg.contains("Unknown identifier"))
        .count();
    assert_eq!(unknowns, 2);
}

#[test]
fn return_values_are_cast_to_the_declared_type() {
    let (ir, errors) = compile_one("def tiny() returns i8\n    return 1\n\ndef main() returns i32\n    return 0\n");
    assert_clean(&errors);
    assert!(ir.contains("trunc i64 1 to i8"));
    assert!(ir.contains("ret i8 %t0"));
}

#[test]
fn missing_return_in_value_function_is_an_error() {
    let (_, errors) = compile_one("def f() returns i32\n    var x is i64 = 1\n\ndef main() returns i32\n    return 0\n");
    assert!(
        errors.iter().any(|e| e.msg.contains("Missing return")),
        "expected a missing-return diagnostic, got {:#?}",
        errors
    );
}

#[test]
fn else_if_chains_compile_as_nested_ifs() {
    let source = "\
def classify(x is i64) returns i32
    if x < 0 then
        return 1
    else if x == 0 then
        return 2
    return 3
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert_eq!(ir.matches("icmp").count(), 2);
    assert_eq!(ir.matches("  ret i32").count(), 3);
}

#[test]
fn calloc_and_memcpy_are_synthesized_on_demand() {
    let source = "\
def main() returns i32
    var p is ptr of u8 = calloc(8, 1)
    var q is ptr of u8 = calloc(8, 1)
    memcpy(q, p, 8)
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert_eq!(ir.matches("declare noalias ptr @calloc(i64, i64)").count(), 1);
    assert_eq!(ir.matches("declare ptr @memcpy(ptr, ptr, i64)").count(), 1);
    assert!(ir.contains("call ptr @calloc(i64 8, i64 1)"));
    assert!(ir.contains("call ptr @memcpy(ptr"));
}

#[test]
fn float_arithmetic_promotes_to_the_wider_operand() {
    let source = "\
def mix(a is f32, b is f64) returns f64
    return a + b

def same(a is f32, b is f32) returns f32
    return a + b

def main() returns i32
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("fpext float %p0 to double"));
    assert!(ir.contains("fadd contract double"));
    assert!(ir.contains("fadd contract float %p0, %p1"));
}

#[test]
fn integer_widening_keeps_the_left_operands_signedness() {
    let source = "\
def w(a is i32, b is u64) returns i64
    return a / b

def main() returns i32
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    // a widens to 64 bits signed (left signedness), so the divide is signed.
    assert!(ir.contains("sext i32 %p0 to i64"));
    assert!(ir.contains("sdiv i64"));
}

#[test]
fn unsigned_types_use_unsigned_division_and_comparison() {
    let source = "\
def du(a is u32, b is u32) returns u32
    if a < b then
        return a / b
    return 0
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("icmp ult i32"));
    assert!(ir.contains("udiv i32"));
}

#[test]
fn indexing_emits_element_geps_with_a_zero_fast_path() {
    let source = "\
def get(p is ptr of i32, i is i64) returns i32
    return p[i]

def first(p is ptr of i32) returns i32
    return p[0]
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("getelementptr inbounds i32, ptr %p0, i64 %p1"));
    // p[0] loads straight through the pointer, no GEP.
    assert!(ir.contains("define i32 @aster_main__first(ptr %p0) {\nentry:\n  %t0 = load i32, ptr %p0, align 4\n"));
}

#[test]
fn struct_indexing_scales_by_struct_size() {
    let source = "\
struct Pair
    var a is i64
    var b is i64

def pick(ps is ptr of Pair, i is i64) returns i64
    return ps[i].a
";
    let (ir, errors) = compile_one(source);
    assert_clean(&errors);
    assert!(ir.contains("mul i64 %p1, 16"));
    assert!(ir.contains("getelementptr inbounds i8, ptr %p0, i64 %t0"));
}

#[test]
fn compilation_is_deterministic_across_resolves() {
    let files: &[(&str, &str)] = &[
        (
            "src/main.as",
            "use util\n\ndef main() returns i32\n    return answer()\n",
        ),
        ("src/util.as", "def answer() returns i32\n    return 42\n"),
    ];
    let (first, errors) = compile(files);
    assert_clean(&errors);
    let (second, _) = compile(files);
    assert_eq!(first, second);
}
