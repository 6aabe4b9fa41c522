//! End-to-end pipeline scenarios: hand-built ASTs (the parser is an
//! external collaborator) driven through the whole pipeline via
//! `driver::compile`, checked against the observable MIPS output each
//! scenario describes. The simpler arithmetic/const-reassignment cases
//! live alongside `driver::compile`'s own unit tests; this file covers the
//! scenarios that need classes, arrays, and recursion the driver tests
//! don't exercise.

use pretty_assertions::assert_eq;

use compiscriptc::ast::{AddOp, AstBuilder, ClassMember, ExprKind, RelOp, TypeAnnotation};
use compiscriptc::config::CompilerOptions;
use compiscriptc::driver;
use compiscriptc::errors::SemErrorCode;
use compiscriptc::span::Span;

fn int_ty() -> TypeAnnotation { TypeAnnotation::new("integer", 0) }
fn string_ty() -> TypeAnnotation { TypeAnnotation::new("string", 0) }

/// `function fib(n: integer): integer { if (n < 2) { return n; }
/// return fib(n-1) + fib(n-2); } print(fib(10));` compiles, recurses
/// through a direct `jal` to its own label, and ends in `_print_int`.
#[test]
fn recursive_function_emits_direct_call_to_its_own_label() {
  let mut b = AstBuilder::new();
  let s = Span::new(1, 1);

  let n = b.ident(s, "n");
  let cond = b.relational(s, RelOp::Lt, n.clone(), b.int(s, 2));
  let then_block = b.block(s, vec![b.return_stmt(s, Some(b.ident(s, "n")))]);
  let if_stmt = b.if_stmt(s, cond, then_block, None);

  let call_n1 = b.call(s, b.ident(s, "fib"), vec![b.additive(s, AddOp::Sub, b.ident(s, "n"), b.int(s, 1))]);
  let call_n2 = b.call(s, b.ident(s, "fib"), vec![b.additive(s, AddOp::Sub, b.ident(s, "n"), b.int(s, 2))]);
  let sum = b.additive(s, AddOp::Add, call_n1, call_n2);
  let ret = b.return_stmt(s, Some(sum));

  let body = b.block(s, vec![if_stmt, ret]);
  let fib = b.func_decl(s, "fib", vec![compiscriptc::ast::Param {
    identifier: "n".to_string(), type_annotation: Some(int_ty()), span: s,
  }], Some(int_ty()), body);

  let call_fib_10 = b.call(s, b.ident(s, "fib"), vec![b.int(s, 10)]);
  let print = b.print_stmt(s, call_fib_10);

  let program = b.program(vec![fib, print]);
  let out = driver::compile(&program, &CompilerOptions::default()).expect("no fatal error");
  assert!(!out.analysis.has_errors(), "{:?}", out.analysis.errors());
  assert!(out.mips.iter().any(|l| l.trim_start().starts_with("jal fib")));
  assert!(out.mips.iter().any(|l| l.contains("_print_int")));
}

/// `function f(n: integer): integer { let c: integer = n; return c; }`
/// — the symbol-table offsets Pass 1 assigns (`n` at -4, `c` at 0) must
/// not appear verbatim as `$fp` displacements: a free function's first
/// parameter loads from `FP[8]` (past the saved `$ra`/`$fp`), and its
/// first local stores to `FP[-4]` (below `$fp`), never `FP[-4]`/`FP[0]`
/// (the raw symbol-table values) which would alias the argument-build
/// area and the saved-`$fp` slot respectively.
#[test]
fn free_function_parameter_and_local_resolve_to_correct_fp_displacement() {
  let mut b = AstBuilder::new();
  let s = Span::new(1, 1);

  let local = b.var_decl(s, "c", Some(int_ty()), Some(b.ident(s, "n")));
  let ret = b.return_stmt(s, Some(b.ident(s, "c")));
  let body = b.block(s, vec![local, ret]);
  let f = b.func_decl(s, "f", vec![compiscriptc::ast::Param {
    identifier: "n".to_string(), type_annotation: Some(int_ty()), span: s,
  }], Some(int_ty()), body);

  let program = b.program(vec![f]);
  let out = driver::compile(&program, &CompilerOptions::default()).expect("no fatal error");
  assert!(!out.analysis.has_errors(), "{:?}", out.analysis.errors());
  let tac = out.tac.render();
  assert!(
    tac.iter().any(|l| l.starts_with("Deref") && l.contains("FP[8]")),
    "parameter 'n' should be read from FP[8], not its raw symbol-table offset FP[-4]:\n{tac:#?}"
  );
  assert!(
    !tac.iter().any(|l| l.starts_with("Deref") && l.contains("FP[-4]")),
    "parameter 'n' must never be read from its raw, untranslated symbol-table offset:\n{tac:#?}"
  );
  assert!(
    tac.iter().any(|l| l.starts_with("Assign") && l.contains("FP[-4]")),
    "local 'c' should be stored at FP[-4], not its raw symbol-table offset FP[0]:\n{tac:#?}"
  );
  assert!(
    !tac.iter().any(|l| l.starts_with("Assign") && l.contains("FP[0],")),
    "local 'c' must never be stored at its raw, untranslated symbol-table offset (the saved-$fp slot):\n{tac:#?}"
  );
}

/// A `Point` class with a two-field constructor and a `sum` method;
/// `y` lands at offset 4 from the object base (field declaration order).
#[test]
fn class_field_layout_and_method_call() {
  let mut b = AstBuilder::new();
  let s = Span::new(1, 1);

  let ctor_body = b.block(s, vec![
    b.expr_stmt(s, b.assign(s, b.property(s, b.expr(s, ExprKind::This), "x"), b.ident(s, "a"))),
    b.expr_stmt(s, b.assign(s, b.property(s, b.expr(s, ExprKind::This), "y"), b.ident(s, "b"))),
  ]);
  let ctor = ClassMember::Function {
    identifier: "constructor".to_string(),
    parameters: vec![
      compiscriptc::ast::Param { identifier: "a".to_string(), type_annotation: Some(int_ty()), span: s },
      compiscriptc::ast::Param { identifier: "b".to_string(), type_annotation: Some(int_ty()), span: s },
    ],
    return_type: None,
    body: Box::new(ctor_body),
    span: s,
  };
  let sum_body = b.block(s, vec![b.return_stmt(s,
    Some(b.additive(s, AddOp::Add,
      b.property(s, b.expr(s, ExprKind::This), "x"),
      b.property(s, b.expr(s, ExprKind::This), "y"))))]);
  let sum_method = ClassMember::Function {
    identifier: "sum".to_string(), parameters: vec![], return_type: Some(int_ty()),
    body: Box::new(sum_body), span: s,
  };
  let members = vec![
    ClassMember::Variable { identifier: "x".to_string(), type_annotation: Some(int_ty()), initializer: None, span: s },
    ClassMember::Variable { identifier: "y".to_string(), type_annotation: Some(int_ty()), initializer: None, span: s },
    ctor, sum_method,
  ];
  let class_decl = b.class_decl(s, "Point", None, members);

  let new_point = b.expr(s, ExprKind::New { class_name: "Point".to_string(), args: vec![b.int(s, 3), b.int(s, 4)] });
  let p_decl = b.var_decl(s, "p", Some(TypeAnnotation::new("Point", 0)), Some(new_point));
  let call_sum = b.call(s, b.property(s, b.ident(s, "p"), "sum"), vec![]);
  let print = b.print_stmt(s, call_sum);

  let program = b.program(vec![class_decl, p_decl, print]);
  let analysis = driver::analyze(&program);
  assert!(!analysis.has_errors(), "{:?}", analysis.errors());
  let point = analysis.classes().get("Point").expect("Point class declared");
  assert_eq!(point.borrow().field_offset("x"), Some(0));
  assert_eq!(point.borrow().field_offset("y"), Some(4));

  let out = driver::compile(&program, &CompilerOptions::default()).expect("no fatal error");
  assert!(out.mips.iter().any(|l| l.contains("_print_int")));

  // The constructor's parameters (`a` at raw offset -4, `b` at -8) are
  // method parameters: translated to FP[12]/FP[16], one frame slot
  // further out than a free function's, to make room for `this` at
  // FP[8]. Reading them at their raw, untranslated offsets (-4/-8) would
  // land in the temporaries area instead of the caller's pushed arguments.
  let tac = out.tac.render();
  assert!(
    tac.iter().any(|l| l.starts_with("Deref") && l.contains("FP[12]")),
    "constructor parameter 'a' should be read from FP[12]:\n{tac:#?}"
  );
  assert!(
    tac.iter().any(|l| l.starts_with("Deref") && l.contains("FP[16]")),
    "constructor parameter 'b' should be read from FP[16]:\n{tac:#?}"
  );
  assert!(
    !tac.iter().any(|l| l.starts_with("Deref") && (l.contains("FP[-4]") || l.contains("FP[-8]"))),
    "constructor parameters must never be read from their raw, untranslated symbol-table offsets:\n{tac:#?}"
  );
}

/// Overriding a method with an incompatible return type reports
/// `E053` and never reaches TAC generation.
#[test]
fn incompatible_override_reports_e053() {
  let mut b = AstBuilder::new();
  let s = Span::new(1, 1);

  let a_body = b.block(s, vec![b.return_stmt(s, Some(b.int(s, 1)))]);
  let a_method = ClassMember::Function {
    identifier: "f".to_string(), parameters: vec![], return_type: Some(int_ty()),
    body: Box::new(a_body), span: s,
  };
  let class_a = b.class_decl(s, "A", None, vec![a_method]);

  let b_body = b.block(s, vec![b.return_stmt(s, Some(b.string(s, "x")))]);
  let b_method = ClassMember::Function {
    identifier: "f".to_string(), parameters: vec![], return_type: Some(string_ty()),
    body: Box::new(b_body), span: s,
  };
  let class_b = b.class_decl(s, "B", Some("A".to_string()), vec![b_method]);

  let program = b.program(vec![class_a, class_b]);
  let analysis = driver::analyze(&program);
  assert!(analysis.errors().iter().any(|e| e.code == SemErrorCode::E053));
}

/// `foreach (v in a)` over an integer array literal prints each
/// element in order.
#[test]
fn foreach_over_array_literal() {
  let mut b = AstBuilder::new();
  let s = Span::new(1, 1);

  let array_lit = b.expr(s, ExprKind::ArrayLiteral(vec![b.int(s, 1), b.int(s, 2), b.int(s, 3)]));
  let a_decl = b.var_decl(s, "a", Some(TypeAnnotation::new("integer", 1)), Some(array_lit));
  let print_v = b.print_stmt(s, b.ident(s, "v"));
  let body = b.block(s, vec![print_v]);
  let foreach = b.foreach_stmt(s, "v", b.ident(s, "a"), body);

  let program = b.program(vec![a_decl, foreach]);
  let out = driver::compile(&program, &CompilerOptions::default()).expect("no fatal error");
  assert!(!out.analysis.has_errors(), "{:?}", out.analysis.errors());
  assert!(out.mips.iter().any(|l| l.contains("_print_int")));
  // the element count (3) is materialized as the array header word
  assert!(out.tac.render().iter().any(|l| l.contains("length")));
}

/// String concatenation with `+` routes through `_string_concat`.
#[test]
fn string_concatenation_invokes_runtime_helper() {
  let mut b = AstBuilder::new();
  let s = Span::new(1, 1);

  let concat = b.additive(s, AddOp::Add, b.string(s, "ab"), b.string(s, "cd"));
  let decl = b.var_decl(s, "str", Some(string_ty()), Some(concat));
  let print = b.print_stmt(s, b.ident(s, "str"));
  let program = b.program(vec![decl, print]);

  let out = driver::compile(&program, &CompilerOptions::default()).expect("no fatal error");
  assert!(!out.analysis.has_errors(), "{:?}", out.analysis.errors());
  assert!(out.mips.iter().any(|l| l.contains("_string_concat")));
  assert!(out.mips.iter().any(|l| l.contains("_print_string")));
}
