// End-to-end scenarios through the full pass pipeline.
//
// Programs are assembled from signature notation (`{a} -> {=a, b}`) rather
// than JSON so each test reads like the network it describes.

use snetc::annotate::decl_from_signature;
use snetc::ast::{BoxDef, Ident, NetDef, NetExpr, Program, RecordPattern, Span, TypeSigDecl};
use snetc::diag::Diagnostic;
use snetc::extract::{record_from_pattern, signature_from_decl};
use snetc::infer::InferOptions;
use snetc::pass::PassId;
use snetc::pipeline::{run_pipeline, CompilationState, PipelineError, PipelineOptions};
use snetc::record::{RecordType, VariantType};
use snetc::signature::{Feed, Signature};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn decl(sig: &str) -> TypeSigDecl {
    let sig: Signature = sig.parse().unwrap();
    decl_from_signature(&sig)
}

fn pattern(shape: &str) -> RecordPattern {
    let record: RecordType = shape.parse().unwrap();
    snetc::annotate::pattern_from_record(&record)
}

fn box_def(name: &str, sig: &str) -> BoxDef {
    BoxDef {
        name: Ident::synthetic(name),
        sig: decl(sig),
        span: Span::default(),
    }
}

fn net(name: &str, sig: Option<&str>, body: NetExpr) -> NetDef {
    NetDef {
        name: Ident::synthetic(name),
        sig: sig.map(decl),
        external: false,
        top_level: false,
        boxes: Vec::new(),
        nets: Vec::new(),
        body: Some(body),
        span: Span::default(),
    }
}

fn program(boxes: Vec<BoxDef>, nets: Vec<NetDef>) -> Program {
    Program {
        boxes,
        nets,
        top: None,
    }
}

fn compile_with(
    program: Program,
    infer: InferOptions,
) -> (CompilationState, Result<(), PipelineError>) {
    let mut state = CompilationState::new(program);
    let options = PipelineOptions {
        infer,
        verbose: false,
    };
    let result = run_pipeline(&mut state, PassId::Annotate, &options, |_, _| {});
    (state, result)
}

fn compile(program: Program) -> (CompilationState, Result<(), PipelineError>) {
    compile_with(program, InferOptions::default())
}

fn codes(diags: &[Diagnostic]) -> Vec<&'static str> {
    diags.iter().filter_map(|d| d.code.map(|c| c.0)).collect()
}

fn feed(sig: &Signature, shape: &str) -> Feed {
    let shape: RecordType = shape.parse().unwrap();
    sig.feed(&shape)
}

fn outputs(sig: &Signature, shape: &str) -> VariantType {
    match feed(sig, shape) {
        Feed::Outputs(o) => o,
        other => panic!("{} fed {}: {:?}", sig, shape, other),
    }
}

// ── Sequencing ──────────────────────────────────────────────────────────────

#[test]
fn scenario_a_pass_through_sequencing() {
    let (state, result) = compile(program(
        vec![box_def("A", "{a} -> {=a, b}"), box_def("B", "{b} -> {c}")],
        vec![net(
            "main",
            None,
            NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("B")),
        )],
    ));
    result.unwrap();
    let top = state.top_signature().unwrap();
    assert_eq!(outputs(top, "{=a}").to_string(), "{=a, c}");
}

#[test]
fn scenario_b_rejected_sequencing() {
    let (state, result) = compile(program(
        vec![box_def("A", "{a} -> {b}"), box_def("B", "{c} -> {d}")],
        vec![net(
            "main",
            None,
            NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("B")),
        )],
    ));
    let err = result.unwrap_err();
    assert_eq!(err.failing_pass(), PassId::Route);
    assert!(codes(&state.diagnostics).contains(&"E0100"));

    let top = state.top_signature().unwrap();
    match feed(top, "{=a}") {
        Feed::Rejected => {}
        Feed::Outputs(o) => assert!(o.is_empty(), "unexpected outputs {}", o),
        Feed::Incomplete => panic!("entry for {{a}} must not be incomplete"),
    }
}

#[test]
fn extra_values_are_routed_around_a_box() {
    // B needs `k`, which A does not produce; it must come from the input.
    let (state, result) = compile(program(
        vec![box_def("A", "{a} -> {b}"), box_def("B", "{b, k} -> {c}")],
        vec![net(
            "main",
            None,
            NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("B")),
        )],
    ));
    result.unwrap();
    let top = state.top_signature().unwrap();
    assert_eq!(outputs(top, "{=a, =k}").to_string(), "{c}");
}

// ── Choice ──────────────────────────────────────────────────────────────────

#[test]
fn scenario_c_choice_best_match() {
    let (state, result) = compile(program(
        vec![box_def("X", "{a} -> {x}"), box_def("Y", "{a, b} -> {y}")],
        vec![net(
            "main",
            None,
            NetExpr::choice(vec![NetExpr::reference("X"), NetExpr::reference("Y")]),
        )],
    ));
    result.unwrap();
    let top = state.top_signature().unwrap();
    let out = outputs(top, "{=a, =b, =c}");
    assert_eq!(out.len(), 1);
    let shape = out.iter().next().unwrap();
    assert!(shape.has_label("y"));
    assert!(!shape.has_label("x"));
}

// ── Synchrocell ─────────────────────────────────────────────────────────────

#[test]
fn scenario_d_synchrocell_override() {
    let (state, result) = compile(program(
        Vec::new(),
        vec![net("main", None, NetExpr::sync(pattern("{a, b}"), vec![pattern("{b}")]))],
    ));
    result.unwrap();
    let top = state.top_signature().unwrap();
    let out = outputs(top, "{=a, =b}");
    let merged = out.iter().next().unwrap();
    assert!(merged.has_label("a") && merged.has_label("b"));
    assert!(merged.is_pass("a"));
    assert!(!merged.is_pass("b"));

    // auxiliary record alone passes through
    assert_eq!(outputs(top, "{=b}").to_string(), "{=b}");
}

// ── Replication and feedback ────────────────────────────────────────────────

fn chain_program() -> Program {
    program(
        vec![box_def("S", "{a} -> {b}; {b} -> {c}; {c} -> {d}")],
        vec![net(
            "main",
            None,
            NetExpr::star(NetExpr::reference("S"), vec![pattern("{d}")]),
        )],
    )
}

#[test]
fn star_reaches_fixed_point() {
    let (state, result) = compile(chain_program());
    result.unwrap();
    let top = state.top_signature().unwrap();
    assert_eq!(outputs(top, "{=a}").to_string(), "{d}");
    assert!(!top.to_string().contains(snetc::fixpoint::EXIT_TAG));
}

#[test]
fn star_iteration_bound_reports_error() {
    let (state, result) = compile_with(
        chain_program(),
        InferOptions {
            star_iteration_limit: 1,
        },
    );
    assert_eq!(result.unwrap_err().failing_pass(), PassId::Route);
    assert!(codes(&state.diagnostics).contains(&"E0101"));
    assert!(state.top_signature().unwrap().is_empty());
}

#[test]
fn feedback_loops_until_exit() {
    let (state, result) = compile(program(
        vec![box_def("F", "{x} -> {y}; {y} -> {z}")],
        vec![net(
            "main",
            None,
            NetExpr::feedback(NetExpr::reference("F"), vec![pattern("{y}")]),
        )],
    ));
    result.unwrap();
    let top = state.top_signature().unwrap();
    assert_eq!(outputs(top, "{=x}").to_string(), "{z}");
}

// ── Split ───────────────────────────────────────────────────────────────────

#[test]
fn split_forces_index_tag() {
    let (state, result) = compile(program(
        vec![box_def("W", "{a} -> {b}")],
        vec![net("main", None, NetExpr::split(NetExpr::reference("W"), "i"))],
    ));
    result.unwrap();
    let top = state.top_signature().unwrap();
    let out = outputs(top, "{=a, =<i>}");
    let shape = out.iter().next().unwrap();
    assert!(shape.has_label("b"));
    assert!(shape.is_pass("i"));
}

// ── Routing restrictions ────────────────────────────────────────────────────

/// `A` has a `{z}` path that `B` cannot take.
fn two_path_boxes() -> Vec<BoxDef> {
    vec![
        box_def("A", "{x} -> {y}; {z} -> {w}"),
        box_def("B", "{y} -> {o}"),
    ]
}

#[test]
fn declared_inputs_limit_inference() {
    let (state, result) = compile(program(
        two_path_boxes(),
        vec![net(
            "main",
            Some("{x} -> {o}"),
            NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("B")),
        )],
    ));
    result.unwrap();
    assert_eq!(state.error_count, 0);
    let top = state.top_signature().unwrap();
    assert_eq!(top.input_variant().to_string(), "{x}");
}

#[test]
fn enclosing_context_narrows_unsigned_net() {
    let mut boxes = two_path_boxes();
    boxes.push(box_def("P", "{q} -> {x}"));
    let (state, result) = compile(program(
        boxes,
        vec![
            net(
                "inner",
                None,
                NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("B")),
            ),
            net(
                "main",
                None,
                NetExpr::serial(NetExpr::reference("P"), NetExpr::reference("inner")),
            ),
        ],
    ));
    result.unwrap();
    assert_eq!(state.error_count, 0);
    let inner = state.signature("inner").unwrap();
    assert_eq!(inner.input_variant().to_string(), "{x}");
    assert_eq!(outputs(state.top_signature().unwrap(), "{=q}").to_string(), "{o}");
}

#[test]
fn star_body_routed_with_fed_back_outputs() {
    // `inner` first sees `{x}` from P, then its own `{x}` and `{o}` outputs.
    let (state, result) = compile(program(
        vec![
            box_def("P", "{q} -> {x}"),
            box_def("A", "{x} -> {y}; {z} -> {w}"),
            box_def("L", "{y} -> {x} | {o}"),
        ],
        vec![
            net(
                "inner",
                None,
                NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("L")),
            ),
            net(
                "main",
                None,
                NetExpr::serial(
                    NetExpr::reference("P"),
                    NetExpr::star(NetExpr::reference("inner"), vec![pattern("{o}")]),
                ),
            ),
        ],
    ));
    result.unwrap();
    assert_eq!(state.error_count, 0);
    let inner = state.signature("inner").unwrap();
    assert_eq!(inner.input_variant().to_string(), "{x}");
    assert_eq!(outputs(state.top_signature().unwrap(), "{=q}").to_string(), "{o}");
}

#[test]
fn unrestricted_top_still_reports_unreachable_composition() {
    let (state, result) = compile(program(
        two_path_boxes(),
        vec![net(
            "main",
            None,
            NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("B")),
        )],
    ));
    assert_eq!(result.unwrap_err().failing_pass(), PassId::Route);
    assert!(codes(&state.diagnostics).contains(&"E0100"));
}

// ── Signed networks ─────────────────────────────────────────────────────────

#[test]
fn signed_network_mismatch_is_a_type_error() {
    let (state, result) = compile(program(
        vec![box_def("A", "{a} -> {b}")],
        vec![net("main", Some("{a} -> {q}"), NetExpr::reference("A"))],
    ));
    assert_eq!(result.unwrap_err().failing_pass(), PassId::TypeCheck);
    let found = codes(&state.diagnostics);
    assert!(found.contains(&"E0200"), "{:?}", found);
}

#[test]
fn nested_definitions_shadow_globals() {
    let mut outer = net("main", None, NetExpr::reference("A"));
    outer.boxes.push(box_def("A", "{a} -> {inner}"));
    let (state, result) = compile(program(vec![box_def("A", "{a} -> {outer}")], vec![outer]));
    result.unwrap();
    let top = state.top_signature().unwrap();
    assert!(outputs(top, "{=a}").iter().all(|s| s.has_label("inner")));
    assert!(state.signature("main.A").is_some());
}

// ── Initializers ────────────────────────────────────────────────────────────

#[test]
fn initializer_only_top_level_is_fatal() {
    let (state, result) = compile(program(
        vec![box_def("I", "init -> {a}")],
        vec![net("main", None, NetExpr::reference("I"))],
    ));
    assert_eq!(result.unwrap_err().failing_pass(), PassId::Route);
    assert_eq!(codes(&state.diagnostics), vec!["E0401"]);
}

#[test]
fn initializer_as_right_operand_is_fatal() {
    let (state, result) = compile(program(
        vec![box_def("A", "{a} -> {b}"), box_def("I", "init -> {a}")],
        vec![net(
            "main",
            None,
            NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("I")),
        )],
    ));
    assert_eq!(result.unwrap_err().failing_pass(), PassId::Route);
    assert_eq!(codes(&state.diagnostics), vec!["E0400"]);
}

#[test]
fn initializer_as_left_operand_is_fatal() {
    let (state, result) = compile(program(
        vec![box_def("I", "init -> {a}"), box_def("A", "{a} -> {b}")],
        vec![net(
            "main",
            None,
            NetExpr::serial(NetExpr::reference("I"), NetExpr::reference("A")),
        )],
    ));
    assert_eq!(result.unwrap_err().failing_pass(), PassId::Route);
    assert_eq!(codes(&state.diagnostics), vec!["E0400"]);
}

#[test]
fn initializer_feeds_downstream() {
    let (state, result) = compile(program(
        vec![
            box_def("I", "init -> {a}; {a} -> {a}"),
            box_def("A", "{a} -> {b}"),
        ],
        vec![net(
            "main",
            None,
            NetExpr::serial(NetExpr::reference("I"), NetExpr::reference("A")),
        )],
    ));
    result.unwrap();
    match state.top_signature().unwrap().feed_init() {
        Feed::Outputs(o) => assert_eq!(o.to_string(), "{b}"),
        other => panic!("unexpected {:?}", other),
    }
}

// ── Extraction round-trip ───────────────────────────────────────────────────

#[test]
fn declared_inputs_return_declared_outputs() {
    let declared = [
        ("{a}", vec!["{=a, b}", "{c}"]),
        ("{x, <t>}", vec!["{y}"]),
        ("{<#go>, p}", vec!["{<#go>, =p}"]),
    ];
    let mut sig = Signature::new();
    for (input, outs) in &declared {
        let input: RecordType = input.parse().unwrap();
        let outs: VariantType = outs.iter().map(|o| o.parse().unwrap()).collect();
        sig.insert(Some(input), Some(outs)).unwrap();
    }

    let mut diags = Vec::new();
    let extracted = signature_from_decl("roundtrip", &decl_from_signature(&sig), &mut diags);
    assert!(diags.is_empty());
    assert_eq!(extracted, sig);

    for mapping in &decl_from_signature(&sig).mappings {
        let input = record_from_pattern(mapping.input.as_ref().unwrap());
        let entry = extracted.matching(&input.all_pass());
        assert_eq!(entry.len(), 1);
        let expected: VariantType = mapping
            .outputs
            .as_ref()
            .unwrap()
            .iter()
            .map(record_from_pattern)
            .collect();
        assert_eq!(entry[0].outputs, expected);
    }
}
