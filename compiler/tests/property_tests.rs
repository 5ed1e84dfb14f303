// Property-based tests for the record-type algebra and the fixed-point bound.
//
// Shapes are drawn from a small alphabet so that generated patterns and
// candidates overlap often enough to exercise acceptance.
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;
use snetc::ast::Span;
use snetc::diag::codes;
use snetc::fixpoint::{ExitPattern, EXIT_TAG};
use snetc::infer::{InferOptions, Inference};
use snetc::record::{LabelKind, RecordType, VariantType};
use snetc::signature::{Feed, Signature};

const FIELDS: [&str; 5] = ["a", "b", "c", "d", "e"];

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

// ── Generators ──────────────────────────────────────────────────────────────

/// A shape over FIELDS plus one tag and one binding tag. Each field is
/// absent, plain or pass-through.
fn arb_shape() -> impl Strategy<Value = RecordType> {
    (
        prop::collection::vec(0u8..3, FIELDS.len()),
        prop::bool::ANY,
        prop::bool::ANY,
    )
        .prop_map(|(fields, tag, btag)| {
            let mut shape = RecordType::new();
            for (name, state) in FIELDS.iter().zip(fields) {
                match state {
                    1 => shape.insert_label(name, LabelKind::Field),
                    2 => {
                        shape.insert_label(name, LabelKind::Field);
                        shape.mark_pass(name);
                    }
                    _ => {}
                }
            }
            if tag {
                shape.insert_label("t", LabelKind::Tag);
            }
            if btag {
                shape.insert_btag("go");
            }
            shape
        })
}

fn arb_variant() -> impl Strategy<Value = VariantType> {
    prop::collection::vec(arb_shape(), 0..6).prop_map(|shapes| shapes.into_iter().collect())
}

/// A chain operand `{s0} -> {s1}; ...; {s(n-1)} -> {sn}` with an exit at `sn`.
fn arb_chain() -> impl Strategy<Value = (Signature, usize)> {
    (1usize..8).prop_map(|len| {
        let text: Vec<String> = (0..len)
            .map(|i| format!("{{s{}}} -> {{s{}}}", i, i + 1))
            .collect();
        (text.join("; ").parse().unwrap(), len)
    })
}

// ── Acceptance ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn acceptance_is_reflexive(shape in arb_shape()) {
        prop_assert!(shape.accepts(&shape));
    }

    #[test]
    fn acceptance_is_monotone(pattern in arb_shape(), candidate in arb_shape()) {
        prop_assume!(pattern.accepts(&candidate));
        let mut wider = candidate.clone();
        wider.insert_label("z", LabelKind::Field);
        prop_assert!(pattern.accepts(&wider));
        wider.mark_pass("z");
        prop_assert!(pattern.accepts(&wider));
    }

    #[test]
    fn pattern_accepts_its_probe(shape in arb_shape()) {
        prop_assert!(shape.pattern().accepts(&shape.all_pass()));
    }
}

// ── Variants ────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn merge_is_idempotent(variant in arb_variant()) {
        let merged = variant.clone().combine(variant.clone());
        prop_assert_eq!(merged.len(), variant.len());
        prop_assert_eq!(merged, variant);
    }

    #[test]
    fn merge_intersects_pass_through(shape in arb_shape()) {
        let mut v = VariantType::single(shape.all_pass());
        v.insert(shape.pattern());
        prop_assert_eq!(v.len(), 1);
        prop_assert_eq!(v.iter().next().unwrap().pass().count(), 0);
    }
}

// ── Completion ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn completion_is_stable(input in arb_shape(), output in arb_shape()) {
        let mut once = output.clone();
        once.complete(Some(&input));
        let mut twice = once.clone();
        twice.complete(Some(&input));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn completed_outputs_are_well_formed(input in arb_shape(), output in arb_shape()) {
        let mut done = output;
        done.complete(Some(&input));
        for name in done.pass() {
            prop_assert!(done.has_label(name));
        }
        for (name, _) in done.discards() {
            prop_assert!(!done.has_label(name));
        }
    }

    #[test]
    fn initializer_completion_drops_bookkeeping(output in arb_shape()) {
        let mut done = output;
        done.complete(None);
        prop_assert_eq!(done.pass().count(), 0);
        prop_assert_eq!(done.discards().count(), 0);
    }
}

// ── Extraction ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn declared_input_is_never_rejected(input in arb_shape(), outputs in arb_variant()) {
        let mut sig = Signature::new();
        sig.insert(Some(input.pattern()), Some(outputs)).unwrap();
        prop_assert!(!matches!(sig.feed(&input.all_pass()), Feed::Rejected));
    }
}

// ── Star termination bound ──────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn star_stabilizes_or_reports_bound((operand, len) in arb_chain(), limit in 1usize..10) {
        let exit: RecordType = format!("{{s{}}}", len).parse().unwrap();
        let exits = [ExitPattern { pattern: exit, conditional: false }];
        let mut inf = Inference::new(InferOptions { star_iteration_limit: limit });
        let out = inf.star(&operand, &exits, Span::default());

        let bound_hit = inf.diagnostics.iter().any(|d| d.code == Some(codes::E0101));
        if bound_hit {
            prop_assert!(out.is_empty());
        } else {
            prop_assert!(!out.to_string().contains(EXIT_TAG));
            let start: RecordType = "{=s0}".parse().unwrap();
            match out.feed(&start) {
                Feed::Outputs(o) => prop_assert_eq!(o.to_string(), format!("{{s{}}}", len)),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
