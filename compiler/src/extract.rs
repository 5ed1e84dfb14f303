// extract.rs — Signature extraction from syntactic declarations
//
// Builds record types from record patterns, variants from alternations, and
// signatures from box/net type declarations, filters and synchrocells.
//
// Preconditions: none; patterns may be empty.
// Postconditions: every returned signature has completed outputs.
// Failure modes: conflicting declarations for one input produce E0300
//   diagnostics; the conflicting mapping is dropped.
// Side effects: none.

use crate::ast::{EntryKind, FilterAction, Qualifier, RecordPattern, Span, TypeSigDecl};
use crate::diag::{codes, Diagnostic};
use crate::record::{LabelKind, RecordType, VariantType};
use crate::signature::Signature;

// ── Shapes ──────────────────────────────────────────────────────────────────

/// Single shape of a record pattern. Qualifiers on binding tags are ignored.
pub fn record_from_pattern(pattern: &RecordPattern) -> RecordType {
    let mut record = RecordType::new();
    for entry in &pattern.entries {
        let name = entry.name.name.as_str();
        let kind = match entry.kind {
            EntryKind::BindingTag => {
                record.insert_btag(name);
                continue;
            }
            EntryKind::Field => LabelKind::Field,
            EntryKind::Tag => LabelKind::Tag,
        };
        match entry.qualifier {
            Qualifier::Plain => record.insert_label(name, kind),
            Qualifier::Pass => {
                record.insert_label(name, kind);
                record.mark_pass(name);
            }
            Qualifier::Discard => record.insert_discard(name, kind),
        }
    }
    record
}

/// Variant of an alternation `p1 | p2 | ...`.
pub fn variant_from_patterns(patterns: &[RecordPattern]) -> VariantType {
    patterns.iter().map(record_from_pattern).collect()
}

// ── Signatures ──────────────────────────────────────────────────────────────

/// Signature of a declared type annotation. A mapping without outputs
/// yields an incomplete entry; a mapping without input declares
/// initializer behaviour.
pub fn signature_from_decl(
    owner: &str,
    decl: &TypeSigDecl,
    diags: &mut Vec<Diagnostic>,
) -> Signature {
    let mut sig = Signature::new();
    for mapping in &decl.mappings {
        let input = mapping.input.as_ref().map(record_from_pattern);
        let outputs = mapping.outputs.as_deref().map(variant_from_patterns);
        if let Err(conflict) = sig.insert(input, outputs) {
            diags.push(
                Diagnostic::error(
                    codes::E0300,
                    mapping.span,
                    format!("conflicting type declarations in '{}': {}", owner, conflict),
                )
                .with_related(decl.span, "declared here"),
            );
        }
    }
    sig
}

/// Signature of a filter `[pattern -> actions]`.
///
/// Without actions the filter forwards every matching record unchanged.
/// Each action contributes its output records; an action with no outputs
/// consumes the record. Action guards do not affect typing.
pub fn filter_signature(pattern: &RecordPattern, actions: &[FilterAction]) -> Signature {
    let input = record_from_pattern(pattern);
    let outputs = if actions.is_empty() {
        VariantType::single(input.all_pass())
    } else {
        actions
            .iter()
            .flat_map(|action| action.outputs.iter().map(record_from_pattern))
            .collect()
    };
    let mut sig = Signature::new();
    let inserted = sig.insert(Some(input.pattern()), Some(outputs));
    debug_assert!(inserted.is_ok(), "first entry of a filter signature conflicts");
    sig
}

/// Signature of a synchrocell `[| main, aux... |]`.
///
/// The main record, once matched, is merged with each auxiliary shape:
/// binding tags and named values are united, and a main value shared with
/// the auxiliary loses its pass-through guarantee. An auxiliary record
/// arriving on its own is forwarded unchanged.
pub fn sync_signature(main: &RecordPattern, aux: &[RecordPattern], span: Span) -> Signature {
    let main = record_from_pattern(main).pattern();
    let mut sig = Signature::new();

    let merged: VariantType = aux
        .iter()
        .map(|pattern| merge_sync_shapes(&main, &record_from_pattern(pattern)))
        .collect();
    let main_outputs = if merged.is_empty() {
        VariantType::single(main.all_pass())
    } else {
        merged
    };
    let inserted = sig.insert(Some(main.clone()), Some(main_outputs));
    debug_assert!(inserted.is_ok(), "first entry of a synchrocell signature conflicts");

    for pattern in aux {
        let shape = record_from_pattern(pattern).pattern();
        if shape.core() == main.core() {
            tracing::trace!(?span, "auxiliary pattern equals main pattern");
            continue;
        }
        // bare patterns: a repeated auxiliary merges instead of conflicting
        let inserted = sig.insert(Some(shape.clone()), Some(VariantType::single(shape.all_pass())));
        debug_assert!(inserted.is_ok(), "auxiliary entry conflicts: {:?}", inserted);
    }
    sig
}

/// Merged shape of a main record and one auxiliary record.
pub fn merge_sync_shapes(main: &RecordType, aux: &RecordType) -> RecordType {
    let mut merged = main.all_pass();
    for btag in aux.btags() {
        merged.insert_btag(btag);
    }
    for (name, kind) in aux.labels() {
        if merged.has_label(name) {
            merged.unmark_pass(name);
        } else {
            merged.insert_label(name, kind);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ident, PatternEntry, TypeMapping};
    use crate::signature::Feed;

    fn entry(name: &str, kind: EntryKind, qualifier: Qualifier) -> PatternEntry {
        PatternEntry {
            name: Ident::synthetic(name),
            kind,
            qualifier,
        }
    }

    fn fields(names: &[&str]) -> RecordPattern {
        RecordPattern {
            entries: names
                .iter()
                .map(|n| entry(n, EntryKind::Field, Qualifier::Plain))
                .collect(),
            span: Span::default(),
        }
    }

    fn rt(s: &str) -> RecordType {
        s.parse().unwrap()
    }

    #[test]
    fn pattern_with_every_entry_kind() {
        let pattern = RecordPattern {
            entries: vec![
                entry("go", EntryKind::BindingTag, Qualifier::Plain),
                entry("a", EntryKind::Field, Qualifier::Pass),
                entry("t", EntryKind::Tag, Qualifier::Plain),
                entry("d", EntryKind::Field, Qualifier::Discard),
            ],
            span: Span::default(),
        };
        assert_eq!(
            record_from_pattern(&pattern).to_string(),
            "{<#go>, =a, <t>, -d}"
        );
    }

    #[test]
    fn decl_with_missing_outputs_is_incomplete() {
        let decl = TypeSigDecl {
            mappings: vec![TypeMapping {
                input: Some(fields(&["a"])),
                outputs: None,
                span: Span::default(),
            }],
            span: Span::default(),
        };
        let mut diags = Vec::new();
        let sig = signature_from_decl("box", &decl, &mut diags);
        assert!(diags.is_empty());
        assert_eq!(sig.to_string(), "{a} -> ?");
    }

    #[test]
    fn conflicting_decl_reports_e0300() {
        let decl = TypeSigDecl {
            mappings: vec![
                TypeMapping {
                    input: Some(fields(&["a"])),
                    outputs: Some(vec![fields(&["b"])]),
                    span: Span::new(0, 5),
                },
                TypeMapping {
                    input: Some(fields(&["a"])),
                    outputs: None,
                    span: Span::new(6, 10),
                },
            ],
            span: Span::new(0, 10),
        };
        let mut diags = Vec::new();
        let sig = signature_from_decl("box", &decl, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::E0300));
        assert_eq!(diags[0].span, Span::new(6, 10));
        assert_eq!(sig.to_string(), "{a} -> {b, -a}");
    }

    #[test]
    fn identity_filter_is_degenerate_signature() {
        let sig = filter_signature(&RecordPattern::default(), &[]);
        assert_eq!(sig.to_string(), "{} -> {}");
        match sig.feed(&rt("{=x, y}")) {
            Feed::Outputs(out) => assert_eq!(out.to_string(), "{=x, y}"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn filter_actions_union_outputs() {
        let actions = vec![
            FilterAction {
                guard: Some("a > 0".to_string()),
                outputs: vec![fields(&["b"])],
            },
            FilterAction {
                guard: None,
                outputs: vec![fields(&["c"]), fields(&["a", "d"])],
            },
        ];
        let sig = filter_signature(&fields(&["a"]), &actions);
        assert_eq!(sig.to_string(), "{a} -> {a, d} | {b, -a} | {c, -a}");
    }

    #[test]
    fn consuming_filter_has_no_outputs() {
        let actions = vec![FilterAction {
            guard: None,
            outputs: Vec::new(),
        }];
        let sig = filter_signature(&fields(&["a"]), &actions);
        assert_eq!(sig.to_string(), "{a} -> none");
    }

    #[test]
    fn sync_merge_overrides_shared_values() {
        let sig = sync_signature(&fields(&["a", "b"]), &[fields(&["b"])], Span::default());
        assert_eq!(sig.to_string(), "{a, b} -> {=a, b}\n{b} -> {=b}");
    }

    #[test]
    fn repeated_auxiliary_patterns_merge() {
        let pass_b = RecordPattern {
            entries: vec![entry("b", EntryKind::Field, Qualifier::Pass)],
            span: Span::default(),
        };
        let sig = sync_signature(
            &fields(&["a", "b"]),
            &[fields(&["b"]), pass_b, fields(&["b"])],
            Span::default(),
        );
        assert_eq!(sig.to_string(), "{a, b} -> {=a, b}\n{b} -> {=b}");
    }
}
