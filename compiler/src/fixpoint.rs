// fixpoint.rs — Replication (star) and feedback inference
//
// Both combinators loop records through their operand. The engine marks
// records that leave the loop with an internal sentinel binding tag, builds
// one iteration unit (operand then exit tagging), and self-composes a
// running signature with that unit until no output shape changes. Exits are
// the sentinel-tagged shapes with the tag stripped; untagged shapes are
// still circulating and are dropped.
//
// Preconditions: operand signature is not initializer-only (checked by the
//   routing pass).
// Postconditions: the result never contains the sentinel tag.
// Failure modes: E0101 when the bound is exceeded; an empty signature is
//   returned. E0100 diagnostics from the compositions are reported once.
// Side effects: tracing events per iteration at `trace` level.

use std::collections::HashSet;

use crate::ast::Span;
use crate::diag::{codes, Diagnostic};
use crate::infer::{compose, Inference, Stage};
use crate::record::{RecordType, VariantType};
use crate::signature::{Feed, SigEntry, Signature};

/// Binding tag marking records that have left the loop. Not a valid source
/// identifier, so it can never collide with a user tag.
pub const EXIT_TAG: &str = "$exit";

/// A star termination pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPattern {
    pub pattern: RecordType,
    /// Guarded: a matching record may also continue looping.
    pub conditional: bool,
}

/// When does a record leave the loop?
#[derive(Debug, Clone, Copy)]
enum ExitRule<'a> {
    /// Leaves when a termination pattern accepts it.
    Star(&'a [ExitPattern]),
    /// Leaves unless a back pattern accepts it.
    Feedback(&'a VariantType),
}

impl ExitRule<'_> {
    fn tag(&self, shape: &RecordType) -> Vec<RecordType> {
        let exited = || {
            let mut s = shape.clone();
            s.insert_btag(EXIT_TAG);
            s
        };
        match self {
            ExitRule::Star(terminators) => {
                let accepting = terminators.iter().filter(|t| t.pattern.accepts(shape));
                let mut unconditional = false;
                let mut conditional = false;
                for t in accepting {
                    if t.conditional {
                        conditional = true;
                    } else {
                        unconditional = true;
                    }
                }
                if unconditional {
                    vec![exited()]
                } else if conditional {
                    vec![exited(), shape.clone()]
                } else {
                    vec![shape.clone()]
                }
            }
            ExitRule::Feedback(back) => {
                if back.accepts(shape) {
                    vec![shape.clone()]
                } else {
                    vec![exited()]
                }
            }
        }
    }

    fn tag_all(&self, shapes: &VariantType) -> VariantType {
        shapes.iter().flat_map(|s| self.tag(s)).collect()
    }
}

/// One trip around the loop: exited records bypass, the rest go through the
/// operand and are tagged on the way out.
struct IterationUnit<'a> {
    core: &'a Signature,
    rule: ExitRule<'a>,
}

impl Stage for IterationUnit<'_> {
    fn feed(&self, shape: &RecordType) -> Feed {
        if shape.has_btag(EXIT_TAG) {
            return Feed::Outputs(VariantType::single(shape.clone()));
        }
        match self.core.feed(shape) {
            Feed::Outputs(outputs) => Feed::Outputs(self.rule.tag_all(&outputs)),
            other => other,
        }
    }

    fn input_patterns(&self) -> Vec<RecordType> {
        self.core.input_patterns()
    }

    fn feed_init(&self) -> Feed {
        Feed::Outputs(VariantType::new())
    }
}

impl Inference {
    /// `a * {terminators}`
    pub fn star(&mut self, a: &Signature, terminators: &[ExitPattern], span: Span) -> Signature {
        let captured = |input: &RecordType| {
            terminators
                .iter()
                .any(|t| !t.conditional && t.pattern.accepts(input))
        };
        let mut core = Signature::new();
        for entry in a.entries() {
            if entry.input.as_ref().is_some_and(|i| captured(&i.pattern())) {
                continue;
            }
            copy_entry(&mut core, entry);
        }

        let mut starts: Vec<RecordType> = terminators.iter().map(|t| t.pattern.pattern()).collect();
        starts.extend(core.input_variant());

        let rule = ExitRule::Star(terminators);
        self.iterate(&core, starts, rule, true, span, "star")
    }

    /// `a \ {back}`
    pub fn feedback(&mut self, a: &Signature, back: &VariantType, span: Span) -> Signature {
        let starts: Vec<RecordType> = a.input_variant().into_iter().collect();
        let rule = ExitRule::Feedback(back);
        self.iterate(a, starts, rule, false, span, "feedback")
    }

    fn iterate(
        &mut self,
        core: &Signature,
        starts: Vec<RecordType>,
        rule: ExitRule<'_>,
        tag_on_entry: bool,
        span: Span,
        combinator: &str,
    ) -> Signature {
        let mut running = Signature::new();
        if !core.is_complete() {
            tracing::trace!(combinator, "operand incomplete, result incomplete");
            for start in starts {
                let inserted = running.insert(Some(start), None);
                debug_assert!(inserted.is_ok(), "incomplete start entry conflicts");
            }
            if core.init_entry().is_some() {
                let inserted = running.insert(None, None);
                debug_assert!(inserted.is_ok(), "incomplete initializer entry conflicts");
            }
            return running;
        }

        for start in starts {
            let probe = start.all_pass();
            let outputs = if tag_on_entry {
                VariantType::from_iter(rule.tag(&probe))
            } else {
                VariantType::single(probe)
            };
            // starts are bare patterns, so a repeated one merges
            let inserted = running.insert(Some(start), Some(outputs));
            debug_assert!(inserted.is_ok(), "start entry conflicts: {:?}", inserted);
        }
        if let Some(init) = core.init_entry() {
            let inserted = running.insert(None, Some(rule.tag_all(&init.outputs)));
            debug_assert!(inserted.is_ok(), "initializer entry conflicts");
        }

        let unit = IterationUnit { core, rule };
        let limit = self.options.star_iteration_limit;
        let mut scratch = Vec::new();
        let mut converged = false;
        for iteration in 0..limit {
            let step = compose(&running, &unit, span, &mut scratch);
            let mut next = running.clone();
            for conflict in next.merge(step) {
                scratch.push(
                    Diagnostic::error(
                        codes::E0102,
                        span,
                        format!("{} step conflicts with earlier iterations: {}", combinator, conflict),
                    )
                    .with_hint("annotate the loop body with an explicit type signature"),
                );
            }
            tracing::trace!(combinator, iteration, entries = next.len(), "fixed-point step");
            if next == running {
                converged = true;
                break;
            }
            running = next;
        }

        let mut seen = HashSet::new();
        for diag in scratch {
            if seen.insert(diag.to_string()) {
                self.diagnostics.push(diag);
            }
        }

        if !converged {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0101,
                    span,
                    format!(
                        "{} inference did not reach a fixed point within {} iterations",
                        combinator, limit
                    ),
                )
                .with_hint("add a type annotation to the network or tighten the exit patterns"),
            );
            return Signature::new();
        }

        let mut out = Signature::new();
        for entry in running.entries() {
            let exits: VariantType = entry
                .outputs
                .iter()
                .filter(|s| s.has_btag(EXIT_TAG))
                .map(|s| {
                    let mut s = s.clone();
                    s.remove_btag(EXIT_TAG);
                    s
                })
                .collect();
            let inserted = out.insert(entry.input.clone(), Some(exits));
            debug_assert!(inserted.is_ok(), "fixed-point entries have distinct inputs");
        }
        tracing::trace!(combinator, entries = out.len(), "fixed point reached");
        out
    }
}

fn copy_entry(out: &mut Signature, entry: &SigEntry) {
    let outputs = if entry.incomplete {
        None
    } else {
        Some(entry.outputs.clone())
    };
    let inserted = out.insert(entry.input.clone(), outputs);
    debug_assert!(inserted.is_ok(), "copied entries have distinct inputs");
}
