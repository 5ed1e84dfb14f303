// infer.rs — Combinator inference rules
//
// Computes the signature of a combinator from the signatures of its
// operands: sequencing (with input augmentation), choice, and the
// exclusive indexing split. Replication and feedback live in `fixpoint`.
//
// Preconditions: operand signatures are fully extracted (incomplete entries
//   allowed; they yield incomplete result entries).
// Postconditions: the returned signature's outputs are completed against
//   its inputs.
// Failure modes: E0100 (no downstream branch accepts an output), E0102
//   (branch conflict). Offending inputs are dropped, never fatal.
// Side effects: tracing events at `trace` level.

use std::collections::BTreeSet;

use crate::ast::Span;
use crate::diag::{codes, Diagnostic};
use crate::record::{LabelKind, RecordType, VariantType};
use crate::signature::{Feed, SigEntry, Signature};

// ── Configuration ───────────────────────────────────────────────────────────

/// Tunables of the inference engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferOptions {
    /// Maximum number of self-compositions before a replication or feedback
    /// fixed point is declared divergent.
    pub star_iteration_limit: usize,
}

pub const DEFAULT_STAR_ITERATION_LIMIT: usize = 50;

impl Default for InferOptions {
    fn default() -> Self {
        InferOptions {
            star_iteration_limit: DEFAULT_STAR_ITERATION_LIMIT,
        }
    }
}

// ── Downstream stages ───────────────────────────────────────────────────────

/// Anything that can sit on the right of a sequencing composition.
///
/// Implemented by `Signature` and by the synthetic iteration units of the
/// fixed-point rules.
pub trait Stage {
    /// Outputs for one arriving record shape.
    fn feed(&self, shape: &RecordType) -> Feed;

    /// Input patterns used to derive input augmentations upstream.
    fn input_patterns(&self) -> Vec<RecordType>;

    /// Records emitted before any input arrives.
    fn feed_init(&self) -> Feed;
}

impl Stage for Signature {
    fn feed(&self, shape: &RecordType) -> Feed {
        Signature::feed(self, shape)
    }

    fn input_patterns(&self) -> Vec<RecordType> {
        self.input_variant().into_iter().collect()
    }

    fn feed_init(&self) -> Feed {
        Signature::feed_init(self)
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// Inference engine: options plus the diagnostics collected so far.
#[derive(Debug, Default)]
pub struct Inference {
    pub options: InferOptions,
    pub diagnostics: Vec<Diagnostic>,
}

impl Inference {
    pub fn new(options: InferOptions) -> Self {
        Inference {
            options,
            diagnostics: Vec::new(),
        }
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    // ── Sequencing ──

    /// `a .. b`
    pub fn serial(&mut self, a: &Signature, b: &Signature, span: Span) -> Signature {
        compose(a, b, span, &mut self.diagnostics)
    }

    // ── Choice ──

    /// `b1 | b2 | ...`
    ///
    /// Each branch is restricted to its routing attraction (its guard when
    /// present, else its own accepted inputs) and the results are merged.
    pub fn choice(&mut self, branches: &[(Signature, Option<VariantType>)], span: Span) -> Signature {
        let mut out = Signature::new();
        for (index, (sig, guard)) in branches.iter().enumerate() {
            let restricted = match guard {
                Some(attraction) => sig.restrict(attraction),
                None => sig.clone(),
            };
            for conflict in out.merge(restricted) {
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::E0102,
                        span,
                        format!("choice branch {} conflicts with an earlier branch: {}", index + 1, conflict),
                    )
                    .with_hint("declare the same input with outputs in every branch, or in none"),
                );
            }
        }
        tracing::trace!(branches = branches.len(), entries = out.len(), "choice");
        out
    }

    // ── Split ──

    /// `a ! <tag>` and `a ! <tag:range_end>`: every accepted input must
    /// carry the index tag(s), which are forced present and pass-through
    /// before the operand is re-queried.
    pub fn split(
        &mut self,
        a: &Signature,
        tag: &str,
        range_end: Option<&str>,
        span: Span,
    ) -> Signature {
        let mut out = Signature::new();
        if let Some(init) = a.init_entry() {
            insert_entry(&mut out, init.clone(), span, &mut self.diagnostics);
        }
        for entry in a.record_entries() {
            let Some(input) = &entry.input else { continue };
            let mut indexed = input.pattern();
            for t in std::iter::once(tag).chain(range_end) {
                if !indexed.has_label(t) {
                    indexed.insert_label(t, LabelKind::Tag);
                }
            }
            let outputs = if entry.incomplete {
                None
            } else {
                match a.feed(&indexed.all_pass()) {
                    Feed::Outputs(outputs) => Some(outputs),
                    Feed::Incomplete => None,
                    Feed::Rejected => continue,
                }
            };
            add_entry(&mut out, indexed, outputs, span, &mut self.diagnostics);
        }
        tracing::trace!(tag, entries = out.len(), "split");
        out
    }
}

fn add_entry(
    out: &mut Signature,
    input: RecordType,
    outputs: Option<VariantType>,
    span: Span,
    diags: &mut Vec<Diagnostic>,
) {
    let shown = input.to_string();
    if let Err(conflict) = out.insert(Some(input), outputs) {
        diags.push(Diagnostic::error(
            codes::E0102,
            span,
            format!("inferred input {} conflicts: {}", shown, conflict),
        ));
    }
}

fn insert_entry(out: &mut Signature, entry: SigEntry, span: Span, diags: &mut Vec<Diagnostic>) {
    let outputs = if entry.incomplete {
        None
    } else {
        Some(entry.outputs)
    };
    match entry.input {
        Some(input) => add_entry(out, input, outputs, span, diags),
        None => {
            if let Err(conflict) = out.insert(None, outputs) {
                diags.push(Diagnostic::error(codes::E0102, span, conflict.to_string()));
            }
        }
    }
}

// ── Sequencing core ─────────────────────────────────────────────────────────

/// Compose `a` with any downstream stage `b`.
///
/// For every input `I` of `a` the augmented inputs `X ⊇ I` are derived that
/// make each output of `a` acceptable to some input pattern of `b` without
/// changing which `a` entry is selected. Each `X` is fed through `a` and
/// every intermediate shape through `b`; an intermediate shape no pattern
/// of `b` accepts invalidates `X` with an E0100 diagnostic.
pub fn compose<B: Stage + ?Sized>(
    a: &Signature,
    b: &B,
    span: Span,
    diags: &mut Vec<Diagnostic>,
) -> Signature {
    let mut out = Signature::new();
    let patterns = b.input_patterns();

    compose_init(a, b, span, &mut out, diags);

    for entry in a.record_entries() {
        let Some(input) = &entry.input else { continue };
        let base = input.pattern();
        if entry.incomplete {
            add_entry(&mut out, base, None, span, diags);
            continue;
        }
        for x in augmented_inputs(a, &base, &entry.outputs, &patterns) {
            feed_through(a, b, x, span, &mut out, diags);
        }
    }
    tracing::trace!(inputs = a.len(), entries = out.len(), "serial");
    out
}

fn compose_init<B: Stage + ?Sized>(
    a: &Signature,
    b: &B,
    span: Span,
    out: &mut Signature,
    diags: &mut Vec<Diagnostic>,
) {
    let mut outputs = VariantType::new();
    let mut incomplete = false;
    let mut present = false;

    if let Some(init) = a.init_entry() {
        present = true;
        if init.incomplete {
            incomplete = true;
        } else {
            for shape in &init.outputs {
                match b.feed(shape) {
                    Feed::Outputs(produced) => {
                        outputs.absorb(&produced);
                    }
                    Feed::Incomplete => incomplete = true,
                    Feed::Rejected => diags.push(
                        Diagnostic::error(
                            codes::E0100,
                            span,
                            format!("no branch of the right operand accepts initializer output {}", shape),
                        )
                        .with_cause("emitted by the left operand before any input", None),
                    ),
                }
            }
        }
    }
    match b.feed_init() {
        Feed::Outputs(own) if !own.is_empty() => {
            present = true;
            outputs.absorb(&own);
        }
        Feed::Outputs(_) => {}
        Feed::Incomplete | Feed::Rejected => {
            present = true;
            incomplete = true;
        }
    }
    if present {
        let outputs = if incomplete { None } else { Some(outputs) };
        if let Err(conflict) = out.insert(None, outputs) {
            diags.push(Diagnostic::error(codes::E0102, span, conflict.to_string()));
        }
    }
}

/// Labels an output shape lacks for one downstream pattern, or `None` when
/// the pattern is unrelated to the shape or needs a value it consumed.
fn requirement(output: &RecordType, pattern: &RecordType) -> Option<Vec<(String, LabelKind)>> {
    if !pattern.btags().eq(output.btags()) {
        return None;
    }
    let mut missing = Vec::new();
    let mut shared = false;
    for (name, kind) in pattern.labels() {
        if output.has_label(name) {
            shared = true;
        } else if output.is_discarded(name) {
            return None;
        } else {
            missing.push((name.to_string(), kind));
        }
    }
    if missing.is_empty() || shared {
        Some(missing)
    } else {
        None
    }
}

/// Augmented inputs for one entry of the left operand.
fn augmented_inputs(
    a: &Signature,
    base: &RecordType,
    outputs: &VariantType,
    patterns: &[RecordType],
) -> BTreeSet<RecordType> {
    // requirement variants per output shape
    let per_output: Vec<Vec<Vec<(String, LabelKind)>>> = outputs
        .iter()
        .map(|output| {
            let mut reqs: Vec<Vec<(String, LabelKind)>> = patterns
                .iter()
                .filter_map(|p| requirement(output, p))
                .collect();
            reqs.sort();
            reqs.dedup();
            if reqs.is_empty() {
                reqs.push(Vec::new());
            }
            reqs
        })
        .collect();

    let mut combos: Vec<RecordType> = vec![base.clone()];
    for reqs in &per_output {
        let mut next = Vec::with_capacity(combos.len() * reqs.len());
        for partial in &combos {
            for req in reqs {
                let mut x = partial.clone();
                for (name, kind) in req {
                    if !x.has_label(name) {
                        x.insert_label(name, *kind);
                    }
                }
                next.push(x);
            }
        }
        combos = next;
    }

    let score = base.label_count();
    let mut kept: BTreeSet<RecordType> = combos
        .into_iter()
        .filter(|x| a.best_score(x) == Some(score))
        .collect();
    // nothing admissible: feed the plain input so the rejection is reported
    if kept.is_empty() {
        kept.insert(base.clone());
    }
    kept
}

fn feed_through<B: Stage + ?Sized>(
    a: &Signature,
    b: &B,
    x: RecordType,
    span: Span,
    out: &mut Signature,
    diags: &mut Vec<Diagnostic>,
) {
    let intermediate = match a.feed(&x.all_pass()) {
        Feed::Outputs(shapes) => shapes,
        Feed::Incomplete => {
            add_entry(out, x, None, span, diags);
            return;
        }
        Feed::Rejected => return,
    };

    let mut outputs = VariantType::new();
    let mut incomplete = false;
    let mut rejected = false;
    for shape in &intermediate {
        match b.feed(shape) {
            Feed::Outputs(produced) => {
                outputs.absorb(&produced);
            }
            Feed::Incomplete => incomplete = true,
            Feed::Rejected => {
                rejected = true;
                diags.push(
                    Diagnostic::error(
                        codes::E0100,
                        span,
                        format!("no branch of the right operand accepts {}", shape.pattern()),
                    )
                    .with_cause(format!("produced by the left operand for input {}", x), None)
                    .with_hint("add a filter that supplies the missing values, or change the box types"),
                );
            }
        }
    }
    if rejected {
        return;
    }
    let outputs = if incomplete { None } else { Some(outputs) };
    add_entry(out, x, outputs, span, diags);
}

// ── Tests ───────────────────────────────────────────────────────────────────
