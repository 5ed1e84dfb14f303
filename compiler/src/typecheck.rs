// typecheck.rs — Type-checking pass
//
// Replays every network body with probe records and compares what the
// concrete composition of boxes, filters, sub-networks and branches
// produces against the network's signature. Incomplete entries are filled
// in with the observed outputs.
//
// Preconditions: `route` succeeded; `sigs` and `expr_sigs` come from it.
// Postconditions: every entry that could be observed is complete.
// Failure modes: E0200/E0201/E0202/E0203 errors and W0200 warnings, per
//   offending input; checking continues with the remaining inputs. A missing
//   side-table entry is a fatal `InferError`.
// Side effects: completes signature entries in `sigs` in place.

use std::collections::{HashMap, HashSet};

use crate::ast::Span;
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::id::{DefId, ExprId};
use crate::record::{RecordType, VariantType};
use crate::resolve::{DefKind, ExprKind, NetTable};
use crate::route::InferError;
use crate::signature::{Feed, InputKey, Signature};

/// Result of type checking.
#[derive(Debug, Default)]
pub struct TypeCheckResult {
    pub diagnostics: Vec<Diagnostic>,
    /// Number of incomplete entries filled from observed outputs.
    pub completed: usize,
}

/// What a probe produced.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Observed {
    Outputs(VariantType),
    /// Some component on the path has no known outputs yet.
    Incomplete,
    Rejected {
        code: DiagCode,
        reason: String,
        span: Span,
    },
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Check every non-external network, sub-networks before their users.
///
/// Signed networks are checked against their declaration; unsigned ones
/// only get their incomplete entries filled.
pub fn type_check(
    table: &NetTable,
    sigs: &mut HashMap<DefId, Signature>,
    expr_sigs: &HashMap<ExprId, Signature>,
) -> Result<TypeCheckResult, InferError> {
    let mut checker = Checker {
        table,
        sigs,
        expr_sigs,
        visited: HashSet::new(),
        result: TypeCheckResult::default(),
    };
    for def in table.defs() {
        checker.check_def(def.id)?;
    }
    tracing::debug!(
        diagnostics = checker.result.diagnostics.len(),
        completed = checker.result.completed,
        "type check complete"
    );
    Ok(checker.result)
}

// ── Internal context ────────────────────────────────────────────────────────

struct Checker<'a> {
    table: &'a NetTable,
    sigs: &'a mut HashMap<DefId, Signature>,
    expr_sigs: &'a HashMap<ExprId, Signature>,
    visited: HashSet<DefId>,
    result: TypeCheckResult,
}

impl<'a> Checker<'a> {
    fn check_def(&mut self, id: DefId) -> Result<(), InferError> {
        if !self.visited.insert(id) {
            return Ok(());
        }
        let table = self.table;
        let def = table.def(id);
        let DefKind::Net(net) = &def.kind else {
            return Ok(());
        };
        let Some(body) = net.body else {
            return Ok(());
        };
        if net.external {
            return Ok(());
        }

        for dep in self.referenced_nets(body) {
            self.check_def(dep)?;
        }

        let mut sig = self
            .sigs
            .get(&id)
            .cloned()
            .ok_or_else(|| InferError::MissingSignature {
                name: def.path(table),
                span: def.span,
            })?;
        let name = def.path(table);
        let signed = net.is_signed();

        self.check_init(&name, def.span, body, &mut sig, signed)?;

        let inputs: Vec<(InputKey, RecordType)> = sig
            .record_entries()
            .filter_map(|e| e.input.as_ref().map(|i| (e.key(), i.pattern())))
            .collect();
        for (key, input) in inputs {
            let observed = self.simulate(body, &input.all_pass())?;
            self.check_entry(&name, def.span, &key, &input, observed, &mut sig, signed);
        }

        tracing::trace!(net = %name, signed, "checked");
        self.sigs.insert(id, sig);
        Ok(())
    }

    fn check_init(
        &mut self,
        name: &str,
        span: Span,
        body: ExprId,
        sig: &mut Signature,
        signed: bool,
    ) -> Result<(), InferError> {
        let observed = self.simulate_init(body)?;
        let declared = sig.init_entry().cloned();
        match (observed, declared) {
            (Observed::Incomplete, _) => {}
            (Observed::Rejected { code, reason, span }, _) => {
                if signed {
                    self.result.diagnostics.push(Diagnostic::error(
                        code,
                        span,
                        format!("initializer records of '{}' are rejected: {}", name, reason),
                    ));
                }
            }
            (Observed::Outputs(produced), None) => {
                if signed && !produced.is_empty() {
                    self.result.diagnostics.push(
                        Diagnostic::error(
                            codes::E0202,
                            span,
                            format!(
                                "'{}' produces initializer records {} but declares none",
                                name, produced
                            ),
                        )
                        .with_hint("add an initializer mapping `-> {...}` to the signature"),
                    );
                }
            }
            (Observed::Outputs(produced), Some(entry)) if entry.incomplete => {
                if sig.complete_entry(&InputKey::Init, produced) {
                    self.result.completed += 1;
                }
            }
            (Observed::Outputs(produced), Some(entry)) => {
                if !signed {
                    return Ok(());
                }
                if produced.is_empty() && !entry.outputs.is_empty() {
                    self.result.diagnostics.push(Diagnostic::error(
                        codes::E0202,
                        span,
                        format!(
                            "'{}' declares initializer outputs {} but contains no initializer",
                            name, entry.outputs
                        ),
                    ));
                    return Ok(());
                }
                self.compare(name, span, "initializer", &produced, &entry.outputs);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_entry(
        &mut self,
        name: &str,
        span: Span,
        key: &InputKey,
        input: &RecordType,
        observed: Observed,
        sig: &mut Signature,
        signed: bool,
    ) {
        let Some(entry) = sig.get(key).cloned() else {
            return;
        };
        match observed {
            Observed::Incomplete => {
                tracing::trace!(net = name, input = %input, "probe reached an incomplete component");
            }
            Observed::Rejected {
                code,
                reason,
                span: at,
            } => {
                if signed {
                    self.result.diagnostics.push(
                        Diagnostic::error(
                            code,
                            span,
                            format!("'{}' cannot handle its declared input {}", name, input),
                        )
                        .with_cause(reason, Some(at)),
                    );
                }
            }
            Observed::Outputs(produced) if entry.incomplete => {
                if sig.complete_entry(key, produced) {
                    self.result.completed += 1;
                }
            }
            Observed::Outputs(produced) => {
                if signed {
                    let context = format!("input {}", input);
                    self.compare(name, span, &context, &produced, &entry.outputs);
                }
            }
        }
    }

    /// Every produced shape must be accepted by a declared output; declared
    /// outputs nothing produced are reported as warnings.
    fn compare(
        &mut self,
        name: &str,
        span: Span,
        context: &str,
        produced: &VariantType,
        declared: &VariantType,
    ) {
        for shape in produced {
            if !declared.iter().any(|d| d.accepts(shape)) {
                self.result.diagnostics.push(
                    Diagnostic::error(
                        codes::E0200,
                        span,
                        format!(
                            "'{}' produces {} for {}, which its signature does not declare",
                            name, shape, context
                        ),
                    )
                    .with_cause(format!("declared outputs: {}", declared), None),
                );
            }
        }
        for d in declared {
            if !produced.iter().any(|shape| d.accepts(shape)) {
                self.result.diagnostics.push(Diagnostic::warning(
                    codes::W0200,
                    span,
                    format!("'{}' declares output {} for {} but never produces it", name, d, context),
                ));
            }
        }
    }

    // ── Simulation ──

    fn referenced_nets(&self, root: ExprId) -> Vec<DefId> {
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match &self.table.expr(id).kind {
                ExprKind::Ref { def: Some(def), .. } => found.push(*def),
                ExprKind::Ref { def: None, .. }
                | ExprKind::Filter { .. }
                | ExprKind::Sync { .. } => {}
                ExprKind::Serial { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
                ExprKind::Choice { branches, .. } => {
                    stack.extend(branches.iter().rev().map(|b| b.expr));
                }
                ExprKind::Star { body, .. }
                | ExprKind::Split { body, .. }
                | ExprKind::Feedback { body, .. } => stack.push(*body),
            }
        }
        found
    }

    fn expr_sig(&self, id: ExprId) -> Result<&'a Signature, InferError> {
        let expr_sigs: &'a HashMap<ExprId, Signature> = self.expr_sigs;
        expr_sigs.get(&id).ok_or_else(|| InferError::MissingSignature {
            name: format!("expression #{}", id.0),
            span: self.table.expr(id).span,
        })
    }

    fn def_sig(&self, def: DefId, span: Span) -> Result<&Signature, InferError> {
        self.sigs
            .get(&def)
            .ok_or_else(|| InferError::MissingSignature {
                name: self.table.def(def).path(self.table),
                span,
            })
    }

    /// Send one record shape through an expression.
    fn simulate(&self, id: ExprId, shape: &RecordType) -> Result<Observed, InferError> {
        let node = self.table.expr(id);
        let span = node.span;
        let rejected = |what: String| Observed::Rejected {
            code: codes::E0201,
            reason: format!("{} rejects {}", what, shape),
            span,
        };

        let observed = match &node.kind {
            ExprKind::Ref { name, def } => {
                let def = def.ok_or_else(|| InferError::Unresolved {
                    name: name.clone(),
                    span,
                })?;
                from_feed(self.def_sig(def, span)?.feed(shape), || {
                    rejected(format!("'{}'", name))
                })
            }
            ExprKind::Filter { .. } => {
                from_feed(self.expr_sig(id)?.feed(shape), || rejected("filter".to_string()))
            }
            ExprKind::Sync { .. } => from_feed(self.expr_sig(id)?.feed(shape), || {
                rejected("synchrocell".to_string())
            }),
            ExprKind::Serial { left, right } => match self.simulate(*left, shape)? {
                Observed::Outputs(mid) => self.simulate_all(*right, &mid)?,
                other => other,
            },
            ExprKind::Choice { branches, .. } => {
                let mut scored = Vec::new();
                for branch in branches {
                    let attraction = match &branch.guard {
                        Some(guard) => crate::extract::variant_from_patterns(guard),
                        None => self.expr_sig(branch.expr)?.input_variant(),
                    };
                    if let Some(score) = attraction.best_score(shape) {
                        scored.push((score, branch.expr));
                    }
                }
                match scored.iter().map(|(s, _)| *s).max() {
                    None => rejected("every choice branch".to_string()),
                    Some(best) => {
                        let mut outputs = VariantType::new();
                        let mut result = None;
                        for (_, expr) in scored.iter().filter(|(s, _)| *s == best) {
                            match self.simulate(*expr, shape)? {
                                Observed::Outputs(o) => {
                                    outputs.absorb(&o);
                                }
                                other => {
                                    result.get_or_insert(other);
                                }
                            }
                        }
                        result.unwrap_or(Observed::Outputs(outputs))
                    }
                }
            }
            ExprKind::Split { tag, range_end, .. } => {
                let missing = std::iter::once(tag)
                    .chain(range_end.as_ref())
                    .find(|t| !shape.has_label(t));
                match missing {
                    Some(t) => Observed::Rejected {
                        code: codes::E0203,
                        reason: format!("split on <{}> receives {}, which lacks the tag", t, shape),
                        span,
                    },
                    None => from_feed(self.expr_sig(id)?.feed(shape), || {
                        rejected("split".to_string())
                    }),
                }
            }
            ExprKind::Star { .. } => {
                from_feed(self.expr_sig(id)?.feed(shape), || rejected("star".to_string()))
            }
            ExprKind::Feedback { .. } => from_feed(self.expr_sig(id)?.feed(shape), || {
                rejected("feedback loop".to_string())
            }),
        };
        Ok(observed)
    }

    fn simulate_all(&self, id: ExprId, shapes: &VariantType) -> Result<Observed, InferError> {
        let mut outputs = VariantType::new();
        for shape in shapes {
            match self.simulate(id, shape)? {
                Observed::Outputs(o) => {
                    outputs.absorb(&o);
                }
                other => return Ok(other),
            }
        }
        Ok(Observed::Outputs(outputs))
    }

    /// Records an expression emits before any input arrives.
    fn simulate_init(&self, id: ExprId) -> Result<Observed, InferError> {
        let node = self.table.expr(id);
        let observed = match &node.kind {
            ExprKind::Ref { name, def } => {
                let def = def.ok_or_else(|| InferError::Unresolved {
                    name: name.clone(),
                    span: node.span,
                })?;
                from_feed(self.def_sig(def, node.span)?.feed_init(), || {
                    Observed::Incomplete
                })
            }
            ExprKind::Filter { .. } | ExprKind::Sync { .. } => {
                Observed::Outputs(VariantType::new())
            }
            ExprKind::Serial { left, right } => {
                let upstream = match self.simulate_init(*left)? {
                    Observed::Outputs(o) => self.simulate_all(*right, &o)?,
                    other => other,
                };
                let own = self.simulate_init(*right)?;
                merge_observed(upstream, own)
            }
            ExprKind::Choice { branches, .. } => {
                let mut acc = Observed::Outputs(VariantType::new());
                for branch in branches {
                    acc = merge_observed(acc, self.simulate_init(branch.expr)?);
                }
                acc
            }
            ExprKind::Star { .. } | ExprKind::Split { .. } | ExprKind::Feedback { .. } => {
                from_feed(self.expr_sig(id)?.feed_init(), || Observed::Incomplete)
            }
        };
        Ok(observed)
    }
}

fn from_feed(feed: Feed, on_reject: impl FnOnce() -> Observed) -> Observed {
    match feed {
        Feed::Outputs(o) => Observed::Outputs(o),
        Feed::Incomplete => Observed::Incomplete,
        Feed::Rejected => on_reject(),
    }
}

fn merge_observed(a: Observed, b: Observed) -> Observed {
    match (a, b) {
        (Observed::Outputs(x), Observed::Outputs(y)) => Observed::Outputs(x.combine(y)),
        (rejected @ Observed::Rejected { .. }, _) | (_, rejected @ Observed::Rejected { .. }) => {
            rejected
        }
        _ => Observed::Incomplete,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
