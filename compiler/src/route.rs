// route.rs — Routing/restriction pass
//
// One recursive traversal from the top-level network. Boxes, signed and
// external nets get their signature exactly once (memoized by DefId). The
// "acceptable inputs" restriction of each context is pushed down through
// sequencing, choice, split, star and feedback; an unsigned net reached
// under a restriction is re-inferred for it, memoized by (DefId,
// restriction), so input paths the context cannot deliver are never
// composed. The signature inferred for every combinator node is kept in a
// side table keyed by ExprId.
//
// Preconditions: `table` comes from a resolve pass without errors.
// Postconditions: every definition has a signature in `sigs`; every
//   expression node of a routed body has one in `expr_sigs`.
// Failure modes: recoverable inference problems are diagnostics; usage and
//   structural problems are fatal `InferError`s.
// Side effects: tracing events at `debug`/`trace` level.

use std::collections::{HashMap, HashSet};

use crate::ast::Span;
use crate::diag::{codes, Diagnostic};
use crate::extract;
use crate::fixpoint::ExitPattern;
use crate::id::{DefId, ExprId};
use crate::infer::{InferOptions, Inference};
use crate::record::VariantType;
use crate::resolve::{DefKind, ExprKind, NetTable};
use crate::signature::{Feed, InputKey, Signature};

// ── Errors ──────────────────────────────────────────────────────────────────

/// Problems that stop compilation immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferError {
    #[error("{operand} only produces initializer records and cannot be the operand of {operation}")]
    InitializerOperand {
        operation: &'static str,
        operand: String,
        span: Span,
    },
    #[error("top-level network '{name}' only produces initializer records")]
    InitializerTopLevel { name: String, span: Span },
    #[error("network '{name}' refers to itself")]
    Recursive { name: String, span: Span },
    #[error("internal: no signature recorded for '{name}'")]
    MissingSignature { name: String, span: Span },
    #[error("reference to unresolved name '{name}'")]
    Unresolved { name: String, span: Span },
}

impl InferError {
    pub fn span(&self) -> Span {
        match self {
            InferError::InitializerOperand { span, .. }
            | InferError::InitializerTopLevel { span, .. }
            | InferError::Recursive { span, .. }
            | InferError::MissingSignature { span, .. }
            | InferError::Unresolved { span, .. } => *span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let code = match self {
            InferError::InitializerOperand { .. } => codes::E0400,
            InferError::InitializerTopLevel { .. } => codes::E0401,
            InferError::Recursive { .. } => codes::E0302,
            InferError::MissingSignature { .. } => codes::E0303,
            InferError::Unresolved { .. } => codes::E0001,
        };
        let diag = Diagnostic::error(code, self.span(), self.to_string());
        match self {
            InferError::InitializerOperand { .. } => diag
                .with_hint("initializer-only components emit records once and never receive any"),
            InferError::Recursive { .. } => {
                diag.with_hint("use a star or feedback combinator to express repetition")
            }
            _ => diag,
        }
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RouteResult {
    /// Per definition: the declared signature for boxes, signed and external
    /// nets. For unsigned nets, the unrestricted inferred signature when
    /// some context uses the net unrestricted, otherwise the union of the
    /// signatures inferred under each restricting context.
    pub sigs: HashMap<DefId, Signature>,
    /// Per expression node, united over the routing contexts it was
    /// inferred in.
    pub expr_sigs: HashMap<ExprId, Signature>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Infer signatures for the whole table, starting at the top-level network.
///
/// Definitions not reachable from the top-level network are inferred
/// unrestricted afterwards. Nets reached only through restricting contexts
/// are not inferred again without restriction.
pub fn route(table: &NetTable, options: InferOptions) -> Result<RouteResult, InferError> {
    let mut router = Router {
        table,
        inference: Inference::new(options),
        sigs: HashMap::new(),
        unrestricted: HashSet::new(),
        narrowed: HashMap::new(),
        expr_sigs: HashMap::new(),
        in_progress: HashSet::new(),
    };

    if let Some(top) = table.top() {
        let sig = router.def_signature(top, None)?;
        if sig.is_init_only() {
            let def = table.def(top);
            return Err(InferError::InitializerTopLevel {
                name: def.name.clone(),
                span: def.span,
            });
        }
    }
    for def in table.defs() {
        if !router.sigs.contains_key(&def.id) {
            router.def_signature(def.id, None)?;
        }
    }

    // loop bodies are routed once per growth step of their scope
    let mut seen = HashSet::new();
    let diagnostics = router
        .inference
        .take_diagnostics()
        .into_iter()
        .filter(|d| seen.insert(d.to_string()))
        .collect();

    Ok(RouteResult {
        sigs: router.sigs,
        expr_sigs: router.expr_sigs,
        diagnostics,
    })
}

// ── Internal context ────────────────────────────────────────────────────────

struct Router<'a> {
    table: &'a NetTable,
    inference: Inference,
    sigs: HashMap<DefId, Signature>,
    /// Definitions whose unrestricted signature is in `sigs`.
    unrestricted: HashSet<DefId>,
    /// Unsigned nets re-inferred under a restriction.
    narrowed: HashMap<(DefId, VariantType), Signature>,
    expr_sigs: HashMap<ExprId, Signature>,
    in_progress: HashSet<DefId>,
}

impl<'a> Router<'a> {
    /// Signature of a definition as seen from a context that can only
    /// deliver `allowed`. Only unsigned, non-external nets are re-inferred
    /// under the restriction; every other definition keeps its declared or
    /// unrestricted signature.
    fn def_signature(
        &mut self,
        id: DefId,
        allowed: Option<&VariantType>,
    ) -> Result<Signature, InferError> {
        let table = self.table;
        let narrowable = table
            .def(id)
            .as_net()
            .is_some_and(|net| !net.is_signed() && !net.external);
        match allowed {
            Some(scope) if narrowable => self.narrowed_signature(id, scope),
            _ => self.full_signature(id),
        }
    }

    fn full_signature(&mut self, id: DefId) -> Result<Signature, InferError> {
        if self.unrestricted.contains(&id) {
            if let Some(sig) = self.sigs.get(&id) {
                return Ok(sig.clone());
            }
        }
        let sig = self.infer_def(id, None)?;
        self.unrestricted.insert(id);
        self.sigs.insert(id, sig.clone());
        Ok(sig)
    }

    fn narrowed_signature(
        &mut self,
        id: DefId,
        scope: &VariantType,
    ) -> Result<Signature, InferError> {
        let key = (id, scope.clone());
        if let Some(sig) = self.narrowed.get(&key) {
            return Ok(sig.clone());
        }
        let sig = self.infer_def(id, Some(scope))?.restrict(scope);
        self.narrowed.insert(key, sig.clone());
        if !self.unrestricted.contains(&id) {
            let table = self.table;
            let used = self.sigs.entry(id).or_default();
            let conflicts = used.merge(sig.clone());
            if !conflicts.is_empty() {
                tracing::trace!(
                    def = %table.def(id).path(table),
                    conflicts = conflicts.len(),
                    "restricted signatures disagree, first kept"
                );
            }
        }
        Ok(sig)
    }

    /// Compute a definition's signature. `scope` restricts the body of an
    /// unsigned net; signed nets are inferred under their declared inputs.
    fn infer_def(
        &mut self,
        id: DefId,
        scope: Option<&VariantType>,
    ) -> Result<Signature, InferError> {
        let table = self.table;
        let def = table.def(id);
        if !self.in_progress.insert(id) {
            return Err(InferError::Recursive {
                name: def.path(table),
                span: def.span,
            });
        }

        let sig = match &def.kind {
            DefKind::Box(b) => {
                extract::signature_from_decl(&def.name, &b.sig, &mut self.inference.diagnostics)
            }
            DefKind::Net(net) if net.external => match &net.sig {
                Some(decl) => {
                    extract::signature_from_decl(&def.name, decl, &mut self.inference.diagnostics)
                }
                None => {
                    self.inference.diagnostics.push(Diagnostic::error(
                        codes::E0301,
                        def.span,
                        format!("external net '{}' has no type signature", def.name),
                    ));
                    Signature::new()
                }
            },
            DefKind::Net(net) => {
                let declared = net.sig.as_ref().map(|decl| {
                    extract::signature_from_decl(&def.name, decl, &mut self.inference.diagnostics)
                });
                let allowed = match &declared {
                    Some(declared) => Some(declared.input_variant()),
                    None => scope.cloned(),
                };
                let body = match net.body {
                    Some(body) => self.expr_signature(body, allowed.as_ref())?,
                    None => Signature::new(),
                };
                match declared {
                    Some(mut declared) => {
                        fill_incomplete(&mut declared, &body);
                        declared
                    }
                    None => body,
                }
            }
        };

        self.in_progress.remove(&id);
        tracing::debug!(
            def = %def.path(table),
            restricted = scope.is_some(),
            entries = sig.len(),
            complete = sig.is_complete(),
            "signature computed"
        );
        Ok(sig)
    }

    fn expr_signature(
        &mut self,
        id: ExprId,
        allowed: Option<&VariantType>,
    ) -> Result<Signature, InferError> {
        let table = self.table;
        let node = table.expr(id);
        let span = node.span;

        let sig = match &node.kind {
            ExprKind::Ref { name, def } => {
                let def = def.ok_or_else(|| InferError::Unresolved {
                    name: name.clone(),
                    span,
                })?;
                self.def_signature(def, allowed)?
            }
            ExprKind::Filter { pattern, actions } => extract::filter_signature(pattern, actions),
            ExprKind::Sync { main, aux } => extract::sync_signature(main, aux, span),
            ExprKind::Serial { left, right } => {
                let l = self.expr_signature(*left, allowed)?;
                self.reject_initializer(&l, *left, "serial composition")?;
                let l = match allowed {
                    Some(scope) => l.restrict(scope),
                    None => l,
                };
                let reachable = l.output_variant();
                let r = self.expr_signature(*right, Some(&reachable))?;
                self.reject_initializer(&r, *right, "serial composition")?;
                self.inference.serial(&l, &r, span)
            }
            ExprKind::Choice {
                branches,
                deterministic,
            } => {
                let mut operands = Vec::with_capacity(branches.len());
                for branch in branches {
                    let guard = branch
                        .guard
                        .as_deref()
                        .map(extract::variant_from_patterns);
                    let sig = self.expr_signature(branch.expr, guard.as_ref().or(allowed))?;
                    operands.push((sig, guard));
                }
                tracing::trace!(deterministic, "choice");
                self.inference.choice(&operands, span)
            }
            ExprKind::Star {
                body,
                terminators,
                deterministic,
            } => {
                let a = self.loop_body(*body, allowed, None)?;
                self.reject_initializer(&a, *body, "star")?;
                let exits: Vec<ExitPattern> = terminators
                    .iter()
                    .map(|t| ExitPattern {
                        pattern: extract::record_from_pattern(&t.pattern).pattern(),
                        conditional: t.guard.is_some(),
                    })
                    .collect();
                tracing::trace!(deterministic, terminators = exits.len(), "star");
                self.inference.star(&a, &exits, span)
            }
            ExprKind::Split {
                body,
                tag,
                range_end,
                deterministic,
            } => {
                let a = self.expr_signature(*body, allowed)?;
                self.reject_initializer(&a, *body, "split")?;
                tracing::trace!(deterministic, tag = %tag, "split");
                self.inference.split(&a, tag, range_end.as_deref(), span)
            }
            ExprKind::Feedback { body, back } => {
                let back = extract::variant_from_patterns(back);
                let a = self.loop_body(*body, allowed, Some(&back))?;
                self.reject_initializer(&a, *body, "feedback")?;
                self.inference.feedback(&a, &back, span)
            }
        };

        self.record_expr(id, &sig);
        Ok(sig)
    }

    /// Route the body of a star or feedback loop.
    ///
    /// The body receives the outer inputs plus the outputs it feeds back to
    /// itself: all of them for star, those accepted by `back` for feedback.
    /// The scope grows until the body's outputs add nothing new. If it does
    /// not settle within the iteration limit the body is routed
    /// unrestricted.
    fn loop_body(
        &mut self,
        body: ExprId,
        allowed: Option<&VariantType>,
        back: Option<&VariantType>,
    ) -> Result<Signature, InferError> {
        let Some(allowed) = allowed else {
            return self.expr_signature(body, None);
        };
        let mut scope = allowed.clone();
        for round in 0..self.inference.options.star_iteration_limit {
            let sig = self.expr_signature(body, Some(&scope))?;
            let mut grown = false;
            for shape in sig.output_variant() {
                if back.map_or(true, |b| b.accepts(&shape)) {
                    grown |= scope.insert(shape);
                }
            }
            if !grown {
                tracing::trace!(round, shapes = scope.len(), "loop scope settled");
                return Ok(sig);
            }
        }
        tracing::trace!("loop scope did not settle, routing body unrestricted");
        self.expr_signature(body, None)
    }

    fn record_expr(&mut self, id: ExprId, sig: &Signature) {
        match self.expr_sigs.get_mut(&id) {
            None => {
                self.expr_sigs.insert(id, sig.clone());
            }
            Some(existing) => {
                let conflicts = existing.merge(sig.clone());
                if !conflicts.is_empty() {
                    tracing::trace!(
                        expr = id.0,
                        conflicts = conflicts.len(),
                        "routing contexts disagree, first kept"
                    );
                }
            }
        }
    }

    fn reject_initializer(
        &self,
        sig: &Signature,
        operand: ExprId,
        operation: &'static str,
    ) -> Result<(), InferError> {
        if !sig.is_init_only() {
            return Ok(());
        }
        let node = self.table.expr(operand);
        let operand = match &node.kind {
            ExprKind::Ref { name, .. } => format!("'{}'", name),
            _ => "expression".to_string(),
        };
        Err(InferError::InitializerOperand {
            operation,
            operand,
            span: node.span,
        })
    }
}

/// Fill the incomplete entries of a declared signature from the signature
/// inferred for the body.
fn fill_incomplete(declared: &mut Signature, body: &Signature) {
    let pending: Vec<(InputKey, Feed)> = declared
        .entries()
        .filter(|e| e.incomplete)
        .map(|e| {
            let observed = match &e.input {
                Some(input) => body.feed(&input.pattern().all_pass()),
                None => body.feed_init(),
            };
            (e.key(), observed)
        })
        .collect();
    for (key, observed) in pending {
        if let Feed::Outputs(outputs) = observed {
            declared.complete_entry(&key, outputs);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
