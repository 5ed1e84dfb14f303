// resolve.rs — Name resolution for network descriptions
//
// Walks the AST, assigns a DefId to every box and net definition and an
// ExprId to every combinator node, and resolves name references
// innermost-scope-first. The result is an arena (`NetTable`) consumed by the
// routing and type-checking passes in place of the nested AST.
//
// Preconditions: `program` is a well-formed AST from the front end.
// Postconditions: every definition and expression node appears in the
//   table exactly once, in source order; unresolved references keep their
//   name and carry `def == None`.
// Failure modes: unknown names (E0001), duplicate definitions (E0002), no
//   top-level network (E0003), internal net without body (E0004) produce
//   `Diagnostic` entries. Resolution continues past errors.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{
    Branch, FilterAction, Ident, NetDef, NetExpr, Program, RecordPattern, Span, Terminator,
    TypeSigDecl,
};
use crate::diag::{codes, Diagnostic};
use crate::id::{DefId, ExprId, IdAllocator};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of name resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub table: NetTable,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct BoxEntry {
    pub sig: TypeSigDecl,
}

#[derive(Debug, Clone)]
pub struct NetEntry {
    pub sig: Option<TypeSigDecl>,
    pub external: bool,
    pub top_level: bool,
    pub body: Option<ExprId>,
}

impl NetEntry {
    pub fn is_signed(&self) -> bool {
        self.sig.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum DefKind {
    Box(BoxEntry),
    Net(NetEntry),
}

/// A box or net definition.
#[derive(Debug, Clone)]
pub struct DefEntry {
    pub id: DefId,
    pub name: String,
    pub span: Span,
    /// Enclosing net, `None` for globals.
    pub parent: Option<DefId>,
    pub kind: DefKind,
}

impl DefEntry {
    pub fn as_net(&self) -> Option<&NetEntry> {
        match &self.kind {
            DefKind::Net(net) => Some(net),
            DefKind::Box(_) => None,
        }
    }

    pub fn is_box(&self) -> bool {
        matches!(self.kind, DefKind::Box(_))
    }

    /// Qualified name (`outer.inner`) for diagnostics.
    pub fn path(&self, table: &NetTable) -> String {
        match self.parent {
            Some(parent) => format!("{}.{}", table.def(parent).path(table), self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedBranch {
    pub guard: Option<Vec<RecordPattern>>,
    pub expr: ExprId,
}

/// A combinator node with its operands replaced by arena ids.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Ref {
        name: String,
        def: Option<DefId>,
    },
    Filter {
        pattern: RecordPattern,
        actions: Vec<FilterAction>,
    },
    Sync {
        main: RecordPattern,
        aux: Vec<RecordPattern>,
    },
    Serial {
        left: ExprId,
        right: ExprId,
    },
    Choice {
        branches: Vec<ResolvedBranch>,
        deterministic: bool,
    },
    Star {
        body: ExprId,
        terminators: Vec<Terminator>,
        deterministic: bool,
    },
    Split {
        body: ExprId,
        tag: String,
        range_end: Option<String>,
        deterministic: bool,
    },
    Feedback {
        body: ExprId,
        back: Vec<RecordPattern>,
    },
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    pub id: ExprId,
    pub span: Span,
    /// Net whose body contains this node.
    pub owner: DefId,
    pub kind: ExprKind,
}

/// Arena of resolved definitions and expression nodes.
#[derive(Debug, Default)]
pub struct NetTable {
    defs: Vec<DefEntry>,
    exprs: Vec<ExprNode>,
    globals: HashMap<String, DefId>,
    top: Option<DefId>,
}

impl NetTable {
    pub fn def(&self, id: DefId) -> &DefEntry {
        &self.defs[id.0 as usize]
    }

    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.exprs[id.0 as usize]
    }

    pub fn defs(&self) -> impl Iterator<Item = &DefEntry> {
        self.defs.iter()
    }

    pub fn exprs(&self) -> impl Iterator<Item = &ExprNode> {
        self.exprs.iter()
    }

    pub fn global(&self, name: &str) -> Option<DefId> {
        self.globals.get(name).copied()
    }

    /// The designated top-level network.
    pub fn top(&self) -> Option<DefId> {
        self.top
    }

    /// Look up a definition by qualified path (`outer.inner`).
    pub fn lookup_path(&self, path: &str) -> Option<DefId> {
        self.defs
            .iter()
            .find(|d| d.path(self) == path)
            .map(|d| d.id)
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Resolve all names of a network description.
///
/// The top-level network is `program.top` when given, else the first global
/// net flagged `top_level`, else the last global net.
pub fn resolve(program: &Program) -> ResolveResult {
    let mut ctx = ResolveCtx::new();

    let globals = ctx.declare_scope(&program.boxes, &program.nets, None);
    ctx.table.globals = ctx.scopes.last().cloned().unwrap_or_default();
    ctx.resolve_nets(&program.nets, &globals);
    ctx.scopes.pop();

    ctx.table.top = ctx.select_top(program, &globals);

    tracing::debug!(
        defs = ctx.table.defs.len(),
        exprs = ctx.table.exprs.len(),
        top = ?ctx.table.top,
        "resolved network description"
    );

    ResolveResult {
        table: ctx.table,
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct ResolveCtx {
    table: NetTable,
    diagnostics: Vec<Diagnostic>,
    /// Lexical scopes, innermost last.
    scopes: Vec<HashMap<String, DefId>>,
    id_alloc: IdAllocator,
}

impl ResolveCtx {
    fn new() -> Self {
        ResolveCtx {
            table: NetTable::default(),
            diagnostics: Vec::new(),
            scopes: Vec::new(),
            id_alloc: IdAllocator::new(),
        }
    }

    fn define(&mut self, name: &Ident, span: Span, parent: Option<DefId>, kind: DefKind) -> DefId {
        let id = self.id_alloc.alloc_def();
        self.table.defs.push(DefEntry {
            id,
            name: name.name.clone(),
            span,
            parent,
            kind,
        });
        id
    }

    fn bind(&mut self, scope: &mut HashMap<String, DefId>, name: &Ident, id: DefId) {
        if let Some(&existing) = scope.get(&name.name) {
            let first = self.table.def(existing).span;
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0002,
                    name.span,
                    format!("duplicate definition of '{}'", name.name),
                )
                .with_related(first, "first defined here"),
            );
        } else {
            scope.insert(name.name.clone(), id);
        }
    }

    /// Allocate ids for one scope's boxes and nets and push the scope.
    /// Returns the net ids in declaration order.
    fn declare_scope(
        &mut self,
        boxes: &[crate::ast::BoxDef],
        nets: &[NetDef],
        parent: Option<DefId>,
    ) -> Vec<DefId> {
        let mut scope = HashMap::new();
        for b in boxes {
            let id = self.define(
                &b.name,
                b.span,
                parent,
                DefKind::Box(BoxEntry { sig: b.sig.clone() }),
            );
            self.bind(&mut scope, &b.name, id);
        }
        let mut net_ids = Vec::with_capacity(nets.len());
        for n in nets {
            let id = self.define(
                &n.name,
                n.span,
                parent,
                DefKind::Net(NetEntry {
                    sig: n.sig.clone(),
                    external: n.external,
                    top_level: n.top_level,
                    body: None,
                }),
            );
            self.bind(&mut scope, &n.name, id);
            net_ids.push(id);
        }
        self.scopes.push(scope);
        net_ids
    }

    fn resolve_nets(&mut self, nets: &[NetDef], ids: &[DefId]) {
        for (net, &id) in nets.iter().zip(ids) {
            let inner = self.declare_scope(&net.boxes, &net.nets, Some(id));
            self.resolve_nets(&net.nets, &inner);

            let body = match (&net.body, net.external) {
                (Some(body), false) => Some(self.resolve_expr(body, id)),
                (Some(_), true) => {
                    tracing::debug!(net = %net.name.name, "ignoring body of external net");
                    None
                }
                (None, true) => None,
                (None, false) => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            codes::E0004,
                            net.span,
                            format!("net '{}' has no body", net.name.name),
                        )
                        .with_hint("declare the net `external` or give it a connect expression"),
                    );
                    None
                }
            };
            if let DefKind::Net(entry) = &mut self.table.defs[id.0 as usize].kind {
                entry.body = body;
            }
            self.scopes.pop();
        }
    }

    fn lookup(&self, name: &str) -> Option<DefId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn push_expr(&mut self, span: Span, owner: DefId, kind: ExprKind) -> ExprId {
        let id = self.id_alloc.alloc_expr();
        self.table.exprs.push(ExprNode {
            id,
            span,
            owner,
            kind,
        });
        id
    }

    fn resolve_expr(&mut self, expr: &NetExpr, owner: DefId) -> ExprId {
        let kind = match expr {
            NetExpr::Ref { name } => {
                let def = self.lookup(&name.name);
                if def.is_none() {
                    self.diagnostics.push(Diagnostic::error(
                        codes::E0001,
                        name.span,
                        format!("unknown box or net '{}'", name.name),
                    ));
                }
                ExprKind::Ref {
                    name: name.name.clone(),
                    def,
                }
            }
            NetExpr::Filter {
                pattern, actions, ..
            } => ExprKind::Filter {
                pattern: pattern.clone(),
                actions: actions.clone(),
            },
            NetExpr::Sync { main, aux, .. } => ExprKind::Sync {
                main: main.clone(),
                aux: aux.clone(),
            },
            NetExpr::Serial { left, right, .. } => {
                let left = self.resolve_expr(left, owner);
                let right = self.resolve_expr(right, owner);
                ExprKind::Serial { left, right }
            }
            NetExpr::Choice {
                branches,
                deterministic,
                ..
            } => ExprKind::Choice {
                branches: branches
                    .iter()
                    .map(|Branch { guard, expr }| ResolvedBranch {
                        guard: guard.clone(),
                        expr: self.resolve_expr(expr, owner),
                    })
                    .collect(),
                deterministic: *deterministic,
            },
            NetExpr::Star {
                body,
                terminators,
                deterministic,
                ..
            } => ExprKind::Star {
                body: self.resolve_expr(body, owner),
                terminators: terminators.clone(),
                deterministic: *deterministic,
            },
            NetExpr::Split {
                body,
                tag,
                range_end,
                deterministic,
                ..
            } => ExprKind::Split {
                body: self.resolve_expr(body, owner),
                tag: tag.name.clone(),
                range_end: range_end.as_ref().map(|t| t.name.clone()),
                deterministic: *deterministic,
            },
            NetExpr::Feedback { body, back, .. } => ExprKind::Feedback {
                body: self.resolve_expr(body, owner),
                back: back.clone(),
            },
        };
        self.push_expr(expr.span(), owner, kind)
    }

    fn select_top(&mut self, program: &Program, globals: &[DefId]) -> Option<DefId> {
        if let Some(top) = &program.top {
            let found = self
                .table
                .globals
                .get(&top.name)
                .copied()
                .filter(|&id| !self.table.def(id).is_box());
            if found.is_none() {
                self.diagnostics.push(Diagnostic::error(
                    codes::E0001,
                    top.span,
                    format!("top-level network '{}' is not a global net", top.name),
                ));
            }
            return found;
        }
        let flagged = globals.iter().copied().find(|&id| {
            self.table
                .def(id)
                .as_net()
                .is_some_and(|net| net.top_level)
        });
        let top = flagged.or_else(|| globals.last().copied());
        if top.is_none() {
            self.diagnostics.push(
                Diagnostic::error(codes::E0003, Span::default(), "no top-level network")
                    .with_hint("define at least one global net"),
            );
        }
        top
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BoxDef, TypeSigDecl};

    fn boxdef(name: &str) -> BoxDef {
        BoxDef {
            name: Ident::synthetic(name),
            sig: TypeSigDecl::default(),
            span: Span::default(),
        }
    }

    fn net(name: &str, body: NetExpr) -> NetDef {
        NetDef {
            name: Ident::synthetic(name),
            sig: None,
            external: false,
            top_level: false,
            boxes: Vec::new(),
            nets: Vec::new(),
            body: Some(body),
            span: Span::default(),
        }
    }

    fn codes_of(result: &ResolveResult) -> Vec<&'static str> {
        result
            .diagnostics
            .iter()
            .filter_map(|d| d.code.map(|c| c.0))
            .collect()
    }

    #[test]
    fn resolves_global_references() {
        let program = Program {
            boxes: vec![boxdef("A"), boxdef("B")],
            nets: vec![net(
                "main",
                NetExpr::serial(NetExpr::reference("A"), NetExpr::reference("B")),
            )],
            top: None,
        };
        let result = resolve(&program);
        assert!(result.diagnostics.is_empty());
        let top = result.table.top().unwrap();
        assert_eq!(result.table.def(top).name, "main");
        let refs: Vec<_> = result
            .table
            .exprs()
            .filter_map(|e| match &e.kind {
                ExprKind::Ref { def, .. } => *def,
                _ => None,
            })
            .collect();
        assert_eq!(refs, vec![DefId(0), DefId(1)]);
    }

    #[test]
    fn inner_definitions_shadow_globals() {
        let mut outer = net("main", NetExpr::reference("A"));
        outer.boxes.push(boxdef("A"));
        let program = Program {
            boxes: vec![boxdef("A")],
            nets: vec![outer],
            top: None,
        };
        let result = resolve(&program);
        assert!(result.diagnostics.is_empty());
        let target = result
            .table
            .exprs()
            .find_map(|e| match &e.kind {
                ExprKind::Ref { def, .. } => *def,
                _ => None,
            })
            .unwrap();
        let entry = result.table.def(target);
        assert_eq!(entry.path(&result.table), "main.A");
        assert_eq!(result.table.lookup_path("main.A"), Some(target));
    }

    #[test]
    fn unknown_reference_reported() {
        let program = Program {
            boxes: Vec::new(),
            nets: vec![net("main", NetExpr::reference("missing"))],
            top: None,
        };
        let result = resolve(&program);
        assert_eq!(codes_of(&result), vec!["E0001"]);
    }

    #[test]
    fn duplicate_definition_reported() {
        let program = Program {
            boxes: vec![boxdef("A"), boxdef("A")],
            nets: vec![net("main", NetExpr::reference("A"))],
            top: None,
        };
        let result = resolve(&program);
        assert_eq!(codes_of(&result), vec!["E0002"]);
    }

    #[test]
    fn top_level_selection_order() {
        let mut flagged = net("first", NetExpr::identity_filter());
        flagged.top_level = true;
        let program = Program {
            boxes: Vec::new(),
            nets: vec![flagged, net("last", NetExpr::identity_filter())],
            top: None,
        };
        let result = resolve(&program);
        assert_eq!(result.table.def(result.table.top().unwrap()).name, "first");

        let explicit = Program {
            top: Some(Ident::synthetic("last")),
            ..program
        };
        let result = resolve(&explicit);
        assert_eq!(result.table.def(result.table.top().unwrap()).name, "last");
    }

    #[test]
    fn missing_top_and_missing_body() {
        let result = resolve(&Program::default());
        assert_eq!(codes_of(&result), vec!["E0003"]);

        let mut bodyless = net("main", NetExpr::identity_filter());
        bodyless.body = None;
        let result = resolve(&Program {
            boxes: Vec::new(),
            nets: vec![bodyless],
            top: None,
        });
        assert_eq!(codes_of(&result), vec!["E0004"]);
    }
}
