// AST node types for S-Net network descriptions.
//
// The tree is produced by the (external) front end and consumed by the type
// engine. Every node that can be blamed in a diagnostic carries a `Span`.
// All types deserialize from JSON so a front end in any language can hand
// a tree to the driver.
//
// Preconditions: produced by a front end from a valid or partially-valid source.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use serde::{Deserialize, Serialize};

/// Byte-offset span in the original source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    #[serde(default)]
    pub span: Span,
}

impl Ident {
    /// Identifier without source location (synthesized nodes, tests).
    pub fn synthetic(name: impl Into<String>) -> Self {
        Ident {
            name: name.into(),
            span: Span::default(),
        }
    }
}

// ── Root ──

/// A complete network description: global boxes and nets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub boxes: Vec<BoxDef>,
    #[serde(default)]
    pub nets: Vec<NetDef>,
    /// Explicitly designated top-level network. When absent, a net flagged
    /// `top_level` is used, else the last global net.
    #[serde(default)]
    pub top: Option<Ident>,
}

// ── Record patterns ──

/// What a pattern entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// `a`: a field carrying an opaque value.
    Field,
    /// `<t>`: a simple tag carrying an integer.
    Tag,
    /// `<#b>`: a binding tag (control marker, no value).
    BindingTag,
}

/// Pass-through/discard qualifier on a pattern entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifier {
    #[default]
    Plain,
    /// `=a`: the value flows from input to output unchanged.
    Pass,
    /// `-a`: the value is consumed and removed.
    Discard,
}

/// One entry of a record pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub name: Ident,
    pub kind: EntryKind,
    #[serde(default)]
    pub qualifier: Qualifier,
}

/// `{a, <t>, <#b>}`: a syntactic record type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPattern {
    #[serde(default)]
    pub entries: Vec<PatternEntry>,
    #[serde(default)]
    pub span: Span,
}

// ── Type signature declarations ──

/// One `input -> output | output` mapping of a type declaration.
///
/// `input == None` declares initializer behaviour (no input record).
/// `outputs == None` declares only the input side; the entry is incomplete
/// until the type checker observes what the component produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMapping {
    #[serde(default)]
    pub input: Option<RecordPattern>,
    #[serde(default)]
    pub outputs: Option<Vec<RecordPattern>>,
    #[serde(default)]
    pub span: Span,
}

/// A box or net type annotation: a list of mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSigDecl {
    pub mappings: Vec<TypeMapping>,
    #[serde(default)]
    pub span: Span,
}

// ── Definitions ──

/// `box name (in -> out | out)`: an atomic component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxDef {
    pub name: Ident,
    pub sig: TypeSigDecl,
    #[serde(default)]
    pub span: Span,
}

/// `net name (sig)? { boxes; nets } connect body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetDef {
    pub name: Ident,
    /// Declared signature; a net with one is "signed".
    #[serde(default)]
    pub sig: Option<TypeSigDecl>,
    /// Defined elsewhere: only the declared signature is known.
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub top_level: bool,
    #[serde(default)]
    pub boxes: Vec<BoxDef>,
    #[serde(default)]
    pub nets: Vec<NetDef>,
    #[serde(default)]
    pub body: Option<NetExpr>,
    #[serde(default)]
    pub span: Span,
}

impl NetDef {
    pub fn is_signed(&self) -> bool {
        self.sig.is_some()
    }
}

// ── Network expressions ──

/// A branch of a choice combinator, optionally guarded by a type that
/// attracts records to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub guard: Option<Vec<RecordPattern>>,
    pub expr: NetExpr,
}

/// A star termination pattern. A guard makes termination conditional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminator {
    pub pattern: RecordPattern,
    /// Guard expression source text; only its presence matters for typing.
    #[serde(default)]
    pub guard: Option<String>,
}

/// `[pattern -> action; action]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterAction {
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub outputs: Vec<RecordPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetExpr {
    /// A box or net name.
    Ref { name: Ident },
    /// `[pattern -> actions]`; no actions is the identity filter `[]`.
    Filter {
        #[serde(default)]
        pattern: RecordPattern,
        #[serde(default)]
        actions: Vec<FilterAction>,
        #[serde(default)]
        span: Span,
    },
    /// `[| main, aux, ... |]`
    Sync {
        main: RecordPattern,
        #[serde(default)]
        aux: Vec<RecordPattern>,
        #[serde(default)]
        span: Span,
    },
    /// `left .. right`
    Serial {
        left: Box<NetExpr>,
        right: Box<NetExpr>,
        #[serde(default)]
        span: Span,
    },
    /// `a | b` or `a || b`
    Choice {
        branches: Vec<Branch>,
        #[serde(default)]
        deterministic: bool,
        #[serde(default)]
        span: Span,
    },
    /// `body * {terminators}` or `body ** {terminators}`
    Star {
        body: Box<NetExpr>,
        terminators: Vec<Terminator>,
        #[serde(default)]
        deterministic: bool,
        #[serde(default)]
        span: Span,
    },
    /// `body ! <tag>` or `body ! <tag:range_end>`
    Split {
        body: Box<NetExpr>,
        tag: Ident,
        #[serde(default)]
        range_end: Option<Ident>,
        #[serde(default)]
        deterministic: bool,
        #[serde(default)]
        span: Span,
    },
    /// `body \ {back patterns}`
    Feedback {
        body: Box<NetExpr>,
        back: Vec<RecordPattern>,
        #[serde(default)]
        span: Span,
    },
}

impl NetExpr {
    pub fn span(&self) -> Span {
        match self {
            NetExpr::Ref { name } => name.span,
            NetExpr::Filter { span, .. }
            | NetExpr::Sync { span, .. }
            | NetExpr::Serial { span, .. }
            | NetExpr::Choice { span, .. }
            | NetExpr::Star { span, .. }
            | NetExpr::Split { span, .. }
            | NetExpr::Feedback { span, .. } => *span,
        }
    }

    // ── Builders (synthesized trees and tests) ──

    pub fn reference(name: &str) -> Self {
        NetExpr::Ref {
            name: Ident::synthetic(name),
        }
    }

    pub fn serial(left: NetExpr, right: NetExpr) -> Self {
        NetExpr::Serial {
            left: Box::new(left),
            right: Box::new(right),
            span: Span::default(),
        }
    }

    pub fn choice(branches: Vec<NetExpr>) -> Self {
        NetExpr::Choice {
            branches: branches
                .into_iter()
                .map(|expr| Branch { guard: None, expr })
                .collect(),
            deterministic: false,
            span: Span::default(),
        }
    }

    pub fn star(body: NetExpr, terminators: Vec<RecordPattern>) -> Self {
        NetExpr::Star {
            body: Box::new(body),
            terminators: terminators
                .into_iter()
                .map(|pattern| Terminator {
                    pattern,
                    guard: None,
                })
                .collect(),
            deterministic: false,
            span: Span::default(),
        }
    }

    pub fn split(body: NetExpr, tag: &str) -> Self {
        NetExpr::Split {
            body: Box::new(body),
            tag: Ident::synthetic(tag),
            range_end: None,
            deterministic: false,
            span: Span::default(),
        }
    }

    pub fn feedback(body: NetExpr, back: Vec<RecordPattern>) -> Self {
        NetExpr::Feedback {
            body: Box::new(body),
            back,
            span: Span::default(),
        }
    }

    pub fn sync(main: RecordPattern, aux: Vec<RecordPattern>) -> Self {
        NetExpr::Sync {
            main,
            aux,
            span: Span::default(),
        }
    }

    /// The identity filter `[]`.
    pub fn identity_filter() -> Self {
        NetExpr::Filter {
            pattern: RecordPattern::default(),
            actions: Vec::new(),
            span: Span::default(),
        }
    }
}
