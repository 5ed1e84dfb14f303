// annotate.rs — Regenerated type annotations
//
// Turns finalized signatures back into syntactic `TypeSigDecl` trees, one
// per box and network, for re-serialization and for later compiler stages.
//
// Preconditions: signatures come from routing and type checking.
// Postconditions: `signature_from_decl(decl_from_signature(s)) == s` for any
//   signature `s` whose entries were built by completion.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::ast::{EntryKind, Ident, PatternEntry, Qualifier, RecordPattern, TypeMapping, TypeSigDecl};
use crate::id::DefId;
use crate::record::{LabelKind, RecordType};
use crate::resolve::{DefKind, NetTable};
use crate::signature::Signature;

/// One annotated definition.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedDef {
    /// Qualified name (`outer.inner`).
    pub path: String,
    pub kind: &'static str,
    pub decl: TypeSigDecl,
    pub signature: Signature,
}

/// Annotated definitions in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Annotations {
    pub defs: Vec<AnnotatedDef>,
}

impl Annotations {
    pub fn get(&self, path: &str) -> Option<&AnnotatedDef> {
        self.defs.iter().find(|d| d.path == path)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl fmt::Display for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, def) in self.defs.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{} {}", def.kind, def.path)?;
            let rendered = def.signature.to_string();
            for line in rendered.lines() {
                write!(f, "\n  {}", line)?;
            }
        }
        Ok(())
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Annotate every definition that has a signature.
pub fn annotate(table: &NetTable, sigs: &HashMap<DefId, Signature>) -> Annotations {
    let defs = table
        .defs()
        .filter_map(|def| {
            let sig = sigs.get(&def.id)?;
            let kind = match def.kind {
                DefKind::Box(_) => "box",
                DefKind::Net(_) => "net",
            };
            Some(AnnotatedDef {
                path: def.path(table),
                kind,
                decl: decl_from_signature(sig),
                signature: sig.clone(),
            })
        })
        .collect();
    let annotations = Annotations { defs };
    tracing::debug!(defs = annotations.len(), "annotations regenerated");
    annotations
}

/// Syntactic declaration equivalent to `sig`.
pub fn decl_from_signature(sig: &Signature) -> TypeSigDecl {
    let mappings = sig
        .entries()
        .map(|entry| TypeMapping {
            input: entry.input.as_ref().map(pattern_from_record),
            outputs: (!entry.incomplete)
                .then(|| entry.outputs.iter().map(pattern_from_record).collect()),
            span: Default::default(),
        })
        .collect();
    TypeSigDecl {
        mappings,
        span: Default::default(),
    }
}

/// Record pattern for one shape, keeping pass and discard qualifiers.
pub fn pattern_from_record(record: &RecordType) -> RecordPattern {
    let entry = |name: &str, kind: EntryKind, qualifier: Qualifier| PatternEntry {
        name: Ident::synthetic(name),
        kind,
        qualifier,
    };
    let entry_kind = |kind: LabelKind| match kind {
        LabelKind::Field => EntryKind::Field,
        LabelKind::Tag => EntryKind::Tag,
    };

    let mut entries: Vec<PatternEntry> = record
        .btags()
        .map(|b| entry(b, EntryKind::BindingTag, Qualifier::Plain))
        .collect();
    for (name, kind) in record.labels() {
        let qualifier = if record.is_pass(name) {
            Qualifier::Pass
        } else {
            Qualifier::Plain
        };
        entries.push(entry(name, entry_kind(kind), qualifier));
    }
    for (name, kind) in record.discards() {
        entries.push(entry(name, entry_kind(kind), Qualifier::Discard));
    }
    RecordPattern {
        entries,
        span: Default::default(),
    }
}
