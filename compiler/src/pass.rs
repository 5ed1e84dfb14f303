// pass.rs — Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the engine's four passes, their dependency edges and the
// artifacts they produce. The pipeline runner uses this to compute the
// minimal pass subset for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each pass. Reading the AST happens before the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    Route,
    TypeCheck,
    Annotate,
}

/// Each maps to a field of the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Table,       // NetTable
    Signatures,  // per-definition signatures
    ExprSigs,    // per-expression signature side table
    Checked,     // completed per-definition signatures
    Annotations, // Annotations
}

impl PassId {
    pub fn name(self) -> &'static str {
        descriptor(self).name
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Name used in verbose output and tracing.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Postconditions (documentation only).
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Table],
            invalidation_key: "source",
            invariants: "all names resolved, top-level network selected",
        },
        PassId::Route => PassDescriptor {
            name: "route",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Signatures, ArtifactId::ExprSigs],
            invalidation_key: "table + infer options",
            invariants: "every definition has exactly one cached signature",
        },
        PassId::TypeCheck => PassDescriptor {
            name: "typecheck",
            inputs: &[PassId::Route],
            outputs: &[ArtifactId::Checked],
            invalidation_key: "table + signatures + expr sigs",
            invariants: "observed outputs agree with signed declarations",
        },
        PassId::Annotate => PassDescriptor {
            name: "annotate",
            inputs: &[PassId::TypeCheck],
            outputs: &[ArtifactId::Annotations],
            invalidation_key: "table + checked signatures",
            invariants: "one regenerated declaration per signed-or-inferred definition",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Resolve,
    PassId::Route,
    PassId::TypeCheck,
    PassId::Annotate,
];

/// Minimal ordered set of passes needed to produce `terminal`, in execution
/// order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
