// pipeline.rs — Compilation state and pass orchestration
//
// Holds every pass artifact and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: `state.program` is set (usually via `from_json`).
// Postconditions: artifacts for all required passes are populated, or
//   `error_count` is non-zero and the runner stopped after the failing pass.
// Failure modes: any pass emitting error-level diagnostics; a fatal
//   `InferError` is recorded as a diagnostic of the routing pass.
// Side effects: calls on_pass_complete after each pass; prints timings to
//   stderr when verbose.

use std::time::{Duration, Instant};

use crate::annotate::Annotations;
use crate::ast::{Ident, Program};
use crate::diag::{error_count, Diagnostic};
use crate::infer::InferOptions;
use crate::pass::{required_passes, ArtifactId, PassId};
use crate::resolve::NetTable;
use crate::route::RouteResult;
use crate::signature::Signature;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `source_hash`: SHA-256 of the raw JSON text the program was read from.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "compiler_version": self.compiler_version,
        });
        let mut out = serde_json::to_string_pretty(&value).unwrap_or_default();
        out.push('\n');
        out
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&hasher.finalize());

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Runner configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub infer: InferOptions,
    /// Print per-pass timings to stderr.
    pub verbose: bool,
}

/// All compilation artifacts and accumulated diagnostics.
#[derive(Debug)]
pub struct CompilationState {
    pub program: Program,
    pub table: Option<NetTable>,
    /// Signatures and the expression side table; completed in place by type
    /// checking.
    pub routed: Option<RouteResult>,
    pub checked: bool,
    pub annotations: Option<Annotations>,
    pub diagnostics: Vec<Diagnostic>,
    pub error_count: usize,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            table: None,
            routed: None,
            checked: false,
            annotations: None,
            diagnostics: Vec::new(),
            error_count: 0,
            provenance: None,
        }
    }

    /// Read a program from its JSON form and record provenance.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        let program: Program = serde_json::from_str(source)?;
        let mut state = Self::new(program);
        state.provenance = Some(compute_provenance(source));
        Ok(state)
    }

    /// Designate the top-level network, overriding the program's choice.
    pub fn set_top(&mut self, name: &str) {
        self.program.top = Some(Ident::synthetic(name));
    }

    /// Finalized signature of a definition by qualified path.
    pub fn signature(&self, path: &str) -> Option<&Signature> {
        let id = self.table.as_ref()?.lookup_path(path)?;
        self.routed.as_ref()?.sigs.get(&id)
    }

    /// Signature of the top-level network.
    pub fn top_signature(&self) -> Option<&Signature> {
        let id = self.table.as_ref()?.top()?;
        self.routed.as_ref()?.sigs.get(&id)
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution stopped. The diagnostics are in
/// `CompilationState::diagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("{pass} reported {errors} error(s)", pass = .failing_pass.name())]
    Failed { failing_pass: PassId, errors: usize },
    #[error("{pass} ran without its {artifact:?} input", pass = .pass.name())]
    MissingArtifact { pass: PassId, artifact: ArtifactId },
}

impl PipelineError {
    pub fn failing_pass(&self) -> PassId {
        match self {
            PipelineError::Failed { failing_pass, .. } => *failing_pass,
            PipelineError::MissingArtifact { pass, .. } => *pass,
        }
    }
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let errors = error_count(&diags);
    state.diagnostics.extend(diags);
    tracing::debug!(
        pass = pass_id.name(),
        errors,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass finished"
    );
    if verbose {
        eprintln!(
            "snetc: {} complete, {:.1}ms",
            pass_id.name(),
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if errors > 0 {
        state.error_count += errors;
        return Err(PipelineError::Failed {
            failing_pass: pass_id,
            errors,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = run_pass(state, pass_id, options)?;
        finish_pass(
            state,
            pass_id,
            diags,
            t.elapsed(),
            options.verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

fn run_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    options: &PipelineOptions,
) -> Result<Vec<Diagnostic>, PipelineError> {
    let missing = |artifact| PipelineError::MissingArtifact {
        pass: pass_id,
        artifact,
    };

    match pass_id {
        PassId::Resolve => {
            let result = crate::resolve::resolve(&state.program);
            state.table = Some(result.table);
            Ok(result.diagnostics)
        }
        PassId::Route => {
            let table = state.table.as_ref().ok_or(missing(ArtifactId::Table))?;
            match crate::route::route(table, options.infer) {
                Ok(mut routed) => {
                    let diags = std::mem::take(&mut routed.diagnostics);
                    state.routed = Some(routed);
                    Ok(diags)
                }
                Err(err) => {
                    tracing::debug!(error = %err, "routing aborted");
                    Ok(vec![err.to_diagnostic()])
                }
            }
        }
        PassId::TypeCheck => {
            let table = state.table.as_ref().ok_or(missing(ArtifactId::Table))?;
            let routed = state
                .routed
                .as_mut()
                .ok_or(missing(ArtifactId::Signatures))?;
            match crate::typecheck::type_check(table, &mut routed.sigs, &routed.expr_sigs) {
                Ok(result) => {
                    state.checked = true;
                    Ok(result.diagnostics)
                }
                Err(err) => Ok(vec![err.to_diagnostic()]),
            }
        }
        PassId::Annotate => {
            let table = state.table.as_ref().ok_or(missing(ArtifactId::Table))?;
            let routed = state
                .routed
                .as_ref()
                .ok_or(missing(ArtifactId::Signatures))?;
            if !state.checked {
                return Err(missing(ArtifactId::Checked));
            }
            state.annotations = Some(crate::annotate::annotate(table, &routed.sigs));
            Ok(Vec::new())
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_A: &str = r#"{
      "boxes": [
        {"name": {"name": "A"}, "sig": {"mappings": [
          {"input": {"entries": [{"name": {"name": "a"}, "kind": "field"}]},
           "outputs": [{"entries": [
             {"name": {"name": "a"}, "kind": "field", "qualifier": "pass"},
             {"name": {"name": "b"}, "kind": "field"}]}]}]}},
        {"name": {"name": "B"}, "sig": {"mappings": [
          {"input": {"entries": [{"name": {"name": "b"}, "kind": "field"}]},
           "outputs": [{"entries": [{"name": {"name": "c"}, "kind": "field"}]}]}]}}
      ],
      "nets": [
        {"name": {"name": "main"},
         "body": {"kind": "serial",
                  "left": {"kind": "ref", "name": {"name": "A"}},
                  "right": {"kind": "ref", "name": {"name": "B"}}}}
      ]
    }"#;

    #[test]
    fn full_pipeline_produces_annotations() {
        let mut state = CompilationState::from_json(SCENARIO_A).unwrap();
        let mut seen = Vec::new();
        run_pipeline(
            &mut state,
            PassId::Annotate,
            &PipelineOptions::default(),
            |pass, _| seen.push(pass),
        )
        .unwrap();
        assert_eq!(seen, crate::pass::ALL_PASSES.to_vec());
        assert_eq!(state.error_count, 0);
        assert_eq!(state.top_signature().unwrap().to_string(), "{a} -> {=a, c}");
        assert_eq!(state.annotations.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn resolve_errors_stop_the_runner() {
        let source = r#"{"nets": [{"name": {"name": "main"},
            "body": {"kind": "ref", "name": {"name": "Missing"}}}]}"#;
        let mut state = CompilationState::from_json(source).unwrap();
        let err = run_pipeline(&mut state, PassId::Annotate, &PipelineOptions::default(), |_, _| {})
            .unwrap_err();
        assert_eq!(err.failing_pass(), PassId::Resolve);
        assert_eq!(state.error_count, 1);
        assert!(state.routed.is_none());
    }

    #[test]
    fn provenance_is_stable() {
        let a = compute_provenance("{}");
        let b = compute_provenance("{}");
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert!(a.to_json().contains("\"compiler_version\""));
    }

    #[test]
    fn top_override_selects_network() {
        let mut state = CompilationState::from_json(SCENARIO_A).unwrap();
        state.set_top("A");
        let err = run_pipeline(&mut state, PassId::Route, &PipelineOptions::default(), |_, _| {})
            .unwrap_err();
        assert_eq!(err.failing_pass(), PassId::Resolve);
    }
}
