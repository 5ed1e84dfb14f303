// signature.rs — Normalised type signatures
//
// A signature maps an accepted input shape (or the initializer key) to the
// variant of shapes the component can produce for it. Entries are keyed by
// the input's core, so declarations that require the same values collide
// and must agree on their pass/discard annotations and completeness.
//
// Preconditions: none.
// Postconditions: every output of a complete entry is completed against the
//   entry's input; initializer outputs carry no pass/discard bookkeeping.
// Failure modes: conflicting declarations for one input (`SignatureConflict`);
//   malformed notation (`ParseSignatureError`).
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::record::{ParseRecordError, RecordCore, RecordType, VariantType};

// ── Keys and entries ────────────────────────────────────────────────────────

/// Signature key: the initializer (no input record yet) or an input core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputKey {
    Init,
    Record(RecordCore),
}

/// One `input -> outputs` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigEntry {
    /// `None` for the initializer entry.
    pub input: Option<RecordType>,
    pub outputs: VariantType,
    /// Outputs not determined yet.
    pub incomplete: bool,
}

impl SigEntry {
    pub fn key(&self) -> InputKey {
        match &self.input {
            None => InputKey::Init,
            Some(input) => InputKey::Record(input.core()),
        }
    }

    pub fn is_init(&self) -> bool {
        self.input.is_none()
    }

    /// Does this entry's input pattern accept `candidate`? Initializer
    /// entries accept nothing.
    pub fn accepts(&self, candidate: &RecordType) -> bool {
        self.input
            .as_ref()
            .is_some_and(|input| input.pattern().accepts(candidate))
    }

    fn score(&self) -> usize {
        self.input.as_ref().map_or(0, RecordType::label_count)
    }
}

/// Two declarations for the same input disagree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureConflict {
    #[error("input {input} is declared both with and without outputs")]
    Completeness { input: String },
    #[error("input {input} is declared with different pass-through or discard annotations")]
    Annotations { input: String },
}

/// Result of sending one shape through a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// No entry accepts the shape.
    Rejected,
    /// A best-matching entry has no outputs yet.
    Incomplete,
    Outputs(VariantType),
}

// ── Signature ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    entries: BTreeMap<InputKey, SigEntry>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. `outputs == None` adds an incomplete entry. Outputs are
    /// completed against `input` before they are stored; a second
    /// declaration for the same input merges its outputs into the first.
    pub fn insert(
        &mut self,
        input: Option<RecordType>,
        outputs: Option<VariantType>,
    ) -> Result<(), SignatureConflict> {
        let key = match &input {
            None => InputKey::Init,
            Some(record) => InputKey::Record(record.core()),
        };
        let incomplete = outputs.is_none();
        let outputs = outputs
            .map(|variant| {
                variant.map(|shape| {
                    let mut shape = shape.clone();
                    shape.complete(input.as_ref());
                    shape
                })
            })
            .unwrap_or_default();

        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(
                    key,
                    SigEntry {
                        input,
                        outputs,
                        incomplete,
                    },
                );
                Ok(())
            }
            Some(existing) => {
                let shown = || describe_input(input.as_ref());
                if existing.incomplete != incomplete {
                    return Err(SignatureConflict::Completeness { input: shown() });
                }
                if existing.input != input {
                    return Err(SignatureConflict::Annotations { input: shown() });
                }
                existing.outputs.absorb(&outputs);
                Ok(())
            }
        }
    }

    /// Merge all entries of `other` into `self`, collecting conflicts.
    /// Conflicting entries of `other` are dropped.
    pub fn merge(&mut self, other: Signature) -> Vec<SignatureConflict> {
        let mut conflicts = Vec::new();
        for (_, entry) in other.entries {
            let outputs = if entry.incomplete {
                None
            } else {
                Some(entry.outputs)
            };
            if let Err(conflict) = self.insert(entry.input, outputs) {
                conflicts.push(conflict);
            }
        }
        conflicts
    }

    // ── Queries ──

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SigEntry> {
        self.entries.values()
    }

    pub fn get(&self, key: &InputKey) -> Option<&SigEntry> {
        self.entries.get(key)
    }

    pub fn record_entries(&self) -> impl Iterator<Item = &SigEntry> {
        self.entries.values().filter(|e| !e.is_init())
    }

    pub fn init_entry(&self) -> Option<&SigEntry> {
        self.entries.get(&InputKey::Init)
    }

    /// Produces records only as an initializer; accepts no input.
    pub fn is_init_only(&self) -> bool {
        self.init_entry().is_some() && self.record_entries().next().is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.values().all(|e| !e.incomplete)
    }

    /// Accepted input patterns.
    pub fn input_variant(&self) -> VariantType {
        self.record_entries()
            .filter_map(|e| e.input.as_ref().map(RecordType::pattern))
            .collect()
    }

    /// Every shape the component may emit, initializer outputs included.
    pub fn output_variant(&self) -> VariantType {
        let mut out = VariantType::new();
        for entry in self.entries.values() {
            for shape in &entry.outputs {
                let mut shape = shape.clone();
                shape.clear_discards();
                out.insert(shape);
            }
        }
        out
    }

    /// Record entries whose input best matches `candidate`. Ties are all
    /// returned.
    pub fn matching(&self, candidate: &RecordType) -> Vec<&SigEntry> {
        let accepting: Vec<&SigEntry> = self
            .record_entries()
            .filter(|e| e.accepts(candidate))
            .collect();
        let Some(best) = accepting.iter().map(|e| e.score()).max() else {
            return Vec::new();
        };
        accepting
            .into_iter()
            .filter(|e| e.score() == best)
            .collect()
    }

    /// Highest input named-value count among entries accepting `candidate`.
    pub fn best_score(&self, candidate: &RecordType) -> Option<usize> {
        self.record_entries()
            .filter(|e| e.accepts(candidate))
            .map(|e| e.score())
            .max()
    }

    /// Send a record of shape `candidate` through the signature.
    pub fn feed(&self, candidate: &RecordType) -> Feed {
        let matches = self.matching(candidate);
        if matches.is_empty() {
            return Feed::Rejected;
        }
        if matches.iter().any(|e| e.incomplete) {
            return Feed::Incomplete;
        }
        let mut out = VariantType::new();
        for entry in matches {
            for shape in &entry.outputs {
                out.insert(shape.propagate(candidate));
            }
        }
        Feed::Outputs(out)
    }

    /// Initializer outputs; empty when there is no initializer entry.
    pub fn feed_init(&self) -> Feed {
        match self.init_entry() {
            None => Feed::Outputs(VariantType::new()),
            Some(entry) if entry.incomplete => Feed::Incomplete,
            Some(entry) => Feed::Outputs(entry.outputs.clone()),
        }
    }

    // ── Transformations ──

    /// Narrow the signature to the inputs a context can deliver.
    ///
    /// Entries whose input is at least as specific as some allowed shape are
    /// kept. Entries more general than an allowed shape are re-derived for
    /// that shape. Entries unrelated to every allowed shape are dropped.
    /// The initializer entry is always kept.
    pub fn restrict(&self, allowed: &VariantType) -> Signature {
        let mut out = Signature::new();
        let mut narrowed = Vec::new();
        for entry in self.entries.values() {
            let Some(input) = &entry.input else {
                out.entries.insert(InputKey::Init, entry.clone());
                continue;
            };
            let pattern = input.pattern();
            if allowed.iter().any(|v| v.pattern().accepts(&pattern)) {
                out.entries.insert(entry.key(), entry.clone());
                continue;
            }
            for v in allowed.iter().filter(|v| pattern.accepts(&v.pattern())) {
                narrowed.push(v.pattern());
            }
        }
        for input in narrowed {
            let key = InputKey::Record(input.core());
            if out.entries.contains_key(&key) {
                continue;
            }
            let outputs = match self.feed(&input.all_pass()) {
                Feed::Outputs(outputs) => Some(outputs),
                Feed::Incomplete => None,
                Feed::Rejected => continue,
            };
            let inserted = out.insert(Some(input), outputs);
            debug_assert!(inserted.is_ok(), "narrowed entry for a fresh key conflicts");
        }
        out
    }

    /// Fill in the outputs of an incomplete entry.
    pub fn complete_entry(&mut self, key: &InputKey, outputs: VariantType) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if !entry.incomplete {
            return false;
        }
        let input = entry.input.clone();
        entry.outputs = outputs.map(|shape| {
            let mut shape = shape.clone();
            shape.complete(input.as_ref());
            shape
        });
        entry.incomplete = false;
        true
    }

    /// Apply `f` to every output shape, re-merging per entry.
    pub fn map_outputs(&self, f: impl Fn(&RecordType) -> RecordType) -> Signature {
        let mut out = Signature::new();
        for (key, entry) in &self.entries {
            out.entries.insert(
                key.clone(),
                SigEntry {
                    input: entry.input.clone(),
                    outputs: entry.outputs.map(&f),
                    incomplete: entry.incomplete,
                },
            );
        }
        out
    }
}

fn describe_input(input: Option<&RecordType>) -> String {
    match input {
        None => "init".to_string(),
        Some(record) => record.to_string(),
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

// ── Notation ────────────────────────────────────────────────────────────────
//
// One entry per line (or `;`-separated): `{a} -> {=a, b} | {c}`,
// `init -> {x}`, `{d} -> ?` (incomplete), `{e} -> none` (no outputs).

impl fmt::Display for SigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> ", describe_input(self.input.as_ref()))?;
        if self.incomplete {
            write!(f, "?")
        } else {
            write!(f, "{}", self.outputs)
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseSignatureError {
    #[error("entry '{0}' is missing '->'")]
    MissingArrow(String),
    #[error(transparent)]
    Record(#[from] ParseRecordError),
    #[error(transparent)]
    Conflict(#[from] SignatureConflict),
}

impl FromStr for Signature {
    type Err = ParseSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut sig = Signature::new();
        for line in s.split(['\n', ';']) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (lhs, rhs) = line
                .split_once("->")
                .ok_or_else(|| ParseSignatureError::MissingArrow(line.to_string()))?;
            let lhs = lhs.trim();
            let input = if lhs == "init" {
                None
            } else {
                Some(lhs.parse::<RecordType>()?)
            };
            let rhs = rhs.trim();
            let outputs = match rhs {
                "?" => None,
                "none" => Some(VariantType::new()),
                _ => Some(
                    rhs.split('|')
                        .map(|shape| shape.parse::<RecordType>())
                        .collect::<Result<VariantType, _>>()?,
                ),
            };
            sig.insert(input, outputs)?;
        }
        Ok(sig)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
