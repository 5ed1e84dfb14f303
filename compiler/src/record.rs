// record.rs — Record-type algebra
//
// Single record shapes (`RecordType`) and deduplicated unions of them
// (`VariantType`), with the acceptance (subtype) test, best-match scoring,
// pass-through/discard completion, and variant merging.
//
// Named values (fields and simple tags) share one namespace and one algebra;
// their kind is carried only for display and for rebuilding patterns.
// Binding tags are compared for identity and never flow implicitly.
//
// Preconditions: none.
// Postconditions: `pass ⊆ labels` on every shape; `discard ∩ labels = ∅`
//   on every completed shape.
// Failure modes: `FromStr` rejects malformed notation.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

// ── Label kinds ─────────────────────────────────────────────────────────────

/// Concrete kind of a named value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    Field,
    Tag,
}

// ── Single shape ────────────────────────────────────────────────────────────

/// The type of one concrete record: binding tags and named values, plus
/// pass-through and discard bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordType {
    btags: BTreeSet<String>,
    labels: BTreeMap<String, LabelKind>,
    pass: BTreeSet<String>,
    discard: BTreeMap<String, LabelKind>,
}

/// The part of a shape that identifies a signature input: binding tags and
/// named values, without pass/discard annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordCore {
    pub btags: BTreeSet<String>,
    pub labels: BTreeMap<String, LabelKind>,
}

impl RecordType {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Builders ──

    pub fn with_field(mut self, name: &str) -> Self {
        self.insert_label(name, LabelKind::Field);
        self
    }

    pub fn with_tag(mut self, name: &str) -> Self {
        self.insert_label(name, LabelKind::Tag);
        self
    }

    pub fn with_btag(mut self, name: &str) -> Self {
        self.insert_btag(name);
        self
    }

    /// Add a field already marked pass-through.
    pub fn with_pass_field(mut self, name: &str) -> Self {
        self.insert_label(name, LabelKind::Field);
        self.mark_pass(name);
        self
    }

    // ── Mutation ──

    pub fn insert_label(&mut self, name: &str, kind: LabelKind) {
        self.discard.remove(name);
        self.labels.insert(name.to_string(), kind);
    }

    pub fn insert_btag(&mut self, name: &str) {
        self.btags.insert(name.to_string());
    }

    pub fn remove_btag(&mut self, name: &str) -> bool {
        self.btags.remove(name)
    }

    /// Mark a present named value as pass-through. Returns false (and changes
    /// nothing) when the value is absent.
    pub fn mark_pass(&mut self, name: &str) -> bool {
        if self.labels.contains_key(name) {
            self.pass.insert(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn unmark_pass(&mut self, name: &str) {
        self.pass.remove(name);
    }

    /// Record a value as consumed. A present named value of the same name is
    /// removed.
    pub fn insert_discard(&mut self, name: &str, kind: LabelKind) {
        self.labels.remove(name);
        self.pass.remove(name);
        self.discard.insert(name.to_string(), kind);
    }

    pub fn clear_discards(&mut self) {
        self.discard.clear();
    }

    // ── Queries ──

    pub fn btags(&self) -> impl Iterator<Item = &str> {
        self.btags.iter().map(String::as_str)
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, LabelKind)> {
        self.labels.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn discards(&self) -> impl Iterator<Item = (&str, LabelKind)> {
        self.discard.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn pass(&self) -> impl Iterator<Item = &str> {
        self.pass.iter().map(String::as_str)
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn label_kind(&self, name: &str) -> Option<LabelKind> {
        self.labels.get(name).copied()
    }

    pub fn has_btag(&self, name: &str) -> bool {
        self.btags.contains(name)
    }

    pub fn is_pass(&self, name: &str) -> bool {
        self.pass.contains(name)
    }

    pub fn is_discarded(&self, name: &str) -> bool {
        self.discard.contains_key(name)
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.btags.is_empty() && self.labels.is_empty()
    }

    pub fn core(&self) -> RecordCore {
        RecordCore {
            btags: self.btags.clone(),
            labels: self.labels.clone(),
        }
    }

    /// Same binding tags, named values and discards: the identity used when
    /// merging shapes into a variant.
    pub fn same_layout(&self, other: &RecordType) -> bool {
        self.btags == other.btags && self.labels == other.labels && self.discard == other.discard
    }

    // ── Derived shapes ──

    /// Copy without pass/discard annotations.
    pub fn pattern(&self) -> RecordType {
        RecordType {
            btags: self.btags.clone(),
            labels: self.labels.clone(),
            pass: BTreeSet::new(),
            discard: BTreeMap::new(),
        }
    }

    /// Copy with every named value marked pass-through and no discards: the
    /// probe used to observe how a component propagates its input.
    pub fn all_pass(&self) -> RecordType {
        RecordType {
            btags: self.btags.clone(),
            labels: self.labels.clone(),
            pass: self.labels.keys().cloned().collect(),
            discard: BTreeMap::new(),
        }
    }

    // ── Algebra ──

    /// Subtype test: `self` is a pattern, `candidate` a record shape.
    ///
    /// Binding tags must be identical; the candidate must carry every named
    /// value of the pattern and guarantee at least its pass-through values.
    pub fn accepts(&self, candidate: &RecordType) -> bool {
        self.btags == candidate.btags
            && self.labels.keys().all(|l| candidate.labels.contains_key(l))
            && self.pass.iter().all(|l| candidate.pass.contains(l))
    }

    /// Finalize this output shape against the input it is declared for.
    ///
    /// Declared pass-through values survive only if present on the input;
    /// input pass-through values that are neither re-declared nor discarded
    /// are added as implicit pass-through; every input value missing from
    /// the result is recorded as discarded. Without an input (initializer
    /// entries) nothing flows, so pass and discard are emptied.
    pub fn complete(&mut self, input: Option<&RecordType>) {
        let Some(input) = input else {
            self.pass.clear();
            self.discard.clear();
            return;
        };

        for (name, kind) in &input.discard {
            if !self.labels.contains_key(name) {
                self.discard.insert(name.clone(), *kind);
            }
        }

        let declared: BTreeSet<String> = self
            .pass
            .iter()
            .filter(|l| input.labels.contains_key(*l))
            .cloned()
            .collect();
        let implicit: Vec<(String, LabelKind)> = input
            .labels
            .iter()
            .filter(|(name, _)| {
                input.pass.contains(*name)
                    && !self.discard.contains_key(*name)
                    && !self.labels.contains_key(*name)
            })
            .map(|(name, kind)| (name.clone(), *kind))
            .collect();

        self.pass = declared;
        for (name, kind) in implicit {
            self.pass.insert(name.clone());
            self.labels.insert(name, kind);
        }
        for (name, kind) in &input.labels {
            if !self.labels.contains_key(name) {
                self.discard.insert(name.clone(), *kind);
            }
        }
        let labels = &self.labels;
        self.discard.retain(|name, _| !labels.contains_key(name));
    }

    /// The shape actually emitted when a record of shape `input` reaches a
    /// component whose completed output declaration is `self`.
    ///
    /// Values of the input that the declaration neither re-declares nor
    /// discards flow through (flow inheritance) and keep the pass-through
    /// status they had on the input. Declared pass-through values remain so
    /// only if they were pass-through on the input. The result has no
    /// discards: it is an observable output.
    pub fn propagate(&self, input: &RecordType) -> RecordType {
        let mut out = RecordType {
            btags: self.btags.clone(),
            labels: self.labels.clone(),
            pass: self
                .pass
                .iter()
                .filter(|l| input.pass.contains(*l))
                .cloned()
                .collect(),
            discard: BTreeMap::new(),
        };
        for (name, kind) in &input.labels {
            if self.labels.contains_key(name) || self.discard.contains_key(name) {
                continue;
            }
            out.labels.insert(name.clone(), *kind);
            if input.pass.contains(name) {
                out.pass.insert(name.clone());
            }
        }
        out
    }
}

// ── Notation ────────────────────────────────────────────────────────────────
//
// `{<#b>, a, =c, <t>, -d}`: binding tags in `<#..>`, simple tags in `<..>`,
// `=` marks pass-through, `-` marks a discard.

fn write_label(f: &mut fmt::Formatter<'_>, name: &str, kind: LabelKind) -> fmt::Result {
    match kind {
        LabelKind::Field => write!(f, "{}", name),
        LabelKind::Tag => write!(f, "<{}>", name),
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if first {
                first = false;
                Ok(())
            } else {
                write!(f, ", ")
            }
        };
        for b in &self.btags {
            sep(f)?;
            write!(f, "<#{}>", b)?;
        }
        for (name, kind) in &self.labels {
            sep(f)?;
            if self.pass.contains(name) {
                write!(f, "=")?;
            }
            write_label(f, name, *kind)?;
        }
        for (name, kind) in &self.discard {
            sep(f)?;
            write!(f, "-")?;
            write_label(f, name, *kind)?;
        }
        write!(f, "}}")
    }
}

/// Malformed record-type notation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid record type '{input}': {reason}")]
pub struct ParseRecordError {
    pub input: String,
    pub reason: String,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl FromStr for RecordType {
    type Err = ParseRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ParseRecordError {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let inner = s
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| err("expected '{...}'"))?;

        let mut record = RecordType::new();
        for raw in inner.split(',') {
            let token = raw.trim();
            if token.is_empty() {
                continue;
            }
            if let Some(name) = token.strip_prefix("<#").and_then(|t| t.strip_suffix('>')) {
                if !valid_name(name) {
                    return Err(err("bad binding tag name"));
                }
                record.insert_btag(name);
                continue;
            }
            let (pass, discard, body) = if let Some(rest) = token.strip_prefix('=') {
                (true, false, rest)
            } else if let Some(rest) = token.strip_prefix('-') {
                (false, true, rest)
            } else {
                (false, false, token)
            };
            let (name, kind) = match body.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
                Some(tag) => (tag, LabelKind::Tag),
                None => (body, LabelKind::Field),
            };
            if !valid_name(name) {
                return Err(err("bad label name"));
            }
            if discard {
                record.insert_discard(name, kind);
            } else {
                record.insert_label(name, kind);
                if pass {
                    record.mark_pass(name);
                }
            }
        }
        Ok(record)
    }
}

// ── Variant shape ───────────────────────────────────────────────────────────

/// A deduplicated union of record shapes.
///
/// Shapes are kept sorted so equality is set equality and rendering is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VariantType {
    shapes: Vec<RecordType>,
}

impl VariantType {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(shape: RecordType) -> Self {
        VariantType {
            shapes: vec![shape],
        }
    }

    /// Insert a shape, merging with a same-layout shape by intersecting
    /// their pass-through sets. Returns whether the variant changed.
    pub fn insert(&mut self, shape: RecordType) -> bool {
        if let Some(existing) = self.shapes.iter_mut().find(|s| s.same_layout(&shape)) {
            let before = existing.pass.len();
            existing.pass.retain(|l| shape.pass.contains(l));
            if existing.pass.len() == before {
                return false;
            }
            self.shapes.sort();
            return true;
        }
        let at = self.shapes.binary_search(&shape).unwrap_or_else(|i| i);
        self.shapes.insert(at, shape);
        true
    }

    /// Union of two variants under the merge rule.
    pub fn combine(mut self, other: VariantType) -> VariantType {
        for shape in other.shapes {
            self.insert(shape);
        }
        self
    }

    /// Merge `other` into `self`; returns whether anything changed.
    pub fn absorb(&mut self, other: &VariantType) -> bool {
        let mut changed = false;
        for shape in &other.shapes {
            changed |= self.insert(shape.clone());
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecordType> {
        self.shapes.iter()
    }

    /// Highest named-value count among the shapes accepting `candidate`.
    pub fn best_score(&self, candidate: &RecordType) -> Option<usize> {
        self.shapes
            .iter()
            .filter(|p| p.accepts(candidate))
            .map(RecordType::label_count)
            .max()
    }

    /// All accepting shapes that reach the best score. Ties are all
    /// returned: every tied pattern is considered reachable.
    pub fn best_matches(&self, candidate: &RecordType) -> Vec<&RecordType> {
        match self.best_score(candidate) {
            Some(best) => self
                .shapes
                .iter()
                .filter(|p| p.label_count() == best && p.accepts(candidate))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn accepts(&self, candidate: &RecordType) -> bool {
        self.shapes.iter().any(|p| p.accepts(candidate))
    }

    /// Map every shape through `f`, re-merging the results.
    pub fn map(&self, f: impl Fn(&RecordType) -> RecordType) -> VariantType {
        self.shapes.iter().map(f).collect()
    }
}

impl FromIterator<RecordType> for VariantType {
    fn from_iter<I: IntoIterator<Item = RecordType>>(iter: I) -> Self {
        let mut variant = VariantType::new();
        for shape in iter {
            variant.insert(shape);
        }
        variant
    }
}

impl IntoIterator for VariantType {
    type Item = RecordType;
    type IntoIter = std::vec::IntoIter<RecordType>;

    fn into_iter(self) -> Self::IntoIter {
        self.shapes.into_iter()
    }
}

impl<'a> IntoIterator for &'a VariantType {
    type Item = &'a RecordType;
    type IntoIter = std::slice::Iter<'a, RecordType>;

    fn into_iter(self) -> Self::IntoIter {
        self.shapes.iter()
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shapes.is_empty() {
            return write!(f, "none");
        }
        for (i, shape) in self.shapes.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", shape)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
