//! Transform markers.
//!
//! A marker is a string tag attached to an op after a rewrite produced it. Patterns filter
//! on markers so a fixpoint driver does not keep re-applying a rewrite to its own output.
//! Markers live in a side table keyed by op identity and are never part of the op itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bon::bon;
use smallvec::SmallVec;
use tessera_ir::{OpId, StructuredOp};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker(Arc<str>);

impl Marker {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Marker {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set-once marker side table.
#[derive(Debug, Clone, Default)]
pub struct MarkerTable {
    markers: HashMap<OpId, Marker>,
}

impl MarkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, op: OpId) -> Option<&Marker> {
        self.markers.get(&op)
    }

    /// Attach `marker` to `op`. An op keeps the first marker it receives; returns whether
    /// this call attached it.
    pub fn mark(&mut self, op: OpId, marker: Marker) -> bool {
        match self.markers.entry(op) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(marker);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Which ops a pattern applies to, and how its results are marked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerFilter {
    /// Markers an op must carry to match. Empty matches unmarked ops only.
    pub matches: SmallVec<[Marker; 2]>,
    /// Marker attached to the ops a rewrite produces.
    pub replacement: Option<Marker>,
}

#[bon]
impl MarkerFilter {
    #[builder]
    pub fn builder(
        #[builder(default, into)] matches: SmallVec<[Marker; 2]>,
        #[builder(into)] replacement: Option<Marker>,
    ) -> Self {
        Self { matches, replacement }
    }

    /// Match unmarked ops, mark results with `replacement`.
    pub fn unmarked(replacement: impl Into<Marker>) -> Self {
        Self { matches: SmallVec::new(), replacement: Some(replacement.into()) }
    }

    /// Match ops marked `from`, re-mark results with `to`.
    pub fn chain(from: impl Into<Marker>, to: impl Into<Marker>) -> Self {
        Self { matches: SmallVec::from_iter([from.into()]), replacement: Some(to.into()) }
    }

    pub fn accepts(&self, table: &MarkerTable, op: &StructuredOp) -> bool {
        match table.get(op.id()) {
            None => self.matches.is_empty(),
            Some(marker) => self.matches.contains(marker),
        }
    }
}
