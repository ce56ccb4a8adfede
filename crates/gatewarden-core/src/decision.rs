//! Hierarchical, weighted failure reports.
//!
//! A [`Decision`] records every boundary violation found while screening one
//! schema node and its children. Decisions are built bottom-up through a
//! [`DecisionBuilder`]: leaves append weighted reasons, composite nodes attach
//! their children's sub-decisions under the child's name. A builder that saw
//! nothing to report builds to `None`, so "no anomaly" never allocates a tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An immutable report of one or more boundary violations.
///
/// `children` is a `BTreeMap` so rendering is deterministic regardless of the
/// iteration order of any dedup index used while screening.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Accumulated severity of this node and every node below it.
    pub weight: u32,
    /// Violations reported directly at this node.
    pub reasons: Vec<String>,
    /// Sub-decisions of named children, keyed by child name.
    pub children: BTreeMap<String, Decision>,
}

impl Decision {
    /// Merge another report into this one, combining children by name.
    ///
    /// Used when screenings of the same exchange at different phases each
    /// produce a report and the session keeps one accumulated alert.
    pub fn absorb(&mut self, other: Decision) {
        self.weight += other.weight;
        self.reasons.extend(other.reasons);
        for (name, child) in other.children {
            match self.children.get_mut(&name) {
                Some(existing) => existing.absorb(child),
                None => {
                    self.children.insert(name, child);
                }
            }
        }
    }

    /// Render the full tree as sorted, operator-facing text.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, "");
        out
    }

    fn render(&self, out: &mut String, indent: &str) {
        for reason in &self.reasons {
            out.push_str(indent);
            out.push_str(reason);
            out.push('\n');
        }
        for (name, child) in &self.children {
            out.push_str(indent);
            out.push_str(name);
            out.push_str(":\n");
            child.render(out, &format!("{indent}  "));
        }
    }
}

/// Bottom-up accumulator for [`Decision`] trees.
///
/// Both primitives are no-ops when there is nothing to report, so callers can
/// drive screening unconditionally and let `build` collapse clean paths.
#[derive(Debug, Default)]
pub struct DecisionBuilder {
    inner: Decision,
}

impl DecisionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf reason with the given severity weight.
    pub fn reason(&mut self, weight: u32, text: impl Into<String>) {
        self.inner.weight += weight;
        self.inner.reasons.push(text.into());
    }

    /// Attach a named child's sub-decision. A `None` child is a no-op.
    pub fn child(&mut self, name: &str, decision: Option<Decision>) {
        if let Some(decision) = decision {
            self.inner.weight += decision.weight;
            self.inner.children.insert(name.to_string(), decision);
        }
    }

    /// True if nothing has been reported yet.
    pub fn is_empty(&self) -> bool {
        self.inner.reasons.is_empty() && self.inner.children.is_empty()
    }

    /// Collapse into a Decision, or `None` when nothing was reported.
    pub fn build(self) -> Option<Decision> {
        if self.inner.reasons.is_empty() && self.inner.children.is_empty() {
            None
        } else {
            Some(self.inner)
        }
    }
}
