//! Inlining decision trace
//!
//! An append-only list of decisions, one record per call site considered.
//! Records form a tree through `parent`: a decision made on a call that came
//! from an inlined body points at the record that inlined that body.

use super::error::BailoutReason;
use crate::ir::{CallId, FunctionId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceOutcome {
    /// Callee body spliced in; `instructions` is its measured size
    Inlined { instructions: u32 },
    /// Replaced by a fixed instruction template
    Recognized,
    /// Polymorphic variant dispatched to a body inlined for an earlier variant
    SharedBody,
    Rejected(BailoutReason),
}

impl TraceOutcome {
    pub fn is_inlined(&self) -> bool {
        matches!(self, TraceOutcome::Inlined { .. } | TraceOutcome::Recognized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Record of the inlining that produced the call, if any
    pub parent: Option<usize>,
    pub depth: u32,
    pub call_id: CallId,
    /// Unknown for closure calls whose target cannot be resolved
    pub callee: Option<FunctionId>,
    pub callee_name: String,
    pub outcome: TraceOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InliningTrace {
    records: Vec<TraceRecord>,
}

impl InliningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its index
    pub fn record(&mut self, record: TraceRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&TraceRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record from `len` on (used when a depth iteration is rolled back)
    pub fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Overwrite the outcome of an earlier record
    pub(crate) fn set_outcome(&mut self, index: usize, outcome: TraceOutcome) {
        if let Some(record) = self.records.get_mut(index) {
            record.outcome = outcome;
        }
    }

    pub fn inlined_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_inlined()).count()
    }

    pub fn rejected_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, TraceOutcome::Rejected(_)))
            .count()
    }

    /// Rejection reasons recorded for calls to `callee`
    pub fn rejections_of(&self, callee: FunctionId) -> Vec<&BailoutReason> {
        self.records
            .iter()
            .filter(|r| r.callee == Some(callee))
            .filter_map(|r| match &r.outcome {
                TraceOutcome::Rejected(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn children(&self, parent: Option<usize>) -> impl Iterator<Item = (usize, &TraceRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.parent == parent)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.records)
    }

    fn write_subtree(&self, f: &mut fmt::Formatter<'_>, parent: Option<usize>, indent: usize) -> fmt::Result {
        for (index, record) in self.children(parent) {
            write!(
                f,
                "{:width$}[{}] {} -> {}: ",
                "",
                record.depth,
                record.call_id,
                record.callee_name,
                width = indent * 2
            )?;
            match &record.outcome {
                TraceOutcome::Inlined { instructions } => {
                    writeln!(f, "inlined ({} instructions)", instructions)?
                }
                TraceOutcome::Recognized => writeln!(f, "recognized")?,
                TraceOutcome::SharedBody => writeln!(f, "shared body")?,
                TraceOutcome::Rejected(reason) => writeln!(f, "rejected ({})", reason)?,
            }
            self.write_subtree(f, Some(index), indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for InliningTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_subtree(f, None, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(parent: Option<usize>, depth: u32, name: &str, outcome: TraceOutcome) -> TraceRecord {
        TraceRecord {
            parent,
            depth,
            call_id: CallId(depth),
            callee: Some(FunctionId(depth)),
            callee_name: name.to_string(),
            outcome,
        }
    }

    #[test]
    fn test_tree_rendering() {
        let mut trace = InliningTrace::new();
        let root = trace.record(record(None, 1, "outer", TraceOutcome::Inlined { instructions: 4 }));
        trace.record(record(
            Some(root),
            2,
            "inner",
            TraceOutcome::Rejected(BailoutReason::NeverInlinePragma),
        ));
        trace.record(record(None, 1, "len", TraceOutcome::Recognized));

        let text = trace.to_string();
        assert_eq!(
            text,
            "[1] call1 -> outer: inlined (4 instructions)\n\
             \x20 [2] call2 -> inner: rejected (never-inline pragma)\n\
             [1] call1 -> len: recognized\n"
        );
        assert_eq!(trace.inlined_count(), 2);
        assert_eq!(trace.rejected_count(), 1);
    }

    #[test]
    fn test_json_export() {
        let mut trace = InliningTrace::new();
        trace.record(record(None, 1, "f", TraceOutcome::Rejected(BailoutReason::TooDeep { depth: 7 })));
        let json = trace.to_json().unwrap();
        assert!(json.contains("\"callee_name\": \"f\""));
        assert!(json.contains("TooDeep"));
    }
}
