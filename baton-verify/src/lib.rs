//! BATON Verify - Claimed vs Actual Completion
//!
//! Maps task identifiers to verification probes, executes them under a
//! hard timeout, and records discrepancies between claimed and verified
//! status. Every discrepancy automatically becomes a `mistake` lesson
//! whose prevention rule references the probe.

mod probe;
mod verifier;

pub use probe::{Probe, ProbeOutcome, ProbeRegistry};
pub use verifier::{BatchReport, Verifier};
