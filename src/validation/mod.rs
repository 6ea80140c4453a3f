//! Verification of agent output against repository data.

pub mod evidence;

pub use evidence::{validate as validate_evidence, EvidenceReport};
