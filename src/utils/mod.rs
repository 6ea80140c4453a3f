//! Shared utility functions for hack-judge.
//!
//! Currently this is JSON extraction from free-form model output, used by
//! the agent response parser.

pub mod json_extraction;

pub use json_extraction::{extract_json_object, find_matching_brace, JsonExtraction};
