//! Agent response schemas and the strict parse boundary.
//!
//! Every agent answers with the same envelope (`prompt_version`, `summary`,
//! `scores`, `evidence`) plus a few fields of its own. Raw model text is
//! turned into an [`AgentResponse`] by [`parse_agent_response`], which either
//! returns a fully typed value or the complete list of field problems. Code
//! downstream of this module never inspects untyped JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identity::AgentIdentity;
use crate::utils::json_extraction::{extract_json_object, JsonExtraction};

/// Inclusive upper bound of every category score.
pub const MAX_SCORE: f64 = 100.0;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    const WIRE_VALUES: [&'static str; 4] = ["low", "medium", "high", "critical"];
}

/// A file/line citation supporting a finding.
///
/// `verified` and `error` are owned by the evidence validator; values sent by
/// the model are discarded when the response is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub finding: String,
    pub file: String,
    #[serde(default)]
    pub line: Option<i64>,
    pub severity: Severity,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Evidence {
    /// Create an unverified evidence item.
    pub fn new(
        finding: impl Into<String>,
        file: impl Into<String>,
        line: Option<i64>,
        severity: Severity,
    ) -> Self {
        Self {
            finding: finding.into(),
            file: file.into(),
            line,
            severity,
            verified: false,
            error: None,
        }
    }
}

/// Fields shared by every agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub prompt_version: String,
    pub summary: String,
    pub scores: BTreeMap<String, f64>,
    pub evidence: Vec<Evidence>,
}

/// A defect reported by the bug hunter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub title: String,
    pub severity: Severity,
    pub file: String,
    #[serde(default)]
    pub line: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugHunterResponse {
    #[serde(flatten)]
    pub envelope: ResponseEnvelope,
    pub bugs: Vec<BugReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceResponse {
    #[serde(flatten)]
    pub envelope: ResponseEnvelope,
    pub bottlenecks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnovationResponse {
    #[serde(flatten)]
    pub envelope: ResponseEnvelope,
    pub standout_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDetectionResponse {
    #[serde(flatten)]
    pub envelope: ResponseEnvelope,
    /// Estimated probability (0-1) that the code is machine generated.
    pub ai_likelihood: f64,
    pub signals: Vec<String>,
}

/// A validated response, tagged by the agent that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "agent", rename_all = "snake_case")]
pub enum AgentResponse {
    BugHunter(BugHunterResponse),
    PerformanceAnalyzer(PerformanceResponse),
    InnovationScorer(InnovationResponse),
    #[serde(rename = "ai_detection")]
    AIDetection(AiDetectionResponse),
}

impl AgentResponse {
    /// The agent this response belongs to.
    pub fn identity(&self) -> AgentIdentity {
        match self {
            AgentResponse::BugHunter(_) => AgentIdentity::BugHunter,
            AgentResponse::PerformanceAnalyzer(_) => AgentIdentity::PerformanceAnalyzer,
            AgentResponse::InnovationScorer(_) => AgentIdentity::InnovationScorer,
            AgentResponse::AIDetection(_) => AgentIdentity::AIDetection,
        }
    }

    pub fn envelope(&self) -> &ResponseEnvelope {
        match self {
            AgentResponse::BugHunter(r) => &r.envelope,
            AgentResponse::PerformanceAnalyzer(r) => &r.envelope,
            AgentResponse::InnovationScorer(r) => &r.envelope,
            AgentResponse::AIDetection(r) => &r.envelope,
        }
    }

    fn envelope_mut(&mut self) -> &mut ResponseEnvelope {
        match self {
            AgentResponse::BugHunter(r) => &mut r.envelope,
            AgentResponse::PerformanceAnalyzer(r) => &mut r.envelope,
            AgentResponse::InnovationScorer(r) => &mut r.envelope,
            AgentResponse::AIDetection(r) => &mut r.envelope,
        }
    }

    pub fn scores(&self) -> &BTreeMap<String, f64> {
        &self.envelope().scores
    }

    pub fn evidence(&self) -> &[Evidence] {
        &self.envelope().evidence
    }

    /// Replace the evidence list, e.g. with its validated form.
    pub fn replace_evidence(&mut self, evidence: Vec<Evidence>) {
        self.envelope_mut().evidence = evidence;
    }
}

/// One problem with one field of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Dotted path to the field, e.g. `scores.security` or `evidence[2].line`.
    pub field: String,
    pub problem: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }

    fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "missing")
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {}", self.field, self.problem)
    }
}

/// Pseudo-field used when the response as a whole is unusable.
pub const RESPONSE_FIELD: &str = "$response";

/// Parse raw model output as `identity`'s response schema.
///
/// # Errors
///
/// Returns every field problem found; the list is never empty.
pub fn parse_agent_response(
    identity: AgentIdentity,
    raw: &str,
) -> Result<AgentResponse, Vec<FieldIssue>> {
    let object = match extract_json_object(raw) {
        JsonExtraction::Object(map) => map,
        other => {
            let reason = other
                .failure_reason()
                .unwrap_or_else(|| "unusable response".to_string());
            return Err(vec![FieldIssue::new(RESPONSE_FIELD, reason)]);
        }
    };

    let mut issues = Vec::new();
    check_envelope(identity, &object, &mut issues);
    check_agent_fields(identity, &object, &mut issues);
    if !issues.is_empty() {
        return Err(issues);
    }

    let value = Value::Object(object);
    let typed = match identity {
        AgentIdentity::BugHunter => serde_json::from_value(value).map(AgentResponse::BugHunter),
        AgentIdentity::PerformanceAnalyzer => {
            serde_json::from_value(value).map(AgentResponse::PerformanceAnalyzer)
        }
        AgentIdentity::InnovationScorer => {
            serde_json::from_value(value).map(AgentResponse::InnovationScorer)
        }
        AgentIdentity::AIDetection => serde_json::from_value(value).map(AgentResponse::AIDetection),
    };

    let mut response =
        typed.map_err(|e| vec![FieldIssue::new(RESPONSE_FIELD, e.to_string())])?;

    // Verification is computed from repository data, never taken from the model.
    let evidence = response
        .evidence()
        .iter()
        .cloned()
        .map(|mut e| {
            e.verified = false;
            e.error = None;
            e
        })
        .collect();
    response.replace_evidence(evidence);

    Ok(response)
}

fn check_envelope(identity: AgentIdentity, object: &Map<String, Value>, issues: &mut Vec<FieldIssue>) {
    check_string(object, "prompt_version", "prompt_version", false, issues);
    check_string(object, "summary", "summary", true, issues);

    match object.get("scores") {
        None | Some(Value::Null) => issues.push(FieldIssue::missing("scores")),
        Some(Value::Object(scores)) => check_scores(identity, scores, issues),
        Some(_) => issues.push(FieldIssue::new(
            "scores",
            "must be an object mapping category to a number between 0 and 100",
        )),
    }

    match object.get("evidence") {
        None | Some(Value::Null) => issues.push(FieldIssue::missing("evidence")),
        Some(Value::Array(items)) => {
            for (idx, item) in items.iter().enumerate() {
                check_evidence_item(&format!("evidence[{}]", idx), item, issues);
            }
        }
        Some(_) => issues.push(FieldIssue::new("evidence", "must be an array")),
    }
}

fn check_scores(identity: AgentIdentity, scores: &Map<String, Value>, issues: &mut Vec<FieldIssue>) {
    for category in identity.categories() {
        let path = format!("scores.{}", category);
        match scores.get(*category) {
            None | Some(Value::Null) => issues.push(FieldIssue::missing(path)),
            Some(value) => match value.as_f64() {
                Some(score) if (0.0..=MAX_SCORE).contains(&score) => {}
                _ => issues.push(FieldIssue::new(
                    path,
                    "must be a number between 0 and 100",
                )),
            },
        }
    }

    for category in scores.keys() {
        if !identity.declares(category) {
            issues.push(FieldIssue::new(
                format!("scores.{}", category),
                format!(
                    "unknown category for {}; allowed: {}",
                    identity,
                    identity.categories().join(", ")
                ),
            ));
        }
    }
}

fn check_evidence_item(path: &str, item: &Value, issues: &mut Vec<FieldIssue>) {
    let Some(object) = item.as_object() else {
        issues.push(FieldIssue::new(path, "must be an object"));
        return;
    };

    check_string(object, "finding", &format!("{}.finding", path), true, issues);
    check_string(object, "file", &format!("{}.file", path), true, issues);
    check_optional_line(object, &format!("{}.line", path), issues);
    check_severity(object, &format!("{}.severity", path), issues);
}

fn check_agent_fields(identity: AgentIdentity, object: &Map<String, Value>, issues: &mut Vec<FieldIssue>) {
    match identity {
        AgentIdentity::BugHunter => match object.get("bugs") {
            None | Some(Value::Null) => issues.push(FieldIssue::missing("bugs")),
            Some(Value::Array(bugs)) => {
                for (idx, bug) in bugs.iter().enumerate() {
                    let path = format!("bugs[{}]", idx);
                    let Some(bug) = bug.as_object() else {
                        issues.push(FieldIssue::new(path, "must be an object"));
                        continue;
                    };
                    check_string(bug, "title", &format!("{}.title", path), true, issues);
                    check_string(bug, "file", &format!("{}.file", path), true, issues);
                    check_optional_line(bug, &format!("{}.line", path), issues);
                    check_severity(bug, &format!("{}.severity", path), issues);
                }
            }
            Some(_) => issues.push(FieldIssue::new("bugs", "must be an array")),
        },
        AgentIdentity::PerformanceAnalyzer => {
            check_string_list(object, "bottlenecks", issues);
        }
        AgentIdentity::InnovationScorer => {
            check_string_list(object, "standout_features", issues);
        }
        AgentIdentity::AIDetection => {
            match object.get("ai_likelihood") {
                None | Some(Value::Null) => issues.push(FieldIssue::missing("ai_likelihood")),
                Some(value) => match value.as_f64() {
                    Some(p) if (0.0..=1.0).contains(&p) => {}
                    _ => issues.push(FieldIssue::new(
                        "ai_likelihood",
                        "must be a number between 0 and 1",
                    )),
                },
            }
            check_string_list(object, "signals", issues);
        }
    }
}

fn check_string(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    non_empty: bool,
    issues: &mut Vec<FieldIssue>,
) {
    match object.get(key) {
        None | Some(Value::Null) => issues.push(FieldIssue::missing(path)),
        Some(Value::String(s)) if non_empty && s.trim().is_empty() => {
            issues.push(FieldIssue::new(path, "must not be empty"))
        }
        Some(Value::String(_)) => {}
        Some(_) => issues.push(FieldIssue::new(path, "must be a string")),
    }
}

fn check_optional_line(object: &Map<String, Value>, path: &str, issues: &mut Vec<FieldIssue>) {
    match object.get("line") {
        None | Some(Value::Null) => {}
        Some(value) if value.as_i64().is_some() => {}
        Some(_) => issues.push(FieldIssue::new(path, "must be an integer or null")),
    }
}

fn check_severity(object: &Map<String, Value>, path: &str, issues: &mut Vec<FieldIssue>) {
    match object.get("severity") {
        None | Some(Value::Null) => issues.push(FieldIssue::missing(path)),
        Some(Value::String(s)) if Severity::WIRE_VALUES.contains(&s.as_str()) => {}
        Some(_) => issues.push(FieldIssue::new(
            path,
            format!("must be one of {}", Severity::WIRE_VALUES.join(", ")),
        )),
    }
}

fn check_string_list(object: &Map<String, Value>, key: &str, issues: &mut Vec<FieldIssue>) {
    match object.get(key) {
        None | Some(Value::Null) => issues.push(FieldIssue::missing(key)),
        Some(Value::Array(items)) => {
            for (idx, item) in items.iter().enumerate() {
                if !item.is_string() {
                    issues.push(FieldIssue::new(
                        format!("{}[{}]", key, idx),
                        "must be a string",
                    ));
                }
            }
        }
        Some(_) => issues.push(FieldIssue::new(key, "must be an array of strings")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bug_hunter_json() -> Value {
        json!({
            "prompt_version": "bug_hunter.v3",
            "summary": "Two unchecked unwraps in request handling.",
            "scores": {"security": 70, "error_handling": 55.5, "correctness": 80, "code_quality": 75},
            "evidence": [
                {"finding": "unwrap on user input", "file": "src/api.rs", "line": 42, "severity": "high", "verified": true, "error": null}
            ],
            "bugs": [{"title": "panic on empty body", "severity": "high", "file": "src/api.rs", "line": 42}]
        })
    }

    fn fields(issues: &[FieldIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.field.as_str()).collect()
    }

    #[test]
    fn test_parse_valid_bug_hunter() {
        let raw = bug_hunter_json().to_string();
        let response = parse_agent_response(AgentIdentity::BugHunter, &raw).expect("valid");

        assert_eq!(response.identity(), AgentIdentity::BugHunter);
        assert_eq!(response.scores()["error_handling"], 55.5);
        assert_eq!(response.evidence().len(), 1);
        match &response {
            AgentResponse::BugHunter(r) => assert_eq!(r.bugs[0].title, "panic on empty body"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_model_supplied_verification_is_discarded() {
        let raw = bug_hunter_json().to_string();
        let response = parse_agent_response(AgentIdentity::BugHunter, &raw).expect("valid");
        assert!(!response.evidence()[0].verified);
        assert!(response.evidence()[0].error.is_none());
    }

    #[test]
    fn test_missing_summary_is_named() {
        let mut value = bug_hunter_json();
        value.as_object_mut().expect("object").remove("summary");

        let issues = parse_agent_response(AgentIdentity::BugHunter, &value.to_string())
            .expect_err("summary is required");
        assert_eq!(fields(&issues), vec!["summary"]);
        assert_eq!(issues[0].problem, "missing");
    }

    #[test]
    fn test_empty_summary_rejected() {
        let mut value = bug_hunter_json();
        value["summary"] = json!("   ");
        let issues = parse_agent_response(AgentIdentity::BugHunter, &value.to_string())
            .expect_err("summary must be non-empty");
        assert_eq!(issues[0].problem, "must not be empty");
    }

    #[test]
    fn test_unknown_and_missing_categories() {
        let mut value = bug_hunter_json();
        value["scores"] = json!({"security": 70, "error_handling": 50, "correctness": 80, "vibes": 99});

        let issues = parse_agent_response(AgentIdentity::BugHunter, &value.to_string())
            .expect_err("scores are invalid");
        let names = fields(&issues);
        assert!(names.contains(&"scores.code_quality"));
        assert!(names.contains(&"scores.vibes"));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_out_of_range_score() {
        let mut value = bug_hunter_json();
        value["scores"]["security"] = json!(120);
        let issues = parse_agent_response(AgentIdentity::BugHunter, &value.to_string())
            .expect_err("score above 100");
        assert_eq!(fields(&issues), vec!["scores.security"]);
    }

    #[test]
    fn test_evidence_item_paths() {
        let mut value = bug_hunter_json();
        value["evidence"] = json!([
            {"finding": "ok", "file": "a.rs", "line": null, "severity": "low"},
            {"finding": "bad", "file": "", "line": "ten", "severity": "urgent"}
        ]);
        let issues = parse_agent_response(AgentIdentity::BugHunter, &value.to_string())
            .expect_err("second item invalid");
        assert_eq!(
            fields(&issues),
            vec!["evidence[1].file", "evidence[1].line", "evidence[1].severity"]
        );
    }

    #[test]
    fn test_ai_detection_specific_fields() {
        let raw = json!({
            "prompt_version": "ai.v1",
            "summary": "Mostly hand written.",
            "scores": {"originality": 90, "commit_authenticity": 85, "human_authorship": 88},
            "evidence": [],
            "ai_likelihood": 1.5
        })
        .to_string();

        let issues =
            parse_agent_response(AgentIdentity::AIDetection, &raw).expect_err("invalid extras");
        assert_eq!(fields(&issues), vec!["ai_likelihood", "signals"]);
    }

    #[test]
    fn test_prose_response_reports_whole_response() {
        let issues = parse_agent_response(AgentIdentity::InnovationScorer, "Sorry, I can't.")
            .expect_err("no json");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, RESPONSE_FIELD);
    }

    #[test]
    fn test_fenced_performance_response() {
        let raw = "```json\n{\"prompt_version\": \"perf.v2\", \"summary\": \"N+1 queries\", \
                   \"scores\": {\"efficiency\": 40, \"scalability\": 35, \"resource_usage\": 60}, \
                   \"evidence\": [], \"bottlenecks\": [\"orders loop\"]}\n```";
        let response =
            parse_agent_response(AgentIdentity::PerformanceAnalyzer, raw).expect("valid");
        assert_eq!(response.identity(), AgentIdentity::PerformanceAnalyzer);
    }

    #[test]
    fn test_serialized_response_is_tagged_with_canonical_name() {
        let raw = bug_hunter_json().to_string();
        let response = parse_agent_response(AgentIdentity::BugHunter, &raw).expect("valid");
        let json = serde_json::to_value(&response).expect("serializes");
        assert_eq!(json["agent"], "bug_hunter");
        assert_eq!(json["summary"], "Two unchecked unwraps in request handling.");
    }

    #[test]
    fn test_field_issue_display() {
        let issue = FieldIssue::new("scores.security", "missing");
        assert_eq!(issue.to_string(), "`scores.security`: missing");
    }
}
