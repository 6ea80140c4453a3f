//! Prompt construction for the scoring agents.

use std::fmt::Write as _;

use super::identity::AgentIdentity;
use super::response::FieldIssue;
use crate::context::RepoData;
use crate::scoring::AgentRubric;

/// Files listed in the user message before truncating.
const MAX_LISTED_FILES: usize = 200;

/// Commits listed in the user message.
const MAX_LISTED_COMMITS: usize = 20;

const BUG_HUNTER_ROLE: &str = r#"You are a senior code reviewer judging a hackathon submission for defects.
Look for security vulnerabilities, missing or incorrect error handling, logic errors and
code quality problems. Report concrete bugs with the file and line where they occur.
Only cite files that appear in the file list you are given."#;

const PERFORMANCE_ROLE: &str = r#"You are a performance engineer judging a hackathon submission.
Look for inefficient algorithms, blocking calls on hot paths, unbounded memory growth,
N+1 queries and anything that would stop the project from scaling.
Only cite files that appear in the file list you are given."#;

const INNOVATION_ROLE: &str = r#"You are a hackathon judge assessing innovation.
Judge how novel the idea is, how much technical depth the implementation shows and what
impact it could have. Name the features that stand out.
Only cite files that appear in the file list you are given."#;

const AI_DETECTION_ROLE: &str = r#"You are reviewing a hackathon submission for authorship authenticity.
Estimate how much of the code was machine generated, using commit history, code style
consistency and comment patterns as signals. High scores mean original, human-authored work.
Only cite files that appear in the file list you are given."#;

/// Version tag agents must echo in `prompt_version`.
pub fn prompt_version(identity: AgentIdentity) -> String {
    format!("{}.v1", identity)
}

/// Default system prompt for an agent, including its response format.
pub fn default_system_prompt(identity: AgentIdentity) -> String {
    let role = match identity {
        AgentIdentity::BugHunter => BUG_HUNTER_ROLE,
        AgentIdentity::PerformanceAnalyzer => PERFORMANCE_ROLE,
        AgentIdentity::InnovationScorer => INNOVATION_ROLE,
        AgentIdentity::AIDetection => AI_DETECTION_ROLE,
    };
    format!(
        "{}\n\nYou MUST respond with ONLY a valid JSON object in this exact format:\n{}\n\n\
         Every score is a number between 0 and 100. Severity is one of low, medium, high, critical.\n\
         CRITICAL: Your entire response must be ONLY the JSON object.",
        role,
        response_template(identity)
    )
}

/// JSON skeleton describing the expected response.
pub fn response_template(identity: AgentIdentity) -> String {
    let scores = identity
        .categories()
        .iter()
        .map(|c| format!("    \"{}\": <number 0-100>", c))
        .collect::<Vec<_>>()
        .join(",\n");

    let extras = match identity {
        AgentIdentity::BugHunter => {
            r#"  "bugs": [{"title": "<short title>", "severity": "<low|medium|high|critical>", "file": "<path>", "line": <integer or null>}]"#
        }
        AgentIdentity::PerformanceAnalyzer => r#"  "bottlenecks": ["<description>"]"#,
        AgentIdentity::InnovationScorer => r#"  "standout_features": ["<feature>"]"#,
        AgentIdentity::AIDetection => {
            "  \"ai_likelihood\": <number 0-1>,\n  \"signals\": [\"<signal>\"]"
        }
    };

    format!(
        "{{\n  \"prompt_version\": \"{}\",\n  \"summary\": \"<one paragraph>\",\n  \"scores\": {{\n{}\n  }},\n  \
         \"evidence\": [{{\"finding\": \"<what>\", \"file\": \"<path>\", \"line\": <integer or null>, \"severity\": \"<low|medium|high|critical>\"}}],\n{}\n}}",
        prompt_version(identity),
        scores,
        extras
    )
}

/// Build the user message describing the repository and the scoring rubric.
pub fn build_user_message(identity: AgentIdentity, repo: &RepoData, rubric: &AgentRubric) -> String {
    let mut msg = String::new();

    let _ = writeln!(msg, "Repository: {}", repo.repo_url);
    let _ = writeln!(
        msg,
        "Files: {} ({} lines total)\n",
        repo.file_count(),
        repo.total_lines()
    );

    msg.push_str("File list (path: lines):\n");
    for (path, lines) in repo.line_counts.iter().take(MAX_LISTED_FILES) {
        let _ = writeln!(msg, "- {}: {}", path, lines);
    }
    if repo.file_count() > MAX_LISTED_FILES {
        let _ = writeln!(msg, "- ... {} more files", repo.file_count() - MAX_LISTED_FILES);
    }

    if !repo.commits.is_empty() {
        msg.push_str("\nRecent commits:\n");
        for commit in repo.commits.iter().take(MAX_LISTED_COMMITS) {
            let short_sha = commit.sha.get(..8).unwrap_or(&commit.sha);
            let _ = writeln!(msg, "- {} {} ({})", short_sha, commit.message, commit.author);
        }
    }

    if let Some(ci) = &repo.ci_summary {
        let _ = writeln!(msg, "\nCI output (tail):\n{}", ci);
    }

    if !repo.excerpts.is_empty() {
        msg.push_str("\nSource excerpts:\n");
        for (path, content) in &repo.excerpts {
            let _ = writeln!(msg, "=== {} ===\n{}", path, content);
        }
    }

    let _ = writeln!(msg, "\nScoring rubric for {} (category: weight):", identity);
    for category in identity.categories() {
        let weight = rubric.categories.get(*category).copied().unwrap_or(0.0);
        let _ = writeln!(msg, "- {}: {}", category, weight);
    }

    msg.push_str("\nAnalyze the repository and respond with the JSON object described in your instructions.");
    msg
}

/// Build the instruction asking the model to fix a rejected response.
///
/// Names every offending field so the model can correct all of them at once.
pub fn repair_instruction(identity: AgentIdentity, issues: &[FieldIssue]) -> String {
    let mut msg = String::from(
        "Your previous response could not be accepted. Fix the following problems:\n",
    );
    for issue in issues {
        let _ = writeln!(msg, "- {}", issue);
    }
    let _ = write!(
        msg,
        "\nRespond again with ONLY the corrected JSON object in this format:\n{}",
        response_template(identity)
    );
    msg
}
