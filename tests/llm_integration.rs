//! Integration tests against a live model.
//!
//! These tests make real API calls to OpenRouter.
//! Run with: OPENROUTER_API_KEY=your_key cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use hack_judge::agents::{default_system_prompt, AgentIdentity, AgentRequest, AgentRunner};
use hack_judge::context::RepoData;
use hack_judge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use hack_judge::scoring::RubricWeights;

const TEST_MODEL: &str = "openai/gpt-4o-mini";

fn create_test_client() -> LiteLlmClient {
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY environment variable must be set for integration tests");
    LiteLlmClient::openrouter(api_key, TEST_MODEL.to_string()).expect("client builds")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        TEST_MODEL,
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    assert!(
        response.content.contains('4'),
        "Response should contain '4', got: {}",
        response.content
    );
    assert!(response.usage.total() > 0, "Should have token usage");
}

#[tokio::test]
#[ignore]
async fn test_agent_produces_valid_response() {
    let runner = AgentRunner::with_defaults(Arc::new(create_test_client()));
    let repo = RepoData::new("https://github.com/example/todo-cli")
        .with_file("src/main.rs", 42)
        .with_excerpt(
            "src/main.rs",
            "fn main() {\n    let args: Vec<String> = std::env::args().collect();\n    println!(\"{}\", args[1]);\n}\n",
        );
    let rubric = RubricWeights::default();
    let agent_rubric = rubric
        .agent(AgentIdentity::BugHunter)
        .expect("default rubric covers every agent");
    let system_prompt = default_system_prompt(AgentIdentity::BugHunter);

    let run = runner
        .run(AgentRequest {
            identity: AgentIdentity::BugHunter,
            system_prompt: &system_prompt,
            model_id: TEST_MODEL,
            repo: &repo,
            rubric: agent_rubric,
            max_retries: 2,
        })
        .await
        .expect("agent run succeeds");

    assert!((1..=3).contains(&run.attempts));
    assert_eq!(run.response.identity(), AgentIdentity::BugHunter);
    assert_eq!(run.response.scores().len(), 4);
}
