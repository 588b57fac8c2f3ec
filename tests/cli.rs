mod common;

use common::{pdf, test_config, EchoModel, FailingModel, HashEmbedder};
use research_chatbot::cli::{run_chat_loop, ChatMode};
use research_chatbot::indexer::Indexer;
use research_chatbot::llm::LanguageModel;
use research_chatbot::rag::RagEngine;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::tempdir;

async fn run(llm: Arc<dyn LanguageModel>, indexed: bool, mode: ChatMode, input: &str) -> String {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), dir.path());
    let embedder = Arc::new(HashEmbedder::new());

    let index = if indexed {
        let indexer = Indexer::new(&config, embedder.clone());
        let index = indexer
            .index_documents(vec![pdf("report.pdf", &["Results\nwere strong.", "Costs fell."])])
            .await
            .unwrap();
        Some(Arc::new(index))
    } else {
        None
    };

    let engine = RagEngine::new(&config, embedder, llm, index);
    let mut output = Vec::new();
    run_chat_loop(&engine, mode, Cursor::new(input.to_string()), &mut output)
        .await
        .unwrap();
    String::from_utf8(output).unwrap()
}

#[tokio::test]
async fn test_chat_prints_answer_and_sources() {
    let echo = Arc::new(EchoModel::new());
    let output = run(echo.clone(), true, ChatMode::Context, "How were results?\nAnd costs?\nQ\n").await;

    assert!(output.contains("You: Assistant: "));
    assert!(output.contains("--- Sources Used ---"));
    assert!(output.contains("File: report.pdf | Page: 1\nSnippet: \"Results were strong....\""));
    assert!(output.contains("File: report.pdf | Page: 2"));
    assert!(output.trim_end().ends_with("Goodbye!"));

    assert_eq!(echo.calls(), 2);
    assert!(echo.last_prompt().unwrap().contains("User: How were results?"));
}

#[tokio::test]
async fn test_stateless_mode_forgets_turns() {
    let echo = Arc::new(EchoModel::new());
    run(echo.clone(), true, ChatMode::Stateless, "How were results?\nAnd costs?\n").await;

    assert_eq!(echo.calls(), 2);
    assert!(!echo.last_prompt().unwrap().contains("Conversation so far"));
}

#[tokio::test]
async fn test_errors_are_printed_and_loop_continues() {
    let echo = Arc::new(EchoModel::new());
    let output = run(echo.clone(), false, ChatMode::Context, "First?\nSecond?\nq\n").await;

    assert_eq!(output.matches("Error: index not ready").count(), 2);
    assert!(output.contains("Goodbye!"));
    assert_eq!(echo.calls(), 0);

    let failing = Arc::new(FailingModel::new());
    let output = run(failing, true, ChatMode::Context, "How were results?\n").await;
    assert!(output.contains("Assistant: partial \nError: provider error (fake): connection reset"));
}
