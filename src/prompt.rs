use crate::chat::Turn;
use crate::index::ScoredEntry;
use std::fmt::Write;

const GROUNDING_INSTRUCTION: &str = "Answer the question using only the information in the context below. \
If the context does not contain the answer, say that you don't know. \
Cite the file and page of every passage you rely on, for example [report.pdf, page 2].";

/// Label used when a chunk has no page
pub const NO_PAGE: &str = "N/A";

/// Assemble the grounded prompt sent to the model
pub fn build_prompt(
    system_prompt: &str,
    context: &[ScoredEntry],
    history: &[Turn],
    question: &str,
) -> String {
    let mut prompt = String::new();

    if !system_prompt.trim().is_empty() {
        prompt.push_str(system_prompt.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(GROUNDING_INSTRUCTION);
    prompt.push_str("\n\nContext:\n");

    if context.is_empty() {
        prompt.push_str("(no relevant passages were found)\n");
    }
    for (i, hit) in context.iter().enumerate() {
        let metadata = &hit.entry.chunk.metadata;
        // Writing to a String cannot fail
        let _ = writeln!(
            prompt,
            "[{}] file: {}, page: {}\n{}\n",
            i + 1,
            metadata.file_name,
            metadata.page_label.as_deref().unwrap_or(NO_PAGE),
            hit.entry.chunk.text.trim()
        );
    }

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for turn in history {
            let _ = writeln!(prompt, "User: {}", turn.user.trim());
            let _ = writeln!(prompt, "Assistant: {}", turn.assistant.trim());
        }
    }

    let _ = write!(prompt, "\nQuestion: {}\nAnswer:", question.trim());
    prompt
}

/// Truncate `text` to at most `max_chars` characters, never splitting a character
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{Chunk, ChunkMetadata};
    use crate::embeddings::Embedding;
    use crate::index::IndexEntry;

    fn hit(file: &str, page: Option<&str>, text: &str) -> ScoredEntry {
        ScoredEntry {
            entry: IndexEntry {
                chunk: Chunk {
                    text: text.to_string(),
                    token_count: 0,
                    metadata: ChunkMetadata {
                        file_name: file.to_string(),
                        page_label: page.map(str::to_string),
                        chunk_index: 0,
                    },
                },
                embedding: Embedding::from(vec![1.0]),
            },
            score: 0.5,
        }
    }

    #[test]
    fn test_prompt_contains_context_history_and_question() {
        let context = vec![
            hit("report.pdf", Some("2"), "The conclusion is positive."),
            hit("notes.txt", None, "Side note."),
        ];
        let history = vec![Turn {
            user: "What is X?".to_string(),
            assistant: "X is a variable.".to_string(),
        }];

        let prompt = build_prompt("Be brief.", &context, &history, "What did I just ask?");

        assert!(prompt.starts_with("Be brief.\n\n"));
        assert!(prompt.contains("[1] file: report.pdf, page: 2\nThe conclusion is positive."));
        assert!(prompt.contains("[2] file: notes.txt, page: N/A\nSide note."));
        assert!(prompt.contains("User: What is X?\nAssistant: X is a variable."));
        assert!(prompt.ends_with("Question: What did I just ask?\nAnswer:"));
    }

    #[test]
    fn test_prompt_without_history_or_context() {
        let prompt = build_prompt("", &[], &[], "Anything?");
        assert!(prompt.starts_with(GROUNDING_INSTRUCTION));
        assert!(prompt.contains("(no relevant passages were found)"));
        assert!(!prompt.contains("Conversation so far"));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abc", 0), "");
    }
}
