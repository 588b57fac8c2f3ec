use crate::chat::ConversationState;
use crate::error::Result as RagResult;
use crate::rag::{RagEngine, Source, StreamingAnswer};
use anyhow::Result;
use log::warn;
use std::io::{BufRead, Write};

/// Characters of a source shown in the terminal
const SNIPPET_CHARS: usize = 50;

/// How the interactive loop treats earlier turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    /// Each question sees the previous turns of the session
    Context,
    /// Each question is answered on its own
    Stateless,
}

/// Run the interactive question loop until the user types `q` or input ends
pub async fn run_chat_loop<R, W>(
    engine: &RagEngine,
    mode: ChatMode,
    mut input: R,
    mut output: W,
) -> Result<()>
where
    R: BufRead,
    W: Write,
{
    let mut state = ConversationState::new();
    let mut buffer = String::new();

    writeln!(output, "Ready to answer questions about your documents. Type 'q' to quit.")?;

    loop {
        write!(output, "\nYou: ")?;
        output.flush()?;

        buffer.clear();
        if input.read_line(&mut buffer)? == 0 {
            writeln!(output)?;
            break;
        }

        let question = buffer.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("q") {
            writeln!(output, "Goodbye!")?;
            break;
        }

        let answer = match mode {
            ChatMode::Context => engine.stream_chat(&mut state, question).await,
            ChatMode::Stateless => engine.stream_query(question).await,
        };

        // A failed turn is reported and the session goes on
        match answer {
            Ok(answer) => {
                if let Err(e) = print_answer(answer, &mut output).await {
                    warn!("Answer stream failed: {}", e);
                    writeln!(output, "\nError: {}", e)?;
                }
            }
            Err(e) => {
                warn!("Query failed: {}", e);
                writeln!(output, "Error: {}", e)?;
            }
        }
    }

    Ok(())
}

/// Print fragments as they arrive, then the sources
async fn print_answer<W: Write>(mut answer: StreamingAnswer<'_>, output: &mut W) -> RagResult<()> {
    write!(output, "Assistant: ")?;
    while let Some(fragment) = answer.next_fragment().await {
        write!(output, "{}", fragment?)?;
        output.flush()?;
    }
    writeln!(output)?;

    if !answer.sources().is_empty() {
        writeln!(output, "\n--- Sources Used ---")?;
        for source in answer.sources() {
            writeln!(output, "{}", format_source(source))?;
        }
    }
    Ok(())
}

/// Render a citation as shown in the terminal
pub fn format_source(source: &Source) -> String {
    let snippet: String = source
        .text_preview
        .chars()
        .take(SNIPPET_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!(
        "File: {} | Page: {}\nSnippet: \"{}...\"",
        source.file, source.page, snippet
    )
}
