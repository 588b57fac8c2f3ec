pub mod chat;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod prompt;
pub mod rag;
pub mod server;
