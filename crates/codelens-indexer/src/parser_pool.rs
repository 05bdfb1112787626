//! Thread-safe parser pool for tree-sitter parsers
//!
//! Tree-sitter parsers are not `Sync`, so each worker thread owns one parser and
//! receives requests over a channel.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use tree_sitter::{Language, Parser};

use crate::error::IndexError;

/// Grammars the pool can parse with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Python,
    TypeScript,
    Tsx,
    JavaScript,
}

impl Grammar {
    /// Determine the grammar from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "py" | "pyi" => Some(Grammar::Python),
            "ts" | "mts" | "cts" => Some(Grammar::TypeScript),
            "tsx" => Some(Grammar::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Grammar::JavaScript),
            _ => None,
        }
    }

    pub fn language(self) -> Language {
        match self {
            Grammar::Python => tree_sitter_python::LANGUAGE.into(),
            Grammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Grammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Grammar::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

/// A parsing request sent to the parser pool
#[derive(Debug)]
pub struct ParseRequest {
    pub grammar: Grammar,
    pub content: String,
    pub path: PathBuf,
}

/// Result of a parsing operation
#[derive(Debug)]
pub struct ParseResult {
    pub tree: tree_sitter::Tree,
    pub path: PathBuf,
    pub content: String,
}

struct WorkerRequest {
    request: ParseRequest,
    response_sender: Sender<Result<ParseResult, IndexError>>,
}

/// Thread-safe parser pool
#[derive(Clone)]
pub struct ParserPool {
    sender: Sender<WorkerRequest>,
}

impl ParserPool {
    /// Create a new parser pool with the specified number of worker threads
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = std::sync::mpsc::channel::<WorkerRequest>();
        let receiver = Arc::new(Mutex::new(receiver));

        for i in 0..num_workers.max(1) {
            let receiver = receiver.clone();
            std::thread::spawn(move || {
                Self::worker_thread(i, receiver);
            });
        }

        Self { sender }
    }

    fn worker_thread(worker_id: usize, receiver: Arc<Mutex<Receiver<WorkerRequest>>>) {
        tracing::debug!("Parser worker {} started", worker_id);

        let mut parser = Parser::new();
        let mut current: Option<Grammar> = None;

        loop {
            let next = match receiver.lock() {
                Ok(guard) => guard.recv(),
                Err(_) => break,
            };
            let WorkerRequest { request, response_sender } = match next {
                Ok(req) => req,
                Err(_) => {
                    tracing::debug!("Parser worker {} shutting down", worker_id);
                    break;
                }
            };

            if current != Some(request.grammar) {
                if let Err(e) = parser.set_language(&request.grammar.language()) {
                    let _ = response_sender.send(Err(IndexError::Pool(format!("failed to set language: {}", e))));
                    continue;
                }
                current = Some(request.grammar);
            }

            let result = match parser.parse(&request.content, None) {
                Some(tree) => Ok(ParseResult { tree, path: request.path, content: request.content }),
                None => Err(IndexError::Parse { path: request.path, message: "parser returned no tree".into() }),
            };

            if response_sender.send(result).is_err() {
                tracing::warn!("Failed to send parse result back to caller");
            }
        }
    }

    /// Parse content on a worker, blocking the current thread until it is done.
    pub fn parse_blocking(&self, request: ParseRequest) -> Result<ParseResult, IndexError> {
        let (response_sender, response_receiver) = std::sync::mpsc::channel();
        self.sender
            .send(WorkerRequest { request, response_sender })
            .map_err(|_| IndexError::Pool("parser pool is shut down".into()))?;
        response_receiver
            .recv()
            .map_err(|_| IndexError::Pool("parser worker died".into()))?
    }

    /// Parse content asynchronously using the parser pool
    pub async fn parse(&self, request: ParseRequest) -> Result<ParseResult, IndexError> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.parse_blocking(request))
            .await
            .map_err(|e| IndexError::Pool(format!("task join error: {}", e)))?
    }
}

/// Create a parser pool with one worker per CPU core, at least 2
pub fn create_parser_pool() -> ParserPool {
    let num_workers = std::thread::available_parallelism()
        .map(|n| n.get().max(2))
        .unwrap_or(2);

    ParserPool::new(num_workers)
}
