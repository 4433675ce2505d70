//! Hash-gated embedding and summary refresh. For any node, derives an
//! embeddable text by node type, hashes it, and — only if the hash differs
//! from the stored `embedding_hash` — kicks off a detached embed call and
//! (independently) a detached summarise call. Both are best-effort and run
//! off the triggering call path: a slow or failing LLM call never blocks the
//! caller that touched the node.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use weave_graph::{DataPatch, GraphStore, Node};
use weave_ids::Id;
use weave_llm::{ChatMessage, CompletionRequest, Router};
use weave_model_registry::well_known;

/// Embeddable/summarisable text is truncated to this many bytes before
/// hashing or being sent to a provider.
pub const MAX_INPUT_BYTES: usize = 32 * 1024;

/// Only the first this-many bytes of file content are checked for a null
/// byte when deciding whether a file looks binary.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Extensions assumed binary without needing to sniff content. Externalised
/// per the "known binary extensions" design decision rather than hardcoded
/// inline at each call site.
pub const KNOWN_BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", "pdf", "zip", "gz", "tar", "tgz", "bz2",
    "xz", "7z", "woff", "woff2", "ttf", "otf", "eot", "so", "dylib", "dll", "exe", "bin", "wasm",
    "class", "jar", "parquet", "sqlite", "db",
];

fn file_extension(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}

fn looks_binary(name: &str, content: &str) -> bool {
    if let Some(ext) = file_extension(name) {
        if KNOWN_BINARY_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)) {
            return true;
        }
    }
    content.as_bytes().iter().take(BINARY_SNIFF_BYTES).any(|&b| b == 0)
}

fn text_field<'a>(data: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(|v| v.as_str())
}

fn join_non_empty(parts: &[Option<&str>]) -> String {
    parts.iter().flatten().filter(|s| !s.is_empty()).cloned().collect::<Vec<_>>().join("\n")
}

/// Derives the text a node's embedding and summary should be computed over.
/// Returns `None` when the node should be skipped entirely (a binary file).
pub fn derive_embeddable_text(node: &Node) -> Option<String> {
    let text = match node.node_type.as_str() {
        "task" => join_non_empty(&[
            Some(node.name.as_str()),
            text_field(&node.data, "description"),
            text_field(&node.data, "status"),
        ]),
        "insight" | "decision" | "todo" => join_non_empty(&[
            text_field(&node.data, "text"),
            text_field(&node.data, "context"),
            text_field(&node.data, "rationale"),
        ]),
        "context_frame" => text_field(&node.data, "card_text")
            .or_else(|| text_field(&node.data, "current_focus"))
            .unwrap_or(&node.name)
            .to_string(),
        "file" => {
            let content = text_field(&node.data, "content_preview").unwrap_or_default();
            if content.is_empty() {
                node.name.clone()
            } else if looks_binary(&node.name, content) {
                return None;
            } else {
                content.to_string()
            }
        }
        _ => node.name.clone(),
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

/// Truncates on a UTF-8 boundary to [`MAX_INPUT_BYTES`].
pub fn cap_text(mut text: String) -> String {
    if text.len() <= MAX_INPUT_BYTES {
        return text;
    }
    let mut cut = MAX_INPUT_BYTES;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct Embedder {
    store: GraphStore,
    router: Arc<Router>,
}

impl Embedder {
    pub fn new(store: GraphStore, router: Arc<Router>) -> Self {
        Self { store, router }
    }

    /// If `node`'s embeddable text hash differs from its stored
    /// `embedding_hash`, spawns a detached task that embeds and writes the
    /// new vector. Returns immediately either way.
    pub fn maybe_refresh_embedding(&self, node: &Node) {
        let Some(text) = derive_embeddable_text(node) else { return };
        let text = cap_text(text);
        let hash = content_hash(&text);
        if node.embedding_hash.as_deref() == Some(hash.as_str()) {
            return;
        }

        let store = self.store.clone();
        let router = Arc::clone(&self.router);
        let node_id = node.id;
        tokio::spawn(async move {
            if let Ok(mut vectors) = router.embed(&[text]).await {
                if let Some(vector) = vectors.pop() {
                    let _ = store.update_embedding(node_id, vector, hash).await;
                }
            }
        });
    }

    /// Spawns a detached task that asks the `summarize` role for a short
    /// summary and merges it into the node's `data.summary` field.
    pub fn maybe_refresh_summary(&self, node: &Node) {
        let Some(text) = derive_embeddable_text(node) else { return };
        let text = cap_text(text);

        let store = self.store.clone();
        let router = Arc::clone(&self.router);
        let node_id = node.id;
        tokio::spawn(async move {
            let req = CompletionRequest::new(vec![
                ChatMessage::system("Summarise the following in one or two sentences. Reply with only the summary text."),
                ChatMessage::user(text),
            ])
            .with_max_tokens(200);
            if let Ok(outcome) = router.complete_role(well_known::SUMMARIZE, req).await {
                let patch = DataPatch::Merge(serde_json::json!({"summary": outcome.content}));
                let _ = store.update_node(node_id, patch).await;
            }
        });
    }

    /// Convenience used by callers that want both refreshes fired together.
    pub fn maybe_refresh(&self, node: &Node) {
        self.maybe_refresh_embedding(node);
        self.maybe_refresh_summary(node);
    }
}
