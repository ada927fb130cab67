pub mod chunker;
pub mod context;
pub mod embedder;
pub mod filter;

pub use chunker::{assemble_chunks, estimate_tokens, split_blocks};
pub use embedder::{embed_document, embed_document_default, EmbedDocument};
