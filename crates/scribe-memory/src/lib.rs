pub mod chunk;
pub mod embeddings;
pub mod store;

pub use chunk::chunk_text;
pub use embeddings::{cosine_similarity, EmbeddingProvider, HttpEmbeddingProvider};
pub use store::SqliteVectorStore;
