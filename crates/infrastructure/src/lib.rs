//! Document store adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_document_store;
mod postgres_document_store;

pub use in_memory_document_store::InMemoryDocumentStore;
pub use postgres_document_store::PostgresDocumentStore;
