mod codec;
mod document_store;
mod processor;

pub use codec::{decode_document, encode_document};
pub use document_store::DocumentStore;
pub use processor::{DocumentProcessor, ProcessingContext};
