//! Persistence: the feed document and the uploaded attachment files.

pub mod attachments;
pub mod records;

pub use attachments::{generated_name, AttachmentStore};
pub use records::{JsonFileStore, RecordStore, SeedPolicy};
