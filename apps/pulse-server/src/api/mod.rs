pub mod ingest;
pub mod meta;
pub mod state;
pub mod stream;
