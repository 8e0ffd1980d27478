// Library interface for the server binary and the integration tests

pub mod cipher;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod db;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod manifest;
pub mod passport;
pub mod queries;
pub mod schema;
pub mod segments;
pub mod serve;
pub mod shard;

pub use error::{CipherError, ManifestError, StoreError};
