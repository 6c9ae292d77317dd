//! feedfetch - authenticated feed retrieval over HTTP, FTP, S3, Azure Blob and local storage
//!
//! [`authenticated_request`] fetches one URL through the backend its scheme
//! selects, enforcing size and truncation checks while hashing the body.
//! [`store`] exposes the bucket facade for whole-tree transfers and presigning.

pub mod config;
pub mod context;
pub mod copy;
pub mod error;
pub mod providers;
pub mod request;
pub mod store;

pub use config::FetchConfig;
pub use context::{Context, ContextError};
pub use copy::{copy_with_integrity, CopyLimits, CopySummary};
pub use error::{ErrorKind, IntegrityError, TransferError};
pub use providers::{
    AuthType, Backend, BackendKind, Bucket, ByteStream, Download, Downloader, FeedAuthorization, Presigner,
    RetryConfig, Secret, SecretSetter, Uploader,
};
pub use request::{authenticated_request, authenticated_request_to_file, FetchResponse, Request};
pub use store::{create_signed_url, download_all, open_store, open_store_with_secret, upload_all};
