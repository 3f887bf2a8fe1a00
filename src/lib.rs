//! # cdr-gateway - A signed client for a clinical document repository
//!
//! cdr-gateway wraps the document repository REST API behind a small client
//! built on top of `reqwest`. It handles the two fiddly parts of talking to
//! the service: HMAC request signing (with per-tenant key derivation) and
//! mapping response status codes onto caller-chosen error kinds.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cdr_gateway::{Client, Config, ErrorKind, RequestMetadata, Resource};
//! use regex::Regex;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cdr_gateway::Error> {
//!     let client = Client::new(Config::from_pairs([
//!         ("protocol", "https"),
//!         ("host", "cdr.example.org"),
//!         ("port", "443"),
//!         ("user_root", "2.16.840.1.113883.3.51.1.1.6"),
//!         ("user_extension", "clinician-42"),
//!         ("hmac_id", "my-app"),
//!         ("hmac_key", "secret"),
//!         ("tenant_id", "7"),
//!         ("tenant_key", "tenant-secret"),
//!     ]))?;
//!
//!     // Read a patient's demographics
//!     let path = client.api_path("/patient/srcsys/1234/demographics");
//!     let demographics = client
//!         .perform_request(&path, &RequestMetadata::default())
//!         .await?
//!         .handler()
//!         .on_status(403, ErrorKind::TenantNotAuthorized)?
//!         .on_status(404, ErrorKind::NotFound(Resource::Patient))?
//!         .to_json()?;
//!     println!("{}", demographics);
//!
//!     // Delete a patient identity, distinguishing why a 409 happened
//!     let has_documents = Regex::new("has documents").unwrap();
//!     let path = client.api_path("/patient_identity/srcsys/1234");
//!     client
//!         .delete(&path)
//!         .await?
//!         .handler()
//!         .with_general_exception_check(
//!             409,
//!             &has_documents,
//!             ErrorKind::Other("patient identity has documents".to_string()),
//!         )?
//!         .on_status(409, ErrorKind::Conflict)?
//!         .if_non_two_hundred_raise(ErrorKind::NonTwoHundred)
//!         .to_json()?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **HMAC signing** - `APIAuth` signatures over content type, body MD5, request URI and date
//! - **Tenant keys** - Signing keys derived from the tenant key when the tenant comes from configuration
//! - **Deterministic queries** - Bracket-notation query strings sorted by key
//! - **Status dispatch** - Chainable `on_status` checks that fail with the kind you register
//! - **Raw access** - Status, headers, body and latency of every response
//! - **Logging** - Structured `tracing` events for each request and response
//!
//! ## Errors
//!
//! Transport failures, malformed JSON bodies and registered status checks all
//! surface as [`Error`]. Nothing is retried; connection failures come back as
//! [`Error::ConnectionRefused`] for the caller to handle.

mod client;
pub mod config;
mod error;
mod handler;
pub mod metadata;
pub mod query;
mod response;
pub mod signer;

pub use client::{AuthMode, BuiltRequest, Client, ClientBuilder};
pub use config::Config;
pub use error::{Error, ErrorKind, Resource, Result};
pub use handler::{DataAndType, ResponseHandler};
pub use metadata::{Multipart, RequestBody, RequestMetadata, RequestMethod};
pub use response::Response;
pub use signer::{DigestAlgorithm, Signer};
