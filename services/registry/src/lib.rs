//! Audio Metadata Registry
//!
//! Keeps a catalogue of descriptive metadata for audio files stored in an S3
//! bucket. Clients upload audio directly through presigned URLs; metadata is
//! registered either synchronously through the API or asynchronously from S3
//! object notifications, which carry the metadata attached at upload time.
//!
//! ## Features
//!
//! - **Presigned URLs**: time-limited upload URLs bound to the submitted
//!   metadata, and download URLs for registered audio
//! - **Guarded Registration**: submissions are validated, must reference an
//!   existing object and may not overwrite an existing record
//! - **Event Ingestion**: Kafka-delivered S3 notifications are ingested with
//!   per-record deadlines and bounded concurrency
//! - **Pluggable Record Stores**: PostgreSQL, DynamoDB, or in-process memory
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API                   Kafka Topic
//! ┌──────────────┐           ┌──────────────┐
//! │ /api/v1/     │           │ S3 object    │
//! │ audio        │           │ notifications│
//! │ metadata     │           └──────────────┘
//! └──────────────┘                  │
//!    │        │                     ▼
//!    │        │              ┌──────────────┐
//!    │        └─────────────▶│ Registry     │
//!    ▼                       └──────────────┘
//! ┌──────────────┐             │          │
//! │ URL Service  │             ▼          ▼
//! └──────────────┘     ┌──────────────┐ ┌──────────────┐
//!        │             │ Object Store │ │ Record Store │
//!        └────────────▶│ (S3)         │ │ (PG/DynamoDB)│
//!                      └──────────────┘ └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod dynamodb_store;
pub mod error;
pub mod kafka_consumer;
pub mod memory;
pub mod metadata;
pub mod metadata_store;
pub mod notification;
pub mod object_store;
pub mod presigned_urls;
pub mod record_store;
pub mod registry;
pub mod s3_store;
pub mod validation;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::RegistryError;
pub use kafka_consumer::NotificationConsumer;
pub use metadata::{MetadataField, MetadataRecord};
pub use notification::ObjectNotification;
pub use object_store::{ObjectProbe, ObjectStore};
pub use presigned_urls::{PresignedUrl, UrlIssuer, UrlService};
pub use record_store::{CreateOutcome, RecordStore};
pub use registry::{BatchReport, Registry};
pub use validation::{Rule, ValidationError};
