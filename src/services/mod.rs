//! Import pipeline services.

pub mod annotations;
pub mod catalog;
pub mod checksum;
pub mod cleanup;
pub mod converter;
pub mod duplicates;
pub mod event_bus;
pub mod http_repository;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod stager;
pub mod stats;
pub mod uploader;
pub mod worker_pool;

pub use cleanup::{CleanupConfig, start_cleanup_task};
pub use converter::{FormatConverter, PassthroughConverter};
pub use event_bus::{EventBus, EventCounter, Subscription};
pub use http_repository::HttpRepositoryConnector;
pub use pipeline::{Acceptance, Caller, ImportPipeline, IncomingFile};
pub use stats::StatsRecorder;
