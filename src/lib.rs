//! Reflectance processing for field spectroradiometer campaigns.
//!
//! The crate turns an untrusted zip of instrument text exports into a result
//! archive of averaged radiance and reflectance series, one folder tree per
//! campaign, plus a `metadata.json` provenance document. [`Processor`] is the
//! entry point; the modules below are usable on their own.

pub mod archive;
pub mod calibration;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod runner;
pub mod settings;
pub mod util;

pub use archive::ArchiveGateway;
pub use domain::DomainKind;
pub use error::{ArchiveError, ProcessError, RunError};
pub use orchestrator::{CalibrationUpload, ProcessOutput, ProcessRequest, Processor};
pub use settings::{ArchiveLimits, Settings};
