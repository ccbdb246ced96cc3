#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod clients;
pub mod config;
pub mod learning;
pub mod observability;
pub(crate) mod schema;
pub mod taxonomy;
pub mod util;

pub use app::ComponentRegistry;
pub use config::{Config, ConfigError};
pub use learning::{
    ClassificationOrchestrator, ClassificationResult, ClassificationSource, ContentMetadata,
    SignatureGenerator, VerifiedPatternStore,
};
