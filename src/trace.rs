//! Logging setup and the representations used when values are attached to tracing events.

use mongodb::bson::{Binary, Bson, Document, RawBson};
use tracing_subscriber::{fmt, EnvFilter};

/// The level used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// The driver's own events are emitted under the `mongodb::command`, `mongodb::connection` and
/// `mongodb::server_selection` targets, so e.g. `RUST_LOG=info,mongodb::command=debug` shows every
/// command the walkthrough sends, including the encrypted payloads.
///
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
}

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for Binary {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string()
    }
}

impl TracingRepresentation for Bson {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.clone().into_relaxed_extjson().to_string()
    }
}

impl TracingRepresentation for RawBson {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        match Bson::try_from(self.clone()) {
            Ok(bson) => bson.tracing_representation(),
            Err(_) => format!("{:?}", self),
        }
    }
}
