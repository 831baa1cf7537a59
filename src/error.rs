//! Contains the `Error` and `Result` types that `csfle-range-demo` uses.

use std::{fmt, path::PathBuf};

use mongodb::bson;
use thiserror::Error;

/// The result type for all methods that can return an error in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in this crate. The inner [`ErrorKind`] is boxed to keep `Result`s
/// small.
#[derive(Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_kms_provider(message: impl Into<String>) -> Self {
        ErrorKind::InvalidKmsProvider {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_schema(message: impl Into<String>) -> Self {
        ErrorKind::InvalidSchema {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn unexpected_result(message: impl Into<String>) -> Self {
        ErrorKind::UnexpectedResult {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn driver(step: Step, source: mongodb::error::Error) -> Self {
        ErrorKind::Driver { step, source }.into()
    }

    /// The step of the walkthrough that failed, if this error came from the driver.
    pub fn step(&self) -> Option<Step> {
        match self.kind.as_ref() {
            ErrorKind::Driver { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether this error was raised by libmongocrypt, e.g. a value outside the declared range
    /// bounds, a type mismatch, or a key that cannot be resolved.
    pub fn is_encryption_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Driver { source, .. }
                if matches!(*source.kind, mongodb::error::ErrorKind::Encryption(_))
        )
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Self {
            kind: Box::new(err.into()),
        }
    }
}

/// The types of errors that can occur.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument or configuration value was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// The KMS credentials file could not be read.
    #[error("Unable to read KMS credentials file {}: {source}", .path.display())]
    #[non_exhaustive]
    CredentialsFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The KMS credentials file is not valid JSON.
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The input is valid JSON but not valid extended JSON.
    #[error("Malformed extended JSON: {0}")]
    ExtJson(#[from] bson::extjson::de::Error),

    /// A KMS provider entry or master key is missing fields or otherwise invalid.
    #[error("Invalid KMS provider configuration: {message}")]
    #[non_exhaustive]
    InvalidKmsProvider { message: String },

    /// The encrypted-fields schema failed validation.
    #[error("Invalid encrypted fields schema: {message}")]
    #[non_exhaustive]
    InvalidSchema { message: String },

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(#[from] bson::ser::Error),

    /// A step succeeded but returned something other than what the walkthrough expects.
    #[error("Unexpected result: {message}")]
    #[non_exhaustive]
    UnexpectedResult { message: String },

    /// An error returned by the driver or libmongocrypt while performing a step.
    #[error("{step} failed: {source}")]
    #[non_exhaustive]
    Driver {
        step: Step,
        source: mongodb::error::Error,
    },
}

/// A step of the walkthrough that calls into the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Step {
    /// Opening a client and checking the deployment is reachable.
    Connect,
    /// Creating a data encryption key in the key vault.
    CreateDataKey,
    /// Explicitly encrypting a value.
    Encrypt,
    /// Explicitly decrypting a ciphertext.
    Decrypt,
    /// Dropping the encrypted collection and its metadata collections.
    DropCollection,
    /// Creating the encrypted collection.
    CreateCollection,
    /// Inserting a document through the automatic-encryption client.
    Insert,
    /// Querying through the automatic-encryption client.
    Find,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Connect => "Connect",
            Step::CreateDataKey => "CreateDataKey",
            Step::Encrypt => "Encrypt",
            Step::Decrypt => "Decrypt",
            Step::DropCollection => "Drop",
            Step::CreateCollection => "CreateCollection",
            Step::Insert => "InsertOne",
            Step::Find => "Find",
        };
        f.write_str(name)
    }
}

/// Tags driver errors with the step that produced them.
pub(crate) trait StepContext<T> {
    fn during(self, step: Step) -> Result<T>;
}

impl<T> StepContext<T> for mongodb::error::Result<T> {
    fn during(self, step: Step) -> Result<T> {
        self.map_err(|source| Error::driver(step, source))
    }
}
