//! A walkthrough of MongoDB in-use encryption with a range-queryable field, built on the
//! official Rust driver's `in-use-encryption` support.
//!
//! The steps, in order:
//!
//! 1. Load KMS provider credentials from an extended JSON file ([`kms::KmsProviders`]).
//! 2. Connect a key-vault client and build a `ClientEncryption` ([`key_vault::KeyVault`]).
//! 3. Create a data key under the selected KMS provider.
//! 4. Explicitly encrypt an int32 with the range algorithm and decrypt it again.
//! 5. Declare the encrypted-fields schema for `db.coll` ([`schema::EncryptedCollection`]).
//! 6. Connect a client configured for automatic encryption with that schema
//!    ([`encrypted_client::EncryptedClient`]) and create the collection with the same schema.
//! 7. Insert `{ encryptedInt: <value> }` and read it back with a `$lte` query; the driver
//!    encrypts and decrypts the field transparently.
//!
//! [`run::run`] performs all of them and shuts both clients down whether or not a step failed.
//!
//! # Requirements
//! - A MongoDB 8.0+ replica set or sharded cluster (queryable encryption is not available on
//!   standalone servers).
//! - libmongocrypt, and either the crypt_shared library or mongocryptd for automatic encryption.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use csfle_range_demo::{kms::KmsProviders, options::Config, run::run};
//! use mongodb::options::ClientOptions;
//!
//! let config = Config::builder()
//!     .client_options(ClientOptions::parse("mongodb://localhost:27017").await?)
//!     .kms_providers(KmsProviders::from_file("/path/to/kms_providers.json")?)
//!     .build();
//! let report = run(&config).await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod encrypted_client;
pub mod error;
pub mod key_vault;
pub mod kms;
pub mod options;
pub mod run;
pub mod schema;
pub mod trace;

#[cfg(test)]
mod test;

pub use crate::{
    encrypted_client::{EncryptedClient, EncryptedCollectionHandle},
    error::{Error, ErrorKind, Result, Step},
    key_vault::KeyVault,
    options::{Config, Options},
    run::{run, Report},
    schema::EncryptedCollection,
};
