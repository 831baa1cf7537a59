//! Command line options and the configuration resolved from them.
//!
//! Every option can also be given through an environment variable, matching the variables the
//! other drivers' versions of this walkthrough read (`MONGODB_URI`, `KMS_PROVIDERS_PATH`).

use std::path::{Path, PathBuf};

use clap::Parser;
use mongodb::{
    bson::{doc, Document},
    options::ClientOptions,
    Namespace,
};
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    kms::{KmsProviderKind, KmsProviders, MasterKeySpec},
};

/// Connection string used when `MONGODB_URI` is unset.
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// The value encrypted, inserted and queried when `--value` is not given.
pub const DEFAULT_PLAINTEXT: i32 = 123;

const APP_NAME: &str = "csfle-range-demo";

/// The namespace holding data keys.
pub fn default_key_vault_namespace() -> Namespace {
    Namespace::new("keyvault", "datakeys")
}

/// Walk through explicit and automatic range-queryable encryption against a MongoDB deployment.
///
/// An empty `MONGODB_URI` or `KMS_PROVIDERS_PATH` counts as unset.
#[derive(Clone, Debug, Parser)]
#[command(name = "csfle-range-demo", version, about, long_about = None)]
pub struct Options {
    /// Connection string of the deployment. [default: mongodb://localhost:27017]
    #[arg(long, env = "MONGODB_URI")]
    pub uri: Option<String>,

    /// Extended JSON file mapping KMS provider names to credentials.
    /// [default: ~/.csfle/kms_providers.json]
    #[arg(long, env = "KMS_PROVIDERS_PATH")]
    pub kms_providers_path: Option<String>,

    /// KMS provider whose master key wraps the new data key.
    #[arg(long, env = "KMS_PROVIDER", default_value_t = KmsProviderKind::Local)]
    pub kms_provider: KmsProviderKind,

    /// Extended JSON master key document, required for the aws, azure and gcp providers,
    /// e.g. '{"region": "us-east-1", "key": "arn:aws:kms:..."}'.
    #[arg(long, env = "CSFLE_MASTER_KEY")]
    pub master_key: Option<String>,

    /// Path to the crypt_shared library used for automatic encryption. Without it the driver
    /// searches the system library path and falls back to spawning mongocryptd.
    #[arg(long, env = "CRYPT_SHARED_LIB_PATH")]
    pub crypt_shared_lib_path: Option<PathBuf>,

    /// The int32 value to encrypt, insert and query for.
    #[arg(long, default_value_t = DEFAULT_PLAINTEXT, allow_negative_numbers = true)]
    pub value: i32,
}

impl Options {
    /// The connection string, or [`DEFAULT_URI`] when none or an empty one was given.
    pub fn uri(&self) -> &str {
        non_empty(&self.uri).unwrap_or(DEFAULT_URI)
    }

    /// The credentials file path: the given one with a leading `~` expanded, or
    /// `~/.csfle/kms_providers.json` when none or an empty one was given.
    pub fn kms_providers_path(&self) -> Result<PathBuf> {
        match non_empty(&self.kms_providers_path) {
            Some(path) => expand_home(Path::new(path)),
            None => Ok(home_dir()?.join(".csfle").join("kms_providers.json")),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn home_dir() -> Result<PathBuf> {
    home::home_dir().ok_or_else(|| {
        Error::invalid_argument("unable to determine the home directory; set KMS_PROVIDERS_PATH")
    })
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_dir()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Everything the walkthrough needs, resolved and validated before any connection is opened.
#[derive(Clone, Debug, TypedBuilder)]
#[non_exhaustive]
pub struct Config {
    pub client_options: ClientOptions,

    #[builder(default = default_key_vault_namespace())]
    pub key_vault_namespace: Namespace,

    pub kms_providers: KmsProviders,

    #[builder(default = MasterKeySpec::Local)]
    pub master_key: MasterKeySpec,

    /// Extra options for the automatic-encryption client, e.g. `cryptSharedLibPath`.
    #[builder(default, setter(strip_option))]
    pub extra_options: Option<Document>,

    #[builder(default = DEFAULT_PLAINTEXT)]
    pub value: i32,
}

impl Config {
    /// Loads the credentials file and checks it against the selected provider and master key.
    /// Nothing here touches the database, so a bad credentials path fails before any write.
    pub async fn load(options: &Options) -> Result<Self> {
        let path = options.kms_providers_path()?;
        let kms_providers = KmsProviders::from_file(&path)?;
        tracing::debug!(
            path = %path.display(),
            providers = ?kms_providers.kinds().collect::<Vec<_>>(),
            "loaded KMS providers"
        );

        let master_key =
            MasterKeySpec::from_ext_json(options.kms_provider, options.master_key.as_deref())?;
        if kms_providers.get(master_key.kind()).is_none() {
            return Err(Error::invalid_argument(format!(
                "KMS provider {} is not configured in {}",
                master_key.kind(),
                path.display()
            )));
        }

        let mut client_options = ClientOptions::parse(options.uri())
            .await
            .map_err(|e| Error::invalid_argument(format!("invalid connection string: {}", e)))?;
        if client_options.app_name.is_none() {
            client_options.app_name = Some(APP_NAME.to_string());
        }

        let extra_options = options
            .crypt_shared_lib_path
            .as_ref()
            .map(|p| doc! { "cryptSharedLibPath": p.to_string_lossy().into_owned() });

        Ok(Self {
            client_options,
            key_vault_namespace: default_key_vault_namespace(),
            kms_providers,
            master_key,
            extra_options,
            value: options.value,
        })
    }
}
