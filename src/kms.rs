//! KMS provider credentials and master key descriptions.
//!
//! The credentials file is an extended JSON document mapping a provider name to that provider's
//! credential fields, e.g.
//!
//! ```json
//! { "local": { "key": { "$binary": { "base64": "...", "subType": "00" } } } }
//! ```
//!
//! Every entry is parsed into a typed record so a misspelled field or a truncated local key is
//! reported here rather than from inside libmongocrypt.

use std::{collections::BTreeMap, fmt, fs, path::Path, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine};
use mongodb::{
    bson::{self, doc, spec::BinarySubtype, Binary, Bson, Document},
    client_encryption::{
        AwsMasterKey,
        AzureMasterKey,
        GcpMasterKey,
        KmipMasterKey,
        LocalMasterKey,
        MasterKey,
    },
    mongocrypt::ctx::KmsProvider,
    options::TlsOptions,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::{Error, ErrorKind, Result};

/// Length in bytes of a local master key.
pub const LOCAL_MASTER_KEY_LEN: usize = 96;

/// The KMS providers understood by libmongocrypt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum KmsProviderKind {
    /// A master key held locally, read from the credentials file.
    Local,
    /// AWS KMS.
    Aws,
    /// Azure Key Vault.
    Azure,
    /// Google Cloud KMS.
    Gcp,
    /// A KMIP-compliant key management server.
    Kmip,
}

impl KmsProviderKind {
    /// The name used for this provider in credentials documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::Kmip => "kmip",
        }
    }

    pub(crate) fn driver_provider(&self) -> KmsProvider {
        match self {
            Self::Local => KmsProvider::local(),
            Self::Aws => KmsProvider::aws(),
            Self::Azure => KmsProvider::azure(),
            Self::Gcp => KmsProvider::gcp(),
            Self::Kmip => KmsProvider::kmip(),
        }
    }
}

impl fmt::Display for KmsProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KmsProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            "kmip" => Ok(Self::Kmip),
            named if named.contains(':') => Err(Error::invalid_kms_provider(format!(
                "named KMS providers are not supported: {:?}",
                named
            ))),
            other => Err(Error::invalid_kms_provider(format!(
                "unknown KMS provider {:?}, expected one of local, aws, azure, gcp, kmip",
                other
            ))),
        }
    }
}

/// Credentials for the `local` provider: a 96-byte master key.
#[derive(Clone, PartialEq)]
pub struct LocalCredentials {
    key: Binary,
}

impl LocalCredentials {
    /// Wraps raw key bytes, checking the length.
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = key.into();
        if bytes.len() != LOCAL_MASTER_KEY_LEN {
            return Err(Error::invalid_kms_provider(format!(
                "local: master key must be {} bytes, got {}",
                LOCAL_MASTER_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            key: Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            },
        })
    }

    /// The master key.
    pub fn key(&self) -> &Binary {
        &self.key
    }

    // The key may be written as `$binary` or as a plain base64 string.
    fn from_document(doc: &Document) -> Result<Self> {
        if let Some(extra) = doc.keys().find(|k| k.as_str() != "key") {
            return Err(Error::invalid_kms_provider(format!(
                "local: unknown field {:?}",
                extra
            )));
        }
        match doc.get("key") {
            Some(Bson::Binary(bin)) => Self::new(bin.bytes.clone()),
            Some(Bson::String(encoded)) => {
                let bytes = STANDARD.decode(encoded).map_err(|e| {
                    Error::invalid_kms_provider(format!("local: key is not valid base64: {}", e))
                })?;
                Self::new(bytes)
            }
            Some(other) => Err(Error::invalid_kms_provider(format!(
                "local: key must be binary or a base64 string, got {:?}",
                other.element_type()
            ))),
            None => Err(Error::invalid_kms_provider("local: missing field \"key\"")),
        }
    }

    fn to_document(&self) -> Document {
        doc! { "key": self.key.clone() }
    }
}

impl fmt::Debug for LocalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCredentials").finish_non_exhaustive()
    }
}

/// Credentials for AWS KMS.
#[skip_serializing_none]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Credentials for Azure Key Vault.
#[skip_serializing_none]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub identity_platform_endpoint: Option<String>,
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field(
                "identity_platform_endpoint",
                &self.identity_platform_endpoint,
            )
            .finish_non_exhaustive()
    }
}

/// Credentials for Google Cloud KMS.
#[skip_serializing_none]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct GcpCredentials {
    pub email: String,
    /// Base64-encoded PKCS#8 private key.
    pub private_key: String,
    pub endpoint: Option<String>,
}

impl fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("email", &self.email)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Connection details for a KMIP server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct KmipCredentials {
    pub endpoint: String,
}

/// The credentials configured for one KMS provider.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum KmsCredentials {
    Local(LocalCredentials),
    Aws(AwsCredentials),
    Azure(AzureCredentials),
    Gcp(GcpCredentials),
    Kmip(KmipCredentials),
}

impl KmsCredentials {
    /// The provider these credentials belong to.
    pub fn kind(&self) -> KmsProviderKind {
        match self {
            Self::Local(_) => KmsProviderKind::Local,
            Self::Aws(_) => KmsProviderKind::Aws,
            Self::Azure(_) => KmsProviderKind::Azure,
            Self::Gcp(_) => KmsProviderKind::Gcp,
            Self::Kmip(_) => KmsProviderKind::Kmip,
        }
    }

    fn parse(kind: KmsProviderKind, doc: Document) -> Result<Self> {
        Ok(match kind {
            KmsProviderKind::Local => Self::Local(LocalCredentials::from_document(&doc)?),
            KmsProviderKind::Aws => Self::Aws(typed(kind, doc)?),
            KmsProviderKind::Azure => Self::Azure(typed(kind, doc)?),
            KmsProviderKind::Gcp => Self::Gcp(typed(kind, doc)?),
            KmsProviderKind::Kmip => Self::Kmip(typed(kind, doc)?),
        })
    }

    fn to_document(&self) -> Result<Document> {
        Ok(match self {
            Self::Local(local) => local.to_document(),
            Self::Aws(aws) => bson::to_document(aws)?,
            Self::Azure(azure) => bson::to_document(azure)?,
            Self::Gcp(gcp) => bson::to_document(gcp)?,
            Self::Kmip(kmip) => bson::to_document(kmip)?,
        })
    }
}

fn typed<T: DeserializeOwned>(kind: KmsProviderKind, doc: Document) -> Result<T> {
    bson::from_document(doc).map_err(|e| Error::invalid_kms_provider(format!("{}: {}", kind, e)))
}

/// The set of configured KMS providers, at most one per kind.
#[derive(Clone, Debug, PartialEq)]
pub struct KmsProviders {
    providers: BTreeMap<KmsProviderKind, KmsCredentials>,
}

impl KmsProviders {
    /// Collects credentials, rejecting an empty set or two entries for the same provider.
    pub fn new(credentials: impl IntoIterator<Item = KmsCredentials>) -> Result<Self> {
        let mut providers = BTreeMap::new();
        for creds in credentials {
            let kind = creds.kind();
            if providers.insert(kind, creds).is_some() {
                return Err(Error::invalid_kms_provider(format!(
                    "{} configured more than once",
                    kind
                )));
            }
        }
        if providers.is_empty() {
            return Err(Error::invalid_kms_provider("empty kms_providers"));
        }
        Ok(Self { providers })
    }

    /// A provider set holding only a local master key.
    pub fn local(key: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new([KmsCredentials::Local(LocalCredentials::new(key)?)])
    }

    /// Reads and parses an extended JSON credentials file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ErrorKind::CredentialsFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ext_json(&contents)
    }

    /// Parses an extended JSON credentials document.
    pub fn from_ext_json(input: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(input)?;
        match Bson::try_from(json)? {
            Bson::Document(doc) => Self::from_document(doc),
            other => Err(Error::invalid_kms_provider(format!(
                "expected a document mapping provider names to credentials, got {:?}",
                other.element_type()
            ))),
        }
    }

    /// Parses a credentials document already decoded from extended JSON.
    pub fn from_document(doc: Document) -> Result<Self> {
        let mut credentials = Vec::with_capacity(doc.len());
        for (name, value) in doc {
            let kind: KmsProviderKind = name.parse()?;
            let Bson::Document(provider_doc) = value else {
                return Err(Error::invalid_kms_provider(format!(
                    "{}: expected a document of credentials, got {:?}",
                    kind,
                    value.element_type()
                )));
            };
            credentials.push(KmsCredentials::parse(kind, provider_doc)?);
        }
        Self::new(credentials)
    }

    /// The credentials for `kind`, if configured.
    pub fn get(&self, kind: KmsProviderKind) -> Option<&KmsCredentials> {
        self.providers.get(&kind)
    }

    /// The configured providers, in a stable order.
    pub fn kinds(&self) -> impl Iterator<Item = KmsProviderKind> + '_ {
        self.providers.keys().copied()
    }

    /// The provider triples accepted by `ClientEncryption::new` and `Client::encrypted_builder`.
    pub(crate) fn driver_providers(
        &self,
    ) -> Result<Vec<(KmsProvider, Document, Option<TlsOptions>)>> {
        self.providers
            .iter()
            .map(|(kind, creds)| Ok((kind.driver_provider(), creds.to_document()?, None)))
            .collect()
    }
}

/// Master key location for AWS KMS.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct AwsKeySpec {
    pub region: String,
    /// The key ARN.
    pub key: String,
    pub endpoint: Option<String>,
}

/// Master key location for Azure Key Vault.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct AzureKeySpec {
    pub key_vault_endpoint: String,
    pub key_name: String,
    pub key_version: Option<String>,
}

/// Master key location for Google Cloud KMS.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct GcpKeySpec {
    pub project_id: String,
    pub location: String,
    pub key_ring: String,
    pub key_name: String,
    pub key_version: Option<String>,
    pub endpoint: Option<String>,
}

/// Master key location for a KMIP server. With no `keyId`, the server creates a new managed
/// object.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct KmipKeySpec {
    pub key_id: Option<String>,
    pub endpoint: Option<String>,
}

/// The master key that wraps a newly created data key.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum MasterKeySpec {
    Local,
    Aws(AwsKeySpec),
    Azure(AzureKeySpec),
    Gcp(GcpKeySpec),
    Kmip(KmipKeySpec),
}

impl MasterKeySpec {
    /// The provider this master key lives in.
    pub fn kind(&self) -> KmsProviderKind {
        match self {
            Self::Local => KmsProviderKind::Local,
            Self::Aws(_) => KmsProviderKind::Aws,
            Self::Azure(_) => KmsProviderKind::Azure,
            Self::Gcp(_) => KmsProviderKind::Gcp,
            Self::Kmip(_) => KmsProviderKind::Kmip,
        }
    }

    /// Builds the master key for `kind` from an optional extended JSON document. The local and
    /// KMIP providers need no document; the cloud providers require one.
    pub fn from_ext_json(kind: KmsProviderKind, input: Option<&str>) -> Result<Self> {
        let doc = match input {
            Some(input) => {
                let json: serde_json::Value = serde_json::from_str(input)?;
                match Bson::try_from(json)? {
                    Bson::Document(doc) => Some(doc),
                    other => {
                        return Err(Error::invalid_kms_provider(format!(
                            "{}: master key must be a document, got {:?}",
                            kind,
                            other.element_type()
                        )))
                    }
                }
            }
            None => None,
        };
        Self::from_document(kind, doc)
    }

    fn from_document(kind: KmsProviderKind, doc: Option<Document>) -> Result<Self> {
        let required = |doc: Option<Document>| {
            doc.ok_or_else(|| {
                Error::invalid_kms_provider(format!("{}: a master key document is required", kind))
            })
        };
        Ok(match kind {
            KmsProviderKind::Local => match doc {
                Some(doc) if !doc.is_empty() => {
                    return Err(Error::invalid_kms_provider(
                        "local: the master key is taken from the credentials file and accepts no \
                         options",
                    ))
                }
                _ => Self::Local,
            },
            KmsProviderKind::Aws => Self::Aws(typed(kind, required(doc)?)?),
            KmsProviderKind::Azure => Self::Azure(typed(kind, required(doc)?)?),
            KmsProviderKind::Gcp => Self::Gcp(typed(kind, required(doc)?)?),
            KmsProviderKind::Kmip => Self::Kmip(match doc {
                Some(doc) => typed(kind, doc)?,
                None => KmipKeySpec::default(),
            }),
        })
    }

    pub(crate) fn to_master_key(&self) -> MasterKey {
        match self {
            Self::Local => MasterKey::Local(LocalMasterKey::builder().build()),
            Self::Aws(spec) => MasterKey::Aws(
                AwsMasterKey::builder()
                    .region(spec.region.clone())
                    .key(spec.key.clone())
                    .endpoint(spec.endpoint.clone())
                    .build(),
            ),
            Self::Azure(spec) => MasterKey::Azure(
                AzureMasterKey::builder()
                    .key_vault_endpoint(spec.key_vault_endpoint.clone())
                    .key_name(spec.key_name.clone())
                    .key_version(spec.key_version.clone())
                    .build(),
            ),
            Self::Gcp(spec) => MasterKey::Gcp(
                GcpMasterKey::builder()
                    .project_id(spec.project_id.clone())
                    .location(spec.location.clone())
                    .key_ring(spec.key_ring.clone())
                    .key_name(spec.key_name.clone())
                    .key_version(spec.key_version.clone())
                    .endpoint(spec.endpoint.clone())
                    .build(),
            ),
            Self::Kmip(spec) => MasterKey::Kmip(
                KmipMasterKey::builder()
                    .key_id(spec.key_id.clone())
                    .endpoint(spec.endpoint.clone())
                    .build(),
            ),
        }
    }
}
