//! The walkthrough: data key, explicit encrypt/decrypt, encrypted collection, automatic
//! encryption and decryption.

use std::{fmt, future::Future};

use mongodb::{
    bson::{doc, Binary, Bson, Document, RawBson},
    Namespace,
};
use tracing::{info, info_span, warn, Instrument};

use crate::{
    encrypted_client::EncryptedClient,
    error::Result,
    key_vault::KeyVault,
    options::Config,
    schema::{EncryptedCollection, EncryptedField, FieldType, RangeQuery},
    trace::TracingRepresentation,
};

/// The encrypted field of the target collection.
pub const ENCRYPTED_FIELD: &str = "encryptedInt";

/// Lower bound of the range index on [`ENCRYPTED_FIELD`].
pub const RANGE_MIN: i32 = 0;

/// Upper bound of the range index on [`ENCRYPTED_FIELD`].
pub const RANGE_MAX: i32 = 200;

const SPARSITY: i64 = 1;
const CONTENTION: i64 = 0;

/// The collection the walkthrough creates and writes to.
pub fn target_namespace() -> Namespace {
    Namespace::new("db", "coll")
}

/// The schema for `db.coll`: `encryptedInt` as an int32 under `key_id`, range-queryable over
/// `[0, 200]` with sparsity 1 and contention 0.
pub fn walkthrough_schema(key_id: Binary) -> Result<EncryptedCollection> {
    let query = RangeQuery::builder()
        .contention(CONTENTION)
        .sparsity(SPARSITY)
        .min(Bson::Int32(RANGE_MIN))
        .max(Bson::Int32(RANGE_MAX))
        .build();
    let field = EncryptedField::builder()
        .key_id(key_id)
        .path(ENCRYPTED_FIELD)
        .bson_type(FieldType::Int)
        .queries(vec![query])
        .build();
    EncryptedCollection::new(target_namespace(), vec![field])
}

/// What each step of the walkthrough produced.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Report {
    /// UUID of the data key created in the key vault.
    pub key_id: Binary,
    /// Explicitly encrypted value.
    pub ciphertext: Binary,
    /// The ciphertext explicitly decrypted again.
    pub decrypted: RawBson,
    /// `_id` of the document inserted through the automatic-encryption client.
    pub inserted_id: Bson,
    /// The document read back through the automatic-encryption client, decrypted.
    pub found: Document,
}

impl Report {
    /// Hex encoding of the data key UUID.
    pub fn key_id_hex(&self) -> String {
        hex::encode(&self.key_id.bytes)
    }

    /// Hex encoding of the explicit ciphertext.
    pub fn ciphertext_hex(&self) -> String {
        hex::encode(&self.ciphertext.bytes)
    }

    /// The decrypted plaintext as canonical extended JSON, e.g. `{"$numberInt":"123"}`.
    pub fn decrypted_ext_json(&self) -> String {
        match Bson::try_from(self.decrypted.clone()) {
            Ok(bson) => bson.into_canonical_extjson().to_string(),
            Err(_) => format!("{:?}", self.decrypted),
        }
    }

    /// The found document as canonical extended JSON.
    pub fn found_ext_json(&self) -> String {
        Bson::Document(self.found.clone())
            .into_canonical_extjson()
            .to_string()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Created key with a UUID: {}", self.key_id_hex())?;
        writeln!(f, "Explicitly encrypted to ciphertext: {}", self.ciphertext_hex())?;
        writeln!(
            f,
            "Explicitly decrypted to plaintext: {}",
            self.decrypted_ext_json()
        )?;
        write!(f, "Decrypted document: {}", self.found_ext_json())
    }
}

/// Runs every step against the configured deployment. Both clients are shut down before this
/// returns, whether or not a step failed.
pub async fn run(config: &Config) -> Result<Report> {
    let key_vault = KeyVault::connect(
        config.client_options.clone(),
        config.key_vault_namespace.clone(),
        &config.kms_providers,
    )
    .instrument(info_span!("connect", client = "key_vault"))
    .await?;

    let result = with_key_vault(config, &key_vault).await;
    key_vault.shutdown().await;
    result
}

async fn with_key_vault(config: &Config, key_vault: &KeyVault) -> Result<Report> {
    let key_id = step("CreateDataKey", key_vault.create_data_key(&config.master_key)).await?;
    info!(key_id = %key_id.tracing_representation(), "created data key");

    // Explicit-encryption options and the collection's encryptedFields both come from this value.
    let schema = walkthrough_schema(key_id.clone())?;
    let settings = schema.explicit_encryption(ENCRYPTED_FIELD)?;
    let value = Bson::Int32(config.value);
    if let Some(false) = schema
        .field(ENCRYPTED_FIELD)
        .and_then(|f| f.range_query())
        .and_then(|q| q.contains(&value))
    {
        warn!(
            value = config.value,
            min = RANGE_MIN,
            max = RANGE_MAX,
            "value lies outside the declared range; libmongocrypt is expected to reject it"
        );
    }

    let ciphertext = step(
        "Encrypt with range",
        key_vault.encrypt(config.value, &settings),
    )
    .await?;
    info!(ciphertext = %ciphertext.tracing_representation(), "explicitly encrypted");

    let decrypted = step("Decrypt", key_vault.decrypt(&ciphertext)).await?;
    info!(plaintext = %decrypted.tracing_representation(), "explicitly decrypted");

    let encrypted_client = EncryptedClient::connect(
        config.client_options.clone(),
        config.key_vault_namespace.clone(),
        &config.kms_providers,
        schema,
        config.extra_options.clone(),
    )
    .instrument(info_span!("connect", client = "auto_encryption"))
    .await?;

    let result = with_encrypted_client(config, &encrypted_client).await;
    encrypted_client.shutdown().await;
    let (inserted_id, found) = result?;

    Ok(Report {
        key_id,
        ciphertext,
        decrypted,
        inserted_id,
        found,
    })
}

async fn with_encrypted_client(
    config: &Config,
    client: &EncryptedClient,
) -> Result<(Bson, Document)> {
    let namespace = client.schema().namespace().to_string();
    let coll = step(
        &format!("Create encrypted collection {}", namespace),
        client.create_collection(),
    )
    .await?;

    let inserted_id = step(
        "Automatic encryption",
        coll.insert_one(doc! { ENCRYPTED_FIELD: config.value }),
    )
    .await?;

    let found = step(
        "Automatic decryption",
        coll.find_exactly_one(doc! { ENCRYPTED_FIELD: { "$lte": config.value } }),
    )
    .await?;
    info!(document = %found.tracing_representation(), "found document");

    Ok((inserted_id, found))
}

/// Logs begin/end markers around one step of the walkthrough.
async fn step<T>(name: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    info!("{}... begin", name);
    let result = fut.instrument(info_span!("step", name)).await;
    match &result {
        Ok(_) => info!("{}... end", name),
        Err(e) => tracing::error!(error = %e, "{}... failed", name),
    }
    result
}
