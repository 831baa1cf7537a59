//! The key-vault client and the explicit-encryption helper bound to it.

use mongodb::{
    bson::{doc, Binary, RawBson},
    client_encryption::ClientEncryption,
    options::ClientOptions,
    Client,
    Namespace,
};
use tracing::debug;

use crate::{
    error::{Result, Step, StepContext},
    kms::{KmsProviders, MasterKeySpec},
    schema::ExplicitEncryption,
    trace::TracingRepresentation,
};

/// A connection to the deployment holding the key vault, plus the `ClientEncryption` that creates
/// data keys in it and explicitly encrypts and decrypts values with them.
///
/// Call [`KeyVault::shutdown`] when done; dropping the value leaves connection cleanup to the
/// driver's background tasks.
pub struct KeyVault {
    client: Client,
    encryption: ClientEncryption,
    namespace: Namespace,
}

impl KeyVault {
    /// Connects, checks the deployment answers a `ping`, and builds the encryption helper.
    pub async fn connect(
        client_options: ClientOptions,
        namespace: Namespace,
        kms_providers: &KmsProviders,
    ) -> Result<Self> {
        let client = Client::with_options(client_options).during(Step::Connect)?;
        if let Err(e) = ping(&client).await {
            client.shutdown().await;
            return Err(e);
        }
        let encryption = match kms_providers.driver_providers().and_then(|providers| {
            ClientEncryption::new(client.clone(), namespace.clone(), providers)
                .during(Step::Connect)
        }) {
            Ok(encryption) => encryption,
            Err(e) => {
                client.shutdown().await;
                return Err(e);
            }
        };
        debug!(key_vault = %namespace, "key vault client connected");
        Ok(Self {
            client,
            encryption,
            namespace,
        })
    }

    /// The key-vault namespace data keys are stored in.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Creates a data key wrapped by `master_key` and inserts it into the key vault, returning
    /// its UUID.
    pub async fn create_data_key(&self, master_key: &MasterKeySpec) -> Result<Binary> {
        let key_id = self
            .encryption
            .create_data_key(master_key.to_master_key())
            .await
            .during(Step::CreateDataKey)?;
        debug!(
            provider = %master_key.kind(),
            key_id = %key_id.tracing_representation(),
            "created data key"
        );
        Ok(key_id)
    }

    /// Explicitly encrypts `value` with the settings derived from a field's declared schema.
    pub async fn encrypt(
        &self,
        value: impl Into<RawBson>,
        settings: &ExplicitEncryption,
    ) -> Result<Binary> {
        let mut action = self.encryption.encrypt(
            value,
            settings.key_id.clone(),
            settings.algorithm.clone(),
        );
        if let Some(factor) = settings.contention_factor {
            action = action.contention_factor(factor);
        }
        if let Some(range_options) = &settings.range_options {
            action = action.range_options(range_options.clone());
        }
        let ciphertext = action.await.during(Step::Encrypt)?;
        debug!(bytes = ciphertext.bytes.len(), "encrypted value");
        Ok(ciphertext)
    }

    /// Explicitly decrypts a ciphertext produced by [`KeyVault::encrypt`] or stored by an
    /// automatic-encryption client.
    pub async fn decrypt(&self, ciphertext: &Binary) -> Result<RawBson> {
        self.encryption
            .decrypt(ciphertext.as_raw_binary())
            .await
            .during(Step::Decrypt)
    }

    /// Drops the encryption helper and shuts the client down.
    pub async fn shutdown(self) {
        let Self {
            client, encryption, ..
        } = self;
        drop(encryption);
        client.shutdown().await;
        debug!("key vault client shut down");
    }
}

pub(crate) async fn ping(client: &Client) -> Result<()> {
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .during(Step::Connect)?;
    Ok(())
}
