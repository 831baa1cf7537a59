//! A client configured for automatic encryption of one collection's declared fields.
//!
//! Inserts and queries are only reachable through the [`EncryptedCollectionHandle`] returned by
//! [`EncryptedClient::create_collection`], and the client itself can only be built from a
//! validated [`EncryptedCollection`], so the schema is always declared before the collection is
//! created and the collection is always created before it is used.

use futures_util::TryStreamExt;
use mongodb::{
    bson::{Bson, Document},
    options::ClientOptions,
    Client,
    Collection,
    Namespace,
};
use tracing::debug;

use crate::{
    error::{Error, Result, Step, StepContext},
    key_vault::ping,
    kms::KmsProviders,
    schema::EncryptedCollection,
    trace::TracingRepresentation,
};

/// A client that transparently encrypts writes to, and decrypts reads from, the declared fields
/// of one collection.
pub struct EncryptedClient {
    client: Client,
    schema: EncryptedCollection,
}

impl EncryptedClient {
    /// Builds an automatic-encryption client whose `encrypted_fields_map` is taken from `schema`.
    /// `extra_options` is passed through to libmongocrypt, e.g. to locate crypt_shared.
    pub async fn connect(
        client_options: ClientOptions,
        key_vault_namespace: Namespace,
        kms_providers: &KmsProviders,
        schema: EncryptedCollection,
        extra_options: Option<Document>,
    ) -> Result<Self> {
        let providers = kms_providers.driver_providers()?;
        let client = Client::encrypted_builder(client_options, key_vault_namespace, providers)
            .during(Step::Connect)?
            .encrypted_fields_map(schema.encrypted_fields_map())
            .extra_options(extra_options)
            .build()
            .await
            .during(Step::Connect)?;
        if let Err(e) = ping(&client).await {
            client.shutdown().await;
            return Err(e);
        }
        debug!(
            namespace = %schema.namespace(),
            encrypted_fields = %schema.encrypted_fields().tracing_representation(),
            "automatic encryption client connected"
        );
        Ok(Self { client, schema })
    }

    /// The schema this client encrypts with.
    pub fn schema(&self) -> &EncryptedCollection {
        &self.schema
    }

    /// Drops the collection and recreates it, both with the same `encryptedFields` this client
    /// was configured with, so the server's metadata collections and range index match what the
    /// client will send.
    pub async fn create_collection(&self) -> Result<EncryptedCollectionHandle> {
        let namespace = self.schema.namespace();
        let db = self.client.database(&namespace.db);
        let coll = db.collection::<Document>(&namespace.coll);

        coll.drop()
            .encrypted_fields(self.schema.encrypted_fields().clone())
            .await
            .during(Step::DropCollection)?;
        db.create_collection(&namespace.coll)
            .encrypted_fields(self.schema.encrypted_fields().clone())
            .await
            .during(Step::CreateCollection)?;
        debug!(namespace = %namespace, "created encrypted collection");

        Ok(EncryptedCollectionHandle { coll })
    }

    /// Shuts the client down. Any handle returned by [`EncryptedClient::create_collection`] stops
    /// working.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
        debug!("automatic encryption client shut down");
    }
}

/// An encrypted collection that has been created with its schema and can be written and read.
#[derive(Clone, Debug)]
pub struct EncryptedCollectionHandle {
    coll: Collection<Document>,
}

impl EncryptedCollectionHandle {
    /// Inserts a plaintext document; declared fields are encrypted before they leave the client.
    /// Returns the inserted `_id`.
    pub async fn insert_one(&self, doc: Document) -> Result<Bson> {
        let result = self.coll.insert_one(doc).await.during(Step::Insert)?;
        debug!(
            inserted_id = %result.inserted_id.tracing_representation(),
            "inserted document"
        );
        Ok(result.inserted_id)
    }

    /// Runs `filter`, which may compare declared fields, and returns the matching documents with
    /// those fields decrypted.
    pub async fn find(&self, filter: Document) -> Result<Vec<Document>> {
        let docs: Vec<Document> = self
            .coll
            .find(filter)
            .await
            .during(Step::Find)?
            .try_collect()
            .await
            .during(Step::Find)?;
        debug!(count = docs.len(), "query returned");
        Ok(docs)
    }

    /// Like [`EncryptedCollectionHandle::find`], but returns exactly one document or an error.
    pub async fn find_exactly_one(&self, filter: Document) -> Result<Document> {
        let mut docs = self.find(filter).await?;
        match docs.len() {
            1 => Ok(docs.remove(0)),
            n => Err(Error::unexpected_result(format!(
                "expected exactly one matching document, found {}",
                n
            ))),
        }
    }
}
