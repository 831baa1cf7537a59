//! Tests against the deployment in `MONGODB_URI`. They are skipped when it is unset, older than
//! 8.0, or standalone.

use mongodb::{
    bson::{doc, spec::BinarySubtype, Bson, Document, RawBson},
    Client,
};
use pretty_assertions::assert_eq;

use crate::{
    error::Step,
    key_vault::KeyVault,
    run::{run, walkthrough_schema, ENCRYPTED_FIELD},
    test::{live_config, LIVE_LOCK},
};

#[tokio::test]
async fn walkthrough_end_to_end() -> anyhow::Result<()> {
    let _guard = LIVE_LOCK.lock().await;
    let Some(config) = live_config("walkthrough_end_to_end", 123).await else {
        return Ok(());
    };

    let report = run(&config).await?;
    assert_eq!(report.key_id.subtype, BinarySubtype::Uuid);
    assert_eq!(report.ciphertext.subtype, BinarySubtype::Encrypted);
    assert_eq!(report.decrypted, RawBson::Int32(123));
    assert_eq!(report.decrypted_ext_json(), r#"{"$numberInt":"123"}"#);
    assert_eq!(report.found.get_i32(ENCRYPTED_FIELD)?, 123);
    assert_eq!(report.found.get("_id"), Some(&report.inserted_id));

    // Read back without automatic encryption: the stored field is ciphertext.
    let client = Client::with_options(config.client_options.clone())?;
    let stored = client
        .database("db")
        .collection::<Document>("coll")
        .find_one(doc! { "_id": report.inserted_id.clone() })
        .await?;
    client.shutdown().await;
    match stored.as_ref().and_then(|doc| doc.get(ENCRYPTED_FIELD)) {
        Some(Bson::Binary(bin)) => assert_eq!(bin.subtype, BinarySubtype::Encrypted),
        other => panic!("expected an encrypted value, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn range_bounds_are_inclusive() -> anyhow::Result<()> {
    let _guard = LIVE_LOCK.lock().await;
    for value in [0, 200] {
        let Some(config) = live_config("range_bounds_are_inclusive", value).await else {
            return Ok(());
        };
        let report = run(&config).await?;
        assert_eq!(report.decrypted, RawBson::Int32(value));
        assert_eq!(report.found.get_i32(ENCRYPTED_FIELD)?, value);
    }
    Ok(())
}

#[tokio::test]
async fn value_above_range_rejected() -> anyhow::Result<()> {
    let _guard = LIVE_LOCK.lock().await;
    let Some(config) = live_config("value_above_range_rejected", 201).await else {
        return Ok(());
    };

    let err = run(&config).await.unwrap_err();
    assert!(err.is_encryption_error(), "{:?}", err);
    assert_eq!(err.step(), Some(Step::Encrypt));
    Ok(())
}

#[tokio::test]
async fn explicit_round_trip() -> anyhow::Result<()> {
    let Some(config) = live_config("explicit_round_trip", 0).await else {
        return Ok(());
    };

    let key_vault = KeyVault::connect(
        config.client_options.clone(),
        config.key_vault_namespace.clone(),
        &config.kms_providers,
    )
    .await?;
    assert_eq!(key_vault.namespace(), &config.key_vault_namespace);
    let key_id = key_vault.create_data_key(&config.master_key).await?;
    let settings = walkthrough_schema(key_id)?.explicit_encryption(ENCRYPTED_FIELD)?;

    // The new key is stored in this key vault's collection.
    let namespace = key_vault.namespace();
    let client = Client::with_options(config.client_options.clone())?;
    let stored = client
        .database(&namespace.db)
        .collection::<Document>(&namespace.coll)
        .count_documents(doc! { "_id": settings.key_id.clone() })
        .await?;
    client.shutdown().await;
    assert_eq!(stored, 1);

    let first = key_vault.encrypt(42, &settings).await?;
    let second = key_vault.encrypt(42, &settings).await?;
    assert_ne!(first.bytes, second.bytes);
    assert_eq!(key_vault.decrypt(&first).await?, RawBson::Int32(42));
    assert_eq!(key_vault.decrypt(&second).await?, RawBson::Int32(42));

    key_vault.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn data_key_scoped_to_key_vault() -> anyhow::Result<()> {
    let Some(config) = live_config("data_key_scoped_to_key_vault", 0).await else {
        return Ok(());
    };
    let Some(other) = live_config("data_key_scoped_to_key_vault_other", 0).await else {
        return Ok(());
    };

    let key_vault = KeyVault::connect(
        config.client_options.clone(),
        config.key_vault_namespace.clone(),
        &config.kms_providers,
    )
    .await?;
    let key_id = key_vault.create_data_key(&config.master_key).await?;
    let settings = walkthrough_schema(key_id)?.explicit_encryption(ENCRYPTED_FIELD)?;
    let ciphertext = key_vault.encrypt(7, &settings).await?;
    key_vault.shutdown().await;

    // The data key only exists in the first key vault collection.
    let other_vault = KeyVault::connect(
        other.client_options.clone(),
        other.key_vault_namespace.clone(),
        &other.kms_providers,
    )
    .await?;
    let result = other_vault.decrypt(&ciphertext).await;
    other_vault.shutdown().await;

    let err = result.unwrap_err();
    assert_eq!(err.step(), Some(Step::Decrypt));
    Ok(())
}
