use std::path::PathBuf;

use mongodb::{
    bson::{doc, spec::BinarySubtype, Binary, Bson},
    options::ClientOptions,
    Client,
    Namespace,
};
use rand::Rng;

use crate::{
    error::{Error, ErrorKind},
    kms::{KmsProviders, LOCAL_MASTER_KEY_LEN},
    options::Config,
};

/// Held by tests that create and write to `db.coll`, which every walkthrough recreates.
pub(crate) static LIVE_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

pub(crate) fn log_uncaptured<S: AsRef<str>>(text: S) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    stderr.write_all(text.as_ref().as_bytes()).unwrap();
    stderr.write_all(b"\n").unwrap();
}

pub(crate) fn fixture_path(name: &str) -> PathBuf {
    [env!("CARGO_MANIFEST_DIR"), "tests", "data", name]
        .iter()
        .collect()
}

pub(crate) fn test_key_id() -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: (0u8..16).collect(),
    }
}

pub(crate) fn invalid_kms_provider_message(err: Error) -> String {
    match *err.kind {
        ErrorKind::InvalidKmsProvider { message, .. } => message,
        other => panic!("expected InvalidKmsProvider, got {:?}", other),
    }
}

pub(crate) fn invalid_schema_message(err: Error) -> String {
    match *err.kind {
        ErrorKind::InvalidSchema { message, .. } => message,
        other => panic!("expected InvalidSchema, got {:?}", other),
    }
}

/// A configuration for running against the deployment in `MONGODB_URI` with a fresh random local
/// master key and a key vault collection of its own. `None` (after logging why) when no
/// deployment is configured or it cannot host queryable encryption.
pub(crate) async fn live_config(test: &str, value: i32) -> Option<Config> {
    let Ok(uri) = std::env::var("MONGODB_URI") else {
        log_uncaptured(format!("Skipping {} because MONGODB_URI is not set", test));
        return None;
    };
    let client_options = ClientOptions::parse(&uri).await.unwrap();
    if !supports_queryable_encryption(&client_options).await {
        log_uncaptured(format!("Skipping {} due to unsupported topology", test));
        return None;
    }

    let mut key = vec![0u8; LOCAL_MASTER_KEY_LEN];
    rand::rng().fill(&mut key[..]);

    let builder = Config::builder()
        .client_options(client_options)
        .key_vault_namespace(Namespace::new("keyvault", format!("datakeys_{}", test)))
        .kms_providers(KmsProviders::local(key).unwrap())
        .value(value);
    Some(match std::env::var("CRYPT_SHARED_LIB_PATH") {
        Ok(path) => builder
            .extra_options(doc! { "cryptSharedLibPath": path })
            .build(),
        Err(_) => builder.build(),
    })
}

// Range queries need an 8.0+ replica set or sharded cluster.
async fn supports_queryable_encryption(client_options: &ClientOptions) -> bool {
    let client = Client::with_options(client_options.clone()).unwrap();
    let (build_info, hello) = {
        let admin = client.database("admin");
        let build_info = admin.run_command(doc! { "buildInfo": 1 }).await.unwrap();
        let hello = admin.run_command(doc! { "hello": 1 }).await.unwrap();
        (build_info, hello)
    };
    client.shutdown().await;

    let major = build_info
        .get_array("versionArray")
        .ok()
        .and_then(|version| version.first())
        .and_then(Bson::as_i32)
        .unwrap_or(0);
    let standalone =
        !hello.contains_key("setName") && hello.get_str("msg").ok() != Some("isdbgrid");
    major >= 8 && !standalone
}
