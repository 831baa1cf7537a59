mod csfle;
mod util;

pub(crate) use self::util::{
    fixture_path,
    invalid_kms_provider_message,
    invalid_schema_message,
    live_config,
    test_key_id,
    LIVE_LOCK,
};
