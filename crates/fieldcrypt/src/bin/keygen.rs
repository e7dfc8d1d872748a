//! `fieldcrypt-keygen`: print a fresh key entry for `ENCRYPTION_KEYS`.
//!
//! Usage: `fieldcrypt-keygen [KEY_ID]`
//!
//! Without an argument the id is `k<YYYYMMDD>-<8 hex chars>`. The output is a
//! single `id=base64:<material>` line; append it to `ENCRYPTION_KEYS` and set
//! `ACTIVE_KEY_ID` to rotate.

use anyhow::{Context, Result};
use chrono::Utc;

use fieldcrypt::keys::{validate_key_id, KeyRecord};

fn main() -> Result<()> {
    let key_id = match std::env::args().nth(1) {
        Some(id) => id,
        None => default_key_id(),
    };
    validate_key_id(&key_id).with_context(|| format!("invalid key id {key_id:?}"))?;

    let record = KeyRecord::generate(key_id).context("failed to generate key")?;
    println!("{}=base64:{}", record.key_id(), record.material().to_base64());
    Ok(())
}

fn default_key_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("k{}-{}", Utc::now().format("%Y%m%d"), &suffix[..8])
}
