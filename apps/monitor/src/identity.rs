//! Dashboard identity for the monitor process.

use std::fmt::Write;

use anyhow::Context;

use gymops_protocol::{Identity, Role};

/// Builds the identity from `GYMOPS_USER_ID` and `GYMOPS_ROLE` (default
/// `admin`), with a client id stable per machine.
pub fn from_env() -> anyhow::Result<Identity> {
    let user_id = std::env::var("GYMOPS_USER_ID").context("GYMOPS_USER_ID is not set")?;
    let role = match std::env::var("GYMOPS_ROLE") {
        Ok(raw) => raw.parse::<Role>().map_err(anyhow::Error::msg)?,
        Err(_) => Role::Admin,
    };
    Ok(Identity {
        user_id,
        role,
        client_id: default_client_id(),
    })
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "gymops-monitor".into())
}

/// First 4 bytes of SHA-256 over hostname and OS, hex encoded.
pub fn default_client_id() -> String {
    client_id_for(&hostname(), std::env::consts::OS)
}

fn client_id_for(hostname: &str, platform: &str) -> String {
    let data = format!("{hostname}-{platform}-monitor");
    let digest = <sha2::Sha256 as sha2::Digest>::digest(data.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in &digest[..4] {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
