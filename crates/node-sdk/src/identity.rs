//! Node identity derivation.
//!
//! The pc_id is a best-effort stable token: hostname + first hardware
//! address + current Unix seconds, SHA-256 hashed, truncated to 16 hex
//! chars, prefixed `node_`. The time component makes collisions across
//! hosts with identical attributes unlikely, not impossible; callers that
//! need a guaranteed identity supply their own via the builder.

use sha2::{Digest, Sha256};

const ID_PREFIX: &str = "node_";
const ID_HEX_LEN: usize = 16;

/// Generate a pc_id for this host. Stable per process, not across restarts.
pub fn generate_pc_id() -> String {
    let seed = format!(
        "{}_{}_{}",
        hostname(),
        hardware_address(),
        chrono::Utc::now().timestamp()
    );
    let digest = Sha256::digest(seed.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ID_HEX_LEN);
    format!("{ID_PREFIX}{id}")
}

/// Best-effort hostname.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".into())
}

/// First non-loopback MAC address, read from sysfs on Linux.
/// Falls back to `"unknown"` elsewhere; the time component still
/// differentiates the seed.
fn hardware_address() -> String {
    let Ok(entries) = std::fs::read_dir("/sys/class/net") else {
        return "unknown".into();
    };
    for entry in entries.flatten() {
        if entry.file_name() == "lo" {
            continue;
        }
        if let Ok(addr) = std::fs::read_to_string(entry.path().join("address")) {
            let addr = addr.trim();
            if !addr.is_empty() && addr != "00:00:00:00:00:00" {
                return addr.to_string();
            }
        }
    }
    "unknown".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pc_id_has_expected_shape() {
        let id = generate_pc_id();
        assert!(id.starts_with(ID_PREFIX));
        let hex_part = &id[ID_PREFIX.len()..];
        assert_eq!(hex_part.len(), ID_HEX_LEN);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
