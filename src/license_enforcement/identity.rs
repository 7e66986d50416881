use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::host::Host;

const SESSION_SUFFIX_LEN: usize = 9;
const RENDER_PROBE_TEXT: &str = "Content Optimizer IP Protection";

/// Per-session tracking identity. Not a security key: the fingerprint is a
/// best-effort hint and may collide or drift between sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    pub(crate) session_id: String,
    pub(crate) fingerprint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintData {
    canvas: Option<String>,
    user_agent: Option<String>,
    language: Option<String>,
    platform: Option<String>,
    screen: Option<String>,
    timezone: Option<String>,
    domain: String,
}

/// Derives the session identity from the ambient page environment.
///
/// Never fails; unavailable capabilities are left out of the fingerprint.
pub(crate) fn identify(host: &dyn Host, now: DateTime<Utc>, fingerprint_len: usize) -> Identity {
    let identity = Identity {
        session_id: session_id(now),
        fingerprint: fingerprint(host, fingerprint_len),
    };

    debug!(session_id = %identity.session_id, "Derived session identity");

    identity
}

fn session_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut entropy = [0u8; SESSION_SUFFIX_LEN];
    if let Err(err) = getrandom::fill(&mut entropy) {
        warn!(%err, "Random source unavailable, deriving session suffix from clock");
        let nanos = now.timestamp_subsec_nanos().to_le_bytes();
        for (i, byte) in entropy.iter_mut().enumerate() {
            *byte = nanos[i % nanos.len()].wrapping_mul(31).wrapping_add(i as u8);
        }
    }

    let suffix = entropy
        .iter()
        .map(|byte| ALPHABET[usize::from(*byte) % ALPHABET.len()] as char)
        .collect::<String>();

    format!("session_{}_{suffix}", now.timestamp_millis())
}

fn fingerprint(host: &dyn Host, len: usize) -> String {
    let data = FingerprintData {
        canvas: host.render_probe(RENDER_PROBE_TEXT),
        user_agent: host.user_agent(),
        language: host.language(),
        platform: host.platform(),
        screen: host.screen().map(|(w, h)| format!("{w}x{h}")),
        timezone: host.timezone(),
        domain: host.hostname(),
    };

    let json = serde_json::to_string(&data).unwrap_or_else(|err| {
        warn!(%err, "Failed to serialize fingerprint data, using domain only");
        data.domain.clone()
    });

    BASE64_STANDARD
        .encode(json)
        .chars()
        .take(len)
        .collect()
}
