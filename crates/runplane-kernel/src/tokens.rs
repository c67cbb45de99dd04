use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, warn};

use runplane_core_types::OwnerId;

use crate::config::TokenConfig;
use crate::metrics::record_proxy_token;

/// Upper bound on a configured token lifetime (30 days).
pub const MAX_TOKEN_TTL_SECS: u64 = 30 * 24 * 3600;

/// Short-lived credential standing in for a full authentication check.
#[derive(Clone, Debug, Serialize)]
pub struct ProxyToken {
    pub token: String,
    pub owner: OwnerId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct TokenEntry {
    owner: OwnerId,
    expires_at: DateTime<Utc>,
}

/// In-memory token table owned by one control plane instance.
///
/// Expired entries are dropped lazily: when looked up past expiry, or by a
/// full sweep once the table reaches `sweep_threshold` entries on issuance.
pub struct ProxyTokenIssuer {
    entries: DashMap<String, TokenEntry>,
    ttl: ChronoDuration,
    sweep_threshold: usize,
}

impl ProxyTokenIssuer {
    pub fn new(cfg: &TokenConfig) -> Self {
        let ttl_secs = cfg.ttl_secs.clamp(1, MAX_TOKEN_TTL_SECS);
        if ttl_secs != cfg.ttl_secs {
            warn!(configured = cfg.ttl_secs, ttl_secs, "proxy token ttl clamped");
        }
        Self {
            entries: DashMap::new(),
            // bounded by MAX_TOKEN_TTL_SECS, so the cast cannot wrap
            ttl: ChronoDuration::seconds(ttl_secs as i64),
            sweep_threshold: cfg.sweep_threshold.max(1),
        }
    }

    pub fn issue(&self, owner: &OwnerId) -> ProxyToken {
        self.issue_at(owner, Utc::now())
    }

    pub fn issue_at(&self, owner: &OwnerId, now: DateTime<Utc>) -> ProxyToken {
        if self.entries.len() >= self.sweep_threshold {
            let removed = self.sweep_expired_at(now);
            debug!(removed, remaining = self.entries.len(), "proxy token sweep");
        }

        let expires_at = now + self.ttl;
        let token = loop {
            let candidate = generate_token();
            // a token is never reassigned to another owner
            if let Entry::Vacant(slot) = self.entries.entry(candidate.clone()) {
                slot.insert(TokenEntry {
                    owner: owner.clone(),
                    expires_at,
                });
                break candidate;
            }
        };
        record_proxy_token("issued");
        ProxyToken {
            token,
            owner: owner.clone(),
            expires_at,
        }
    }

    pub fn validate(&self, token: &str) -> Option<OwnerId> {
        self.validate_at(token, Utc::now())
    }

    /// Resolves `token` to its owner, removing it when it has expired.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Option<OwnerId> {
        match self.entries.get(token) {
            None => {
                record_proxy_token("miss");
                return None;
            }
            Some(entry) if entry.expires_at > now => {
                record_proxy_token("hit");
                return Some(entry.owner.clone());
            }
            Some(_) => {}
        }
        self.entries.remove_if(token, |_, entry| entry.expires_at <= now);
        record_proxy_token("expired");
        None
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every token; used when the owning service shuts down.
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        info!(count, "proxy token table cleared");
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
