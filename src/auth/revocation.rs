use std::time::{Duration, Instant};

use moka::{future::Cache, policy::EvictionPolicy};
use tracing::debug;
use uuid::Uuid;

/// Keeps each revoked token id until the instant its token would have expired.
struct UntilTokenExpiry;

impl moka::Expiry<Uuid, Instant> for UntilTokenExpiry {
    fn expire_after_create(&self, _jti: &Uuid, expires_at: &Instant, created_at: Instant) -> Option<Duration> {
        Some(expires_at.saturating_duration_since(created_at))
    }
}

/// Token ids revoked before their natural expiry (logout).
///
/// Process-local: a restart forgets revocations, and each replica keeps its
/// own list. Entries expire with the token they belong to. The list is
/// capacity-bounded; once full, the least recently used entry is evicted and
/// that token is accepted again until its own `exp`.
#[derive(Clone)]
pub struct RevocationList {
    revoked: Cache<Uuid, Instant>,
}

impl RevocationList {
    pub fn new(max_capacity: u64) -> Self {
        let revoked = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(UntilTokenExpiry)
            .build();
        Self { revoked }
    }

    /// Revoke `jti` until `expires_at` (unix seconds). Tokens already past
    /// their expiry are not tracked.
    pub async fn revoke(&self, jti: Uuid, expires_at: i64, now: i64) {
        if expires_at <= now {
            return;
        }
        let remaining = Duration::from_secs((expires_at - now) as u64);
        self.revoked.insert(jti, Instant::now() + remaining).await;
        debug!(%jti, remaining_secs = remaining.as_secs(), "token revoked");
    }

    pub async fn is_revoked(&self, jti: &Uuid) -> bool {
        self.revoked.contains_key(jti)
    }

    /// Number of tracked entries after pending evictions have run.
    pub async fn len(&self) -> u64 {
        self.revoked.run_pending_tasks().await;
        self.revoked.entry_count()
    }
}
