//! A renewable distributed lock so exactly one `runforge-worker` replica
//! drives the janitor/GPU-retry loop at a time (§2.1/§5). Adapted from a
//! Kubernetes `Lease` object to a Redis-backed lock, since this codebase's
//! `LeaseLock`/`try_acquire_or_renew` shape (see the controller's leader
//! election) has no Kubernetes API server to talk to here — Redis, already a
//! required dependency for the GPU-info cache, stands in for it.

use deadpool_redis::Pool as RedisPool;
use redis::Script;

/// SET the lock key to `holder_id` with a `PX` expiry if it's unset or
/// already owned by `holder_id`; otherwise leave it alone. Returns 1 if the
/// caller now holds (or still holds) the lock, 0 otherwise. One round trip,
/// same "let the database serialize it" idiom this codebase uses for its
/// atomic SQL claims.
const ACQUIRE_OR_RENEW_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if current == false or current == ARGV[1] then
    redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2])
    return 1
end
return 0
"#;

/// DEL the lock key only if it's still owned by `holder_id` — a compare-and-
/// delete so a replica can never release a lock another replica has since
/// acquired after this one's lease lapsed.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

pub struct Lease {
    pub acquired_lease: bool,
}

pub struct LeaseLockParams {
    pub holder_id: String,
    pub lock_name: String,
    pub lease_ttl: std::time::Duration,
}

pub struct LeaseLock {
    redis: RedisPool,
    key: String,
    holder_id: String,
    ttl_ms: i64,
    acquire_or_renew: Script,
    release: Script,
}

impl LeaseLock {
    pub fn new(redis: RedisPool, params: LeaseLockParams) -> Self {
        Self {
            redis,
            key: format!("runforge:leader_lock:{}", params.lock_name),
            holder_id: params.holder_id,
            ttl_ms: params.lease_ttl.as_millis() as i64,
            acquire_or_renew: Script::new(ACQUIRE_OR_RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    pub async fn try_acquire_or_renew(&self) -> anyhow::Result<Lease> {
        let mut conn = self.redis.get().await?;
        let acquired: i64 = self
            .acquire_or_renew
            .key(&self.key)
            .arg(&self.holder_id)
            .arg(self.ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(Lease { acquired_lease: acquired == 1 })
    }

    /// Best-effort: a failed release just means the lock expires on its own
    /// TTL a little later. Never called on the hot path, only on graceful
    /// shutdown.
    pub async fn release(&self) {
        let Ok(mut conn) = self.redis.get().await else { return };
        let _: Result<i64, _> =
            self.release.key(&self.key).arg(&self.holder_id).invoke_async(&mut conn).await;
    }
}
