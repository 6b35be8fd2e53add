// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Best-effort distributed locks (`SET NX EX` under a `:semaphore` key).
//!
//! For coarse mutual exclusion between cooperating processes, such as the
//! orphan cleaner making sure only one instance sweeps at a time. Not a
//! fencing mechanism: a holder that stalls past the TTL loses the lock
//! silently.

use tracing::debug;

use super::CacheEngine;
use crate::error::CacheError;
use crate::scripts;

impl CacheEngine {
    /// Try to take the named lock for `ttl_secs`. Returns `false` without
    /// blocking when another holder has it; contention is not an error.
    pub async fn lock(&self, name: &str, ttl_secs: u64, value: &str) -> Result<bool, CacheError> {
        let lock_key = self.wire_key(&self.keys().lock_key(name));
        let mut conn = self.connector().connection();
        let acquired = scripts::acquire_lock(&mut conn, &lock_key, ttl_secs, value).await?;
        debug!(lock = name, acquired, "Lock attempt");
        Ok(acquired)
    }

    /// Release the named lock. Releasing a lock that already expired is a
    /// no-op, not an error.
    pub async fn unlock(&self, name: &str) -> Result<(), CacheError> {
        let lock_key = self.wire_key(&self.keys().lock_key(name));
        let mut conn = self.connector().connection();
        scripts::release_lock(&mut conn, &lock_key).await?;
        debug!(lock = name, "Lock released");
        Ok(())
    }
}
