// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cookie persistence: load/save the jar plus refresh timestamp as JSON with
//! atomic writes. A missing or corrupt file means "never authenticated".

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::CookieJar;

/// Persisted authentication state. Nothing else survives restarts.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PersistedAuth {
    pub cookies: CookieJar,
    /// Last successful login as epoch seconds.
    #[serde(default)]
    pub last_refresh: u64,
}

/// Load the persisted jar. Any failure is non-fatal and yields `None`.
pub fn load(path: &Path) -> Option<PersistedAuth> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "failed to read cookie file");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(auth) => Some(auth),
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "corrupt cookie file, ignoring");
            None
        }
    }
}

/// Save atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) to avoid corruption when
/// concurrent saves race on the same `.tmp` file — a shorter write can leave
/// trailing bytes from a longer previous write.
pub fn save(path: &Path, auth: &PersistedAuth) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(auth)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("relay-persist-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir.join(name)
    }

    #[test]
    fn round_trips_jar_and_timestamp() -> anyhow::Result<()> {
        let path = temp_path("roundtrip.json");
        let mut auth = PersistedAuth { last_refresh: 1234, ..Default::default() };
        auth.cookies.insert("sb-auth-token".into(), "tok".into());
        save(&path, &auth)?;

        let loaded = load(&path).ok_or_else(|| anyhow::anyhow!("expected persisted auth"))?;
        assert_eq!(loaded.last_refresh, 1234);
        assert_eq!(loaded.cookies.get("sb-auth-token").map(String::as_str), Some("tok"));
        Ok(())
    }

    #[test]
    fn missing_file_is_absent() {
        assert!(load(&temp_path("does-not-exist.json")).is_none());
    }

    #[test]
    fn corrupt_file_is_absent() -> anyhow::Result<()> {
        let path = temp_path("corrupt.json");
        std::fs::write(&path, "{not json")?;
        assert!(load(&path).is_none());
        Ok(())
    }
}
