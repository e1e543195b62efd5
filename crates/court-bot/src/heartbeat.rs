//! Heartbeat file and watchdog check.
//!
//! The scheduler touches a file at the top of every tick; an independent
//! watchdog invocation compares its mtime against the staleness threshold
//! and alerts once per outage (a flag file de-duplicates), with a
//! recovery notice when ticks resume.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Duration;
use tracing::{info, warn};

use crate::notify::Notifier;

/// Touch the heartbeat file (create or bump mtime).
pub fn touch(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Rewriting the content updates mtime on every platform.
    std::fs::write(path, chrono::Utc::now().to_rfc3339())
}

/// Minutes since the last heartbeat, if the file exists.
pub fn age_minutes(path: &Path) -> Option<i64> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let age = SystemTime::now().duration_since(modified).ok()?;
    Some(age.as_secs() as i64 / 60)
}

/// One watchdog pass. Returns whether the heartbeat was stale.
pub async fn watchdog_check(
    heartbeat_path: &Path,
    stale_threshold_min: i64,
    notifier: &Notifier,
) -> bool {
    let flag_path = alert_flag_path(heartbeat_path);

    let Some(age) = age_minutes(heartbeat_path) else {
        // First boot: no heartbeat yet is not an outage.
        info!("No heartbeat file found, skipping check");
        return false;
    };

    if age > stale_threshold_min {
        if flag_path.exists() {
            warn!(age_min = age, "Heartbeat stale - already alerted");
            return true;
        }
        warn!(age_min = age, "Heartbeat stale - alerting");
        notifier
            .send(&format!(
                "*Scheduler Watchdog*\nHeartbeat stale: {} min since last tick",
                age
            ))
            .await;
        if let Err(e) = std::fs::write(&flag_path, format!("alerted at age={age}min\n")) {
            warn!(error = %e, "Could not write watchdog flag");
        }
        return true;
    }

    if flag_path.exists() {
        info!(age_min = age, "Heartbeat recovered");
        notifier
            .send(&format!(
                "*Scheduler Recovered*\nHeartbeat age: {} min",
                age
            ))
            .await;
        let _ = std::fs::remove_file(&flag_path);
    }
    false
}

fn alert_flag_path(heartbeat_path: &Path) -> PathBuf {
    heartbeat_path.with_file_name(".watchdog_alerted")
}

/// Duration form of the staleness threshold, for the tick lock.
pub fn stale_duration(stale_threshold_min: i64) -> std::time::Duration {
    Duration::minutes(stale_threshold_min)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(35 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_touch_and_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat");
        assert!(age_minutes(&path).is_none());

        touch(&path).unwrap();
        assert_eq!(age_minutes(&path), Some(0));
    }

    #[tokio::test]
    async fn test_watchdog_fresh_heartbeat_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat");
        touch(&path).unwrap();

        let stale = watchdog_check(&path, 35, &Notifier::disabled()).await;
        assert!(!stale);
        assert!(!alert_flag_path(&path).exists());
    }

    #[tokio::test]
    async fn test_watchdog_missing_heartbeat_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat");
        assert!(!watchdog_check(&path, 35, &Notifier::disabled()).await);
    }

    #[tokio::test]
    async fn test_watchdog_stale_alerts_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat");
        touch(&path).unwrap();

        // Threshold -1 makes any heartbeat stale.
        assert!(watchdog_check(&path, -1, &Notifier::disabled()).await);
        assert!(alert_flag_path(&path).exists());
        // Second pass stays stale but the flag suppresses a repeat alert.
        assert!(watchdog_check(&path, -1, &Notifier::disabled()).await);

        // Recovery clears the flag.
        assert!(!watchdog_check(&path, 35, &Notifier::disabled()).await);
        assert!(!alert_flag_path(&path).exists());
    }
}
