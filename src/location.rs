//! Location provider capability
//!
//! A provider delivers fixes to a listener no more often than the requested
//! minimum interval, one at a time. The default provider shells out to
//! `termux-location` and parses its JSON output.

use crate::config::RelaySettings;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// A single position fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            provider: None,
            received_at: Utc::now(),
        }
    }
}

/// Callback invoked for every delivered fix
pub type SampleListener = Arc<dyn Fn(LocationSample) + Send + Sync>;

/// Source of periodic location fixes
pub trait LocationProvider: Send + Sync {
    /// Register `listener` for fixes at least `min_interval` apart.
    ///
    /// Returns `Error::PermissionDenied` when the caller may not read location.
    fn subscribe(&self, min_interval: Duration, listener: SampleListener) -> Result<Subscription>;
}

/// Handle to an active subscription. Released on `cancel` or drop.
pub struct Subscription {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(id: u64, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Release the subscription. Returns false if it was already released.
    pub fn cancel(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Output patterns that mean location access was refused
static PERMISSION_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)permission denied",
        r"(?i)permission.{0,40}not granted",
        r"(?i)missing.{0,20}permission",
        r"SecurityException",
        r"ACCESS_(FINE|COARSE|BACKGROUND)_LOCATION",
    ])
    .expect("Invalid permission regex")
});

/// Check if command output indicates a refused location permission
pub fn is_permission_denied(output: &str) -> bool {
    PERMISSION_PATTERNS.is_match(output)
}

#[derive(Deserialize)]
struct RawFix {
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy: Option<f64>,
    provider: Option<String>,
    #[serde(alias = "API_ERROR")]
    error: Option<String>,
}

/// Parse the JSON object printed by the location command
pub fn parse_fix(output: &str) -> Result<LocationSample> {
    let output = output.trim();
    if output.is_empty() {
        return Err(Error::LocationUnavailable("no fix reported".to_string()));
    }

    let raw: RawFix = serde_json::from_str(output)
        .map_err(|e| Error::Parse(format!("location JSON: {}", e)))?;

    if let Some(err) = raw.error {
        if is_permission_denied(&err) {
            return Err(Error::PermissionDenied(err));
        }
        return Err(Error::LocationUnavailable(err));
    }

    match (raw.latitude, raw.longitude) {
        (Some(latitude), Some(longitude)) if latitude.is_finite() && longitude.is_finite() => {
            Ok(LocationSample {
                latitude,
                longitude,
                accuracy: raw.accuracy,
                provider: raw.provider,
                received_at: Utc::now(),
            })
        }
        _ => Err(Error::Parse(format!("location JSON missing coordinates: {}", output))),
    }
}

/// Run the location command once
fn fetch_with(command: &[String]) -> Result<LocationSample> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::Config("location command is empty".to_string()))?;

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::CommandFailed(format!("{}: {}", program, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if is_permission_denied(&stderr) {
        return Err(Error::PermissionDenied(stderr.trim().to_string()));
    }

    if !output.status.success() {
        return Err(Error::LocationUnavailable(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    parse_fix(&stdout)
}

/// Provider that polls an external command for fixes
pub struct CommandLocationProvider {
    command: Vec<String>,
    next_id: AtomicU64,
}

impl CommandLocationProvider {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self::new(settings.location_command.clone())
    }

    /// Fetch a single fix
    pub fn fetch(&self) -> Result<LocationSample> {
        fetch_with(&self.command)
    }
}

impl LocationProvider for CommandLocationProvider {
    fn subscribe(&self, min_interval: Duration, listener: SampleListener) -> Result<Subscription> {
        // First fix is synchronous so a refused permission reaches the caller
        let first = match self.fetch() {
            Ok(sample) => Some(sample),
            Err(Error::PermissionDenied(msg)) => return Err(Error::PermissionDenied(msg)),
            Err(e) => {
                warn!("Initial location fix failed: {}", e);
                None
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let command = self.command.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(format!("location-poll-{}", id))
            .spawn(move || {
                if let Some(sample) = first {
                    listener(sample);
                }

                loop {
                    match stop_rx.recv_timeout(min_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }

                    let result = fetch_with(&command);

                    // Released while the command ran
                    if let Err(TryRecvError::Disconnected) = stop_rx.try_recv() {
                        break;
                    }

                    match result {
                        Ok(sample) => listener(sample),
                        Err(e) => warn!(subscription = id, "Location fix failed: {}", e),
                    }
                }

                debug!(subscription = id, "Location polling stopped");
            })?;

        Ok(Subscription::new(id, move || {
            drop(stop_tx);
            // A listener releasing its own subscription cannot wait on itself
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(subscription = id, "Location poll thread panicked");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_parse_termux_fix() {
        let output = r#"{
  "latitude": 37.422,
  "longitude": -122.084,
  "altitude": 12.0,
  "accuracy": 4.5,
  "vertical_accuracy": 2.0,
  "bearing": 0.0,
  "speed": 0.0,
  "elapsedMs": 31,
  "provider": "gps"
}"#;
        let sample = parse_fix(output).unwrap();
        assert_eq!(sample.latitude, 37.422);
        assert_eq!(sample.longitude, -122.084);
        assert_eq!(sample.accuracy, Some(4.5));
        assert_eq!(sample.provider.as_deref(), Some("gps"));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(matches!(parse_fix("  \n"), Err(Error::LocationUnavailable(_))));
    }

    #[test]
    fn test_parse_api_error() {
        let err = parse_fix(r#"{"API_ERROR": "Location service disabled"}"#).unwrap_err();
        assert!(matches!(err, Error::LocationUnavailable(ref m) if m.contains("disabled")));

        let err = parse_fix(r#"{"error": "Permission denied for location"}"#).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_parse_missing_coordinates() {
        assert!(matches!(parse_fix(r#"{"latitude": 1.0}"#), Err(Error::Parse(_))));
        assert!(matches!(parse_fix("not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_permission_patterns() {
        assert!(is_permission_denied("java.lang.SecurityException: not allowed"));
        assert!(is_permission_denied("Permission Denied"));
        assert!(is_permission_denied("ACCESS_FINE_LOCATION permission is not granted"));
        assert!(!is_permission_denied("GPS provider disabled"));
    }

    #[test]
    fn test_subscription_cancel_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let mut sub = Subscription::new(7, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(sub.id(), 7);
        assert!(sub.is_active());
        assert!(sub.cancel());
        assert!(!sub.cancel());
        assert!(!sub.is_active());
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_released_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let sub = Subscription::new(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fetch_missing_command() {
        let provider =
            CommandLocationProvider::new(vec!["definitely-not-a-location-cli-12345".to_string()]);
        assert!(matches!(provider.fetch(), Err(Error::CommandFailed(_))));
    }

    #[cfg(unix)]
    mod command {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use tempfile::TempDir;

        fn script(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        #[test]
        fn test_fetch_from_script() {
            let temp = TempDir::new().unwrap();
            let cmd = script(
                temp.path(),
                "loc",
                r#"echo '{"latitude": 51.5, "longitude": -0.12, "provider": "network"}'"#,
            );
            let sample = CommandLocationProvider::new(vec![cmd]).fetch().unwrap();
            assert_eq!(sample.latitude, 51.5);
            assert_eq!(sample.provider.as_deref(), Some("network"));
        }

        #[test]
        fn test_subscribe_permission_denied() {
            let temp = TempDir::new().unwrap();
            let cmd = script(
                temp.path(),
                "loc",
                "echo 'SecurityException: ACCESS_FINE_LOCATION' >&2; exit 1",
            );
            let provider = CommandLocationProvider::new(vec![cmd]);
            let listener: SampleListener = Arc::new(|_| {});
            let result = provider.subscribe(Duration::from_secs(60), listener);
            assert!(matches!(result, Err(Error::PermissionDenied(_))));
        }

        #[test]
        fn test_subscribe_delivers_first_fix() {
            let temp = TempDir::new().unwrap();
            let cmd = script(
                temp.path(),
                "loc",
                r#"echo '{"latitude": 1.0, "longitude": 2.0}'"#,
            );
            let provider = CommandLocationProvider::new(vec![cmd]);

            let (tx, rx) = mpsc::channel();
            let tx = std::sync::Mutex::new(tx);
            let listener: SampleListener = Arc::new(move |sample| {
                let _ = tx.lock().unwrap().send(sample);
            });

            let mut sub = provider.subscribe(Duration::from_secs(3600), listener).unwrap();
            let sample = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!((sample.latitude, sample.longitude), (1.0, 2.0));
            assert!(sub.cancel());
        }

        #[test]
        fn test_cancel_waits_for_running_fetch() {
            let temp = TempDir::new().unwrap();
            let cmd = script(
                temp.path(),
                "loc",
                r#"sleep 0.4; echo '{"latitude": 1.0, "longitude": 2.0}'"#,
            );
            let provider = CommandLocationProvider::new(vec![cmd]);

            let delivered = Arc::new(AtomicUsize::new(0));
            let in_listener = Arc::new(());
            let counter = delivered.clone();
            let held = in_listener.clone();
            let listener: SampleListener = Arc::new(move |_| {
                assert!(Arc::strong_count(&held) > 1);
                counter.fetch_add(1, Ordering::SeqCst);
            });

            let mut sub = provider
                .subscribe(Duration::from_millis(10), listener)
                .unwrap();

            // Land inside the second fetch
            thread::sleep(Duration::from_millis(150));
            assert!(sub.cancel());

            // The poll thread has exited and dropped the listener
            assert_eq!(Arc::strong_count(&in_listener), 1);

            let at_cancel = delivered.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(600));
            assert_eq!(delivered.load(Ordering::SeqCst), at_cancel);
            assert!(at_cancel >= 1);
        }
    }
}
