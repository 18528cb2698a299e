//! Foreground host: the visible indicator that keeps tracking alive
//!
//! On Android (Termux) this is an ongoing low-priority notification plus a
//! wake lock. Headless hosts only log.

use crate::config::{
    HostKind, RelaySettings, CHANNEL_DESCRIPTION, CHANNEL_ID, CHANNEL_NAME, NOTIFICATION_ID,
    NOTIFICATION_TEXT, NOTIFICATION_TITLE,
};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::process::Command;
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Min,
    Low,
    Default,
    High,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Min => "min",
            Importance::Low => "low",
            Importance::Default => "default",
            Importance::High => "high",
        }
    }
}

/// Notification category the indicator is posted under
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
}

impl NotificationChannel {
    pub fn location_tracking() -> Self {
        Self {
            id: CHANNEL_ID.to_string(),
            name: CHANNEL_NAME.to_string(),
            description: CHANNEL_DESCRIPTION.to_string(),
            importance: Importance::Low,
        }
    }
}

/// Persistent notice shown while tracking runs
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundNotice {
    pub id: u32,
    pub channel_id: String,
    pub title: String,
    pub text: String,
    /// Command to run on tap (opens the host app)
    pub tap_action: Option<String>,
}

impl ForegroundNotice {
    pub fn tracking(tap_action: Option<String>) -> Self {
        Self {
            id: NOTIFICATION_ID,
            channel_id: CHANNEL_ID.to_string(),
            title: NOTIFICATION_TITLE.to_string(),
            text: NOTIFICATION_TEXT.to_string(),
            tap_action,
        }
    }
}

/// Keep-alive and visibility capability
pub trait ForegroundHost: Send + Sync {
    /// Create the channel if it does not exist yet
    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<()>;

    /// Post the notice and hold the host awake
    fn show(&self, notice: &ForegroundNotice) -> Result<()>;

    /// Remove the notice and release the wake hold
    fn dismiss(&self, notice_id: u32) -> Result<()>;
}

/// Build the host selected in settings
pub fn host_for(settings: &RelaySettings) -> Box<dyn ForegroundHost> {
    match settings.host {
        HostKind::Termux => Box::new(TermuxForegroundHost::new()),
        HostKind::Log => Box::new(LogForegroundHost),
    }
}

fn run(program: &str, args: &[String]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::CommandFailed(format!("{}: {}", program, e)))?;

    if !output.status.success() {
        return Err(Error::CommandFailed(format!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

/// Termux:API backed host
pub struct TermuxForegroundHost {
    /// Channels created so far, with the importance notices are posted at
    channels: Mutex<HashMap<String, Importance>>,
}

impl TermuxForegroundHost {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Importance for notices on `channel_id`; unknown channels post low
    pub fn importance_for(&self, channel_id: &str) -> Importance {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel_id).copied())
            .unwrap_or(Importance::Low)
    }

    /// Arguments for `termux-notification`
    pub fn notification_args(notice: &ForegroundNotice, importance: Importance) -> Vec<String> {
        let mut args = vec![
            "--id".to_string(),
            notice.id.to_string(),
            "--ongoing".to_string(),
            "--alert-once".to_string(),
            "--priority".to_string(),
            importance.as_str().to_string(),
            "--channel".to_string(),
            notice.channel_id.clone(),
            "--title".to_string(),
            notice.title.clone(),
            "--content".to_string(),
            notice.text.clone(),
        ];

        if let Some(action) = &notice.tap_action {
            args.push("--action".to_string());
            args.push(action.clone());
        }

        args
    }
}

impl Default for TermuxForegroundHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundHost for TermuxForegroundHost {
    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::CommandFailed("channel registry poisoned".to_string()))?;
        if channels.get(&channel.id) == Some(&channel.importance) {
            return Ok(());
        }

        // termux-notification-channel only takes id and name; importance is
        // applied per notice through --priority
        run(
            "termux-notification-channel",
            &[channel.id.clone(), channel.name.clone()],
        )?;
        debug!(
            importance = channel.importance.as_str(),
            "Created notification channel {} ({}): {}",
            channel.id,
            channel.name,
            channel.description
        );
        channels.insert(channel.id.clone(), channel.importance);
        Ok(())
    }

    fn show(&self, notice: &ForegroundNotice) -> Result<()> {
        run(
            "termux-notification",
            &Self::notification_args(notice, self.importance_for(&notice.channel_id)),
        )?;

        // Wake lock is best-effort
        if let Err(e) = run("termux-wake-lock", &[]) {
            warn!("Failed to acquire wake lock: {}", e);
        }

        Ok(())
    }

    fn dismiss(&self, notice_id: u32) -> Result<()> {
        if let Err(e) = run("termux-wake-unlock", &[]) {
            warn!("Failed to release wake lock: {}", e);
        }
        run("termux-notification-remove", &[notice_id.to_string()])
    }
}

/// Host for headless environments: records the indicator in the log
pub struct LogForegroundHost;

impl ForegroundHost for LogForegroundHost {
    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<()> {
        debug!(
            channel = %channel.id,
            importance = channel.importance.as_str(),
            "Notification channel: {} ({})",
            channel.name,
            channel.description
        );
        Ok(())
    }

    fn show(&self, notice: &ForegroundNotice) -> Result<()> {
        info!(id = notice.id, "[{}] {}", notice.title, notice.text);
        Ok(())
    }

    fn dismiss(&self, notice_id: u32) -> Result<()> {
        info!(id = notice_id, "Foreground notice dismissed");
        Ok(())
    }
}
