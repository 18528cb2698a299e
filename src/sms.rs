//! SMS transport and location message formatting

use crate::config::RelaySettings;
use crate::error::{Error, Result};
use crate::location::LocationSample;
use std::process::Command;

/// Fire-and-forget text delivery addressed by phone number
pub trait MessageTransport: Send + Sync {
    fn send(&self, recipient: &str, text: &str) -> Result<()>;
}

/// Render the outbound message for a fix.
///
/// Coordinates use six decimals and the map link reuses the exact same
/// renderings.
pub fn format_location_message(sample: &LocationSample) -> String {
    let lat = format!("{:.6}", sample.latitude);
    let lon = format!("{:.6}", sample.longitude);
    format!(
        "Location Update\nLat: {}\nLon: {}\nMap: https://maps.google.com/?q={},{}",
        lat, lon, lat, lon
    )
}

/// Transport that runs an SMS command line per message.
///
/// Arguments may contain `{recipient}` and `{message}` placeholders; the
/// message is passed as a single argument, never through a shell.
pub struct CommandTransport {
    command: Vec<String>,
}

impl CommandTransport {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self::new(settings.sms_command.clone())
    }

    /// Argument vector for one send, program first
    pub fn render_args(&self, recipient: &str, text: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| match arg.as_str() {
                "{recipient}" => recipient.to_string(),
                "{message}" => text.to_string(),
                other => other
                    .replace("{recipient}", recipient)
                    .replace("{message}", text),
            })
            .collect()
    }
}

impl MessageTransport for CommandTransport {
    fn send(&self, recipient: &str, text: &str) -> Result<()> {
        let args = self.render_args(recipient, text);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| Error::Config("sms command is empty".to_string()))?;

        let output = Command::new(program)
            .args(rest)
            .output()
            .map_err(|e| Error::SendFailure(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            return Err(Error::SendFailure(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}
