//! Tracking service
//!
//! Owns the location subscription and the foreground notice for one
//! session. Each fix is turned into a text message and handed to the
//! transport. Failures are logged and counted, never propagated out of the
//! delivery path.

use crate::config::{SessionConfig, NOTIFICATION_ID};
use crate::error::{Error, Result};
use crate::foreground::{ForegroundHost, ForegroundNotice, NotificationChannel};
use crate::location::{LocationProvider, LocationSample, SampleListener, Subscription};
use crate::sms::{format_location_message, MessageTransport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of a tracking service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Running,
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Uninitialized => write!(f, "uninitialized"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackerOptions {
    /// `start` while running reconfigures instead of failing
    pub allow_restart: bool,
    pub tap_action: Option<String>,
}

/// Counters for conditions the service swallows
#[derive(Debug, Default)]
pub struct TrackerStats {
    samples: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    skipped: AtomicU64,
    permission_denied: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub samples: u64,
    pub sent: u64,
    pub send_failures: u64,
    /// Samples dropped because no recipient was configured
    pub skipped: u64,
    pub permission_denied: u64,
}

impl TrackerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            permission_denied: self.permission_denied.load(Ordering::Relaxed),
        }
    }
}

/// Send through the transport; every failure is reported as `SendFailure`
pub fn send_message(transport: &dyn MessageTransport, recipient: &str, text: &str) -> Result<()> {
    transport.send(recipient, text).map_err(|e| match e {
        Error::SendFailure(msg) => Error::SendFailure(msg),
        other => Error::SendFailure(other.to_string()),
    })
}

/// Turns a fix into an outbound message
pub struct SampleHandler {
    recipient: Option<String>,
    transport: Arc<dyn MessageTransport>,
    stats: Arc<TrackerStats>,
}

impl SampleHandler {
    pub fn new(
        recipient: Option<String>,
        transport: Arc<dyn MessageTransport>,
        stats: Arc<TrackerStats>,
    ) -> Self {
        Self {
            recipient,
            transport,
            stats,
        }
    }

    pub fn handle(&self, sample: &LocationSample) {
        self.stats.samples.fetch_add(1, Ordering::Relaxed);

        let recipient = match self.recipient.as_deref() {
            Some(r) => r,
            None => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                debug!("No recipient, dropping location update");
                return;
            }
        };

        let text = format_location_message(sample);
        match send_message(self.transport.as_ref(), recipient, &text) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                info!(
                    recipient,
                    lat = sample.latitude,
                    lon = sample.longitude,
                    "Location update sent"
                );
            }
            Err(e) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                error!(recipient, "Failed to send location update: {}", e);
            }
        }
    }
}

/// Long-lived service relaying location fixes by SMS
pub struct TrackingService {
    provider: Arc<dyn LocationProvider>,
    transport: Arc<dyn MessageTransport>,
    host: Arc<dyn ForegroundHost>,
    options: TrackerOptions,
    state: ServiceState,
    session: Option<SessionConfig>,
    subscription: Option<Subscription>,
    stats: Arc<TrackerStats>,
}

impl TrackingService {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        transport: Arc<dyn MessageTransport>,
        host: Arc<dyn ForegroundHost>,
        options: TrackerOptions,
    ) -> Self {
        Self {
            provider,
            transport,
            host,
            options,
            state: ServiceState::Uninitialized,
            session: None,
            subscription: None,
            stats: Arc::new(TrackerStats::default()),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionConfig> {
        self.session.as_ref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Begin a session: show the foreground notice and subscribe to fixes.
    ///
    /// A refused location permission is logged and counted; the service
    /// still enters `Running`.
    pub fn start(&mut self, config: SessionConfig) -> Result<()> {
        if self.state == ServiceState::Running {
            if !self.options.allow_restart {
                warn!("Start requested while already running");
                return Err(Error::AlreadyRunning);
            }
            info!("Reconfiguring running tracking session");
            self.release_subscription();
        }

        let recipient = config.recipient().map(str::to_string);
        if recipient.is_none() {
            warn!("No recipient configured, location updates will not be sent");
        }

        if let Err(e) = self.host.ensure_channel(&NotificationChannel::location_tracking()) {
            warn!("Failed to create notification channel: {}", e);
        }
        if let Err(e) = self
            .host
            .show(&ForegroundNotice::tracking(self.options.tap_action.clone()))
        {
            warn!("Failed to show foreground notice: {}", e);
        }

        let handler = Arc::new(SampleHandler::new(
            recipient.clone(),
            self.transport.clone(),
            self.stats.clone(),
        ));
        let listener: SampleListener = Arc::new(move |sample| handler.handle(&sample));

        match self.provider.subscribe(config.interval, listener) {
            Ok(subscription) => {
                info!(
                    subscription = subscription.id(),
                    recipient = recipient.as_deref().unwrap_or("<none>"),
                    interval_ms = config.interval.as_millis() as u64,
                    "Location tracking started"
                );
                self.subscription = Some(subscription);
            }
            Err(Error::PermissionDenied(msg)) => {
                self.stats.permission_denied.fetch_add(1, Ordering::Relaxed);
                error!("Location permission denied, no updates will arrive: {}", msg);
            }
            Err(e) => {
                self.dismiss_notice();
                self.state = ServiceState::Stopped;
                return Err(e);
            }
        }

        self.session = Some(config);
        self.state = ServiceState::Running;
        Ok(())
    }

    /// Deliver a fix directly, as the provider would
    pub fn on_location_sample(&self, sample: &LocationSample) {
        let recipient = self
            .session
            .as_ref()
            .and_then(|s| s.recipient())
            .map(str::to_string);
        SampleHandler::new(recipient, self.transport.clone(), self.stats.clone()).handle(sample);
    }

    /// Release the subscription and dismiss the notice. Safe to repeat.
    pub fn stop(&mut self) {
        let released = self.release_subscription();

        if self.state == ServiceState::Running {
            self.dismiss_notice();
            self.state = ServiceState::Stopped;

            let stats = self.stats.snapshot();
            info!(
                released,
                samples = stats.samples,
                sent = stats.sent,
                send_failures = stats.send_failures,
                "Location tracking stopped"
            );
        }
    }

    fn release_subscription(&mut self) -> bool {
        match self.subscription.take() {
            Some(mut subscription) => {
                debug!(subscription = subscription.id(), "Releasing location subscription");
                subscription.cancel()
            }
            None => false,
        }
    }

    fn dismiss_notice(&self) {
        if let Err(e) = self.host.dismiss(NOTIFICATION_ID) {
            warn!("Failed to dismiss foreground notice: {}", e);
        }
    }
}

impl Drop for TrackingService {
    fn drop(&mut self) {
        self.stop();
    }
}
