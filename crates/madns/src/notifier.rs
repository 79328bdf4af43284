//! Fire-and-forget notifications about handled queries.
//!
//! The query path only pushes notifications onto a channel through a
//! [`ChannelNotifier`]. A [`NotificationWorker`] drains the channel in the
//! background, aggregates emails per destination for the configured delay and
//! hands everything to a [`NotificationSink`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use madns_common::SmtpSettings;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, Instant, MissedTickBehavior};

const DEFAULT_NOTIFICATION_CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyChannel {
    Email,
    Slack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: NotifyChannel,
    pub destination: String,
    pub body: String,
}

impl Notification {
    pub fn email(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Notification {
            channel: NotifyChannel::Email,
            destination: destination.into(),
            body: body.into(),
        }
    }

    pub fn slack(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Notification {
            channel: NotifyChannel::Slack,
            destination: destination.into(),
            body: body.into(),
        }
    }
}

/// Accepts notification requests without blocking or failing the caller
pub trait Notifier: Send + Sync {
    fn notify_email(&self, destination: &str, body: &str);

    fn notify_slack(&self, destination: &str, body: &str);

    fn notify(&self, notification: &Notification) {
        match notification.channel {
            NotifyChannel::Email => self.notify_email(&notification.destination, &notification.body),
            NotifyChannel::Slack => self.notify_slack(&notification.destination, &notification.body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<Notification>,
}

/// Creates a notifier and the receiving end for a [`NotificationWorker`]
pub fn notification_channel() -> (ChannelNotifier, UnboundedReceiver<Notification>) {
    let (tx, rx) = unbounded_channel();
    (ChannelNotifier { tx }, rx)
}

impl ChannelNotifier {
    fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::warn!("notification worker has shut down, dropping a notification");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn notify_email(&self, destination: &str, body: &str) {
        self.send(Notification::email(destination, body));
    }

    fn notify_slack(&self, destination: &str, body: &str) {
        self.send(Notification::slack(destination, body));
    }
}

/// One message to deliver, possibly aggregated from several notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: NotifyChannel,
    pub destination: String,
    pub subject: String,
    pub body: String,
    /// Number of notifications merged into `body`
    pub count: usize,
}

impl Delivery {
    fn single(notification: Notification) -> Self {
        Delivery {
            channel: notification.channel,
            destination: notification.destination,
            subject: "madns: 1 DNS request".to_string(),
            body: notification.body,
            count: 1,
        }
    }

    fn aggregated(channel: NotifyChannel, destination: String, bodies: Vec<String>) -> Self {
        Delivery {
            channel,
            destination,
            subject: format!("madns: {} DNS request(s)", bodies.len()),
            count: bodies.len(),
            body: bodies.concat(),
        }
    }
}

/// Final delivery transport
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, delivery: Delivery) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Records deliveries in the log instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    smtp_server: Option<String>,
}

impl LogSink {
    pub fn new(smtp: &SmtpSettings) -> Self {
        LogSink {
            smtp_server: Some(smtp.server.clone()).filter(|server| !server.is_empty()),
        }
    }
}

impl NotificationSink for LogSink {
    async fn deliver(&self, delivery: Delivery) -> anyhow::Result<()> {
        match delivery.channel {
            NotifyChannel::Email => tracing::info!(
                to = %delivery.destination,
                relay = self.smtp_server.as_deref().unwrap_or("<unset>"),
                count = delivery.count,
                subject = %delivery.subject,
                "email notification:\n{}",
                delivery.body
            ),
            NotifyChannel::Slack => tracing::info!(
                webhook = %delivery.destination,
                "slack notification:\n{}",
                delivery.body
            ),
        }
        Ok(())
    }
}

pub struct NotificationWorker<S> {
    notification_rx: UnboundedReceiver<Notification>,
    sink: S,
    /// Emails are aggregated for this long, zero sends them right away
    email_delay: Duration,
}

impl<S: NotificationSink> NotificationWorker<S> {
    pub fn new(
        notification_rx: UnboundedReceiver<Notification>,
        sink: S,
        email_delay: Duration,
    ) -> Self {
        NotificationWorker {
            notification_rx,
            sink,
            email_delay,
        }
    }

    pub async fn watch_for_notifications(mut self) -> anyhow::Result<()> {
        let aggregate_emails = !self.email_delay.is_zero();
        let mut flush_interval = interval(self.email_delay.max(Duration::from_secs(1)));
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        flush_interval.tick().await;

        let mut pending_emails: HashMap<String, Vec<String>> = HashMap::new();
        let mut received = Vec::with_capacity(DEFAULT_NOTIFICATION_CHUNK);
        loop {
            let shut_down = tokio::select! {
                count = self.notification_rx.recv_many(&mut received, DEFAULT_NOTIFICATION_CHUNK) => {
                    if count == 0 {
                        tracing::debug!("all notifiers were dropped, shutting down the notification worker");
                        // Flush whatever we have left and exit
                        true
                    } else {
                        for notification in received.drain(..) {
                            match notification.channel {
                                NotifyChannel::Email if aggregate_emails => pending_emails
                                    .entry(notification.destination)
                                    .or_default()
                                    .push(notification.body),
                                _ => self.deliver(Delivery::single(notification)).await,
                            }
                        }
                        continue;
                    }
                }
                _ = flush_interval.tick(), if aggregate_emails => {
                    if pending_emails.is_empty() {
                        continue;
                    }
                    false
                }
            };

            let start = Instant::now();
            let destinations = pending_emails.len();
            for (destination, bodies) in pending_emails.drain() {
                self.deliver(Delivery::aggregated(NotifyChannel::Email, destination, bodies))
                    .await;
            }
            if destinations > 0 {
                tracing::trace!(
                    "Flushed emails for {} destinations in {:.3} seconds",
                    destinations,
                    start.elapsed().as_secs_f64()
                );
            }

            if shut_down {
                break;
            }
        }

        Ok(())
    }

    async fn deliver(&self, delivery: Delivery) {
        let channel = delivery.channel;
        let destination = delivery.destination.clone();
        if let Err(e) = self.sink.deliver(delivery).await {
            // Delivery failures never affect query handling
            tracing::warn!(?channel, %destination, "failed to deliver a notification: {:#}", e);
        }
    }
}
