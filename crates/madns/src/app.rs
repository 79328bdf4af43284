use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use madns_common::{MadnsConfig, PolicyModel};
use tokio::task::JoinSet;

use crate::dispatcher::NetworkExchange;
use crate::notifier::{notification_channel, LogSink, NotificationWorker};
use crate::{Args, Dispatcher, DnsServer};

pub struct App;

impl App {
    /// Runs until a listener fails or the process receives a signal
    pub async fn run_until_completion(args: Args) -> anyhow::Result<()> {
        let config = MadnsConfig::from_file(&args.config)
            .with_context(|| format!("failed to load the config from {:?}", args.config))?;
        let policies =
            PolicyModel::try_from(&config).context("invalid handler configuration")?;

        let bind_addr = SocketAddr::new(args.host, args.port.unwrap_or(config.port));
        tracing::info!(
            handlers = policies.len(),
            default_handler = policies.default_policy().is_some(),
            "loaded {:?}",
            args.config
        );

        // Channel for notifications
        let (notifier, notification_rx) = notification_channel();
        let notification_worker = NotificationWorker::new(
            notification_rx,
            LogSink::new(&config.smtp),
            Duration::from_secs(config.smtp.delay_secs),
        );

        let dispatcher = Arc::new(Dispatcher::new(policies, NetworkExchange::new()));
        let server = DnsServer::new(bind_addr, dispatcher, Arc::new(notifier))
            .await
            .context("failed to instantiate the DNS server")?;

        let mut tasks = JoinSet::new();
        tasks.spawn(server.block_until_completion());
        tasks.spawn(notification_worker.watch_for_notifications());
        tasks.spawn(wait_for_termination_signal());

        // Whatever finishes first takes the process down with it
        match tasks.join_next().await {
            Some(result) => result.context("failed to execute a task")?,
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    let mut quit = signal(SignalKind::quit()).context("failed to listen for SIGQUIT")?;

    let received = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    };

    tracing::error!("signal {} received", received);
    anyhow::bail!("terminated by {}", received)
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::error!("signal ctrl-c received");
    anyhow::bail!("terminated by ctrl-c")
}
