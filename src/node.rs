//! Per-node wiring
//!
//! [`NodeContext`] is the explicitly owned state every component shares: the
//! sensor records, event log, notification store and the mode controller
//! handle. [`Node`] builds it for the configured role and owns the background
//! tasks until shutdown. The panel runs the sensor poller, input loop and
//! peer monitor; the hub runs the reminder checker.

use crate::capabilities::{
    AlertQueue, ChatNotifier, LogChatNotifier, LogVoiceAnnouncer, PeerVoiceAnnouncer,
    VoiceAnnouncer,
};
use crate::channel::{server, Outbox, PeerClient, PeerLink, PeerMonitor, PeerStatus};
use crate::config::{Config, NodeRole};
use crate::input::{InputHandle, InputLoop};
use crate::mode::{ModeController, ModeDeps, ModeHandle, Supervisor};
use crate::notifications::NotificationStore;
use crate::reminders::{ReminderChecker, ReminderSource, ReminderStore};
use crate::sensors::{
    AlertDispatcher, DebounceEngine, DeviceLink, EventLog, SensorPoller, SensorSettings,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Time allowed for background tasks to finish after shutdown is signalled
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state of one node
pub struct NodeContext {
    pub config: Config,
    pub role: NodeRole,
    pub name: String,
    pub log: Arc<EventLog>,
    pub engine: Arc<DebounceEngine>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub notifications: Arc<NotificationStore>,
    pub device: Arc<DeviceLink>,
    pub mode: ModeHandle,
    pub input: Option<InputHandle>,
    pub supervisor: Arc<Supervisor>,
    pub outbox: Outbox,
    pub alerts: AlertQueue,
    /// Present on the panel only
    pub reminders: Option<Arc<ReminderStore>>,
    pub peer_status: Arc<PeerStatus>,
}

/// Overrides for the node's external collaborators; `None` uses the role default
#[derive(Default)]
pub struct NodeOptions {
    pub peer: Option<Arc<dyn PeerLink>>,
    pub chat: Option<Arc<dyn ChatNotifier>>,
    pub voice: Option<Arc<dyn VoiceAnnouncer>>,
    /// Where the hub reads reminders; defaults to the peer's `/reminders`
    pub reminder_source: Option<Arc<dyn ReminderSource>>,
}

/// A running node
pub struct Node {
    ctx: Arc<NodeContext>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    input_loop: Option<InputLoop>,
    peer: Arc<dyn PeerLink>,
    reminder_source: Option<Arc<dyn ReminderSource>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Build the node's components; must be called inside a tokio runtime
    pub fn new(config: Config, options: NodeOptions) -> Self {
        let role = config.node.role;
        let name = config.node.name.clone();
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let mut tasks = Vec::new();

        let peer: Arc<dyn PeerLink> = options.peer.unwrap_or_else(|| {
            Arc::new(PeerClient::new(&config.node.peer_url, &config.channel))
        });
        let (outbox, outbox_task) = Outbox::spawn(peer.clone(), config.channel.outbox_capacity);
        tasks.push(outbox_task);

        let chat: Arc<dyn ChatNotifier> = options.chat.unwrap_or_else(|| Arc::new(LogChatNotifier));
        let voice: Arc<dyn VoiceAnnouncer> = options.voice.unwrap_or_else(|| match role {
            NodeRole::Panel => Arc::new(PeerVoiceAnnouncer::new(outbox.clone(), name.clone())),
            NodeRole::Hub => Arc::new(LogVoiceAnnouncer),
        });

        let log = Arc::new(EventLog::new());
        let engine = Arc::new(DebounceEngine::new(
            SensorSettings::from(&config.sensors),
            log.clone(),
        ));
        let notifications = Arc::new(NotificationStore::new(name.clone()));
        let (alerts, alerts_task) =
            AlertQueue::spawn(chat, voice, config.channel.outbox_capacity);
        tasks.push(alerts_task);
        let dispatcher = Arc::new(AlertDispatcher::new(
            engine.clone(),
            notifications.clone(),
            alerts.clone(),
            config.sensors.event_cooldown,
        ));

        let reminders = matches!(role, NodeRole::Panel)
            .then(|| Arc::new(ReminderStore::from_config(&config.reminders)));
        let reminder_source = match role {
            NodeRole::Panel => None,
            NodeRole::Hub => Some(options.reminder_source.unwrap_or_else(|| {
                Arc::new(PeerClient::new(&config.node.peer_url, &config.channel))
                    as Arc<dyn ReminderSource>
            })),
        };

        let supervisor = Arc::new(Supervisor::new(&config.processes));
        let (mode, mode_task) = ModeController::spawn(ModeDeps {
            role,
            source_name: name.clone(),
            passcode: config.security.passcode.clone(),
            max_attempts: config.security.max_attempts,
            peer: peer.clone(),
            outbox: outbox.clone(),
            supervisor: supervisor.clone(),
            notifications: notifications.clone(),
            alerts: alerts.clone(),
            reminders: reminders.clone(),
            terminate: matches!(role, NodeRole::Panel).then(|| shutdown_tx.clone()),
        });
        tasks.push(mode_task);

        let (input_loop, input) = match role {
            NodeRole::Panel => {
                let (input_loop, handle) = InputLoop::new(
                    Duration::from_millis(config.input.hold_time_ms),
                    config.input.tick_hz,
                    mode.clone(),
                );
                (Some(input_loop), Some(handle))
            }
            NodeRole::Hub => (None, None),
        };

        let ctx = Arc::new(NodeContext {
            config,
            role,
            name,
            log,
            engine,
            dispatcher,
            notifications,
            device: Arc::new(DeviceLink::new()),
            mode,
            input,
            supervisor,
            outbox,
            alerts,
            reminders,
            peer_status: Arc::new(PeerStatus::new()),
        });

        tracing::info!("Node {} initialised as {}", ctx.name, role.as_str());
        Self {
            ctx,
            shutdown_tx,
            input_loop,
            peer,
            reminder_source,
            tasks,
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Receiver that flips to `true` when the node starts shutting down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Serve the HTTP surface on `listener` in the background
    pub fn spawn_server(&mut self, listener: TcpListener) {
        let router = server::router(self.ctx.clone());
        let shutdown = self.shutdown_signal();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = server::serve(listener, router, shutdown).await {
                tracing::error!("HTTP server error: {:#}", e);
            }
        }));
    }

    /// Start the role's background loops
    pub fn spawn_background(&mut self) {
        if let Some(input_loop) = self.input_loop.take() {
            let shutdown = self.shutdown_signal();
            self.tasks.push(tokio::spawn(input_loop.run(shutdown)));
        }

        let ctx = self.ctx.clone();
        match ctx.role {
            NodeRole::Panel => {
                let monitor = PeerMonitor::new(
                    self.peer.clone(),
                    ctx.peer_status.clone(),
                    ctx.notifications.clone(),
                    ctx.config.node.peer_url.clone(),
                    Duration::from_secs(ctx.config.channel.health_interval_secs),
                );
                let shutdown = self.shutdown_signal();
                self.tasks.push(tokio::spawn(monitor.run(shutdown)));
            }
            NodeRole::Hub => {
                if let Some(source) = self.reminder_source.take() {
                    let checker = ReminderChecker::new(
                        source,
                        ctx.alerts.clone(),
                        ctx.notifications.clone(),
                        &ctx.config.reminders,
                    );
                    let shutdown = self.shutdown_signal();
                    self.tasks.push(tokio::spawn(checker.run(shutdown)));
                }
            }
        }

        let sensors = &ctx.config.sensors;
        if let (NodeRole::Panel, Some(path)) = (ctx.role, sensors.source_path.as_ref()) {
            let poller = SensorPoller::new(
                path.as_str(),
                sensors,
                ctx.dispatcher.clone(),
                ctx.device.clone(),
                ctx.notifications.clone(),
            );
            let shutdown = self.shutdown_signal();
            self.tasks.push(tokio::spawn(poller.run(shutdown)));
        }
    }

    /// Wait until shutdown is triggered (Ctrl-C or a top-level escape)
    pub async fn wait_for_shutdown(&self) {
        let mut signal = self.shutdown_signal();
        if *signal.borrow() {
            return;
        }
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                tracing::info!("Ctrl-C received");
            }
            _ = signal.changed() => {}
        }
    }

    /// Signal shutdown, stop subprocesses and wait for background tasks
    pub async fn shutdown(self) {
        tracing::info!("Shutting down node {}", self.ctx.name);
        self.trigger_shutdown();
        self.ctx.supervisor.stop_all().await;

        let Node { ctx, tasks, .. } = self;
        // Outbox and controller tasks end once the context drops their senders
        drop(ctx);
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!("Background task did not stop in time");
            }
        }
        tracing::info!("Node stopped");
    }
}

/// Run a node until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let listener = TcpListener::bind(&config.node.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.node.listen_addr))?;

    let mut node = Node::new(config, NodeOptions::default());
    node.spawn_server(listener);
    node.spawn_background();

    node.wait_for_shutdown().await;
    node.shutdown().await;
    Ok(())
}
