use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

use crate::auth::OperatorSet;
use crate::config::Config;
use crate::db::{MessageArchive, SaveOutcome};
use crate::error::ArchivistError;
use crate::gateway::{Connector, GatewayConnection, GatewayEvent};
use crate::lifecycle::{LifecycleHandle, StopReason, WorkerLauncher};
use crate::notify::{Notifier, PendingNotifications, SUPERVISOR_STOP_NOTICE};
use crate::record::{MessageEvent, MessageRecord};
use crate::router::{
    format_query_reply, route, shutdown_notice, split_reply, Action, Followup,
    DISCORD_MESSAGE_LIMIT,
};

/// Per-run settings handed to every worker instead of global state.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub operators: OperatorSet,
    pub tz: Tz,
    pub disconnect_message: String,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Result<Self, ArchivistError> {
        Ok(WorkerSettings {
            operators: OperatorSet::new(config.operators.iter().copied()),
            tz: config.tz()?,
            disconnect_message: config.disconnect_message.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped(StopReason),
    ConnectionLost,
}

/// Owns one gateway connection and handles its events strictly in order.
pub struct Worker<C: GatewayConnection> {
    conn: C,
    archive: Arc<dyn MessageArchive>,
    notifications: PendingNotifications,
    settings: Arc<WorkerSettings>,
    handle: LifecycleHandle,
    self_id: Option<u64>,
    disconnect_reported: bool,
}

impl<C: GatewayConnection> Worker<C> {
    pub fn new(
        conn: C,
        archive: Arc<dyn MessageArchive>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<WorkerSettings>,
        handle: LifecycleHandle,
    ) -> Self {
        Worker {
            conn,
            archive,
            notifications: PendingNotifications::new(notifier),
            settings,
            handle,
            self_id: None,
            disconnect_reported: false,
        }
    }

    pub async fn run(mut self) {
        let stop = self.handle.stop_signal().clone();
        let exit = loop {
            tokio::select! {
                biased;
                reason = stop.wait() => break Exit::Stopped(reason),
                event = self.conn.next_event() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break Exit::ConnectionLost,
                },
            }
        };

        match exit {
            Exit::Stopped(reason) => {
                self.handle.mark_stopping();
                info!("Stop observed ({reason:?}); closing gateway connection");
                if reason == StopReason::Supervisor {
                    self.notifications.spawn("stop", SUPERVISOR_STOP_NOTICE);
                }
            }
            Exit::ConnectionLost => {
                warn!("Gateway connection closed");
                self.report_disconnect();
            }
        }

        self.conn.close().await;
        self.notifications.drain().await;
    }

    async fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready { user_id, user_name } => {
                info!("Connected to gateway as {user_name} ({user_id})");
                self.self_id = Some(user_id);
                self.disconnect_reported = false;
                self.handle.mark_running();
            }
            GatewayEvent::Resumed => {
                info!("Gateway session resumed");
                self.disconnect_reported = false;
            }
            GatewayEvent::Disconnected => {
                warn!("Gateway disconnected");
                self.report_disconnect();
            }
            GatewayEvent::Message(message) => self.handle_message(message).await,
        }
    }

    /// At most once per drop, and never for a drop caused by a stop request.
    fn report_disconnect(&mut self) {
        if self.disconnect_reported || self.handle.stop_signal().is_requested() {
            return;
        }
        self.disconnect_reported = true;
        self.notifications
            .spawn("disconnect", self.settings.disconnect_message.clone());
    }

    async fn handle_message(&mut self, message: MessageEvent) {
        match route(&message, &self.settings.operators, self.self_id) {
            Action::Noop => {}
            Action::Shutdown { operator_id } => {
                info!("Shutdown requested by operator {operator_id}");
                self.notifications
                    .spawn("shutdown", shutdown_notice(operator_id));
                self.handle
                    .request_stop(StopReason::OperatorCommand { operator_id });
            }
            Action::Persist { followup } => {
                self.persist(&message).await;
                match followup {
                    None => {}
                    Some(Followup::Reply(text)) => {
                        info!(
                            "Rejected query from unauthorized user {}",
                            message.author_id
                        );
                        self.reply(message.channel_id, &text).await;
                    }
                    Some(Followup::Query(sql)) => {
                        info!("Operator {} running query", message.author_id);
                        let result = self.archive.query(sql).await;
                        if let Err(e) = &result {
                            warn!("Query failed: {e}");
                        }
                        self.reply(message.channel_id, &format_query_reply(&result))
                            .await;
                    }
                }
            }
        }
    }

    async fn persist(&self, message: &MessageEvent) {
        let record = MessageRecord::from_event(message, self.settings.tz);
        match self.archive.save(record).await {
            Ok(SaveOutcome::Inserted) => debug!("Archived message {}", message.id),
            Ok(SaveOutcome::Duplicate) => debug!("Skipped duplicate message {}", message.id),
            Err(e) => error!("Failed to archive message {}: {e}", message.id),
        }
    }

    async fn reply(&self, channel_id: u64, text: &str) {
        for chunk in split_reply(text, DISCORD_MESSAGE_LIMIT) {
            if let Err(e) = self.conn.send_text(channel_id, &chunk).await {
                warn!("Failed to send reply to channel {channel_id}: {e}");
                return;
            }
        }
    }
}

/// Connects and runs one worker per bridge `start()`.
pub struct ArchiveService<K: Connector> {
    connector: K,
    archive: Arc<dyn MessageArchive>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<WorkerSettings>,
}

impl<K: Connector> ArchiveService<K> {
    pub fn new(
        connector: K,
        archive: Arc<dyn MessageArchive>,
        notifier: Arc<dyn Notifier>,
        settings: WorkerSettings,
    ) -> Self {
        ArchiveService {
            connector,
            archive,
            notifier,
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl<K: Connector + 'static> WorkerLauncher for ArchiveService<K> {
    async fn run(&self, handle: LifecycleHandle) {
        let conn = match self.connector.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to gateway: {e}");
                let mut notifications = PendingNotifications::new(self.notifier.clone());
                notifications.spawn("disconnect", self.settings.disconnect_message.clone());
                notifications.drain().await;
                return;
            }
        };
        Worker::new(
            conn,
            self.archive.clone(),
            self.notifier.clone(),
            self.settings.clone(),
            handle,
        )
        .run()
        .await;
    }
}
