use std::sync::Arc;

use chrono::{DateTime, Utc};
use serenity::async_trait;
use serenity::gateway::{ConnectionStage, ShardManager, ShardStageUpdateEvent};
use serenity::http::Http;
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::event::ResumedEvent;
use serenity::model::gateway::Ready;
use serenity::model::id::ChannelId;
use serenity::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::ArchivistError;
use crate::gateway::{Connector, GatewayConnection, GatewayEvent};
use crate::record::MessageEvent;

pub struct DiscordConnector {
    token: String,
}

impl DiscordConnector {
    pub fn new(token: impl Into<String>) -> Self {
        DiscordConnector {
            token: token.into(),
        }
    }
}

/// Forwards serenity callbacks into the worker's ordered event queue.
struct ForwardingHandler {
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl ForwardingHandler {
    fn forward(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            warn!("Dropping Discord event: worker is gone");
        }
    }
}

/// Channel label stored with an archived message. Guild channels use their
/// cached name; direct messages are labelled after the other party.
fn channel_label(
    in_guild: bool,
    cached_name: Option<String>,
    channel_id: u64,
    author_name: &str,
) -> String {
    match cached_name {
        Some(name) => name,
        None if in_guild => channel_id.to_string(),
        None => format!("Direct Message with {author_name}"),
    }
}

fn created_at(unix_secs: i64, nanos: u32) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(unix_secs, nanos).unwrap_or_else(Utc::now)
}

/// Build the event from cache lookups only. Serenity runs each handler call in
/// its own task, so any await here could let a later message overtake this one.
fn message_event(ctx: &Context, msg: &DiscordMessage) -> MessageEvent {
    let (guild_name, cached_channel) = match msg.guild_id.and_then(|id| ctx.cache.guild(id)) {
        Some(guild) => {
            let channel = guild
                .channels
                .get(&msg.channel_id)
                .map(|channel| channel.name.clone())
                .or_else(|| {
                    guild
                        .threads
                        .iter()
                        .find(|thread| thread.id == msg.channel_id)
                        .map(|thread| thread.name.clone())
                });
            (Some(guild.name.clone()), channel)
        }
        None => (None, None),
    };
    MessageEvent {
        id: msg.id.get(),
        guild_id: msg.guild_id.map(|id| id.get()),
        guild_name,
        channel_id: msg.channel_id.get(),
        channel_name: channel_label(
            msg.guild_id.is_some(),
            cached_channel,
            msg.channel_id.get(),
            &msg.author.name,
        ),
        author_id: msg.author.id.get(),
        author_name: msg.author.name.clone(),
        author_is_bot: msg.author.bot,
        content: msg.content.clone(),
        created_at: created_at(msg.timestamp.unix_timestamp(), msg.timestamp.nanosecond()),
    }
}

#[async_trait]
impl EventHandler for ForwardingHandler {
    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        self.forward(GatewayEvent::Message(message_event(&ctx, &msg)));
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.forward(GatewayEvent::Ready {
            user_id: ready.user.id.get(),
            user_name: ready.user.name.clone(),
        });
    }

    async fn resume(&self, _ctx: Context, _event: ResumedEvent) {
        self.forward(GatewayEvent::Resumed);
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        if event.new == ConnectionStage::Disconnected {
            self.forward(GatewayEvent::Disconnected);
        }
    }
}

fn is_disallowed_gateway_intents(err: &serenity::Error) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("disallowed gateway intents")
        || text.contains("disallowed intent")
        || text.contains("4014")
}

fn log_client_exit(result: Result<Result<(), serenity::Error>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("Discord client exited"),
        Ok(Err(e)) if is_disallowed_gateway_intents(&e) => warn!(
            "Discord rejected the MESSAGE_CONTENT intent (4014). Enable Message Content Intent in the Discord Developer Portal."
        ),
        Ok(Err(e)) => error!("Discord client error: {e}"),
        Err(e) => error!("Discord client task failed: {e}"),
    }
}

#[async_trait]
impl Connector for DiscordConnector {
    type Connection = DiscordConnection;

    async fn connect(&self) -> Result<DiscordConnection, ArchivistError> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let (tx, rx) = mpsc::unbounded_channel();

        info!("Starting Discord client (requesting MESSAGE_CONTENT intent)...");
        let mut client = Client::builder(&self.token, intents)
            .event_handler(ForwardingHandler { events: tx })
            .await
            .map_err(|e| ArchivistError::Gateway(format!("Failed to build Discord client: {e}")))?;

        let http = client.http.clone();
        let shard_manager = client.shard_manager.clone();
        let client_task = tokio::spawn(async move { client.start().await });

        Ok(DiscordConnection {
            events: rx,
            http,
            shard_manager,
            client_task: Some(client_task),
        })
    }
}

pub struct DiscordConnection {
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    http: Arc<Http>,
    shard_manager: Arc<ShardManager>,
    client_task: Option<JoinHandle<Result<(), serenity::Error>>>,
}

#[async_trait]
impl GatewayConnection for DiscordConnection {
    async fn next_event(&mut self) -> Option<GatewayEvent> {
        let Some(task) = self.client_task.as_mut() else {
            return self.events.try_recv().ok();
        };
        let result = tokio::select! {
            event = self.events.recv() => return event,
            result = task => result,
        };
        self.client_task = None;
        log_client_exit(result);
        // Events queued before the client exited are still delivered.
        self.events.try_recv().ok()
    }

    async fn send_text(&self, channel_id: u64, text: &str) -> Result<(), ArchivistError> {
        if channel_id == 0 {
            return Err(ArchivistError::Gateway("invalid channel id 0".into()));
        }
        ChannelId::new(channel_id)
            .say(&self.http, text)
            .await
            .map_err(|e| ArchivistError::Gateway(format!("Failed to send Discord message: {e}")))?;
        Ok(())
    }

    async fn close(&mut self) {
        self.shard_manager.shutdown_all().await;
        if let Some(task) = self.client_task.take() {
            log_client_exit(task.await);
        }
        self.events.close();
    }
}
