//! Realtime change feed over the platform's Phoenix-channel websocket.
//!
//! One socket is shared by every subscription of a [`RestBackend`]. Each
//! subscription becomes its own channel topic joined with a
//! `postgres_changes` config. The socket task owns all topic state; callers
//! talk to it through a command queue, so nothing here is locked.
//!
//! On socket loss the task reconnects with capped exponential backoff,
//! re-joins every live topic and pushes a [`ChangeKind::Resync`] into each,
//! since changes made while disconnected are gone.
//!
//! [`RestBackend`]: super::RestBackend

use std::collections::HashMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{BackendError, ChangeEvent, ChangeKind, ChannelSpec, Subscription};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const PHOENIX_TOPIC: &str = "phoenix";

enum Command {
    Join(Topic),
    Leave(String),
}

struct Topic {
    name: String,
    spec: ChannelSpec,
    access_token: Option<String>,
    events: mpsc::UnboundedSender<ChangeEvent>,
    joined: bool,
}

/// Handle to the shared socket task.
pub(crate) struct RealtimeClient {
    url: Url,
    heartbeat: Duration,
    commands: OnceLock<mpsc::UnboundedSender<Command>>,
    next_topic: AtomicU64,
}

impl RealtimeClient {
    /// `url` must already carry the `apikey` and `vsn` query parameters.
    pub(crate) const fn new(url: Url, heartbeat: Duration) -> Self {
        Self {
            url,
            heartbeat,
            commands: OnceLock::new(),
            next_topic: AtomicU64::new(1),
        }
    }

    /// The socket task is started on first use so that constructing a client
    /// does not need a runtime.
    fn commands(&self) -> &mpsc::UnboundedSender<Command> {
        self.commands.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_socket(self.url.clone(), self.heartbeat, rx));
            tx
        })
    }

    pub(crate) fn subscribe(
        &self,
        spec: ChannelSpec,
        access_token: Option<String>,
    ) -> Result<Subscription, BackendError> {
        let n = self.next_topic.fetch_add(1, Ordering::Relaxed);
        let name = format!("realtime:{}:{n}", spec.table);
        let (events, rx) = mpsc::unbounded_channel();

        let commands = self.commands().clone();
        commands
            .send(Command::Join(Topic {
                name: name.clone(),
                spec,
                access_token,
                events,
                joined: false,
            }))
            .map_err(|_| BackendError::Unavailable("realtime socket task stopped".to_string()))?;

        Ok(Subscription::new(rx, move || {
            // The task may already be gone during shutdown
            let _ = commands.send(Command::Leave(name));
        }))
    }
}

enum Outcome {
    Shutdown,
    Disconnected(String),
}

async fn run_socket(url: Url, heartbeat: Duration, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut topics: HashMap<String, Topic> = HashMap::new();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        // Nothing to listen to: stay disconnected until the first join
        if topics.is_empty() {
            match commands.recv().await {
                Some(command) => apply_offline(&mut topics, command),
                None => return,
            }
            continue;
        }

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                info!(topics = topics.len(), "Realtime socket connected");
                backoff = INITIAL_BACKOFF;
                match run_connection(socket, &mut topics, &mut commands, heartbeat).await {
                    Outcome::Shutdown => return,
                    Outcome::Disconnected(reason) => {
                        warn!(reason = %reason, "Realtime socket disconnected");
                    }
                }
            }
            Err(e) => warn!(error = %e, backoff_secs = backoff.as_secs(), "Realtime connect failed"),
        }

        // Back off, still accepting joins and leaves
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            let command = tokio::select! {
                () = &mut sleep => None,
                command = commands.recv() => Some(command),
            };
            match command {
                None => break,
                Some(Some(command)) => apply_offline(&mut topics, command),
                Some(None) => return,
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn apply_offline(topics: &mut HashMap<String, Topic>, command: Command) {
    match command {
        Command::Join(topic) => {
            topics.insert(topic.name.clone(), topic);
        }
        Command::Leave(name) => {
            topics.remove(&name);
        }
    }
}

enum Step {
    Heartbeat,
    Command(Option<Command>),
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

async fn run_connection<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    topics: &mut HashMap<String, Topic>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    heartbeat: Duration,
) -> Outcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut refs = 0_u64;

    for topic in topics.values_mut() {
        refs += 1;
        if let Err(e) = sink.send(join_frame(topic, refs)).await {
            return Outcome::Disconnected(e.to_string());
        }
        if topic.joined {
            let _ = topic.events.send(ChangeEvent::resync(&topic.spec.table));
        }
        topic.joined = true;
    }

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        let step = tokio::select! {
            _ = ticker.tick() => Step::Heartbeat,
            command = commands.recv() => Step::Command(command),
            frame = stream.next() => Step::Frame(frame),
        };

        refs += 1;
        let outgoing = match step {
            Step::Heartbeat => Some(frame(PHOENIX_TOPIC, "heartbeat", &json!({}), refs)),
            Step::Command(None) => {
                let _ = sink.close().await;
                return Outcome::Shutdown;
            }
            Step::Command(Some(Command::Join(mut topic))) => {
                let join = join_frame(&topic, refs);
                topic.joined = true;
                debug!(topic = %topic.name, table = %topic.spec.table, "Joining realtime topic");
                topics.insert(topic.name.clone(), topic);
                Some(join)
            }
            Step::Command(Some(Command::Leave(name))) => topics.remove(&name).map(|topic| {
                debug!(topic = %topic.name, "Leaving realtime topic");
                frame(&topic.name, "phx_leave", &json!({}), refs)
            }),
            Step::Frame(Some(Ok(Message::Text(text)))) => {
                dispatch(topics, text.as_str());
                None
            }
            Step::Frame(Some(Ok(Message::Close(_))) | None) => {
                return Outcome::Disconnected("closed by server".to_string());
            }
            Step::Frame(Some(Ok(_))) => None,
            Step::Frame(Some(Err(e))) => return Outcome::Disconnected(e.to_string()),
        };

        if let Some(message) = outgoing
            && let Err(e) = sink.send(message).await
        {
            return Outcome::Disconnected(e.to_string());
        }
    }
}

fn frame(topic: &str, event: &str, payload: &Value, reference: u64) -> Message {
    let body = json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference.to_string(),
    });
    Message::text(body.to_string())
}

fn join_frame(topic: &Topic, reference: u64) -> Message {
    frame(&topic.name, "phx_join", &join_payload(topic), reference)
}

fn join_payload(topic: &Topic) -> Value {
    let changes: Vec<Value> = topic
        .spec
        .effective_bindings()
        .iter()
        .map(|binding| {
            let mut change = json!({
                "event": binding.events.as_wire(),
                "schema": "public",
                "table": topic.spec.table,
            });
            if let (Some(filter), Some(object)) = (binding.filter_wire(), change.as_object_mut()) {
                object.insert("filter".to_string(), Value::String(filter));
            }
            change
        })
        .collect();

    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": changes,
        }
    });
    if let (Some(token), Some(object)) = (&topic.access_token, payload.as_object_mut()) {
        object.insert("access_token".to_string(), Value::String(token.clone()));
    }
    payload
}

#[derive(Deserialize)]
struct IncomingFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

fn dispatch(topics: &HashMap<String, Topic>, text: &str) {
    let incoming: IncomingFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Undecodable realtime frame");
            return;
        }
    };

    match incoming.event.as_str() {
        "postgres_changes" => {
            let Some(topic) = topics.get(&incoming.topic) else {
                return;
            };
            match decode_change(&topic.spec.table, &incoming.payload) {
                Some(event) => {
                    // Receiver gone means the subscription is being dropped
                    let _ = topic.events.send(event);
                }
                None => warn!(topic = %incoming.topic, "Unrecognised postgres_changes payload"),
            }
        }
        "phx_reply" => {
            if incoming.payload.get("status").and_then(Value::as_str) == Some("error") {
                warn!(
                    topic = %incoming.topic,
                    response = %incoming.payload.get("response").unwrap_or(&serde_json::Value::Null),
                    "Realtime join rejected"
                );
            }
        }
        "phx_error" | "phx_close" => {
            warn!(topic = %incoming.topic, event = %incoming.event, "Realtime topic closed");
        }
        _ => {}
    }
}

/// Decode a `postgres_changes` payload. The server nests the change under
/// `data` with `type`/`record`/`old_record`; the flattened
/// `eventType`/`new`/`old` form is accepted as well.
fn decode_change(table: &str, payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data").unwrap_or(payload);
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .and_then(ChangeKind::from_wire)?;

    let row = |keys: [&str; 2]| {
        keys.iter()
            .find_map(|key| data.get(*key))
            .filter(|value| value.as_object().is_some_and(|object| !object.is_empty()))
            .cloned()
    };

    Some(ChangeEvent {
        table: data
            .get("table")
            .and_then(Value::as_str)
            .unwrap_or(table)
            .to_string(),
        kind,
        record: row(["record", "new"]),
        old_record: row(["old_record", "old"]),
    })
}
