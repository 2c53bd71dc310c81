//! STOMP session over a single websocket connection.

use crate::{StompCommand, StompFrame};
use backoff::{future::retry, ExponentialBackoff};
use cw_config::PushConfig;
use cw_types::{
    InboundMessage, PubSubError, PubSubResult, PushSession, SubscriptionId, TaskSpawner,
};
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use std::{future::pending, time::Duration};
use tokio::{sync::mpsc, time::interval};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Capacity of the inbound message channel.
const INBOUND_CAPACITY: usize = 1_000;

type WsError = tokio_tungstenite::tungstenite::Error;

/// Handle to the push connection.
///
/// Frames are queued to a writer task so subscribing never blocks. Inbound
/// MESSAGE frames are forwarded on the receiver returned by [Self::connect].
#[derive(Debug, Clone)]
pub struct StompSession {
    outbound: mpsc::UnboundedSender<StompFrame>,
}

impl StompSession {
    /// Open the websocket, exchange CONNECT/CONNECTED and spawn the reader
    /// and writer tasks.
    ///
    /// The connection is retried with exponential backoff until
    /// `max_connect_time` elapses.
    pub async fn connect(
        config: &PushConfig,
        spawner: &TaskSpawner,
    ) -> PubSubResult<(Self, mpsc::Receiver<InboundMessage>)> {
        let url = config.url.as_str();
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(config.max_connect_time),
            ..Default::default()
        };
        let (ws, _) = retry(policy, || async move {
            connect_async(url).await.map_err(|e| {
                warn!(target: "worker::push", %url, ?e, "push connection failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
        .map_err(|e| PubSubError::Connection(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();
        let connect = StompFrame::connect(host_of(url), config.heartbeat.as_millis());
        sink.send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| PubSubError::Connection(e.to_string()))?;
        tokio::time::timeout(config.max_connect_time, await_connected(&mut stream))
            .await
            .map_err(|_| PubSubError::Connection("no CONNECTED frame".to_string()))??;
        info!(target: "worker::push", %url, "push session connected");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        spawner.spawn_critical_task("push writer", write_frames(sink, outbound_rx, config.heartbeat));
        spawner.spawn_critical_task("push reader", read_frames(stream, inbound_tx));

        Ok((Self { outbound }, inbound_rx))
    }

    /// Queue a DISCONNECT frame. The connection closes once it is written.
    pub fn disconnect(&self) {
        let _ = self.outbound.send(StompFrame::new(StompCommand::Disconnect));
    }

    fn send(&self, frame: StompFrame) -> PubSubResult<()> {
        self.outbound.send(frame).map_err(|_| PubSubError::SessionClosed)
    }
}

impl PushSession for StompSession {
    fn subscribe(&self, destination: &str) -> PubSubResult<SubscriptionId> {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(StompFrame::subscribe(&id, destination))?;
        debug!(target: "worker::push", %destination, subscription = %id, "subscribe queued");
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, subscription: &SubscriptionId) -> PubSubResult<()> {
        self.send(StompFrame::unsubscribe(&subscription.0))?;
        debug!(target: "worker::push", %subscription, "unsubscribe queued");
        Ok(())
    }
}

/// Authority part of a websocket url.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

async fn await_connected<S>(stream: &mut S) -> PubSubResult<()>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| PubSubError::Connection(e.to_string()))?;
        let Message::Text(text) = msg else { continue };
        match StompFrame::parse(text.as_str())? {
            Some(frame) if frame.command == StompCommand::Connected => return Ok(()),
            Some(frame) if frame.command == StompCommand::Error => {
                let reason = frame.get("message").unwrap_or("unknown").to_string();
                return Err(PubSubError::Connection(reason));
            }
            _ => {}
        }
    }
    Err(PubSubError::Connection("closed before CONNECTED".to_string()))
}

/// Drain queued frames to the socket and send heart-beats.
async fn write_frames<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<StompFrame>,
    heartbeat: Duration,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut ticker = (!heartbeat.is_zero()).then(|| interval(heartbeat));
    loop {
        let tick = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => pending::<()>().await,
            }
        };
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let disconnect = frame.command == StompCommand::Disconnect;
                    let text = frame.encode();
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        error!(target: "worker::push", ?e, "failed to write frame");
                        break;
                    }
                    if disconnect {
                        let _ = sink.close().await;
                        break;
                    }
                    continue;
                }
                None => break,
            },
            _ = tick => Message::Text(String::from("\n").into()),
        };
        if let Err(e) = sink.send(message).await {
            error!(target: "worker::push", ?e, "failed to write heart-beat");
            break;
        }
    }
    info!(target: "worker::push", "push writer stopped");
}

/// Forward MESSAGE frames until the connection closes.
async fn read_frames<S>(mut stream: S, inbound: mpsc::Sender<InboundMessage>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(reason)) => {
                warn!(target: "worker::push", ?reason, "push connection closed by peer");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(target: "worker::push", ?e, "push connection failed");
                break;
            }
        };
        let frame = match StompFrame::parse(text.as_str()) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!(target: "worker::push", ?e, "dropping malformed frame");
                continue;
            }
        };
        match frame.command {
            StompCommand::Message => {
                let message = InboundMessage {
                    subscription: SubscriptionId(
                        frame.get("subscription").unwrap_or_default().to_string(),
                    ),
                    destination: frame.get("destination").unwrap_or_default().to_string(),
                    body: frame.body,
                };
                if inbound.send(message).await.is_err() {
                    debug!(target: "worker::push", "inbound receiver dropped");
                    break;
                }
            }
            StompCommand::Error => {
                error!(target: "worker::push", message = ?frame.get("message"), body = %frame.body, "broker error");
            }
            other => debug!(target: "worker::push", command = %other, "ignoring frame"),
        }
    }
    info!(target: "worker::push", "push reader stopped");
}
