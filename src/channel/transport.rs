use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

/// Close code sent by a server that shut the channel down on purpose.
pub const CLEAN_CLOSE: u16 = 1000;

/// What happened on a channel, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    Error(String),
    /// Always the last event of a channel that was not closed locally.
    Closed { code: Option<u16>, reason: String },
}

impl ChannelEvent {
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ChannelEvent::Closed { code: Some(CLEAN_CLOSE), .. })
    }
}

type Deliver = dyn Fn(u64, ChannelEvent) + Send + Sync;

/// Where a channel reports its events. Each connection attempt gets its own
/// generation so events from a superseded channel can be told apart.
#[derive(Clone)]
pub struct ChannelSink {
    generation: u64,
    deliver: Arc<Deliver>,
}

impl ChannelSink {
    pub fn new(generation: u64, deliver: Arc<Deliver>) -> Self {
        Self {
            generation,
            deliver,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: ChannelEvent) {
        (self.deliver)(self.generation, event);
    }
}

/// Owner's side of an open channel. Closing (or dropping) it shuts the
/// channel down without reporting a `Closed` event.
pub struct ChannelHandle {
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn new(close_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            close_tx: Some(close_tx),
            task: Some(task),
        }
    }

    /// A handle with nothing behind it, for fake connectors.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            close_tx: None,
            task: None,
        }
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        // The task exits on its own after sending the close frame
        self.task.take();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Opens real-time channels. Swapped for a scripted fake in tests.
pub trait ChannelConnector: Send + Sync {
    fn open(&self, url: Url, sink: ChannelSink) -> ChannelHandle;
}

/// Connector backed by a WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl ChannelConnector for WebSocketConnector {
    fn open(&self, url: Url, sink: ChannelSink) -> ChannelHandle {
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_channel(url, sink, close_rx));
        ChannelHandle::new(close_tx, task)
    }
}

async fn run_channel(url: Url, sink: ChannelSink, mut close_rx: oneshot::Receiver<()>) {
    let generation = sink.generation();

    let stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(generation, "channel connect failed: {}", e);
                sink.emit(ChannelEvent::Error(e.to_string()));
                sink.emit(ChannelEvent::Closed {
                    code: None,
                    reason: e.to_string(),
                });
                return;
            }
        },
        _ = &mut close_rx => return,
    };

    sink.emit(ChannelEvent::Opened);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                debug!(generation, "closing channel locally");
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => sink.emit(ChannelEvent::Message(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    sink.emit(ChannelEvent::Message(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    sink.emit(ChannelEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.emit(ChannelEvent::Error(e.to_string()));
                    sink.emit(ChannelEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    });
                    return;
                }
                None => {
                    sink.emit(ChannelEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            }
        }
    }
}
