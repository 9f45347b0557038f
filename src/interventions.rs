//! Real-time intervention subscription.
//!
//! The registry pushes interventions for subscribed entities as a
//! server-sent-event stream. [`InterventionSubscription`] reads that stream
//! on a background task and either queues interventions for the caller to
//! pull, or calls registered handlers in registration order.
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::SignalsClient;

/// Entity instance an intervention stream is opened for, e.g. `domain_sessionid=abc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeKeyIdentifier {
    pub name: String,
    pub id: String,
}

impl AttributeKeyIdentifier {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub name: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_uri: Option<String>,
    #[serde(default)]
    pub target_agents: Vec<String>,
    /// Attribute values that triggered the intervention.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id,
        })
    }
}

/// Decode an intervention from an event. Keep-alives and unknown payloads yield `None`.
pub fn parse_intervention(event: &SseEvent) -> Option<Intervention> {
    match event.event.as_deref() {
        None | Some("message") | Some("intervention") => {}
        Some(other) => {
            debug!(event = other, "ignoring event");
            return None;
        }
    }
    match serde_json::from_str(&event.data) {
        Ok(intervention) => Some(intervention),
        Err(e) => {
            warn!(error = %e, "skipping malformed intervention");
            None
        }
    }
}

/// Source of raw stream bytes. `Ok(None)` marks the end of the stream.
pub trait ChunkStream: Send + 'static {
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}

impl ChunkStream for reqwest::Response {
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        async move { Ok(self.chunk().await?.map(|bytes| bytes.to_vec())) }
    }
}

impl ChunkStream for mpsc::Receiver<Vec<u8>> {
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        async move { Ok(self.recv().await) }
    }
}

pub type InterventionHandler = Arc<dyn Fn(&Intervention) -> Result<()> + Send + Sync>;

enum QueueSender {
    Bounded(mpsc::Sender<Intervention>),
    Unbounded(mpsc::UnboundedSender<Intervention>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<Intervention>),
    Unbounded(mpsc::UnboundedReceiver<Intervention>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Intervention> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Intervention> {
        match self {
            QueueReceiver::Bounded(rx) => rx.try_recv().ok(),
            QueueReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

fn queue(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    }
}

enum Dispatcher {
    Queue(QueueSender),
    Handlers {
        handlers: Vec<InterventionHandler>,
        propagate_errors: bool,
    },
}

impl Dispatcher {
    /// Returns `false` once nobody can receive any more interventions.
    async fn dispatch(&self, intervention: Intervention) -> Result<bool> {
        match self {
            Dispatcher::Queue(QueueSender::Bounded(tx)) => Ok(tx.send(intervention).await.is_ok()),
            Dispatcher::Queue(QueueSender::Unbounded(tx)) => Ok(tx.send(intervention).is_ok()),
            Dispatcher::Handlers {
                handlers,
                propagate_errors,
            } => {
                for handler in handlers {
                    if let Err(e) = handler(&intervention) {
                        if *propagate_errors {
                            return Err(e.context(format!(
                                "handler failed for intervention '{}'",
                                intervention.name
                            )));
                        }
                        warn!(intervention = %intervention.name, error = %e, "intervention handler failed");
                    }
                }
                Ok(true)
            }
        }
    }
}

/// Background subscription to an intervention stream.
///
/// Without handlers, interventions are queued and pulled with [`get`](Self::get).
/// With handlers, each one runs on the worker task for every intervention.
pub struct InterventionSubscription {
    handlers: Vec<InterventionHandler>,
    queue_capacity: Option<usize>,
    propagate_handler_errors: bool,
    receiver: Option<QueueReceiver>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl Default for InterventionSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl InterventionSubscription {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            queue_capacity: None,
            propagate_handler_errors: false,
            receiver: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            worker: None,
        }
    }

    /// Bound the pull queue. The worker waits when it is full.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_handler(
        mut self,
        handler: impl Fn(&Intervention) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Stop the worker on the first handler error instead of logging it.
    pub fn propagate_handler_errors(mut self, propagate: bool) -> Self {
        self.propagate_handler_errors = propagate;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Open the stream for `targets` and start the worker.
    pub async fn start(
        &mut self,
        client: &SignalsClient,
        targets: &[AttributeKeyIdentifier],
    ) -> Result<bool> {
        if self.is_running() {
            return Ok(false);
        }
        let response = client.open_intervention_stream(targets).await?;
        info!(targets = targets.len(), "subscribed to interventions");
        self.start_with(response)
    }

    /// Start the worker on an already opened stream. Returns `false` if it was already running.
    pub fn start_with<S: ChunkStream>(&mut self, stream: S) -> Result<bool> {
        if self.is_running() {
            return Ok(false);
        }
        if let Some(finished) = self.worker.take() {
            debug!(finished = finished.is_finished(), "replacing stopped worker");
        }

        // A stop after the previous stream ended leaves a permit behind.
        self.shutdown = Arc::new(AtomicBool::new(false));
        self.wake = Arc::new(Notify::new());
        let dispatcher = if self.handlers.is_empty() {
            let (tx, rx) = queue(self.queue_capacity);
            self.receiver = Some(rx);
            Dispatcher::Queue(tx)
        } else {
            Dispatcher::Handlers {
                handlers: self.handlers.clone(),
                propagate_errors: self.propagate_handler_errors,
            }
        };

        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        self.worker = Some(tokio::spawn(run_worker(stream, dispatcher, shutdown, wake)));
        Ok(true)
    }

    /// Signal the worker and wait for it. Returns the worker's error, if any.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        worker
            .await
            .map_err(|e| anyhow!("intervention worker panicked: {}", e))?
    }

    /// Wait up to `timeout` for the next queued intervention.
    pub async fn get(&mut self, timeout: Duration) -> Option<Intervention> {
        let receiver = self.receiver.as_mut()?;
        tokio::time::timeout(timeout, receiver.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_get(&mut self) -> Option<Intervention> {
        self.receiver.as_mut()?.try_recv()
    }
}

impl Drop for InterventionSubscription {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_worker<S: ChunkStream>(
    mut stream: S,
    dispatcher: Dispatcher,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
) -> Result<()> {
    let mut parser = SseParser::new();
    while !shutdown.load(Ordering::SeqCst) {
        let chunk = tokio::select! {
            _ = wake.notified() => break,
            chunk = stream.next_chunk() => chunk?,
        };
        let Some(chunk) = chunk else {
            debug!("intervention stream ended");
            break;
        };
        for event in parser.feed(&chunk) {
            let Some(intervention) = parse_intervention(&event) else {
                continue;
            };
            // A full bounded queue parks the send, so stop must reach it here too.
            let delivered = tokio::select! {
                _ = wake.notified() => return Ok(()),
                delivered = dispatcher.dispatch(intervention) => delivered?,
            };
            if !delivered {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn frame(name: &str) -> Vec<u8> {
        format!(
            "event: intervention\ndata: {{\"name\":\"{}\",\"version\":1,\"method\":\"remote_agent\",\"attributes\":{{\"cart_value\":10}}}}\n\n",
            name
        )
        .into_bytes()
    }

    /// Let the worker drain a closed stream before stopping it.
    async fn wait_finished(sub: &InterventionSubscription) {
        for _ in 0..200 {
            if !sub.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker did not finish");
    }

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = SseParser::new();
        let bytes = frame("discount");
        let (a, b) = bytes.split_at(17);
        assert!(parser.feed(a).is_empty());
        let events = parser.feed(b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("intervention"));
        let intervention = parse_intervention(&events[0]).unwrap();
        assert_eq!(intervention.name, "discount");
        assert_eq!(intervention.attributes["cart_value"], Value::from(10));
    }

    #[test]
    fn test_parser_comments_and_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\r\n\r\nid: 7\r\ndata: a\r\ndata:b\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: None,
                data: "a\nb".into(),
                id: Some("7".into()),
            }]
        );
    }

    #[test]
    fn test_unknown_events_are_skipped() {
        let ping = SseEvent {
            event: Some("ping".into()),
            data: "{}".into(),
            id: None,
        };
        assert!(parse_intervention(&ping).is_none());
        let garbage = SseEvent {
            data: "not json".into(),
            ..Default::default()
        };
        assert!(parse_intervention(&garbage).is_none());
    }

    #[tokio::test]
    async fn test_queue_mode() {
        let (tx, rx) = mpsc::channel(8);
        let mut sub = InterventionSubscription::new().with_queue_capacity(4);
        assert!(sub.start_with(rx).unwrap());
        assert!(sub.is_running());

        tx.send(frame("first")).await.unwrap();
        tx.send(frame("second")).await.unwrap();
        let a = sub.get(Duration::from_secs(2)).await.unwrap();
        let b = sub.get(Duration::from_secs(2)).await.unwrap();
        assert_eq!((a.name.as_str(), b.name.as_str()), ("first", "second"));
        assert!(sub.get(Duration::from_millis(20)).await.is_none());

        sub.stop().await.unwrap();
        assert!(!sub.is_running());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let (_tx, rx) = mpsc::channel(1);
        let (_tx2, rx2) = mpsc::channel(1);
        let mut sub = InterventionSubscription::new();
        assert!(sub.start_with(rx).unwrap());
        assert!(!sub.start_with(rx2).unwrap());
        sub.stop().await.unwrap();
        sub.stop().await.unwrap();

        let (tx3, rx3) = mpsc::channel(1);
        assert!(sub.start_with(rx3).unwrap());
        tx3.send(frame("again")).await.unwrap();
        assert_eq!(sub.get(Duration::from_secs(2)).await.unwrap().name, "again");
        sub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_with_full_bounded_queue() {
        let (tx, rx) = mpsc::channel(8);
        let mut sub = InterventionSubscription::new().with_queue_capacity(1);
        sub.start_with(rx).unwrap();
        for name in ["a", "b", "c"] {
            tx.send(frame(name)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.is_running());

        let stopped = tokio::time::timeout(Duration::from_secs(2), sub.stop()).await;
        assert!(stopped.is_ok());
        assert!(!sub.is_running());
        assert_eq!(sub.try_get().unwrap().name, "a");
    }

    #[tokio::test]
    async fn test_restart_after_stream_ended() {
        let (tx, rx) = mpsc::channel(1);
        let mut sub = InterventionSubscription::new();
        sub.start_with(rx).unwrap();
        drop(tx);
        wait_finished(&sub).await;
        sub.stop().await.unwrap();

        let (tx2, rx2) = mpsc::channel(1);
        assert!(sub.start_with(rx2).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sub.is_running());
        tx2.send(frame("again")).await.unwrap();
        assert_eq!(sub.get(Duration::from_secs(2)).await.unwrap().name, "again");
        sub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handlers_run_in_order_and_errors_are_swallowed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        let mut sub = InterventionSubscription::new()
            .with_handler(move |i| {
                first.lock().unwrap().push(format!("a:{}", i.name));
                Err(anyhow!("boom"))
            })
            .with_handler(move |i| {
                second.lock().unwrap().push(format!("b:{}", i.name));
                Ok(())
            });

        let (tx, rx) = mpsc::channel(8);
        sub.start_with(rx).unwrap();
        tx.send(frame("x")).await.unwrap();
        tx.send(frame("y")).await.unwrap();
        drop(tx);

        wait_finished(&sub).await;
        sub.stop().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a:x", "b:x", "a:y", "b:y"]);
    }

    #[tokio::test]
    async fn test_handler_errors_can_propagate() {
        let mut sub = InterventionSubscription::new()
            .with_handler(|_| Err(anyhow!("boom")))
            .propagate_handler_errors(true);
        let (tx, rx) = mpsc::channel(8);
        sub.start_with(rx).unwrap();
        tx.send(frame("x")).await.unwrap();
        drop(tx);
        wait_finished(&sub).await;
        assert!(sub.stop().await.is_err());
    }
}
