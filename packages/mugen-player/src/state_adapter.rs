//! Reactive property streams over a player transport.
//!
//! [`PlayerStateAdapter`] multiplexes transport property changes into one
//! broadcast stream per property. Observation on the player side is reference
//! counted: the first subscriber of a property issues `observe_property`, and
//! dropping the last stream issues `unobserve_property`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::error::{PlayerError, PlayerResult};
use crate::ipc::{PlayerTransport, TransportEvent};
use crate::protocol_constants::{PROPERTY_CHANNEL_CAPACITY, PROP_TIME_POS};
use crate::runtime::TaskSpawner;

/// Clamps a raw position reading: null, negative or non-numeric becomes zero.
#[must_use]
pub fn normalize_position(value: &Value) -> f64 {
    match value.as_f64() {
        Some(v) if v > 0.0 && v.is_finite() => v,
        _ => 0.0,
    }
}

struct PropertyEntry {
    sender: broadcast::Sender<Value>,
    subscribers: usize,
    observed: bool,
}

struct Inner {
    transport: Arc<dyn PlayerTransport>,
    properties: Mutex<HashMap<String, PropertyEntry>>,
    disposed: AtomicBool,
}

impl Inner {
    async fn publish(&self, name: &str, data: Value) {
        let value = if name == PROP_TIME_POS {
            Value::from(normalize_position(&data))
        } else {
            data
        };

        let properties = self.properties.lock().await;
        if let Some(entry) = properties.get(name) {
            // No receivers left is fine; the release is already queued
            let _ = entry.sender.send(value);
        }
    }

    async fn release(&self, name: &str) {
        let mut properties = self.properties.lock().await;
        let Some(entry) = properties.get_mut(name) else {
            return;
        };

        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers > 0 {
            return;
        }

        let observed = entry.observed;
        properties.remove(name);

        if observed && self.transport.is_running() {
            if let Err(e) = self.transport.unobserve_property(name).await {
                log::warn!("[StateAdapter] Failed to unobserve {}: {}", name, e);
            }
        }
    }
}

/// Stream of values for one property.
///
/// Dropping the stream releases its subscription. The stream completes when
/// the adapter is disposed.
pub struct PropertyStream {
    name: String,
    values: BoxStream<'static, Value>,
    release_tx: mpsc::UnboundedSender<String>,
}

impl PropertyStream {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Stream for PropertyStream {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.get_mut().values.poll_next_unpin(cx)
    }
}

impl Drop for PropertyStream {
    fn drop(&mut self) {
        // Pump is gone after dispose; nothing left to release
        let _ = self.release_tx.send(std::mem::take(&mut self.name));
    }
}

/// Reference-counted property streams for one transport.
pub struct PlayerStateAdapter {
    inner: Arc<Inner>,
    release_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl PlayerStateAdapter {
    /// Creates the adapter and spawns its event pump on `spawner`.
    #[must_use]
    pub fn new(transport: Arc<dyn PlayerTransport>, spawner: &dyn TaskSpawner) -> Self {
        let events = transport.subscribe();
        let inner = Arc::new(Inner {
            transport,
            properties: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        });
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        spawner.spawn(pump(
            Arc::clone(&inner),
            events,
            release_rx,
            cancel.clone(),
        ));

        Self {
            inner,
            release_tx,
            cancel,
        }
    }

    /// Subscribes to changes of `name`.
    ///
    /// The first subscriber triggers `observe_property` when the transport is
    /// running.
    ///
    /// # Errors
    ///
    /// Returns `Destroyed` after [`dispose`](Self::dispose), or the transport
    /// error if the observation could not be started.
    pub async fn subscribe(&self, name: &str) -> PlayerResult<PropertyStream> {
        let mut properties = self.inner.properties.lock().await;
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(PlayerError::Destroyed);
        }

        let entry = properties
            .entry(name.to_string())
            .or_insert_with(|| PropertyEntry {
                sender: broadcast::channel(PROPERTY_CHANNEL_CAPACITY).0,
                subscribers: 0,
                observed: false,
            });

        if entry.subscribers == 0 && self.inner.transport.is_running() {
            if let Err(e) = self.inner.transport.observe_property(name).await {
                properties.remove(name);
                return Err(e.into());
            }
            entry.observed = true;
        }

        entry.subscribers += 1;
        let values = BroadcastStream::new(entry.sender.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(value) => Some(value),
                    Err(lagged) => {
                        log::debug!("[StateAdapter] {}", lagged);
                        None
                    }
                }
            })
            .boxed();

        Ok(PropertyStream {
            name: name.to_string(),
            values,
            release_tx: self.release_tx.clone(),
        })
    }

    /// Normalized playback position stream.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn position(&self) -> PlayerResult<BoxStream<'static, f64>> {
        let stream = self.subscribe(PROP_TIME_POS).await?;
        Ok(stream.map(|v| normalize_position(&v)).boxed())
    }

    /// Number of live streams for `name`.
    pub async fn subscribers(&self, name: &str) -> usize {
        self.inner
            .properties
            .lock()
            .await
            .get(name)
            .map_or(0, |e| e.subscribers)
    }

    /// Detaches from the transport and completes every open stream.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let drained: Vec<(String, PropertyEntry)> =
            self.inner.properties.lock().await.drain().collect();
        for (name, entry) in drained {
            if entry.observed && self.inner.transport.is_running() {
                if let Err(e) = self.inner.transport.unobserve_property(&name).await {
                    log::debug!("[StateAdapter] Unobserve of {} on dispose failed: {}", name, e);
                }
            }
        }
        log::debug!("[StateAdapter] Disposed");
    }
}

impl Drop for PlayerStateAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump(
    inner: Arc<Inner>,
    mut events: broadcast::Receiver<TransportEvent>,
    mut release_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(name) = release_rx.recv() => inner.release(&name).await,
            event = events.recv() => match event {
                Ok(TransportEvent::PropertyChange { name, data }) => inner.publish(&name, data).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("[StateAdapter] Dropped {} transport events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Rate-limits a stream: the first value passes immediately, then at most one
/// value (the latest) per `period`.
pub fn throttle_latest<S, T>(stream: S, period: Duration) -> impl Stream<Item = T> + Send
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    enum Step<T> {
        Emit(T),
        Hold,
        Finish(Option<T>),
    }

    async_stream::stream! {
        let mut stream = Box::pin(stream);
        let mut pending: Option<T> = None;
        let mut window_end: Option<Instant> = None;

        loop {
            let step = match window_end {
                None => match stream.next().await {
                    Some(value) => Step::Emit(value),
                    None => Step::Finish(None),
                },
                Some(deadline) => tokio::select! {
                    item = stream.next() => match item {
                        Some(value) => {
                            pending = Some(value);
                            Step::Hold
                        }
                        None => Step::Finish(pending.take()),
                    },
                    _ = tokio::time::sleep_until(deadline) => match pending.take() {
                        Some(value) => Step::Emit(value),
                        None => {
                            window_end = None;
                            Step::Hold
                        }
                    },
                },
            };

            match step {
                Step::Emit(value) => {
                    window_end = Some(Instant::now() + period);
                    yield value;
                }
                Step::Hold => {}
                Step::Finish(last) => {
                    if let Some(value) = last {
                        yield value;
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::mock::MockTransport;
    use crate::runtime::TokioSpawner;
    use serde_json::json;

    /// Lets the pump drain everything queued (auto-advance only fires when idle).
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn adapter_with(mock: MockTransport) -> (Arc<MockTransport>, PlayerStateAdapter) {
        let mock = Arc::new(mock);
        let adapter = PlayerStateAdapter::new(mock.clone(), &TokioSpawner::current());
        (mock, adapter)
    }

    #[test]
    fn position_normalization() {
        assert_eq!(normalize_position(&json!(12.5)), 12.5);
        assert_eq!(normalize_position(&json!(-3.0)), 0.0);
        assert_eq!(normalize_position(&json!(0)), 0.0);
        assert_eq!(normalize_position(&Value::Null), 0.0);
        assert_eq!(normalize_position(&json!("7")), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn position_stream_never_goes_negative() {
        let (mock, adapter) = adapter_with(MockTransport::running());
        let mut positions = adapter.position().await.unwrap();

        for raw in [json!(1.0), json!(-2.0), Value::Null, json!(4.25), json!("x")] {
            mock.emit_property("time-pos", raw);
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(positions.next().await.unwrap());
        }
        assert_eq!(seen, vec![1.0, 0.0, 0.0, 4.25, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn observes_once_and_unobserves_once() {
        let (mock, adapter) = adapter_with(MockTransport::running());

        let a = adapter.subscribe("time-pos").await.unwrap();
        let b = adapter.subscribe("time-pos").await.unwrap();
        drop(a);
        settle().await;
        let c = adapter.subscribe("time-pos").await.unwrap();
        assert_eq!(adapter.subscribers("time-pos").await, 2);
        drop(b);
        drop(c);
        settle().await;

        assert_eq!(mock.observe_calls(), vec!["time-pos".to_string()]);
        assert_eq!(mock.unobserve_calls(), vec!["time-pos".to_string()]);
        assert_eq!(adapter.subscribers("time-pos").await, 0);

        // A fresh subscription observes again
        let _d = adapter.subscribe("time-pos").await.unwrap();
        assert_eq!(mock.observe_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_subscriber_receives_each_value() {
        let (mock, adapter) = adapter_with(MockTransport::running());
        let mut a = adapter.subscribe("volume").await.unwrap();
        let mut b = adapter.subscribe("volume").await.unwrap();

        mock.emit_property("volume", json!(80));
        mock.emit_property("mute", json!(true));
        mock.emit_property("volume", json!(60));

        assert_eq!(a.next().await, Some(json!(80)));
        assert_eq!(a.next().await, Some(json!(60)));
        assert_eq!(b.next().await, Some(json!(80)));
        assert_eq!(b.next().await, Some(json!(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_observe_while_transport_is_down() {
        let (mock, adapter) = adapter_with(MockTransport::new());
        let stream = adapter.subscribe("time-pos").await.unwrap();
        drop(stream);
        settle().await;

        assert!(mock.observe_calls().is_empty());
        assert!(mock.unobserve_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_completes_streams() {
        let (mock, adapter) = adapter_with(MockTransport::running());
        let mut stream = adapter.subscribe("pause").await.unwrap();

        adapter.dispose().await;
        assert_eq!(stream.next().await, None);
        assert_eq!(mock.unobserve_calls(), vec!["pause".to_string()]);
        assert!(matches!(
            adapter.subscribe("pause").await,
            Err(PlayerError::Destroyed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_passes_first_then_latest_per_window() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let source = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        let mut throttled = Box::pin(throttle_latest(source, Duration::from_millis(100)));

        tx.send(1).unwrap();
        assert_eq!(throttled.next().await, Some(1));

        tx.send(2).unwrap();
        tx.send(3).unwrap();
        tx.send(4).unwrap();
        // Coalesced to the latest value at the end of the window
        assert_eq!(throttled.next().await, Some(4));

        tokio::time::advance(Duration::from_millis(500)).await;
        tx.send(5).unwrap();
        assert_eq!(throttled.next().await, Some(5));

        tx.send(6).unwrap();
        drop(tx);
        assert_eq!(throttled.next().await, Some(6));
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_bounds_emission_rate() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let source = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        let throttled = throttle_latest(source, Duration::from_millis(125));

        let producer = tokio::spawn(async move {
            for i in 0..100u32 {
                tx.send(i).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let emitted: Vec<u32> = throttled.collect().await;
        producer.await.unwrap();

        // 1s of input at 125ms windows: leading value plus one per window
        assert!(emitted.len() <= 10, "emitted {}", emitted.len());
        assert_eq!(emitted.first(), Some(&0));
        assert_eq!(emitted.last(), Some(&99));
    }
}
