//! Market Ingestor: maintains a reconnecting subscription to the upstream
//! feed and normalizes `tokenCreated`/`tradeCreated` frames onto two
//! bounded channels. Never blocks upstream reads — on a full channel, the
//! new event is dropped (not the oldest) and a counter is incremented.
//! Never terminates while the process runs; any read error triggers
//! reconnection with exponential backoff.

use futures_util::StreamExt;
use sim_types::IngestEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of each of the two event channels.
pub const CHANNEL_CAPACITY: usize = 100;

const MIN_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// The two bounded channels the Ingestor publishes onto, and the drop
/// counters recording events discarded because a channel was full.
pub struct IngestorChannels {
    pub token_events: mpsc::Receiver<IngestEvent>,
    pub trade_events: mpsc::Receiver<IngestEvent>,
    pub token_drops: Arc<AtomicU64>,
    pub trade_drops: Arc<AtomicU64>,
}

pub struct Ingestor {
    token_tx: mpsc::Sender<IngestEvent>,
    trade_tx: mpsc::Sender<IngestEvent>,
    token_drops: Arc<AtomicU64>,
    trade_drops: Arc<AtomicU64>,
}

impl Ingestor {
    /// Builds an Ingestor together with the channels it will publish to.
    pub fn new() -> (Self, IngestorChannels) {
        let (token_tx, token_events) = mpsc::channel(CHANNEL_CAPACITY);
        let (trade_tx, trade_events) = mpsc::channel(CHANNEL_CAPACITY);
        let token_drops = Arc::new(AtomicU64::new(0));
        let trade_drops = Arc::new(AtomicU64::new(0));
        (
            Self {
                token_tx,
                trade_tx,
                token_drops: token_drops.clone(),
                trade_drops: trade_drops.clone(),
            },
            IngestorChannels {
                token_events,
                trade_events,
                token_drops,
                trade_drops,
            },
        )
    }

    /// Drives the reconnect loop until `shutdown` is cancelled. Never
    /// returns otherwise — a dropped connection is always followed by a
    /// reconnect attempt.
    pub async fn run(self, url: String, shutdown: CancellationToken) {
        let mut backoff = MIN_BACKOFF;
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match tokio_tungstenite::connect_async(&url).await {
                Ok((stream, _response)) => {
                    info!(%url, "ingestor connected to upstream feed");
                    backoff = MIN_BACKOFF;
                    let (_, mut read) = stream.split();
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                                    Some(Ok(Message::Close(_))) | None => {
                                        warn!("upstream closed connection, reconnecting");
                                        break;
                                    }
                                    Some(Ok(_)) => {} // ping/pong/binary frames carry no events
                                    Some(Err(e)) => {
                                        warn!(error = %e, "upstream read error, reconnecting");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, ?backoff, "failed to connect to upstream feed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Parses one upstream frame and routes it to the appropriate bounded
    /// channel. A malformed frame is logged and skipped, never retried.
    fn dispatch(&self, text: &str) {
        let event: IngestEvent = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping malformed upstream frame");
                return;
            }
        };
        match &event {
            IngestEvent::TokenCreated { .. } => {
                if self.token_tx.try_send(event).is_err() {
                    self.token_drops.fetch_add(1, Ordering::Relaxed);
                }
            }
            IngestEvent::TradeCreated { .. } => {
                if self.trade_tx.try_send(event).is_err() {
                    self.trade_drops.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_frame_is_skipped_without_panicking() {
        let (ingestor, channels) = Ingestor::new();
        ingestor.dispatch("not json");
        assert_eq!(channels.token_drops.load(Ordering::Relaxed), 0);
        assert_eq!(channels.trade_drops.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn token_created_routes_to_token_channel() {
        let (ingestor, mut channels) = Ingestor::new();
        let raw = r#"{"type":"tokenCreated","mint":"T","creator":null,"name":null,"symbol":null,
            "image_uri":null,"twitter":null,"website":null,"telegram":null,"metadata_uri":null,
            "created_timestamp":0,"market_cap":null,"usd_market_cap":null,"complete":null,
            "king_of_the_hill_timestamp":null}"#;
        ingestor.dispatch(raw);
        assert!(channels.token_events.try_recv().is_ok());
        assert!(channels.trade_events.try_recv().is_err());
    }

    #[test]
    fn full_channel_drops_new_event_and_counts_it() {
        let (ingestor, channels) = Ingestor::new();
        let raw = r#"{"type":"tradeCreated","mint":"T","signature":"s","sol_amount":"1.0",
            "token_amount":"1000","is_buy":true,"user":"u","timestamp":0,"market_cap":null,
            "usd_market_cap":null}"#;
        for i in 0..(CHANNEL_CAPACITY + 5) {
            let mut unique = raw.replace("\"signature\":\"s\"", &format!("\"signature\":\"s{i}\""));
            if unique.is_empty() {
                unique = raw.to_string();
            }
            ingestor.dispatch(&unique);
        }
        assert_eq!(channels.trade_drops.load(Ordering::Relaxed), 5);
    }
}
