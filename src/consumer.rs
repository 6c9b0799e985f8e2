use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, IngestOutcome};
use crate::metrics::TransactionMetric;

/// Counters for one consumer run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub malformed: u64,
}

/// Consume newline-delimited JSON events from a byte stream and feed them
/// to the engine. Malformed lines and rejected events are counted and
/// logged, never fatal; the stream keeps flowing. Returns when the stream
/// ends or shutdown is signalled.
pub async fn consume<R>(
    engine: Arc<Engine>,
    reader: R,
    shutdown: CancellationToken,
) -> ConsumerStats
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut stats = ConsumerStats::default();

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!("Consumer stopping on shutdown signal");
                break;
            }
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Input stream closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Input stream read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let metric: TransactionMetric = match serde_json::from_str(&line) {
            Ok(metric) => metric,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(error = %e, "Skipping malformed event line");
                continue;
            }
        };

        match engine.ingest(metric).await {
            Ok(IngestOutcome::Processed { alerts, .. }) => {
                stats.processed += 1;
                if !alerts.is_empty() {
                    tracing::debug!(alerts = alerts.len(), "Event raised alerts");
                }
            }
            Ok(IngestOutcome::Duplicate) => stats.duplicates += 1,
            Err(e) => {
                stats.rejected += 1;
                tracing::warn!(error = %e, "Event rejected");
            }
        }
    }

    tracing::info!(
        processed = stats.processed,
        duplicates = stats.duplicates,
        rejected = stats.rejected,
        malformed = stats.malformed,
        "Consumer finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStore;
    use chrono::Utc;

    fn event_line(entity: &str, tx: &str, amount: f64) -> String {
        serde_json::json!({
            "entity_id": entity,
            "transaction_id": tx,
            "metric_type": "transaction",
            "amount": amount,
            "currency": "USD",
            "category": "groceries",
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string()
    }

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(Config::default(), Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_consume_counts_outcomes() {
        let input = [
            event_line("U1", "tx-1", 10.0),
            event_line("U1", "tx-1", 10.0), // duplicate id
            "not json at all".to_string(),
            event_line("U1", "tx-2", -4.0), // invalid amount
            event_line("U2", "tx-3", 25.0),
        ]
        .join("\n");

        let engine = engine();
        let stats = consume(
            engine.clone(),
            input.as_bytes(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(
            stats,
            ConsumerStats {
                processed: 2,
                duplicates: 1,
                rejected: 1,
                malformed: 1,
            }
        );
        assert_eq!(engine.risk_profile("U1").await.unwrap().history.count, 1);
        assert_eq!(engine.risk_profile("U2").await.unwrap().history.count, 1);
    }

    #[tokio::test]
    async fn test_consume_skips_blank_lines() {
        let input = format!("\n\n{}\n\n", event_line("U1", "tx-1", 10.0));
        let stats = consume(engine(), input.as_bytes(), CancellationToken::new()).await;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.malformed, 0);
    }

    #[tokio::test]
    async fn test_consume_stops_on_shutdown() {
        let token = CancellationToken::new();
        token.cancel();
        // A cancelled token wins the race before any line is read.
        let stats = consume(
            engine(),
            event_line("U1", "tx-1", 10.0).as_bytes(),
            token,
        )
        .await;
        assert_eq!(stats.processed, 0);
    }
}
