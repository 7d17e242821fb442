//! Aggregator - actor that owns the list of collected results
//!
//! Executors' handle stages send records over a channel; the actor task is
//! the only code that touches the list, so it needs no lock.

use eyre::{Result, eyre};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::client::Outcome;

/// Channel capacity between handle tasks and the actor
const AGGREGATOR_BUFFER: usize = 1024;

/// One collected result, tagged with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub label: String,
    pub request_id: String,
    pub burst_id: String,
    pub outcome: Outcome,
}

enum AggregatorCommand {
    Record(Box<Record>),
    Finish { reply: oneshot::Sender<Vec<Record>> },
}

/// Handle to send records to the aggregator actor
#[derive(Clone)]
pub struct Aggregator {
    tx: mpsc::Sender<AggregatorCommand>,
}

impl Aggregator {
    /// Spawn a new aggregator actor
    pub fn spawn() -> Self {
        debug!("Aggregator::spawn: called");
        let (tx, rx) = mpsc::channel(AGGREGATOR_BUFFER);
        tokio::spawn(actor_loop(rx));
        Self { tx }
    }

    /// Add one record
    pub async fn record(&self, record: Record) -> Result<()> {
        self.tx
            .send(AggregatorCommand::Record(Box::new(record)))
            .await
            .map_err(|_| eyre!("Aggregator channel closed"))
    }

    /// Stop the actor and take every record, in arrival order
    ///
    /// Only records sent before this call are included. Any later `record`
    /// call fails.
    pub async fn finish(&self) -> Result<Vec<Record>> {
        debug!("Aggregator::finish: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Finish { reply })
            .await
            .map_err(|_| eyre!("Aggregator channel closed"))?;
        rx.await.map_err(|_| eyre!("Aggregator stopped before replying"))
    }
}

async fn actor_loop(mut rx: mpsc::Receiver<AggregatorCommand>) {
    debug!("actor_loop: started");
    let mut records = Vec::new();
    while let Some(command) = rx.recv().await {
        match command {
            AggregatorCommand::Record(record) => records.push(*record),
            AggregatorCommand::Finish { reply } => {
                info!(count = records.len(), "Aggregator finished");
                let _ = reply.send(std::mem::take(&mut records));
                break;
            }
        }
    }
    debug!("actor_loop: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(n: u16) -> Record {
        Record {
            label: "label".to_string(),
            request_id: "req".to_string(),
            burst_id: "burst".to_string(),
            outcome: Outcome::response(200 + n, Duration::from_millis(n as u64), 0),
        }
    }

    #[tokio::test]
    async fn test_finish_returns_records_in_order() {
        let aggregator = Aggregator::spawn();
        for n in 0..5 {
            aggregator.record(record(n)).await.unwrap();
        }
        let records = aggregator.finish().await.unwrap();
        let statuses: Vec<_> = records.iter().map(|r| r.outcome.status.unwrap()).collect();
        assert_eq!(statuses, vec![200, 201, 202, 203, 204]);
    }

    #[tokio::test]
    async fn test_finish_with_no_records() {
        let aggregator = Aggregator::spawn();
        assert!(aggregator.finish().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_after_finish_fails() {
        let aggregator = Aggregator::spawn();
        aggregator.finish().await.unwrap();
        // Let the actor task exit and drop its receiver.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(aggregator.record(record(0)).await.is_err());
        assert!(aggregator.finish().await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_senders() {
        let aggregator = Aggregator::spawn();
        let mut tasks = Vec::new();
        for n in 0..10 {
            let aggregator = aggregator.clone();
            tasks.push(tokio::spawn(async move { aggregator.record(record(n)).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(aggregator.finish().await.unwrap().len(), 10);
    }
}
