//! Export dispatcher.
//!
//! Forwards every record from the fan-in channel to one channel per exporter
//! and runs each exporter in its own task. The returned handle resolves once
//! the fan-in channel is closed and every exporter has drained and returned.

use crate::export::Exporter;
use crate::item::ScrapedItem;
use crate::stats::StatCollector;
use futures_util::future::join_all;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub fn spawn_item_processor_task<I>(
    mut item_rx: UnboundedReceiver<I>,
    exporters: Vec<Arc<dyn Exporter<I>>>,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()>
where
    I: ScrapedItem,
{
    let mut senders: Vec<(String, Option<UnboundedSender<I>>)> = Vec::with_capacity(exporters.len());
    let mut exporter_tasks = Vec::with_capacity(exporters.len());

    for exporter in exporters {
        let (tx, rx) = unbounded_channel();
        let name = exporter.name().to_string();
        senders.push((name.clone(), Some(tx)));
        exporter_tasks.push(tokio::spawn(async move {
            trace!("Exporter '{}' started", name);
            if let Err(e) = exporter.export(rx).await {
                error!("Exporter '{}' failed: {}", name, e);
            }
            trace!("Exporter '{}' finished", name);
        }));
    }

    tokio::spawn(async move {
        debug!("Export dispatcher started with {} exporters", senders.len());
        while let Some(item) = item_rx.recv().await {
            for (name, slot) in senders.iter_mut() {
                if let Some(tx) = slot {
                    if tx.send(item.clone()).is_err() {
                        warn!("Exporter '{}' stopped receiving; dropping its remaining records", name);
                        *slot = None;
                    }
                }
            }
            stats.increment_items_exported();
        }

        // Closing the per-exporter channels lets every exporter finish.
        drop(senders);
        trace!("Waiting for exporters to drain");
        for res in join_all(exporter_tasks).await {
            if let Err(e) = res {
                error!("An exporter task panicked: {:?}", e);
            }
        }
        debug!("Export dispatcher finished");
    })
}
