//! Background task feeding an [`AggregationView`] from store subscriptions.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, select_all, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use claimdesk_core::{now_secs, ClaimKind, ClaimStatus, Result};
use claimdesk_ledger::{
    BalanceLedger, ClaimSnapshot, Delivery, LedgerSnapshot, LedgerStore, RequestStore,
};

use crate::view::{AggregationView, Dashboard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Days covered by the daily buckets.
    pub window_days: u32,
    /// Re-read every set from the store at least this often, which also
    /// rolls the day window over.
    pub refresh_interval: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            refresh_interval: Duration::from_secs(60),
        }
    }
}

enum Update {
    Claims(ClaimSnapshot),
    Ledger(LedgerSnapshot),
    /// A stream dropped snapshots; any slot may be stale.
    Lagged,
}

impl From<Delivery<ClaimSnapshot>> for Update {
    fn from(delivery: Delivery<ClaimSnapshot>) -> Self {
        match delivery {
            Delivery::Snapshot(snapshot) => Update::Claims(snapshot),
            Delivery::Lagged(_) => Update::Lagged,
        }
    }
}

impl From<Delivery<LedgerSnapshot>> for Update {
    fn from(delivery: Delivery<LedgerSnapshot>) -> Self {
        match delivery {
            Delivery::Snapshot(snapshot) => Update::Ledger(snapshot),
            Delivery::Lagged(_) => Update::Lagged,
        }
    }
}

/// Pull a current snapshot of every claim set and of the ledger straight
/// from the store. Returns whether the view changed.
async fn resync(store: &dyn LedgerStore, view: &mut AggregationView) -> Result<bool> {
    let mut changed = false;
    for kind in ClaimKind::ALL {
        for status in ClaimStatus::ALL {
            let mut sub = store.subscribe(kind, status).await?;
            if let Some(snapshot) = sub.next().await.and_then(Delivery::snapshot) {
                changed |= view.apply_claims(snapshot);
            }
        }
    }
    let mut ledger = store.subscribe_ledger().await?;
    if let Some(snapshot) = ledger.next().await.and_then(Delivery::snapshot) {
        changed |= view.apply_ledger(snapshot);
    }
    Ok(changed)
}

pub struct AggregationService {
    store: Arc<dyn LedgerStore>,
    config: AggregationConfig,
}

impl AggregationService {
    pub fn new(store: Arc<dyn LedgerStore>, config: AggregationConfig) -> Self {
        Self { store, config }
    }

    /// Subscribe to every claim set and the ledger, then run until `shutdown`
    /// turns true. Subscriptions are in place when this returns.
    pub async fn spawn(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(watch::Receiver<Dashboard>, JoinHandle<()>)> {
        let mut streams: Vec<BoxStream<'static, Update>> = Vec::new();
        for kind in ClaimKind::ALL {
            for status in ClaimStatus::ALL {
                let sub = self.store.subscribe(kind, status).await?;
                streams.push(
                    stream::unfold(sub, |mut sub| async move {
                        sub.next().await.map(|delivery| (Update::from(delivery), sub))
                    })
                    .boxed(),
                );
            }
        }
        let ledger = self.store.subscribe_ledger().await?;
        streams.push(
            stream::unfold(ledger, |mut sub| async move {
                sub.next().await.map(|delivery| (Update::from(delivery), sub))
            })
            .boxed(),
        );

        let mut view = AggregationView::new(self.config.window_days);
        let (tx, rx) = watch::channel(view.dashboard(now_secs()));
        let refresh_interval = self.config.refresh_interval;
        let store = self.store;
        info!(streams = streams.len(), window_days = self.config.window_days, "aggregation starting");

        let handle = tokio::spawn(async move {
            let mut updates = select_all(streams);
            let mut refresh = time::interval(refresh_interval);
            refresh.tick().await;

            loop {
                tokio::select! {
                    update = updates.next() => {
                        let Some(update) = update else {
                            debug!("all subscriptions closed");
                            break;
                        };
                        let changed = match update {
                            Update::Claims(snapshot) => view.apply_claims(snapshot),
                            Update::Ledger(snapshot) => view.apply_ledger(snapshot),
                            Update::Lagged => match resync(store.as_ref(), &mut view).await {
                                Ok(changed) => changed,
                                Err(e) => {
                                    warn!(error = %e, "resync after feed lag failed");
                                    false
                                }
                            },
                        };
                        if changed {
                            tx.send_replace(view.dashboard(now_secs()));
                        }
                    }
                    _ = refresh.tick() => {
                        if let Err(e) = resync(store.as_ref(), &mut view).await {
                            warn!(error = %e, "periodic resync failed");
                        }
                        tx.send_replace(view.dashboard(now_secs()));
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("aggregation stopped");
        });

        Ok((rx, handle))
    }
}
