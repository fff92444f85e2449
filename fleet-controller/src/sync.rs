/**
 * SYNC LOOP - Rafraîchissement périodique du statut des unités
 *
 * RÔLE : une seule task de fond qui, à intervalle fixe (60 min par défaut),
 * liste les unités du store, interroge chacune et écrit les succès en cache.
 *
 * FONCTIONNEMENT :
 * - Idle -> Running -> Idle à chaque tick, premier cycle après une période
 * - Unités traitées séquentiellement, timeout par appel côté RemoteLink
 * - Échec d'une unité = loggé, entrée cache précédente conservée
 * - Unité supprimée pendant son fetch = résultat jeté
 * - Échec du list() = arrêt définitif de la boucle (état Halted)
 * - Arrêt explicite via canal watch (shutdown du process)
 */

use crate::cache::StatusCache;
use crate::error::StoreError;
use crate::remote::RemoteLink;
use crate::store::UnitStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Running,
    /// list() a échoué : plus aucun cycle jusqu'au redémarrage du process
    Halted { reason: String },
    Stopped,
}

/// Bilan d'un cycle complet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub listed: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// unités sans credential, ou supprimées / re-registrées pendant le fetch
    pub skipped: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

pub struct SyncLoop {
    store: Arc<dyn UnitStore>,
    remote: Arc<dyn RemoteLink>,
    cache: Arc<StatusCache>,
    period: Duration,
}

/// Vue lecture seule de la boucle (health / API)
#[derive(Clone)]
pub struct SyncMonitor {
    state: watch::Receiver<SyncState>,
    last_cycle: Arc<Mutex<Option<CycleReport>>>,
}

impl SyncMonitor {
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.lock().clone()
    }
}

pub struct SyncHandle {
    monitor: SyncMonitor,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncHandle {
    pub fn monitor(&self) -> SyncMonitor {
        self.monitor.clone()
    }

    /// Demande l'arrêt et attend la fin du cycle en cours
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(Duration::from_secs(30), self.handle).await {
            Ok(Ok(())) => debug!("sync loop stopped"),
            Ok(Err(e)) => warn!(error = %e, "sync loop panicked"),
            Err(_) => warn!("sync loop shutdown timeout"),
        }
    }
}

impl SyncLoop {
    pub fn new(
        store: Arc<dyn UnitStore>,
        remote: Arc<dyn RemoteLink>,
        cache: Arc<StatusCache>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            cache,
            period,
        }
    }

    /// Un cycle : seule une erreur de list() est remontée
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let units = self.store.list().await?;
        let mut report = CycleReport {
            listed: units.len(),
            ..CycleReport::default()
        };

        for unit in &units {
            let credential = match self.store.credential(&unit.unit_id).await {
                Ok(Some(credential)) => credential,
                Ok(None) => {
                    debug!(unit_id = %unit.unit_id, "no credential, skipping");
                    report.skipped += 1;
                    continue;
                }
                // unité supprimée ou store en vrac : on passe à la suivante
                Err(e) => {
                    warn!(unit_id = %unit.unit_id, error = %e, "credential lookup failed");
                    report.failed += 1;
                    continue;
                }
            };

            match self.remote.fetch_status(unit, &credential).await {
                Ok(payload) => match self
                    .cache
                    .set_if_current(self.store.as_ref(), &unit.unit_id, credential.credential_id, payload)
                    .await
                {
                    Ok(true) => report.refreshed += 1,
                    Ok(false) => {
                        debug!(unit_id = %unit.unit_id, "unit deleted or re-registered during fetch, status dropped");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        warn!(unit_id = %unit.unit_id, error = %e, "status not cached");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(unit_id = %unit.unit_id, error = %e, "status fetch failed, keeping previous entry");
                    report.failed += 1;
                }
            }
        }

        report.finished_at = Some(OffsetDateTime::now_utc());
        Ok(report)
    }

    pub fn spawn(self) -> SyncHandle {
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let last_cycle = Arc::new(Mutex::new(None));
        let monitor = SyncMonitor {
            state: state_rx,
            last_cycle: Arc::clone(&last_cycle),
        };

        info!(period_secs = self.period.as_secs(), "starting sync loop");

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        state_tx.send_replace(SyncState::Running);
                        match self.run_cycle().await {
                            Ok(report) => {
                                info!(
                                    listed = report.listed,
                                    refreshed = report.refreshed,
                                    failed = report.failed,
                                    "sync cycle done"
                                );
                                *last_cycle.lock() = Some(report);
                                state_tx.send_replace(SyncState::Idle);
                            }
                            Err(e) => {
                                error!(error = %e, "listing units failed, sync loop halted until restart");
                                state_tx.send_replace(SyncState::Halted { reason: e.to_string() });
                                return;
                            }
                        }
                    }
                    // true envoyé ou handle droppé
                    _ = shutdown_rx.changed() => {
                        state_tx.send_replace(SyncState::Stopped);
                        return;
                    }
                }
            }
        });

        SyncHandle {
            monitor,
            shutdown_tx,
            handle,
        }
    }
}
