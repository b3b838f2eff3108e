use std::{sync::Arc, time::Duration};

use anyhow::Result;
use shared::{
    domain::{Company, CompanyId, Tier},
    error::DirectoryError,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, Mutex},
    time::{sleep, Instant},
};
use tracing::{error, info, warn};

use crate::{
    backend::CompanyBackend,
    store::{
        CompanyListStore, ConfirmedFields, Field, Mutation, MutationTicket, OptimisticUpdate,
        ReconcileOutcome, RollbackOutcome, DEFAULT_ERROR_FLASH,
    },
    view::{ViewFilter, ViewSummary},
};

#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    Loaded { count: usize },
    CompanyUpdated(Company),
    MutationRolledBack {
        company: Company,
        field: Field,
        reason: String,
    },
    ErrorFlagCleared(CompanyId),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed { company: Company, changed: bool },
    /// A newer mutation on the same field owns the displayed value.
    Superseded,
    RolledBack { company: Company, error: DirectoryError },
}

#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// What was displayed immediately, before the backend answered.
    pub optimistic: Company,
    pub resolution: Resolution,
}

pub struct DirectoryClient {
    backend: Arc<dyn CompanyBackend>,
    store: Arc<Mutex<CompanyListStore>>,
    events: broadcast::Sender<DirectoryEvent>,
}

impl DirectoryClient {
    pub fn new(backend: Arc<dyn CompanyBackend>) -> Arc<Self> {
        Self::with_error_flash(backend, DEFAULT_ERROR_FLASH)
    }

    pub fn with_error_flash(backend: Arc<dyn CompanyBackend>, error_flash: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            backend,
            store: Arc::new(Mutex::new(CompanyListStore::with_error_flash(error_flash))),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }

    /// Replaces the cache with the backend's list. On failure the previous
    /// cache is kept.
    pub async fn load(&self) -> Result<usize, DirectoryError> {
        match self.backend.list_companies().await {
            Ok(companies) => {
                let count = {
                    let mut store = self.store.lock().await;
                    store.replace_all(companies);
                    store.len()
                };
                info!(count, "directory: companies loaded");
                let _ = self.events.send(DirectoryEvent::Loaded { count });
                Ok(count)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                error!(error = %reason, "directory: failed to load companies");
                let err = DirectoryError::Network(reason);
                let _ = self.events.send(DirectoryEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    pub async fn view(&self, filter: &ViewFilter) -> Vec<Company> {
        let store = self.store.lock().await;
        store.derive_view(filter).into_iter().cloned().collect()
    }

    pub async fn summary(&self, filter: &ViewFilter) -> ViewSummary {
        self.store.lock().await.summary(filter)
    }

    pub async fn tag_vocabulary(&self) -> Vec<String> {
        self.store.lock().await.tag_vocabulary()
    }

    pub async fn company(&self, id: CompanyId) -> Option<Company> {
        self.store.lock().await.get(id).cloned()
    }

    pub async fn has_error_flag(&self, id: CompanyId) -> bool {
        self.store.lock().await.error_flag(id, Instant::now())
    }

    /// Promotes the company one place.
    pub async fn upvote(&self, id: CompanyId) -> Result<MutationOutcome, DirectoryError> {
        self.mutate(id, Mutation::DecrementRank).await
    }

    /// Demotes the company one place.
    pub async fn downvote(&self, id: CompanyId) -> Result<MutationOutcome, DirectoryError> {
        self.mutate(id, Mutation::IncrementRank).await
    }

    pub async fn set_rank(&self, id: CompanyId, rank: i64) -> Result<MutationOutcome, DirectoryError> {
        self.mutate(id, Mutation::SetRank(rank)).await
    }

    /// Parses free-form rank input. Malformed input is rejected before
    /// anything is changed or sent.
    pub async fn set_rank_input(
        &self,
        id: CompanyId,
        input: &str,
    ) -> Result<MutationOutcome, DirectoryError> {
        let rank = input.trim().parse::<i64>().map_err(|_| {
            warn!(company_id = id.0, input, "directory: malformed rank input");
            DirectoryError::validation(format!("'{}' is not a whole number", input.trim()))
        })?;
        self.set_rank(id, rank).await
    }

    pub async fn set_tier(&self, id: CompanyId, tier: Tier) -> Result<MutationOutcome, DirectoryError> {
        self.mutate(id, Mutation::SetTier(tier)).await
    }

    pub async fn set_tier_input(
        &self,
        id: CompanyId,
        input: &str,
    ) -> Result<MutationOutcome, DirectoryError> {
        let tier = input.parse::<Tier>()?;
        self.set_tier(id, tier).await
    }

    pub async fn add_tag(&self, id: CompanyId, tag: &str) -> Result<MutationOutcome, DirectoryError> {
        self.mutate(id, Mutation::AddTag(tag.to_string())).await
    }

    pub async fn remove_tag(
        &self,
        id: CompanyId,
        index: usize,
    ) -> Result<MutationOutcome, DirectoryError> {
        self.mutate(id, Mutation::RemoveTagAt(index)).await
    }

    async fn mutate(
        &self,
        id: CompanyId,
        mutation: Mutation,
    ) -> Result<MutationOutcome, DirectoryError> {
        let request = mutation.clone();
        let OptimisticUpdate { company, ticket } = {
            let mut store = self.store.lock().await;
            store.apply(id, mutation)?
        };
        let mut guard = TicketGuard::new(&self.store, &self.events, ticket);
        let _ = self.events.send(DirectoryEvent::CompanyUpdated(company.clone()));

        // The store lock is released here so overlapping mutations can proceed.
        let response = self.send(&company, &request).await;

        let resolution = match response {
            Ok(confirmed) => {
                let outcome = {
                    let mut store = self.store.lock().await;
                    guard.disarm();
                    store.reconcile(&ticket, confirmed)
                };
                match outcome {
                    ReconcileOutcome::Applied {
                        company,
                        changed,
                        flag_cleared,
                    } => {
                        if changed {
                            let _ = self.events.send(DirectoryEvent::CompanyUpdated(company.clone()));
                        }
                        if flag_cleared {
                            let _ = self.events.send(DirectoryEvent::ErrorFlagCleared(id));
                        }
                        Resolution::Confirmed { company, changed }
                    }
                    ReconcileOutcome::Stale => Resolution::Superseded,
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(
                    company_id = id.0,
                    field = ?ticket.field,
                    error = %reason,
                    "directory: mutation request failed"
                );
                let (outcome, flash) = {
                    let mut store = self.store.lock().await;
                    guard.disarm();
                    (store.rollback(&ticket, Instant::now()), store.error_flash())
                };
                match outcome {
                    RollbackOutcome::RolledBack(company) => {
                        announce_rollback(&self.store, &self.events, &ticket, &company, &reason, flash);
                        Resolution::RolledBack {
                            company,
                            error: DirectoryError::network(reason),
                        }
                    }
                    RollbackOutcome::Stale => Resolution::Superseded,
                }
            }
        };

        Ok(MutationOutcome {
            optimistic: company,
            resolution,
        })
    }

    async fn send(&self, optimistic: &Company, mutation: &Mutation) -> Result<ConfirmedFields> {
        let id = optimistic.id;
        let confirmed = match mutation {
            Mutation::DecrementRank => ConfirmedFields::rank(self.backend.upvote(id).await?.rank),
            Mutation::IncrementRank => ConfirmedFields::rank(self.backend.downvote(id).await?.rank),
            Mutation::SetRank(_) => {
                ConfirmedFields::rank(self.backend.update_rank(id, optimistic.rank).await?.rank)
            }
            Mutation::SetTier(tier) => {
                ConfirmedFields::tier(self.backend.update_tier(id, tier).await?.tier)
            }
            Mutation::AddTag(tag) => {
                self.backend.add_tag(id, tag.trim()).await?;
                ConfirmedFields::default()
            }
            Mutation::RemoveTagAt(index) => {
                self.backend.remove_tag(id, *index).await?;
                ConfirmedFields::default()
            }
        };
        Ok(confirmed)
    }
}

/// Rolls the ticket back if the mutation future is dropped before its
/// response is reconciled, so the field never stays pending.
struct TicketGuard {
    store: Arc<Mutex<CompanyListStore>>,
    events: broadcast::Sender<DirectoryEvent>,
    ticket: Option<MutationTicket>,
}

impl TicketGuard {
    fn new(
        store: &Arc<Mutex<CompanyListStore>>,
        events: &broadcast::Sender<DirectoryEvent>,
        ticket: MutationTicket,
    ) -> Self {
        Self {
            store: Arc::clone(store),
            events: events.clone(),
            ticket: Some(ticket),
        }
    }

    fn disarm(&mut self) {
        self.ticket = None;
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        warn!(
            company_id = ticket.company_id.0,
            field = ?ticket.field,
            "directory: mutation dropped before its response arrived"
        );
        let reason = "request abandoned before the backend answered";

        if let Ok(mut store) = self.store.try_lock() {
            let outcome = store.rollback(&ticket, Instant::now());
            let flash = store.error_flash();
            drop(store);
            if let RollbackOutcome::RolledBack(company) = outcome {
                announce_rollback(&self.store, &self.events, &ticket, &company, reason, flash);
            }
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            error!(company_id = ticket.company_id.0, "directory: no runtime to release dropped mutation");
            return;
        };
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        handle.spawn(async move {
            let (outcome, flash) = {
                let mut locked = store.lock().await;
                (locked.rollback(&ticket, Instant::now()), locked.error_flash())
            };
            if let RollbackOutcome::RolledBack(company) = outcome {
                announce_rollback(&store, &events, &ticket, &company, reason, flash);
            }
        });
    }
}

fn announce_rollback(
    store: &Arc<Mutex<CompanyListStore>>,
    events: &broadcast::Sender<DirectoryEvent>,
    ticket: &MutationTicket,
    company: &Company,
    reason: &str,
    flash: Duration,
) {
    let _ = events.send(DirectoryEvent::MutationRolledBack {
        company: company.clone(),
        field: ticket.field,
        reason: reason.to_string(),
    });
    spawn_flag_expiry(store, events, ticket.company_id, flash);
}

fn spawn_flag_expiry(
    store: &Arc<Mutex<CompanyListStore>>,
    events: &broadcast::Sender<DirectoryEvent>,
    id: CompanyId,
    flash: Duration,
) {
    let Ok(handle) = Handle::try_current() else {
        return;
    };
    let store = Arc::clone(store);
    let events = events.clone();
    handle.spawn(async move {
        sleep(flash).await;
        let cleared = store.lock().await.clear_expired_flags(Instant::now());
        if cleared.contains(&id) {
            let _ = events.send(DirectoryEvent::ErrorFlagCleared(id));
        }
    });
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
