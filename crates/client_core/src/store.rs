//! Authoritative client-side copy of the company list.
//!
//! The store owns no I/O. Callers apply a [`Mutation`] optimistically, send the
//! matching request themselves, and feed the answer back through
//! [`CompanyListStore::reconcile`] or [`CompanyListStore::rollback`] together
//! with the [`MutationTicket`] they were handed.
//!
//! Each `(company, field)` pair carries the sequence number of its newest
//! mutation and the set of requests still in flight. Only the newest ticket
//! decides the displayed value; older responses move the last known server
//! value and are reported as stale unless the display is already tracking it.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};

use shared::{
    domain::{Company, CompanyId, Tier, MIN_RANK},
    error::DirectoryError,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::view::{self, ViewFilter, ViewSummary};

pub const DEFAULT_ERROR_FLASH: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Rank,
    Tier,
    Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Rank(i64),
    Tier(Tier),
    Tags(Vec<String>),
}

impl FieldValue {
    fn read(company: &Company, field: Field) -> Self {
        match field {
            Field::Rank => FieldValue::Rank(company.rank),
            Field::Tier => FieldValue::Tier(company.tier.clone()),
            Field::Tags => FieldValue::Tags(company.tags.clone()),
        }
    }

    fn write(self, company: &mut Company) {
        match self {
            FieldValue::Rank(rank) => company.rank = rank,
            FieldValue::Tier(tier) => company.tier = tier,
            FieldValue::Tags(tags) => company.tags = tags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetRank(i64),
    /// Demote by one place.
    IncrementRank,
    /// Promote by one place, never past [`MIN_RANK`].
    DecrementRank,
    SetTier(Tier),
    AddTag(String),
    RemoveTagAt(usize),
}

impl Mutation {
    pub fn field(&self) -> Field {
        match self {
            Mutation::SetRank(_) | Mutation::IncrementRank | Mutation::DecrementRank => {
                Field::Rank
            }
            Mutation::SetTier(_) => Field::Tier,
            Mutation::AddTag(_) | Mutation::RemoveTagAt(_) => Field::Tags,
        }
    }
}

/// Handed out by [`CompanyListStore::apply`]; identifies one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationTicket {
    pub company_id: CompanyId,
    pub field: Field,
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub struct OptimisticUpdate {
    pub company: Company,
    pub ticket: MutationTicket,
}

/// Server-confirmed values. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmedFields {
    pub rank: Option<i64>,
    pub tier: Option<Tier>,
    pub tags: Option<Vec<String>>,
}

impl ConfirmedFields {
    pub fn rank(rank: i64) -> Self {
        Self {
            rank: Some(rank),
            ..Self::default()
        }
    }

    pub fn tier(tier: Tier) -> Self {
        Self {
            tier: Some(tier),
            ..Self::default()
        }
    }

    fn value_for(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Rank => self.rank.map(FieldValue::Rank),
            Field::Tier => self.tier.clone().map(FieldValue::Tier),
            Field::Tags => self.tags.clone().map(FieldValue::Tags),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// `changed` is false when the server agreed with the optimistic value.
    /// `flag_cleared` is set when this success ended an error flag early.
    Applied {
        company: Company,
        changed: bool,
        flag_cleared: bool,
    },
    /// A newer mutation on the same field was issued after this one.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    RolledBack(Company),
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Idle,
    Pending,
}

/// Tag responses carry no tag list, so each in-flight tag request remembers
/// its own edit to replay onto (or revert from) the known server value.
#[derive(Debug, Clone)]
enum TagEdit {
    Added(String),
    Removed { position: usize, tag: String },
}

impl TagEdit {
    fn replay(&self, tags: &mut Vec<String>) {
        match self {
            TagEdit::Added(tag) => tags.push(tag.clone()),
            TagEdit::Removed { position, tag } => {
                let slot = if tags.get(*position) == Some(tag) {
                    Some(*position)
                } else {
                    tags.iter().position(|t| t == tag)
                };
                if let Some(slot) = slot {
                    tags.remove(slot);
                }
            }
        }
    }

    fn revert(&self, tags: &mut Vec<String>) {
        match self {
            TagEdit::Added(tag) => {
                if let Some(slot) = tags.iter().rposition(|t| t == tag) {
                    tags.remove(slot);
                }
            }
            TagEdit::Removed { position, tag } => {
                tags.insert((*position).min(tags.len()), tag.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatestState {
    InFlight,
    Confirmed,
    RolledBack,
}

struct InFlight {
    edit: Option<TagEdit>,
    /// Whether the displayed value currently includes this request's edit.
    in_display: bool,
    /// Whether `baseline` already includes this request's edit.
    in_baseline: bool,
}

struct PendingField {
    latest_seq: u64,
    latest: LatestState,
    /// Last value known to the server; restored if the newest request fails.
    baseline: FieldValue,
    in_flight: BTreeMap<u64, InFlight>,
}

pub struct CompanyListStore {
    companies: Vec<Company>,
    index: HashMap<CompanyId, usize>,
    pending: HashMap<(CompanyId, Field), PendingField>,
    error_flags: HashMap<CompanyId, Instant>,
    error_flash: Duration,
    next_seq: u64,
}

impl Default for CompanyListStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanyListStore {
    pub fn new() -> Self {
        Self::with_error_flash(DEFAULT_ERROR_FLASH)
    }

    pub fn with_error_flash(error_flash: Duration) -> Self {
        Self {
            companies: Vec::new(),
            index: HashMap::new(),
            pending: HashMap::new(),
            error_flags: HashMap::new(),
            error_flash,
            next_seq: 0,
        }
    }

    pub fn from_companies(companies: Vec<Company>) -> Self {
        let mut store = Self::new();
        store.replace_all(companies);
        store
    }

    /// Replaces the whole cache with a fresh load. Outstanding tickets become
    /// stale.
    pub fn replace_all(&mut self, companies: Vec<Company>) {
        let mut kept = Vec::with_capacity(companies.len());
        let mut index = HashMap::with_capacity(companies.len());
        for mut company in companies {
            if index.contains_key(&company.id) {
                warn!(company_id = company.id.0, "store: duplicate company id in load, keeping first");
                continue;
            }
            if company.rank < MIN_RANK {
                debug!(
                    company_id = company.id.0,
                    rank = company.rank,
                    "store: raising loaded rank to minimum"
                );
                company.rank = MIN_RANK;
            }
            index.insert(company.id, kept.len());
            kept.push(company);
        }
        self.companies = kept;
        self.index = index;
        self.pending.clear();
        self.error_flags.clear();
        info!(count = self.companies.len(), "store: cache replaced");
    }

    pub fn len(&self) -> usize {
        self.companies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }

    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub fn get(&self, id: CompanyId) -> Option<&Company> {
        self.index.get(&id).map(|&slot| &self.companies[slot])
    }

    fn get_mut(&mut self, id: CompanyId) -> Option<&mut Company> {
        let slot = *self.index.get(&id)?;
        self.companies.get_mut(slot)
    }

    pub fn derive_view(&self, filter: &ViewFilter) -> Vec<&Company> {
        view::derive(&self.companies, filter)
    }

    pub fn summary(&self, filter: &ViewFilter) -> ViewSummary {
        ViewSummary {
            total: self.companies.len(),
            shown: self.companies.iter().filter(|c| filter.accepts(c)).count(),
        }
    }

    /// Every distinct tag in the cache, sorted ascending.
    pub fn tag_vocabulary(&self) -> Vec<String> {
        self.companies
            .iter()
            .flat_map(|c| c.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn field_state(&self, id: CompanyId, field: Field) -> FieldState {
        if self.pending.contains_key(&(id, field)) {
            FieldState::Pending
        } else {
            FieldState::Idle
        }
    }

    /// Writes the mutation into the cache immediately and returns the updated
    /// company together with the ticket for its eventual response.
    pub fn apply(
        &mut self,
        id: CompanyId,
        mutation: Mutation,
    ) -> Result<OptimisticUpdate, DirectoryError> {
        let field = mutation.field();
        let company = self.get_mut(id).ok_or_else(|| {
            warn!(company_id = id.0, "store: mutation target missing");
            DirectoryError::NotFound(id)
        })?;
        let before = FieldValue::read(company, field);

        let edit = match mutation {
            Mutation::SetRank(rank) => {
                company.rank = rank.max(MIN_RANK);
                None
            }
            Mutation::IncrementRank => {
                company.rank = company.rank.saturating_add(1);
                None
            }
            Mutation::DecrementRank => {
                company.rank = company.rank.saturating_sub(1).max(MIN_RANK);
                None
            }
            Mutation::SetTier(tier) => {
                if !tier.is_known() {
                    return Err(DirectoryError::validation(format!(
                        "tier must be one of A, B, C, D (got '{tier}')"
                    )));
                }
                company.tier = tier;
                None
            }
            Mutation::AddTag(text) => {
                let tag = text.trim();
                if tag.is_empty() {
                    debug!(company_id = id.0, "store: ignoring empty tag");
                    return Err(DirectoryError::validation("tag text is empty"));
                }
                company.tags.push(tag.to_string());
                Some(TagEdit::Added(tag.to_string()))
            }
            Mutation::RemoveTagAt(position) => {
                if position >= company.tags.len() {
                    warn!(
                        company_id = id.0,
                        position,
                        tag_count = company.tags.len(),
                        "store: tag index out of range"
                    );
                    return Err(DirectoryError::validation(format!(
                        "tag index {position} out of range"
                    )));
                }
                let tag = company.tags.remove(position);
                Some(TagEdit::Removed { position, tag })
            }
        };

        let updated = company.clone();
        self.next_seq += 1;
        let seq = self.next_seq;
        let pending = self.pending.entry((id, field)).or_insert_with(|| PendingField {
            latest_seq: seq,
            latest: LatestState::InFlight,
            baseline: before,
            in_flight: BTreeMap::new(),
        });
        pending.latest_seq = seq;
        pending.latest = LatestState::InFlight;
        pending.in_flight.insert(
            seq,
            InFlight {
                edit,
                in_display: true,
                in_baseline: false,
            },
        );

        debug!(company_id = id.0, ?field, seq, "store: optimistic update applied");
        Ok(OptimisticUpdate {
            company: updated,
            ticket: MutationTicket {
                company_id: id,
                field,
                seq,
            },
        })
    }

    /// Applies a successful backend response.
    pub fn reconcile(
        &mut self,
        ticket: &MutationTicket,
        confirmed: ConfirmedFields,
    ) -> ReconcileOutcome {
        let key = (ticket.company_id, ticket.field);
        let Some(pending) = self.pending.get_mut(&key) else {
            debug!(
                company_id = ticket.company_id.0,
                field = ?ticket.field,
                seq = ticket.seq,
                "store: discarding confirmation for unknown ticket"
            );
            return ReconcileOutcome::Stale;
        };
        let Some(request) = pending.in_flight.remove(&ticket.seq) else {
            return ReconcileOutcome::Stale;
        };
        if pending.latest_seq == ticket.seq {
            self.confirm_latest(ticket, confirmed)
        } else {
            self.confirm_older(ticket, request, confirmed)
        }
    }

    fn confirm_latest(
        &mut self,
        ticket: &MutationTicket,
        confirmed: ConfirmedFields,
    ) -> ReconcileOutcome {
        let id = ticket.company_id;
        let writable: Vec<(Field, FieldValue)> = [Field::Rank, Field::Tier, Field::Tags]
            .into_iter()
            .filter(|&f| f == ticket.field || !self.pending.contains_key(&(id, f)))
            .filter_map(|f| confirmed.value_for(f).map(|value| (f, value)))
            .collect();

        let Some(company) = self.index.get(&id).and_then(|&slot| self.companies.get_mut(slot))
        else {
            return ReconcileOutcome::Stale;
        };
        let mut changed = false;
        for (field, value) in writable {
            if FieldValue::read(company, field) != value {
                value.write(company);
                changed = true;
            }
        }
        let shown = FieldValue::read(company, ticket.field);
        let company = company.clone();

        let key = (id, ticket.field);
        if let Some(pending) = self.pending.get_mut(&key) {
            if pending.in_flight.is_empty() {
                self.pending.remove(&key);
            } else {
                pending.latest = LatestState::Confirmed;
                pending.baseline = shown;
                for request in pending.in_flight.values_mut() {
                    request.in_baseline = request.in_display;
                }
            }
        }

        let flag_cleared = self.error_flags.remove(&id).is_some();
        if flag_cleared {
            debug!(company_id = id.0, "store: error flag cleared by success");
        }
        ReconcileOutcome::Applied {
            company,
            changed,
            flag_cleared,
        }
    }

    /// An older request finished after a newer one on the same field was
    /// issued. Its value only moves the server baseline, unless the display
    /// currently tracks that baseline.
    fn confirm_older(
        &mut self,
        ticket: &MutationTicket,
        request: InFlight,
        confirmed: ConfirmedFields,
    ) -> ReconcileOutcome {
        let key = (ticket.company_id, ticket.field);
        let Some(pending) = self.pending.get_mut(&key) else {
            return ReconcileOutcome::Stale;
        };
        let Some(company) = self
            .index
            .get(&ticket.company_id)
            .and_then(|&slot| self.companies.get_mut(slot))
        else {
            return ReconcileOutcome::Stale;
        };

        let mut changed = false;
        match (confirmed.value_for(ticket.field), &request.edit) {
            (Some(value), _) => {
                pending.baseline = value.clone();
                if pending.latest == LatestState::RolledBack
                    && FieldValue::read(company, ticket.field) != value
                {
                    value.write(company);
                    changed = true;
                }
            }
            (None, Some(edit)) => {
                if !request.in_baseline {
                    if let FieldValue::Tags(tags) = &mut pending.baseline {
                        edit.replay(tags);
                    }
                }
                if !request.in_display {
                    edit.replay(&mut company.tags);
                    changed = true;
                }
            }
            (None, None) => {}
        }
        let settled = pending.in_flight.is_empty();
        let company = company.clone();
        if settled {
            self.pending.remove(&key);
        }

        if !changed {
            debug!(
                company_id = ticket.company_id.0,
                field = ?ticket.field,
                seq = ticket.seq,
                "store: older confirmation folded into baseline"
            );
            return ReconcileOutcome::Stale;
        }
        ReconcileOutcome::Applied {
            company,
            changed,
            flag_cleared: false,
        }
    }

    /// Applies a failed backend response. The newest request restores the
    /// last confirmed value; an older tag request undoes only its own edit.
    /// Either way the company's transient error flag is raised.
    pub fn rollback(&mut self, ticket: &MutationTicket, now: Instant) -> RollbackOutcome {
        let key = (ticket.company_id, ticket.field);
        let Some(pending) = self.pending.get_mut(&key) else {
            return RollbackOutcome::Stale;
        };
        let Some(request) = pending.in_flight.remove(&ticket.seq) else {
            return RollbackOutcome::Stale;
        };
        let Some(company) = self
            .index
            .get(&ticket.company_id)
            .and_then(|&slot| self.companies.get_mut(slot))
        else {
            return RollbackOutcome::Stale;
        };

        let reverted = if pending.latest_seq == ticket.seq {
            pending.baseline.clone().write(company);
            pending.latest = LatestState::RolledBack;
            for other in pending.in_flight.values_mut() {
                other.in_display = other.in_baseline;
            }
            true
        } else if let Some(edit) = &request.edit {
            if request.in_baseline {
                if let FieldValue::Tags(tags) = &mut pending.baseline {
                    edit.revert(tags);
                }
            }
            if request.in_display {
                edit.revert(&mut company.tags);
            }
            request.in_display
        } else {
            false
        };
        let settled = pending.in_flight.is_empty();
        let restored = company.clone();
        if settled {
            self.pending.remove(&key);
        }

        if !reverted {
            debug!(
                company_id = ticket.company_id.0,
                field = ?ticket.field,
                seq = ticket.seq,
                "store: failure superseded by newer mutation"
            );
            return RollbackOutcome::Stale;
        }
        self.error_flags.insert(ticket.company_id, now);
        info!(
            company_id = ticket.company_id.0,
            field = ?ticket.field,
            "store: optimistic update rolled back"
        );
        RollbackOutcome::RolledBack(restored)
    }

    pub fn error_flash(&self) -> Duration {
        self.error_flash
    }

    pub fn error_flag(&self, id: CompanyId, now: Instant) -> bool {
        self.error_flags
            .get(&id)
            .is_some_and(|raised| now.saturating_duration_since(*raised) < self.error_flash)
    }

    /// Drops expired flags and returns the companies whose flag went away.
    pub fn clear_expired_flags(&mut self, now: Instant) -> Vec<CompanyId> {
        let flash = self.error_flash;
        let expired: Vec<CompanyId> = self
            .error_flags
            .iter()
            .filter(|(_, raised)| now.saturating_duration_since(**raised) >= flash)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.error_flags.remove(id);
        }
        expired
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
