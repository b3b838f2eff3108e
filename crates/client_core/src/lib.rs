//! Client-side company directory: a local cache of the company list with
//! optimistic mutations, plus the HTTP backend it reconciles against.

pub mod backend;
pub mod client;
pub mod debounce;
pub mod store;
pub mod view;

pub use backend::{CompanyBackend, HttpCompanyBackend, DEFAULT_REQUEST_TIMEOUT};
pub use client::{DirectoryClient, DirectoryEvent, MutationOutcome, Resolution};
pub use debounce::{Debouncer, DEFAULT_SEARCH_DEBOUNCE};
pub use store::{
    CompanyListStore, ConfirmedFields, Field, FieldState, Mutation, MutationTicket,
    OptimisticUpdate, ReconcileOutcome, RollbackOutcome, DEFAULT_ERROR_FLASH,
};
pub use view::{SortOrder, ViewFilter, ViewSummary};
