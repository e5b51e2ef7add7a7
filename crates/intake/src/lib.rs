//! # Intake
//!
//! Reception lifecycle for pickup points: a site receives goods through at
//! most one reception at a time, items go into and come out of that reception
//! only, and closing a reception is final.
//!
//! ## Architecture
//!
//! ```text
//! Caller (role already authenticated)
//!     │
//!     ▼
//! IntakeService ── AccessPolicy.permits() ── validate input
//!     │
//!     ▼ one call, under a deadline
//! ReceptionStore (Postgres / in-memory)
//!     │   open / close        → reception state machine
//!     │   append / pop_last   → item ledger
//!     │   list_site_rows      → flat site ⟕ session ⟕ item rows
//!     ▼
//! listing::aggregate() ──► Vec<SiteWithSessions>
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One active reception per site** - enforced by the store, not by a
//!    read-then-write in application code
//! 2. **Items only touch the active reception** - locating it and mutating
//!    its items is one atomic unit
//! 3. **Closed is terminal** - a closed reception never changes again
//! 4. **Items are ordered** - `pop_last_item` removes the newest one
//!
//! ## Errors
//!
//! Every operation returns [`IntakeError`]. Validation and role failures are
//! reported before storage is touched; storage failures roll back completely.
//! There is no automatic retry: a [`IntakeError::Conflict`] means the caller
//! lost a race and may retry.
//!
//! ## Example
//!
//! ```ignore
//! use intake_core::{IntakeService, ListRequest, EMPLOYEE, MODERATOR};
//!
//! let service = IntakeService::new(store);
//!
//! let site = service.create_site(MODERATOR, "Казань").await?;
//! service.open_session(EMPLOYEE, site.id).await?;
//! service.append_item(EMPLOYEE, site.id, "обувь").await?;
//! service.close_session(EMPLOYEE, site.id).await?;
//!
//! let page = service.list_sites(EMPLOYEE, ListRequest::new(1, 10)).await?;
//! ```

mod error;
mod model;
mod policy;
mod service;
mod store;

pub mod listing;

pub use crate::error::{ErrorKind, IntakeError, InvalidInput, Result};

pub use crate::model::{
    City, Item, ItemType, Session, SessionStatus, SessionWithItems, Site, SiteWithSessions,
    UnknownStatus,
};

pub use listing::{aggregate, ListQuery, ListRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

pub use policy::{AccessPolicy, AllowAll, Operation, StaticRolePolicy, EMPLOYEE, MODERATOR};

pub use service::{IntakeService, ServiceConfig, DEFAULT_OPERATION_TIMEOUT};

pub use store::{ReceptionStore, SiteRow};

// Re-export commonly used external types
pub use async_trait::async_trait;
