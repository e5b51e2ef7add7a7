//! Testing utilities for intake.
//!
//! [`MemoryStore`] implements `ReceptionStore` in process. Every site lives in
//! one `DashMap` entry and each operation runs under that entry's write lock,
//! so concurrent calls for one site are serialized exactly like row locks
//! serialize them in PostgreSQL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use intake_core::{
    City, IntakeError, Item, ItemType, ListQuery, ReceptionStore, Result, Session,
    SessionStatus, Site, SiteRow,
};
use uuid::Uuid;

struct SessionState {
    session: Session,
    /// `(seq, item)` in creation order.
    items: Vec<(u64, Item)>,
}

struct SiteState {
    /// Registration order, breaks `created_at` ties.
    seq: u64,
    site: Site,
    sessions: Vec<SessionState>,
}

impl SiteState {
    fn active_mut(&mut self) -> Option<&mut SessionState> {
        self.sessions
            .iter_mut()
            .filter(|s| s.session.status.is_active())
            .max_by_key(|s| s.session.created_at)
    }
}

#[derive(Default)]
struct Inner {
    sites: DashMap<Uuid, SiteState>,
    next_seq: AtomicU64,
}

/// In-memory reception store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The site's reception in progress, if any.
    pub fn active_session(&self, site_id: Uuid) -> Option<Session> {
        self.inner.sites.get(&site_id).and_then(|state| {
            state
                .sessions
                .iter()
                .find(|s| s.session.status.is_active())
                .map(|s| s.session.clone())
        })
    }

    /// Number of receptions in progress at a site. Never more than one.
    pub fn active_count(&self, site_id: Uuid) -> usize {
        self.inner.sites.get(&site_id).map_or(0, |state| {
            state
                .sessions
                .iter()
                .filter(|s| s.session.status.is_active())
                .count()
        })
    }

    /// Every reception ever opened at a site, oldest first.
    pub fn sessions(&self, site_id: Uuid) -> Vec<Session> {
        self.inner.sites.get(&site_id).map_or_else(Vec::new, |state| {
            state.sessions.iter().map(|s| s.session.clone()).collect()
        })
    }

    /// Items of a reception in creation order.
    pub fn items(&self, session_id: Uuid) -> Vec<Item> {
        self.inner
            .sites
            .iter()
            .find_map(|entry| {
                entry
                    .sessions
                    .iter()
                    .find(|s| s.session.id == session_id)
                    .map(|s| s.items.iter().map(|(_, item)| item.clone()).collect())
            })
            .unwrap_or_default()
    }

    pub fn site_count(&self) -> usize {
        self.inner.sites.len()
    }

    fn next_seq(&self) -> u64 {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Consistent copy of one site's rows, left-join style.
    fn rows_for(state: &SiteState, query: &ListQuery) -> Vec<SiteRow> {
        let mut sessions: Vec<&SessionState> = state
            .sessions
            .iter()
            .filter(|s| query.includes(s.session.created_at))
            .collect();
        sessions.sort_by_key(|s| s.session.created_at);

        if sessions.is_empty() {
            return vec![SiteRow::bare(state.site.clone())];
        }

        let mut rows = Vec::new();
        for s in sessions {
            if s.items.is_empty() {
                rows.push(SiteRow {
                    site: state.site.clone(),
                    session: Some(s.session.clone()),
                    item: None,
                });
            }
            for (_, item) in &s.items {
                rows.push(SiteRow {
                    site: state.site.clone(),
                    session: Some(s.session.clone()),
                    item: Some(item.clone()),
                });
            }
        }
        rows
    }
}

#[async_trait]
impl ReceptionStore for MemoryStore {
    async fn insert_site(&self, name: City) -> Result<Site> {
        let site = Site {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            name,
        };
        self.inner.sites.insert(
            site.id,
            SiteState {
                seq: self.next_seq(),
                site: site.clone(),
                sessions: Vec::new(),
            },
        );
        Ok(site)
    }

    async fn open_session(&self, site_id: Uuid) -> Result<Session> {
        let mut state = self
            .inner
            .sites
            .get_mut(&site_id)
            .ok_or(IntakeError::SiteNotFound { site_id })?;

        if state.active_mut().is_some() {
            return Err(IntakeError::ActiveSessionExists { site_id });
        }

        let session = Session {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            site_id,
            status: SessionStatus::InProgress,
        };
        state.sessions.push(SessionState {
            session: session.clone(),
            items: Vec::new(),
        });
        Ok(session)
    }

    async fn close_session(&self, site_id: Uuid) -> Result<Session> {
        let mut state = self
            .inner
            .sites
            .get_mut(&site_id)
            .ok_or(IntakeError::NoActiveSession { site_id })?;

        let active = state
            .active_mut()
            .ok_or(IntakeError::NoActiveSession { site_id })?;
        active.session.status = SessionStatus::Closed;
        Ok(active.session.clone())
    }

    async fn append_item(&self, site_id: Uuid, item_type: ItemType) -> Result<Item> {
        let mut state = self
            .inner
            .sites
            .get_mut(&site_id)
            .ok_or(IntakeError::NoActiveSession { site_id })?;

        let seq = self.next_seq();
        let active = state
            .active_mut()
            .ok_or(IntakeError::NoActiveSession { site_id })?;

        let item = Item {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            item_type,
            session_id: active.session.id,
        };
        active.items.push((seq, item.clone()));
        Ok(item)
    }

    async fn pop_last_item(&self, site_id: Uuid) -> Result<()> {
        let mut state = self
            .inner
            .sites
            .get_mut(&site_id)
            .ok_or(IntakeError::NoActiveSession { site_id })?;

        let active = state
            .active_mut()
            .ok_or(IntakeError::NoActiveSession { site_id })?;

        let newest = active
            .items
            .iter()
            .enumerate()
            .max_by_key(|(_, (seq, _))| *seq)
            .map(|(idx, _)| idx);

        match newest {
            Some(idx) => {
                active.items.remove(idx);
                Ok(())
            }
            None => Err(IntakeError::EmptySession {
                session_id: active.session.id,
            }),
        }
    }

    async fn list_site_rows(&self, query: &ListQuery) -> Result<Vec<SiteRow>> {
        let mut page: Vec<((DateTime<Utc>, u64), Vec<SiteRow>)> = self
            .inner
            .sites
            .iter()
            .map(|entry| {
                let order = (entry.site.created_at, entry.seq);
                (order, Self::rows_for(entry.value(), query))
            })
            .collect();
        page.sort_by_key(|(order, _)| *order);

        let offset = usize::try_from(query.offset()).map_err(IntakeError::infrastructure)?;
        let limit = usize::try_from(query.limit()).map_err(IntakeError::infrastructure)?;

        Ok(page
            .into_iter()
            .skip(offset)
            .take(limit)
            .flat_map(|(_, rows)| rows)
            .collect())
    }
}
