//! Storage capability consumed by [`IntakeService`](crate::IntakeService).
//!
//! Implementations own all shared mutable state. Each mutating method is one
//! atomic unit: it locates the site's active reception and acts on it without
//! another caller being able to change that reception in between.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::listing::ListQuery;
use crate::model::{City, Item, ItemType, Session, Site};

/// One row of the site → session → item left outer join.
///
/// `session` is `None` for a site without qualifying sessions, `item` is
/// `None` for a session without items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRow {
    pub site: Site,
    pub session: Option<Session>,
    pub item: Option<Item>,
}

impl SiteRow {
    pub fn bare(site: Site) -> Self {
        Self {
            site,
            session: None,
            item: None,
        }
    }
}

#[async_trait]
pub trait ReceptionStore: Send + Sync {
    /// Register a new site.
    async fn insert_site(&self, name: City) -> Result<Site>;

    /// Start a reception at `site_id`.
    ///
    /// Fails with `ActiveSessionExists` if one is already in progress and
    /// with `SiteNotFound` if the site does not exist.
    async fn open_session(&self, site_id: Uuid) -> Result<Session>;

    /// Close the site's reception in progress. Fails with `NoActiveSession`.
    async fn close_session(&self, site_id: Uuid) -> Result<Session>;

    /// Add an item to the site's reception in progress.
    async fn append_item(&self, site_id: Uuid, item_type: ItemType) -> Result<Item>;

    /// Remove the most recently added item of the site's reception in progress.
    async fn pop_last_item(&self, site_id: Uuid) -> Result<()>;

    /// Flat joined rows for exactly the page of sites selected by `query`.
    ///
    /// Rows of one site are contiguous; sessions are ordered by creation time
    /// and items by creation sequence within their session.
    async fn list_site_rows(&self, query: &ListQuery) -> Result<Vec<SiteRow>>;
}

#[async_trait]
impl<T: ReceptionStore + ?Sized> ReceptionStore for Arc<T> {
    async fn insert_site(&self, name: City) -> Result<Site> {
        (**self).insert_site(name).await
    }

    async fn open_session(&self, site_id: Uuid) -> Result<Session> {
        (**self).open_session(site_id).await
    }

    async fn close_session(&self, site_id: Uuid) -> Result<Session> {
        (**self).close_session(site_id).await
    }

    async fn append_item(&self, site_id: Uuid, item_type: ItemType) -> Result<Item> {
        (**self).append_item(site_id, item_type).await
    }

    async fn pop_last_item(&self, site_id: Uuid) -> Result<()> {
        (**self).pop_last_item(site_id).await
    }

    async fn list_site_rows(&self, query: &ListQuery) -> Result<Vec<SiteRow>> {
        (**self).list_site_rows(query).await
    }
}
