//! Paged listing of sites with their receptions and items.
//!
//! Stores return the flat result of a site → session → item left join for one
//! page of site identities; [`aggregate`] folds that stream back into a tree in
//! a single forward pass.
//!
//! Paging is by site, never by joined row. A row-level `LIMIT` would split a
//! site's rows across pages and return fewer than `page_size` sites.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::InvalidInput;
use crate::model::{Item, Session, SessionWithItems, Site, SiteWithSessions};
use crate::store::SiteRow;

pub const MAX_PAGE_SIZE: i64 = 30;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Unvalidated listing parameters as received from a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest {
    pub page: i64,
    pub page_size: i64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            start: None,
            end: None,
        }
    }
}

impl ListRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Check bounds and produce a query a store can run.
    pub fn validate(self) -> Result<ListQuery, InvalidInput> {
        if self.page < 1 {
            return Err(InvalidInput::InvalidPage(self.page));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(InvalidInput::InvalidPageSize {
                got: self.page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(InvalidInput::InvalidRange { start, end });
            }
        }
        let offset = (self.page - 1)
            .checked_mul(self.page_size)
            .ok_or(InvalidInput::InvalidPage(self.page))?;

        Ok(ListQuery {
            page: self.page,
            page_size: self.page_size,
            offset,
            start: self.start,
            end: self.end,
        })
    }
}

/// Validated listing query. Only obtainable through [`ListRequest::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    page: i64,
    page_size: i64,
    offset: i64,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl ListQuery {
    pub fn page(&self) -> i64 {
        self.page
    }

    /// Number of sites on the page.
    pub fn limit(&self) -> i64 {
        self.page_size
    }

    /// Number of sites skipped before the page.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    /// Whether a session created at `at` falls in the inclusive window.
    pub fn includes(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

struct SessionAcc {
    session: Session,
    items: Vec<Item>,
    seen_items: HashSet<Uuid>,
}

struct SiteAcc {
    site: Site,
    sessions: Vec<SessionAcc>,
    session_index: HashMap<Uuid, usize>,
}

impl SiteAcc {
    fn new(site: Site) -> Self {
        Self {
            site,
            sessions: Vec::new(),
            session_index: HashMap::new(),
        }
    }

    fn absorb(&mut self, session: Session, item: Option<Item>) {
        let idx = match self.session_index.get(&session.id) {
            Some(&idx) => idx,
            None => {
                let idx = self.sessions.len();
                self.session_index.insert(session.id, idx);
                self.sessions.push(SessionAcc {
                    session,
                    items: Vec::new(),
                    seen_items: HashSet::new(),
                });
                idx
            }
        };

        if let Some(item) = item {
            let acc = &mut self.sessions[idx];
            if acc.seen_items.insert(item.id) {
                acc.items.push(item);
            }
        }
    }

    fn finish(self) -> SiteWithSessions {
        SiteWithSessions {
            site: self.site,
            sessions: self
                .sessions
                .into_iter()
                .map(|acc| SessionWithItems {
                    session: acc.session,
                    items: acc.items,
                })
                .collect(),
        }
    }
}

/// Rebuild the site → session → item tree from flat joined rows.
///
/// Sites, sessions and items keep first-seen order. Every entity appears
/// exactly once no matter how many rows mention it; `None` columns contribute
/// no child.
pub fn aggregate<I>(rows: I) -> Vec<SiteWithSessions>
where
    I: IntoIterator<Item = SiteRow>,
{
    let mut sites: Vec<SiteAcc> = Vec::new();
    let mut site_index: HashMap<Uuid, usize> = HashMap::new();

    for SiteRow {
        site,
        session,
        item,
    } in rows
    {
        let idx = match site_index.get(&site.id) {
            Some(&idx) => idx,
            None => {
                let idx = sites.len();
                site_index.insert(site.id, idx);
                sites.push(SiteAcc::new(site));
                idx
            }
        };

        // An item without its session carries no position in the tree.
        if let Some(session) = session {
            sites[idx].absorb(session, item);
        }
    }

    sites.into_iter().map(SiteAcc::finish).collect()
}
