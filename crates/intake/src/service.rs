//! Service facade: role check, input validation, deadline, then one store call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{IntakeError, Result};
use crate::listing::{aggregate, ListRequest};
use crate::model::{City, Item, ItemType, Session, Site, SiteWithSessions};
use crate::policy::{AccessPolicy, Operation, StaticRolePolicy};
use crate::store::ReceptionStore;

/// Default per-operation deadline.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Upper bound on a single store call. On expiry the call is dropped,
    /// which rolls back whatever transaction it had open.
    pub operation_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Entry point for callers holding an authenticated role.
///
/// Holds no mutable state of its own; clones share the store.
#[derive(Clone)]
pub struct IntakeService<S> {
    store: S,
    policy: Arc<dyn AccessPolicy>,
    config: ServiceConfig,
}

impl<S: ReceptionStore> IntakeService<S> {
    /// Create a service with [`StaticRolePolicy`] and the default deadline.
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: Arc::new(StaticRolePolicy),
            config: ServiceConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: impl AccessPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[instrument(skip(self), fields(operation = ?Operation::CreateSite))]
    pub async fn create_site(&self, role: &str, name: &str) -> Result<Site> {
        self.authorize(role, Operation::CreateSite)?;
        let name: City = name.parse()?;

        let site = self.timed(self.store.insert_site(name)).await?;
        info!(site_id = %site.id, city = %site.name, "site registered");
        Ok(site)
    }

    #[instrument(skip(self), fields(operation = ?Operation::OpenSession))]
    pub async fn open_session(&self, role: &str, site_id: Uuid) -> Result<Session> {
        self.authorize(role, Operation::OpenSession)?;

        let session = self.timed(self.store.open_session(site_id)).await?;
        info!(session_id = %session.id, "reception opened");
        Ok(session)
    }

    #[instrument(skip(self), fields(operation = ?Operation::CloseSession))]
    pub async fn close_session(&self, role: &str, site_id: Uuid) -> Result<Session> {
        self.authorize(role, Operation::CloseSession)?;

        let session = self.timed(self.store.close_session(site_id)).await?;
        info!(session_id = %session.id, "reception closed");
        Ok(session)
    }

    #[instrument(skip(self), fields(operation = ?Operation::AppendItem))]
    pub async fn append_item(&self, role: &str, site_id: Uuid, item_type: &str) -> Result<Item> {
        self.authorize(role, Operation::AppendItem)?;
        let item_type: ItemType = item_type.parse()?;

        let item = self
            .timed(self.store.append_item(site_id, item_type))
            .await?;
        debug!(item_id = %item.id, session_id = %item.session_id, "item added");
        Ok(item)
    }

    #[instrument(skip(self), fields(operation = ?Operation::PopLastItem))]
    pub async fn pop_last_item(&self, role: &str, site_id: Uuid) -> Result<()> {
        self.authorize(role, Operation::PopLastItem)?;

        self.timed(self.store.pop_last_item(site_id)).await?;
        debug!("last item removed");
        Ok(())
    }

    #[instrument(skip(self), fields(operation = ?Operation::ListSites))]
    pub async fn list_sites(
        &self,
        role: &str,
        request: ListRequest,
    ) -> Result<Vec<SiteWithSessions>> {
        self.authorize(role, Operation::ListSites)?;
        let query = request.validate()?;

        let rows = self.timed(self.store.list_site_rows(&query)).await?;
        let row_count = rows.len();
        let sites = aggregate(rows);
        debug!(row_count, site_count = sites.len(), "sites listed");
        Ok(sites)
    }

    fn authorize(&self, role: &str, operation: Operation) -> Result<()> {
        if self.policy.permits(role, operation) {
            Ok(())
        } else {
            debug!(role, ?operation, "access denied");
            Err(IntakeError::AccessDenied {
                role: role.to_string(),
            })
        }
    }

    async fn timed<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.config.operation_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                match &err {
                    IntakeError::Infrastructure(source) => {
                        warn!(error = %source, "storage failure")
                    }
                    IntakeError::Conflict { reason } => warn!(%reason, "lost a concurrent race"),
                    other => debug!(error = %other, "rejected"),
                }
                Err(err)
            }
            Err(_) => {
                warn!(?limit, "deadline exceeded, call abandoned");
                Err(IntakeError::DeadlineExceeded(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, InvalidInput};
    use crate::listing::ListQuery;
    use crate::model::SessionStatus;
    use crate::policy::{AllowAll, EMPLOYEE, MODERATOR};
    use crate::store::SiteRow;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;

    // ========================================================================
    // Recording store: remembers which calls reached storage
    // ========================================================================

    #[derive(Clone, Default)]
    struct RecordingStore {
        calls: Arc<Mutex<Vec<&'static str>>>,
        delay: Option<Duration>,
        fail_with: Option<fn() -> IntakeError>,
    }

    impl RecordingStore {
        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn failing(fail_with: fn() -> IntakeError) -> Self {
            Self {
                fail_with: Some(fail_with),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, call: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    fn session_for(site_id: Uuid, status: SessionStatus) -> Session {
        Session {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            site_id,
            status,
        }
    }

    #[async_trait]
    impl ReceptionStore for RecordingStore {
        async fn insert_site(&self, name: City) -> Result<Site> {
            self.record("insert_site").await?;
            Ok(Site {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                name,
            })
        }

        async fn open_session(&self, site_id: Uuid) -> Result<Session> {
            self.record("open_session").await?;
            Ok(session_for(site_id, SessionStatus::InProgress))
        }

        async fn close_session(&self, site_id: Uuid) -> Result<Session> {
            self.record("close_session").await?;
            Ok(session_for(site_id, SessionStatus::Closed))
        }

        async fn append_item(&self, _site_id: Uuid, item_type: ItemType) -> Result<Item> {
            self.record("append_item").await?;
            Ok(Item {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                item_type,
                session_id: Uuid::new_v4(),
            })
        }

        async fn pop_last_item(&self, _site_id: Uuid) -> Result<()> {
            self.record("pop_last_item").await
        }

        async fn list_site_rows(&self, _query: &ListQuery) -> Result<Vec<SiteRow>> {
            self.record("list_site_rows").await?;
            let site = Site {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                name: City::Kazan,
            };
            Ok(vec![SiteRow::bare(site)])
        }
    }

    // ========================================================================
    // Tests
    // ========================================================================

    #[tokio::test]
    async fn test_create_site_requires_moderator_and_allowed_city() {
        let store = RecordingStore::default();
        let service = IntakeService::new(store.clone());

        let site = service.create_site(MODERATOR, "Москва").await.unwrap();
        assert_eq!(site.name, City::Moscow);

        let err = service.create_site(EMPLOYEE, "Москва").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let err = service.create_site(MODERATOR, "Лондон").await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::InvalidInput(InvalidInput::CityNotAllowed(ref c)) if c == "Лондон"
        ));

        assert_eq!(store.calls(), vec!["insert_site"]);
    }

    #[tokio::test]
    async fn test_append_item_rejects_unknown_type_before_storage() {
        let store = RecordingStore::default();
        let service = IntakeService::new(store.clone());
        let site_id = Uuid::new_v4();

        let err = service
            .append_item(EMPLOYEE, site_id, "неизвестный тип")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::InvalidInput(InvalidInput::ItemTypeNotAllowed(_))
        ));
        assert!(store.calls().is_empty());

        let item = service
            .append_item(EMPLOYEE, site_id, "одежда")
            .await
            .unwrap();
        assert_eq!(item.item_type, ItemType::Clothes);
    }

    #[tokio::test]
    async fn test_reception_operations_require_employee() {
        let store = RecordingStore::default();
        let service = IntakeService::new(store.clone());
        let site_id = Uuid::new_v4();

        assert!(service.open_session(MODERATOR, site_id).await.is_err());
        assert!(service.close_session(MODERATOR, site_id).await.is_err());
        assert!(service.pop_last_item("client", site_id).await.is_err());
        assert!(store.calls().is_empty());

        service.open_session(EMPLOYEE, site_id).await.unwrap();
        service.close_session(EMPLOYEE, site_id).await.unwrap();
        service.pop_last_item(EMPLOYEE, site_id).await.unwrap();
        assert_eq!(
            store.calls(),
            vec!["open_session", "close_session", "pop_last_item"]
        );
    }

    #[tokio::test]
    async fn test_list_validation_happens_before_storage() {
        let store = RecordingStore::default();
        let service = IntakeService::new(store.clone());
        let end = Utc::now();
        let start = end + ChronoDuration::hours(1);

        let err = service
            .list_sites(
                EMPLOYEE,
                ListRequest::new(1, 10).between(Some(start), Some(end)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::InvalidInput(InvalidInput::InvalidRange { .. })
        ));

        let err = service
            .list_sites(EMPLOYEE, ListRequest::new(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::InvalidInput(InvalidInput::InvalidPage(0))
        ));

        let err = service
            .list_sites(EMPLOYEE, ListRequest::new(1, 31))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::InvalidInput(InvalidInput::InvalidPageSize { got: 31, .. })
        ));

        assert!(store.calls().is_empty());

        let sites = service
            .list_sites(MODERATOR, ListRequest::default())
            .await
            .unwrap();
        assert_eq!(sites.len(), 1);
        assert!(sites[0].sessions.is_empty());
        assert_eq!(store.calls(), vec!["list_site_rows"]);
    }

    #[tokio::test]
    async fn test_allow_all_policy_skips_role_checks() {
        let service = IntakeService::new(RecordingStore::default()).with_policy(AllowAll);
        assert!(service.create_site("anyone", "Казань").await.is_ok());
        assert!(service.open_session("anyone", Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_call_hits_deadline() {
        let service = IntakeService::new(RecordingStore::slow(Duration::from_secs(60)))
            .with_config(ServiceConfig {
                operation_timeout: Duration::from_millis(250),
            });

        let err = service
            .open_session(EMPLOYEE, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::DeadlineExceeded(d) if d == Duration::from_millis(250)
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_store_errors_pass_through_unchanged() {
        let service = IntakeService::new(RecordingStore::failing(|| {
            IntakeError::conflict("could not serialize access")
        }));
        let err = service
            .append_item(EMPLOYEE, Uuid::new_v4(), "обувь")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());

        let service = IntakeService::new(RecordingStore::failing(|| {
            IntakeError::infrastructure(anyhow::anyhow!("connection refused"))
        }));
        let err = service
            .close_session(EMPLOYEE, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
