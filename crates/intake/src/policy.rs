//! Role checks applied before any intake operation runs.

/// Role allowed to register sites.
pub const MODERATOR: &str = "moderator";

/// Role that runs receptions at a site.
pub const EMPLOYEE: &str = "employee";

/// Operations exposed by [`IntakeService`](crate::IntakeService).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSite,
    OpenSession,
    CloseSession,
    AppendItem,
    PopLastItem,
    ListSites,
}

/// Decides whether an already-authenticated role may run an operation.
pub trait AccessPolicy: Send + Sync {
    fn permits(&self, role: &str, operation: Operation) -> bool;
}

/// Moderators register sites, employees run receptions, both may list.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRolePolicy;

impl AccessPolicy for StaticRolePolicy {
    fn permits(&self, role: &str, operation: Operation) -> bool {
        match operation {
            Operation::CreateSite => role == MODERATOR,
            Operation::OpenSession
            | Operation::CloseSession
            | Operation::AppendItem
            | Operation::PopLastItem => role == EMPLOYEE,
            Operation::ListSites => role == EMPLOYEE || role == MODERATOR,
        }
    }
}

/// For callers that enforce roles upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn permits(&self, _role: &str, _operation: Operation) -> bool {
        true
    }
}
