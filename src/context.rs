//! # Request Context
//!
//! Per-call carrier for the ambient tenant and actor identities. The
//! repository engine trusts only this object for security-sensitive
//! stamping; tenant or actor values embedded in an entity are never
//! authoritative.
//!
//! Cancellation follows the async model: dropping the future of an in-flight
//! call aborts it, so no separate deadline field is carried here.

/// Ambient identities for a single repository call.
///
/// Constructed by the calling application (typically from an authenticated
/// request) and passed explicitly to every engine operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: Option<String>,
    actor_id: Option<String>,
}

impl RequestContext {
    /// A context with no tenant and no actor, for system-level work on
    /// entity types that are not tenant-scoped.
    pub fn system() -> Self {
        Self::default()
    }

    /// A context scoped to the given tenant.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            actor_id: None,
        }
    }

    /// Attach the acting identity used for audit stamping.
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// The ambient tenant, if any.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// The ambient actor, if any.
    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }
}
