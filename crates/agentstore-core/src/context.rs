use std::sync::OnceLock;

/// Per-request database context.
///
/// Carries the caller identity, tenancy, and privilege flags through every
/// resolver call. There is no implicit or thread-local identity anywhere in
/// the codebase; callers entering privileged initialization (schema load,
/// seed data) construct a kernel context explicitly.
#[derive(Debug, Clone)]
pub struct DbContext {
    pub user_id: String,
    /// Tenant supplied by the caller, if known up front.
    tenant: Option<String>,
    /// Tenant resolved from the role-assignment table on first use.
    /// Contexts are per-request and never reused across callers, so this
    /// cache cannot leak a tenant across connections.
    resolved_tenant: OnceLock<String>,
    pub kernel_mode: bool,
    pub need_auth_check: bool,
}

impl DbContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant: None,
            resolved_tenant: OnceLock::new(),
            kernel_mode: false,
            need_auth_check: true,
        }
    }

    /// Privileged context used by schema load and seed-data paths.
    /// Bypasses per-row authorization entirely.
    pub fn kernel() -> Self {
        Self {
            user_id: "kernel".to_string(),
            tenant: None,
            resolved_tenant: OnceLock::new(),
            kernel_mode: true,
            need_auth_check: false,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn without_auth_check(mut self) -> Self {
        self.need_auth_check = false;
        self
    }

    /// Tenant known to this context, explicit or previously resolved.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant
            .as_deref()
            .or_else(|| self.resolved_tenant.get().map(String::as_str))
    }

    /// Record the tenant looked up from the role-assignment table.
    /// A tenant set explicitly by the caller wins over a later lookup.
    pub fn cache_tenant(&self, tenant: String) -> &str {
        self.resolved_tenant.get_or_init(|| tenant)
    }

    /// True when per-row authorization applies to this caller.
    pub fn requires_auth(&self) -> bool {
        !self.kernel_mode && self.need_auth_check
    }
}

impl Default for DbContext {
    fn default() -> Self {
        Self::new("anonymous")
    }
}
