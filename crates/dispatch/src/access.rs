use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    context::ExecutionContext,
    descriptor::AccessState,
    error::{DeniedBy, DispatchError},
    options::Options,
};

/// Decides whether `role` may perform `operation` on `resource`.
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn query(&self, role: &str, resource: &str, operation: &str) -> anyhow::Result<bool>;
}

/// Static allow/deny role lists, used when no [`AccessControl`] adapter is
/// configured. An allow list takes precedence over a deny list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RolePolicy {
    pub allow_roles: Option<Vec<String>>,
    pub deny_roles: Option<Vec<String>>,
}

impl RolePolicy {
    pub fn allow<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_roles: Some(roles.into_iter().map(Into::into).collect()),
            deny_roles: None,
        }
    }

    pub fn deny<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_roles: None,
            deny_roles: Some(roles.into_iter().map(Into::into).collect()),
        }
    }

    /// Fills each list that is unset here from `fallback`.
    pub fn or(self, fallback: &RolePolicy) -> RolePolicy {
        RolePolicy {
            allow_roles: self.allow_roles.or_else(|| fallback.allow_roles.clone()),
            deny_roles: self.deny_roles.or_else(|| fallback.deny_roles.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow_roles.is_none() && self.deny_roles.is_none()
    }

    fn evaluate(&self, role: &str) -> Result<(), DeniedBy> {
        if let Some(allow) = &self.allow_roles {
            if allow.iter().any(|r| r == role) {
                return Ok(());
            }
            return Err(DeniedBy::AllowList(allow.clone()));
        }
        if let Some(deny) = &self.deny_roles {
            if deny.iter().any(|r| r == role) {
                return Err(DeniedBy::DenyList(deny.clone()));
            }
        }
        Ok(())
    }
}

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AclRule {
    pub role: String,
    pub resource: String,
    pub operation: String,
    #[serde(default = "granted")]
    pub allow: bool,
}

fn granted() -> bool {
    true
}

impl AclRule {
    pub fn allow(
        role: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            operation: operation.into(),
            allow: true,
        }
    }

    pub fn deny(
        role: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            allow: false,
            ..Self::allow(role, resource, operation)
        }
    }

    fn matches(&self, role: &str, resource: &str, operation: &str) -> bool {
        let hit = |pattern: &str, value: &str| pattern == WILDCARD || pattern == value;
        hit(&self.role, role) && hit(&self.resource, resource) && hit(&self.operation, operation)
    }
}

/// Rule table adapter. The first matching rule decides; no match denies.
#[derive(Debug, Clone, Default)]
pub struct StaticAcl {
    rules: Vec<AclRule>,
}

impl StaticAcl {
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: AclRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn decide(&self, role: &str, resource: &str, operation: &str) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.matches(role, resource, operation))
            .is_some_and(|rule| rule.allow)
    }
}

#[async_trait]
impl AccessControl for StaticAcl {
    async fn query(&self, role: &str, resource: &str, operation: &str) -> anyhow::Result<bool> {
        Ok(self.decide(role, resource, operation))
    }
}

/// Authorizes the current invocation.
///
/// With an adapter configured, the decision is memoized on the command
/// descriptor: the first check queries the adapter, later checks against the
/// same descriptor reuse the answer. Without an adapter, role lists apply,
/// taken from the call options first and `policy` second.
pub async fn check_access(
    ctx: &mut ExecutionContext,
    options: &Options,
    policy: &RolePolicy,
) -> Result<(), DispatchError> {
    match options.acl.clone() {
        Some(acl) => check_with_adapter(acl.as_ref(), ctx, options).await,
        None => check_role_lists(ctx, options, policy),
    }
}

async fn check_with_adapter(
    acl: &dyn AccessControl,
    ctx: &mut ExecutionContext,
    options: &Options,
) -> Result<(), DispatchError> {
    let role = options.role_for(ctx);
    let Some(descriptor) = ctx.command.as_ref() else {
        return Ok(());
    };
    match descriptor.access() {
        AccessState::Allowed => return Ok(()),
        AccessState::Denied => {
            return Err(DispatchError::AccessDenied {
                role,
                denied_by: DeniedBy::Acl {
                    command: Box::new(descriptor.clone()),
                },
            })
        }
        AccessState::Unchecked => {}
    }

    let (resource, operation) = descriptor.access_target(options.check_access_on_aliases);
    let (resource, operation) = (resource.to_string(), operation.to_string());
    let invocation_id = ctx.invocation_id;

    let allowed = acl
        .query(&role, &resource, &operation)
        .await
        .map_err(|error| {
            warn!(%invocation_id, %role, %resource, %operation, %error, "access control query failed");
            DispatchError::AccessControl(error)
        })?;

    let Some(descriptor) = ctx.command.as_mut() else {
        return Ok(());
    };
    descriptor.record_access(allowed);
    if allowed {
        debug!(%invocation_id, %role, %resource, %operation, "access granted");
        return Ok(());
    }

    warn!(%invocation_id, %role, %resource, %operation, "access denied");
    Err(DispatchError::AccessDenied {
        role,
        denied_by: DeniedBy::Acl {
            command: Box::new(descriptor.clone()),
        },
    })
}

fn check_role_lists(
    ctx: &ExecutionContext,
    options: &Options,
    policy: &RolePolicy,
) -> Result<(), DispatchError> {
    let effective = RolePolicy {
        allow_roles: options.allow_roles.clone(),
        deny_roles: options.deny_roles.clone(),
    }
    .or(policy);
    if effective.is_empty() {
        return Ok(());
    }

    let role = options.role_for(ctx);
    effective.evaluate(&role).map_err(|denied_by| {
        warn!(invocation_id = %ctx.invocation_id, %role, "access denied by role list");
        DispatchError::AccessDenied { role, denied_by }
    })
}

#[cfg(test)]
#[path = "tests/access_tests.rs"]
mod tests;
