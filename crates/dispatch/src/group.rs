use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::Params;
use tracing::debug;

use crate::{
    access::{check_access, RolePolicy},
    context::ExecutionContext,
    descriptor::Resolution,
    error::DispatchError,
    handler::{execute_handler, factory, Handler, HandlerFactory},
    options::{OptionLayer, Options},
};

/// Name to handler-factory table. Re-adding a name replaces the old entry.
#[derive(Clone, Default)]
pub struct HandlerTable {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, factory: HandlerFactory) -> Option<HandlerFactory> {
        self.factories.insert(name.into(), factory)
    }

    pub fn add_type<H>(&mut self, name: impl Into<String>) -> Option<HandlerFactory>
    where
        H: Handler + Default + 'static,
    {
        self.add(name, factory::<H>())
    }

    pub fn get(&self, name: &str) -> Option<&HandlerFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// A named set of handlers with hooks around every handler it runs.
#[async_trait]
pub trait HandlerGroup: Send + Sync {
    fn name(&self) -> &str;

    fn handlers(&self) -> &HandlerTable;

    /// Group-level options, merged under call-site options.
    fn options(&self) -> OptionLayer {
        OptionLayer::default()
    }

    /// Role lists checked at group level and inherited by handlers that
    /// declare none of their own.
    fn role_policy(&self) -> RolePolicy {
        RolePolicy::default()
    }

    async fn before(
        &self,
        _ctx: &mut ExecutionContext,
        handler: Box<dyn Handler>,
    ) -> Result<Box<dyn Handler>, DispatchError> {
        Ok(handler)
    }

    async fn process(
        &self,
        ctx: &mut ExecutionContext,
        handler: &dyn Handler,
        params: Params,
        options: &Options,
    ) -> Result<Value, DispatchError> {
        execute_handler(handler, ctx, params, options).await
    }

    async fn after(&self, _ctx: &mut ExecutionContext, result: Value) -> Result<Value, DispatchError> {
        Ok(result)
    }
}

/// Table-backed group for the common case where only the handler set,
/// options and role lists differ.
#[derive(Clone)]
pub struct Group {
    name: String,
    handlers: HandlerTable,
    options: OptionLayer,
    policy: RolePolicy,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HandlerTable::new(),
            options: OptionLayer::default(),
            policy: RolePolicy::default(),
        }
    }

    pub fn add_handler(&mut self, name: impl Into<String>, factory: HandlerFactory) {
        self.handlers.add(name, factory);
    }

    pub fn with_handler(mut self, name: impl Into<String>, factory: HandlerFactory) -> Self {
        self.add_handler(name, factory);
        self
    }

    pub fn with_handler_type<H>(mut self, name: impl Into<String>) -> Self
    where
        H: Handler + Default + 'static,
    {
        self.handlers.add_type::<H>(name);
        self
    }

    pub fn with_options(mut self, options: OptionLayer) -> Self {
        self.options = options;
        self
    }

    pub fn with_role_policy(mut self, policy: RolePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn into_shared(self) -> Arc<dyn HandlerGroup> {
        Arc::new(self)
    }
}

impl HandlerGroup for Group {
    fn name(&self) -> &str {
        &self.name
    }

    fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    fn options(&self) -> OptionLayer {
        self.options.clone()
    }

    fn role_policy(&self) -> RolePolicy {
        self.policy.clone()
    }
}

pub fn handler_factory(
    group: &dyn HandlerGroup,
    name: &str,
) -> Result<HandlerFactory, DispatchError> {
    group
        .handlers()
        .get(name)
        .cloned()
        .ok_or_else(|| DispatchError::InvalidActionName {
            action_name: name.to_string(),
        })
}

/// Builds the handler registered as `name` along with its options snapshot,
/// and records the resolution on the context's descriptor.
pub fn handler_instance(
    group: &dyn HandlerGroup,
    ctx: &mut ExecutionContext,
    name: &str,
    call: &OptionLayer,
) -> Result<(Box<dyn Handler>, Options), DispatchError> {
    let factory = handler_factory(group, name)?;
    let group_layer = group.options();
    let mut options = Options::resolve([&group_layer, call]);
    options.group_policy = group.role_policy();

    let handler = factory();
    if let Some(descriptor) = ctx.command.as_mut() {
        descriptor.resolution = Some(Resolution {
            group_name: group.name().to_string(),
            handler_name: name.to_string(),
            handler_type: handler.type_name(),
        });
    }
    Ok((handler, options))
}

/// Runs the handler registered as `handler_name` through the group's hooks:
/// `before`, group-level authorization, `process`, `after`.
pub async fn execute_group(
    group: &dyn HandlerGroup,
    ctx: &mut ExecutionContext,
    handler_name: &str,
    params: Params,
    call: &OptionLayer,
) -> Result<Value, DispatchError> {
    let (handler, options) = handler_instance(group, ctx, handler_name, call)?;
    debug!(
        invocation_id = %ctx.invocation_id,
        group = group.name(),
        handler = handler_name,
        "handler resolved"
    );
    let handler = group.before(ctx, handler).await?;
    check_access(ctx, &options, &group.role_policy()).await?;
    let result = group.process(ctx, handler.as_ref(), params, &options).await?;
    group.after(ctx, result).await
}

#[cfg(test)]
#[path = "tests/group_tests.rs"]
mod tests;
