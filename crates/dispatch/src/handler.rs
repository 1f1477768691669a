use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::Params;
use tracing::debug;

use crate::{
    access::{check_access, RolePolicy},
    context::ExecutionContext,
    error::DispatchError,
    options::Options,
    validation::{format_violations, Constraints},
};

/// Business logic for one operation.
///
/// Every hook has a default; a useful handler overrides at least
/// [`Handler::process`]. Hooks run through [`execute_handler`].
#[async_trait]
pub trait Handler: Send + Sync {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Parameter constraints. `None` skips validation.
    fn constraints(&self) -> Option<Constraints> {
        None
    }

    /// Role lists used when no access-control adapter is configured.
    fn role_policy(&self) -> RolePolicy {
        RolePolicy::default()
    }

    async fn before(
        &self,
        _ctx: &mut ExecutionContext,
        _params: &mut Params,
        _options: &Options,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    /// `options` is the snapshot the pipeline authorized with; use
    /// [`Options::role_for`] to see the same role.
    async fn process(
        &self,
        _ctx: &ExecutionContext,
        _params: &Params,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        Ok(Value::Bool(true))
    }

    async fn after(
        &self,
        _ctx: &ExecutionContext,
        result: Value,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        Ok(result)
    }
}

/// Builds a fresh handler for each invocation.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

pub fn factory<H>() -> HandlerFactory
where
    H: Handler + Default + 'static,
{
    Arc::new(|| Box::new(H::default()) as Box<dyn Handler>)
}

/// Runs `before`, validation, authorization, `process` and `after` in order.
/// The first failing stage ends the run with its error.
pub async fn execute_handler(
    handler: &dyn Handler,
    ctx: &mut ExecutionContext,
    mut params: Params,
    options: &Options,
) -> Result<Value, DispatchError> {
    handler.before(ctx, &mut params, options).await?;
    validate_params(handler, &params, options).await?;

    let policy = handler.role_policy().or(&options.group_policy);
    check_access(ctx, options, &policy).await?;

    debug!(
        invocation_id = %ctx.invocation_id,
        handler = handler.type_name(),
        "processing"
    );
    let result = handler.process(ctx, &params, options).await?;
    handler.after(ctx, result, options).await
}

async fn validate_params(
    handler: &dyn Handler,
    params: &Params,
    options: &Options,
) -> Result<(), DispatchError> {
    let Some(constraints) = handler.constraints() else {
        return Ok(());
    };
    options
        .validator
        .validate(params, &constraints)
        .await
        .map_err(|violations| DispatchError::InvalidParams {
            details: format_violations(&violations, options.validator_format),
        })
}

#[cfg(test)]
#[path = "tests/handler_tests.rs"]
mod tests;
