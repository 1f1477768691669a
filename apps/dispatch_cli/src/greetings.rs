use std::sync::Arc;

use async_trait::async_trait;
use dispatch::{
    Constraints, DispatchError, ExecutionContext, FieldConstraint, Group, Handler, HandlerGroup,
    Options, Params,
};
use serde_json::{json, Value};

const ADMIN_ROLE: &str = "ADMIN";

#[derive(Default)]
pub struct SayHello;

#[async_trait]
impl Handler for SayHello {
    fn constraints(&self) -> Option<Constraints> {
        Some(Constraints::new().field("userName", FieldConstraint::required()))
    }

    async fn process(
        &self,
        ctx: &ExecutionContext,
        params: &Params,
        options: &Options,
    ) -> Result<Value, DispatchError> {
        let name = params
            .get("userName")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut message = format!("Hello {name}.");
        if options.role_for(ctx) == ADMIN_ROLE {
            message.push_str(" You have administrator rights.");
        }
        Ok(Value::String(message))
    }
}

#[derive(Default)]
pub struct SayBye;

#[async_trait]
impl Handler for SayBye {
    async fn process(
        &self,
        _ctx: &ExecutionContext,
        _params: &Params,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        Ok(json!("Bye"))
    }
}

pub fn hello_group() -> Arc<dyn HandlerGroup> {
    Group::new("Hello")
        .with_handler_type::<SayHello>("sayHello")
        .with_handler_type::<SayBye>("sayBye")
        .into_shared()
}
