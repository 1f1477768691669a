use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use super::*;
use crate::{
    access::{AccessControl, StaticAcl},
    options::OptionLayer,
    validation::FieldConstraint,
};
use serde_json::json;
use shared::domain::ValidatorFormat;

fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => panic!("object expected"),
    }
}

#[derive(Default)]
struct SayHello;

#[async_trait]
impl Handler for SayHello {
    fn constraints(&self) -> Option<Constraints> {
        Some(Constraints::new().field("userName", FieldConstraint::required()))
    }

    async fn process(
        &self,
        _ctx: &ExecutionContext,
        params: &Params,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        let name = params
            .get("userName")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!(format!("Hello {name}.")))
    }
}

#[derive(Default)]
struct Noop;

impl Handler for Noop {}

/// Records the order in which hooks run.
#[derive(Default)]
struct Traced {
    log: Arc<Mutex<Vec<&'static str>>>,
    fail_in_process: bool,
}

#[async_trait]
impl Handler for Traced {
    async fn before(
        &self,
        _ctx: &mut ExecutionContext,
        params: &mut Params,
        _options: &Options,
    ) -> Result<(), DispatchError> {
        self.log.lock().expect("lock").push("before");
        params.insert("loaded".into(), json!(true));
        Ok(())
    }

    async fn process(
        &self,
        _ctx: &ExecutionContext,
        params: &Params,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        self.log.lock().expect("lock").push("process");
        if self.fail_in_process {
            return Err(DispatchError::handler("NOT_FOUND", "entity missing"));
        }
        Ok(json!({ "loaded": params["loaded"] }))
    }

    async fn after(
        &self,
        _ctx: &ExecutionContext,
        mut result: Value,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        self.log.lock().expect("lock").push("after");
        result["shaped"] = json!(true);
        Ok(result)
    }
}

struct CountingValidator(AtomicUsize);

#[async_trait]
impl crate::validation::Validator for CountingValidator {
    async fn validate(
        &self,
        _params: &Params,
        _constraints: &Constraints,
    ) -> Result<(), Vec<crate::validation::Violation>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn handler_without_constraints_always_validates() {
    let mut ctx = ExecutionContext::default();
    let result = execute_handler(&Noop, &mut ctx, Params::new(), &Options::default())
        .await
        .expect("noop");
    assert_eq!(result, json!(true));

    let result = execute_handler(&Noop, &mut ctx, params(json!({ "junk": [1, 2] })), &Options::default())
        .await
        .expect("noop with junk");
    assert_eq!(result, json!(true));
}

#[tokio::test]
async fn missing_required_param_is_rejected() {
    let mut ctx = ExecutionContext::default();
    let err = execute_handler(&SayHello, &mut ctx, Params::new(), &Options::default())
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "INVALID_PARAMS");
    assert_eq!(
        err.payload().error.details,
        Some(json!({ "userName": "User name can't be blank" }))
    );
    assert_eq!(err.message().as_deref(), Some("Please send valid parameters."));
}

#[tokio::test]
async fn present_param_reaches_process() {
    let mut ctx = ExecutionContext::default();
    let result = execute_handler(
        &SayHello,
        &mut ctx,
        params(json!({ "userName": "John Doe" })),
        &Options::default(),
    )
    .await
    .expect("hello");
    assert_eq!(result, json!("Hello John Doe."));
}

#[tokio::test]
async fn validator_format_shapes_details() {
    let options = Options::resolve([&OptionLayer::default().with_validator_format(ValidatorFormat::Flat)]);
    let mut ctx = ExecutionContext::default();
    let err = execute_handler(&SayHello, &mut ctx, Params::new(), &options)
        .await
        .expect_err("should fail");
    assert_eq!(err.details(), Some(json!(["User name can't be blank"])));
}

#[tokio::test]
async fn configured_validator_is_used() {
    let validator = Arc::new(CountingValidator(AtomicUsize::new(0)));
    let options = Options::resolve([&OptionLayer::default().with_validator(validator.clone())]);
    let mut ctx = ExecutionContext::default();
    execute_handler(&SayHello, &mut ctx, Params::new(), &options)
        .await
        .expect("custom validator accepts everything");
    assert_eq!(validator.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hooks_run_in_order_and_shape_output() {
    let handler = Traced::default();
    let mut ctx = ExecutionContext::default();
    let result = execute_handler(&handler, &mut ctx, Params::new(), &Options::default())
        .await
        .expect("traced");
    assert_eq!(result, json!({ "loaded": true, "shaped": true }));
    assert_eq!(*handler.log.lock().expect("lock"), vec!["before", "process", "after"]);
}

#[tokio::test]
async fn process_failure_skips_after() {
    let handler = Traced {
        fail_in_process: true,
        ..Traced::default()
    };
    let mut ctx = ExecutionContext::default();
    let err = execute_handler(&handler, &mut ctx, Params::new(), &Options::default())
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(*handler.log.lock().expect("lock"), vec!["before", "process"]);
}

#[derive(Default)]
struct AdminOnly;

#[async_trait]
impl Handler for AdminOnly {
    fn role_policy(&self) -> RolePolicy {
        RolePolicy::allow(["ADMIN"])
    }
}

#[tokio::test]
async fn handler_role_list_reads_user_role() {
    let mut admin = ExecutionContext::new(params(json!({ "user": { "role": "ADMIN" } })));
    execute_handler(&AdminOnly, &mut admin, Params::new(), &Options::default())
        .await
        .expect("admin allowed");

    let mut guest = ExecutionContext::default();
    let err = execute_handler(&AdminOnly, &mut guest, Params::new(), &Options::default())
        .await
        .expect_err("unauthorized denied");
    assert_eq!(
        err.details(),
        Some(json!({ "currentRole": "UNAUTHORIZED", "allowRoles": ["ADMIN"] }))
    );
}

#[tokio::test]
async fn standalone_handler_skips_adapter_without_descriptor() {
    let acl: Arc<dyn AccessControl> = Arc::new(StaticAcl::default());
    let options = Options::resolve([&OptionLayer::default().with_acl(acl)]);
    let mut ctx = ExecutionContext::with_role("GUEST");
    let result = execute_handler(&Noop, &mut ctx, Params::new(), &options)
        .await
        .expect("no descriptor means no adapter check");
    assert_eq!(result, json!(true));
}

/// Echoes the role and locale it sees through the resolved options.
#[derive(Default)]
struct Greeter;

#[async_trait]
impl Handler for Greeter {
    async fn process(
        &self,
        ctx: &ExecutionContext,
        _params: &Params,
        options: &Options,
    ) -> Result<Value, DispatchError> {
        Ok(json!({
            "role": options.role_for(ctx),
            "locale": options.extra.get("locale").cloned().unwrap_or(Value::Null),
        }))
    }
}

#[tokio::test]
async fn hooks_see_default_role_and_extra_fields() {
    let group = OptionLayer::default()
        .with_default_role("ADMIN")
        .with_extra("locale", json!("en"));
    let call = OptionLayer::default().with_extra("locale", json!("fr"));
    let options = Options::resolve([&group, &call]);

    let mut anonymous = ExecutionContext::default();
    let result = execute_handler(&Greeter, &mut anonymous, Params::new(), &options)
        .await
        .expect("greeter");
    assert_eq!(result, json!({ "role": "ADMIN", "locale": "fr" }));

    let mut guest = ExecutionContext::with_role("GUEST");
    let result = execute_handler(&Greeter, &mut guest, Params::new(), &options)
        .await
        .expect("greeter");
    assert_eq!(result["role"], json!("GUEST"));
}

#[test]
fn type_name_names_the_concrete_handler() {
    let handler: Box<dyn Handler> = factory::<SayHello>()();
    assert!(handler.type_name().ends_with("SayHello"));
}
