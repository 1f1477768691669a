use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use super::*;
use crate::{
    access::{AccessControl, AclRule, StaticAcl},
    group::Group,
    handler::{factory, Handler},
    validation::{Constraints, FieldConstraint},
};
use async_trait::async_trait;
use serde_json::json;

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
struct SayBye;

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

/// Finishes after `delay` milliseconds, so bulk slots complete out of order.
#[derive(Default)]
struct Sleepy;

#[async_trait]
impl Handler for Sleepy {
    async fn process(
        &self,
        _ctx: &ExecutionContext,
        params: &Params,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        let delay = params.get("delay").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!(delay))
    }
}

/// Echoes the descriptor it ran under.
#[derive(Default)]
struct Describe;

#[async_trait]
impl Handler for Describe {
    async fn process(
        &self,
        ctx: &ExecutionContext,
        _params: &Params,
        _options: &Options,
    ) -> Result<Value, DispatchError> {
        let descriptor = ctx
            .descriptor()
            .ok_or_else(|| DispatchError::handler("NO_DESCRIPTOR", "descriptor missing"))?;
        Ok(json!({
            "command": descriptor.command,
            "original": descriptor.original_command,
            "alias": descriptor.alias,
            "bulk": ctx.bulk,
            "allowed": descriptor.is_allowed(),
        }))
    }
}

struct CountingAcl {
    inner: StaticAcl,
    calls: AtomicUsize,
}

#[async_trait]
impl AccessControl for CountingAcl {
    async fn query(&self, role: &str, resource: &str, operation: &str) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(role, resource, operation).await
    }
}

fn hello_group() -> Arc<dyn HandlerGroup> {
    Group::new("Hello")
        .with_handler_type::<SayHello>("sayHello")
        .with_handler_type::<SayBye>("sayBye")
        .with_handler_type::<Sleepy>("sleep")
        .with_handler("describe", factory::<Describe>())
        .into_shared()
}

fn dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_named_group(hello_group());
    dispatcher
}

fn admin() -> ExecutionContext {
    ExecutionContext::new(params(json!({ "user": { "role": "ADMIN" } })))
}

#[tokio::test]
async fn command_without_separator_is_invalid() {
    let err = dispatcher()
        .execute(&admin(), "Hello", Params::new(), OptionLayer::default())
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "INVALID_COMMAND_NAME");
    assert_eq!(
        err.message().as_deref(),
        Some("Command name must be a string in format <controller>.<action>.")
    );
}

#[tokio::test]
async fn unknown_namespace_is_invalid_command_name() {
    let err = dispatcher()
        .execute(&admin(), "command.with.Error", Params::new(), OptionLayer::default())
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "INVALID_COMMAND_NAME");
    let details = err.details().expect("details");
    assert_eq!(details["namespace"], json!("command"));
    assert_eq!(details["operation"], json!("with"));
}

#[tokio::test]
async fn unknown_operation_is_invalid_action_name() {
    let err = dispatcher()
        .execute(&admin(), "Hello.sayHi", Params::new(), OptionLayer::default())
        .await
        .expect_err("should fail");
    assert_eq!(err.code(), "INVALID_ACTION_NAME");
}

#[tokio::test]
async fn extra_segments_are_ignored() {
    let result = dispatcher()
        .execute(&admin(), "Hello.sayBye.now", Params::new(), OptionLayer::default())
        .await
        .expect("bye");
    assert_eq!(result, json!("Bye"));

    let descriptor = dispatcher()
        .parse_command_name("Hello.sayBye.now")
        .expect("descriptor");
    assert_eq!(descriptor.command, "Hello.sayBye.now");
    assert_eq!(descriptor.operation, "sayBye");
}

#[tokio::test]
async fn validation_runs_through_dispatch() {
    let dispatcher = dispatcher();
    let err = dispatcher
        .execute(&admin(), "Hello.sayHello", Params::new(), OptionLayer::default())
        .await
        .expect_err("missing userName");
    assert_eq!(err.code(), "INVALID_PARAMS");
    assert!(err.details().expect("details").get("userName").is_some());

    let result = dispatcher
        .execute(
            &admin(),
            "Hello.sayHello",
            params(json!({ "userName": "John Doe" })),
            OptionLayer::default(),
        )
        .await
        .expect("hello");
    assert_eq!(result, json!("Hello John Doe."));
}

#[tokio::test]
async fn alias_matches_direct_execution() {
    let mut dispatcher = dispatcher();
    dispatcher.add_alias("Greetings.show", "Hello.sayHello");
    let input = params(json!({ "userName": "John Doe" }));

    let direct = dispatcher
        .execute(&admin(), "Hello.sayHello", input.clone(), OptionLayer::default())
        .await
        .expect("direct");
    let aliased = dispatcher
        .execute(&admin(), "Greetings.show", input, OptionLayer::default())
        .await
        .expect("alias");
    assert_eq!(direct, aliased);
}

#[tokio::test]
async fn alias_stamps_name_and_options() {
    let mut dispatcher = dispatcher();
    dispatcher.add_alias(
        "Info.describe",
        AliasEntry::new("Hello.describe").with_option("audit", json!(true)),
    );

    let result = dispatcher
        .execute(&admin(), "Info.describe", Params::new(), OptionLayer::default())
        .await
        .expect("describe");
    assert_eq!(result["command"], json!("Hello.describe"));
    assert_eq!(result["original"], json!("Info.describe"));
    assert_eq!(result["alias"]["name"], json!("Info.describe"));
    assert_eq!(result["alias"]["options"]["audit"], json!(true));

    let descriptor = dispatcher.handle_alias("Info.describe").expect("alias");
    assert_eq!(descriptor.namespace, "Hello");
}

#[tokio::test]
async fn aliases_do_not_chain() {
    let mut dispatcher = dispatcher();
    dispatcher.add_alias("Greetings.show", "Hello.sayHello");
    dispatcher.add_alias("Welcome.show", "Greetings.show");

    let err = dispatcher
        .execute(&admin(), "Welcome.show", Params::new(), OptionLayer::default())
        .await
        .expect_err("chained alias");
    assert_eq!(err.code(), "INVALID_COMMAND_NAME");
}

#[tokio::test]
async fn acl_allows_and_denies_by_role() {
    let acl = StaticAcl::default()
        .with_rule(AclRule::allow("ADMIN", "Hello", "*"))
        .with_rule(AclRule::deny("GUEST", "Hello", "sayBye"));
    let mut dispatcher = Dispatcher::with_options(OptionLayer::default().with_acl(Arc::new(acl)));
    dispatcher.add_named_group(hello_group());

    let result = dispatcher
        .execute(&admin(), "Hello.sayBye", Params::new(), OptionLayer::default())
        .await
        .expect("admin allowed");
    assert_eq!(result, json!("Bye"));

    let err = dispatcher
        .execute(
            &ExecutionContext::with_role("GUEST"),
            "Hello.sayBye",
            Params::new(),
            OptionLayer::default(),
        )
        .await
        .expect_err("guest denied");
    assert_eq!(err.code(), "ACCESS_DENIED");
    let details = err.details().expect("details");
    assert_eq!(details["currentRole"], json!("GUEST"));
    assert_eq!(details["command"]["command"], json!("Hello.sayBye"));
    assert_eq!(details["command"]["access"], json!("denied"));
}

#[tokio::test]
async fn acl_is_queried_once_per_invocation() {
    let acl = Arc::new(CountingAcl {
        inner: StaticAcl::default().with_rule(AclRule::allow("*", "*", "*")),
        calls: AtomicUsize::new(0),
    });
    let mut dispatcher = Dispatcher::with_options(OptionLayer::default().with_acl(acl.clone()));
    dispatcher.add_named_group(hello_group());

    let result = dispatcher
        .execute(&admin(), "Hello.describe", Params::new(), OptionLayer::default())
        .await
        .expect("describe");
    assert_eq!(result["allowed"], json!(true));
    assert_eq!(acl.calls.load(Ordering::SeqCst), 1, "group and handler share one decision");

    dispatcher
        .execute(&admin(), "Hello.describe", Params::new(), OptionLayer::default())
        .await
        .expect("describe again");
    assert_eq!(acl.calls.load(Ordering::SeqCst), 2, "each invocation gets its own descriptor");
}

#[tokio::test]
async fn access_on_aliases_checks_public_name() {
    let acl = StaticAcl::default()
        .with_rule(AclRule::allow("GUEST", "Greetings", "show"))
        .with_rule(AclRule::deny("GUEST", "Hello", "*"));
    let guest = ExecutionContext::with_role("GUEST");
    let input = params(json!({ "userName": "Jane" }));

    let mut plain = Dispatcher::with_options(OptionLayer::default().with_acl(Arc::new(acl.clone())));
    plain.add_named_group(hello_group());
    plain.add_alias("Greetings.show", "Hello.sayHello");
    let err = plain
        .execute(&guest, "Greetings.show", input.clone(), OptionLayer::default())
        .await
        .expect_err("target path denied");
    assert_eq!(err.code(), "ACCESS_DENIED");

    let mut on_aliases = Dispatcher::with_options(
        OptionLayer::default()
            .with_acl(Arc::new(acl))
            .check_access_on_aliases(true),
    );
    on_aliases.add_named_group(hello_group());
    on_aliases.add_alias("Greetings.show", "Hello.sayHello");
    let result = on_aliases
        .execute(&guest, "Greetings.show", input.clone(), OptionLayer::default())
        .await
        .expect("alias path allowed");
    assert_eq!(result, json!("Hello Jane."));

    on_aliases
        .execute(&guest, "Hello.sayHello", input, OptionLayer::default())
        .await
        .expect_err("direct path still denied");
}

#[tokio::test]
async fn bulk_isolates_failures_and_keeps_order() {
    let commands = vec![
        BulkCommand::new("Hello.sayHello").with_params(params(json!({ "userName": "John Doe" }))),
        BulkCommand::new("command.with.Error"),
        BulkCommand::new("Hello.sayBye"),
    ];

    let results = dispatcher()
        .execute_bulk(&admin(), commands, OptionLayer::default())
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().expect("hello"), &json!("Hello John Doe."));
    assert_eq!(
        results[1].as_ref().expect_err("bad command").code(),
        "INVALID_COMMAND_NAME"
    );
    assert_eq!(results[2].as_ref().expect("bye"), &json!("Bye"));
}

#[tokio::test]
async fn bulk_order_follows_input_not_completion() {
    let commands = [30, 0, 15]
        .into_iter()
        .map(|delay| BulkCommand::new("Hello.sleep").with_params(params(json!({ "delay": delay }))))
        .collect();

    let results = dispatcher()
        .execute_bulk(&admin(), commands, OptionLayer::default())
        .await;
    let values: Vec<_> = results
        .into_iter()
        .map(|r| r.expect("sleep"))
        .collect();
    assert_eq!(values, vec![json!(30), json!(0), json!(15)]);
}

#[tokio::test]
async fn bulk_marks_context_and_merges_options() {
    let commands = vec![
        BulkCommand::new("Hello.describe"),
        BulkCommand::new("Hello.describe")
            .with_options(OptionLayer::default().allow_roles(["ADMIN"])),
    ];
    let batch = OptionLayer::default().allow_roles(["NOBODY"]);

    let results = dispatcher()
        .execute_bulk(&admin(), commands, batch)
        .await;
    assert_eq!(
        results[0].as_ref().expect_err("batch options deny").code(),
        "ACCESS_DENIED"
    );
    assert_eq!(results[1].as_ref().expect("per-command override")["bulk"], json!(true));
}

#[tokio::test]
async fn outcomes_are_tagged_and_formatted() {
    let dispatcher = dispatcher();
    let results = dispatcher
        .execute_bulk(
            &admin(),
            vec![BulkCommand::new("Hello.sayBye"), BulkCommand::new("nope")],
            OptionLayer::default(),
        )
        .await;
    let outcomes = dispatcher.outcomes(results);
    assert_eq!(outcomes[0], CommandOutcome::Ok(json!("Bye")));
    match &outcomes[1] {
        CommandOutcome::Failed(payload) => {
            assert_eq!(payload["error"]["code"], json!("INVALID_COMMAND_NAME"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn outcomes_use_the_dispatcher_formatter_for_every_slot() {
    let formatter = |code: &str, _message: Option<&str>, _details: Option<Value>| {
        json!({ "failed": code })
    };
    let mut dispatcher =
        Dispatcher::with_options(OptionLayer::default().with_error_formatter(Arc::new(formatter)));
    dispatcher.add_named_group(hello_group());

    let results = dispatcher
        .execute_bulk(
            &admin(),
            vec![
                BulkCommand::new("nope"),
                BulkCommand::new("Hello.sayBye"),
                BulkCommand::new("Hello.missing"),
            ],
            OptionLayer::default(),
        )
        .await;
    assert_eq!(
        dispatcher.outcomes(results),
        vec![
            CommandOutcome::Failed(json!({ "failed": "INVALID_COMMAND_NAME" })),
            CommandOutcome::Ok(json!("Bye")),
            CommandOutcome::Failed(json!({ "failed": "INVALID_ACTION_NAME" })),
        ]
    );
}

#[tokio::test]
async fn request_with_bad_options_fails_only_its_slot() {
    let requests = vec![
        CommandRequest::new("Hello.sayBye"),
        CommandRequest {
            command: "Hello.sayBye".into(),
            params: None,
            options: params(json!({ "allowRoles": "ADMIN" })),
        },
        CommandRequest::new("Hello.sayHello").with_params(params(json!({ "userName": "John" }))),
    ];

    let results = dispatcher()
        .execute_requests(&admin(), requests, OptionLayer::default())
        .await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().expect("bye"), &json!("Bye"));
    let err = results[1].as_ref().expect_err("bad options");
    assert_eq!(err.code(), "INVALID_OPTIONS");
    assert_eq!(err.details(), Some(json!({ "command": "Hello.sayBye" })));
    assert!(results[2].is_ok());
}

#[tokio::test]
async fn registration_forms_converge_and_last_wins() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_group("Greeter", hello_group());
    dispatcher.add_groups([Group::new("Admin").into_shared()]);
    dispatcher.extend_groups([("Ops", Group::new("Operations").into_shared())]);
    assert!(dispatcher.has_group("Greeter"));
    assert!(dispatcher.has_group("Admin"));
    assert!(dispatcher.has_group("Ops"));
    assert!(!dispatcher.has_group("Operations"));

    dispatcher
        .execute(&admin(), "Greeter.sayBye", Params::new(), OptionLayer::default())
        .await
        .expect("registered under the given name");

    dispatcher.add_group("Greeter", Group::new("Empty").into_shared());
    let err = dispatcher
        .execute(&admin(), "Greeter.sayBye", Params::new(), OptionLayer::default())
        .await
        .expect_err("replacement group has no handlers");
    assert_eq!(err.code(), "INVALID_ACTION_NAME");
}

#[test]
fn bulk_command_reads_request_options() {
    let request = shared::protocol::CommandRequest {
        command: "Hello.sayBye".into(),
        params: None,
        options: params(json!({ "defaultRole": "GUEST", "traceId": "t-1" })),
    };
    let command = BulkCommand::try_from(request).expect("command");
    assert!(command.params.is_empty());
    assert_eq!(command.options.default_role.as_deref(), Some("GUEST"));
    assert_eq!(command.options.extra["traceId"], json!("t-1"));
}
