use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::CommandPath,
    protocol::{CommandOutcome, CommandRequest, Params},
};
use tracing::{debug, info};

use crate::{
    context::ExecutionContext,
    descriptor::{AliasInfo, CommandDescriptor},
    error::DispatchError,
    group::{execute_group, HandlerGroup},
    options::{OptionLayer, Options},
};

/// Target of an alias: a concrete `namespace.operation` command plus fields
/// copied verbatim onto the resolved descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub command: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl AliasEntry {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

impl From<&str> for AliasEntry {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for AliasEntry {
    fn from(command: String) -> Self {
        Self::new(command)
    }
}

/// One entry of a bulk batch.
#[derive(Debug, Clone, Default)]
pub struct BulkCommand {
    pub command: String,
    pub params: Params,
    pub options: OptionLayer,
}

impl BulkCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_options(mut self, options: OptionLayer) -> Self {
        self.options = options;
        self
    }
}

impl TryFrom<CommandRequest> for BulkCommand {
    type Error = serde_json::Error;

    fn try_from(request: CommandRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            command: request.command,
            params: request.params.unwrap_or_default(),
            options: OptionLayer::from_map(request.options)?,
        })
    }
}

/// One slot per input command, in input order.
pub type BulkResults = Vec<Result<Value, DispatchError>>;

struct Route {
    descriptor: CommandDescriptor,
    group: Arc<dyn HandlerGroup>,
}

/// Routes `namespace.operation` commands to handler groups.
///
/// Registration happens up front through `&mut self`; dispatch only needs
/// `&self`, so a built dispatcher can be shared behind an `Arc`.
#[derive(Default)]
pub struct Dispatcher {
    groups: HashMap<String, Arc<dyn HandlerGroup>>,
    aliases: HashMap<String, AliasEntry>,
    options: OptionLayer,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher whose `options` are injected over every call's options.
    pub fn with_options(options: OptionLayer) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &OptionLayer {
        &self.options
    }

    pub fn add_group(&mut self, name: impl Into<String>, group: Arc<dyn HandlerGroup>) {
        let name = name.into();
        if self.groups.insert(name.clone(), group).is_some() {
            debug!(%name, "handler group replaced");
        }
    }

    /// Registers `group` under its own name.
    pub fn add_named_group(&mut self, group: Arc<dyn HandlerGroup>) {
        let name = group.name().to_string();
        self.add_group(name, group);
    }

    pub fn add_groups<I>(&mut self, groups: I)
    where
        I: IntoIterator<Item = Arc<dyn HandlerGroup>>,
    {
        for group in groups {
            self.add_named_group(group);
        }
    }

    pub fn extend_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = (S, Arc<dyn HandlerGroup>)>,
        S: Into<String>,
    {
        for (name, group) in groups {
            self.add_group(name, group);
        }
    }

    pub fn add_alias(&mut self, name: impl Into<String>, target: impl Into<AliasEntry>) {
        self.aliases.insert(name.into(), target.into());
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn alias(&self, name: &str) -> Option<&AliasEntry> {
        self.aliases.get(name)
    }

    pub fn parse_command_name(&self, command: &str) -> Result<CommandDescriptor, DispatchError> {
        self.route(command).map(|route| route.descriptor)
    }

    /// Resolves a registered alias to the descriptor of its target.
    pub fn handle_alias(&self, alias: &str) -> Result<CommandDescriptor, DispatchError> {
        self.alias_route(alias).map(|route| route.descriptor)
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        command: &str,
        params: Params,
        options: OptionLayer,
    ) -> Result<Value, DispatchError> {
        let route = if self.aliases.contains_key(command) {
            self.alias_route(command)?
        } else {
            self.route(command)?
        };
        self.run(ctx, route, params, &options).await
    }

    /// Runs every command independently and concurrently. A failing command
    /// fills its own slot; it never fails the batch or its siblings.
    pub async fn execute_bulk(
        &self,
        ctx: &ExecutionContext,
        commands: Vec<BulkCommand>,
        options: OptionLayer,
    ) -> BulkResults {
        self.run_batch(ctx, commands.into_iter().map(Ok).collect(), options)
            .await
    }

    /// Like [`Dispatcher::execute_bulk`] for raw requests. A request whose
    /// `options` do not parse fails its own slot with `INVALID_OPTIONS`.
    pub async fn execute_requests(
        &self,
        ctx: &ExecutionContext,
        requests: Vec<CommandRequest>,
        options: OptionLayer,
    ) -> BulkResults {
        let commands = requests
            .into_iter()
            .map(|request| {
                let command = request.command.clone();
                BulkCommand::try_from(request)
                    .map_err(|source| DispatchError::InvalidOptions { command, source })
            })
            .collect();
        self.run_batch(ctx, commands, options).await
    }

    /// Tags a result, rendering errors with the dispatcher's formatter.
    pub fn outcome(&self, result: Result<Value, DispatchError>) -> CommandOutcome {
        tag(result, &self.formatting_options())
    }

    pub fn outcomes(&self, results: BulkResults) -> Vec<CommandOutcome> {
        let options = self.formatting_options();
        results
            .into_iter()
            .map(|result| tag(result, &options))
            .collect()
    }

    fn formatting_options(&self) -> Options {
        Options::resolve([&self.options])
    }

    async fn run_batch(
        &self,
        ctx: &ExecutionContext,
        commands: Vec<Result<BulkCommand, DispatchError>>,
        options: OptionLayer,
    ) -> BulkResults {
        let mut batch_ctx = ctx.clone();
        batch_ctx.bulk = true;
        let batch_ctx = &batch_ctx;
        let batch_options = &options;

        let total = commands.len();
        let results = join_all(commands.into_iter().map(|cmd| async move {
            match cmd {
                Ok(cmd) => {
                    let layer = cmd.options.merged_over(batch_options);
                    self.execute(batch_ctx, &cmd.command, cmd.params, layer).await
                }
                Err(err) => Err(err),
            }
        }))
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total, failed, "bulk execution finished");
        results
    }

    fn route(&self, command: &str) -> Result<Route, DispatchError> {
        let Some(path) = CommandPath::split(command) else {
            return Err(DispatchError::InvalidCommandName {
                message: "Command name must be a string in format <controller>.<action>.".into(),
                details: None,
            });
        };
        let descriptor = CommandDescriptor::new(command, path);
        let Some(group) = self.groups.get(path.namespace) else {
            return Err(DispatchError::InvalidCommandName {
                message: format!("Not found handler for command {command}"),
                details: serde_json::to_value(&descriptor).ok(),
            });
        };
        Ok(Route {
            descriptor,
            group: Arc::clone(group),
        })
    }

    /// Alias targets resolve as plain commands, so aliases never chain.
    fn alias_route(&self, alias: &str) -> Result<Route, DispatchError> {
        let Some(entry) = self.aliases.get(alias) else {
            return Err(DispatchError::InvalidCommandName {
                message: format!("Not found handler for command {alias}"),
                details: None,
            });
        };
        let mut route = self.route(&entry.command)?;
        route.descriptor.original_command = alias.to_string();
        route.descriptor.alias = Some(AliasInfo {
            name: alias.to_string(),
            options: entry.options.clone(),
        });
        Ok(route)
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        route: Route,
        params: Params,
        call: &OptionLayer,
    ) -> Result<Value, DispatchError> {
        let Route { descriptor, group } = route;
        let layer = self.options.merged_over(call);
        let operation = descriptor.operation.clone();

        let mut ctx = ctx.fork();
        debug!(
            invocation_id = %ctx.invocation_id,
            command = %descriptor.original_command,
            namespace = %descriptor.namespace,
            operation = %operation,
            bulk = ctx.bulk,
            "dispatching command"
        );
        ctx.command = Some(descriptor);

        let result = execute_group(group.as_ref(), &mut ctx, &operation, params, &layer).await;
        if let Err(error) = &result {
            debug!(invocation_id = %ctx.invocation_id, code = error.code(), "command failed");
        }
        result
    }
}

fn tag(result: Result<Value, DispatchError>, options: &Options) -> CommandOutcome {
    match result {
        Ok(value) => CommandOutcome::Ok(value),
        Err(err) => CommandOutcome::Failed(options.format_error(&err)),
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
