pub mod access;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod group;
pub mod handler;
pub mod options;
pub mod validation;

pub use access::{check_access, AccessControl, AclRule, RolePolicy, StaticAcl};
pub use context::ExecutionContext;
pub use descriptor::{AccessState, AliasInfo, CommandDescriptor, Resolution};
pub use dispatcher::{AliasEntry, BulkCommand, BulkResults, Dispatcher};
pub use error::{DeniedBy, DispatchError};
pub use group::{execute_group, handler_instance, Group, HandlerGroup, HandlerTable};
pub use handler::{execute_handler, factory, Handler, HandlerFactory};
pub use options::{DefaultErrorFormatter, ErrorFormatter, OptionLayer, Options, RoleLookup};
pub use shared::protocol::Params;
pub use validation::{ConstraintValidator, Constraints, FieldConstraint, Validator, Violation};
