//! Meridian - declarative authorization for hierarchical document stores
//!
//! Client operations (`get`, `list`, `create`, `update`, `delete`) against
//! document paths are checked against a compiled, path-scoped rule set and
//! resolve to a single allow/deny [`Decision`]. Rule files are KDL: nested
//! `match` blocks with wildcard path patterns guard each operation with a
//! boolean expression over the request's auth context, its proposed data,
//! the document's prior state, and reads of other documents.
//!
//! The default posture is deny: a request is allowed only when some
//! matching rule's guard evaluates to `true`, and any guard that fails to
//! evaluate counts as `false`.

pub mod compile;
pub mod engine;
pub mod errors;
pub mod eval;
pub mod expr;
pub mod path;
pub mod ruleset;
pub mod value;

pub use compile::compile;
pub use engine::{
    decide, decide_cancellable, AccessRequest, AuthContext, Decision, RulesEngine,
};
pub use errors::{CompileError, EvalError, ReadError};
pub use eval::{CancelFlag, DocumentReader, StaticDocuments};
pub use path::{Bindings, DocumentPath, PathPattern};
pub use ruleset::{OperationKind, RuleSet};
pub use value::Value;
