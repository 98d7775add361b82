use miette::Diagnostic;
use thiserror::Error;

/// Rule-set compilation failure. The only error surfaced to an operator:
/// a failed compile (or reload) leaves the previously active rule set in place.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(meridian::compile::kdl_parse),
        help("Check your rule file syntax — see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("Invalid rule structure: {0}")]
    #[diagnostic(
        code(meridian::compile::invalid_rule),
        help("A rule file contains `match \"/pattern\"` blocks whose children are `allow` nodes and nested `match` blocks")
    )]
    InvalidRule(String),

    #[error("Invalid path pattern `{pattern}`: {reason}")]
    #[diagnostic(
        code(meridian::compile::invalid_pattern),
        help("Segments are literals, `{{name}}` wildcards, or a final `{{name=**}}` recursive wildcard")
    )]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown operation `{0}`")]
    #[diagnostic(
        code(meridian::compile::unknown_operation),
        help("Operations: get, list, create, update, delete, read (= get + list), write (= create + update + delete)")
    )]
    UnknownOperation(String),

    #[error("Invalid guard expression: {0}")]
    #[diagnostic(
        code(meridian::compile::invalid_expression),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, +, in, is. Paths use dot notation (e.g. request.auth.uid)")
    )]
    InvalidExpression(String),

    #[error("Unknown function `{0}`")]
    #[diagnostic(
        code(meridian::compile::unknown_function),
        help("Built-in functions: exists(path), get(path), size(x). No other calls are permitted in guards")
    )]
    UnknownFunction(String),

    #[error("Unknown type name `{0}` in `is` test")]
    #[diagnostic(
        code(meridian::compile::unknown_type_name),
        help("Type names: null, bool, int, float, number, string, list, map, timestamp")
    )]
    UnknownTypeName(String),

    #[error("Guard references `{name}`, which pattern `{pattern}` does not bind")]
    #[diagnostic(
        code(meridian::compile::unknown_variable),
        help("Guards may reference `request`, `resource`, and the wildcard names bound by their own path pattern")
    )]
    UnknownVariable { name: String, pattern: String },

    #[error("Binding `{name}` declared more than once in pattern `{pattern}`")]
    #[diagnostic(
        code(meridian::compile::duplicate_binding),
        help("Each wildcard in a pattern (including segments inherited from parent blocks) must bind a distinct name")
    )]
    DuplicateBinding { name: String, pattern: String },
}

/// Guard evaluation failure. Never escapes a decision: every variant is
/// downgraded to `false` for the failing guard (deny-on-error) and recorded
/// as a contributing reason inside the `Decision`.
#[derive(Debug, Error, Diagnostic)]
pub enum EvalError {
    #[error("undefined reference `{0}`")]
    #[diagnostic(code(meridian::eval::undefined))]
    Undefined(String),

    #[error("type mismatch: {0}")]
    #[diagnostic(code(meridian::eval::type_mismatch))]
    TypeMismatch(String),

    #[error("document read failed for `{path}`: {message}")]
    #[diagnostic(code(meridian::eval::read_failed))]
    ReadFailed { path: String, message: String },

    #[error("evaluation step budget exceeded")]
    #[diagnostic(code(meridian::eval::step_budget))]
    StepBudgetExceeded,

    #[error("evaluation cancelled")]
    #[diagnostic(code(meridian::eval::cancelled))]
    Cancelled,
}

/// Failure reported by the storage collaborator's document reader.
/// `Clone` so one failed read is served from the per-decision cache on
/// repeat lookups instead of being retried.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ReadError(pub String);
