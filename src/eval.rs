//! Tree-walking guard evaluation.
//!
//! Evaluation is pure except for the `get`/`exists` built-ins, which read
//! other documents through the caller-supplied [`DocumentReader`]. Reads
//! are cached per decision, so repeated lookups of one path see a single
//! snapshot and the proposed write is never visible to them. Every node
//! visit costs one step against a fixed budget, so any rule text, however
//! crafted, terminates.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{EvalError, ReadError};
use crate::expr::{BinOp, Builtin, Expr, LitValue};
use crate::path::{Bindings, DocumentPath};
use crate::value::Value;

/// Upper bound on AST node visits per guard evaluation.
pub const MAX_EVAL_STEPS: u32 = 10_000;

/// Upper bound on evaluation nesting, so a deep expression tree cannot
/// overflow the stack before the step budget trips.
pub const MAX_EVAL_DEPTH: u32 = 128;

/// Read-only document access supplied by the storage collaborator.
/// The engine never retries a failed read; the failure becomes a
/// deny-on-error for the guard that issued it.
pub trait DocumentReader {
    fn read(&self, path: &DocumentPath) -> Result<Option<Value>, ReadError>;
}

/// Fixed in-memory document set. Intended for tests and harnesses standing
/// in for the real storage collaborator.
#[derive(Debug, Clone, Default)]
pub struct StaticDocuments {
    docs: HashMap<String, Value>,
}

impl StaticDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics on a malformed path so a fixture typo fails loudly instead
    /// of producing a mysteriously absent document.
    pub fn insert(&mut self, path: &str, data: impl Into<Value>) -> &mut Self {
        let parsed = match DocumentPath::parse(path) {
            Some(parsed) => parsed,
            None => panic!("invalid document path `{path}` in fixture"),
        };
        self.docs.insert(parsed.to_string(), data.into());
        self
    }
}

impl DocumentReader for StaticDocuments {
    fn read(&self, path: &DocumentPath) -> Result<Option<Value>, ReadError> {
        Ok(self.docs.get(&path.to_string()).cloned())
    }
}

/// Cooperative cancellation handle. Checked between evaluator steps; once
/// set, evaluation stops with [`EvalError::Cancelled`] and no further
/// document reads are issued.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// State shared by every guard evaluation within one decision: the reader,
/// the per-decision read cache, the step counter, and the lazily fetched
/// prior state of the target document.
pub struct DecisionContext<'a> {
    reader: &'a dyn DocumentReader,
    target: &'a DocumentPath,
    cancel: Option<&'a CancelFlag>,
    steps: Cell<u32>,
    depth: Cell<u32>,
    read_cache: RefCell<HashMap<String, Result<Option<Value>, ReadError>>>,
    resource: RefCell<Option<Value>>,
}

impl<'a> DecisionContext<'a> {
    pub fn new(
        reader: &'a dyn DocumentReader,
        target: &'a DocumentPath,
        cancel: Option<&'a CancelFlag>,
    ) -> Self {
        Self {
            reader,
            target,
            cancel,
            steps: Cell::new(0),
            depth: Cell::new(0),
            read_cache: RefCell::new(HashMap::new()),
            resource: RefCell::new(None),
        }
    }

    fn enter(&self) -> Result<(), EvalError> {
        if let Some(flag) = self.cancel {
            if flag.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
        }
        let used = self.steps.get() + 1;
        if used > MAX_EVAL_STEPS {
            return Err(EvalError::StepBudgetExceeded);
        }
        self.steps.set(used);
        let depth = self.depth.get() + 1;
        if depth > MAX_EVAL_DEPTH {
            return Err(EvalError::StepBudgetExceeded);
        }
        self.depth.set(depth);
        Ok(())
    }

    fn exit(&self) {
        self.depth.set(self.depth.get() - 1);
    }

    /// Read through the per-decision cache: one snapshot per path per
    /// decision, failures included.
    fn read_cached(&self, path: &DocumentPath) -> Result<Option<Value>, EvalError> {
        let key = path.to_string();
        let cached = self.read_cache.borrow().get(&key).cloned();
        let result = match cached {
            Some(result) => result,
            None => {
                let result = self.reader.read(path);
                self.read_cache
                    .borrow_mut()
                    .insert(key.clone(), result.clone());
                result
            }
        };
        result.map_err(|err| EvalError::ReadFailed {
            path: key,
            message: err.to_string(),
        })
    }

    /// Prior state of the target document as the `resource` variable:
    /// `{ data, id }` when the document exists, `Null` otherwise (so
    /// `resource.data` on a create is an undefined reference).
    fn resource_value(&self) -> Result<Value, EvalError> {
        if let Some(cached) = self.resource.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let value = match self.read_cached(self.target)? {
            Some(data) => {
                let mut map = BTreeMap::new();
                map.insert("data".to_string(), data);
                map.insert("id".to_string(), Value::Str(self.target.id().to_string()));
                Value::Map(map)
            }
            None => Value::Null,
        };
        *self.resource.borrow_mut() = Some(value.clone());
        Ok(value)
    }
}

/// Per-match evaluation environment: the `request` value, this match's
/// wildcard bindings, and the decision-wide context. Built fresh for each
/// candidate rule and discarded with the decision.
pub struct Environment<'a> {
    request: Value,
    bindings: &'a Bindings,
    ctx: &'a DecisionContext<'a>,
}

impl<'a> Environment<'a> {
    pub fn new(request: Value, bindings: &'a Bindings, ctx: &'a DecisionContext<'a>) -> Self {
        Self {
            request,
            bindings,
            ctx,
        }
    }

    fn resolve(&self, segments: &[String]) -> Result<Value, EvalError> {
        let first = &segments[0];
        let mut current = match first.as_str() {
            "request" => self.request.clone(),
            "resource" => self.ctx.resource_value()?,
            name => match self.bindings.get(name) {
                Some(captured) => Value::Str(captured.clone()),
                None => {
                    return Err(EvalError::Undefined(format!("unknown variable `{name}`")));
                }
            },
        };

        let mut trace = first.clone();
        for seg in &segments[1..] {
            trace.push('.');
            trace.push_str(seg);
            current = match current {
                Value::Map(mut entries) => match entries.remove(seg) {
                    Some(next) => next,
                    None => return Err(EvalError::Undefined(trace)),
                },
                Value::Null => return Err(EvalError::Undefined(trace)),
                other => {
                    return Err(EvalError::TypeMismatch(format!(
                        "cannot access field `{seg}` on {}",
                        other.type_name()
                    )));
                }
            };
        }
        Ok(current)
    }
}

/// Evaluate a guard to its boolean result. A non-boolean value is a type
/// mismatch: guards decide, they do not compute.
pub fn evaluate_guard(expr: &Expr, env: &Environment<'_>) -> Result<bool, EvalError> {
    match evaluate(expr, env)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::TypeMismatch(format!(
            "guard must evaluate to a boolean, got {}",
            other.type_name()
        ))),
    }
}

pub fn evaluate(expr: &Expr, env: &Environment<'_>) -> Result<Value, EvalError> {
    env.ctx.enter()?;
    let result = eval_node(expr, env);
    env.ctx.exit();
    result
}

fn eval_node(expr: &Expr, env: &Environment<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            LitValue::Int(n) => Value::Int(*n),
            LitValue::Float(f) => Value::Float(*f),
            LitValue::Str(s) => Value::Str(s.clone()),
            LitValue::Bool(b) => Value::Bool(*b),
            LitValue::Null => Value::Null,
        }),
        Expr::Path(segments) => env.resolve(segments),
        Expr::ListLit(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, env)?);
            }
            Ok(Value::List(values))
        }
        Expr::UnaryNot(inner) => match evaluate(inner, env)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::TypeMismatch(format!(
                "`!` requires a boolean operand, got {}",
                other.type_name()
            ))),
        },
        Expr::In {
            element,
            collection,
        } => {
            let elem = evaluate(element, env)?;
            match evaluate(collection, env)? {
                Value::List(items) => Ok(Value::Bool(items.contains(&elem))),
                Value::Map(entries) => match elem {
                    Value::Str(key) => Ok(Value::Bool(entries.contains_key(&key))),
                    other => Err(EvalError::TypeMismatch(format!(
                        "map membership requires a string key, got {}",
                        other.type_name()
                    ))),
                },
                other => Err(EvalError::TypeMismatch(format!(
                    "`in` requires a list or map on the right side, got {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Is { value, type_name } => {
            let v = evaluate(value, env)?;
            Ok(Value::Bool(v.is_type(type_name)))
        }
        Expr::Field { base, field } => match evaluate(base, env)? {
            Value::Map(mut entries) => match entries.remove(field) {
                Some(value) => Ok(value),
                None => Err(EvalError::Undefined(format!("missing field `{field}`"))),
            },
            Value::Null => Err(EvalError::Undefined(format!("missing field `{field}`"))),
            other => Err(EvalError::TypeMismatch(format!(
                "cannot access field `{field}` on {}",
                other.type_name()
            ))),
        },
        Expr::Call { func, arg } => {
            let arg = evaluate(arg, env)?;
            match func {
                Builtin::Size => match arg {
                    Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                    Value::List(items) => Ok(Value::Int(items.len() as i64)),
                    Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
                    other => Err(EvalError::TypeMismatch(format!(
                        "size() requires a string, list, or map, got {}",
                        other.type_name()
                    ))),
                },
                Builtin::Exists => {
                    let path = call_path(&arg)?;
                    Ok(Value::Bool(env.ctx.read_cached(&path)?.is_some()))
                }
                Builtin::Get => {
                    let path = call_path(&arg)?;
                    match env.ctx.read_cached(&path)? {
                        Some(data) => Ok(data),
                        None => Err(EvalError::Undefined(format!("no document at `{path}`"))),
                    }
                }
            }
        }
        Expr::BinOp { op, left, right } => match op {
            // Short-circuit: the right operand is not evaluated (and issues
            // no reads) when the left already decides.
            BinOp::And => match evaluate(left, env)? {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => bool_operand(evaluate(right, env)?, "&&"),
                other => Err(EvalError::TypeMismatch(format!(
                    "`&&` requires boolean operands, got {}",
                    other.type_name()
                ))),
            },
            BinOp::Or => match evaluate(left, env)? {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => bool_operand(evaluate(right, env)?, "||"),
                other => Err(EvalError::TypeMismatch(format!(
                    "`||` requires boolean operands, got {}",
                    other.type_name()
                ))),
            },
            BinOp::Eq => Ok(Value::Bool(evaluate(left, env)? == evaluate(right, env)?)),
            BinOp::Ne => Ok(Value::Bool(evaluate(left, env)? != evaluate(right, env)?)),
            BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
                let l = evaluate(left, env)?;
                let r = evaluate(right, env)?;
                let ordering = l.compare(&r).ok_or_else(|| {
                    EvalError::TypeMismatch(format!(
                        "cannot order {} against {}",
                        l.type_name(),
                        r.type_name()
                    ))
                })?;
                let result = match op {
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Ge => ordering.is_ge(),
                    BinOp::Le => ordering.is_le(),
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinOp::Add => {
                let l = evaluate(left, env)?;
                let r = evaluate(right, env)?;
                match (l, r) {
                    (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                    (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
                    (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
                    (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + b as f64)),
                    (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
                    (l, r) => Err(EvalError::TypeMismatch(format!(
                        "`+` requires two strings or two numbers, got {} and {}",
                        l.type_name(),
                        r.type_name()
                    ))),
                }
            }
        },
    }
}

fn bool_operand(value: Value, op: &str) -> Result<Value, EvalError> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        other => Err(EvalError::TypeMismatch(format!(
            "`{op}` requires boolean operands, got {}",
            other.type_name()
        ))),
    }
}

fn call_path(arg: &Value) -> Result<DocumentPath, EvalError> {
    match arg {
        Value::Str(s) => DocumentPath::parse(s).ok_or_else(|| {
            EvalError::TypeMismatch(format!("invalid document path `{s}`"))
        }),
        other => Err(EvalError::TypeMismatch(format!(
            "document path must be a string, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;
    use serde_json::json;

    struct FailingReader;

    impl DocumentReader for FailingReader {
        fn read(&self, _path: &DocumentPath) -> Result<Option<Value>, ReadError> {
            Err(ReadError("storage unavailable".into()))
        }
    }

    /// Counts reads to verify per-decision caching.
    struct CountingReader {
        inner: StaticDocuments,
        reads: Cell<u32>,
    }

    impl DocumentReader for CountingReader {
        fn read(&self, path: &DocumentPath) -> Result<Option<Value>, ReadError> {
            self.reads.set(self.reads.get() + 1);
            self.inner.read(path)
        }
    }

    fn request_value(auth_uid: Option<&str>, data: Option<serde_json::Value>) -> Value {
        let mut request = BTreeMap::new();
        request.insert(
            "auth".to_string(),
            match auth_uid {
                Some(uid) => {
                    let mut auth = BTreeMap::new();
                    auth.insert("uid".to_string(), Value::Str(uid.to_string()));
                    Value::Map(auth)
                }
                None => Value::Null,
            },
        );
        if let Some(data) = data {
            let mut resource = BTreeMap::new();
            resource.insert("data".to_string(), Value::from(data));
            request.insert("resource".to_string(), Value::Map(resource));
        }
        Value::Map(request)
    }

    fn check(
        source: &str,
        request: Value,
        bindings: &Bindings,
        reader: &dyn DocumentReader,
    ) -> Result<bool, EvalError> {
        let expr = parse_expression(source).unwrap();
        let target = DocumentPath::parse("/users/alice").unwrap();
        let ctx = DecisionContext::new(reader, &target, None);
        let env = Environment::new(request, bindings, &ctx);
        evaluate_guard(&expr, &env)
    }

    #[test]
    fn test_auth_comparison() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        assert!(check(
            r#"request.auth != null && request.auth.uid == "alice""#,
            request_value(Some("alice"), None),
            &bindings,
            &docs,
        )
        .unwrap());
        assert!(!check(
            r#"request.auth != null"#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap());
    }

    #[test]
    fn test_null_auth_field_access_is_undefined_not_panic() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let err = check(
            r#"request.auth.uid == "alice""#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Undefined(path) if path == "request.auth.uid"));
    }

    #[test]
    fn test_short_circuit_and_skips_undefined() {
        // Without short-circuit the right side would fail on the missing field.
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let allowed = check(
            r#""nickname" in request.resource.data && request.resource.data.nickname == "al""#,
            request_value(Some("alice"), Some(json!({ "birthday": "January 1" }))),
            &bindings,
            &docs,
        )
        .unwrap();
        assert!(!allowed);
    }

    #[test]
    fn test_short_circuit_or() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        // Right side would be undefined; left decides first.
        assert!(check(
            r#"request.auth != null || request.auth.uid == "x""#,
            request_value(Some("alice"), None),
            &bindings,
            &docs,
        )
        .unwrap());
    }

    #[test]
    fn test_binding_resolution() {
        let docs = StaticDocuments::new();
        let mut bindings = Bindings::new();
        bindings.insert("userId".to_string(), "alice".to_string());
        assert!(check(
            r#"request.auth.uid == userId"#,
            request_value(Some("alice"), None),
            &bindings,
            &docs,
        )
        .unwrap());
        assert!(!check(
            r#"request.auth.uid == userId"#,
            request_value(Some("bob"), None),
            &bindings,
            &docs,
        )
        .unwrap());
    }

    #[test]
    fn test_in_list_and_map() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let req = request_value(
            Some("alice"),
            Some(json!({ "tags": ["a", "b"], "owner": "alice" })),
        );
        assert!(check(
            r#""a" in request.resource.data.tags"#,
            req.clone(),
            &bindings,
            &docs,
        )
        .unwrap());
        assert!(check(
            r#""owner" in request.resource.data"#,
            req.clone(),
            &bindings,
            &docs,
        )
        .unwrap());
        assert!(!check(
            r#""z" in request.resource.data.tags"#,
            req,
            &bindings,
            &docs,
        )
        .unwrap());
    }

    #[test]
    fn test_is_and_size() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let req = request_value(Some("alice"), Some(json!({ "name": "al", "age": 3 })));
        assert!(check(
            "request.resource.data.name is string && request.resource.data.age is number",
            req.clone(),
            &bindings,
            &docs,
        )
        .unwrap());
        assert!(check(
            "size(request.resource.data.name) == 2 && size(request.resource.data) == 2",
            req,
            &bindings,
            &docs,
        )
        .unwrap());
    }

    #[test]
    fn test_guard_must_be_boolean() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let err = check("size(\"abc\")", request_value(None, None), &bindings, &docs)
            .unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch(_)));
    }

    #[test]
    fn test_cross_type_ordering_fails() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let err = check(r#""a" > 1"#, request_value(None, None), &bindings, &docs)
            .unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch(_)));
    }

    #[test]
    fn test_exists_and_get() {
        let mut docs = StaticDocuments::new();
        docs.insert("/rooms/snow", json!({ "owner": "bob" }));
        let mut bindings = Bindings::new();
        bindings.insert("roomId".to_string(), "snow".to_string());

        assert!(check(
            r#"exists("rooms/" + roomId)"#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap());
        assert!(check(
            r#"get("rooms/" + roomId).owner == "bob""#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap());
        assert!(!check(
            r#"exists("rooms/missing")"#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap());
    }

    #[test]
    fn test_get_result_missing_field_is_undefined() {
        let mut docs = StaticDocuments::new();
        docs.insert("/rooms/snow", json!({ "owner": "bob" }));
        let bindings = Bindings::new();
        let err = check(
            r#"get("rooms/snow").topic == "skiing""#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Undefined(msg) if msg.contains("topic")));
    }

    #[test]
    #[should_panic(expected = "invalid document path")]
    fn test_fixture_insert_rejects_malformed_path() {
        let mut docs = StaticDocuments::new();
        docs.insert("//bad//path", json!({}));
    }

    #[test]
    fn test_get_missing_document_is_undefined() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let err = check(
            r#"get("rooms/none").owner == "x""#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Undefined(_)));
    }

    #[test]
    fn test_read_failure_is_typed_not_retried() {
        let bindings = Bindings::new();
        let err = check(
            r#"exists("rooms/snow")"#,
            request_value(None, None),
            &bindings,
            &FailingReader,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::ReadFailed { .. }));
    }

    #[test]
    fn test_reads_cached_within_decision() {
        let mut inner = StaticDocuments::new();
        inner.insert("/rooms/snow", json!({ "owner": "bob" }));
        let reader = CountingReader {
            inner,
            reads: Cell::new(0),
        };

        let expr = parse_expression(
            r#"exists("rooms/snow") && get("rooms/snow").owner == "bob" && exists("rooms/snow")"#,
        )
        .unwrap();
        let target = DocumentPath::parse("/users/alice").unwrap();
        let ctx = DecisionContext::new(&reader, &target, None);
        let bindings = Bindings::new();
        let env = Environment::new(request_value(None, None), &bindings, &ctx);
        assert!(evaluate_guard(&expr, &env).unwrap());
        assert_eq!(reader.reads.get(), 1);
    }

    #[test]
    fn test_resource_prior_state() {
        let mut docs = StaticDocuments::new();
        docs.insert("/users/alice", json!({ "birthday": "January 1" }));
        let bindings = Bindings::new();
        assert!(check(
            r#"resource.data.birthday == "January 1" && resource.id == "alice""#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap());
    }

    #[test]
    fn test_resource_absent_on_create_is_undefined() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let err = check(
            r#"resource.data.owner == "alice""#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Undefined(path) if path == "resource.data"));
    }

    #[test]
    fn test_step_budget_bounds_evaluation() {
        let docs = StaticDocuments::new();
        let target = DocumentPath::parse("/users/alice").unwrap();
        let ctx = DecisionContext::new(&docs, &target, None);
        let bindings = Bindings::new();
        let env = Environment::new(request_value(None, None), &bindings, &ctx);

        // A list wide enough to exhaust the step budget; nesting stays flat.
        let items = (0..MAX_EVAL_STEPS + 1)
            .map(|_| "1")
            .collect::<Vec<_>>()
            .join(", ");
        let expr = parse_expression(&format!("size([{items}]) == 0")).unwrap();
        let err = evaluate(&expr, &env).unwrap_err();
        assert!(matches!(err, EvalError::StepBudgetExceeded));
    }

    #[test]
    fn test_depth_budget_bounds_recursion() {
        let docs = StaticDocuments::new();
        let target = DocumentPath::parse("/users/alice").unwrap();
        let ctx = DecisionContext::new(&docs, &target, None);
        let bindings = Bindings::new();
        let env = Environment::new(request_value(None, None), &bindings, &ctx);

        // Left-deep chain: parsed iteratively, but evaluation would nest.
        let chain = (0..MAX_EVAL_DEPTH * 2)
            .map(|_| "1")
            .collect::<Vec<_>>()
            .join(" + ");
        let expr = parse_expression(&format!("{chain} == 0")).unwrap();
        let err = evaluate(&expr, &env).unwrap_err();
        assert!(matches!(err, EvalError::StepBudgetExceeded));
    }

    #[test]
    fn test_cancellation_stops_evaluation() {
        let docs = StaticDocuments::new();
        let target = DocumentPath::parse("/users/alice").unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        let ctx = DecisionContext::new(&docs, &target, Some(&flag));
        let bindings = Bindings::new();
        let env = Environment::new(request_value(None, None), &bindings, &ctx);
        let expr = parse_expression("1 == 1").unwrap();
        let err = evaluate(&expr, &env).unwrap_err();
        assert!(matches!(err, EvalError::Cancelled));
    }

    #[test]
    fn test_concat_builds_paths() {
        let docs = StaticDocuments::new();
        let bindings = Bindings::new();
        let err = check(
            r#"get("rooms/" + 1) == null"#,
            request_value(None, None),
            &bindings,
            &docs,
        )
        .unwrap_err();
        // number + string is a type mismatch, not a silent coercion
        assert!(matches!(err, EvalError::TypeMismatch(_)));
    }
}
