//! Decision orchestration: match candidate blocks, evaluate their guards,
//! aggregate to a single allow/deny.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::compile::compile;
use crate::errors::CompileError;
use crate::eval::{evaluate_guard, CancelFlag, DecisionContext, DocumentReader, Environment};
use crate::path::DocumentPath;
use crate::ruleset::{OperationKind, RuleSet};
use crate::value::Value;

/// Identity handed over by the auth collaborator: a subject id plus an
/// open set of custom claims. Unauthenticated requests carry no
/// `AuthContext` at all.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub uid: String,
    pub claims: BTreeMap<String, Value>,
}

impl AuthContext {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            claims: BTreeMap::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }
}

/// One proposed client operation. `data` is the proposed new document
/// state and only meaningful for writes; `time` is the server-assigned
/// decision timestamp that guards see as `request.time`.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub path: DocumentPath,
    pub operation: OperationKind,
    pub auth: Option<AuthContext>,
    pub data: Option<Value>,
    pub time: DateTime<Utc>,
}

impl AccessRequest {
    pub fn new(path: DocumentPath, operation: OperationKind) -> Self {
        Self {
            path,
            operation,
            auth: None,
            data: None,
            time: Utc::now(),
        }
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn at_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

/// Terminal result of one decision. Guard evaluation failures are folded
/// in as contributing reasons; they never surface as errors to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Pattern text of the rule block whose guard granted access.
    pub matched_rule: Option<String>,
    pub reason: String,
    /// Guards that failed to evaluate and were treated as false.
    pub eval_failures: Vec<String>,
}

/// Evaluate one request against a rule-set snapshot. Matching blocks are
/// tried in declaration order and their guards OR together: the first
/// guard that evaluates `true` allows; anything that fails evaluation
/// counts as `false` (deny-on-error); nothing true means deny.
pub fn decide(rules: &RuleSet, request: &AccessRequest, reader: &dyn DocumentReader) -> Decision {
    decide_inner(rules, request, reader, None)
}

/// [`decide`], with a cooperative cancellation handle. Once the flag is
/// set the evaluator stops issuing document reads and the decision comes
/// back denied.
pub fn decide_cancellable(
    rules: &RuleSet,
    request: &AccessRequest,
    reader: &dyn DocumentReader,
    cancel: &CancelFlag,
) -> Decision {
    decide_inner(rules, request, reader, Some(cancel))
}

fn decide_inner(
    rules: &RuleSet,
    request: &AccessRequest,
    reader: &dyn DocumentReader,
    cancel: Option<&CancelFlag>,
) -> Decision {
    let ctx = DecisionContext::new(reader, &request.path, cancel);
    let request_value = build_request_value(request);
    let mut eval_failures = Vec::new();

    for (block, bindings) in rules.matching_blocks(&request.path) {
        let Some(guards) = block.guards.get(&request.operation) else {
            // No guard for this exact operation kind: the block contributes
            // nothing, siblings do not imply each other.
            continue;
        };
        let env = Environment::new(request_value.clone(), &bindings, &ctx);
        for guard in guards {
            let verdict = match &guard.expr {
                None => Ok(true),
                Some(expr) => evaluate_guard(expr, &env),
            };
            match verdict {
                Ok(true) => {
                    let pattern = block.pattern.to_string();
                    tracing::debug!(
                        path = %request.path,
                        operation = %request.operation,
                        rule = %pattern,
                        "request allowed"
                    );
                    return Decision {
                        allowed: true,
                        reason: format!("allowed by rule `{pattern}`"),
                        matched_rule: Some(pattern),
                        eval_failures,
                    };
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        path = %request.path,
                        rule = %block.pattern,
                        error = %err,
                        "guard evaluation failed, treated as false"
                    );
                    eval_failures.push(format!(
                        "guard `{}` on `{}`: {err}",
                        guard.source, block.pattern
                    ));
                }
            }
        }
    }

    tracing::debug!(
        path = %request.path,
        operation = %request.operation,
        "request denied"
    );
    Decision {
        allowed: false,
        matched_rule: None,
        reason: "no matching allow rule".to_string(),
        eval_failures,
    }
}

/// The `request` variable guards evaluate against. `request.resource.data`
/// only exists when the caller supplied proposed data, so guards on reads
/// that dereference it fail as undefined instead of seeing stale values.
fn build_request_value(request: &AccessRequest) -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "auth".to_string(),
        match &request.auth {
            Some(auth) => {
                let mut auth_map = BTreeMap::new();
                auth_map.insert("uid".to_string(), Value::Str(auth.uid.clone()));
                auth_map.insert("token".to_string(), Value::Map(auth.claims.clone()));
                Value::Map(auth_map)
            }
            None => Value::Null,
        },
    );
    if let Some(data) = &request.data {
        let mut resource = BTreeMap::new();
        resource.insert("data".to_string(), data.clone());
        map.insert("resource".to_string(), Value::Map(resource));
    }
    map.insert("time".to_string(), Value::Timestamp(request.time));
    map.insert(
        "method".to_string(),
        Value::Str(request.operation.as_str().to_string()),
    );
    Value::Map(map)
}

/// Process-wide holder of the active rule-set snapshot.
///
/// Reload compiles first and swaps only on success, so a bad rule file
/// never disturbs the running set. Decisions pin the `Arc` they start
/// with; an in-flight decision keeps its snapshot alive across a reload
/// and never sees a mix of old and new rules.
pub struct RulesEngine {
    active: RwLock<Arc<RuleSet>>,
}

impl RulesEngine {
    pub fn new(source: &str) -> Result<Self, CompileError> {
        Ok(Self {
            active: RwLock::new(Arc::new(compile(source)?)),
        })
    }

    /// Compile `source` and atomically replace the active snapshot.
    /// On failure the previous snapshot stays active.
    pub fn reload(&self, source: &str) -> Result<(), CompileError> {
        let next = Arc::new(compile(source)?);
        let mut active = match self.active.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *active = next;
        tracing::info!(blocks = active.block_count(), "Rule set reloaded");
        Ok(())
    }

    /// The current snapshot, pinned: holders keep evaluating against it
    /// even if a reload lands meanwhile.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        match self.active.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn decide(&self, request: &AccessRequest, reader: &dyn DocumentReader) -> Decision {
        decide(&self.snapshot(), request, reader)
    }

    pub fn decide_cancellable(
        &self,
        request: &AccessRequest,
        reader: &dyn DocumentReader,
        cancel: &CancelFlag,
    ) -> Decision {
        decide_cancellable(&self.snapshot(), request, reader, cancel)
    }
}
