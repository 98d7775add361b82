//! Compiled, immutable rule-set model.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::CompileError;
use crate::expr::Expr;
use crate::path::{Bindings, DocumentPath, PathPattern};

/// The five fine-grained operation kinds a decision is made for. Rule
/// source may also write the composite names `read` and `write`; those are
/// expanded at compile time and never appear in the compiled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "get",
            OperationKind::List => "list",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Expand an operation name as written in rule source. Composites map
    /// to the fine-grained kinds they cover; unknown names are a compile
    /// error at the call site.
    pub fn expand(name: &str) -> Result<Vec<OperationKind>, CompileError> {
        match name {
            "get" => Ok(vec![OperationKind::Get]),
            "list" => Ok(vec![OperationKind::List]),
            "create" => Ok(vec![OperationKind::Create]),
            "update" => Ok(vec![OperationKind::Update]),
            "delete" => Ok(vec![OperationKind::Delete]),
            "read" => Ok(vec![OperationKind::Get, OperationKind::List]),
            "write" => Ok(vec![
                OperationKind::Create,
                OperationKind::Update,
                OperationKind::Delete,
            ]),
            other => Err(CompileError::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `allow` declaration: an optional compiled expression (absent means
/// unconditional) plus the source text for diagnostics.
#[derive(Debug, Clone)]
pub struct Guard {
    pub expr: Option<Expr>,
    pub source: String,
}

impl Guard {
    pub fn unconditional() -> Self {
        Self {
            expr: None,
            source: "<unconditional>".to_string(),
        }
    }
}

/// A flattened rule block: one absolute path pattern and the guards
/// declared per operation. An operation with no entry here contributes
/// nothing to a decision; permissions never leak between siblings.
#[derive(Debug, Clone)]
pub struct RuleBlock {
    pub pattern: PathPattern,
    pub guards: HashMap<OperationKind, Vec<Guard>>,
}

impl RuleBlock {
    pub fn new(pattern: PathPattern) -> Self {
        Self {
            pattern,
            guards: HashMap::new(),
        }
    }

    pub fn guard_count(&self) -> usize {
        self.guards.values().map(Vec::len).sum()
    }
}

/// An immutable compiled rule set. Built once by [`crate::compile`],
/// shared behind an `Arc`, and replaced wholesale on reload.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub blocks: Vec<RuleBlock>,
}

impl RuleSet {
    /// All blocks whose pattern matches `path`, in declaration order,
    /// each with its wildcard bindings. Several blocks may match the same
    /// path (a literal pattern and a wildcard pattern, say); that layering
    /// is intentional and they are all evaluated.
    pub fn matching_blocks<'a>(
        &'a self,
        path: &DocumentPath,
    ) -> Vec<(&'a RuleBlock, Bindings)> {
        self.blocks
            .iter()
            .filter_map(|block| block.pattern.matches(path).map(|b| (block, b)))
            .collect()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn guard_count(&self) -> usize {
        self.blocks.iter().map(RuleBlock::guard_count).sum()
    }
}
