//! Rule-set compilation: KDL source text into a validated [`RuleSet`].
//!
//! Example rule source:
//! ```kdl
//! match "/users/{userId}" {
//!     allow "read"
//!     allow "create" if="request.auth != null && request.auth.uid == userId"
//!
//!     match "/posts/{postId}" {
//!         allow "read" if="resource.data.public == true"
//!     }
//! }
//! ```
//!
//! Nested `match` blocks are flattened into absolute patterns here, so the
//! engine never walks a block hierarchy at request time. Author mistakes
//! (malformed patterns, unknown operations or functions, guards referencing
//! names their pattern does not bind) all fail the compile instead of
//! becoming deny-on-error surprises at request time.

use std::collections::BTreeSet;

use kdl::KdlDocument;

use crate::errors::CompileError;
use crate::expr::{parse_expression, Expr};
use crate::path::PathPattern;
use crate::ruleset::{Guard, OperationKind, RuleBlock, RuleSet};

/// Compile rule source text. Empty source is a valid rule set that denies
/// everything (default posture).
pub fn compile(source: &str) -> Result<RuleSet, CompileError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| CompileError::KdlParse(e.to_string()))?;

    let mut blocks = Vec::new();
    for node in doc.nodes() {
        match node.name().value() {
            "match" => compile_match(node, None, &mut blocks)?,
            other => {
                return Err(CompileError::InvalidRule(format!(
                    "unexpected top-level node `{other}` (expected `match`)"
                )));
            }
        }
    }

    let set = RuleSet { blocks };
    tracing::info!(
        blocks = set.block_count(),
        guards = set.guard_count(),
        "Compiled rule set"
    );
    Ok(set)
}

fn compile_match(
    node: &kdl::KdlNode,
    parent: Option<&PathPattern>,
    blocks: &mut Vec<RuleBlock>,
) -> Result<(), CompileError> {
    let args = positional_strings(node)?;
    if args.len() != 1 {
        return Err(CompileError::InvalidRule(
            "match node requires exactly one pattern argument (e.g. match \"/users/{userId}\")"
                .into(),
        ));
    }
    if let Some(prop) = first_property_name(node) {
        return Err(CompileError::InvalidRule(format!(
            "unknown property `{prop}` on match node (match takes only a pattern argument)"
        )));
    }
    let relative = PathPattern::parse(&args[0])?;
    let pattern = match parent {
        Some(parent) => parent.join(&relative)?,
        None => relative,
    };

    let mut block = RuleBlock::new(pattern.clone());
    let mut nested = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "allow" => {
                    let ops = positional_strings(child)?;
                    if ops.is_empty() {
                        return Err(CompileError::InvalidRule(format!(
                            "allow node under `{pattern}` requires at least one operation argument (e.g. allow \"read\")"
                        )));
                    }
                    let guard = match guard_source(child, &pattern)? {
                        Some(source) => {
                            let expr = parse_expression(&source)?;
                            check_guard_roots(&expr, &pattern)?;
                            Guard {
                                expr: Some(expr),
                                source,
                            }
                        }
                        None => Guard::unconditional(),
                    };
                    for op_name in &ops {
                        for op in OperationKind::expand(op_name)? {
                            block.guards.entry(op).or_default().push(guard.clone());
                        }
                    }
                }
                "match" => nested.push(child),
                other => {
                    return Err(CompileError::InvalidRule(format!(
                        "unexpected node `{other}` in match `{pattern}` (expected `allow` or `match`)"
                    )));
                }
            }
        }
    }

    // Parent block lands before its children, preserving declaration order
    // in the flattened set.
    if block.guard_count() > 0 {
        blocks.push(block);
    }
    for child in nested {
        compile_match(child, Some(&pattern), blocks)?;
    }
    Ok(())
}

/// A guard may reference `request`, `resource`, and the names its own
/// (flattened) pattern binds; anything else is an author error.
fn check_guard_roots(expr: &Expr, pattern: &PathPattern) -> Result<(), CompileError> {
    let mut roots = BTreeSet::new();
    expr.root_identifiers(&mut roots);
    for name in roots {
        if name == "request" || name == "resource" {
            continue;
        }
        if !pattern.binding_names().contains(&name.as_str()) {
            return Err(CompileError::UnknownVariable {
                name,
                pattern: pattern.to_string(),
            });
        }
    }
    Ok(())
}

/// All positional arguments of a KDL node. A non-string argument is an
/// author error, not something to drop on the floor.
fn positional_strings(node: &kdl::KdlNode) -> Result<Vec<String>, CompileError> {
    let mut args = Vec::new();
    for entry in node.entries().iter().filter(|e| e.name().is_none()) {
        match entry.value().as_string() {
            Some(s) => args.push(s.to_string()),
            None => {
                return Err(CompileError::InvalidRule(format!(
                    "non-string argument {} on `{}` node",
                    entry.value(),
                    node.name().value()
                )));
            }
        }
    }
    Ok(args)
}

fn first_property_name(node: &kdl::KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find_map(|e| e.name())
        .map(|name| name.value())
}

/// The `if` guard source of an allow node, if any. Unknown properties and
/// non-string `if` values are rejected: a misspelled or mistyped guard
/// must never degrade to an unconditional allow.
fn guard_source(
    node: &kdl::KdlNode,
    pattern: &PathPattern,
) -> Result<Option<String>, CompileError> {
    let mut source = None;
    for entry in node.entries() {
        let Some(name) = entry.name() else { continue };
        match name.value() {
            "if" => match entry.value().as_string() {
                Some(s) => source = Some(s.to_string()),
                None => {
                    return Err(CompileError::InvalidRule(format!(
                        "`if` on allow node under `{pattern}` must be a string guard expression"
                    )));
                }
            },
            other => {
                return Err(CompileError::InvalidRule(format!(
                    "unknown property `{other}` on allow node under `{pattern}` (expected `if`)"
                )));
            }
        }
    }
    Ok(source)
}
