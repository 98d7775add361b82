//! Document paths and the patterns that match them.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::CompileError;

/// Wildcard captures recorded by a successful pattern match:
/// binding name -> matched segment (or `/`-joined remainder for a
/// recursive wildcard).
pub type Bindings = BTreeMap<String, String>;

/// A concrete path into the store: `users/alice`,
/// `rooms/snow/messages/m1`. Leading slash optional; empty segments
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        if trimmed.is_empty() {
            return None;
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return None;
        }
        Some(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment, conventionally the document id.
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `{name}`: matches exactly one segment.
    Wildcard(String),
    /// `{name=**}`: matches zero or more trailing segments; only valid
    /// in final position.
    RecursiveWildcard(String),
}

/// A path template: literal segments, `{name}` wildcards, and an optional
/// terminal `{name=**}` recursive wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, CompileError> {
        let invalid = |reason: &str| CompileError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
        if trimmed.is_empty() {
            return Err(invalid("pattern must have at least one segment"));
        }

        let raw: Vec<&str> = trimmed.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, seg) in raw.iter().enumerate() {
            if seg.is_empty() {
                return Err(invalid("empty segment"));
            }
            if let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                if let Some(name) = inner.strip_suffix("=**") {
                    if i != raw.len() - 1 {
                        return Err(invalid(
                            "recursive wildcard is only allowed as the final segment",
                        ));
                    }
                    check_binding_name(name).map_err(|r| invalid(r))?;
                    segments.push(Segment::RecursiveWildcard(name.to_string()));
                } else {
                    check_binding_name(inner).map_err(|r| invalid(r))?;
                    segments.push(Segment::Wildcard(inner.to_string()));
                }
            } else if seg.contains('{') || seg.contains('}') {
                return Err(invalid("wildcards must span a whole segment"));
            } else {
                segments.push(Segment::Literal(seg.to_string()));
            }
        }

        let result = Self { segments };
        if let Some(name) = result.first_duplicate_binding() {
            return Err(CompileError::DuplicateBinding {
                name,
                pattern: pattern.to_string(),
            });
        }
        Ok(result)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names bound by this pattern's wildcards.
    pub fn binding_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                Segment::Literal(_) => None,
                Segment::Wildcard(name) | Segment::RecursiveWildcard(name) => Some(name.as_str()),
            })
            .collect()
    }

    fn first_duplicate_binding(&self) -> Option<String> {
        let names = self.binding_names();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Some(name.to_string());
            }
        }
        None
    }

    fn ends_with_recursive(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::RecursiveWildcard(_)))
    }

    /// Append a nested block's relative pattern, producing the flattened
    /// absolute pattern. Fails if the parent already ends in a recursive
    /// wildcard (nothing can nest below it) or if binding names collide.
    pub fn join(&self, child: &PathPattern) -> Result<PathPattern, CompileError> {
        let child_text = child.to_string();
        if self.ends_with_recursive() {
            return Err(CompileError::InvalidPattern {
                pattern: child_text,
                reason: format!(
                    "cannot nest below `{self}`: parent ends in a recursive wildcard"
                ),
            });
        }
        let mut segments = self.segments.clone();
        segments.extend(child.segments.iter().cloned());
        let joined = PathPattern { segments };
        if let Some(name) = joined.first_duplicate_binding() {
            return Err(CompileError::DuplicateBinding {
                name,
                pattern: joined.to_string(),
            });
        }
        Ok(joined)
    }

    /// Match a concrete path, yielding the wildcard bindings on success.
    /// Without a recursive wildcard the lengths must agree exactly; with
    /// one, the path must at least cover the preceding segments and the
    /// remainder (possibly empty) binds as a joined string.
    pub fn matches(&self, path: &DocumentPath) -> Option<Bindings> {
        let concrete = path.segments();
        let fixed = if self.ends_with_recursive() {
            self.segments.len() - 1
        } else {
            if concrete.len() != self.segments.len() {
                return None;
            }
            self.segments.len()
        };
        if concrete.len() < fixed {
            return None;
        }

        let mut bindings = Bindings::new();
        for (seg, value) in self.segments.iter().zip(concrete.iter()) {
            match seg {
                Segment::Literal(lit) => {
                    if lit != value {
                        return None;
                    }
                }
                Segment::Wildcard(name) => {
                    bindings.insert(name.clone(), value.clone());
                }
                Segment::RecursiveWildcard(_) => break,
            }
        }
        if let Some(Segment::RecursiveWildcard(name)) = self.segments.last() {
            bindings.insert(name.clone(), concrete[fixed..].join("/"));
        }
        Some(bindings)
    }
}

fn check_binding_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("wildcard binding name must not be empty");
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('0');
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("wildcard binding name must be a valid identifier");
    }
    Ok(())
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => write!(f, "/{lit}")?,
                Segment::Wildcard(name) => write!(f, "/{{{name}}}")?,
                Segment::RecursiveWildcard(name) => write!(f, "/{{{name}=**}}")?,
            }
        }
        Ok(())
    }
}
