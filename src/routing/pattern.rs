//! Path template compilation and matching.
//!
//! # Responsibilities
//! - Parse templates such as `/users/:id` or `/files/:name?` into segments
//! - Match a concrete path and capture named parameters
//!
//! # Design Decisions
//! - Matching is case-sensitive, one trailing slash is ignored
//! - Optional parameters match zero or one segment and may sit anywhere
//! - Absent optional parameters are omitted from `Params`, never empty strings
//! - No regex: segments are compared one by one with backtracking

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Errors raised while compiling a path template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("path template must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("empty parameter name in template {0}")]
    EmptyParameter(String),

    #[error("invalid parameter name `{name}` in template {template}")]
    InvalidParameter { template: String, name: String },

    #[error("parameter `{name}` appears twice in template {template}")]
    DuplicateParameter { template: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Optional(String),
}

/// Parameters captured from a matched path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    template: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Compile a template into a pattern.
    pub fn compile(template: &str) -> Result<Self, PatternError> {
        if !template.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(template.to_string()));
        }

        let mut segments = Vec::new();
        let mut seen: Vec<&str> = Vec::new();

        for raw in split_path(template).filter(|s| !s.is_empty()) {
            let Some(token) = raw.strip_prefix(':') else {
                segments.push(Segment::Literal(raw.to_string()));
                continue;
            };

            let (name, optional) = match token.strip_suffix('?') {
                Some(name) => (name, true),
                None => (token, false),
            };

            if name.is_empty() {
                return Err(PatternError::EmptyParameter(template.to_string()));
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(PatternError::InvalidParameter {
                    template: template.to_string(),
                    name: name.to_string(),
                });
            }
            if seen.contains(&name) {
                return Err(PatternError::DuplicateParameter {
                    template: template.to_string(),
                    name: name.to_string(),
                });
            }
            seen.push(name);

            segments.push(if optional {
                Segment::Optional(name.to_string())
            } else {
                Segment::Param(name.to_string())
            });
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// The template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Match a concrete path, returning the captured parameters.
    ///
    /// Paths without a leading `/` or with empty segments (`/a//b`) never match.
    pub fn matches(&self, path: &str) -> Option<Params> {
        if !path.starts_with('/') {
            return None;
        }
        let parts: Vec<&str> = split_path(path).collect();
        if parts.iter().any(|part| part.is_empty()) {
            return None;
        }
        let mut captured = BTreeMap::new();
        if match_segments(&self.segments, &parts, &mut captured) {
            Some(Params(captured))
        } else {
            None
        }
    }

    /// Returns true if both patterns accept exactly the same paths.
    ///
    /// Parameter names are ignored: `/a/:id` and `/a/:key` are equivalent.
    pub fn is_equivalent(&self, other: &RoutePattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Literal(x), Segment::Literal(y)) => x == y,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    (Segment::Optional(_), Segment::Optional(_)) => true,
                    _ => false,
                })
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Splits a `/`-rooted path into segments, so `/a/` and `/a` agree.
fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    trimmed.split('/').skip(1)
}

fn match_segments(
    segments: &[Segment],
    parts: &[&str],
    captured: &mut BTreeMap<String, String>,
) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return parts.is_empty();
    };

    match first {
        Segment::Literal(lit) => match parts.split_first() {
            Some((part, remaining)) if part == lit => match_segments(rest, remaining, captured),
            _ => false,
        },
        Segment::Param(name) => match parts.split_first() {
            Some((part, remaining)) => {
                captured.insert(name.clone(), (*part).to_string());
                if match_segments(rest, remaining, captured) {
                    return true;
                }
                captured.remove(name);
                false
            }
            None => false,
        },
        Segment::Optional(name) => {
            // Prefer consuming a segment, fall back to skipping it.
            if let Some((part, remaining)) = parts.split_first() {
                captured.insert(name.clone(), (*part).to_string());
                if match_segments(rest, remaining, captured) {
                    return true;
                }
                captured.remove(name);
            }
            match_segments(rest, parts, captured)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_parameters() {
        let pattern = RoutePattern::compile("/a/:x/:y").unwrap();
        let params = pattern.matches("/a/2/3").unwrap();
        assert_eq!(params.get("x"), Some("2"));
        assert_eq!(params.get("y"), Some("3"));
        assert_eq!(params.len(), 2);

        assert!(pattern.matches("/a/2").is_none());
        assert!(pattern.matches("/b/2/3").is_none());
        assert!(pattern.matches("/a/2/3/4").is_none());
    }

    #[test]
    fn test_optional_parameter() {
        let pattern = RoutePattern::compile("/a/:id?").unwrap();

        let absent = pattern.matches("/a").unwrap();
        assert!(!absent.contains("id"));
        assert!(absent.is_empty());

        let present = pattern.matches("/a/42").unwrap();
        assert_eq!(present.get("id"), Some("42"));
    }

    #[test]
    fn test_optional_in_the_middle() {
        let pattern = RoutePattern::compile("/a/:v?/b").unwrap();
        assert!(pattern.matches("/a/b").unwrap().is_empty());
        assert_eq!(pattern.matches("/a/1/b").unwrap().get("v"), Some("1"));
        assert!(pattern.matches("/a/1/2/b").is_none());
    }

    #[test]
    fn test_literal_and_trailing_slash() {
        let pattern = RoutePattern::compile("/ok").unwrap();
        assert!(pattern.matches("/ok").is_some());
        assert!(pattern.matches("/ok/").is_some());
        assert!(pattern.matches("/OK").is_none());

        let root = RoutePattern::compile("/").unwrap();
        assert!(root.matches("/").is_some());
        assert!(root.matches("/x").is_none());
    }

    #[test]
    fn test_relative_and_empty_segment_paths_do_not_match() {
        let root = RoutePattern::compile("/").unwrap();
        let id = RoutePattern::compile("/:id").unwrap();
        assert!(root.matches("about").is_none());
        assert!(root.matches("").is_none());
        assert!(id.matches("users/7").is_none());
        assert!(id.matches("about").is_none());

        let pattern = RoutePattern::compile("/a/:x/:y").unwrap();
        assert!(pattern.matches("/a//2/3").is_none());
        assert!(pattern.matches("/a/2//3").is_none());
        assert!(root.matches("//").is_none());
    }

    #[test]
    fn test_compile_errors() {
        assert_eq!(
            RoutePattern::compile("ok"),
            Err(PatternError::MissingLeadingSlash("ok".into()))
        );
        assert!(matches!(
            RoutePattern::compile("/a/:"),
            Err(PatternError::EmptyParameter(_))
        ));
        assert!(matches!(
            RoutePattern::compile("/a/:x-y"),
            Err(PatternError::InvalidParameter { .. })
        ));
        assert!(matches!(
            RoutePattern::compile("/a/:x/:x"),
            Err(PatternError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn test_equivalence_ignores_names() {
        let a = RoutePattern::compile("/users/:id").unwrap();
        let b = RoutePattern::compile("/users/:key").unwrap();
        let c = RoutePattern::compile("/users/me").unwrap();
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }
}
