//! Route predicates: path pattern plus optional method.
//!
//! Patterns are matched segment by segment. `*` and `{name}` match exactly
//! one segment; a trailing `**` matches zero or more.

use axum::http::Method;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Rest,
}

/// Compiled path pattern such as `/inventory/{id}/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return Err(format!("path pattern '{raw}' must start with '/'"));
        }

        let parts: Vec<&str> = split_segments(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "**" if i + 1 == parts.len() => Segment::Rest,
                "**" => return Err(format!("'**' is only allowed at the end of '{raw}'")),
                "*" => Segment::Single,
                p if p.starts_with('{') && p.ends_with('}') && p.len() > 2 => Segment::Single,
                p if p.contains(['{', '}', '*']) => {
                    return Err(format!("unsupported segment '{p}' in '{raw}'"))
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_segments(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match parts.next() {
                    Some(part) if part == expected => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Path pattern plus method predicate of one route.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    path: PathPattern,
    method: Option<Method>,
}

impl RouteMatcher {
    /// `method` of `None` or `*` matches any method.
    pub fn new(path: &str, method: Option<&str>) -> Result<Self, String> {
        let method = match method.map(str::trim) {
            None | Some("") | Some("*") => None,
            Some(m) => Some(
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("invalid method '{m}'"))?,
            ),
        };
        Ok(Self {
            path: PathPattern::parse(path)?,
            method,
        })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && self.path.matches(path)
    }

    pub fn path(&self) -> &PathPattern {
        &self.path
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }
}
