//! Route schema compilation and path matching.
//!
//! A schema is a `/`-separated path pattern whose segments are literals,
//! named captures (`:id`) or optional named captures (`:id?`). Schemas are
//! compiled at registration time; a malformed schema is rejected before any
//! URL is ever matched against it.

use std::collections::HashMap;

use crate::error::{LumenError, Result};

/// Parameters handed to a route handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    /// Captured path segments, keyed by capture name.
    pub pathname: HashMap<String, String>,
    /// Query-string key/value pairs.
    pub search: HashMap<String, String>,
    /// Unmatched trailing path, present only on partial matches.
    pub tail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
}

/// Result of matching one schema against a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub pathname: HashMap<String, String>,
    /// True when the path was fully consumed.
    pub exact: bool,
    /// Leftover path for partial matches, always `/`-prefixed.
    pub tail: Option<String>,
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct RouteSchema {
    raw: String,
    segments: Vec<Segment>,
}

impl RouteSchema {
    /// Compile a schema string, rejecting malformed input.
    pub fn compile(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(LumenError::schema(raw, "schema must start with '/'"));
        }

        let mut segments = Vec::new();
        if raw != "/" {
            for part in raw[1..].split('/') {
                if part.is_empty() {
                    return Err(LumenError::schema(raw, "empty path segment"));
                }
                if let Some(rest) = part.strip_prefix(':') {
                    let (name, optional) = match rest.strip_suffix('?') {
                        Some(name) => (name, true),
                        None => (rest, false),
                    };
                    if name.is_empty() {
                        return Err(LumenError::schema(raw, "capture segment without a name"));
                    }
                    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(LumenError::schema(
                            raw,
                            format!("invalid capture name {:?}", name),
                        ));
                    }
                    segments.push(Segment::Param {
                        name: name.to_string(),
                        optional,
                    });
                } else {
                    segments.push(Segment::Literal(part.to_string()));
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The bare `/` schema, always treated as least specific.
    pub fn is_root(&self) -> bool {
        self.raw == "/"
    }

    /// Specificity rank used for partial-match tie-breaking: the number of
    /// separators in the schema STRING. Counting the string rather than the
    /// matched prefix is deliberate; extensions depend on this behavior.
    pub fn separator_count(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.raw.matches('/').count()
        }
    }

    /// Match a path against this schema.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        let path = if path.is_empty() { "/" } else { path };
        let path_segments: Vec<&str> = if path == "/" {
            Vec::new()
        } else {
            path.trim_start_matches('/').split('/').collect()
        };

        let mut pathname = HashMap::new();
        let mut consumed = 0usize;
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => match path_segments.get(consumed) {
                    Some(part) if *part == literal => consumed += 1,
                    _ => return None,
                },
                Segment::Param { name, optional } => match path_segments.get(consumed) {
                    Some(part) => {
                        pathname.insert(name.clone(), (*part).to_string());
                        consumed += 1;
                    }
                    None if *optional => {}
                    None => return None,
                },
            }
        }

        let rest = &path_segments[consumed..];
        if rest.is_empty() {
            Some(RouteMatch {
                pathname,
                exact: true,
                tail: None,
            })
        } else {
            Some(RouteMatch {
                pathname,
                exact: false,
                tail: Some(format!("/{}", rest.join("/"))),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(m: &RouteMatch, key: &str) -> String {
        m.pathname.get(key).cloned().unwrap_or_default()
    }

    #[test]
    fn test_compile_rejects_malformed_schemas() {
        assert!(RouteSchema::compile("page").is_err());
        assert!(RouteSchema::compile("/page//detail").is_err());
        assert!(RouteSchema::compile("/page/:").is_err());
        assert!(RouteSchema::compile("/page/:?").is_err());
        assert!(RouteSchema::compile("/page/:bad-name").is_err());
        assert!(RouteSchema::compile("/page/").is_err());
    }

    #[test]
    fn test_literal_exact_match() {
        let schema = RouteSchema::compile("/preferences/proxy").unwrap();
        let m = schema.match_path("/preferences/proxy").unwrap();
        assert!(m.exact);
        assert!(m.tail.is_none());
        assert!(schema.match_path("/preferences/other").is_none());
    }

    #[test]
    fn test_capture_segments() {
        let schema = RouteSchema::compile("/page/:id").unwrap();
        let m = schema.match_path("/page/42").unwrap();
        assert!(m.exact);
        assert_eq!(capture(&m, "id"), "42");
    }

    #[test]
    fn test_optional_capture_may_be_absent() {
        let schema = RouteSchema::compile("/entity/:name?").unwrap();

        let without = schema.match_path("/entity").unwrap();
        assert!(without.exact);
        assert!(without.pathname.is_empty());

        let with = schema.match_path("/entity/thing").unwrap();
        assert!(with.exact);
        assert_eq!(capture(&with, "name"), "thing");
    }

    #[test]
    fn test_partial_match_exposes_tail() {
        let schema = RouteSchema::compile("/page/foo").unwrap();
        let m = schema.match_path("/page/foo/bar/bat").unwrap();
        assert!(!m.exact);
        assert_eq!(m.tail.as_deref(), Some("/bar/bat"));
    }

    #[test]
    fn test_root_schema_matches_everything_with_lowest_rank() {
        let root = RouteSchema::compile("/").unwrap();
        assert!(root.match_path("/").unwrap().exact);
        let m = root.match_path("/anything/else").unwrap();
        assert!(!m.exact);
        assert_eq!(m.tail.as_deref(), Some("/anything/else"));
        assert_eq!(root.separator_count(), 0);
        assert!(root.separator_count() < RouteSchema::compile("/page").unwrap().separator_count());
    }

    #[test]
    fn test_specificity_counts_schema_string_separators() {
        // `/page/:unreached` outranks `/page` even when the capture is what
        // makes it longer, because ranking counts the schema string.
        let long = RouteSchema::compile("/page/:id/extra").unwrap();
        let short = RouteSchema::compile("/page").unwrap();
        assert!(long.separator_count() > short.separator_count());
    }
}
