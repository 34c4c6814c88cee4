//! gRPC to HTTP+JSON transcoding.
//!
//! An [`HttpRule`] binds a method to an HTTP verb and a path pattern. Path
//! bindings take the forms:
//!
//! | Binding            | Value                                  | Encoding                     |
//! |--------------------|----------------------------------------|------------------------------|
//! | `{name}`           | any scalar                             | fully escaped, `/` included  |
//! | `{name=*}`         | same as `{name}`                       | fully escaped                |
//! | `{name=**}`        | one or more segments                   | per segment, `/` preserved   |
//! | `{name=shelves/*}` | must match the subpattern              | per segment                  |
//!
//! A pattern may contain at most one `**`. Fields bound in the path are
//! removed from the request; what remains becomes the body or the query
//! string depending on the rule's `body`.

use http::Method;
use serde_json::Value;

use crate::fields;
use crate::GaxError;

/// HTTP binding of one method.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRule {
    pub method: Method,
    pub pattern: String,
    /// `None` for no body, `"*"` for the whole remaining request, otherwise
    /// the request field sent as the body.
    pub body: Option<String>,
    /// Tried in order after this rule's own pattern.
    pub additional_bindings: Vec<HttpRule>,
}

impl HttpRule {
    pub fn new(method: Method, pattern: impl Into<String>) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            body: None,
            additional_bindings: Vec::new(),
        }
    }

    pub fn get(pattern: impl Into<String>) -> Self {
        Self::new(Method::GET, pattern)
    }

    pub fn post(pattern: impl Into<String>) -> Self {
        Self::new(Method::POST, pattern)
    }

    pub fn put(pattern: impl Into<String>) -> Self {
        Self::new(Method::PUT, pattern)
    }

    pub fn patch(pattern: impl Into<String>) -> Self {
        Self::new(Method::PATCH, pattern)
    }

    pub fn delete(pattern: impl Into<String>) -> Self {
        Self::new(Method::DELETE, pattern)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_binding(mut self, binding: HttpRule) -> Self {
        self.additional_bindings.push(binding);
        self
    }

    /// Check this rule and its additional bindings.
    pub fn validate(&self) -> Result<(), GaxError> {
        if !self.pattern.starts_with('/') {
            return Err(GaxError::Config(format!(
                "path pattern {} must start with '/'",
                self.pattern
            )));
        }
        if deep_wildcards(&self.pattern) > 1 {
            return Err(GaxError::Config(format!(
                "path pattern {} has more than one '**'",
                self.pattern
            )));
        }
        self.additional_bindings.iter().try_for_each(HttpRule::validate)
    }

    /// This rule followed by its additional bindings, depth first.
    fn candidates(&self) -> Vec<&HttpRule> {
        let mut out = vec![self];
        for binding in &self.additional_bindings {
            out.extend(binding.candidates());
        }
        out
    }
}

fn deep_wildcards(pattern: &str) -> usize {
    pattern.matches("**").count()
}

/// Result of matching a request against a path pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathMatch {
    pub url: String,
    /// Bound field paths, as written in the pattern.
    pub matched_fields: Vec<String>,
}

/// Expand `pattern` with values from `request`.
///
/// Returns `None` when a bound field is missing, empty or not a scalar, when
/// a value does not fit its subpattern, or when the pattern is malformed.
pub fn match_pattern(request: &Value, pattern: &str) -> Option<PathMatch> {
    if deep_wildcards(pattern) > 1 {
        return None;
    }
    let mut url = String::with_capacity(pattern.len());
    let mut matched_fields = Vec::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        url.push_str(&rest[..open]);
        let close = open + rest[open..].find('}')?;
        let binding = &rest[open + 1..close];
        let (field, subpattern) = match binding.split_once('=') {
            Some((field, subpattern)) => (field.trim(), subpattern.trim()),
            None => (binding.trim(), "*"),
        };
        let value = fields::get_field(request, field)
            .and_then(fields::scalar_to_string)
            .filter(|value| !value.is_empty())?;
        url.push_str(&bind(&value, subpattern)?);
        matched_fields.push(field.to_string());
        rest = &rest[close + 1..];
    }
    url.push_str(rest);
    Some(PathMatch {
        url,
        matched_fields,
    })
}

fn bind(value: &str, subpattern: &str) -> Option<String> {
    match subpattern {
        "*" => Some(urlencoding::encode(value).into_owned()),
        "**" => Some(encode_segments(value.split('/'))),
        _ => {
            let pattern: Vec<&str> = subpattern.split('/').collect();
            let segments: Vec<&str> = value.split('/').collect();
            segments_match(&pattern, &segments).then(|| encode_segments(segments.into_iter()))
        }
    }
}

fn encode_segments<'a>(segments: impl Iterator<Item = &'a str>) -> String {
    segments
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `*` matches one non-empty segment, `**` one or more.
fn segments_match(pattern: &[&str], segments: &[&str]) -> bool {
    match pattern.split_first() {
        None => segments.is_empty(),
        Some((&"**", rest)) => (1..=segments.len()).any(|n| segments_match(rest, &segments[n..])),
        Some((&"*", rest)) => segments
            .split_first()
            .is_some_and(|(segment, tail)| !segment.is_empty() && segments_match(rest, tail)),
        Some((literal, rest)) => segments
            .split_first()
            .is_some_and(|(segment, tail)| segment == literal && segments_match(rest, tail)),
    }
}

/// An HTTP request derived from an RPC request.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscodedRequest {
    pub method: Method,
    pub url: String,
    /// Percent-encoded, without the leading `?`. Empty when nothing remains.
    pub query_string: String,
    pub body: Option<Value>,
}

/// Transcode `request` with the first rule whose pattern matches.
///
/// Rules are tried in order, each followed by its additional bindings.
pub fn transcode(request: &Value, rules: &[HttpRule]) -> Option<TranscodedRequest> {
    rules
        .iter()
        .flat_map(HttpRule::candidates)
        .find_map(|rule| apply(request, rule))
}

fn apply(request: &Value, rule: &HttpRule) -> Option<TranscodedRequest> {
    let PathMatch {
        url,
        matched_fields,
    } = match_pattern(request, &rule.pattern)?;

    let mut remaining = request.clone();
    for field in &matched_fields {
        fields::remove_field(&mut remaining, field);
    }

    let (body, query_string) = match rule.body.as_deref() {
        Some("*") => (Some(remaining), String::new()),
        Some(field) => {
            let body = fields::remove_field(&mut remaining, field);
            (body, query_string(&remaining))
        }
        None => (None, query_string(&remaining)),
    };

    Some(TranscodedRequest {
        method: rule.method.clone(),
        url,
        query_string,
        body,
    })
}

/// Flatten into dotted query parameters; arrays repeat their key.
fn query_string(remaining: &Value) -> String {
    let mut params = Vec::new();
    flatten("", remaining, &mut params);
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&key, child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten(prefix, item, out);
            }
        }
        scalar => {
            if let Some(text) = fields::scalar_to_string(scalar) {
                out.push((prefix.to_string(), text));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_match_subpattern() {
        let matched = match_pattern(&json!({"name": "shelves/1"}), "/v1/{name=shelves/*}/books").unwrap();
        assert_eq!(matched.url, "/v1/shelves/1/books");
        assert_eq!(matched.matched_fields, vec!["name"]);

        assert!(match_pattern(&json!({"name": "other/1"}), "/v1/{name=shelves/*}/books").is_none());
        assert!(match_pattern(&json!({"name": "shelves/1/x"}), "/v1/{name=shelves/*}").is_none());
        assert!(match_pattern(&json!({}), "/v1/{name=shelves/*}").is_none());
    }

    #[test]
    fn test_match_simple_binding_escapes_slashes() {
        let request = json!({"shelf": "fiction/sci fi", "bookId": 42});
        let matched = match_pattern(&request, "/v1/shelves/{shelf}/books/{book_id}").unwrap();
        assert_eq!(matched.url, "/v1/shelves/fiction%2Fsci%20fi/books/42");
        assert_eq!(matched.matched_fields, vec!["shelf", "book_id"]);
    }

    #[test]
    fn test_match_deep_wildcard_keeps_slashes() {
        let request = json!({"name": "projects/p/objects/a b/c"});
        let matched = match_pattern(&request, "/v1/{name=projects/*/objects/**}:get").unwrap();
        assert_eq!(matched.url, "/v1/projects/p/objects/a%20b/c:get");

        let matched = match_pattern(&request, "/v1/{name=**}").unwrap();
        assert_eq!(matched.url, "/v1/projects/p/objects/a%20b/c");

        assert!(match_pattern(&request, "/v1/{name=**}/{other=**}").is_none());
    }

    #[test]
    fn test_match_nested_field() {
        let request = json!({"book": {"name": "shelves/1/books/2"}});
        let matched = match_pattern(&request, "/v1/{book.name=shelves/*/books/*}").unwrap();
        assert_eq!(matched.url, "/v1/shelves/1/books/2");
        assert_eq!(matched.matched_fields, vec!["book.name"]);
    }

    #[test]
    fn test_transcode_get_with_query() {
        let request = json!({
            "parent": "shelves/1",
            "pageSize": 10,
            "filter": "author=Le Guin",
            "labels": ["a", "b"],
            "options": {"view": "FULL", "unset": null},
        });
        let rules = [HttpRule::get("/v1/{parent=shelves/*}/books")];
        let transcoded = transcode(&request, &rules).unwrap();
        assert_eq!(transcoded.method, Method::GET);
        assert_eq!(transcoded.url, "/v1/shelves/1/books");
        assert!(transcoded.body.is_none());
        assert_eq!(
            transcoded.query_string,
            "filter=author%3DLe%20Guin&labels=a&labels=b&options.view=FULL&pageSize=10"
        );
    }

    #[test]
    fn test_transcode_wildcard_body() {
        let request = json!({"parent": "shelves/1", "book": {"title": "Dune"}, "validate": true});
        let rules = [HttpRule::post("/v1/{parent=shelves/*}/books").with_body("*")];
        let transcoded = transcode(&request, &rules).unwrap();
        assert_eq!(transcoded.query_string, "");
        assert_eq!(
            transcoded.body,
            Some(json!({"book": {"title": "Dune"}, "validate": true}))
        );
    }

    #[test]
    fn test_transcode_named_body_field() {
        let request = json!({"parent": "shelves/1", "book": {"title": "Dune"}, "validate": true});
        let rules = [HttpRule::post("/v1/{parent=shelves/*}/books").with_body("book")];
        let transcoded = transcode(&request, &rules).unwrap();
        assert_eq!(transcoded.body, Some(json!({"title": "Dune"})));
        assert_eq!(transcoded.query_string, "validate=true");
    }

    #[test]
    fn test_transcode_additional_bindings() {
        let rules = [HttpRule::get("/v1/{name=shelves/*/books/*}")
            .with_binding(HttpRule::get("/v1/{name=archives/*/books/*}"))];
        let transcoded = transcode(&json!({"name": "archives/a/books/b"}), &rules).unwrap();
        assert_eq!(transcoded.url, "/v1/archives/a/books/b");

        assert!(transcode(&json!({"name": "vaults/a"}), &rules).is_none());
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = [
            HttpRule::delete("/v1/{name=shelves/*}"),
            HttpRule::delete("/v1/{name=**}"),
        ];
        let transcoded = transcode(&json!({"name": "shelves/1"}), &rules).unwrap();
        assert_eq!(transcoded.url, "/v1/shelves/1");
        let transcoded = transcode(&json!({"name": "a/b/c"}), &rules).unwrap();
        assert_eq!(transcoded.url, "/v1/a/b/c");
    }

    #[test]
    fn test_validate() {
        assert!(HttpRule::get("/v1/{name=**}").validate().is_ok());
        assert!(HttpRule::get("/v1/{a=**}/{b=**}").validate().is_err());
        assert!(HttpRule::get("v1/{name}").validate().is_err());
        assert!(HttpRule::get("/v1/{name}")
            .with_binding(HttpRule::get("/{a=**}/x/{b=**}"))
            .validate()
            .is_err());
    }
}
