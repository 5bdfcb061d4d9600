//! Response body templating for replayed snapshots.
//!
//! Stored bodies may embed actions between `${{` and `}}` that read from the
//! live request being answered:
//!
//! - `${{ .Request.JSON "user.id" }}` - value at a dotted (or `$`-rooted) path in the JSON body
//! - `${{ .Request.Header "Content-Type" }}` - first value of a header
//! - `${{ .Request.Form "name" }}` - urlencoded form field, falling back to the query
//! - `${{ .Request.Query "page" }}` - query parameter
//! - `${{ .Request.URL }}` - the full request URL (`.Path`, `.Host`, `.Scheme`, `.RawQuery` select a part)
//! - `${{ .Request.Body }}` - the raw request body
//!
//! Lookups that find nothing render as the empty string.

use crate::query::{first_value, parse_query_string};
use crate::rules::compare::to_json_path;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{HeaderMap, Request, Uri};
use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::sync::OnceLock;
use thiserror::Error;

pub const OPEN_DELIM: &str = "${{";
pub const CLOSE_DELIM: &str = "}}";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

static ACTION_REGEX: OnceLock<Regex> = OnceLock::new();

fn action_regex() -> &'static Regex {
    ACTION_REGEX.get_or_init(|| {
        Regex::new(
            r#"^\s*\.Request\.(JSON|Header|Form|Query|URL|Body)(?:\.(Path|Host|Scheme|RawQuery))?(?:\s+"((?:[^"\\]|\\.)*)")?\s*$"#,
        )
        .unwrap()
    })
}

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),

    #[error("unknown template action: {0}")]
    UnknownAction(String),

    #[error("{0} requires a quoted string argument")]
    MissingArgument(String),

    #[error("{0} does not take an argument")]
    UnexpectedArgument(String),
}

/// The live request as seen by template actions.
#[derive(Debug, Clone)]
pub struct RequestTemplateVars {
    body: Bytes,
    form: Vec<(String, String)>,
    header: HeaderMap,
    url: Uri,
}

impl RequestTemplateVars {
    pub fn from_request(req: &Request<Bytes>) -> Self {
        let query = parse_query_string(req.uri().query().unwrap_or_default());

        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE));

        // Body fields come before query fields, so they win on lookup.
        let mut form = if is_form {
            parse_query_string(&String::from_utf8_lossy(req.body()))
        } else {
            Vec::new()
        };
        form.extend(query);

        Self {
            body: req.body().clone(),
            form,
            header: req.headers().clone(),
            url: req.uri().clone(),
        }
    }

    pub fn json(&self, path: &str) -> String {
        let Ok(document) = serde_json::from_slice::<Value>(&self.body) else {
            return String::new();
        };
        let Ok(json_path) = JsonPath::parse(&to_json_path(path)) else {
            return String::new();
        };
        match json_path.query(&document).first() {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn header(&self, key: &str) -> String {
        self.header
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    pub fn form(&self, key: &str) -> String {
        first_value(&self.form, key).to_string()
    }

    pub fn query(&self, key: &str) -> String {
        let pairs = parse_query_string(self.url.query().unwrap_or_default());
        first_value(&pairs, key).to_string()
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn url_part(&self, part: &str) -> String {
        match part {
            "Path" => self.url.path().to_string(),
            "Host" => self
                .url
                .authority()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            "Scheme" => self.url.scheme_str().unwrap_or_default().to_string(),
            "RawQuery" => self.url.query().unwrap_or_default().to_string(),
            _ => String::new(),
        }
    }

    fn eval(&self, action: &str) -> Result<String, TemplateError> {
        let caps = action_regex()
            .captures(action)
            .ok_or_else(|| TemplateError::UnknownAction(action.trim().to_string()))?;

        let name = &caps[1];
        let field = caps.get(2).map(|m| m.as_str());
        let arg = caps.get(3).map(|m| unquote(m.as_str()));

        if field.is_some() && name != "URL" {
            return Err(TemplateError::UnknownAction(action.trim().to_string()));
        }

        let required = |arg: Option<String>| {
            arg.ok_or_else(|| TemplateError::MissingArgument(format!(".Request.{name}")))
        };

        match name {
            "JSON" => Ok(self.json(&required(arg)?)),
            "Header" => Ok(self.header(&required(arg)?)),
            "Form" => Ok(self.form(&required(arg)?)),
            "Query" => Ok(self.query(&required(arg)?)),
            "URL" | "Body" if arg.is_some() => {
                Err(TemplateError::UnexpectedArgument(format!(".Request.{name}")))
            }
            "URL" => Ok(match field {
                Some(part) => self.url_part(part),
                None => self.url.to_string(),
            }),
            "Body" => Ok(self.body()),
            _ => Err(TemplateError::UnknownAction(action.trim().to_string())),
        }
    }
}

fn unquote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Render every `${{ }}` action in `template` against `vars`.
pub fn render(template: &str, vars: &RequestTemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN_DELIM) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN_DELIM.len()..];
        let end = after_open
            .find(CLOSE_DELIM)
            .ok_or(TemplateError::Unclosed(offset + start))?;

        out.push_str(&vars.eval(&after_open[..end])?);

        let consumed = start + OPEN_DELIM.len() + end + CLOSE_DELIM.len();
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Whether `s` contains anything to render.
pub fn has_template_actions(s: &str) -> bool {
    s.contains(OPEN_DELIM)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(uri: &str, content_type: Option<&str>, body: &str) -> RequestTemplateVars {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        let req = builder.body(Bytes::from(body.to_string())).unwrap();
        RequestTemplateVars::from_request(&req)
    }

    #[test]
    fn test_render_json() {
        let v = vars(
            "https://example.com",
            Some("application/json"),
            r#"{"hello": "json", "n": 3, "obj": {"a": [1, 2]}, "nil": null}"#,
        );
        assert_eq!(render(r#"${{ .Request.JSON "hello" }}"#, &v).unwrap(), "json");
        assert_eq!(
            render(r#"{"hello":"${{ .Request.JSON "hello" }}"}"#, &v).unwrap(),
            r#"{"hello":"json"}"#
        );
        assert_eq!(render(r#"${{ .Request.JSON "n" }}"#, &v).unwrap(), "3");
        assert_eq!(render(r#"${{ .Request.JSON "obj.a.1" }}"#, &v).unwrap(), "2");
        assert_eq!(render(r#"${{.Request.JSON "obj"}}"#, &v).unwrap(), r#"{"a":[1,2]}"#);
        assert_eq!(render(r#"[${{ .Request.JSON "nil" }}]"#, &v).unwrap(), "[]");
        assert_eq!(render(r#"[${{ .Request.JSON "missing" }}]"#, &v).unwrap(), "[]");
    }

    #[test]
    fn test_render_json_with_invalid_body() {
        let v = vars("https://example.com", None, "not json");
        assert_eq!(render(r#"<${{ .Request.JSON "a" }}>"#, &v).unwrap(), "<>");
    }

    #[test]
    fn test_render_header() {
        let v = vars("https://example.com", Some("application/json"), "{}");
        assert_eq!(
            render(r#"${{ .Request.Header "Content-Type" }}"#, &v).unwrap(),
            "application/json"
        );
        assert_eq!(render(r#"${{ .Request.Header "X-None" }}"#, &v).unwrap(), "");
    }

    #[test]
    fn test_render_form() {
        let v = vars(
            "https://example.com/?hello=query&only=q",
            Some("application/x-www-form-urlencoded"),
            "hello=form&name=two+words",
        );
        assert_eq!(render(r#"${{ .Request.Form "hello" }}"#, &v).unwrap(), "form");
        assert_eq!(render(r#"${{ .Request.Form "name" }}"#, &v).unwrap(), "two words");
        assert_eq!(render(r#"${{ .Request.Form "only" }}"#, &v).unwrap(), "q");
    }

    #[test]
    fn test_form_ignores_non_form_body() {
        let v = vars("https://example.com/", Some("text/plain"), "hello=form");
        assert_eq!(render(r#"${{ .Request.Form "hello" }}"#, &v).unwrap(), "");
    }

    #[test]
    fn test_render_query_url_and_body() {
        let v = vars("https://example.com/search?hello=query", None, "raw body");
        assert_eq!(render(r#"${{ .Request.Query "hello" }}"#, &v).unwrap(), "query");
        assert_eq!(
            render("${{ .Request.URL }}", &v).unwrap(),
            "https://example.com/search?hello=query"
        );
        assert_eq!(render("${{ .Request.URL.Path }}", &v).unwrap(), "/search");
        assert_eq!(render("${{ .Request.URL.Host }}", &v).unwrap(), "example.com");
        assert_eq!(render("${{ .Request.URL.RawQuery }}", &v).unwrap(), "hello=query");
        assert_eq!(render("${{ .Request.Body }}!", &v).unwrap(), "raw body!");
    }

    #[test]
    fn test_render_without_actions() {
        let v = vars("https://example.com", None, "");
        let plain = r#"{"static": "value", "braces": "{{ not an action }}"}"#;
        assert!(!has_template_actions(plain));
        assert_eq!(render(plain, &v).unwrap(), plain);
    }

    #[test]
    fn test_escaped_argument() {
        let v = vars(
            "https://example.com",
            Some("application/json"),
            r#"{"say \"hi\"": "quoted"}"#,
        );
        assert_eq!(
            render(r#"${{ .Request.JSON "$['say \"hi\"']" }}"#, &v).unwrap(),
            "quoted"
        );
    }

    #[test]
    fn test_render_errors() {
        let v = vars("https://example.com", None, "");
        assert_eq!(
            render("ok ${{ .Request.Body", &v),
            Err(TemplateError::Unclosed(3))
        );
        assert!(matches!(
            render("${{ .Response.Body }}", &v),
            Err(TemplateError::UnknownAction(_))
        ));
        assert!(matches!(
            render("${{ .Request.Header }}", &v),
            Err(TemplateError::MissingArgument(_))
        ));
        assert!(matches!(
            render(r#"${{ .Request.Body "x" }}"#, &v),
            Err(TemplateError::UnexpectedArgument(_))
        ));
        assert!(matches!(
            render("${{ .Request.Header.Path }}", &v),
            Err(TemplateError::UnknownAction(_))
        ));
    }
}
