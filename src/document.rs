//! Parsed API contract documents.
//!
//! Source text is accepted as YAML or JSON and normalized into a
//! `serde_json::Value` tree that keeps declaration order, so routes and
//! operations are visited in the order the author wrote them.

use crate::error::ParseError;
use serde_json::{Map, Value};

/// Operation keys allowed under a path item.
pub const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Path item fields that are not operations.
pub const PATH_ITEM_FIELDS: [&str; 5] = ["parameters", "summary", "description", "servers", "$ref"];

const MAX_REF_HOPS: usize = 8;

#[derive(Debug, Clone)]
pub struct Document {
    source: String,
    root: Value,
}

impl Document {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let trimmed = source.trim_start();
        let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');
        // Flow-style YAML also starts with a brace, so JSON failures fall through.
        let root = match looks_like_json.then(|| serde_json::from_str::<Value>(source)) {
            Some(Ok(root)) => root,
            _ => parse_yaml(source)?,
        };

        if !root.is_object() {
            return Err(ParseError::new(
                "document root must be a mapping of contract fields",
                None,
            ));
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Wraps an already parsed tree. Line lookups return `None`.
    pub fn from_value(root: Value) -> Self {
        Self {
            source: String::new(),
            root,
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn paths(&self) -> Option<&Map<String, Value>> {
        self.root.get("paths").and_then(Value::as_object)
    }

    /// Routes in declaration order.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.paths()
            .into_iter()
            .flat_map(|paths| paths.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Known-method operations of a path item, in declaration order.
    pub fn operations(path_item: &Value) -> impl Iterator<Item = (&str, &Value)> {
        path_item
            .as_object()
            .into_iter()
            .flat_map(|item| item.iter())
            .filter(|(k, _)| HTTP_METHODS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Follows local `#/...` references. Unresolvable references are
    /// returned unchanged.
    pub fn resolve<'a>(&'a self, value: &'a Value) -> &'a Value {
        let mut current = value;
        for _ in 0..MAX_REF_HOPS {
            let Some(pointer) = current
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix('#'))
            else {
                break;
            };
            match self.root.pointer(pointer) {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    /// 1-based line of the first mapping key named `key` at or after `from`.
    pub fn find_key_line(&self, key: &str, from: usize) -> Option<usize> {
        self.source
            .lines()
            .enumerate()
            .skip(from.saturating_sub(1))
            .find(|(_, line)| starts_with_key(line, key))
            .map(|(i, _)| i + 1)
    }

    /// 1-based line of `key` as a direct child of the mapping key `parent`
    /// declared on `parent_line`. The search stays inside the parent's block
    /// and only looks at the first indentation level below it.
    pub fn find_child_line(
        &self,
        parent: &str,
        parent_line: usize,
        key: &str,
    ) -> Option<usize> {
        let lines: Vec<&str> = self.source.lines().collect();
        let header = lines.get(parent_line.checked_sub(1)?)?;
        if inline_child(header, parent, key) {
            return Some(parent_line);
        }

        let parent_indent = indentation(header);
        let mut child_indent = None;
        for (i, line) in lines.iter().enumerate().skip(parent_line) {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let indent = indentation(line);
            if indent <= parent_indent {
                break;
            }
            let level = *child_indent.get_or_insert(indent);
            if indent == level && starts_with_key(line, key) {
                return Some(i + 1);
            }
        }
        None
    }

    pub fn line_of_route(&self, route: &str) -> Option<usize> {
        let paths_line = self.find_key_line("paths", 1)?;
        self.find_child_line("paths", paths_line, route)
    }

    pub fn line_of_operation(&self, route: &str, method: &str) -> Option<usize> {
        let route_line = self.line_of_route(route)?;
        self.find_child_line(route, route_line, method)
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Whether `line` opens with the mapping key `key`, plain or quoted.
fn starts_with_key(line: &str, key: &str) -> bool {
    let t = line
        .trim_start()
        .trim_start_matches("- ")
        .trim_start_matches('{')
        .trim_start();
    [
        format!("{}:", key),
        format!("\"{}\":", key),
        format!("\"{}\" :", key),
        format!("'{}':", key),
    ]
    .iter()
    .any(|form| t.starts_with(form.as_str()))
}

/// Whether `key` appears as a flow-mapping child after `parent` on the same
/// line, as in single-line JSON or YAML flow documents.
fn inline_child(line: &str, parent: &str, key: &str) -> bool {
    let forms = [
        format!("\"{}\"", parent),
        format!("'{}'", parent),
        parent.to_string(),
    ];
    let Some(rest) = forms
        .iter()
        .find_map(|form| line.find(form.as_str()).map(|at| &line[at + form.len()..]))
    else {
        return false;
    };
    let Some(body) = rest.trim_start().strip_prefix(':').map(str::trim_start) else {
        return false;
    };
    if !body.starts_with('{') {
        return false;
    }
    [
        format!("{{\"{}\"", key),
        format!(", \"{}\"", key),
        format!(",\"{}\"", key),
        format!("{{ \"{}\"", key),
        format!("{{{}:", key),
        format!("{{ {}:", key),
        format!(", {}:", key),
        format!("'{}'", key),
    ]
    .iter()
    .any(|form| body.contains(form.as_str()))
}

/// `"{route} [{METHOD}]"`, the location label used for operation findings.
pub fn operation_label(route: &str, method: &str) -> String {
    format!("{} [{}]", route, method.to_uppercase())
}

fn parse_yaml(source: &str) -> Result<Value, ParseError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(source)
        .map_err(|e| ParseError::new(e.to_string(), e.location().map(|loc| loc.line())))?;
    yaml_to_json(yaml)
}

fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, ParseError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(seq) => Value::Array(
            seq.into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut out = Map::new();
            for (k, v) in mapping {
                out.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, ParseError> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => yaml_key(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(ParseError::new(
            "mapping keys must be scalars",
            None,
        )),
    }
}
