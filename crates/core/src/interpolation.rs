//! Rendering of command argument templates.
//!
//! Every argument is a `leon` template rendered on its own. Placeholders are written
//! `{{ expression }}`; an expression is an operand (a dotted variable path or a quoted
//! literal) followed by any number of `| helper` stages, e.g.
//! `{{ Outputs.token.Stdout | trim | sensitive }}`.

use std::borrow::Cow;
use std::collections::HashMap;

use leon::{Item, Template};
use serde_json::Value;

use crate::command_definitions::{Args, Outputs};
use crate::config::Config;
use crate::error::{Error, Result};

/// Replacement shown for `sensitive` values whenever secrets are hidden.
pub const SENSITIVE_MASK: &str = "********";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// When false, values passed through `sensitive` are replaced with [`SENSITIVE_MASK`].
    pub show_sensitive: bool,
}

impl RenderOptions {
    /// Real values, used to build the process invocation.
    pub const REVEALED: Self = Self {
        show_sensitive: true,
    };
    /// Masked values, used for anything written to a terminal or log.
    pub const REDACTED: Self = Self {
        show_sensitive: false,
    };
}

/// The values a template can see. Exactly one context is used per render.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub config: &'a Config,
    pub args: &'a Args,
    pub outputs: &'a Outputs,
}

impl<'a> TemplateContext<'a> {
    pub fn new(config: &'a Config, args: &'a Args, outputs: &'a Outputs) -> Self {
        Self {
            config,
            args,
            outputs,
        }
    }

    fn lookup(&self, path: &str) -> Option<String> {
        if path == "LocalPort" {
            return Some(self.config.local_port.to_string());
        }

        let (root, rest) = path.split_once('.')?;

        match root {
            "Config" => match rest {
                "LocalPort" => Some(self.config.local_port.to_string()),
                "Verbose" => Some(self.config.verbose.to_string()),
                "Persist" => Some(self.config.persist.to_string()),
                _ => None,
            },
            "Args" => self.args.get(rest).map(ToString::to_string),
            "Outputs" => {
                // IDs may contain dots, the stream name never does
                let (id, stream) = rest.rsplit_once('.')?;
                let output = self.outputs.get(id)?;

                match stream {
                    "Stdout" => Some(output.stdout.clone()),
                    "Stderr" => Some(output.stderr.clone()),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Operand {
    Literal(String),
    Variable(String),
}

#[derive(Debug, PartialEq)]
enum Helper {
    Trim,
    Sensitive,
    Json(String),
}

impl Helper {
    fn parse(stage: &str) -> Result<Self> {
        let (name, argument) = match stage.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, Some(argument.trim())),
            None => (stage, None),
        };

        match (name, argument) {
            ("trim", None) => Ok(Self::Trim),
            ("sensitive", None) => Ok(Self::Sensitive),
            ("json", Some(path)) => Ok(Self::Json(unquote(path, stage)?)),
            ("trim" | "sensitive", Some(_)) => Err(Error::template_expression(
                stage,
                "helper does not take an argument",
            )),
            ("json", None) => Err(Error::template_expression(
                stage,
                "the json helper needs a path argument",
            )),
            (name, _) => Err(Error::UnknownHelper(name.to_string())),
        }
    }

    fn apply(&self, value: String, options: RenderOptions) -> Result<String> {
        match self {
            Self::Trim => Ok(value.trim().to_string()),
            Self::Sensitive if options.show_sensitive => Ok(value),
            Self::Sensitive => Ok(SENSITIVE_MASK.to_string()),
            Self::Json(path) => select_json(&value, path),
        }
    }
}

#[derive(Debug, PartialEq)]
struct Expression {
    operand: Operand,
    helpers: Vec<Helper>,
}

impl Expression {
    fn parse(source: &str) -> Result<Self> {
        let stages = split_pipeline(source)?;
        let (first, rest) = stages
            .split_first()
            .ok_or_else(|| Error::template_expression(source, "empty expression"))?;

        let operand = if first.starts_with('"') {
            Operand::Literal(unquote(first, source)?)
        } else if first.contains(char::is_whitespace) {
            return Err(Error::template_expression(
                source,
                "variable paths may not contain spaces",
            ));
        } else {
            // Go-style `.Args.user` paths are accepted too
            Operand::Variable(first.strip_prefix('.').unwrap_or(*first).to_string())
        };

        let helpers = rest
            .iter()
            .map(|stage| Helper::parse(stage))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { operand, helpers })
    }

    fn evaluate(&self, context: &TemplateContext<'_>, options: RenderOptions) -> Result<String> {
        let mut value = match &self.operand {
            Operand::Literal(literal) => literal.clone(),
            Operand::Variable(path) => context
                .lookup(path)
                .ok_or_else(|| Error::MissingKey(path.clone()))?,
        };

        for helper in &self.helpers {
            value = helper.apply(value, options)?;
        }

        Ok(value)
    }
}

/// Splits an expression on `|` outside of double quotes.
fn split_pipeline(source: &str) -> Result<Vec<&str>> {
    let mut stages = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (index, c) in source.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '|' if !in_quotes => {
                stages.push(source[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(Error::template_expression(source, "unterminated string"));
    }

    stages.push(source[start..].trim());

    if stages.iter().any(|stage| stage.is_empty()) {
        return Err(Error::template_expression(source, "empty pipeline stage"));
    }

    Ok(stages)
}

/// Strips surrounding quotes and resolves `\"` and `\\`. Unquoted text is returned as is.
fn unquote(text: &str, expression: &str) -> Result<String> {
    let Some(inner) = text.strip_prefix('"') else {
        return Ok(text.to_string());
    };
    let inner = inner
        .strip_suffix('"')
        .ok_or_else(|| Error::template_expression(expression, "unterminated string"))?;

    let mut unquoted = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                unquoted.push(next);
            }
        } else {
            unquoted.push(c);
        }
    }

    Ok(unquoted)
}

fn select_json(raw: &str, path: &str) -> Result<String> {
    let document: Value =
        serde_json::from_str(raw).map_err(|e| Error::json_error("template value", e))?;

    let mut current = &document;
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| Error::JsonPath(path.to_string()))?;
    }

    Ok(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Finds the `}}` closing a placeholder body, skipping over quoted literals.
fn find_close(body: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (index, c) in body.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes && body[index..].starts_with(CLOSE) => return Some(index),
            _ => {}
        }
    }

    None
}

/// Splits an argument into literal text and `{{ expression }}` placeholders.
///
/// Single braces are ordinary text, so JSON documents and shell `${VAR}` references pass
/// through untouched.
///
/// # Errors
///
/// Returns an error if a `{{` is never closed.
pub fn parse_template(argument: &str) -> Result<Template<'_>> {
    let mut items = Vec::new();
    let mut rest = argument;

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            items.push(Item::Text(&rest[..start]));
        }

        let body = &rest[start + OPEN.len()..];
        let end = find_close(body)
            .ok_or_else(|| Error::template_expression(argument, "unterminated placeholder"))?;

        items.push(Item::Key(body[..end].trim()));
        rest = &body[end + CLOSE.len()..];
    }

    if !rest.is_empty() {
        items.push(Item::Text(rest));
    }

    Ok(Template {
        items: Cow::Owned(items),
        default: None,
    })
}

pub fn get_templates(arguments: &[String]) -> Result<Vec<Template<'_>>> {
    let mut templates: Vec<Template> = Vec::new();

    for argument in arguments {
        templates.push(parse_template(argument)?);
    }

    Ok(templates)
}

fn render_template(
    template: &Template<'_>,
    context: &TemplateContext<'_>,
    options: RenderOptions,
) -> Result<String> {
    let mut values: HashMap<String, String> = HashMap::new();

    for key in template.keys() {
        let key = key.to_string();
        if values.contains_key(&key) {
            continue;
        }

        let value = Expression::parse(key.trim())?.evaluate(context, options)?;
        values.insert(key, value);
    }

    Ok(template.render(&values)?)
}

/// Renders every argument template against `context`.
///
/// # Errors
///
/// Returns an error if an argument is not a valid template, references an undefined
/// variable or uses an unknown helper. Nothing is rendered partially.
pub fn render_arguments(
    arguments: &[String],
    context: &TemplateContext<'_>,
    options: RenderOptions,
) -> Result<Vec<String>> {
    let templates = get_templates(arguments)?;

    let mut rendered_arguments: Vec<String> = Vec::with_capacity(templates.len());
    for template in &templates {
        rendered_arguments.push(render_template(template, context, options)?);
    }

    Ok(rendered_arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_definitions::Output;

    fn render_one(argument: &str, outputs: &Outputs, options: RenderOptions) -> Result<String> {
        let config = Config {
            local_port: 5432,
            ..Config::default()
        };
        let args = Args::from_iter([("username", "admin"), ("db.name", "orders")]);
        let context = TemplateContext::new(&config, &args, outputs);

        render_arguments(&[argument.to_string()], &context, options).map(|mut v| v.remove(0))
    }

    #[test]
    fn test_sensitive_literal_revealed_and_masked() {
        let outputs = Outputs::default();
        assert_eq!(
            render_one(r#"{{ "secret" | sensitive }}"#, &outputs, RenderOptions::REVEALED).unwrap(),
            "secret"
        );
        assert_eq!(
            render_one(r#"{{ "secret" | sensitive }}"#, &outputs, RenderOptions::REDACTED).unwrap(),
            SENSITIVE_MASK
        );
    }

    #[test]
    fn test_mask_length_is_independent_of_value() {
        let outputs = Outputs::default().with_output(
            "token",
            Output::new("a-very-long-token-value-that-goes-on-and-on", ""),
        );
        let masked = render_one(
            "{{ Outputs.token.Stdout | sensitive }}",
            &outputs,
            RenderOptions::REDACTED,
        )
        .unwrap();
        assert_eq!(masked.len(), 8);
    }

    #[test]
    fn test_variables() {
        let outputs = Outputs::default().with_output("token", Output::new("abc\n", "warn\n"));

        assert_eq!(
            render_one("--port={{Config.LocalPort}}", &outputs, RenderOptions::REVEALED).unwrap(),
            "--port=5432"
        );
        assert_eq!(
            render_one("{{.LocalPort}}", &outputs, RenderOptions::REVEALED).unwrap(),
            "5432"
        );
        assert_eq!(
            render_one("{{ Args.username }}@{{ Args.db.name }}", &outputs, RenderOptions::REVEALED)
                .unwrap(),
            "admin@orders"
        );
        assert_eq!(
            render_one("{{ Outputs.token.Stdout | trim }}", &outputs, RenderOptions::REVEALED)
                .unwrap(),
            "abc"
        );
        assert_eq!(
            render_one("{{ Outputs.token.Stderr }}", &outputs, RenderOptions::REVEALED).unwrap(),
            "warn\n"
        );
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let outputs = Outputs::default();
        let result = render_one("{{ Args.password }}", &outputs, RenderOptions::REVEALED);
        assert!(matches!(result, Err(Error::MissingKey(key)) if key == "Args.password"));

        let result = render_one("{{ Outputs.nope.Stdout }}", &outputs, RenderOptions::REVEALED);
        assert!(matches!(result, Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_unknown_helper() {
        let outputs = Outputs::default();
        let result = render_one(r#"{{ "x" | shout }}"#, &outputs, RenderOptions::REVEALED);
        assert!(matches!(result, Err(Error::UnknownHelper(name)) if name == "shout"));
    }

    #[test]
    fn test_json_helper() {
        let outputs = Outputs::default().with_output(
            "creds",
            Output::new(r#"{"user": "app", "ports": [5432, 6432]}"#, ""),
        );

        assert_eq!(
            render_one(
                "{{ Outputs.creds.Stdout | json user }}",
                &outputs,
                RenderOptions::REVEALED
            )
            .unwrap(),
            "app"
        );
        assert_eq!(
            render_one(
                r#"{{ Outputs.creds.Stdout | json "ports.1" }}"#,
                &outputs,
                RenderOptions::REVEALED
            )
            .unwrap(),
            "6432"
        );
        assert!(matches!(
            render_one(
                "{{ Outputs.creds.Stdout | json password }}",
                &outputs,
                RenderOptions::REVEALED
            ),
            Err(Error::JsonPath(_))
        ));
    }

    #[test]
    fn test_pipe_inside_literal() {
        let outputs = Outputs::default();
        assert_eq!(
            render_one(r#"{{ "a|b" }}"#, &outputs, RenderOptions::REVEALED).unwrap(),
            "a|b"
        );
    }

    #[test]
    fn test_parse_expression() {
        let expression = Expression::parse(r#"Outputs.token.Stdout | trim | json "a b""#).unwrap();
        assert_eq!(
            expression,
            Expression {
                operand: Operand::Variable("Outputs.token.Stdout".to_string()),
                helpers: vec![Helper::Trim, Helper::Json("a b".to_string())],
            }
        );

        assert!(Expression::parse("Args.a |").is_err());
        assert!(Expression::parse(r#""unterminated"#).is_err());
        assert!(Expression::parse("trim extra").is_err());
    }

    #[test]
    fn test_plain_arguments_are_untouched() {
        let outputs = Outputs::default();
        assert_eq!(
            render_one("--host=localhost", &outputs, RenderOptions::REDACTED).unwrap(),
            "--host=localhost"
        );
    }

    #[test]
    fn test_single_braces_are_literal_text() {
        let outputs = Outputs::default();
        assert_eq!(
            render_one(r#"{"Name":"x"}"#, &outputs, RenderOptions::REVEALED).unwrap(),
            r#"{"Name":"x"}"#
        );
        assert_eq!(
            render_one("echo ${HOME}", &outputs, RenderOptions::REVEALED).unwrap(),
            "echo ${HOME}"
        );
        assert_eq!(
            render_one(
                r#"{"user":"{{ Args.username }}"}"#,
                &outputs,
                RenderOptions::REVEALED
            )
            .unwrap(),
            r#"{"user":"admin"}"#
        );
    }

    #[test]
    fn test_unterminated_placeholder_is_an_error() {
        let outputs = Outputs::default();
        assert!(matches!(
            render_one("echo {{.Invalid", &outputs, RenderOptions::REVEALED),
            Err(Error::TemplateExpression { .. })
        ));
    }

    #[test]
    fn test_closing_braces_inside_literal() {
        let outputs = Outputs::default();
        assert_eq!(
            render_one(r#"{{ "a}}b" }}"#, &outputs, RenderOptions::REVEALED).unwrap(),
            "a}}b"
        );
    }
}
