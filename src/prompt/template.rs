//! Minimal text-template engine.
//!
//! Supports exactly three constructs: `{{var}}` substitution,
//! `{{#if var}}...{{/if}}`, and `{{#if var}}...{{else}}...{{/if}}`.
//! Conditionals resolve innermost-first in a fixpoint loop bounded at
//! ten iterations; variables substitute last. Missing variables render
//! as `[name]` with a warning instead of failing.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bound on conditional-resolution passes.
pub const MAX_CONDITIONAL_ITERATIONS: usize = 10;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("variable regex should compile")
});

/// A rendered template plus any non-fatal warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedTemplate {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Fatal template failure; the caller substitutes fallback content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateError {
    /// A `{{/if}}` or `{{else}}` with no matching `{{#if}}`.
    Unbalanced { marker: String },
    /// Conditionals still present after the iteration bound.
    IterationLimit,
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbalanced { marker } => write!(f, "unbalanced template marker: {}", marker),
            Self::IterationLimit => write!(
                f,
                "conditionals unresolved after {} iterations",
                MAX_CONDITIONAL_ITERATIONS
            ),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Render a template against a variable map.
pub fn render(
    template: &str,
    vars: &BTreeMap<String, String>,
) -> Result<RenderedTemplate, TemplateError> {
    let mut text = template.to_string();
    let mut warnings = Vec::new();

    for _ in 0..MAX_CONDITIONAL_ITERATIONS {
        match resolve_innermost_conditional(&text, vars)? {
            Some(next) => text = next,
            None => break,
        }
    }
    if text.contains("{{#if") || text.contains("{{/if}}") || text.contains("{{else}}") {
        return Err(TemplateError::IterationLimit);
    }

    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in VAR_RE.captures_iter(&text) {
        let whole = caps.get(0).expect("regex always has group 0");
        let name = &caps[1];
        out.push_str(&text[last_end..whole.start()]);
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => {
                warnings.push(format!("missing template variable: {}", name));
                out.push('[');
                out.push_str(name);
                out.push(']');
            }
        }
        last_end = whole.end();
    }
    out.push_str(&text[last_end..]);

    Ok(RenderedTemplate {
        text: out,
        warnings,
    })
}

/// Resolve one innermost conditional block, or return `None` when no
/// conditionals remain.
fn resolve_innermost_conditional(
    text: &str,
    vars: &BTreeMap<String, String>,
) -> Result<Option<String>, TemplateError> {
    let close = match text.find("{{/if}}") {
        Some(pos) => pos,
        None => {
            if text.contains("{{#if") {
                return Err(TemplateError::Unbalanced {
                    marker: "{{#if}}".to_string(),
                });
            }
            return Ok(None);
        }
    };

    // The last opener before the first closer delimits an innermost block.
    let open = match text[..close].rfind("{{#if ") {
        Some(pos) => pos,
        None => {
            return Err(TemplateError::Unbalanced {
                marker: "{{/if}}".to_string(),
            })
        }
    };

    let after_open = &text[open + "{{#if ".len()..close];
    let name_end = match after_open.find("}}") {
        Some(pos) => pos,
        None => {
            return Err(TemplateError::Unbalanced {
                marker: "{{#if".to_string(),
            })
        }
    };
    let name = after_open[..name_end].trim();
    let body = &after_open[name_end + 2..];

    let (then_branch, else_branch) = match body.find("{{else}}") {
        Some(pos) => (&body[..pos], &body[pos + "{{else}}".len()..]),
        None => (body, ""),
    };

    let chosen = if is_truthy(vars.get(name).map(String::as_str)) {
        then_branch
    } else {
        else_branch
    };

    let mut next = String::with_capacity(text.len());
    next.push_str(&text[..open]);
    next.push_str(chosen);
    next.push_str(&text[close + "{{/if}}".len()..]);
    Ok(Some(next))
}

fn is_truthy(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !v.is_empty() && v != "false" && v != "0",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_plain_substitution() {
        let rendered = render("hello {{name}}", &vars(&[("name", "world")])).unwrap();
        assert_eq!(rendered.text, "hello world");
        assert!(rendered.warnings.is_empty());
    }

    #[test]
    fn test_missing_variable_renders_bracketed() {
        let rendered = render("hello {{name}}", &vars(&[])).unwrap();
        assert_eq!(rendered.text, "hello [name]");
        assert_eq!(rendered.warnings.len(), 1);
        assert!(rendered.warnings[0].contains("name"));
    }

    #[test]
    fn test_if_true() {
        let rendered = render(
            "a{{#if flag}}yes{{/if}}b",
            &vars(&[("flag", "true")]),
        )
        .unwrap();
        assert_eq!(rendered.text, "ayesb");
    }

    #[test]
    fn test_if_false_and_falsy_values() {
        for v in [
            vars(&[]),
            vars(&[("flag", "")]),
            vars(&[("flag", "false")]),
            vars(&[("flag", "0")]),
        ] {
            let rendered = render("a{{#if flag}}yes{{/if}}b", &v).unwrap();
            assert_eq!(rendered.text, "ab");
        }
    }

    #[test]
    fn test_if_else() {
        let rendered = render(
            "{{#if flag}}yes{{else}}no{{/if}}",
            &vars(&[("flag", "1")]),
        )
        .unwrap();
        assert_eq!(rendered.text, "yes");

        let rendered = render("{{#if flag}}yes{{else}}no{{/if}}", &vars(&[])).unwrap();
        assert_eq!(rendered.text, "no");
    }

    #[test]
    fn test_nested_conditionals_innermost_first() {
        let template = "{{#if outer}}O[{{#if inner}}I{{else}}i{{/if}}]{{else}}none{{/if}}";
        let rendered = render(template, &vars(&[("outer", "y"), ("inner", "y")])).unwrap();
        assert_eq!(rendered.text, "O[I]");

        let rendered = render(template, &vars(&[("outer", "y")])).unwrap();
        assert_eq!(rendered.text, "O[i]");

        let rendered = render(template, &vars(&[("inner", "y")])).unwrap();
        assert_eq!(rendered.text, "none");
    }

    #[test]
    fn test_conditional_body_with_variables() {
        let rendered = render(
            "{{#if repo}}repo: {{repo}}{{/if}}",
            &vars(&[("repo", "django/django")]),
        )
        .unwrap();
        assert_eq!(rendered.text, "repo: django/django");
    }

    #[test]
    fn test_unbalanced_close() {
        let err = render("a{{/if}}b", &vars(&[])).unwrap_err();
        assert!(matches!(err, TemplateError::Unbalanced { .. }));
    }

    #[test]
    fn test_unbalanced_open() {
        let err = render("a{{#if flag}}b", &vars(&[("flag", "1")])).unwrap_err();
        assert!(matches!(err, TemplateError::Unbalanced { .. }));
    }

    #[test]
    fn test_iteration_limit() {
        // Eleven nested conditionals exceed the ten-pass bound.
        let mut template = String::new();
        for _ in 0..11 {
            template.push_str("{{#if f}}");
        }
        template.push('x');
        for _ in 0..11 {
            template.push_str("{{/if}}");
        }
        let err = render(&template, &vars(&[("f", "1")])).unwrap_err();
        assert_eq!(err, TemplateError::IterationLimit);
    }

    #[test]
    fn test_deeply_nested_within_limit() {
        let mut template = String::new();
        for _ in 0..9 {
            template.push_str("{{#if f}}");
        }
        template.push('x');
        for _ in 0..9 {
            template.push_str("{{/if}}");
        }
        let rendered = render(&template, &vars(&[("f", "1")])).unwrap();
        assert_eq!(rendered.text, "x");
    }
}
