//! Template engines and the dispatch table keyed by [`TemplateEngine`].
//!
//! Every engine renders `(source, data) -> String`, returns an empty string
//! when the data is null, and reports parse/render failures as
//! [`BrickError::InvalidTemplate`] so engine-specific error shapes never leak.
//! Output is never HTML-escaped: rendered text feeds brick inputs, not markup.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use brickline_config::TemplateEngine;
use brickline_types::{BrickError, Result};
use serde_json::Value;

#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    fn engine(&self) -> TemplateEngine;

    /// Parse `source` without rendering it.
    fn check(&self, source: &str) -> Result<()>;

    async fn render(&self, source: &str, data: &Value) -> Result<String>;
}

fn invalid(engine: TemplateEngine, err: impl std::fmt::Display) -> BrickError {
    BrickError::InvalidTemplate {
        engine: engine.to_string(),
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

/// `{{{name}}}` or a plain `{{name}}` tag; sections, partials, comments and
/// delimiter changes are left alone.
static MUSTACHE_TAG_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{\{\{[^}]*\}\}\}|\{\{([^#^/!>&{=}][^}]*)\}\}").unwrap());

/// Rewrite escaped `{{name}}` tags to the unescaped `{{&name}}` form. Text
/// after a set-delimiter tag is kept as written.
fn unescape_mustache(source: &str) -> Cow<'_, str> {
    let (head, tail) = match source.find("{{=") {
        Some(pos) => source.split_at(pos),
        None => (source, ""),
    };
    let rewritten = MUSTACHE_TAG_RE.replace_all(head, |caps: &regex::Captures<'_>| match caps.get(1) {
        Some(name) => format!("{{{{&{}}}}}", name.as_str()),
        None => caps[0].to_string(),
    });
    match rewritten {
        Cow::Borrowed(_) => Cow::Borrowed(source),
        Cow::Owned(mut head) => {
            head.push_str(tail);
            Cow::Owned(head)
        }
    }
}

pub struct MustacheRenderer;

#[async_trait]
impl TemplateRenderer for MustacheRenderer {
    fn engine(&self) -> TemplateEngine {
        TemplateEngine::Mustache
    }

    fn check(&self, source: &str) -> Result<()> {
        mustache::compile_str(source)
            .map(|_| ())
            .map_err(|e| invalid(self.engine(), e))
    }

    async fn render(&self, source: &str, data: &Value) -> Result<String> {
        self.check(source)?;
        if data.is_null() {
            return Ok(String::new());
        }
        let template =
            mustache::compile_str(&unescape_mustache(source)).map_err(|e| invalid(self.engine(), e))?;
        template
            .render_to_string(data)
            .map_err(|e| invalid(self.engine(), e))
    }
}

/// Nunjucks-dialect templates, rendered with the Jinja-compatible minijinja engine.
pub struct NunjucksRenderer {
    env: minijinja::Environment<'static>,
}

impl NunjucksRenderer {
    pub fn new() -> Self {
        let mut env = minijinja::Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Chainable);
        Self { env }
    }
}

impl Default for NunjucksRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateRenderer for NunjucksRenderer {
    fn engine(&self) -> TemplateEngine {
        TemplateEngine::Nunjucks
    }

    fn check(&self, source: &str) -> Result<()> {
        self.env
            .template_from_str(source)
            .map(|_| ())
            .map_err(|e| invalid(self.engine(), e))
    }

    async fn render(&self, source: &str, data: &Value) -> Result<String> {
        self.check(source)?;
        if data.is_null() {
            return Ok(String::new());
        }
        self.env
            .render_str(source, data)
            .map_err(|e| invalid(self.engine(), e))
    }
}

pub struct HandlebarsRenderer {
    registry: handlebars::Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut registry = handlebars::Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateRenderer for HandlebarsRenderer {
    fn engine(&self) -> TemplateEngine {
        TemplateEngine::Handlebars
    }

    fn check(&self, source: &str) -> Result<()> {
        handlebars::Template::compile(source)
            .map(|_| ())
            .map_err(|e| invalid(self.engine(), e))
    }

    async fn render(&self, source: &str, data: &Value) -> Result<String> {
        self.check(source)?;
        if data.is_null() {
            return Ok(String::new());
        }
        self.registry
            .render_template(source, data)
            .map_err(|e| invalid(self.engine(), e))
    }
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

pub struct TemplateRenderers {
    renderers: HashMap<TemplateEngine, Box<dyn TemplateRenderer>>,
}

impl TemplateRenderers {
    /// An empty table; see [`Default`] for one with all built-in engines.
    pub fn new() -> Self {
        Self {
            renderers: HashMap::new(),
        }
    }

    pub fn register(&mut self, renderer: impl TemplateRenderer + 'static) {
        self.renderers.insert(renderer.engine(), Box::new(renderer));
    }

    pub fn get(&self, engine: TemplateEngine) -> Option<&dyn TemplateRenderer> {
        self.renderers.get(&engine).map(|r| r.as_ref())
    }

    pub fn has(&self, engine: TemplateEngine) -> bool {
        self.renderers.contains_key(&engine)
    }

    fn renderer(&self, engine: TemplateEngine) -> Result<&dyn TemplateRenderer> {
        self.get(engine)
            .ok_or_else(|| invalid(engine, "no renderer registered for this engine"))
    }

    pub fn check(&self, engine: TemplateEngine, source: &str) -> Result<()> {
        self.renderer(engine)?.check(source)
    }

    pub async fn render(&self, engine: TemplateEngine, source: &str, data: &Value) -> Result<String> {
        self.renderer(engine)?.render(source, data).await
    }
}

impl Default for TemplateRenderers {
    fn default() -> Self {
        let mut table = Self::new();
        table.register(MustacheRenderer);
        table.register(NunjucksRenderer::new());
        table.register(HandlebarsRenderer::new());
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({"name": "World", "ctx": {"title": "hello"}, "items": ["a", "b"]})
    }

    #[tokio::test]
    async fn mustache_interpolates_dotted_names() {
        let r = TemplateRenderers::default();
        let out = r
            .render(TemplateEngine::Mustache, "Hi {{name}} / {{ctx.title}}", &data())
            .await
            .unwrap();
        assert_eq!(out, "Hi World / hello");
    }

    #[tokio::test]
    async fn nunjucks_supports_filters_and_loops() {
        let r = TemplateRenderers::default();
        let out = r
            .render(
                TemplateEngine::Nunjucks,
                "{{ ctx.title | upper }}:{% for i in items %}{{ i }}{% endfor %}",
                &data(),
            )
            .await
            .unwrap();
        assert_eq!(out, "HELLO:ab");
    }

    #[tokio::test]
    async fn handlebars_supports_blocks() {
        let r = TemplateRenderers::default();
        let out = r
            .render(
                TemplateEngine::Handlebars,
                "{{#each items}}{{this}}{{/each}} {{ctx.title}}",
                &data(),
            )
            .await
            .unwrap();
        assert_eq!(out, "ab hello");
    }

    #[tokio::test]
    async fn missing_variables_render_empty() {
        let r = TemplateRenderers::default();
        for (engine, source) in [
            (TemplateEngine::Mustache, "[{{missing}}]"),
            (TemplateEngine::Nunjucks, "[{{ missing }}]"),
            (TemplateEngine::Handlebars, "[{{missing}}]"),
        ] {
            let out = r.render(engine, source, &data()).await.unwrap();
            assert_eq!(out, "[]", "{engine}");
        }
    }

    #[tokio::test]
    async fn missing_parent_attribute_renders_empty() {
        let r = TemplateRenderers::default();
        let data = json!({"other": 1});
        for (engine, source) in [
            (TemplateEngine::Mustache, "[{{ctx.title}}]"),
            (TemplateEngine::Nunjucks, "[{{ ctx.title }}]"),
            (TemplateEngine::Handlebars, "[{{ctx.title}}]"),
        ] {
            let out = r.render(engine, source, &data).await.unwrap();
            assert_eq!(out, "[]", "{engine}");
        }
    }

    #[tokio::test]
    async fn output_is_not_html_escaped() {
        let r = TemplateRenderers::default();
        let data = json!({"t": "Tom & <Jerry> \"q\""});
        for (engine, source) in [
            (TemplateEngine::Mustache, "{{t}}|{{{t}}}|{{&t}}"),
            (TemplateEngine::Nunjucks, "{{ t }}|{{ t }}|{{ t }}"),
            (TemplateEngine::Handlebars, "{{t}}|{{{t}}}|{{t}}"),
        ] {
            let out = r.render(engine, source, &data).await.unwrap();
            assert_eq!(
                out,
                "Tom & <Jerry> \"q\"|Tom & <Jerry> \"q\"|Tom & <Jerry> \"q\"",
                "{engine}"
            );
        }
    }

    #[test]
    fn mustache_rewrite_keeps_sections_and_delimiters() {
        assert_eq!(
            unescape_mustache("{{#items}}{{ name }}{{/items}}{{! c }}{{>p}}{{{raw}}}"),
            "{{#items}}{{& name }}{{/items}}{{! c }}{{>p}}{{{raw}}}"
        );
        assert_eq!(unescape_mustache("{{a}}{{=<% %>=}}<% b %>{{c}}"), "{{&a}}{{=<% %>=}}<% b %>{{c}}");
        assert!(matches!(unescape_mustache("plain"), Cow::Borrowed(_)));
    }

    #[tokio::test]
    async fn null_data_renders_empty_string_for_every_engine() {
        let r = TemplateRenderers::default();
        for (engine, source) in [
            (TemplateEngine::Mustache, "Hello {{name}}!"),
            (TemplateEngine::Nunjucks, "Hello {{ name.first }}!"),
            (TemplateEngine::Handlebars, "Hello {{#if name}}{{name}}{{/if}}!"),
        ] {
            let out = r.render(engine, source, &Value::Null).await.unwrap();
            assert_eq!(out, "", "{engine}");
        }
    }

    #[tokio::test]
    async fn malformed_templates_normalize_to_invalid_template() {
        let r = TemplateRenderers::default();
        for (engine, source) in [
            (TemplateEngine::Mustache, "{{#section}}never closed"),
            (TemplateEngine::Nunjucks, "{% if x %}never closed"),
            (TemplateEngine::Handlebars, "{{#if x}}never closed"),
        ] {
            let err = r.render(engine, source, &data()).await.unwrap_err();
            match err {
                BrickError::InvalidTemplate { engine: name, .. } => {
                    assert_eq!(name, engine.as_str())
                }
                other => panic!("expected InvalidTemplate for {engine}, got {other:?}"),
            }
            assert!(r.check(engine, source).is_err(), "{engine}");
        }
    }

    #[tokio::test]
    async fn malformed_template_fails_even_with_null_data() {
        let r = TemplateRenderers::default();
        let err = r
            .render(TemplateEngine::Nunjucks, "{{ unclosed", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, BrickError::InvalidTemplate { .. }));
    }

    #[tokio::test]
    async fn unregistered_engine_is_invalid_template() {
        let r = TemplateRenderers::new();
        assert!(!r.has(TemplateEngine::Mustache));
        let err = r
            .render(TemplateEngine::Mustache, "{{x}}", &data())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no renderer registered"), "{err}");
    }
}
