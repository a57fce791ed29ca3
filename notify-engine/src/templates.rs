//! Template rendering and template CRUD.
//!
//! Templates are logic-less handlebars (`{{var}}`, `{{#if}}`, `{{#each}}`).
//! Text parts render without escaping; the HTML body is HTML-escaped.
//! Missing keys render as the empty string.

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use notify_core::store::{NotificationRepository, TemplateRepository};
use notify_core::{
    Channel, Clock, DataMap, DispatchError, DispatchResult, NotificationType, Template,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub text: String,
    pub html: Option<String>,
}

pub struct TemplateRenderer {
    text: Handlebars<'static>,
    html: Handlebars<'static>,
    dotted_reference: Regex,
}

impl TemplateRenderer {
    pub fn new() -> DispatchResult<Self> {
        let mut text = Handlebars::new();
        text.register_escape_fn(handlebars::no_escape);
        text.set_strict_mode(false);

        let mut html = Handlebars::new();
        html.set_strict_mode(false);

        // `{{.Name}}`, `{{ .Name }}` and `{{#if .Flag}}` style references.
        let dotted_reference =
            Regex::new(r"(\{\{~?(?:[#^]?(?:if|unless|each|with)\s+)?\s*)\.([A-Za-z_])")
                .map_err(|e| DispatchError::Store(e.into()))?;

        Ok(Self {
            text,
            html,
            dotted_reference,
        })
    }

    /// Rewrite leading-dot field references to plain handlebars paths.
    pub fn normalize<'a>(&self, source: &'a str) -> Cow<'a, str> {
        self.dotted_reference.replace_all(source, "${1}${2}")
    }

    /// Parse-check every part of a template.
    pub fn validate_template(&self, template: &Template) -> DispatchResult<()> {
        let parts = [
            ("subject", template.subject.as_deref()),
            ("body", Some(template.body.as_str())),
            ("body_html", template.body_html.as_deref()),
        ];
        for (part, source) in parts {
            if let Some(source) = source {
                handlebars::Template::compile(&self.normalize(source)).map_err(|e| {
                    DispatchError::Validation(format!(
                        "template {} has invalid {}: {}",
                        template.name, part, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    pub fn render(&self, template: &Template, data: &DataMap) -> DispatchResult<RenderedContent> {
        let render_with = |registry: &Handlebars<'static>, part: &str, source: &str| {
            registry
                .render_template(&self.normalize(source), data)
                .map_err(|e| {
                    DispatchError::Validation(format!(
                        "failed to render {} of template {}: {}",
                        part, template.name, e
                    ))
                })
        };

        let subject = template
            .subject
            .as_deref()
            .map(|s| render_with(&self.text, "subject", s))
            .transpose()?;
        let text = render_with(&self.text, "body", &template.body)?;
        let html = template
            .body_html
            .as_deref()
            .map(|s| render_with(&self.html, "body_html", s))
            .transpose()?;

        Ok(RenderedContent {
            subject,
            text,
            html,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    pub channel: Option<Channel>,
    #[serde(default)]
    pub notification_type: NotificationType,
    pub subject: Option<String>,
    pub body: String,
    pub body_html: Option<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    pub is_active: Option<bool>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateUpdate {
    pub description: Option<String>,
    pub channel: Option<Channel>,
    pub notification_type: Option<NotificationType>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub body_html: Option<String>,
    pub variables: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl TemplateUpdate {
    fn apply(self, template: &mut Template, now: DateTime<Utc>) {
        if let Some(description) = self.description {
            template.description = Some(description);
        }
        if let Some(channel) = self.channel {
            template.channel = Some(channel);
        }
        if let Some(notification_type) = self.notification_type {
            template.notification_type = notification_type;
        }
        if let Some(subject) = self.subject {
            template.subject = Some(subject);
        }
        if let Some(body) = self.body {
            template.body = body;
        }
        if let Some(body_html) = self.body_html {
            template.body_html = Some(body_html);
        }
        if let Some(variables) = self.variables {
            template.variables = variables;
        }
        if let Some(is_active) = self.is_active {
            template.is_active = is_active;
        }
        template.version += 1;
        template.updated_at = now;
    }
}

/// Template CRUD plus lookup for template-based sends.
pub struct TemplateService {
    templates: Arc<dyn TemplateRepository>,
    notifications: Arc<dyn NotificationRepository>,
    renderer: TemplateRenderer,
    clock: Arc<dyn Clock>,
}

impl TemplateService {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        notifications: Arc<dyn NotificationRepository>,
        clock: Arc<dyn Clock>,
    ) -> DispatchResult<Self> {
        Ok(Self {
            templates,
            notifications,
            renderer: TemplateRenderer::new()?,
            clock,
        })
    }

    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    pub async fn create_template(&self, new: NewTemplate) -> DispatchResult<Template> {
        if new.name.trim().is_empty() {
            return Err(DispatchError::Validation("template name is required".to_string()));
        }
        if self.templates.get_template_by_name(&new.name).await?.is_some() {
            return Err(DispatchError::TemplateExists(new.name));
        }

        let now = self.clock.now();
        let template = Template {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            channel: new.channel,
            notification_type: new.notification_type,
            subject: new.subject,
            body: new.body,
            body_html: new.body_html,
            variables: new.variables,
            is_active: new.is_active.unwrap_or(true),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.renderer.validate_template(&template)?;
        self.templates.insert_template(&template).await?;

        tracing::info!(template_id = %template.id, name = %template.name, "Template created");
        Ok(template)
    }

    pub async fn update_template(&self, id: Uuid, update: TemplateUpdate) -> DispatchResult<Template> {
        let mut template = self
            .templates
            .get_template(id)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(id.to_string()))?;

        update.apply(&mut template, self.clock.now());
        self.renderer.validate_template(&template)?;
        self.templates.update_template(&template).await?;

        tracing::info!(template_id = %id, version = template.version, "Template updated");
        Ok(template)
    }

    pub async fn get_template(&self, id: Uuid) -> DispatchResult<Template> {
        self.templates
            .get_template(id)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(id.to_string()))
    }

    pub async fn get_template_by_name(&self, name: &str) -> DispatchResult<Template> {
        self.templates
            .get_template_by_name(name)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(name.to_string()))
    }

    pub async fn list_templates(&self, active_only: bool) -> DispatchResult<Vec<Template>> {
        Ok(self.templates.list_templates(active_only).await?)
    }

    pub async fn delete_template(&self, id: Uuid) -> DispatchResult<()> {
        if self.notifications.count_by_template(id).await? > 0 {
            return Err(DispatchError::TemplateInUse(id));
        }
        if !self.templates.delete_template(id).await? {
            return Err(DispatchError::TemplateNotFound(id.to_string()));
        }
        tracing::info!(template_id = %id, "Template deleted");
        Ok(())
    }

    /// Find a template by id, falling back to name, and require it active.
    pub async fn resolve(&self, id: Option<Uuid>, name: Option<&str>) -> DispatchResult<Template> {
        let template = match (id, name) {
            (Some(id), _) => self.get_template(id).await?,
            (None, Some(name)) => self.get_template_by_name(name).await?,
            (None, None) => {
                return Err(DispatchError::Validation(
                    "template_id or template_name is required".to_string(),
                ))
            }
        };
        if !template.is_active {
            return Err(DispatchError::TemplateInactive(template.name));
        }
        Ok(template)
    }

    pub fn render(&self, template: &Template, data: &DataMap) -> DispatchResult<RenderedContent> {
        self.renderer.render(template, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_core::{DataValue, MemoryStore, Notification, SystemClock};

    fn template(body: &str) -> Template {
        let now = Utc::now();
        Template {
            id: Uuid::new_v4(),
            name: "greeting".to_string(),
            description: None,
            channel: None,
            notification_type: NotificationType::Transactional,
            subject: None,
            body: body.to_string(),
            body_html: None,
            variables: vec![],
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn data(pairs: &[(&str, &str)]) -> DataMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), DataValue::from(*v)))
            .collect()
    }

    fn service() -> (TemplateService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service =
            TemplateService::new(store.clone(), store.clone(), Arc::new(SystemClock)).unwrap();
        (service, store)
    }

    #[test]
    fn test_dotted_reference_renders() {
        let renderer = TemplateRenderer::new().unwrap();
        let rendered = renderer
            .render(&template("Hello {{.Name}}"), &data(&[("Name", "Ann")]))
            .unwrap();
        assert_eq!(rendered.text, "Hello Ann");
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let renderer = TemplateRenderer::new().unwrap();
        let rendered = renderer
            .render(&template("Hello {{.Name}}"), &DataMap::new())
            .unwrap();
        assert_eq!(rendered.text, "Hello ");
    }

    #[test]
    fn test_normalize_handles_blocks_and_spacing() {
        let renderer = TemplateRenderer::new().unwrap();
        assert_eq!(renderer.normalize("{{ .Name }}"), "{{ Name }}");
        assert_eq!(
            renderer.normalize("{{#if .Late}}late{{/if}}"),
            "{{#if Late}}late{{/if}}"
        );
        assert_eq!(renderer.normalize("{{.}}"), "{{.}}");
    }

    #[test]
    fn test_html_body_is_escaped_but_text_is_not() {
        let renderer = TemplateRenderer::new().unwrap();
        let mut t = template("Trip: {{trip}}");
        t.subject = Some("About {{trip}}".to_string());
        t.body_html = Some("<p>{{trip}}</p>".to_string());

        let rendered = renderer
            .render(&t, &data(&[("trip", "Rome & <Paris>")]))
            .unwrap();
        assert_eq!(rendered.text, "Trip: Rome & <Paris>");
        assert_eq!(rendered.subject.as_deref(), Some("About Rome & <Paris>"));
        assert_eq!(
            rendered.html.as_deref(),
            Some("<p>Rome &amp; &lt;Paris&gt;</p>")
        );
    }

    #[test]
    fn test_each_over_list() {
        let renderer = TemplateRenderer::new().unwrap();
        let mut values = DataMap::new();
        values.insert(
            "stops".to_string(),
            DataValue::List(vec!["Lyon".into(), "Nice".into()]),
        );
        let rendered = renderer
            .render(&template("{{#each stops}}[{{this}}]{{/each}}"), &values)
            .unwrap();
        assert_eq!(rendered.text, "[Lyon][Nice]");
    }

    #[test]
    fn test_validate_rejects_unbalanced_block() {
        let renderer = TemplateRenderer::new().unwrap();
        assert!(matches!(
            renderer.validate_template(&template("{{#if x}}never closed")),
            Err(DispatchError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let (service, _) = service();
        let new = NewTemplate {
            name: "welcome".to_string(),
            body: "Hi {{name}}".to_string(),
            ..Default::default()
        };
        service.create_template(new.clone()).await.unwrap();
        assert!(matches!(
            service.create_template(new).await,
            Err(DispatchError::TemplateExists(_))
        ));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_revalidates() {
        let (service, _) = service();
        let created = service
            .create_template(NewTemplate {
                name: "welcome".to_string(),
                body: "Hi".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = service
            .update_template(
                created.id,
                TemplateUpdate {
                    body: Some("Hi {{name}}".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, created.version + 1);

        let broken = service
            .update_template(
                created.id,
                TemplateUpdate {
                    body: Some("{{#if late}}unclosed".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(broken.is_err());
        assert_eq!(service.get_template(created.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_delete_rejected_while_referenced() {
        let (service, store) = service();
        let created = service
            .create_template(NewTemplate {
                name: "reminder".to_string(),
                body: "Pack your bags".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut n = Notification::new(Channel::Email, "Pack your bags", Utc::now());
        n.template_id = Some(created.id);
        store.insert_notification(&n).await.unwrap();

        assert!(matches!(
            service.delete_template(created.id).await,
            Err(DispatchError::TemplateInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_rejects_inactive() {
        let (service, _) = service();
        service
            .create_template(NewTemplate {
                name: "old".to_string(),
                body: "x".to_string(),
                is_active: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(matches!(
            service.resolve(None, Some("old")).await,
            Err(DispatchError::TemplateInactive(_))
        ));
        assert!(matches!(
            service.resolve(None, Some("missing")).await,
            Err(DispatchError::TemplateNotFound(_))
        ));
    }
}
