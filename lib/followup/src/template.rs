//! Message templates and resolution.
//!
//! Templates carry `{placeholder}` tokens in subject, text, and optional
//! html bodies. Substitution is verbatim and forgiving: unresolved
//! placeholders stay in the output rather than failing the message, since a
//! reminder with a literal token is still more useful than no reminder.

use crate::entity::EntityKind;
use crate::error::TemplateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message template addressed by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Identifier used for lookup.
    pub id: String,
    /// Subject line with placeholders.
    pub subject: String,
    /// Plain-text body with placeholders.
    pub text: String,
    /// Optional html body with placeholders.
    pub html: Option<String>,
}

/// A template after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

fn substitute(input: &str, variables: &HashMap<String, String>) -> String {
    let mut result = input.to_string();
    for (name, value) in variables {
        let placeholder = format!("{{{}}}", name);
        result = result.replace(&placeholder, value);
    }
    result
}

impl MessageTemplate {
    /// Creates a template with a plain-text body.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            text: text.into(),
            html: None,
        }
    }

    /// Sets the html body.
    #[must_use]
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Renders subject and bodies with the given variables.
    #[must_use]
    pub fn render(&self, variables: &HashMap<String, String>) -> RenderedMessage {
        RenderedMessage {
            subject: substitute(&self.subject, variables),
            text: substitute(&self.text, variables),
            html: self.html.as_deref().map(|h| substitute(h, variables)),
        }
    }
}

/// Built-in generic message for a domain.
///
/// Used whenever a configured template identifier cannot be resolved, so a
/// missing template never blocks a follow-up.
#[must_use]
pub fn generic_template(kind: EntityKind) -> MessageTemplate {
    match kind {
        EntityKind::Quote => MessageTemplate::new(
            "generic_quote",
            "Follow-up on quote {quote_number}",
            "Hello {client_name},\n\nThis is a follow-up regarding quote {quote_number}. \
             Please let us know if you have any questions.\n",
        ),
        EntityKind::Invoice => MessageTemplate::new(
            "generic_invoice",
            "Payment reminder for invoice {invoice_number}",
            "Hello {client_name},\n\nThis is a reminder regarding invoice {invoice_number}, \
             due on {due_date}.\n",
        ),
    }
}

/// Resolves template identifiers to templates.
#[async_trait]
pub trait TemplateResolver: Send + Sync {
    /// Looks up a template by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Missing`] when no template exists for the
    /// identifier, or [`TemplateError::ResolverFailed`] when the lookup
    /// itself fails.
    async fn resolve(&self, template_id: &str) -> Result<MessageTemplate, TemplateError>;
}

/// In-process template registry.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplates {
    templates: HashMap<String, MessageTemplate>,
}

impl StaticTemplates {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Creates a registry preloaded with the default follow-up templates.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(MessageTemplate::new(
            "quote_not_viewed",
            "Quote {quote_number} is waiting for you",
            "Hello {client_name},\n\nWe sent you quote {quote_number} a few days ago and \
             have not heard back. We would be glad to answer any questions or adjust the \
             proposal to your needs.\n",
        ));
        registry.register(MessageTemplate::new(
            "quote_viewed_instant",
            "Any questions about quote {quote_number}?",
            "Hello {client_name},\n\nThanks for taking a look at quote {quote_number}. \
             We are happy to walk you through the details whenever suits you.\n",
        ));
        registry.register(MessageTemplate::new(
            "invoice_approaching_deadline",
            "Invoice {invoice_number} is due in {days_until_due} days",
            "Hello {client_name},\n\nA quick reminder that invoice {invoice_number} is \
             due on {due_date}.\n",
        ));
        registry.register(MessageTemplate::new(
            "invoice_overdue",
            "Invoice {invoice_number} is overdue",
            "Hello {client_name},\n\nInvoice {invoice_number} was due on {due_date} and \
             is now {days_overdue} days overdue. Please arrange payment at your earliest \
             convenience.\n",
        ));
        registry
    }

    /// Registers a template under its identifier.
    pub fn register(&mut self, template: MessageTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Gets a template by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&MessageTemplate> {
        self.templates.get(id)
    }

    /// Returns the number of registered templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateResolver for StaticTemplates {
    async fn resolve(&self, template_id: &str) -> Result<MessageTemplate, TemplateError> {
        self.get(template_id)
            .cloned()
            .ok_or_else(|| TemplateError::Missing {
                template_id: template_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn substitution_replaces_known_placeholders() {
        let template = MessageTemplate::new(
            "invoice_overdue",
            "Invoice {invoice_number} is overdue",
            "Hello {client_name}, invoice {invoice_number} is {days_overdue} days overdue.",
        );

        let rendered = template.render(&vars(&[
            ("invoice_number", "F-2024-042"),
            ("client_name", "Acme SARL"),
            ("days_overdue", "4"),
        ]));

        assert_eq!(rendered.subject, "Invoice F-2024-042 is overdue");
        assert!(rendered.text.contains("Acme SARL"));
        assert!(rendered.text.contains("4 days overdue"));
    }

    #[test]
    fn unresolved_placeholders_are_left_verbatim() {
        let template = MessageTemplate::new("t", "Hello {client_name}", "Due {due_date}");
        let rendered = template.render(&HashMap::new());
        assert_eq!(rendered.subject, "Hello {client_name}");
        assert_eq!(rendered.text, "Due {due_date}");
    }

    #[test]
    fn html_body_is_rendered_when_present() {
        let template = MessageTemplate::new("t", "s", "t")
            .with_html("<p>Invoice {invoice_number}</p>");
        let rendered = template.render(&vars(&[("invoice_number", "F-1")]));
        assert_eq!(rendered.html.as_deref(), Some("<p>Invoice F-1</p>"));
    }

    #[test]
    fn generic_fallbacks_cover_both_domains() {
        let quote = generic_template(EntityKind::Quote);
        assert!(quote.subject.contains("{quote_number}"));

        let invoice = generic_template(EntityKind::Invoice);
        assert!(invoice.subject.contains("{invoice_number}"));
        assert!(invoice.text.contains("{due_date}"));
    }

    #[tokio::test]
    async fn registry_resolves_builtin_identifiers() {
        let registry = StaticTemplates::builtin();
        assert_eq!(registry.len(), 4);

        let template = registry
            .resolve("invoice_overdue")
            .await
            .unwrap_or_else(|e| panic!("builtin template should resolve: {e}"));
        assert!(template.subject.contains("{invoice_number}"));

        let missing = registry.resolve("not_a_template").await;
        assert_eq!(
            missing,
            Err(TemplateError::Missing {
                template_id: "not_a_template".to_string()
            })
        );
    }
}
