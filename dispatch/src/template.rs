//! Template rendering.
//!
//! Templates use `{{variable}}` placeholders. Unknown placeholders are
//! left in place so a broken template is visible in the delivered message
//! instead of silently dropping content.

use reservo_core::domain::notification::NotificationTemplate;
use serde_json::Value;

/// Substitute `{{key}}` placeholders from `variables`.
#[must_use]
pub fn substitute(text: &str, variables: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        if let Some(close) = after.find("}}") {
            let key = after[..close].trim();
            match variables.get(key) {
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&other.to_string()),
                None => {
                    out.push_str("{{");
                    out.push_str(&after[..close]);
                    out.push_str("}}");
                }
            }
            rest = &after[close + 2..];
        } else {
            out.push_str("{{");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// A rendered subject/body pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Rendered subject line.
    pub subject: String,
    /// Rendered body.
    pub body: String,
}

/// Render a template with the dispatch's variables.
#[must_use]
pub fn render(template: &NotificationTemplate, variables: &Value) -> Rendered {
    Rendered {
        subject: substitute(&template.subject, variables),
        body: substitute(&template.body, variables),
    }
}

/// Minimal fallback when a tenant has no template for the type: the raw
/// variables, so a delivery still carries its facts.
#[must_use]
pub fn fallback(template_type: &str, variables: &Value) -> Rendered {
    Rendered {
        subject: template_type.replace('_', " "),
        body: variables.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reservo_core::ids::TenantId;

    #[test]
    fn substitutes_known_variables() {
        let vars = serde_json::json!({"name": "Ada", "slots": 2});
        assert_eq!(
            substitute("Hi {{name}}, {{slots}} seats held.", &vars),
            "Hi Ada, 2 seats held."
        );
    }

    #[test]
    fn unknown_placeholders_stay_visible() {
        let vars = serde_json::json!({});
        assert_eq!(substitute("Hi {{name}}!", &vars), "Hi {{name}}!");
    }

    #[test]
    fn unterminated_placeholder_passes_through() {
        let vars = serde_json::json!({"a": "x"});
        assert_eq!(substitute("broken {{a", &vars), "broken {{a");
    }

    #[test]
    fn render_covers_subject_and_body() {
        let template = NotificationTemplate {
            tenant_id: TenantId::nil(),
            template_type: "booking_created".into(),
            language: "default".into(),
            subject: "Booking {{bookingId}}".into(),
            body: "See you at {{startAt}}.".into(),
        };
        let rendered = render(
            &template,
            &serde_json::json!({"bookingId": "b-1", "startAt": "10:00"}),
        );
        assert_eq!(rendered.subject, "Booking b-1");
        assert_eq!(rendered.body, "See you at 10:00.");
    }
}
