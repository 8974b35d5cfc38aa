use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::{Comparison, Filter};
use super::key::{DocumentKey, KEY_FIELD};

/// Operand of a template predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TemplateValue {
    /// Fixed operand.
    Literal(Value),
    /// Placeholder replaced by the partition's resume key.
    ResumeKey,
}

/// One predicate of a filter template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatePredicate {
    /// Dot-separated field path.
    pub field: String,
    /// Comparison operator.
    pub comparison: Comparison,
    /// Operand or resume placeholder.
    pub value: TemplateValue,
}

/// Per-partition query template with a resume-key placeholder.
///
/// Binding without a resume key drops the placeholder predicates, which
/// starts the scan at the smallest key. A template without any placeholder
/// still resumes: binding appends `_id > resume` itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterTemplate {
    predicates: Vec<TemplatePredicate>,
}

impl FilterTemplate {
    /// Creates a template that resumes after the last processed key.
    #[must_use]
    pub fn keyset() -> Self {
        Self {
            predicates: vec![TemplatePredicate {
                field: KEY_FIELD.to_owned(),
                comparison: Comparison::Gt,
                value: TemplateValue::ResumeKey,
            }],
        }
    }

    /// Adds one fixed predicate.
    #[must_use]
    pub fn with(
        mut self,
        field: impl Into<String>,
        comparison: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        self.predicates.push(TemplatePredicate {
            field: field.into(),
            comparison,
            value: TemplateValue::Literal(value.into()),
        });
        self
    }

    /// Adds one fixed equality predicate.
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Eq, value)
    }

    /// Returns the template predicates.
    #[must_use]
    pub fn predicates(&self) -> &[TemplatePredicate] {
        &self.predicates
    }

    /// Substitutes the resume key and returns a concrete filter.
    #[must_use]
    pub fn bind(&self, resume_key: Option<&DocumentKey>) -> Filter {
        let mut has_placeholder = false;
        let mut filter = Filter::new();

        for predicate in &self.predicates {
            match &predicate.value {
                TemplateValue::Literal(value) => {
                    filter = filter.with(
                        predicate.field.clone(),
                        predicate.comparison,
                        value.clone(),
                    );
                }
                TemplateValue::ResumeKey => {
                    has_placeholder = true;
                    if let Some(key) = resume_key {
                        filter =
                            filter.with(predicate.field.clone(), predicate.comparison, key.to_value());
                    }
                }
            }
        }

        match resume_key {
            Some(key) if !has_placeholder => filter.gt(KEY_FIELD, key.to_value()),
            _ => filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::FilterTemplate;
    use crate::query::DocumentKey;

    #[test]
    fn fresh_bind_drops_placeholder() {
        let template = FilterTemplate::keyset().eq("region", "eu");
        let filter = template.bind(None);
        assert_eq!(filter.predicates().len(), 1);
        assert!(filter.matches(&json!({"_id": 0, "region": "eu"})));
    }

    #[test]
    fn resumed_bind_excludes_committed_key() {
        let template = FilterTemplate::keyset().eq("region", "eu");
        let filter = template.bind(Some(&DocumentKey::Int(10)));
        assert!(!filter.matches(&json!({"_id": 10, "region": "eu"})));
        assert!(filter.matches(&json!({"_id": 11, "region": "eu"})));
    }

    #[test]
    fn template_without_placeholder_still_resumes() {
        let template = FilterTemplate::default().eq("region", "eu");
        let filter = template.bind(Some(&DocumentKey::from("m")));
        assert!(!filter.matches(&json!({"_id": "a", "region": "eu"})));
        assert!(filter.matches(&json!({"_id": "z", "region": "eu"})));
    }

    #[test]
    fn template_round_trips_through_documents() {
        let template = FilterTemplate::keyset().eq("region", "eu");
        let stored = serde_json::to_value(&template).unwrap_or_default();
        let restored: Result<FilterTemplate, _> = serde_json::from_value(stored);
        assert_eq!(restored.ok(), Some(template));
    }
}
