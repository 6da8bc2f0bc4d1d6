use serde::{Deserialize, Serialize};

/// The subject a flag is being evaluated for.
///
/// `user_id` is the identity used for bucketing and allowlist checks. An empty id is accepted
/// and treated like any other string: it gets a stable bucket and matches no allowlist that
/// does not list `""`. Callers that consider an empty id a bug should reject it before
/// evaluating.
///
/// `environment` and `service` describe where the request came from. Stock rules never
/// branch on them; `service` is carried into the [crate::Decision] for observability.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    user_id: String,
    environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service: Option<String>,
}

impl EvaluationContext {
    pub fn new(user_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            environment: environment.into(),
            service: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// The identity being gated, typically a user id.
    pub fn subject_id(&self) -> &str {
        &self.user_id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use spectral::prelude::*;

    #[test]
    fn parses_wire_context() {
        let context: EvaluationContext = serde_json::from_str(
            r#"{"userId": "alice", "environment": "PROD", "service": "api-gateway"}"#,
        )
        .expect("should parse");

        assert_eq!(context.subject_id(), "alice");
        assert_eq!(context.environment(), "PROD");
        assert_eq!(context.service(), Some("api-gateway"));
    }

    #[test]
    fn service_is_optional() {
        let context: EvaluationContext =
            serde_json::from_str(r#"{"userId": "bob", "environment": "DEV"}"#).unwrap();

        assert_that!(context).is_equal_to(EvaluationContext::new("bob", "DEV"));
        assert_that!(context.service()).is_none();
        assert_json_eq!(
            serde_json::to_value(&context).unwrap(),
            json!({"userId": "bob", "environment": "DEV"})
        );
    }

    #[test]
    fn empty_subject_is_representable() {
        let context = EvaluationContext::new("", "PROD");
        assert_eq!(context.subject_id(), "");
    }

    #[test]
    fn with_service_sets_service() {
        let context = EvaluationContext::new("carol", "STAGING").with_service("billing");
        assert_eq!(context.service(), Some("billing"));
    }
}
