use std::collections::HashMap;

use catalog_admin_core::{SecurityEventType, Severity};

use crate::error::ApiError;

const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1000;

/// Filters for `GET /security/events`
#[derive(Debug, Clone, PartialEq)]
pub struct EventsQuery {
    pub limit: usize,
    pub severity: Option<Severity>,
    pub event_type: Option<SecurityEventType>,
}

impl Default for EventsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_EVENT_LIMIT,
            severity: None,
            event_type: None,
        }
    }
}

impl EventsQuery {
    /// Parse `limit`, `severity` and `type` query parameters
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ApiError> {
        let limit = match params.get("limit") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid limit: {}", raw)))?
                .min(MAX_EVENT_LIMIT),
            None => DEFAULT_EVENT_LIMIT,
        };

        let severity = params
            .get("severity")
            .map(|raw| raw.parse::<Severity>())
            .transpose()
            .map_err(|_| ApiError::BadRequest("Invalid severity".to_string()))?;

        let event_type = params
            .get("type")
            .map(|raw| raw.parse::<SecurityEventType>())
            .transpose()
            .map_err(|_| ApiError::BadRequest("Invalid event type".to_string()))?;

        Ok(Self {
            limit,
            severity,
            event_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        assert_eq!(EventsQuery::from_params(&HashMap::new()).unwrap(), EventsQuery::default());
    }

    #[test]
    fn test_parses_filters_and_caps_limit() {
        let query = EventsQuery::from_params(&params(&[
            ("limit", "5000"),
            ("severity", "high"),
            ("type", "csrf_violation"),
        ]))
        .unwrap();

        assert_eq!(query.limit, MAX_EVENT_LIMIT);
        assert_eq!(query.severity, Some(Severity::High));
        assert_eq!(query.event_type, Some(SecurityEventType::CsrfViolation));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(EventsQuery::from_params(&params(&[("limit", "ten")])).is_err());
        assert!(EventsQuery::from_params(&params(&[("severity", "urgent")])).is_err());
        assert!(EventsQuery::from_params(&params(&[("type", "nope")])).is_err());
    }
}
