//! JSON response shaping.
//!
//! Maps rules and [`ServiceError`] variants onto response bodies. Nothing
//! here decides outcomes; it only renders them.

use crate::config::AuthorizationConfig;
use crate::error::{ErrorKind, ServiceError};
use crate::rules::model::RuleRecord;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

const LOGIN_REALM: &str = "Basic realm=\"You need to be logged in to access this resource.\"";

const INTERVAL_NOTE: &str = "Legal values are positive intervals of at least one minute. \
    Examples include \"8h\", \"1 day\", \"2.5w\", \"1 year 1 day\", and \"P1Y2M3DT4H5M6S\".";

const TIMESTAMP_NOTE: &str = "Legal values are timestamps that lie at least one minute in the \
    future, in UTC unless an offset is given. Examples include \"2014-11-14 16:03:00\" and \
    \"2014-11-14 17:03:00+01:00\" (except that those will be in the past by the time you read this).";

const COMMENT_NOTE: &str = "The comment is specified as a form parameter named \"comment\".";

/// ISO-8601 with a space between date and time.
pub fn timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()
}

/// Render one rule. `with_type` adds the list the rule belongs to.
pub fn rule_json(record: &RuleRecord, with_type: bool) -> Value {
    let rule = &record.rule;
    let mut body = Map::new();
    body.insert("status".into(), json!(record.status.as_str()));
    body.insert("address".into(), json!(rule.address.to_string()));
    if with_type {
        body.insert("type".into(), json!(rule.rule_type.as_str()));
    }
    if let Some(end) = rule.expires_at {
        body.insert("end".into(), json!(timestamp(end)));
    }
    body.insert(
        "created".into(),
        json!({
            "at": timestamp(rule.created_at),
            "by": rule.created_by,
            "comment": rule.creation_comment,
        }),
    );
    if let Some(n) = &rule.nullification {
        let mut nullified = Map::new();
        nullified.insert("at".into(), json!(timestamp(n.at)));
        nullified.insert("by".into(), json!(n.by));
        if let Some(comment) = &n.comment {
            nullified.insert("comment".into(), json!(comment));
        }
        body.insert("nullified".into(), Value::Object(nullified));
    }
    Value::Object(body)
}

pub fn rules_json(records: &[RuleRecord], with_type: bool) -> Value {
    Value::Array(records.iter().map(|r| rule_json(r, with_type)).collect())
}

pub fn status_code(err: &ServiceError) -> StatusCode {
    match err.kind() {
        ErrorKind::Request | ErrorKind::Integrity => StatusCode::BAD_REQUEST,
        ErrorKind::NothingToDo => StatusCode::OK,
        ErrorKind::Authorization => match err {
            ServiceError::InsufficientRights { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        },
        ErrorKind::Environment | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn note(err: &ServiceError) -> Option<String> {
    match err {
        ServiceError::MalformedInterval { .. } => Some(INTERVAL_NOTE.to_string()),
        ServiceError::MalformedTimestamp { .. } => Some(TIMESTAMP_NOTE.to_string()),
        ServiceError::MissingComment => Some(COMMENT_NOTE.to_string()),
        ServiceError::AddressCannotBeBlacklisted { address, .. } => Some(format!(
            "The System team can specify that certain IP addresses cannot be blacklisted by \
             explicitly whitelisting them. The whitelist entries listed under \
             \"conflicting_whitelist_entries\" prevent the IP address {address} from being blacklisted."
        )),
        _ => None,
    }
}

/// Build the response for a failed request.
///
/// `correlation_id` is attached to environment and unexpected errors so
/// operators can find the matching log line.
pub fn error_response(
    err: &ServiceError,
    auth: &AuthorizationConfig,
    correlation_id: Option<Uuid>,
) -> Response {
    let status = status_code(err);
    let mut body = Map::new();

    let message = match err {
        ServiceError::InsufficientRights { role, .. } => format!(
            "You do not have the role {}, which is required to access this resource.",
            auth.role_path(role)
        ),
        other => other.to_string(),
    };
    body.insert("message".into(), json!(message));

    if status != StatusCode::OK {
        body.insert("error".into(), json!(true));
    }
    if let Some(note) = note(err) {
        body.insert("note".into(), json!(note));
    }

    match err {
        ServiceError::AddressCannotBeBlacklisted {
            conflicting_whitelist_entries,
            ..
        } => {
            body.insert(
                "conflicting_whitelist_entries".into(),
                rules_json(conflicting_whitelist_entries, false),
            );
        }
        ServiceError::AddressCannotBeWhitelisted {
            conflicting_blacklist_entries,
            ..
        } => {
            body.insert(
                "conflicting_blacklist_entries".into(),
                rules_json(conflicting_blacklist_entries, false),
            );
        }
        ServiceError::AddressAlreadyBlacklisted {
            existing_blacklist_entries,
            ..
        } => {
            body.insert(
                "existing_blacklist_entries".into(),
                rules_json(existing_blacklist_entries, false),
            );
        }
        ServiceError::AddressAlreadyWhitelisted {
            existing_whitelist_entries,
            ..
        } => {
            body.insert(
                "existing_whitelist_entries".into(),
                rules_json(existing_whitelist_entries, false),
            );
        }
        ServiceError::InsufficientRights { .. } => {
            if let Some(solution) = &auth.missing_role_solution {
                body.insert("solution".into(), json!(solution));
            }
        }
        ServiceError::CannotTalkToDatabase { original_message }
        | ServiceError::CannotTalkToDirectory { original_message }
        | ServiceError::Unexpected { original_message } => {
            body.insert("original_message".into(), json!(original_message));
        }
        _ => {}
    }

    if let Some(id) = correlation_id {
        body.insert("correlation_id".into(), json!(id.to_string()));
    }

    let mut response = (status, Json(Value::Object(body))).into_response();
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(LOGIN_REALM));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetworkPrefix;
    use crate::rules::model::{
        BlockingRule, Nullification, NullificationType, RuleStatus, RuleType,
    };
    use chrono::TimeZone;

    fn record(nullification: Option<Nullification>) -> RuleRecord {
        let created = Utc.with_ymd_and_hms(2014, 11, 14, 16, 3, 0).unwrap();
        RuleRecord {
            status: if nullification.is_some() {
                RuleStatus::Canceled
            } else {
                RuleStatus::Active
            },
            rule: BlockingRule {
                id: 1,
                rule_type: RuleType::Blacklist,
                address: NetworkPrefix::parse_strict("192.0.2.0/24").unwrap(),
                created_at: created,
                created_by: "alice".into(),
                creation_comment: "scanner".into(),
                expires_at: Some(Utc.with_ymd_and_hms(2014, 11, 15, 0, 3, 0).unwrap()),
                nullification,
            },
        }
    }

    #[test]
    fn active_rule_shape() {
        let value = rule_json(&record(None), false);
        assert_eq!(
            value,
            json!({
                "status": "ACTIVE",
                "address": "192.0.2.0/24",
                "end": "2014-11-15 00:03:00+00:00",
                "created": {
                    "at": "2014-11-14 16:03:00+00:00",
                    "by": "alice",
                    "comment": "scanner",
                },
            })
        );
    }

    #[test]
    fn nullified_rule_shape() {
        let value = rule_json(
            &record(Some(Nullification {
                at: Utc.with_ymd_and_hms(2014, 11, 14, 17, 0, 0).unwrap(),
                by: "bob".into(),
                kind: NullificationType::Canceled,
                comment: Some("false positive".into()),
            })),
            true,
        );
        assert_eq!(value["type"], "BLACKLIST");
        assert_eq!(value["status"], "CANCELED");
        assert_eq!(value["nullified"]["by"], "bob");
        assert_eq!(value["nullified"]["comment"], "false positive");
    }

    #[test]
    fn status_codes_follow_kind() {
        let address = NetworkPrefix::parse_strict("192.0.2.1").unwrap();
        assert_eq!(status_code(&ServiceError::MissingComment), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_code(&ServiceError::AddressNotBlacklisted { address }),
            StatusCode::OK
        );
        assert_eq!(status_code(&ServiceError::NotLoggedIn), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_code(&ServiceError::InsufficientRights {
                user_name: "alice".into(),
                role: "reader".into()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_code(&ServiceError::CannotTalkToDatabase {
                original_message: "locked".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unauthorized_responses_ask_for_login() {
        let response = error_response(
            &ServiceError::BadCredentials,
            &AuthorizationConfig::default(),
            None,
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], LOGIN_REALM);
    }
}
