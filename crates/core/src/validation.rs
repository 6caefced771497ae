//! Submission validation and free-text sanitization.
//!
//! Inbound cancellation payloads arrive as untyped JSON. [`validate`] checks
//! the shape and returns either a typed [`ValidCancellation`] or a
//! [`ValidationError`] that names what was wrong. The reason is kept for logs
//! and tests; clients only ever see [`PUBLIC_VALIDATION_MESSAGE`].

use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Arm, CancellationRecord};

/// Maximum length of a sanitized free-text field, in characters.
pub const MAX_REASON_LEN: usize = 500;

/// Message returned to clients for any validation failure.
pub const PUBLIC_VALIDATION_MESSAGE: &str = "Invalid request data";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' has the wrong type")]
    WrongType(&'static str),

    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("unknown downsell variant '{0}'")]
    UnknownVariant(String),

    #[error("downsell variant {claimed} does not match assigned arm {assigned}")]
    VariantMismatch { claimed: Arm, assigned: Arm },
}

/// A cancellation payload that passed [`validate`]. The reason is still raw;
/// it is sanitized when the record is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCancellation {
    pub user_id: String,
    pub subscription_id: String,
    pub downsell_variant: Arm,
    pub reason: String,
    pub accepted_downsell: bool,
}

impl ValidCancellation {
    /// Wire form accepted by [`validate`].
    pub fn to_payload(&self) -> Value {
        json!({
            "userId": self.user_id,
            "subscriptionId": self.subscription_id,
            "downsellVariant": self.downsell_variant,
            "reason": self.reason,
            "acceptedDownsell": self.accepted_downsell,
        })
    }

    /// Build the immutable record, sanitizing the reason.
    pub fn into_record(self) -> CancellationRecord {
        CancellationRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            subscription_id: self.subscription_id,
            downsell_variant: self.downsell_variant,
            reason: sanitize(&self.reason),
            accepted_downsell: self.accepted_downsell,
            created_at: Utc::now(),
        }
    }
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, ValidationError> {
    obj.get(name).ok_or(ValidationError::MissingField(name))
}

fn string_field<'a>(
    obj: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    field(obj, name)?
        .as_str()
        .ok_or(ValidationError::WrongType(name))
}

fn non_empty_string_field<'a>(
    obj: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    let value = string_field(obj, name)?;
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(name));
    }
    Ok(value)
}

/// Check a cancellation submission payload.
pub fn validate(payload: &Value) -> Result<ValidCancellation, ValidationError> {
    let obj = payload.as_object().ok_or(ValidationError::NotAnObject)?;

    let user_id = non_empty_string_field(obj, "userId")?;
    let subscription_id = non_empty_string_field(obj, "subscriptionId")?;
    let downsell_variant = match string_field(obj, "downsellVariant")? {
        "A" => Arm::A,
        "B" => Arm::B,
        other => return Err(ValidationError::UnknownVariant(other.to_string())),
    };
    let reason = string_field(obj, "reason")?;
    let accepted_downsell = field(obj, "acceptedDownsell")?
        .as_bool()
        .ok_or(ValidationError::WrongType("acceptedDownsell"))?;

    Ok(ValidCancellation {
        user_id: user_id.to_string(),
        subscription_id: subscription_id.to_string(),
        downsell_variant,
        reason: reason.to_string(),
        accepted_downsell,
    })
}

/// Strip `<` and `>`, trim, and cap at [`MAX_REASON_LEN`] characters.
///
/// Whitespace exposed by the cut is trimmed as well, so applying the
/// function twice gives the same result as applying it once.
pub fn sanitize(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    let truncated: String = stripped.trim().chars().take(MAX_REASON_LEN).collect();
    truncated.trim_end().to_string()
}

fn optional_of(
    obj: &Map<String, Value>,
    name: &'static str,
    accepts: fn(&Value) -> bool,
) -> Result<(), ValidationError> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(()),
        Some(v) if accepts(v) => Ok(()),
        Some(_) => Err(ValidationError::WrongType(name)),
    }
}

/// Lightweight guard for client-held flow state before it is forwarded.
///
/// Boolean answers must be booleans or unset, and the cancellation reason
/// must be a string or unset.
pub fn validate_flow_state(state: &Value) -> Result<(), ValidationError> {
    let obj = state.as_object().ok_or(ValidationError::NotAnObject)?;

    optional_of(obj, "foundJob", Value::is_boolean)?;
    optional_of(obj, "needsJobHelp", Value::is_boolean)?;
    optional_of(obj, "acceptedDownsell", Value::is_boolean)?;
    optional_of(obj, "cancellationReason", Value::is_string)?;
    Ok(())
}
