//! Result envelope: the JSON object every script must return.
//!
//! `{"success": bool, "status": int, ...payload}`. `status` is required and
//! must be an integer; `success` defaults to `true`.

use {
    axum::http::StatusCode,
    serde_json::{Map, Value},
};

pub const SUCCESS_KEY: &str = "success";
pub const STATUS_KEY: &str = "status";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("script output is not JSON: {0}")]
    NotJson(String),

    #[error("script output is not a JSON object")]
    NotAnObject,

    #[error("status field not found in script output")]
    MissingStatus,

    #[error("status field must be an integer")]
    NonNumericStatus,

    #[error("status {0} is not a valid HTTP status")]
    InvalidHttpStatus(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub success: bool,
    pub status: i64,
    /// Every other field of the output.
    pub payload: Map<String, Value>,
}

pub fn interpret(raw: &str) -> Result<ResultEnvelope, EnvelopeError> {
    let mut payload = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => obj,
        Ok(_) => return Err(EnvelopeError::NotAnObject),
        Err(e) => return Err(EnvelopeError::NotJson(e.to_string())),
    };
    let status = match payload.remove(STATUS_KEY) {
        None | Some(Value::Null) => return Err(EnvelopeError::MissingStatus),
        Some(v) => integral(&v).ok_or(EnvelopeError::NonNumericStatus)?,
    };
    let success = match payload.remove(SUCCESS_KEY) {
        Some(Value::Bool(b)) => b,
        _ => true,
    };
    Ok(ResultEnvelope {
        success,
        status,
        payload,
    })
}

/// Integers, and floats with no fractional part (`200.0`).
fn integral(v: &Value) -> Option<i64> {
    let n = v.as_number()?;
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

impl ResultEnvelope {
    pub fn http_status(&self) -> Result<StatusCode, EnvelopeError> {
        u16::try_from(self.status)
            .ok()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .ok_or(EnvelopeError::InvalidHttpStatus(self.status))
    }

    /// Payload plus `success` and `status`, for HTTP bodies.
    pub fn to_http_body(&self) -> Value {
        let mut body = self.payload.clone();
        body.insert(SUCCESS_KEY.into(), Value::Bool(self.success));
        body.insert(STATUS_KEY.into(), Value::from(self.status));
        Value::Object(body)
    }

    /// Payload plus `success`; `status` is only used to pick error codes.
    pub fn to_rpc_result(&self) -> Value {
        let mut body = self.payload.clone();
        body.insert(SUCCESS_KEY.into(), Value::Bool(self.success));
        Value::Object(body)
    }
}
