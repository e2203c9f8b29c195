//! Native side of the guest capability table.
//!
//! The prelude script exposes the `nyan*` functions to guests; each one
//! forwards to a single native entry point with an op name and a JSON array
//! of arguments, and gets back `{"ok": true, "value": ..}` or
//! `{"ok": false, "error": ".."}`. Failures become thrown guest errors.

use std::collections::HashMap;

use {
    serde_json::{Value, json},
    tokio::runtime::Handle,
    tracing::{debug, error, info, warn},
};

use crate::{
    capabilities::{Attachment, Capabilities, OutboundRequest, files::encode_base64, mail},
    error::CapabilityError,
    transport::TransportContext,
};

/// Log target for guest console output.
pub(crate) const SCRIPT_LOG_TARGET: &str = "script";

pub(crate) struct Bridge {
    handle: Handle,
    capabilities: Capabilities,
    transport: TransportContext,
    operation: String,
}

impl Bridge {
    pub(crate) fn new(
        handle: Handle,
        capabilities: Capabilities,
        transport: TransportContext,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            capabilities,
            transport,
            operation: operation.into(),
        }
    }

    /// Entry point called from the guest. Always returns a reply document.
    pub(crate) fn call(&self, op: &str, args_json: &str) -> String {
        let args: Vec<Value> = match serde_json::from_str(args_json) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Null) => Vec::new(),
            Ok(other) => vec![other],
            Err(e) => return reply(Err(CapabilityError::invalid(format!("bad arguments: {e}")))),
        };
        reply(self.dispatch(op, &args))
    }

    fn dispatch(&self, op: &str, args: &[Value]) -> Result<Value, CapabilityError> {
        match op {
            "log" => {
                info!(target: SCRIPT_LOG_TARGET, operation = %self.operation, "{}", arg_str(args, 0));
                Ok(Value::Null)
            },
            "warn" => {
                warn!(target: SCRIPT_LOG_TARGET, operation = %self.operation, "{}", arg_str(args, 0));
                Ok(Value::Null)
            },
            "error" => {
                error!(target: SCRIPT_LOG_TARGET, operation = %self.operation, "{}", arg_str(args, 0));
                Ok(Value::Null)
            },
            "cookie.get" => {
                let name = arg_str(args, 0);
                if !self.transport.is_request_bound() {
                    debug!(operation = %self.operation, cookie = %name, "no request bound; cookie read ignored");
                }
                Ok(Value::String(self.transport.cookie(&name).unwrap_or_default()))
            },
            "cookie.set" => {
                let name = arg_str(args, 0);
                if !self.transport.set_cookie(name.clone(), arg_str(args, 1)) {
                    info!(operation = %self.operation, cookie = %name, "no request bound; cookie write dropped");
                }
                Ok(Value::Null)
            },
            "item.get" => Ok(Value::String(
                self.capabilities.kv.get(&arg_str(args, 0)).unwrap_or_default(),
            )),
            "item.set" => {
                self.capabilities.kv.set(arg_str(args, 0), arg_str(args, 1));
                Ok(Value::Null)
            },
            "http.get" => {
                let request = outbound(args.first(), args.get(1), args.get(2), None)?;
                let body = self.block_on(self.capabilities.http.get(&request))?;
                Ok(Value::String(body))
            },
            "http.post_json" => {
                let request = outbound(args.first(), args.get(2), args.get(3), args.get(4))?;
                let body = match args.get(1) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                let text = self.block_on(self.capabilities.http.post_json(&request, body))?;
                Ok(Value::String(text))
            },
            "exec" => {
                let command = match args.first() {
                    Some(Value::String(s)) => s.clone(),
                    _ => {
                        return Err(CapabilityError::invalid(
                            "nyanHostExec requires a command string",
                        ));
                    },
                };
                let result = self.block_on(self.capabilities.process.run(&command))?;
                serde_json::to_value(result).map_err(|e| CapabilityError::Exec(e.to_string()))
            },
            "file.read" => {
                let path = arg_str(args, 0);
                Ok(self
                    .read_file(&path)?
                    .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
                    .unwrap_or(Value::Null))
            },
            "file.base64" => {
                let path = arg_str(args, 0);
                Ok(self
                    .read_file(&path)?
                    .map(|bytes| Value::String(encode_base64(&bytes)))
                    .unwrap_or(Value::Null))
            },
            "file.attachment" => {
                let path = arg_str(args, 0);
                match self.read_file(&path)? {
                    Some(bytes) => serde_json::to_value(Attachment::from_bytes(&path, &bytes))
                        .map_err(|e| CapabilityError::Mail(e.to_string())),
                    None => Ok(Value::Null),
                }
            },
            "mail.send" => {
                let message = mail::compose(args, &self.capabilities.mail_defaults)?;
                self.block_on(self.capabilities.mailer.send(&message))?;
                info!(operation = %self.operation, to = ?message.to, subject = %message.subject, "mail sent");
                Ok(Value::Bool(true))
            },
            other => Err(CapabilityError::invalid(format!(
                "unknown host capability: {other}"
            ))),
        }
    }

    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        self.block_on(self.capabilities.files.read(path))
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }
}

fn outbound(
    url: Option<&Value>,
    username: Option<&Value>,
    password: Option<&Value>,
    headers: Option<&Value>,
) -> Result<OutboundRequest, CapabilityError> {
    let url = display(url);
    if url.is_empty() {
        return Err(CapabilityError::invalid("url is required"));
    }
    Ok(OutboundRequest {
        url,
        username: display(username),
        password: display(password),
        headers: parse_headers(headers)?,
    })
}

/// Headers may be an object or a JSON object string. Non-string values are
/// stringified.
fn parse_headers(value: Option<&Value>) -> Result<Vec<(String, String)>, CapabilityError> {
    let map = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => serde_json::from_str::<HashMap<String, Value>>(s)
            .map_err(|e| CapabilityError::invalid(format!("Invalid header JSON: {e}")))?,
        Some(Value::Object(obj)) => obj.clone().into_iter().collect(),
        Some(other) => {
            return Err(CapabilityError::invalid(format!(
                "Invalid header JSON: expected an object, got {other}"
            )));
        },
    };
    let mut headers: Vec<(String, String)> = map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect();
    headers.sort();
    Ok(headers)
}

/// String form of argument `i`. Missing and `null` read as empty.
fn arg_str(args: &[Value], i: usize) -> String {
    display(args.get(i))
}

fn display(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn reply(result: Result<Value, CapabilityError>) -> String {
    match result {
        Ok(value) => json!({"ok": true, "value": value}),
        Err(e) => json!({"ok": false, "error": e.to_string()}),
    }
    .to_string()
}
