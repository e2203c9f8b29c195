//! Mail composition for `nyanSendMail`.
//!
//! Two call shapes are accepted:
//!
//! - object: `nyanSendMail({to, cc, bcc, subject, body, html, attachments})`
//! - positional: `nyanSendMail(to, subject, body[, html][, cc][, bcc])`
//!
//! Recipient lists may be a string or an array of strings.

use std::collections::HashSet;

use {
    async_trait::async_trait,
    scriptgate_config::SmtpConfig,
    serde::Serialize,
    serde_json::{Map, Value},
};

use crate::{
    capabilities::{Mailer, files::Attachment},
    error::CapabilityError,
};

/// Sender identity and blind-copy list applied to every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailDefaults {
    pub from_email: String,
    pub from_name: String,
    pub default_bcc: Vec<String>,
}

impl From<&SmtpConfig> for MailDefaults {
    fn from(cfg: &SmtpConfig) -> Self {
        Self {
            from_email: cfg.from_email.clone(),
            from_name: cfg.from_name.clone(),
            default_bcc: cfg.default_bcc.clone(),
        }
    }
}

/// A fully composed message, ready for a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub from_email: String,
    pub from_name: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
    pub attachments: Vec<Attachment>,
}

/// Build a message from guest arguments.
pub fn compose(args: &[Value], defaults: &MailDefaults) -> Result<OutgoingMail, CapabilityError> {
    let mut mail = match args {
        [Value::Object(obj)] => from_object(obj)?,
        _ => from_positional(args)?,
    };

    mail.bcc.extend(defaults.default_bcc.iter().cloned());
    let (to, cc, bcc) = dedup_recipients(&mail.to, &mail.cc, &mail.bcc);
    if to.is_empty() {
        return Err(CapabilityError::Mail("nyanSendMail: 'to' is empty".into()));
    }
    mail.to = to;
    mail.cc = cc;
    mail.bcc = bcc;
    mail.from_email = defaults.from_email.clone();
    mail.from_name = defaults.from_name.clone();
    Ok(mail)
}

fn from_object(obj: &Map<String, Value>) -> Result<OutgoingMail, CapabilityError> {
    let subject = obj
        .get("subject")
        .map(display)
        .unwrap_or_default();
    if subject.trim().is_empty() {
        return Err(CapabilityError::Mail(
            "nyanSendMail: 'subject' is empty".into(),
        ));
    }
    let attachments = match obj.get("attachments") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            CapabilityError::Mail(format!("nyanSendMail: invalid attachments: {e}"))
        })?,
    };
    Ok(OutgoingMail {
        to: recipients(obj.get("to")),
        cc: recipients(obj.get("cc")),
        bcc: recipients(obj.get("bcc")),
        subject,
        body: obj.get("body").map(display).unwrap_or_default(),
        html: obj.get("html").is_some_and(truthy),
        attachments,
        ..Default::default()
    })
}

fn from_positional(args: &[Value]) -> Result<OutgoingMail, CapabilityError> {
    if args.len() < 3 {
        return Err(CapabilityError::Mail(
            "nyanSendMail requires (to, subject, body) or a single object".into(),
        ));
    }
    Ok(OutgoingMail {
        to: recipients(args.first()),
        subject: display(&args[1]),
        body: display(&args[2]),
        html: args.get(3).is_some_and(truthy),
        cc: recipients(args.get(4)),
        bcc: recipients(args.get(5)),
        ..Default::default()
    })
}

fn recipients(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Trim, drop empties, and keep only the first spelling of each address
/// (case-insensitive) across to → cc → bcc.
pub fn dedup_recipients(
    to: &[String],
    cc: &[String],
    bcc: &[String],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut pass = |list: &[String]| -> Vec<String> {
        list.iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .filter(|a| seen.insert(a.to_lowercase()))
            .map(str::to_string)
            .collect()
    };
    let to = pass(to);
    let cc = pass(cc);
    let bcc = pass(bcc);
    (to, cc, bcc)
}

/// Mailer used when `smtp.host` is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, _mail: &OutgoingMail) -> Result<(), CapabilityError> {
        Err(CapabilityError::Mail("SMTP not configured".into()))
    }
}
