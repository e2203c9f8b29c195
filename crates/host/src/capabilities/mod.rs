//! Host capabilities reachable from guest scripts.
//!
//! Each external effect sits behind a trait so the gateway can inject the
//! production implementation and tests can inject fakes.

pub mod files;
pub mod http;
pub mod mail;
pub mod process;
pub mod smtp;

use std::{sync::Arc, time::Duration};

use {async_trait::async_trait, scriptgate_config::GatewayConfig};

pub use {
    files::{Attachment, RootFileReader},
    http::{OutboundRequest, ReqwestHttpClient},
    mail::{MailDefaults, OutgoingMail, UnconfiguredMailer},
    process::{ExecResult, ShellRunner},
    smtp::SmtpMailer,
};

use crate::{error::CapabilityError, kv::KvStore};

/// Outbound HTTP.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET and return the response body as text.
    async fn get(&self, request: &OutboundRequest) -> Result<String, CapabilityError>;

    /// POST a JSON body and return the response body as text.
    async fn post_json(
        &self,
        request: &OutboundRequest,
        body: String,
    ) -> Result<String, CapabilityError>;
}

/// Host command execution.
///
/// A command that runs and exits non-zero is `Ok` with `success == false`;
/// only spawn failures and timeouts are errors.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<ExecResult, CapabilityError>;
}

/// Read access to files under the deployment root.
#[async_trait]
pub trait FileReader: Send + Sync {
    /// `Ok(None)` when the file does not exist.
    async fn read(&self, relative: &str) -> Result<Option<Vec<u8>>, CapabilityError>;
}

/// Outbound mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), CapabilityError>;
}

/// The capability table handed to every execution.
#[derive(Clone)]
pub struct Capabilities {
    pub http: Arc<dyn HttpClient>,
    pub process: Arc<dyn ProcessRunner>,
    pub files: Arc<dyn FileReader>,
    pub mailer: Arc<dyn Mailer>,
    pub kv: Arc<KvStore>,
    pub mail_defaults: MailDefaults,
}

impl Capabilities {
    /// Production capabilities for a loaded config.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, CapabilityError> {
        let mailer: Arc<dyn Mailer> = if config.smtp.is_configured() {
            Arc::new(SmtpMailer::new(&config.smtp)?)
        } else {
            Arc::new(UnconfiguredMailer)
        };
        Ok(Self {
            http: Arc::new(ReqwestHttpClient::new(Duration::from_secs(
                config.http.timeout_secs,
            ))?),
            process: Arc::new(ShellRunner {
                timeout: Duration::from_secs(config.exec.timeout_secs),
                max_output_bytes: config.exec.max_output_bytes,
                working_dir: Some(config.scripts.root.clone()),
            }),
            files: Arc::new(RootFileReader::new(config.scripts.root.clone())),
            mailer,
            kv: Arc::new(KvStore::new()),
            mail_defaults: MailDefaults::from(&config.smtp),
        })
    }
}
