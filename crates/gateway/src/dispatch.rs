//! Shared dispatch core used by every protocol adapter.
//!
//! resolve (fresh manifest snapshot) → execute → hand back the raw output.
//! Adapters interpret the envelope themselves, then hand the invocation back
//! for the optional push side effect.

use std::sync::Arc;

use tracing::{debug, info, warn};

use scriptgate_host::{ExecutionError, ExecutionHost, ScriptRequest, TransportContext};

use crate::{
    envelope::EnvelopeError,
    manifest::{Manifest, ManifestError, ManifestStore, OperationEntry},
    params::{ParameterBag, UnifyError},
    push::{DeliveryOutcome, FrameKind, OutboundFrame, PushRegistry},
    schema::{SchemaExtractor, ScriptSchema},
};

/// Stripped from the start of a push script's output before delivery.
pub const PUSH_PREFIX: &str = "Push: ";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Malformed(#[from] UnifyError),

    #[error("no operation specified")]
    NoOperation,

    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Misconfigured(String),

    #[error("failed to read API configuration: {0}")]
    ManifestUnavailable(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("invalid script result: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl From<ManifestError> for DispatchError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::NotFound(name) => Self::NotFound(name),
            e @ ManifestError::Misconfigured { .. } => Self::Misconfigured(e.to_string()),
            e @ (ManifestError::Unreadable { .. } | ManifestError::Invalid(_)) => {
                Self::ManifestUnavailable(e.to_string())
            },
        }
    }
}

/// A completed primary execution.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Snapshot the operation was resolved from; push targets resolve here too.
    pub manifest: Manifest,
    pub entry: OperationEntry,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    NoTarget,
    TargetUnavailable,
    ExecutionFailed,
    Delivered,
    ChannelNotFound,
    WriteError,
}

pub struct Dispatcher {
    manifest: ManifestStore,
    host: ExecutionHost,
    push: Arc<PushRegistry>,
}

impl Dispatcher {
    pub fn new(manifest: ManifestStore, host: ExecutionHost, push: Arc<PushRegistry>) -> Self {
        Self {
            manifest,
            host,
            push,
        }
    }

    pub fn push_registry(&self) -> &Arc<PushRegistry> {
        &self.push
    }

    pub async fn load_manifest(&self) -> Result<Manifest, DispatchError> {
        Ok(self.manifest.load().await?)
    }

    /// Resolve and execute `operation`.
    pub async fn invoke(
        &self,
        operation: &str,
        params: &ParameterBag,
        transport: TransportContext,
    ) -> Result<Invocation, DispatchError> {
        let (manifest, entry) = self.manifest.resolve(operation).await?;
        let raw = self.run(&entry, params, transport).await?;
        Ok(Invocation {
            manifest,
            entry,
            raw,
        })
    }

    async fn run(
        &self,
        entry: &OperationEntry,
        params: &ParameterBag,
        transport: TransportContext,
    ) -> Result<String, ExecutionError> {
        self.host
            .execute(ScriptRequest {
                operation: &entry.name,
                script: &entry.script,
                includes: &entry.includes,
                params,
                transport,
            })
            .await
    }

    /// Execute `source`'s push target with the same parameters and deliver
    /// its output to the channel named after the target.
    pub async fn push(
        &self,
        manifest: &Manifest,
        source: &OperationEntry,
        params: &ParameterBag,
        kind: FrameKind,
    ) -> PushOutcome {
        let Some(target) = source.push.as_deref() else {
            return PushOutcome::NoTarget;
        };
        let entry = match manifest.resolve(target) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(source = %source.name, target, error = %e, "push target unavailable");
                return PushOutcome::TargetUnavailable;
            },
        };
        let raw = match self.run(&entry, params, TransportContext::detached()).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(source = %source.name, target, error = %e, "push script failed");
                return PushOutcome::ExecutionFailed;
            },
        };
        let payload = raw.strip_prefix(PUSH_PREFIX).unwrap_or(&raw).to_string();

        match self.push.deliver(target, OutboundFrame::new(kind, payload)) {
            DeliveryOutcome::Delivered => {
                info!(source = %source.name, target, "push delivered");
                PushOutcome::Delivered
            },
            DeliveryOutcome::NotFound => {
                debug!(source = %source.name, target, "no connection registered for push target");
                PushOutcome::ChannelNotFound
            },
            DeliveryOutcome::WriteError => {
                warn!(source = %source.name, target, "push delivery failed");
                PushOutcome::WriteError
            },
        }
    }

    /// Fire-and-forget [`push`](Self::push). Nothing is spawned when the
    /// operation declares no target.
    pub fn spawn_push(self: &Arc<Self>, invocation: &Invocation, params: ParameterBag, kind: FrameKind) {
        if invocation.entry.push.is_none() {
            return;
        }
        let this = Arc::clone(self);
        let manifest = invocation.manifest.clone();
        let entry = invocation.entry.clone();
        tokio::spawn(async move {
            this.push(&manifest, &entry, &params, kind).await;
        });
    }

    /// Declared schema of an entry's script; empty when unreadable.
    pub async fn script_schema(
        &self,
        entry: &OperationEntry,
        extractor: &dyn SchemaExtractor,
    ) -> ScriptSchema {
        match self.host.read_source(&entry.script).await {
            Ok(source) => extractor.extract(&source),
            Err(e) => {
                debug!(operation = %entry.name, error = %e, "script unreadable; empty schema");
                ScriptSchema::default()
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{path::Path, sync::Arc, time::Duration};

    use {
        scriptgate_host::{
            Capabilities, ExecutionLimits, KvStore,
            capabilities::{MailDefaults, ReqwestHttpClient, RootFileReader, ShellRunner, UnconfiguredMailer},
        },
        serde_json::json,
        tokio::sync::mpsc,
    };

    use {
        super::*,
        crate::{params::ParameterBag, push::PushConnection},
    };

    pub(crate) fn write(root: &Path, name: &str, body: &str) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    pub(crate) fn dispatcher(root: &Path) -> Arc<Dispatcher> {
        let capabilities = Capabilities {
            http: Arc::new(ReqwestHttpClient::new(Duration::from_secs(5)).unwrap()),
            process: Arc::new(ShellRunner::default()),
            files: Arc::new(RootFileReader::new(root)),
            mailer: Arc::new(UnconfiguredMailer),
            kv: Arc::new(KvStore::new()),
            mail_defaults: MailDefaults::default(),
        };
        let host = ExecutionHost::new(root, Vec::new(), capabilities, ExecutionLimits {
            timeout: Duration::from_secs(5),
            ..Default::default()
        });
        Arc::new(Dispatcher::new(
            ManifestStore::new(root.join("api.json")),
            host,
            Arc::new(PushRegistry::new()),
        ))
    }

    fn bag(v: serde_json::Value) -> ParameterBag {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invoke_runs_script_with_params() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "api.json", r#"{"add": {"script": "add.js"}}"#);
        write(
            dir.path(),
            "add.js",
            "JSON.stringify({status: 200, success: true, result: Number(nyanAllParams.addNumber) + 2})",
        );
        let d = dispatcher(dir.path());
        let inv = d
            .invoke("add", &bag(json!({"addNumber": "10"})), TransportContext::detached())
            .await
            .unwrap();
        assert_eq!(inv.raw, r#"{"status":200,"success":true,"result":12}"#);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_classification() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "api.json",
            r#"{"noscript": {}, "boom": {"script": "boom.js"}, "gone": {"script": "gone.js"}}"#,
        );
        write(dir.path(), "boom.js", "throw new Error('bad input')");
        let d = dispatcher(dir.path());
        let t = TransportContext::detached;

        assert!(matches!(
            d.invoke("nope", &bag(json!({})), t()).await,
            Err(DispatchError::NotFound(_))
        ));
        assert!(matches!(
            d.invoke("noscript", &bag(json!({})), t()).await,
            Err(DispatchError::Misconfigured(_))
        ));
        match d.invoke("boom", &bag(json!({})), t()).await {
            Err(DispatchError::Execution(e)) => assert_eq!(e.to_string(), "bad input"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            d.invoke("gone", &bag(json!({})), t()).await,
            Err(DispatchError::Execution(ExecutionError::ScriptUnreadable { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_manifest_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        assert!(matches!(
            d.invoke("add", &bag(json!({})), TransportContext::detached()).await,
            Err(DispatchError::ManifestUnavailable(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_strips_prefix_and_delivers() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "api.json",
            r#"{"post": {"script": "post.js", "push": "feed"}, "feed": {"script": "feed.js"}}"#,
        );
        write(dir.path(), "post.js", "JSON.stringify({status: 200})");
        write(dir.path(), "feed.js", "'Push: ' + nyanAllParams.msg");
        let d = dispatcher(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        d.push_registry().register("feed", PushConnection::new("c", tx));

        let params = bag(json!({"msg": "hello"}));
        let inv = d.invoke("post", &params, TransportContext::detached()).await.unwrap();
        assert_eq!(
            d.push(&inv.manifest, &inv.entry, &params, FrameKind::Text).await,
            PushOutcome::Delivered
        );
        assert_eq!(rx.recv().await.unwrap(), OutboundFrame::Text("hello".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_outcomes_without_delivery() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "api.json",
            r#"{
                "plain": {"script": "ok.js"},
                "dangling": {"script": "ok.js", "push": "missing"},
                "unheard": {"script": "ok.js", "push": "plain"},
                "failing": {"script": "ok.js", "push": "broken"},
                "broken": {"script": "broken.js"}
            }"#,
        );
        write(dir.path(), "ok.js", "JSON.stringify({status: 200})");
        write(dir.path(), "broken.js", "throw new Error('x')");
        let d = dispatcher(dir.path());
        let params = bag(json!({}));
        let manifest = d.load_manifest().await.unwrap();

        for (name, expected) in [
            ("plain", PushOutcome::NoTarget),
            ("dangling", PushOutcome::TargetUnavailable),
            ("unheard", PushOutcome::ChannelNotFound),
            ("failing", PushOutcome::ExecutionFailed),
        ] {
            let entry = manifest.resolve(name).unwrap();
            assert_eq!(
                d.push(&manifest, &entry, &params, FrameKind::Text).await,
                expected,
                "{name}"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schema_of_unreadable_script_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "api.json", r#"{"a": {"script": "a.js"}}"#);
        let d = dispatcher(dir.path());
        let manifest = d.load_manifest().await.unwrap();
        let schema = d
            .script_schema(&manifest.resolve("a").unwrap(), &crate::schema::ConstScanExtractor)
            .await;
        assert_eq!(schema, ScriptSchema::default());
    }
}
