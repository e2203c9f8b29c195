//! End-to-end tests: a temporary deployment served on an ephemeral port.

use std::{
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    reqwest::StatusCode,
    scriptgate_config::{GatewayConfig, ScriptsConfig, ServerConfig},
    scriptgate_gateway::{GatewayState, build_gateway_app},
    scriptgate_host::Capabilities,
    serde_json::{Value, json},
    tempfile::TempDir,
    tokio_tungstenite::tungstenite::Message as WsMessage,
};

const MANIFEST: &str = r#"{
    "add": {"script": "scripts/add.js", "description": "Adds two"},
    "echo": {"script": "scripts/echo.js", "description": "Echoes parameters"},
    "secure": {"script": "scripts/secure.js"},
    "nostatus": {"script": "scripts/nostatus.js"},
    "session": {"script": "scripts/session.js"},
    "notify": {"script": "scripts/notify.js", "push": "board"},
    "board": {"script": "scripts/board.js"},
    "ping": {"script": "scripts/ping.js"},
    "draft": {"description": "Work in progress"}
}"#;

const SCRIPTS: &[(&str, &str)] = &[
    (
        "add.js",
        r#"const nyanAcceptedParams = {"addNumber": 1};
const nyanOutputColumns = ["result"];
JSON.stringify({success: true, status: 200, result: Number(nyanAllParams.addNumber) + 2});"#,
    ),
    ("echo.js", "JSON.stringify({status: 200, params: nyanAllParams});"),
    (
        "secure.js",
        r#"JSON.stringify({success: false, status: 401, message: "denied"});"#,
    ),
    ("nostatus.js", r#"JSON.stringify({success: true});"#),
    (
        "session.js",
        r#"const previous = nyanGetCookie("sid");
nyanSetCookie("sid", "fresh");
JSON.stringify({status: 200, previous: previous});"#,
    ),
    ("notify.js", r#"JSON.stringify({status: 200, queued: true});"#),
    ("board.js", r#""Push: note " + nyanAllParams.msg;"#),
    ("ping.js", r#""pong";"#),
];

struct Deployment {
    _root: TempDir,
    addr: SocketAddr,
    client: reqwest::Client,
}

impl Deployment {
    async fn start() -> Self {
        Self::start_behind(Vec::new()).await
    }

    /// Deployment that honours forwarding headers from `trusted_proxies`.
    async fn start_behind(trusted_proxies: Vec<IpAddr>) -> Self {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "api.json", MANIFEST);
        for (name, body) in SCRIPTS {
            write(&root.path().join("scripts"), name, body);
        }

        let config = GatewayConfig {
            server: ServerConfig {
                trusted_proxies,
                ..Default::default()
            },
            scripts: ScriptsConfig {
                root: root.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let state = GatewayState::new(&config, Capabilities::from_config(&config).unwrap());
        let app = build_gateway_app(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            _root: root,
            addr,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn post_json(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    /// `initialize` and return the session token.
    async fn mcp_session(&self) -> String {
        let resp = self
            .post_json(
                "/mcp",
                json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}),
            )
            .await;
        resp.headers()
            .get("mcp-session-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn mcp_call(&self, session: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/mcp"))
            .header("mcp-session-id", session)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

fn write(dir: &Path, name: &str, body: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), body).unwrap();
}

// ── Dynamic route ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn dynamic_route_runs_script() {
    let gw = Deployment::start().await;
    let resp = gw
        .client
        .get(gw.url("/add?addNumber=10"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"success": true, "result": 12, "status": 200}));
}

#[tokio::test(flavor = "multi_thread")]
async fn root_path_takes_operation_from_api_param() {
    let gw = Deployment::start().await;
    let resp = gw.post_json("/", json!({"api": "add", "addNumber": 1})).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn route_name_wins_and_metadata_is_injected() {
    let gw = Deployment::start().await;
    let resp = gw
        .post_json("/echo?x=1", json!({"api": "add", "_method": "FAKE", "y": 2}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let params = resp.json::<Value>().await.unwrap()["params"].clone();
    assert_eq!(params["api"], "echo");
    assert_eq!(params["x"], "1");
    assert_eq!(params["y"], 2);
    assert_eq!(params["_method"], "POST");
    assert_eq!(params["_remote_ip"], "127.0.0.1");
}

async fn remote_ip_seen_by_script(gw: &Deployment) -> Value {
    let resp = gw
        .client
        .get(gw.url("/echo"))
        .header("x-forwarded-for", "6.6.6.6, 10.0.0.1")
        .header("x-real-ip", "7.7.7.7")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.json::<Value>().await.unwrap()["params"]["_remote_ip"].clone()
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarding_headers_need_a_trusted_proxy() {
    let direct = Deployment::start().await;
    assert_eq!(remote_ip_seen_by_script(&direct).await, "127.0.0.1");

    let proxied = Deployment::start_behind(vec![[127, 0, 0, 1].into()]).await;
    assert_eq!(remote_ip_seen_by_script(&proxied).await, "6.6.6.6");
}

#[tokio::test(flavor = "multi_thread")]
async fn dynamic_route_error_statuses() {
    let gw = Deployment::start().await;

    let resp = gw.client.get(gw.url("/missing")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = gw.client.get(gw.url("/nostatus")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("status"));

    let resp = gw
        .client
        .post(gw.url("/add"))
        .header("content-type", "application/json")
        .body("[1, 2]")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = gw.client.get(gw.url("/secure")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn cookies_flow_through_dynamic_route() {
    let gw = Deployment::start().await;
    let resp = gw
        .client
        .get(gw.url("/session"))
        .header("cookie", "sid=stale")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("sid=fresh"));
    assert!(set_cookie.contains("Max-Age=3600"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["previous"], "stale");
}

// ── JSON-RPC ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn rpc_success_and_failures() {
    let gw = Deployment::start().await;

    let resp = gw
        .post_json(
            "/nyan-rpc",
            json!({"jsonrpc": "2.0", "method": "add", "params": {"addNumber": 5}, "id": 1}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], json!({"success": true, "result": 7}));
    assert_eq!(body["id"], 1);

    let body: Value = gw
        .post_json(
            "/nyan-rpc",
            json!({"jsonrpc": "2.0", "method": "secure", "id": "a"}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32001);
    assert_eq!(body["error"]["data"]["message"], "denied");

    let body: Value = gw
        .post_json(
            "/nyan-rpc",
            json!({"jsonrpc": "2.0", "method": "missing", "id": 2}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32601);

    let resp = gw
        .client
        .post(gw.url("/nyan-rpc"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test(flavor = "multi_thread")]
async fn rpc_reads_and_sets_cookies() {
    let gw = Deployment::start().await;
    let resp = gw
        .client
        .post(gw.url("/nyan-rpc"))
        .header("cookie", "sid=stale")
        .json(&json!({"jsonrpc": "2.0", "method": "session", "id": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("sid=fresh"));
    assert!(set_cookie.contains("HttpOnly"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["previous"], "stale");
}

#[tokio::test(flavor = "multi_thread")]
async fn rpc_answers_null_id() {
    let gw = Deployment::start().await;
    let resp = gw
        .client
        .post(gw.url("/nyan-rpc"))
        .header("content-type", "application/json")
        .body(r#"{"jsonrpc": "2.0", "method": "add", "params": {"addNumber": 1}, "id": null}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], Value::Null);
    assert_eq!(body["result"]["result"], 3);
}

// ── Missing status ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn missing_status_is_internal_on_every_adapter() {
    let gw = Deployment::start().await;

    let resp = gw.client.get(gw.url("/nostatus")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let rpc: Value = gw
        .post_json(
            "/nyan-rpc",
            json!({"jsonrpc": "2.0", "method": "nostatus", "id": 1}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(rpc["error"]["code"], -32603);
    assert!(rpc["error"]["data"].as_str().unwrap().contains("status"));
    assert!(rpc.get("result").is_none());

    let session = gw.mcp_session().await;
    let tool: Value = gw
        .mcp_call(
            &session,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "nostatus", "arguments": {}}
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(tool["error"]["code"], -32603);
    assert!(tool.get("result").is_none());
}

// ── Tool protocol ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn mcp_session_lifecycle() {
    let gw = Deployment::start().await;

    let resp = gw
        .post_json(
            "/mcp",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {"protocolVersion": "1999-01-01", "clientInfo": {"name": "test"}}
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let session = resp
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");

    let list: Value = gw
        .client
        .post(gw.url("/mcp"))
        .header("mcp-session-id", &session)
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tools = list["result"]["tools"].as_array().unwrap();
    let add = tools.iter().find(|t| t["name"] == "add").unwrap();
    assert_eq!(add["description"], "Adds two");
    assert_eq!(
        add["inputSchema"]["properties"]["addNumber"]["type"],
        "integer"
    );

    let call: Value = gw
        .client
        .post(gw.url("/mcp"))
        .header("mcp-session-id", &session)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "secure", "arguments": {}}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(call["result"]["isError"], true);
    assert_eq!(call["result"]["content"][0]["type"], "text");

    let resp = gw
        .client
        .delete(gw.url("/mcp"))
        .header("mcp-session-id", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = gw
        .client
        .post(gw.url("/mcp"))
        .header("mcp-session-id", &session)
        .json(&json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn mcp_requires_session_but_not_for_ping() {
    let gw = Deployment::start().await;

    let resp = gw
        .post_json("/mcp", json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = gw
        .post_json("/mcp", json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = gw.client.get(gw.url("/mcp")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test(flavor = "multi_thread")]
async fn mcp_null_id_gets_a_reply() {
    let gw = Deployment::start().await;
    let session = gw.mcp_session().await;

    let resp = gw
        .mcp_call(
            &session,
            json!({"jsonrpc": "2.0", "id": null, "method": "tools/list"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], Value::Null);
    let tools = body["result"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "add"));
    assert!(!tools.iter().any(|t| t["name"] == "draft"));

    let resp = gw
        .mcp_call(
            &session,
            json!({"jsonrpc": "2.0", "method": "tools/list"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

// ── Streaming + push ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn push_reaches_registered_stream() {
    let gw = Deployment::start().await;
    let (mut board, _) = tokio_tungstenite::connect_async(format!("ws://{}/board", gw.addr))
        .await
        .unwrap();

    // A round-trip proves the connection is registered.
    board
        .send(WsMessage::Text(json!({"api": "ping"}).to_string().into()))
        .await
        .unwrap();
    let reply = board.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "pong");

    let resp = gw
        .client
        .get(gw.url("/notify?msg=hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let pushed = tokio::time::timeout(Duration::from_secs(10), board.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(pushed.into_text().unwrap().as_str(), "note hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_reports_bad_frames() {
    let gw = Deployment::start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", gw.addr))
        .await
        .unwrap();

    ws.send(WsMessage::Text("not json".into())).await.unwrap();
    let reply: Value =
        serde_json::from_str(ws.next().await.unwrap().unwrap().into_text().unwrap().as_str())
            .unwrap();
    assert_eq!(reply["error"], "Invalid JSON data");

    ws.send(WsMessage::Text(json!({"x": 1}).to_string().into()))
        .await
        .unwrap();
    let reply: Value =
        serde_json::from_str(ws.next().await.unwrap().unwrap().into_text().unwrap().as_str())
            .unwrap();
    assert_eq!(reply["error"], "Invalid script value");
}

// ── Discovery ────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn discovery_redacts_script_paths() {
    let gw = Deployment::start().await;

    let summary: Value = gw
        .client
        .get(gw.url("/nyan"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["nyan"]["name"], "scriptgate");
    assert_eq!(summary["apis"]["add"]["description"], "Adds two");
    assert!(summary["apis"]["add"].get("script").is_none());

    let same: Value = gw
        .client
        .get(gw.url("/?api=nyan"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(same, summary);

    let detail: Value = gw
        .client
        .get(gw.url("/nyan/add"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["nyanAcceptedParams"], json!({"addNumber": 1}));
    assert_eq!(detail["nyanOutputColumns"], json!(["result"]));

    let resp = gw.client.get(gw.url("/nyan/missing")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = gw.client.get(gw.url("/nyan/draft")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let draft: Value = resp.json().await.unwrap();
    assert_eq!(
        draft,
        json!({
            "api": "draft",
            "description": "Work in progress",
            "nyanAcceptedParams": {},
            "nyanOutputColumns": [],
        })
    );

    let resp = gw.client.get(gw.url("/favicon.ico")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}
