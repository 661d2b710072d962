//! End-to-end HTTP tests: in-process server on an ephemeral port, local engine, fake data endpoint.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use reqwest::{redirect, StatusCode};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use sensilabel::config::AppConfig;
use common::{Behavior, RecordingRuntime, ScriptedTokenProvider};
use sensilabel::engine::local::{read_container, LocalRuntime, PolicySource};
use sensilabel::engine::ClassificationRuntime;
use sensilabel::identity::DevTokenProvider;
use sensilabel::server::{build_router, AppState};

const USER: &str = "alice@contoso.com";
const GENERAL: &str = "f42aa342-8706-4288-bd11-ebb85995028c";
const HIGHLY_CONFIDENTIAL: &str = "fb3ee2d3-1d5c-4e4b-8b4e-2a8f5f9d6c7e";

struct TestServer {
    base: String,
    provider: Arc<DevTokenProvider>,
    client: reqwest::Client,
    _tmp: TempDir,
    handles: Vec<JoinHandle<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for h in &self.handles { h.abort(); }
    }
}

async fn serve(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("test server error: {e:?}");
        }
    });
    (addr, handle)
}

async fn start() -> TestServer {
    let rows = serde_json::json!([
        {"Name": "Widget", "Quantity": 3, "InStock": true},
        {"Name": "Gadget <b>", "Quantity": 7.5, "InStock": false},
    ]);
    let data_app = Router::new().route("/rows", get(move || { let rows = rows.clone(); async move { Json(rows) } }));
    let (data_addr, data_handle) = serve(data_app).await;

    let tmp = tempfile::tempdir().unwrap();
    let config = AppConfig {
        cache_dir: tmp.path().join("mip_data"),
        data_endpoint: Some(format!("http://{}/rows", data_addr)),
        ..AppConfig::default()
    };
    let provider = Arc::new(DevTokenProvider::new());
    let runtime = Arc::new(LocalRuntime::new(PolicySource::Builtin));
    let state = AppState::new(config, runtime, provider.clone()).unwrap();
    let (addr, app_handle) = serve(build_router(state)).await;

    let client = reqwest::Client::builder().redirect(redirect::Policy::none()).build().unwrap();
    TestServer { base: format!("http://{}", addr), provider, client, _tmp: tmp, handles: vec![data_handle, app_handle] }
}

fn csrf_from(html: &str) -> String {
    let marker = r#"name="csrfToken" value=""#;
    let start = html.find(marker).expect("csrf field") + marker.len();
    let end = html[start..].find('"').unwrap() + start;
    html[start..end].to_string()
}

impl TestServer {
    async fn get_document(&self) -> reqwest::Response {
        self.client.get(format!("{}/document", self.base)).header("X-MS-CLIENT-PRINCIPAL-NAME", USER).send().await.unwrap()
    }

    async fn csrf(&self) -> String {
        let html = self.get_document().await.text().await.unwrap();
        csrf_from(&html)
    }

    async fn post(&self, fields: &[(&str, &str)]) -> reqwest::Response {
        self.client
            .post(format!("{}/document/protect", self.base))
            .header("X-MS-CLIENT-PRINCIPAL-NAME", USER)
            .form(fields)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_line() {
    let srv = start().await;
    let body = srv.client.get(format!("{}/", srv.base)).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "sensilabel ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn document_page_lists_labels_and_data() {
    let srv = start().await;
    let resp = srv.get_document().await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = resp.text().await.unwrap();
    for name in ["Public", "General", "Confidential", "Specified People", "Highly Confidential"] {
        assert!(html.contains(name), "missing label {}", name);
    }
    assert!(html.contains("<th>Name</th><th>Quantity</th><th>InStock</th>"));
    assert!(html.contains("Gadget &lt;b&gt;"));
    assert_eq!(csrf_from(&html).len(), 64);
    assert!(html.contains(r#"data-requires-additional-info="false""#));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_identity_is_unauthorized() {
    let srv = start().await;
    let resp = srv.client.get(format!("{}/document", srv.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = srv.client.post(format!("{}/document/protect", srv.base)).form(&[("labelId", GENERAL)]).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consent_redirects_to_challenge() {
    let srv = start().await;
    srv.provider.require_consent(USER);
    let resp = srv.get_document().await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp.headers()["location"].to_str().unwrap();
    assert_eq!(location, "/.auth/login/aad?post_login_redirect_uri=%2Fdocument");

    srv.provider.grant_consent(USER);
    assert_eq!(srv.get_document().await.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn post_returns_labelled_workbook() {
    let srv = start().await;
    let csrf = srv.csrf().await;
    let resp = srv
        .post(&[("labelId", GENERAL), ("recipients", "a@example.com, b@example.com"), ("rightsTier", "Edit"), ("csrfToken", csrf.as_str())])
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
    assert_eq!(resp.headers()["content-disposition"].to_str().unwrap(), r#"attachment; filename="MyAppOutput.xlsx""#);
    let bytes = resp.bytes().await.unwrap();
    let (header, payload) = read_container(&bytes).unwrap().unwrap();
    assert_eq!(header.label.unwrap().id, GENERAL);
    assert_eq!(header.protection.unwrap().user_rights[0].rights, vec!["VIEW", "EDIT"]);
    assert!(payload.starts_with(b"PK"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn justification_label_rerenders_with_selections() {
    let srv = start().await;
    let csrf = srv.csrf().await;
    let resp = srv
        .post(&[("labelId", HIGHLY_CONFIDENTIAL), ("recipients", "a@example.com"), ("rightsTier", "All"), ("csrfToken", csrf.as_str())])
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = resp.text().await.unwrap();
    assert!(html.contains(r#"data-requires-additional-info="true""#));
    assert!(html.contains("Additional Info Required for the selected Label."));
    assert!(html.contains(&format!(r#"<option value="{}" data-sensitivity="3" selected>"#, HIGHLY_CONFIDENTIAL)));
    assert!(html.contains(r#"value="a@example.com""#));
    assert!(html.contains(r#"<option value="All" selected>All</option>"#));
    assert!(html.contains("General"));

    let resp = srv
        .post(&[
            ("labelId", HIGHLY_CONFIDENTIAL),
            ("recipients", "a@example.com"),
            ("rightsTier", "All"),
            ("justification", "board review"),
            ("csrfToken", csrf.as_str()),
        ])
        .await;
    assert_eq!(resp.headers()["content-disposition"].to_str().unwrap(), r#"attachment; filename="MyAppOutput.xlsx""#);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_label_rerenders_with_message() {
    let srv = start().await;
    let csrf = srv.csrf().await;
    let resp = srv.post(&[("labelId", "00000000-dead-beef-0000-000000000000"), ("csrfToken", csrf.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = resp.text().await.unwrap();
    assert!(html.contains("The selected label is no longer available."));
    assert!(html.contains("Confidential"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn form_validation_messages() {
    let srv = start().await;
    let csrf = srv.csrf().await;
    let html = srv.post(&[("labelId", ""), ("csrfToken", csrf.as_str())]).await.text().await.unwrap();
    assert!(html.contains("Please select a label."));

    let html = srv.post(&[("labelId", GENERAL), ("recipients", "bob"), ("csrfToken", csrf.as_str())]).await.text().await.unwrap();
    assert!(html.contains("&#39;bob&#39; is not a valid email address."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn antiforgery_token_is_required() {
    let srv = start().await;
    let _ = srv.csrf().await;
    let resp = srv.post(&[("labelId", GENERAL), ("csrfToken", "forged")]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = srv.post(&[("labelId", GENERAL)]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consent_while_protecting_redirects_the_post() {
    let srv = start().await;
    let csrf = srv.csrf().await;
    srv.provider.require_consent_for_scope(USER, "https://aadrm.com/.default");

    // label-only requests never reach the rights service
    let resp = srv.post(&[("labelId", GENERAL), ("csrfToken", csrf.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-disposition"].to_str().unwrap().starts_with("attachment"));

    let resp = srv.post(&[("labelId", GENERAL), ("recipients", "a@example.com"), ("csrfToken", csrf.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()["location"].to_str().unwrap(), "/.auth/login/aad?post_login_redirect_uri=%2Fdocument");

    srv.provider.grant_consent(USER);
    let resp = srv.post(&[("labelId", GENERAL), ("recipients", "a@example.com"), ("csrfToken", csrf.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-disposition"].to_str().unwrap().starts_with("attachment"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_session_invalidates_the_form_token() {
    let srv = start().await;
    let csrf = srv.csrf().await;
    srv.provider.require_consent(USER);
    let resp = srv.post(&[("labelId", GENERAL), ("csrfToken", csrf.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::FOUND);

    srv.provider.grant_consent(USER);
    let resp = srv.post(&[("labelId", GENERAL), ("csrfToken", csrf.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let fresh = srv.csrf().await;
    assert_ne!(fresh, csrf);
    let resp = srv.post(&[("labelId", GENERAL), ("csrfToken", fresh.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consent_while_listing_labels_redirects_the_page() {
    let tmp = tempfile::tempdir().unwrap();
    let config = AppConfig { cache_dir: tmp.path().join("mip_data"), ..AppConfig::default() };
    let runtime: Arc<dyn ClassificationRuntime> = RecordingRuntime::new(Behavior { consent_on_labels: true, ..Behavior::with_labels() });
    let state = AppState::new(config, runtime, ScriptedTokenProvider::new()).unwrap();
    let (addr, handle) = serve(build_router(state)).await;

    let client = reqwest::Client::builder().redirect(redirect::Policy::none()).build().unwrap();
    let resp = client.get(format!("http://{}/document", addr)).header("X-MS-CLIENT-PRINCIPAL-NAME", USER).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()["location"].to_str().unwrap(), "/.auth/login/aad?post_login_redirect_uri=%2Fdocument");
    handle.abort();
}
