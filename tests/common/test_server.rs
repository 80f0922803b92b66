use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use benchlog::auth::TokenGenerator;
use benchlog::config::DEFAULT_MAX_UPLOAD_BYTES;
use benchlog::server::{AppState, create_router};
use benchlog::storage::FsObjectStore;
use benchlog::store::{SqliteStore, Store};

pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub admin_token: String,
    pub client: reqwest::Client,
    server_task: JoinHandle<()>,
}

/// A registered user and a bearer token for it.
#[allow(dead_code)]
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub token: String,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_upload_limit(DEFAULT_MAX_UPLOAD_BYTES).await
    }

    /// Runs the router in-process on an ephemeral port. The listener is bound
    /// first so object URLs carry the real address.
    pub async fn start_with_upload_limit(max_upload_bytes: usize) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let data_dir = temp_dir.path();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let store = SqliteStore::new(data_dir.join("benchlog.db")).expect("open store");
        store.initialize().expect("initialize store");

        let generator = TokenGenerator::new().expect("token generator");
        let (token, admin_token) = generator.issue(true, None, None).expect("issue admin token");
        store.create_token(&token).expect("store admin token");

        let objects = FsObjectStore::new(&data_dir.join("objects"), base_url.clone());
        let state = Arc::new(
            AppState::new(Arc::new(store), Arc::new(objects), max_upload_bytes)
                .expect("build app state"),
        );
        let app = create_router(state);

        let server_task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let client = reqwest::Client::new();
        Self::wait_for_ready(&client, &base_url).await;

        Self {
            temp_dir,
            base_url,
            admin_token,
            client,
            server_task,
        }
    }

    async fn wait_for_ready(client: &reqwest::Client, base_url: &str) {
        for _ in 0..50 {
            if client
                .get(format!("{}/health", base_url))
                .send()
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        panic!("Server did not become ready");
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Creates a user through the admin API and issues it a token.
    pub async fn create_user(&self, email: &str) -> TestUser {
        let resp = self
            .client
            .post(self.url("/api/v1/admin/users"))
            .bearer_auth(&self.admin_token)
            .json(&json!({ "email": email }))
            .send()
            .await
            .expect("create user");
        assert_eq!(resp.status(), 201, "create user {email}");
        let body: Value = resp.json().await.expect("parse user");
        let id = body["data"]["id"].as_str().expect("user id").to_string();
        let email = body["data"]["email"].as_str().expect("email").to_string();

        let resp = self
            .client
            .post(self.url(&format!("/api/v1/admin/users/{}/tokens", id)))
            .bearer_auth(&self.admin_token)
            .json(&json!({}))
            .send()
            .await
            .expect("create token");
        assert_eq!(resp.status(), 201, "create token for {email}");
        let body: Value = resp.json().await.expect("parse token");
        let token = body["data"]["token"].as_str().expect("raw token").to_string();

        TestUser { id, email, token }
    }

    /// Creates an experiment as `user` and returns the resulting view.
    pub async fn create_experiment(&self, user: &TestUser, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/api/v1/experiments"))
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await
            .expect("create experiment");
        assert_eq!(resp.status(), 201, "create experiment");
        let body: Value = resp.json().await.expect("parse experiment");
        body["data"].clone()
    }

    pub async fn list_experiments(&self, user: &TestUser, query: &str) -> Vec<Value> {
        let resp = self
            .client
            .get(self.url(&format!("/api/v1/experiments{}", query)))
            .bearer_auth(&user.token)
            .send()
            .await
            .expect("list experiments");
        assert_eq!(resp.status(), 200, "list experiments");
        let body: Value = resp.json().await.expect("parse list");
        body["data"].as_array().expect("experiment array").clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}
