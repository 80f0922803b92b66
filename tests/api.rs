mod common;

use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

use common::{TestServer, TestUser};

fn upload_form(filename: &str, mime: &str, data: Vec<u8>) -> Form {
    let part = Part::bytes(data)
        .file_name(filename.to_string())
        .mime_str(mime)
        .expect("valid mime");
    Form::new().part("file", part)
}

async fn upload(
    server: &TestServer,
    user: &TestUser,
    experiment_id: &str,
    kind: &str,
    form: Form,
) -> reqwest::Response {
    server
        .client
        .post(server.url(&format!(
            "/api/v1/experiments/{}/files/{}",
            experiment_id, kind
        )))
        .bearer_auth(&user.token)
        .multipart(form)
        .send()
        .await
        .expect("upload")
}

async fn create_tag(server: &TestServer, user: &TestUser, name: &str) -> (u16, Value) {
    let resp = server
        .client
        .post(server.url("/api/v1/tags"))
        .bearer_auth(&user.token)
        .json(&json!({ "name": name, "category": "reagent", "color": "#fff" }))
        .send()
        .await
        .expect("create tag");
    let status = resp.status().as_u16();
    let body: Value = resp.json().await.expect("parse tag");
    (status, body["data"].clone())
}

async fn share(
    server: &TestServer,
    owner: &TestUser,
    experiment_id: &str,
    target: &str,
    level: &str,
) -> reqwest::Response {
    server
        .client
        .post(server.url(&format!("/api/v1/experiments/{}/shares", experiment_id)))
        .bearer_auth(&owner.token)
        .json(&json!({ "user": target, "permission_level": level }))
        .send()
        .await
        .expect("share")
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "OK");
}

#[tokio::test]
async fn test_authentication_required() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;

    let resp = server
        .client
        .get(server.url("/api/v1/experiments"))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().contains_key("www-authenticate"));

    let resp = server
        .client
        .get(server.url("/api/v1/experiments"))
        .bearer_auth("benchlog_not-a-real-token")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 401);

    // Admin tokens carry no user identity.
    let resp = server
        .client
        .get(server.url("/api/v1/experiments"))
        .bearer_auth(&server.admin_token)
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 403);

    let resp = server
        .client
        .get(server.url("/api/v1/admin/users"))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_admin_user_management() {
    let server = TestServer::start().await;
    let alice = server.create_user("  Alice@Lab.Example ").await;
    assert_eq!(alice.email, "alice@lab.example");

    let resp = server
        .client
        .post(server.url("/api/v1/admin/users"))
        .bearer_auth(&server.admin_token)
        .json(&json!({ "email": "alice@lab.example" }))
        .send()
        .await
        .expect("duplicate user");
    assert_eq!(resp.status(), 409);

    let resp = server
        .client
        .post(server.url("/api/v1/admin/users"))
        .bearer_auth(&server.admin_token)
        .json(&json!({ "email": "not an email" }))
        .send()
        .await
        .expect("invalid user");
    assert_eq!(resp.status(), 400);

    let me: Value = server
        .client
        .get(server.url("/api/v1/me"))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("me")
        .json()
        .await
        .expect("parse me");
    assert_eq!(me["data"]["id"], alice.id.as_str());
    assert_eq!(me["data"]["email"], "alice@lab.example");

    let users: Value = server
        .client
        .get(server.url("/api/v1/admin/users"))
        .bearer_auth(&server.admin_token)
        .send()
        .await
        .expect("list users")
        .json()
        .await
        .expect("parse users");
    assert_eq!(users["data"].as_array().expect("users").len(), 1);
    assert_eq!(users["has_more"], false);

    server
        .create_experiment(&alice, json!({ "title": "Western blot" }))
        .await;

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/admin/users/{}", alice.id)))
        .bearer_auth(&server.admin_token)
        .send()
        .await
        .expect("delete user");
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_owner_and_viewer_scenario() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;
    let bob = server.create_user("bob@lab.example").await;

    let (status, dna) = create_tag(&server, &alice, "DNA").await;
    assert_eq!(status, 201);
    let dna_id = dna["id"].as_str().expect("tag id").to_string();

    let created = server
        .create_experiment(
            &alice,
            json!({ "title": "PCR Run 1", "status": "planning", "tag_ids": [dna_id] }),
        )
        .await;
    let id = created["id"].as_str().expect("experiment id").to_string();

    let visible = server.list_experiments(&alice, "").await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["id"], id.as_str());
    assert_eq!(visible[0]["role"], "owner");
    assert_eq!(visible[0]["effective_permission"], "edit");
    assert_eq!(visible[0]["tags"][0]["name"], "DNA");

    assert!(server.list_experiments(&bob, "").await.is_empty());
    let resp = server
        .client
        .get(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&bob.token)
        .send()
        .await
        .expect("get");
    assert_eq!(resp.status(), 403);

    let resp = share(&server, &alice, &id, "bob@lab.example", "view").await;
    assert_eq!(resp.status(), 200);

    let visible = server.list_experiments(&bob, "").await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["role"], "shared");
    assert_eq!(visible[0]["effective_permission"], "view");

    let resp = server
        .client
        .put(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&bob.token)
        .json(&json!({ "title": "Hijacked" }))
        .send()
        .await
        .expect("update");
    assert_eq!(resp.status(), 403);

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&bob.token)
        .send()
        .await
        .expect("delete");
    assert_eq!(resp.status(), 403);

    // Raising bob to edit lets him update but still not delete.
    let resp = server
        .client
        .patch(server.url(&format!("/api/v1/experiments/{}/shares/{}", id, bob.id)))
        .bearer_auth(&alice.token)
        .json(&json!({ "permission_level": "edit" }))
        .send()
        .await
        .expect("update share");
    assert_eq!(resp.status(), 200);

    let resp = server
        .client
        .put(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&bob.token)
        .json(&json!({ "title": "PCR Run 1b", "status": "in_progress", "tag_ids": [] }))
        .send()
        .await
        .expect("update");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("parse update");
    assert_eq!(body["data"]["title"], "PCR Run 1b");
    assert_eq!(body["data"]["status"], "in_progress");
    assert_eq!(body["data"]["role"], "shared");
    assert!(body["data"]["tags"].as_array().expect("tags").is_empty());

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&bob.token)
        .send()
        .await
        .expect("delete");
    assert_eq!(resp.status(), 403);

    let shares: Value = server
        .client
        .get(server.url(&format!("/api/v1/experiments/{}/shares", id)))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("list shares")
        .json()
        .await
        .expect("parse shares");
    assert_eq!(shares["data"][0]["email"], "bob@lab.example");
    assert_eq!(shares["data"][0]["permission_level"], "edit");

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/experiments/{}/shares/{}", id, bob.id)))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("revoke");
    assert_eq!(resp.status(), 204);
    assert!(server.list_experiments(&bob, "").await.is_empty());
}

#[tokio::test]
async fn test_share_validation() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;
    let bob = server.create_user("bob@lab.example").await;

    let created = server
        .create_experiment(&alice, json!({ "title": "Gel" }))
        .await;
    let id = created["id"].as_str().expect("experiment id");

    let resp = share(&server, &alice, id, "alice@lab.example", "edit").await;
    assert_eq!(resp.status(), 400);

    let resp = share(&server, &alice, id, "nobody@lab.example", "view").await;
    assert_eq!(resp.status(), 404);

    let resp = share(&server, &alice, id, &bob.id, "owner").await;
    assert!(resp.status().is_client_error());

    // Only the owner manages shares.
    share(&server, &alice, id, &bob.id, "edit").await;
    let resp = share(&server, &bob, id, "alice@lab.example", "view").await;
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_tag_create_or_get() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;
    let bob = server.create_user("bob@lab.example").await;

    let (first_status, first) = create_tag(&server, &alice, "DNA").await;
    let (second_status, second) = create_tag(&server, &alice, "DNA").await;
    assert_eq!(first_status, 201);
    assert_eq!(second_status, 200);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["color"], "#fff");

    // Tags are per owner.
    let (status, bobs) = create_tag(&server, &bob, "DNA").await;
    assert_eq!(status, 201);
    assert_ne!(bobs["id"], first["id"]);

    create_tag(&server, &alice, "agarose").await;
    let tags: Value = server
        .client
        .get(server.url("/api/v1/tags"))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("list tags")
        .json()
        .await
        .expect("parse tags");
    let names: Vec<&str> = tags["data"]
        .as_array()
        .expect("tags")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["agarose", "DNA"]);

    // Bob cannot attach alice's tag.
    let resp = server
        .client
        .post(server.url("/api/v1/experiments"))
        .bearer_auth(&bob.token)
        .json(&json!({ "title": "Borrowed", "tag_ids": [first["id"]] }))
        .send()
        .await
        .expect("create");
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_list_filters() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;
    let bob = server.create_user("bob@lab.example").await;

    let (_, dna) = create_tag(&server, &alice, "DNA").await;
    let dna_id = dna["id"].as_str().expect("tag id");

    server
        .create_experiment(
            &alice,
            json!({ "title": "PCR Run 1", "status": "completed", "tag_ids": [dna_id] }),
        )
        .await;
    server
        .create_experiment(
            &alice,
            json!({ "title": "Cell culture", "researcher_name": "Dr. Ortiz" }),
        )
        .await;
    let shared = server
        .create_experiment(&bob, json!({ "title": "Bob's assay" }))
        .await;
    share(
        &server,
        &bob,
        shared["id"].as_str().expect("id"),
        "alice@lab.example",
        "view",
    )
    .await;

    assert_eq!(server.list_experiments(&alice, "").await.len(), 3);

    let found = server.list_experiments(&alice, "?q=ortiz").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["title"], "Cell culture");

    let found = server.list_experiments(&alice, "?status=completed").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["title"], "PCR Run 1");

    let found = server
        .list_experiments(&alice, &format!("?tags={}", dna_id))
        .await;
    assert_eq!(found.len(), 1);

    let found = server.list_experiments(&alice, "?role=shared").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["title"], "Bob's assay");

    let found = server.list_experiments(&alice, "?permission=edit").await;
    assert_eq!(found.len(), 2);

    let resp = server
        .client
        .get(server.url("/api/v1/experiments?status=archived"))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("bad filter");
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_upload_and_download_data_file() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;

    let created = server
        .create_experiment(&alice, json!({ "title": "Sequencing" }))
        .await;
    let id = created["id"].as_str().expect("experiment id").to_string();

    let data: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let resp = upload(
        &server,
        &alice,
        &id,
        "data",
        upload_form("reads.csv", "text/csv", data.clone()),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let file: Value = resp.json().await.expect("parse file");
    assert_eq!(file["data"]["filename"], "reads.csv");

    let visible = server.list_experiments(&alice, "").await;
    assert_eq!(visible.len(), 1);
    let files = visible[0]["files"].as_array().expect("files");
    assert_eq!(files.len(), 1);
    assert!(visible[0]["protocols"].as_array().expect("protocols").is_empty());
    let url = files[0]["url"].as_str().expect("resolved url").to_string();
    assert!(url.starts_with(&server.base_url));

    let resp = server.client.get(&url).send().await.expect("download");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/csv");
    assert_eq!(resp.headers()["content-disposition"], "attachment");
    let body = resp.bytes().await.expect("body");
    assert_eq!(body.len(), data.len());
    assert_eq!(&body[..], &data[..]);

    let file_id = files[0]["id"].as_str().expect("file id");
    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/experiments/{}/files/data/{}", id, file_id)))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("delete file");
    assert_eq!(resp.status(), 204);

    let resp = server.client.get(&url).send().await.expect("download");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_upload_validation() {
    let server = TestServer::start_with_upload_limit(1024).await;
    let alice = server.create_user("alice@lab.example").await;
    let bob = server.create_user("bob@lab.example").await;

    let created = server
        .create_experiment(&alice, json!({ "title": "Imaging" }))
        .await;
    let id = created["id"].as_str().expect("experiment id");

    let resp = upload(
        &server,
        &alice,
        id,
        "data",
        upload_form("big.tif", "image/tiff", vec![0; 2048]),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = upload(
        &server,
        &alice,
        id,
        "data",
        upload_form("empty.txt", "text/plain", Vec::new()),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = upload(
        &server,
        &alice,
        id,
        "images",
        upload_form("a.txt", "text/plain", b"x".to_vec()),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = upload(
        &server,
        &bob,
        id,
        "protocol",
        upload_form("steps.md", "text/markdown", b"# steps".to_vec()),
    )
    .await;
    assert_eq!(resp.status(), 403);

    let resp = upload(
        &server,
        &alice,
        id,
        "protocol",
        upload_form("steps.md", "text/markdown", b"# steps".to_vec()),
    )
    .await;
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn test_delete_experiment_removes_objects() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;
    let bob = server.create_user("bob@lab.example").await;

    let created = server
        .create_experiment(&alice, json!({ "title": "Doomed" }))
        .await;
    let id = created["id"].as_str().expect("experiment id").to_string();
    share(&server, &alice, &id, &bob.id, "edit").await;

    let resp = upload(
        &server,
        &alice,
        &id,
        "protocol",
        upload_form("steps.txt", "text/plain", b"mix, spin, wait".to_vec()),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let view: Value = server
        .client
        .get(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&bob.token)
        .send()
        .await
        .expect("get")
        .json()
        .await
        .expect("parse");
    let url = view["data"]["protocols"][0]["url"]
        .as_str()
        .expect("url")
        .to_string();

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("delete");
    assert_eq!(resp.status(), 204);

    assert!(server.list_experiments(&alice, "").await.is_empty());
    assert!(server.list_experiments(&bob, "").await.is_empty());

    let resp = server.client.get(&url).send().await.expect("download");
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .get(server.url(&format!("/api/v1/experiments/{}", id)))
        .bearer_auth(&alice.token)
        .send()
        .await
        .expect("get");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_uploaded_html_is_served_as_attachment() {
    let server = TestServer::start().await;
    let alice = server.create_user("alice@lab.example").await;

    let created = server
        .create_experiment(&alice, json!({ "title": "Report" }))
        .await;
    let id = created["id"].as_str().expect("experiment id");

    let resp = upload(
        &server,
        &alice,
        id,
        "protocol",
        upload_form(
            "report.html",
            "text/html",
            b"<script>alert(1)</script>".to_vec(),
        ),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let file: Value = resp.json().await.expect("parse file");
    let url = file["data"]["url"].as_str().expect("url");

    let resp = server.client.get(url).send().await.expect("download");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-disposition"], "attachment");
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
}
