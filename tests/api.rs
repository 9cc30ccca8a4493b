mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use apalis::prelude::Data;
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};
use willow::application::jobs::{
    PurgeExpiredTokensJob, PurgeTokensContext, process_purge_expired_tokens_job,
};
use willow::application::repos::{CreateTokenParams, TokensRepo};
use willow::domain::blogs::BlogSettings;
use willow::domain::tokens::generate_token;

use support::{TestApp, body_to_json, body_to_string, header};

fn api_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn author(app: &TestApp, email: &str, subdomain: &str) -> String {
    let user = app.user(email, "Author").await;
    app.blog(&user, subdomain).await;
    app.token(&user).await
}

#[tokio::test]
async fn requests_without_a_valid_token_are_unauthorized() {
    let app = TestApp::new();

    let response = app.send(api_request("GET", "/api/posts", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_to_json(response).await, json!({ "error": "Unauthorized" }));

    let bogus = "0".repeat(32);
    let response = app
        .send(api_request("GET", "/api/posts", Some(&bogus), None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoked_tokens_stop_working() {
    let app = TestApp::new();
    let user = app.user("revoke@example.com", "Revoke").await;
    app.blog(&user, "revoked").await;
    let issued = app.tokens.issue(&user, "laptop", None).await.expect("issue");

    let response = app
        .send(api_request("GET", "/api/posts", Some(&issued.token), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    app.tokens.revoke(&user, issued.id).await.expect("revoke");
    assert!(app.tokens.list(&user).await.expect("list").is_empty());
    let response = app
        .send(api_request("GET", "/api/posts", Some(&issued.token), None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_tokens_are_unauthorized() {
    let app = TestApp::new();
    let user = app.user("expired@example.com", "Expired").await;
    app.blog(&user, "expired").await;
    let stale = app
        .store
        .create_token(CreateTokenParams {
            user_id: user.id,
            name: "old laptop".into(),
            token: generate_token(),
            expires_at: Some(OffsetDateTime::now_utc() - Duration::minutes(1)),
        })
        .await
        .expect("insert token");

    let response = app
        .send(api_request("GET", "/api/posts", Some(&stale.token), None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_to_json(response).await, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn purge_job_removes_only_expired_tokens() {
    let app = TestApp::new();
    let user = app.user("purge@example.com", "Purge").await;
    let now = OffsetDateTime::now_utc();
    for (name, expires_at) in [
        ("expired", Some(now - Duration::hours(2))),
        ("later", Some(now + Duration::days(30))),
        ("forever", None),
    ] {
        app.store
            .create_token(CreateTokenParams {
                user_id: user.id,
                name: name.into(),
                token: generate_token(),
                expires_at,
            })
            .await
            .expect("insert token");
    }

    process_purge_expired_tokens_job(
        PurgeExpiredTokensJob,
        Data::new(PurgeTokensContext {
            tokens: app.tokens.clone(),
        }),
    )
    .await
    .expect("purge job");

    let mut left: Vec<String> = app
        .tokens
        .list(&user)
        .await
        .expect("list")
        .into_iter()
        .map(|token| token.name)
        .collect();
    left.sort();
    assert_eq!(left, vec!["forever", "later"]);
    assert_eq!(app.tokens.purge_expired().await.expect("purge again"), 0);
}

#[tokio::test]
async fn create_then_list_and_fetch() {
    let app = TestApp::new();
    let token = author(&app, "api@example.com", "apiblog").await;

    let response = app
        .send(api_request(
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({
                "post": {
                    "title": "Hello API",
                    "body_markdown": "Written **remotely**.",
                    "published": true,
                    "tag_list": "rust, api, Rust"
                }
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response).await;
    assert_eq!(body["post"]["slug"], "hello-api");
    assert_eq!(body["post"]["published"], true);
    assert_eq!(body["post"]["tag_list"], json!(["rust", "api"]));
    assert!(
        body["post"]["body_html"]
            .as_str()
            .expect("html")
            .contains("<strong>remotely</strong>")
    );
    assert!(body["post"]["published_at"].is_string());

    let response = app
        .send(api_request("GET", "/api/posts", Some(&token), None))
        .await;
    let list = body_to_json(response).await;
    let slugs: Vec<&str> = list["posts"]
        .as_array()
        .expect("posts")
        .iter()
        .filter_map(|post| post["slug"].as_str())
        .collect();
    assert!(slugs.contains(&"hello-api"));
    assert!(slugs.contains(&"about"));

    let response = app
        .send(api_request("GET", "/api/posts/hello-api", Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response).await["post"]["title"], "Hello API");
}

#[tokio::test]
async fn tag_list_accepts_an_array() {
    let app = TestApp::new();
    let token = author(&app, "array@example.com", "arrays").await;

    let response = app
        .send(api_request(
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({ "post": { "title": "Listed", "tag_list": ["one", " two ", ""] } })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        body_to_json(response).await["post"]["tag_list"],
        json!(["one", "two"])
    );
}

#[tokio::test]
async fn duplicate_titles_get_sequenced_slugs() {
    let app = TestApp::new();
    let token = author(&app, "dupes@example.com", "dupes").await;

    let mut slugs = Vec::new();
    for _ in 0..3 {
        let response = app
            .send(api_request(
                "POST",
                "/api/posts",
                Some(&token),
                Some(json!({ "post": { "title": "Same Title" } })),
            ))
            .await;
        slugs.push(body_to_json(response).await["post"]["slug"].clone());
    }
    assert_eq!(slugs, vec![json!("same-title"), json!("same-title-2"), json!("same-title-3")]);
}

#[tokio::test]
async fn invalid_posts_return_error_lists() {
    let app = TestApp::new();
    let token = author(&app, "invalid@example.com", "invalid").await;

    let response = app
        .send(api_request(
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({ "post": { "title": "   ", "body_markdown": "text" } })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body_to_json(response).await,
        json!({ "errors": ["Title can't be blank"] })
    );

    let response = app
        .send(api_request("POST", "/api/posts", Some(&token), Some(json!({}))))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn posts_of_other_authors_are_forbidden() {
    let app = TestApp::new();
    let owner = app.user("owner@example.com", "Owner").await;
    let blog = app.blog(&owner, "owner").await;
    app.publish(&owner, &blog, "Private Thoughts", "mine", &[])
        .await;
    let intruder = author(&app, "intruder@example.com", "intruder").await;

    let response = app
        .send(api_request(
            "GET",
            "/api/posts/private-thoughts",
            Some(&intruder),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(api_request("GET", "/api/posts/nope", Some(&intruder), None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_to_json(response).await, json!({ "error": "Post not found" }));
}

#[tokio::test]
async fn updating_a_published_post_keeps_its_slug() {
    let app = TestApp::new();
    let token = author(&app, "update@example.com", "updates").await;

    app.send(api_request(
        "POST",
        "/api/posts",
        Some(&token),
        Some(json!({ "post": { "title": "Original", "published": true } })),
    ))
    .await;

    let response = app
        .send(api_request(
            "PATCH",
            "/api/posts/original",
            Some(&token),
            Some(json!({ "post": { "title": "Renamed", "featured": true } })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["post"]["title"], "Renamed");
    assert_eq!(body["post"]["slug"], "original");
    assert_eq!(body["post"]["featured"], true);
}

#[tokio::test]
async fn updating_a_draft_title_regenerates_the_slug() {
    let app = TestApp::new();
    let token = author(&app, "drafts@example.com", "drafts").await;

    app.send(api_request(
        "POST",
        "/api/posts",
        Some(&token),
        Some(json!({ "post": { "title": "Working Title" } })),
    ))
    .await;

    let response = app
        .send(api_request(
            "PUT",
            "/api/posts/working-title",
            Some(&token),
            Some(json!({ "post": { "title": "Final Title" } })),
        ))
        .await;
    assert_eq!(body_to_json(response).await["post"]["slug"], "final-title");
}

#[tokio::test]
async fn delete_removes_the_post() {
    let app = TestApp::new();
    let token = author(&app, "delete@example.com", "deletes").await;

    app.send(api_request(
        "POST",
        "/api/posts",
        Some(&token),
        Some(json!({ "post": { "title": "Short Lived" } })),
    ))
    .await;

    let response = app
        .send(api_request("DELETE", "/api/posts/short-lived", Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .send(api_request("GET", "/api/posts/short-lived", Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn markdown_documents_round_trip_through_the_api() {
    let app = TestApp::new();
    let token = author(&app, "md@example.com", "markdown").await;

    let document = "---\ntitle: From Frontmatter\nslug: custom-slug\npublished: true\npublished_at: 2024-05-01T09:30:00Z\ntags:\n- yaml\n---\n\nBody text.\n";
    let response = app
        .send(api_request(
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({ "markdown": document })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response).await;
    assert_eq!(body["post"]["slug"], "custom-slug");
    assert_eq!(body["post"]["published_at"], "2024-05-01T09:30:00Z");

    let response = app
        .send(api_request(
            "GET",
            "/api/posts/custom-slug/markdown",
            Some(&token),
            None,
        ))
        .await;
    assert_eq!(
        header(&response, "content-type"),
        Some("text/markdown; charset=utf-8")
    );
    let exported = body_to_string(response).await;
    assert!(exported.starts_with("---\ntitle: From Frontmatter\nslug: custom-slug\n"));
    assert!(exported.contains("tags:\n- yaml\n"));
    assert!(exported.ends_with("---\n\nBody text.\n"));
}

#[tokio::test]
async fn broken_frontmatter_is_a_validation_error() {
    let app = TestApp::new();
    let token = author(&app, "broken@example.com", "broken").await;

    let response = app
        .send(api_request(
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({ "markdown": "---\ntitle: [unclosed\n---\n\nBody" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_to_json(response).await;
    let errors = body["errors"].as_array().expect("errors");
    assert!(
        errors
            .iter()
            .any(|error| error.as_str().is_some_and(|e| e.starts_with("frontmatter is invalid")))
    );
}

#[tokio::test]
async fn posts_target_the_named_blog() {
    let app = TestApp::new();
    let user = app.user("multi@example.com", "Multi").await;
    app.blog(&user, "mainblog").await;
    let side = app
        .blog_with(
            &user,
            BlogSettings {
                subdomain: "sideblog".into(),
                ..Default::default()
            },
        )
        .await;
    let token = app.token(&user).await;

    app.send(api_request(
        "POST",
        "/api/posts",
        Some(&token),
        Some(json!({ "post": { "title": "Side Note", "published": true, "blog": "sideblog" } })),
    ))
    .await;

    let post = app
        .posts
        .find_in_blog(&side, "side-note")
        .await
        .expect("post in side blog");
    assert_eq!(post.blog_id, side.id);

    let response = app
        .send(api_request(
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({ "post": { "title": "Lost", "blog": "elsewhere" } })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn rate_limit_returns_retry_after() {
    let app = TestApp::builder().rate_limit(2).build();
    let token = author(&app, "limit@example.com", "limited").await;

    for _ in 0..2 {
        let response = app
            .send(api_request("GET", "/api/posts", Some(&token), None))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .send(api_request("GET", "/api/posts", Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "retry-after"), Some("60"));
}

#[tokio::test]
async fn domain_validation_answers_for_platform_and_custom_domains() {
    let app = TestApp::new();
    let user = app.user("domains@example.com", "Domains").await;
    app.blog_with(
        &user,
        BlogSettings {
            subdomain: "domains".into(),
            custom_domain: Some("Writing.Example.org".into()),
            primary: true,
            ..Default::default()
        },
    )
    .await;

    for (domain, expected) in [
        ("willow.camp", StatusCode::OK),
        ("anyone.willow.camp", StatusCode::OK),
        ("writing.example.org:443", StatusCode::OK),
        ("stranger.example.com", StatusCode::FORBIDDEN),
    ] {
        let response = app
            .send(api_request(
                "GET",
                &format!("/api/domain-validation?domain={domain}"),
                None,
                None,
            ))
            .await;
        assert_eq!(response.status(), expected, "{domain}");
    }

    let response = app
        .send(
            Request::builder()
                .uri("/api/domain-validation")
                .header("host", "writing.example.org")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn direct_upload_registration_requires_a_token() {
    let app = TestApp::new();
    let token = author(&app, "uploader@example.com", "uploader").await;
    let payload = json!({
        "blob": {
            "filename": "cat.png",
            "byte_size": 4,
            "checksum": "abc==",
            "content_type": "image/png",
            "metadata": { "identified": true }
        }
    });

    let response = app
        .send(api_request(
            "POST",
            "/rails/active_storage/direct_uploads",
            None,
            Some(payload.clone()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(api_request(
            "POST",
            "/rails/active_storage/direct_uploads",
            Some(&token),
            Some(payload),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["filename"], "cat.png");
    assert_eq!(body["service_name"], "local");
    assert_eq!(body["metadata"], json!({ "identified": true }));
    let url = body["direct_upload"]["url"].as_str().expect("url");
    assert!(url.starts_with("/uploads/direct/"));
    assert!(url.contains("signature="));
    assert_eq!(body["direct_upload"]["headers"]["Content-Type"], "image/png");
    assert_eq!(body["direct_upload"]["headers"]["x-amz-acl"], "public-read");

    let response = app
        .send(api_request(
            "POST",
            "/uploads/direct_uploads",
            Some(&token),
            Some(json!({ "blob": { "filename": "", "byte_size": 1 } })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
