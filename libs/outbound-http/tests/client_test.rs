use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};
use httpmock::prelude::*;
use outbound_http::{
    Agent, AgentConfig, ClientConfig, ErrorKind, HttpClient, HttpError, OutboundRequest,
    RequestInterceptor, RequestOptions, StatusClass, header, interceptor_fn, json_client,
    to_buffer_response,
};
use serde_json::json;

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(&server.base_url()).unwrap()
}

#[tokio::test]
async fn test_get_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/users/1").query_param("active", "true");
            then.status(200).body("fooBar");
        })
        .await;

    let client = HttpClient::http(config(&server)).unwrap();
    let response = client.get("/users/1?active=true").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.status_message(), "OK");
    assert_eq!(response.text().await.unwrap(), "fooBar");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_text_body_gets_content_length() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/echo")
                .header("content-length", "6")
                .body("fooBar");
            then.status(201).body("created");
        })
        .await;

    let client = HttpClient::new(config(&server)).unwrap();
    let response = client.post("/echo", "fooBar").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_put_patch_delete_verbs() {
    let server = MockServer::start_async().await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path("/items/1").body("full");
            then.status(200);
        })
        .await;
    let patch = server
        .mock_async(|when, then| {
            when.method(PATCH).path("/items/1").body("partial");
            then.status(200);
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/items/1");
            then.status(204);
        })
        .await;

    let client = HttpClient::new(config(&server)).unwrap();
    client.put("/items/1", Bytes::from_static(b"full")).send().await.unwrap();
    client.patch("/items/1", b"partial".to_vec()).send().await.unwrap();
    let response = client.delete("/items/1").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    put.assert_async().await;
    patch.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn test_explicit_content_length_is_kept() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/upload").header("content-length", "3");
            then.status(200);
        })
        .await;

    let client = HttpClient::new(config(&server)).unwrap();
    client
        .post("/upload", "abc")
        .header(header::CONTENT_LENGTH, "3")
        .unwrap()
        .send()
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_base_and_call_headers_merge_per_name() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/profile")
                .header("authorization", "Bearer base-token")
                .header("x-correlation-id", "per-call")
                .header("x-tenant", "acme");
            then.status(200);
        })
        .await;

    let config = config(&server)
        .with_header(header::AUTHORIZATION, "Bearer base-token")
        .unwrap()
        .with_header(header::X_CORRELATION_ID, "base")
        .unwrap();
    let client = HttpClient::new(config).unwrap();

    client
        .get("/profile")
        .header("X-Correlation-Id", "per-call")
        .unwrap()
        .options(RequestOptions::new().header("x-tenant", "acme").unwrap())
        .send()
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_interceptor_header_is_sent() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/")
                .header("x-user-agent", "Test")
                .header("x-base", "kept");
            then.status(200);
        })
        .await;

    let client = HttpClient::new(config(&server).with_header("x-base", "kept").unwrap())
        .unwrap()
        .with_interceptor(interceptor_fn(|request| {
            request
                .options
                .headers
                .insert("x-user-agent", HeaderValue::from_static("Test"));
        }));

    let response = client.get("/").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    mock.assert_async().await;
}

struct RewriteToV2;

#[async_trait::async_trait]
impl RequestInterceptor for RewriteToV2 {
    async fn will_send_request(&self, request: &mut OutboundRequest) {
        tokio::task::yield_now().await;
        let path = format!("/v2{}", request.url.path());
        request.url.set_path(&path);
        request.method = Method::PUT;
    }
}

#[tokio::test]
async fn test_async_interceptor_can_rewrite_target() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PUT).path("/v2/orders");
            then.status(202);
        })
        .await;

    let client = HttpClient::new(config(&server))
        .unwrap()
        .with_interceptor(RewriteToV2);
    let response = client.post("/orders", "{}").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_absolute_url_bypasses_base() {
    let base = MockServer::start_async().await;
    let other = MockServer::start_async().await;
    let mock = other
        .mock_async(|when, then| {
            when.method(GET).path("/elsewhere");
            then.status(200).body("other");
        })
        .await;

    let client = HttpClient::new(config(&base)).unwrap();
    let response = client.get(other.url("/elsewhere")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "other");

    let target = url::Url::parse(&other.url("/elsewhere")).unwrap();
    client.get(target).send().await.unwrap();

    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_json_mode_round_trip() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/widgets")
                .header("accept", "application/json")
                .header("content-type", "application/json")
                .json_body(json!({"size": 3}));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"foo": "bar"}));
        })
        .await;

    let client = json_client(config(&server)).unwrap();
    let created = client
        .request(Method::POST, "/widgets")
        .json(&json!({"size": 3}))
        .unwrap()
        .await
        .unwrap();

    assert_eq!(created.data, json!({"foo": "bar"}));
    assert_eq!(created.status_code, Some(200));
    assert_eq!(created.status_class, StatusClass::Successful);
    assert_eq!(created.headers["content-type"], "application/json");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_json_transform_on_empty_body_fails() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/empty");
            then.status(200);
        })
        .await;

    let client = json_client(config(&server)).unwrap();
    let err = client.get("/empty").send().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyBody);
    assert!(matches!(err, HttpError::EmptyBody));
}

#[tokio::test]
async fn test_buffer_transform_on_no_content() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/sessions/1");
            then.status(204);
        })
        .await;

    let client = HttpClient::new(config(&server))
        .unwrap()
        .with_transform(to_buffer_response);
    let result = client.delete("/sessions/1").send().await.unwrap();

    assert!(result.data.is_empty());
    assert_eq!(result.status_code, Some(204));
    assert_eq!(result.status_class, StatusClass::Successful);
}

#[tokio::test]
async fn test_buffer_transform_classifies_client_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("not here");
        })
        .await;

    let client = HttpClient::new(config(&server))
        .unwrap()
        .with_transform(to_buffer_response);
    let result = client.get("/missing").send().await.unwrap();

    assert_eq!(result.status_class, StatusClass::BadRequest);
    assert_eq!(result.status_message.as_deref(), Some("Not Found"));
    assert_eq!(result.data, Bytes::from_static(b"not here"));
}

#[tokio::test]
async fn test_transform_errors_propagate_unchanged() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(500);
        })
        .await;

    let client = HttpClient::new(config(&server)).unwrap().with_transform(|response: outbound_http::Response| async move {
        if response.status().is_server_error() {
            return Err(HttpError::Configuration("upstream unavailable".into()));
        }
        Ok(response.status())
    });
    let err = client.get("/").send().await.unwrap_err();

    assert_eq!(err.to_string(), "configuration error: upstream unavailable");
}

#[tokio::test]
async fn test_no_keep_alive_sends_connection_close() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/").header("connection", "close");
            then.status(200);
        })
        .await;

    let agent = Agent::new(AgentConfig::no_keep_alive());
    let client = HttpClient::new(config(&server).with_agent(agent.clone())).unwrap();
    let response = client.get("/").send().await.unwrap();
    response.bytes().await.unwrap();

    assert_eq!(agent.idle_connections(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_invalid_call_header_is_rejected() {
    let server = MockServer::start_async().await;
    let client = HttpClient::new(config(&server)).unwrap();

    let err = client.get("/").header("bad header", "x").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TypeKind);
}
