use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tasklane_core::auth::{AuthClient, AuthSession, Login};
use tasklane_core::error::{PersistenceError, StoreError};
use tasklane_core::gateway::RemoteGateway;
use tasklane_core::gateway::remote::{ToggleStyle, UpdateMethod};
use tasklane_core::http::ApiClient;
use tasklane_core::storage::{ACCESS_TOKEN_KEY, KeyValueStore, MemoryStorage, REFRESH_TOKEN_KEY};
use tasklane_core::store::{RequestStatus, TaskStore};
use tasklane_core::view::{StatusFilter, ViewSettings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    bearer: Option<String>,
    body: String,
}

type Handler = Arc<dyn Fn(&Recorded) -> (u16, String) + Send + Sync>;

/// Answers each request with the handler's response and closes the
/// connection, recording what it saw.
async fn stub_server(handler: Handler) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let Some(request) = read_request(&mut socket).await else {
                continue;
            };
            let (status, body) = handler(&request);
            log.lock().push(request);
            let response = format!(
                "HTTP/1.1 {status} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), seen)
}

async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let mut content_length = 0usize;
    let mut bearer = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.parse().unwrap_or(0),
            "authorization" => {
                bearer = value.strip_prefix("Bearer ").map(str::to_string);
            }
            _ => {}
        }
    }

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    Some(Recorded {
        method,
        path,
        bearer,
        body,
    })
}

fn session_with(access: &str, refresh: &str) -> Arc<AuthSession> {
    let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStorage::new());
    storage.set_item(ACCESS_TOKEN_KEY, access).expect("seed access");
    storage.set_item(REFRESH_TOKEN_KEY, refresh).expect("seed refresh");
    Arc::new(AuthSession::new(storage))
}

fn api(base_url: &str, session: Arc<AuthSession>) -> ApiClient {
    ApiClient::new(base_url, Duration::from_secs(5), Some(session)).expect("client")
}

fn remote_store(base_url: &str, session: Arc<AuthSession>) -> TaskStore {
    store_over(RemoteGateway::new(api(base_url, session)))
}

fn store_over(gateway: RemoteGateway) -> TaskStore {
    TaskStore::new(Arc::new(gateway), ViewSettings::default())
}

fn requests_by(seen: &Mutex<Vec<Recorded>>, method: &str) -> Vec<Recorded> {
    seen.lock()
        .iter()
        .filter(|r| r.method == method)
        .cloned()
        .collect()
}

const ONE_TASK_PAGE: &str = r#"{"data":[{"id":7,"text":"remote task","completed":false,"createdAt":"2024-05-01T10:00:00Z"}],"total":1,"page":1,"limit":10,"totalPages":1}"#;

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    let handler: Handler = Arc::new(|req: &Recorded| {
        match (req.method.as_str(), req.path.as_str(), req.bearer.as_deref()) {
            ("POST", "/auth/refresh", _) => (200, r#"{"accessToken":"fresh"}"#.to_string()),
            ("GET", "/todos?page=1&limit=10", Some("fresh")) => (200, ONE_TASK_PAGE.to_string()),
            ("GET", _, _) => (401, r#"{"message":"jwt expired"}"#.to_string()),
            _ => (500, "{}".to_string()),
        }
    });
    let (base_url, seen) = stub_server(handler).await;
    let session = session_with("stale", "r1");
    let store = remote_store(&base_url, session.clone());

    store.fetch().await.expect("fetch after refresh");

    let tasks = store.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].text, "remote task");
    assert_eq!(store.totals().total_items, 1);
    assert_eq!(session.access_token().as_deref(), Some("fresh"));

    let seen = seen.lock();
    let paths: Vec<&str> = seen.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["/todos?page=1&limit=10", "/auth/refresh", "/todos?page=1&limit=10"]
    );
    assert!(seen[1].body.contains(r#""refreshToken":"r1""#));
}

#[tokio::test]
async fn failed_refresh_logs_the_session_out() {
    let handler: Handler = Arc::new(|req: &Recorded| match req.path.as_str() {
        "/auth/refresh" => (401, r#"{"message":"refresh token revoked"}"#.to_string()),
        _ => (401, "{}".to_string()),
    });
    let (base_url, _seen) = stub_server(handler).await;
    let session = session_with("stale", "revoked");
    let store = remote_store(&base_url, session.clone());

    let err = store.fetch().await.expect_err("unauthorized");
    assert!(matches!(
        err,
        StoreError::Persistence(PersistenceError::Unauthorized)
    ));
    assert_eq!(store.status(), RequestStatus::Failed);
    assert_eq!(
        store.error().as_deref(),
        Some("session expired; please log in again")
    );
    assert!(!session.is_authenticated());
    assert_eq!(session.refresh_token(), None);
}

#[tokio::test]
async fn server_message_surfaces_and_tasks_are_kept() {
    let handler: Handler = Arc::new(|req: &Recorded| match req.method.as_str() {
        "GET" => (200, ONE_TASK_PAGE.to_string()),
        "POST" => (400, r#"{"message":"text is too long"}"#.to_string()),
        _ => (500, "{}".to_string()),
    });
    let (base_url, _seen) = stub_server(handler).await;
    let store = remote_store(&base_url, session_with("token", "r1"));

    store.fetch().await.expect("fetch");
    let err = store.create("something").await.expect_err("rejected");
    assert_eq!(err.to_string(), "server responded 400: text is too long");
    assert_eq!(store.error().as_deref(), Some("server responded 400: text is too long"));
    assert_eq!(store.tasks().len(), 1);
}

#[tokio::test]
async fn create_posts_and_bumps_server_totals() {
    let handler: Handler = Arc::new(|req: &Recorded| match req.method.as_str() {
        "GET" => (200, ONE_TASK_PAGE.to_string()),
        "POST" => (
            201,
            r#"{"id":8,"text":"new remote","completed":false}"#.to_string(),
        ),
        _ => (500, "{}".to_string()),
    });
    let (base_url, seen) = stub_server(handler).await;
    let store = remote_store(&base_url, session_with("token", "r1"));

    store.fetch().await.expect("fetch");
    let created = store.create("  new remote ").await.expect("create");

    assert_eq!(created.id, 8);
    assert_eq!(store.tasks()[0].id, 8);
    assert_eq!(store.totals().total_items, 2);

    let seen = seen.lock();
    let post = seen.iter().find(|r| r.method == "POST").expect("post sent");
    assert_eq!(post.path, "/todos");
    assert_eq!(post.bearer.as_deref(), Some("token"));
    let body: serde_json::Value = serde_json::from_str(&post.body).expect("json body");
    assert_eq!(body["text"], "new remote");
    assert_eq!(body["completed"], false);
}

const TOGGLED_TASK: &str = r#"{"id":7,"text":"remote task","completed":true}"#;
const RENAMED_TASK: &str = r#"{"id":7,"text":"renamed","completed":false}"#;

fn crud_handler() -> Handler {
    Arc::new(|req: &Recorded| {
        match (req.method.as_str(), req.path.as_str()) {
            ("GET", _) => (200, ONE_TASK_PAGE.to_string()),
            ("PATCH", "/todos/7/toggle") => (200, TOGGLED_TASK.to_string()),
            ("PATCH", "/todos/7") if req.body.contains("completed") => {
                (200, TOGGLED_TASK.to_string())
            }
            ("PATCH" | "PUT", "/todos/7") => (200, RENAMED_TASK.to_string()),
            ("DELETE", "/todos/7") => (204, String::new()),
            _ => (404, r#"{"message":"Todo not found"}"#.to_string()),
        }
    })
}

#[tokio::test]
async fn toggle_route_style_patches_the_toggle_endpoint() {
    let (base_url, seen) = stub_server(crud_handler()).await;
    let store = store_over(
        RemoteGateway::new(api(&base_url, session_with("token", "r1")))
            .with_toggle_style(ToggleStyle::Route),
    );
    store.fetch().await.expect("fetch");

    let toggled = store.toggle(7).await.expect("toggle").expect("present");
    assert!(toggled.completed);
    assert!(store.tasks()[0].completed);

    let patches = requests_by(&seen, "PATCH");
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].path, "/todos/7/toggle");
    assert!(patches[0].body.is_empty());
}

#[tokio::test]
async fn toggle_patch_style_sends_the_flipped_flag() {
    let (base_url, seen) = stub_server(crud_handler()).await;
    let store = store_over(
        RemoteGateway::new(api(&base_url, session_with("token", "r1")))
            .with_toggle_style(ToggleStyle::Patch),
    );
    store.fetch().await.expect("fetch");

    store.toggle(7).await.expect("toggle").expect("present");

    let patches = requests_by(&seen, "PATCH");
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].path, "/todos/7");
    let body: serde_json::Value = serde_json::from_str(&patches[0].body).expect("json body");
    assert_eq!(body, serde_json::json!({"completed": true}));
}

#[tokio::test]
async fn update_method_picks_put_or_patch() {
    for (method, verb) in [(UpdateMethod::Put, "PUT"), (UpdateMethod::Patch, "PATCH")] {
        let (base_url, seen) = stub_server(crud_handler()).await;
        let store = store_over(
            RemoteGateway::new(api(&base_url, session_with("token", "r1")))
                .with_update_method(method),
        );
        store.fetch().await.expect("fetch");

        let updated = store
            .update(7, " renamed ")
            .await
            .expect("update")
            .expect("present");
        assert_eq!(updated.text, "renamed");

        let sent = requests_by(&seen, verb);
        assert_eq!(sent.len(), 1, "{verb}");
        assert_eq!(sent[0].path, "/todos/7");
        let body: serde_json::Value = serde_json::from_str(&sent[0].body).expect("json body");
        assert_eq!(body, serde_json::json!({"text": "renamed"}));
    }
}

#[tokio::test]
async fn delete_accepts_an_empty_no_content_reply() {
    let (base_url, seen) = stub_server(crud_handler()).await;
    let store = remote_store(&base_url, session_with("token", "r1"));
    store.fetch().await.expect("fetch");

    assert!(store.remove(7).await.expect("delete"));
    assert!(store.tasks().is_empty());
    assert_eq!(store.totals().total_items, 0);
    assert_eq!(store.error(), None);

    let deletes = requests_by(&seen, "DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].path, "/todos/7");
}

#[tokio::test]
async fn filter_is_sent_as_a_query_parameter() {
    let (base_url, seen) = stub_server(crud_handler()).await;
    let store = remote_store(&base_url, session_with("token", "r1"));

    store.set_filter(StatusFilter::Active);
    store.fetch().await.expect("fetch active");
    store.set_filter(StatusFilter::All);
    store.fetch().await.expect("fetch all");

    let paths: Vec<String> = requests_by(&seen, "GET").into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        vec![
            "/todos?page=1&limit=10&filter=active".to_string(),
            "/todos?page=1&limit=10".to_string(),
        ]
    );
}

#[tokio::test]
async fn server_side_404_drops_the_task_quietly() {
    let handler: Handler = Arc::new(|req: &Recorded| match req.method.as_str() {
        "GET" => (200, ONE_TASK_PAGE.to_string()),
        _ => (404, r#"{"message":"Todo not found"}"#.to_string()),
    });
    let (base_url, _seen) = stub_server(handler).await;
    let store = remote_store(&base_url, session_with("token", "r1"));

    store.fetch().await.expect("fetch");
    assert_eq!(store.toggle(7).await.expect("silent"), None);
    assert!(store.tasks().is_empty());
    assert_eq!(store.status(), RequestStatus::Idle);
    assert_eq!(store.error(), None);

    store.fetch().await.expect("refetch");
    assert!(store.remove(7).await.expect("silent delete"));
    assert!(store.tasks().is_empty());
    assert_eq!(store.error(), None);
}

#[tokio::test]
async fn rejected_login_reports_the_server_message() {
    let handler: Handler = Arc::new(|req: &Recorded| match req.path.as_str() {
        "/auth/login" => (401, r#"{"message":"invalid credentials"}"#.to_string()),
        _ => (500, "{}".to_string()),
    });
    let (base_url, seen) = stub_server(handler).await;
    let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStorage::new());
    let session = Arc::new(AuthSession::new(storage));
    let auth = AuthClient::new(api(&base_url, session.clone()), session.clone());

    let err = auth
        .login(&Login {
            email: "ada@example.com".to_string(),
            password: "wrong-password".to_string(),
        })
        .await
        .expect_err("rejected");

    assert!(matches!(
        err,
        StoreError::Persistence(PersistenceError::Http { status: 401, .. })
    ));
    assert_eq!(err.to_string(), "server responded 401: invalid credentials");
    assert!(!session.is_authenticated());
    assert_eq!(seen.lock().len(), 1);
}
