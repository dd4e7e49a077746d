use super::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::session::UserRole;

fn direct() -> ConversationKey {
    ConversationKey::Direct("42".to_owned())
}

fn support() -> ConversationKey {
    ConversationKey::Support("c7".to_owned())
}

fn url(segments: &[&str]) -> String {
    let base = Url::parse("http://chat.test").unwrap();
    endpoint(&base, segments).to_string()
}

#[test]
fn paths_route_by_conversation_kind() {
    let (direct, support) = (direct(), support());
    assert_eq!(url(&messages_path(&direct)), "http://chat.test/api/chat/messages/42");
    assert_eq!(url(&messages_path(&support)), "http://chat.test/api/support/chats/c7/messages");
    assert_eq!(url(&message_path(&direct, "m1")), "http://chat.test/api/chat/messages/m1");
    assert_eq!(url(&message_path(&support, "m1")), "http://chat.test/api/support/messages/m1");
    assert_eq!(url(&mark_read_path(&direct)), "http://chat.test/api/chat/messages/42/read");
    assert_eq!(url(&mark_read_path(&support)), "http://chat.test/api/support/chats/c7/read");
}

#[test]
fn ids_are_encoded_as_single_path_segments() {
    let key = ConversationKey::Direct("a/b?c#d".to_owned());
    assert_eq!(url(&messages_path(&key)), "http://chat.test/api/chat/messages/a%2Fb%3Fc%23d");
    assert_eq!(url(&message_path(&key, "../x")), "http://chat.test/api/chat/messages/..%2Fx");
}

#[test]
fn endpoint_keeps_base_path_prefix() {
    let base = Url::parse("http://chat.test/backend").unwrap();
    assert_eq!(
        endpoint(&base, &["api", "chat", "users"]).to_string(),
        "http://chat.test/backend/api/chat/users"
    );
}

#[test]
fn rest_client_rejects_base_without_path() {
    let mut config = ChatConfig::new("http://127.0.0.1:9").unwrap();
    config.base_url = "mailto:chat@example.com".to_owned();
    let session = Session::new("tok", "A", UserRole::Partner).unwrap();
    assert!(matches!(RestClient::new(&config, &session), Err(ChatError::InvalidConfig(_))));
}

#[test]
fn decode_body_accepts_bare_and_data_wrapped_payloads() {
    let bare: UnreadCount = decode_body("t", r#"{"count":3}"#).unwrap();
    assert_eq!(bare.count, 3);

    let wrapped: Vec<ChatMessage> = decode_body("t", r#"{"data":[{"id":1,"content":"hi"}]}"#).unwrap();
    assert_eq!(wrapped[0].id, "1");
}

#[test]
fn decode_body_reports_operation() {
    let err = decode_body::<UnreadCount>("fetch direct unread", "not json").unwrap_err();
    assert!(matches!(err, ChatError::Decode { operation: "fetch direct unread", .. }));
}

#[test]
fn rejects_token_that_cannot_be_a_header() {
    let config = ChatConfig::new("http://127.0.0.1:1").unwrap();
    let session = Session::new("bad\ntoken", "u1", UserRole::Partner).unwrap();
    assert!(matches!(RestClient::new(&config, &session), Err(ChatError::InvalidSession(_))));
}

/// Serve exactly one canned HTTP response; returns the base URL and the raw request head.
async fn one_shot_server(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });

    (format!("http://{addr}"), rx)
}

#[tokio::test]
async fn fetch_direct_unread_sends_bearer_and_parses_count() {
    let (base, request) = one_shot_server("200 OK", r#"{"count":5}"#).await;
    let config = ChatConfig::new(&base).unwrap();
    let session = Session::new("tok123", "u1", UserRole::Partner).unwrap();
    let api = RestClient::new(&config, &session).unwrap();

    assert_eq!(api.fetch_direct_unread().await.unwrap(), 5);

    let head = request.await.unwrap().to_lowercase();
    assert!(head.starts_with("get /api/chat/unread-count "));
    assert!(head.contains("authorization: bearer tok123"));
}

#[tokio::test]
async fn non_success_status_maps_to_status_error() {
    let (base, _request) = one_shot_server("403 Forbidden", r#"{"detail":"blocked"}"#).await;
    let config = ChatConfig::new(&base).unwrap();
    let session = Session::new("tok", "u1", UserRole::Partner).unwrap();
    let api = RestClient::new(&config, &session).unwrap();

    let err = api.mark_read(&direct()).await.unwrap_err();
    match err {
        ChatError::Status { operation, status, body } => {
            assert_eq!(operation, "mark read");
            assert_eq!(status, 403);
            assert!(body.contains("blocked"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn support_history_is_stamped_with_chat_id() {
    let (base, _request) = one_shot_server("200 OK", r#"[{"id":"s1","content":"hi","sender_role":"guest"}]"#).await;
    let config = ChatConfig::new(&base).unwrap();
    let session = Session::new("tok", "u1", UserRole::Admin).unwrap();
    let api = RestClient::new(&config, &session).unwrap();

    let messages = api.fetch_messages(&support()).await.unwrap();
    assert_eq!(messages[0].chat_id.as_deref(), Some("c7"));
}
