use chat_server::auth::{NewUser, Role};
use chat_server::config::{AppState, ChatServerConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (TempDir, AppState, SocketAddr) {
    let dir = tempdir().unwrap();
    let mut config = ChatServerConfig::with_base_dir(dir.path());
    config.bcrypt_cost = 4;
    let state = AppState::build(config).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = chat_server::app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (dir, state, addr)
}

async fn send_frame(client: &mut Client, frame: Value) {
    client.send(Message::text(frame.to_string())).await.unwrap();
}

/// Next text frame from the server, parsed as JSON
async fn next_frame(client: &mut Client) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            let msg = client.next().await.expect("socket closed").unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

#[tokio::test]
async fn test_socket_join_send_and_reject_garbage() {
    let (_dir, state, addr) = serve().await;
    let alice = NewUser {
        username: "alice".into(),
        email: "alice@example.com".into(),
        password: "hunter22".into(),
        role: Role::Customer,
    };
    let alice = state.auth.register(alice).await.unwrap();
    let bob = NewUser {
        username: "bob".into(),
        email: "bob@example.com".into(),
        password: "hunter22".into(),
        role: Role::Seller,
    };
    let bob = state.auth.register(bob).await.unwrap();
    let conversation = state
        .conversations
        .find_or_create(alice.id, bob.id)
        .await
        .unwrap();

    let (mut client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    send_frame(
        &mut client,
        json!({ "event": "joinConversation", "data": { "conversationId": conversation.id } }),
    )
    .await;
    send_frame(
        &mut client,
        json!({
            "event": "sendMessage",
            "data": { "conversationId": conversation.id, "senderId": alice.id, "content": "over the wire" }
        }),
    )
    .await;

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["event"], "message");
    assert_eq!(frame["data"]["conversationId"], conversation.id);
    assert_eq!(frame["data"]["sender"]["username"], "alice");
    assert_eq!(frame["data"]["content"], "over the wire");

    client.send(Message::text("not a frame")).await.unwrap();
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["event"], "error");
    assert!(frame["data"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid event:"));

    let history = state
        .messages
        .list_by_conversation(conversation.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    assert_eq!(state.gateway.members(conversation.id), 1);
    client.close(None).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while state.gateway.live_connections() > 0 || state.gateway.open_groups() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was not released");
    assert_eq!(state.gateway.members(conversation.id), 0);
}
