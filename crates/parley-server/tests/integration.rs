//! End-to-end tests using a real `WebSocket` client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_chat::{ChatCommands, MemoryChatStore, UserProfile};
use parley_core::{Topic, UserId};
use parley_hub::{DispatchTable, Hub, HubHandle, NotificationResolver};
use parley_server::auth::Claims;
use parley_server::websocket::handlers;
use parley_server::{JwtVerifier, ParleyServer, ServerConfig};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "integration-secret";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestApp {
    addr: SocketAddr,
    server: ParleyServer,
    commands: ChatCommands,
    hub: HubHandle,
    listener: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

/// Boot a server on an ephemeral port with the full command stack behind it.
async fn boot_server(config: ServerConfig) -> TestApp {
    let (hub, hub_task) = Hub::spawn(1024);
    let store = Arc::new(MemoryChatStore::new());
    let (resolver, mut background) = NotificationResolver::start(hub.clone(), store.clone(), 256);
    background.push(hub_task);
    let commands = ChatCommands::new(store.clone(), hub.clone(), resolver);

    let mut dispatch = DispatchTable::new();
    handlers::register_all(&mut dispatch, &commands);

    let server = ParleyServer::new(
        config,
        hub.clone(),
        dispatch,
        store,
        Arc::new(JwtVerifier::new(SECRET)),
        PrometheusBuilder::new().build_recorder().handle(),
    );
    let (addr, listener) = server.listen().await.unwrap();

    TestApp {
        addr,
        server,
        commands,
        hub,
        listener,
        background,
    }
}

impl TestApp {
    fn user(&self, name: &str) -> UserId {
        let id = UserId::new();
        self.commands.store().upsert_user(UserProfile {
            id,
            name: name.into(),
            avatar: String::new(),
        });
        id
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn connect(&self, user: UserId) -> WsStream {
        self.try_connect_bearer(&token(user)).await.unwrap()
    }

    async fn try_connect_bearer(&self, token: &str) -> Result<WsStream, WsError> {
        let mut req = self.url().into_client_request().unwrap();
        let _ = req.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        let (ws, _resp) = timeout(TIMEOUT, connect_async(req)).await.unwrap()?;
        Ok(ws)
    }

    async fn wait_for_connections(&self, expected: usize) {
        timeout(TIMEOUT, async {
            loop {
                if self.hub.stats().await.unwrap().connections == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("hub never reached {expected} connections"));
    }
}

fn token(user: UserId) -> String {
    let claims = Claims {
        user_id: *user.as_uuid(),
        exp: chrono::Utc::now().timestamp() + 600,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn http_status(err: &WsError) -> Option<u16> {
    match err {
        WsError::Http(resp) => Some(resp.status().as_u16()),
        _ => None,
    }
}

/// Next notification matching `pred`, skipping control frames and others.
async fn expect_notification(ws: &mut WsStream, pred: impl Fn(&Value) -> bool) -> Value {
    timeout(TIMEOUT, async {
        loop {
            let frame = ws.next().await.expect("stream open").expect("frame ok");
            if let Message::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if pred(&value) {
                    return value;
                }
            }
        }
    })
    .await
    .expect("notification within timeout")
}

fn is_message_with_text(text: &'static str) -> impl Fn(&Value) -> bool {
    move |v| v["type"] == "message" && v["data"]["text"] == text
}

async fn send_envelope(ws: &mut WsStream, envelope: &Value) {
    ws.send(Message::Text(envelope.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn upgrade_without_token_is_rejected() {
    let app = boot_server(ServerConfig::default()).await;
    let err = connect_async(app.url()).await.unwrap_err();
    assert_eq!(http_status(&err), Some(401));
}

#[tokio::test]
async fn upgrade_with_forged_token_is_rejected() {
    let app = boot_server(ServerConfig::default()).await;
    let err = app.try_connect_bearer("forged.token.value").await.unwrap_err();
    assert_eq!(http_status(&err), Some(401));
}

#[tokio::test]
async fn cookie_authentication() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");

    let mut req = app.url().into_client_request().unwrap();
    let _ = req.headers_mut().insert(
        "Cookie",
        HeaderValue::from_str(&format!("access_token={}", token(alice))).unwrap(),
    );
    let (_ws, _resp) = connect_async(req).await.unwrap();
    app.wait_for_connections(1).await;
}

#[tokio::test]
async fn message_fans_out_to_conversation() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");
    let bob = app.user("bob");
    let conversation = app
        .commands
        .create_conversation(alice, "general")
        .await
        .unwrap();
    app.commands.join(conversation.id, bob).await.unwrap();

    let mut alice_ws = app.connect(alice).await;
    let mut bob_ws = app.connect(bob).await;
    app.wait_for_connections(2).await;

    send_envelope(
        &mut alice_ws,
        &json!({"type": "message", "data": {"content": "hi bob", "conversation_id": conversation.id}}),
    )
    .await;

    let to_bob = expect_notification(&mut bob_ws, is_message_with_text("hi bob")).await;
    assert_eq!(to_bob["data"]["is_inbound"], true);
    assert_eq!(to_bob["data"]["user"]["name"], "alice");
    assert_eq!(to_bob["data"]["conversation_id"], json!(conversation.id));

    let to_alice = expect_notification(&mut alice_ws, is_message_with_text("hi bob")).await;
    assert!(to_alice["data"].get("is_inbound").is_none());
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_session() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");
    let conversation = app.commands.create_conversation(alice, "notes").await.unwrap();

    let mut ws = app.connect(alice).await;
    app.wait_for_connections(1).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    send_envelope(&mut ws, &json!({"type": "typing", "data": {}})).await;
    send_envelope(
        &mut ws,
        &json!({"type": "message", "data": {"content": "still here", "conversation_id": conversation.id}}),
    )
    .await;

    let _ = expect_notification(&mut ws, is_message_with_text("still here")).await;
    assert_eq!(app.hub.stats().await.unwrap().connections, 1);
}

#[tokio::test]
async fn every_tab_of_a_user_receives_topic_broadcast() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");
    let mut tab1 = app.connect(alice).await;
    let mut tab2 = app.connect(alice).await;
    app.wait_for_connections(2).await;

    let conversation = app.commands.create_conversation(alice, "solo").await.unwrap();
    app.commands
        .rename(conversation.id, alice, "renamed")
        .await
        .unwrap();

    for tab in [&mut tab1, &mut tab2] {
        let renamed =
            expect_notification(tab, |v| v["type"] == "conversation_renamed").await;
        assert_eq!(renamed["data"]["new_name"], "renamed");
    }
}

#[tokio::test]
async fn deleting_a_conversation_notifies_then_removes_topic() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");
    let bob = app.user("bob");
    let conversation = app.commands.create_conversation(alice, "doomed").await.unwrap();
    app.commands.join(conversation.id, bob).await.unwrap();

    let mut alice_ws = app.connect(alice).await;
    let mut bob_ws = app.connect(bob).await;
    app.wait_for_connections(2).await;

    app.commands.delete(conversation.id, alice).await.unwrap();

    for ws in [&mut alice_ws, &mut bob_ws] {
        let deleted = expect_notification(ws, |v| v["type"] == "conversation_deleted").await;
        assert_eq!(deleted["data"]["conversation_id"], json!(conversation.id));
    }
    let subscribers = app
        .hub
        .topic_subscribers(Topic::conversation(conversation.id))
        .await
        .unwrap();
    assert!(subscribers.is_empty());
}

#[tokio::test]
async fn closing_the_socket_unregisters() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");
    let mut ws = app.connect(alice).await;
    app.wait_for_connections(1).await;

    ws.close(None).await.unwrap();
    app.wait_for_connections(0).await;
    assert_eq!(app.hub.stats().await.unwrap().topics, 0);
}

#[tokio::test]
async fn connection_limit_returns_503() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let app = boot_server(config).await;
    let alice = app.user("alice");
    let _first = app.connect(alice).await;

    let err = app.try_connect_bearer(&token(alice)).await.unwrap_err();
    assert_eq!(http_status(&err), Some(503));
}

#[tokio::test]
async fn shutdown_closes_live_sessions() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");
    let mut ws = app.connect(alice).await;
    app.wait_for_connections(1).await;

    app.server.shutdown().trigger();

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
    app.wait_for_connections(0).await;
}

#[tokio::test]
async fn drain_stops_listener_sessions_and_loops() {
    let app = boot_server(ServerConfig::default()).await;
    let alice = app.user("alice");
    let _ws = app.connect(alice).await;
    app.wait_for_connections(1).await;

    let TestApp {
        server,
        commands,
        hub,
        listener,
        background,
        ..
    } = app;
    let shutdown = server.shutdown().clone();
    assert_eq!(shutdown.active_sessions(), 1);

    let report = shutdown
        .drain(listener, (server, commands, hub), background, Some(TIMEOUT))
        .await;
    assert!(report.is_complete(), "{report:?}");
    assert_eq!(shutdown.active_sessions(), 0);
}
