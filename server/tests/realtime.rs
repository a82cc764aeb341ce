mod common;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_proto::{topics, ClientFrame, ServerFrame};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};

use common::{spawn, TestServer};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(srv: &TestServer, token: &str) -> Ws {
    let mut req = srv.ws_url().into_client_request().unwrap();
    req.headers_mut()
        .insert("Authorization", format!("Bearer {token}").parse().unwrap());
    let (mut ws, _) = connect_async(req).await.unwrap();
    assert_eq!(next_frame(&mut ws).await, ServerFrame::Hello);
    ws
}

async fn next_frame(ws: &mut Ws) -> ServerFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .unwrap();
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(ws: &mut Ws, frame: &ClientFrame) {
    ws.send(WsMessage::Text(serde_json::to_string(frame).unwrap()))
        .await
        .unwrap();
}

#[tokio::test]
async fn upgrade_requires_a_known_caller() {
    let srv = spawn().await;
    let err = connect_async(srv.ws_url()).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn participant_receives_create_event() {
    let srv = spawn().await;
    let mut ws = connect(&srv, &srv.carol.token).await;
    let topic = topics::create_topic(&srv.channel);
    send(&mut ws, &ClientFrame::Subscribe { topic: topic.clone() }).await;
    assert_eq!(
        next_frame(&mut ws).await,
        ServerFrame::Subscribed {
            topic: topic.clone()
        }
    );

    let resp = reqwest::Client::new()
        .post(srv.url(&format!("/api/messages?channel_id={}", srv.channel)))
        .bearer_auth(&srv.alice.token)
        .json(&json!({ "content": "hello room" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    match next_frame(&mut ws).await {
        ServerFrame::Event { topic: got, payload } => {
            assert_eq!(got, topic);
            assert_eq!(payload.content, "hello room");
            assert_eq!(payload.member.profile.name, "Alice");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn non_participant_subscription_is_rejected() {
    let srv = spawn().await;
    // carol shares the server but not the conversation
    let mut ws = connect(&srv, &srv.carol.token).await;
    let topic = topics::update_topic(&srv.conversation);
    send(&mut ws, &ClientFrame::Subscribe { topic: topic.clone() }).await;
    assert_eq!(
        next_frame(&mut ws).await,
        ServerFrame::Error {
            topic: Some(topic.clone()),
            error: "Topic not found".into()
        }
    );
    assert_eq!(srv.state.bus.subscriber_count(&topic), 0);

    send(
        &mut ws,
        &ClientFrame::Subscribe {
            topic: "presence:everyone".into(),
        },
    )
    .await;
    assert!(matches!(
        next_frame(&mut ws).await,
        ServerFrame::Error { error, .. } if error == "Invalid topic"
    ));

    ws.send(WsMessage::Text("{\"action\":\"shout\"}".into()))
        .await
        .unwrap();
    assert_eq!(
        next_frame(&mut ws).await,
        ServerFrame::Error {
            topic: None,
            error: "invalid_frame".into()
        }
    );
}

#[tokio::test]
async fn unsubscribe_and_disconnect_detach_from_the_bus() {
    let srv = spawn().await;
    let mut ws = connect(&srv, &srv.alice.token).await;
    let topic = topics::create_topic(&srv.conversation);
    send(&mut ws, &ClientFrame::Subscribe { topic: topic.clone() }).await;
    next_frame(&mut ws).await;
    assert_eq!(srv.state.bus.subscriber_count(&topic), 1);

    send(&mut ws, &ClientFrame::Unsubscribe { topic: topic.clone() }).await;
    assert_eq!(
        next_frame(&mut ws).await,
        ServerFrame::Unsubscribed {
            topic: topic.clone()
        }
    );
    assert_eq!(srv.state.bus.subscriber_count(&topic), 0);

    send(&mut ws, &ClientFrame::Subscribe { topic: topic.clone() }).await;
    next_frame(&mut ws).await;
    ws.close(None).await.unwrap();
    drop(ws);
    let mut detached = false;
    for _ in 0..50 {
        if srv.state.bus.subscriber_count(&topic) == 0 {
            detached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(detached);
}
