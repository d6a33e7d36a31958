//! Client and server over a real socket

use carga_api::{
    Channel, Command, Event, EventPayload, Response, ResponsePayload, ResponseResult,
};
use carga_ipc::{IpcClient, IpcServer, ServerMessage};
use carga_util::ShipmentId;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Answers Ping and Subscribe like the daemon does
async fn serve(server: Arc<IpcServer>) {
    let mut messages = server.take_message_receiver().await.unwrap();
    while let Some(message) = messages.recv().await {
        if let ServerMessage::Request { client_id, request } = message {
            let payload = match request.command {
                Command::Subscribe { channel } => ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                    channel,
                },
                _ => ResponsePayload::Pong,
            };
            let _ = server
                .send_response(&client_id, Response::success(request.request_id, payload))
                .await;
        }
    }
}

async fn start_server() -> (tempfile::TempDir, std::path::PathBuf, Arc<IpcServer>) {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("cargad.sock");

    let mut server = IpcServer::new(&socket_path);
    server.start().await.unwrap();
    let server = Arc::new(server);

    let runner = server.clone();
    tokio::spawn(async move { runner.run().await });
    tokio::spawn(serve(server.clone()));

    (dir, socket_path, server)
}

#[tokio::test]
async fn ping_round_trip() {
    let (_dir, socket_path, _server) = start_server().await;

    let mut client = IpcClient::connect(&socket_path).await.unwrap();
    let response = client.send(Command::Ping).await.unwrap();

    assert_eq!(response.request_id, 1);
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::Pong)
    ));
}

#[tokio::test]
async fn events_reach_only_subscribers() {
    let (_dir, socket_path, server) = start_server().await;
    let watched = Channel::Shipment(ShipmentId::new("S1"));
    let ignored = Channel::Shipment(ShipmentId::new("S2"));

    let client = IpcClient::connect(&socket_path).await.unwrap();
    let mut stream = client.subscribe(std::slice::from_ref(&watched)).await.unwrap();

    server.broadcast_event(Event::new(Some(ignored), EventPayload::Shutdown));
    server.broadcast_event(Event::new(Some(watched.clone()), EventPayload::Shutdown));

    let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.channel, Some(watched));
}

#[tokio::test]
async fn disconnect_removes_client() {
    let (_dir, socket_path, server) = start_server().await;

    let mut client = IpcClient::connect(&socket_path).await.unwrap();
    client.send(Command::Ping).await.unwrap();
    assert_eq!(server.client_count().await, 1);

    drop(client);

    for _ in 0..100 {
        if server.client_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client was not removed");
}
