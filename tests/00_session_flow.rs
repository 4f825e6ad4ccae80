mod support;

use support::{Client, spawn_modelgate};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

#[tokio::test]
async fn register_compute_and_terminate() {
    let server = spawn_modelgate("").await;

    let mut client = Client::register(&server, "abc", "t0").await;
    let ack = client.recv_json().await;
    assert_eq!(ack["sessionId"], "abc");
    assert_eq!(ack["echoedMessage"], "register");
    assert_eq!(ack["timingData"]["startTime"], "t0");
    assert!(ack["timingData"]["grpcDuration"].is_string());

    client.compute("echo", "hi", "t1").await;
    let echo = client.recv_json().await;
    assert_eq!(echo["echoedMessage"], "hi");
    assert_eq!(echo["timingData"]["startTime"], "t1");

    client.compute("bbox", "frame", "t2").await;
    let bbox = client.recv_json().await;
    assert_eq!(
        bbox["bboxData"],
        serde_json::json!([
            { "x": 600, "y": 100, "w": 100, "h": 100 },
            { "x": 100, "y": 300, "w": 100, "h": 100 },
        ])
    );
    assert_eq!(bbox["timingData"]["startTime"], "t2");

    client.terminate("t3").await;
    assert_eq!(client.recv_close().await, Some(CloseCode::Normal));
}

#[tokio::test]
async fn configured_boxes_are_returned_in_order() {
    let server = spawn_modelgate(
        r#"
        [loopback]
        boxes = [
            { x = 1, y = 2, w = 3, h = 4 },
            { x = 0, y = 0, w = 10, h = 10 },
        ]
        "#,
    )
    .await;

    let mut client = Client::register(&server, "boxes", "t0").await;
    client.recv_json().await;

    client.compute("bbox", "frame", "t1").await;
    let bbox = client.recv_json().await;
    assert_eq!(bbox["bboxData"][0]["x"], 1);
    assert_eq!(bbox["bboxData"][1]["w"], 10);
}

#[tokio::test]
async fn reconnect_supersedes_the_old_connection() {
    let server = spawn_modelgate("").await;

    let mut first = Client::register(&server, "S1", "t0").await;
    first.recv_json().await;

    let mut second = Client::register(&server, "S1", "t5").await;
    let ack = second.recv_json().await;
    assert_eq!(ack["sessionId"], "S1");
    assert_eq!(ack["timingData"]["startTime"], "t5");
    assert_eq!(ack["timingData"]["grpcDuration"], "0.000");

    assert_eq!(first.recv_close().await, Some(CloseCode::Away));

    second.compute("echo", "still here", "t6").await;
    assert_eq!(second.recv_json().await["echoedMessage"], "still here");
}
