//! End-to-end tests of the per-connection pipeline over TCP.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cmdsock::{AppError, Command, OutputMode, ServerOptions};
use tokio::io::AsyncWriteExt;

use super::test_helpers::{
    connect_resetting, delayed_flag, eventually, sample_table, start_tcp, wait_for_connections,
    Client,
};

fn structured() -> ServerOptions {
    ServerOptions {
        output: OutputMode::Structured,
        ..ServerOptions::default()
    }
}

#[tokio::test]
async fn escaped_argument_is_decoded_and_echoed() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    let response = client.request("test Wonderland%20Forever").await;

    assert_eq!(response, "Wonderland Forever\n");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn multiple_results_are_space_joined() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    assert_eq!(client.request("three").await, "one two three\n");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn unknown_command_reports_error_and_closes() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    let response = client.request("nope").await;

    assert_eq!(response, "ERROR: unknown command: nope\n");
    assert_eq!(client.read_line().await, None, "connection must be closed");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn unbound_command_reports_error_and_closes() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    let response = client.request("unbound x").await;

    assert_eq!(response, "ERROR: invalid handler: unbound\n");
    assert_eq!(client.read_line().await, None);
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn handler_failure_keeps_connection_open() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    assert_eq!(client.request("fail").await, "ERROR: boom\n");
    assert_eq!(client.request("three").await, "one two three\n");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn responses_follow_request_order() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    client.send("slow\nfast\ntest a b\n").await;

    assert_eq!(client.read_line().await.as_deref(), Some("slow\n"));
    assert_eq!(client.read_line().await.as_deref(), Some("fast\n"));
    assert_eq!(client.read_line().await.as_deref(), Some("a b\n"));
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn crlf_requests_are_accepted() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    client.send("test caf%C3%A9\r\n").await;

    assert_eq!(client.read_line().await.as_deref(), Some("caf\u{e9}\n"));
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn structured_mode_writes_json_lines() {
    let (server, address) = start_tcp(sample_table(), structured()).await;
    let mut client = Client::connect(&address).await;

    assert_eq!(client.request("three").await, "[\"one\",\"two\",\"three\"]\n");
    assert_eq!(client.request("fail").await, "{\"error\":\"boom\"}\n");
    assert_eq!(client.request("test").await, "[]\n");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn abort_line_is_text_in_structured_mode() {
    let (server, address) = start_tcp(sample_table(), structured()).await;
    let mut client = Client::connect(&address).await;

    assert_eq!(client.request("nope").await, "ERROR: unknown command: nope\n");
    assert_eq!(client.read_line().await, None);
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn help_lists_registered_commands() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut client = Client::connect(&address).await;

    client.send("help\n").await;
    let mut listing = Vec::new();
    for _ in 0..server.commands().len() {
        listing.push(client.read_line().await.expect("help line"));
    }

    assert!(listing[0].starts_with("fail"));
    assert!(listing.iter().any(|line| line.starts_with("test") && line.ends_with("text\n")));
    assert!(listing.iter().any(|line| line.starts_with("unbound") && line.ends_with("target\n")));
    // Connection is still usable afterwards.
    assert_eq!(client.request("fast").await, "fast\n");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn over_long_line_aborts_connection() {
    let options = ServerOptions {
        max_line_bytes: 16,
        ..ServerOptions::default()
    };
    let (server, address) = start_tcp(sample_table(), options).await;
    let mut client = Client::connect(&address).await;

    client.send(&"x".repeat(64)).await;

    let response = client.read_line().await.expect("error line");
    assert!(
        response.starts_with("ERROR: codec: line too long"),
        "got: {response:?}"
    );
    assert_eq!(client.read_line().await, None);
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn failing_connection_does_not_affect_others() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut healthy = Client::connect(&address).await;
    let mut doomed = Client::connect(&address).await;

    assert_eq!(doomed.request("nope").await, "ERROR: unknown command: nope\n");
    assert_eq!(doomed.read_line().await, None);

    assert_eq!(healthy.request("fast").await, "fast\n");
    wait_for_connections(&server, 1).await;
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn handler_completes_after_client_disconnects() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut table = sample_table();
    table
        .register(delayed_flag(&flag, Duration::from_millis(100)))
        .expect("register mark");
    let (server, address) = start_tcp(table, ServerOptions::default()).await;

    let mut client = Client::connect(&address).await;
    client.send("mark\n").await;
    drop(client);

    assert!(
        eventually(|| flag.load(Ordering::SeqCst)).await,
        "handler must run to completion"
    );
    wait_for_connections(&server, 0).await;
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn registration_applies_to_new_connections_only() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut before = Client::connect(&address).await;
    wait_for_connections(&server, 1).await;

    server
        .register(Command::new("late", Vec::<String>::new(), |_args: Vec<String>| async {
            Ok::<_, AppError>(vec!["here".to_owned()])
        }))
        .expect("register late");
    let mut after = Client::connect(&address).await;

    assert_eq!(after.request("late").await, "here\n");
    assert_eq!(before.request("late").await, "ERROR: unknown command: late\n");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn unregistered_command_is_unknown_to_new_connections() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;

    assert!(server.unregister("fast").is_some());
    let mut client = Client::connect(&address).await;

    assert_eq!(client.request("fast").await, "ERROR: unknown command: fast\n");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn peer_reset_during_handler_closes_only_that_connection() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut healthy = Client::connect(&address).await;
    let mut resetting = connect_resetting(&address).await;
    resetting.write_all(b"slow\n").await.expect("send request");
    wait_for_connections(&server, 2).await;

    // The reply to `slow` is written to a socket the peer already reset.
    drop(resetting);

    wait_for_connections(&server, 1).await;
    assert_eq!(healthy.request("fast").await, "fast\n");
    let mut late = Client::connect(&address).await;
    assert_eq!(late.request("test still up").await, "still up\n");
    server.stop().await.expect("stop after a reset peer");
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn peer_reset_mid_line_closes_only_that_connection() {
    let (server, address) = start_tcp(sample_table(), ServerOptions::default()).await;
    let mut healthy = Client::connect(&address).await;
    let mut resetting = connect_resetting(&address).await;
    resetting.write_all(b"slo").await.expect("send partial line");
    wait_for_connections(&server, 2).await;

    drop(resetting);

    wait_for_connections(&server, 1).await;
    assert_eq!(healthy.request("three").await, "one two three\n");
    server.stop().await.expect("stop after a reset peer");
    assert_eq!(server.connection_count(), 0);
    assert_eq!(healthy.read_line().await, None);
}
