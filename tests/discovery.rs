mod common;

use common::{init_tracing, unused_port, MockProcessor};
use std::net::Ipv4Addr;
use std::time::Duration;
use stormaudio::{scan, Discovery, StormAudioClient, StormError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

#[tokio::test]
async fn empty_subnet_yields_no_devices() {
    init_tracing();
    let port = unused_port().await;

    let found = scan("127.0.0.1/32", port, PROBE_TIMEOUT).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn finds_a_processor() {
    init_tracing();
    let mock = MockProcessor::start().await;

    let found = scan("127.0.0.1", mock.port(), PROBE_TIMEOUT).await.unwrap();
    assert_eq!(found.len(), 1);

    let device = found.iter().next().unwrap();
    assert_eq!(device.ip, Ipv4Addr::LOCALHOST);
    assert_eq!(device.name, "StormAudio (127.0.0.1)");
    assert!(mock.received().contains(&"ssp.power".to_string()));
}

#[tokio::test]
async fn only_responding_hosts_are_reported() {
    init_tracing();
    let mock = MockProcessor::start().await;

    // 127.0.0.2 has nothing bound on the mock's port.
    let found = Discovery::new()
        .with_port(mock.port())
        .with_probe_timeout(PROBE_TIMEOUT)
        .with_max_concurrent_probes(2)
        .scan("127.0.0.0/30")
        .await
        .unwrap();

    let ips: Vec<Ipv4Addr> = found.iter().map(|device| device.ip).collect();
    assert_eq!(ips, vec![Ipv4Addr::LOCALHOST]);
}

#[tokio::test]
async fn processor_ignoring_the_probe_is_excluded() {
    init_tracing();
    let mock = MockProcessor::start().await;
    mock.set_silent("power", true);

    let found = scan("127.0.0.1", mock.port(), PROBE_TIMEOUT).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn other_services_are_excluded() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            held.push(stream);
        }
    });

    let found = scan("127.0.0.1", port, PROBE_TIMEOUT).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn oversized_subnet_is_a_config_error() {
    let result = StormAudioClient::discover("10.0.0.0/8").await;
    assert!(matches!(result, Err(StormError::Config(_))));

    let result = StormAudioClient::discover("not-a-subnet").await;
    assert!(matches!(result, Err(StormError::Config(_))));
}
