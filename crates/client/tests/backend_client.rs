//! Typed client operations against an in-memory chunk server.

use std::time::Duration;

use assert_matches::assert_matches;
use chunknet_client::{BackendClient, ClientError, ConnectionPool};
use chunknet_net_protocol::BackendConfiguration;
use chunknet_net_transport::{TransportConfig, TransportError};
use chunknet_primitives::{ChunkKind, HostAddress};
use chunknet_test_utils::{
    MockBackend, chunk_with_prefix, credentials, hash_with_prefix, prefix_span,
};

async fn low_half_backend() -> (MockBackend, BackendClient) {
    let backend = MockBackend::start([prefix_span(0x00, 0x7f)]).await.unwrap();
    let client = BackendClient::connect_tcp(backend.host().clone()).await.unwrap();
    (backend, client)
}

#[tokio::test]
async fn test_set_then_get_and_has() {
    let (backend, client) = low_half_backend().await;
    let creds = credentials();
    let (hash, data) = chunk_with_prefix(0x11, 256);

    assert!(!client.has_data(hash).await.unwrap());
    client.set_data(hash, &data, &creds).await.unwrap();
    assert!(client.has_data(hash).await.unwrap());
    assert_eq!(client.get_data(hash).await.unwrap(), data);

    // Data and metadata live apart.
    assert!(!client.has_meta_data(hash).await.unwrap());
    assert_matches!(client.get_meta_data(hash).await, Err(ClientError::NotFound(_)));
    assert_eq!(backend.chunk(ChunkKind::Data, &hash), Some(data));
}

#[tokio::test]
async fn test_batches_are_aligned() {
    let (backend, client) = low_half_backend().await;
    let (present, data) = chunk_with_prefix(0x01, 32);
    let absent = hash_with_prefix(0x02);
    backend.insert(ChunkKind::Meta, present, data.clone());

    let chunks = client
        .get_batch(ChunkKind::Meta, &[absent, present])
        .await
        .unwrap();
    assert_eq!(chunks, vec![None, Some(data)]);

    let presence = client
        .has_batch(ChunkKind::Meta, &[present, absent])
        .await
        .unwrap();
    assert_eq!(presence, vec![true, false]);
}

#[tokio::test]
async fn test_backend_errors_map_to_distinct_kinds() {
    let backend = MockBackend::builder()
        .span(prefix_span(0x00, 0x7f))
        .capacity(100)
        .start()
        .await
        .unwrap();
    let client = BackendClient::connect_tcp(backend.host().clone()).await.unwrap();
    let creds = credentials();

    let (foreign, data) = chunk_with_prefix(0xf0, 10);
    assert_matches!(
        client.set_data(foreign, &data, &creds).await,
        Err(ClientError::DoesNotBelong(_))
    );
    assert_matches!(client.get_data(foreign).await, Err(ClientError::DoesNotBelong(_)));

    let (big, data) = chunk_with_prefix(0x10, 101);
    assert_matches!(
        client.set_data(big, &data, &creds).await,
        Err(ClientError::OutOfSpace(_))
    );

    assert_matches!(
        client.delete_data(hash_with_prefix(0x10), &creds).await,
        Err(ClientError::NotFound(_))
    );
}

#[tokio::test]
async fn test_nonces_are_single_use() {
    let (backend, client) = low_half_backend().await;
    let nonces = client.get_nonces(3).await.unwrap();
    assert_eq!(nonces.len(), 3);
    assert_eq!(backend.outstanding_nonces(), 3);

    let creds = credentials();
    let (hash, data) = chunk_with_prefix(0x05, 8);
    client.set_data(hash, &data, &creds).await.unwrap();
    // One more issued and consumed by the write.
    assert_eq!(backend.outstanding_nonces(), 3);

    // A nonce-less remote fetch is refused by a plain chunk server.
    assert_matches!(
        client.get_remote_nonces(&[backend.host().clone()], 1).await,
        Err(ClientError::Malformed(_))
    );
}

#[tokio::test]
async fn test_delete_removes_chunk() {
    let (backend, client) = low_half_backend().await;
    let creds = credentials();
    let (hash, data) = chunk_with_prefix(0x22, 64);
    client.set_meta_data(hash, &data, &creds).await.unwrap();

    client.delete_meta_data(hash, &creds).await.unwrap();
    assert!(!backend.contains(ChunkKind::Meta, &hash));
    assert!(!client.has_meta_data(hash).await.unwrap());
}

#[tokio::test]
async fn test_hash_listings_are_windowed_and_ordered() {
    let (backend, client) = low_half_backend().await;
    let mut hashes: Vec<_> = (0..5u8).map(|i| hash_with_prefix(i * 10)).collect();
    for hash in &hashes {
        backend.insert(ChunkKind::Data, *hash, vec![1]);
    }
    hashes.sort();

    assert_eq!(client.get_data_hashes(0, 10).await.unwrap(), hashes);
    assert_eq!(client.get_data_hashes(1, 2).await.unwrap(), hashes[1..3].to_vec());
    assert!(client.get_meta_data_hashes(0, 10).await.unwrap().is_empty());

    let project = hash_with_prefix(0x33);
    backend.insert(ChunkKind::Meta, project, vec![2]);
    backend.mark_project(project);
    assert_eq!(client.get_project_hashes(0, 10).await.unwrap(), vec![project]);
}

#[tokio::test]
async fn test_configuration_roundtrip_and_idle_timeout() {
    let backend = MockBackend::builder()
        .span(prefix_span(0x00, 0x3f))
        .idle_timeout_ms(1_500)
        .start()
        .await
        .unwrap();
    let client = BackendClient::connect_tcp(backend.host().clone()).await.unwrap();

    let config = client.get_configuration().await.unwrap();
    assert_eq!(config.spans, vec![prefix_span(0x00, 0x3f)]);
    assert_eq!(client.connection().idle_timeout(), Some(Duration::from_millis(1_500)));

    let update = BackendConfiguration {
        spans: vec![prefix_span(0x00, 0xff)],
        ..config
    };
    client.set_configuration(update.clone(), &credentials()).await.unwrap();
    assert_eq!(backend.spans(), update.spans);
}

#[tokio::test]
async fn test_known_servers() {
    let (_backend, client) = low_half_backend().await;
    let other = HostAddress::new("10.0.0.7", 4000);
    client.register_server(&other).await.unwrap();
    client.register_server(&other).await.unwrap();
    assert_eq!(client.get_known_servers().await.unwrap(), vec![other]);
}

#[tokio::test]
async fn test_remote_writes_without_hosts_fail_before_io() {
    let (backend, client) = low_half_backend().await;
    let creds = credentials();
    let (hash, data) = chunk_with_prefix(0x01, 4);
    backend.reset_requests();

    assert_matches!(
        client.set_data_remote(hash, &data, &creds, &[]).await,
        Err(ClientError::NoHostProvided(_))
    );
    assert_matches!(
        client.delete_remote(ChunkKind::Data, hash, &creds, &[]).await,
        Err(ClientError::NoHostProvided(_))
    );
    assert_eq!(backend.requests(), 0);
}

#[tokio::test]
async fn test_socket_killed_mid_flight_never_hangs() {
    let (backend, client) = low_half_backend().await;
    let (hash, data) = chunk_with_prefix(0x09, 16);
    backend.insert(ChunkKind::Data, hash, data.clone());

    backend.stall();
    let in_flight = client.get_data(hash);
    let killer = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.drop_connections();
        backend.resume();
    };
    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(in_flight, killer)
    })
    .await
    .expect("request resolved");

    match outcome {
        Ok(bytes) => assert_eq!(bytes, data),
        Err(error) => assert!(error.is_transport(), "unexpected {error:?}"),
    }

    let next = tokio::time::timeout(Duration::from_secs(5), client.get_data(hash))
        .await
        .expect("request resolved");
    assert_eq!(next.unwrap(), data);
}

#[tokio::test]
async fn test_close_rejects_further_requests() {
    let (_backend, client) = low_half_backend().await;
    client.close().await;
    assert!(client.is_closed());
    assert_matches!(
        client.get_data(hash_with_prefix(0x01)).await,
        Err(ClientError::Transport(TransportError::Closed))
    );
}

#[tokio::test]
async fn test_pool_keys_by_session_and_host() {
    let backend = MockBackend::start([prefix_span(0x00, 0xff)]).await.unwrap();
    let pool = ConnectionPool::new(TransportConfig::default());
    let host = backend.host().clone();

    let alice = pool.open_session();
    let bob = pool.open_session();
    assert_ne!(alice, bob);

    let a1 = pool.client(alice, &host).await.unwrap();
    let a2 = pool.client(alice, &host).await.unwrap();
    let b1 = pool.client(bob, &host).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&a1, &a2));
    assert!(!std::sync::Arc::ptr_eq(&a1, &b1));
    assert_eq!(pool.len(), 2);

    // A closed client is replaced on next use.
    a1.close().await;
    let a3 = pool.client(alice, &host).await.unwrap();
    assert!(!std::sync::Arc::ptr_eq(&a1, &a3));
    assert!(a3.has_data(hash_with_prefix(0x01)).await.is_ok());

    pool.close_session(alice).await;
    assert_eq!(pool.len(), 1);
    assert!(a3.is_closed());
    assert!(!b1.is_closed());

    pool.close_all().await;
    assert!(pool.is_empty());
    assert!(b1.is_closed());
}
