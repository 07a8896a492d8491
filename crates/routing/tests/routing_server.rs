//! A routing endpoint driven through the client, exactly as a chunk server.

use assert_matches::assert_matches;
use chunknet_client::{BackendClient, ClientError};
use chunknet_net_protocol::{
    AddChunkRemote, ErrorKind, PropagationReply, Request, decode_response,
};
use chunknet_net_transport::{FrameServer, TransportConfig};
use chunknet_primitives::{ChunkKind, HashSpan, HostAddress};
use chunknet_routing::{RoutingConfig, RoutingCoordinator, RoutingServer};
use chunknet_test_utils::{
    MockBackend, MockCluster, chunk_with_prefix, credentials, hash_with_prefix, prefix_span,
};

struct Endpoint {
    // Held so the listener outlives the test body.
    _server: FrameServer,
    host: HostAddress,
    client: BackendClient,
}

async fn serve(coordinator: RoutingCoordinator) -> Endpoint {
    chunknet_observability::init_test_logging();
    let server = RoutingServer::new(coordinator)
        .bind("127.0.0.1:0", TransportConfig::default())
        .await
        .unwrap();
    let host = HostAddress::from(server.local_addr());
    let client = BackendClient::connect_tcp(host.clone()).await.unwrap();
    Endpoint {
        _server: server,
        host,
        client,
    }
}

fn config_for(cluster: &MockCluster) -> RoutingConfig {
    cluster
        .layout()
        .into_iter()
        .fold(RoutingConfig::default(), |config, (host, spans)| {
            config.with_backend(&host, spans)
        })
}

fn hosts_of(cluster: &MockCluster) -> Vec<HostAddress> {
    cluster.backends().iter().map(|b| b.host().clone()).collect()
}

/// A: `0x00..=0x9f`, B: `0x60..=0xff`. Both own `0x60..=0x9f`.
async fn overlapping() -> MockCluster {
    MockCluster::start(vec![vec![prefix_span(0x00, 0x9f)], vec![prefix_span(0x60, 0xff)]])
        .await
        .unwrap()
}

#[tokio::test]
async fn test_reads_route_by_span() {
    let cluster = MockCluster::start(vec![vec![prefix_span(0x00, 0x3f)], vec![prefix_span(0x80, 0xff)]])
        .await
        .unwrap();
    let endpoint = serve(RoutingCoordinator::new(&config_for(&cluster))).await;
    let (hash, data) = chunk_with_prefix(0x90, 64);
    cluster.backends()[1].insert(ChunkKind::Data, hash, data.clone());

    assert_eq!(endpoint.client.get_data(hash).await.unwrap(), data);
    assert!(endpoint.client.has_data(hash).await.unwrap());
    assert_eq!(cluster.backends()[0].requests(), 0);

    assert_matches!(
        endpoint.client.get_data(hash_with_prefix(0x50)).await,
        Err(ClientError::NoMatchingServers(_))
    );
    assert_matches!(
        endpoint.client.get_meta_data(hash_with_prefix(0x10)).await,
        Err(ClientError::NotFound(_))
    );
    assert!(!endpoint.client.has_data(hash_with_prefix(0x50)).await.unwrap());
}

#[tokio::test]
async fn test_batch_reads_keep_alignment() {
    let cluster = MockCluster::start(vec![vec![prefix_span(0x00, 0x7f)]]).await.unwrap();
    let endpoint = serve(RoutingCoordinator::new(&config_for(&cluster))).await;
    let (hash, data) = chunk_with_prefix(0x20, 8);
    cluster.backends()[0].insert(ChunkKind::Meta, hash, data.clone());

    let reply = endpoint
        .client
        .get_batch(ChunkKind::Meta, &[hash_with_prefix(0xf0), hash])
        .await
        .unwrap();
    assert_eq!(reply, vec![None, Some(data)]);
}

#[tokio::test]
async fn test_propagated_write_lands_on_every_target() {
    let cluster = overlapping().await;
    let endpoint = serve(RoutingCoordinator::new(&config_for(&cluster))).await;
    let hosts = hosts_of(&cluster);
    let (hash, data) = chunk_with_prefix(0x70, 256);

    assert!(!endpoint.client.has_data(hash).await.unwrap());
    let reply = endpoint
        .client
        .set_data_remote(hash, &data, &credentials(), &hosts)
        .await
        .unwrap();
    assert_eq!(reply, vec![Ok(()), Ok(())]);

    for backend in cluster.backends() {
        assert_eq!(backend.chunk(ChunkKind::Data, &hash), Some(data.clone()));
    }
    assert!(endpoint.client.has_data(hash).await.unwrap());
}

#[tokio::test]
async fn test_propagated_write_reports_each_target() {
    let cluster = overlapping().await;
    let endpoint = serve(RoutingCoordinator::new(&config_for(&cluster))).await;
    let hosts = hosts_of(&cluster);
    // Only B owns the hash.
    let (hash, data) = chunk_with_prefix(0xe0, 16);

    let reply = endpoint
        .client
        .set_meta_data_remote(hash, &data, &credentials(), &hosts)
        .await
        .unwrap();
    assert_eq!(reply.len(), 2);
    assert_matches!(&reply[0], Err(error) if error.kind == ErrorKind::DoesNotBelong);
    assert_eq!(reply[1], Ok(()));
}

#[tokio::test]
async fn test_missing_hosts_are_refused_at_every_boundary() {
    let cluster = overlapping().await;
    let endpoint = serve(
        RoutingCoordinator::new(&config_for(&cluster)).with_authority(credentials()),
    )
    .await;
    let (hash, data) = chunk_with_prefix(0x70, 16);

    // Client-side pre-flight.
    assert_matches!(
        endpoint.client.set_data_remote(hash, &data, &credentials(), &[]).await,
        Err(ClientError::NoHostProvided(_))
    );
    assert_matches!(
        endpoint
            .client
            .delete_remote(ChunkKind::Data, hash, &credentials(), &[])
            .await,
        Err(ClientError::NoHostProvided(_))
    );

    // The endpoint itself, for a caller that skips the pre-flight.
    let payload = Request::AddRemote(
        ChunkKind::Data,
        AddChunkRemote {
            hash,
            data,
            targets: Vec::new(),
        },
    )
    .encode()
    .unwrap();
    let response = endpoint.client.connection().request(payload).await.unwrap();
    let outcome = decode_response::<PropagationReply>(&response).unwrap();
    assert_matches!(outcome, Err(error) if error.kind == ErrorKind::NoHostProvided);

    assert_matches!(
        endpoint.client.delete_data(hash, &credentials()).await,
        Err(ClientError::NoHostProvided(_))
    );
    assert_eq!(cluster.total_requests(), 0);
}

#[tokio::test]
async fn test_propagated_delete_needs_an_authority() {
    let cluster = overlapping().await;
    let hosts = hosts_of(&cluster);
    let (hash, data) = chunk_with_prefix(0x80, 16);
    for backend in cluster.backends() {
        backend.insert(ChunkKind::Data, hash, data.clone());
    }

    let bare = serve(RoutingCoordinator::new(&config_for(&cluster))).await;
    assert_matches!(
        bare.client
            .delete_remote(ChunkKind::Data, hash, &credentials(), &hosts)
            .await,
        Err(ClientError::Security(_))
    );
    assert!(cluster.backends().iter().all(|b| b.contains(ChunkKind::Data, &hash)));

    let trusted = serve(
        RoutingCoordinator::new(&config_for(&cluster)).with_authority(credentials()),
    )
    .await;
    let reply = trusted
        .client
        .delete_remote(ChunkKind::Data, hash, &credentials(), &hosts)
        .await
        .unwrap();
    assert_eq!(reply, vec![Ok(()), Ok(())]);
    assert!(cluster.backends().iter().all(|b| !b.contains(ChunkKind::Data, &hash)));
}

#[tokio::test]
async fn test_direct_write_replicates_to_covering_backends() {
    let cluster = overlapping().await;
    let endpoint = serve(
        RoutingCoordinator::new(&config_for(&cluster)).with_authority(credentials()),
    )
    .await;
    let (shared, shared_data) = chunk_with_prefix(0x65, 32);
    let (low, low_data) = chunk_with_prefix(0x10, 32);

    endpoint.client.set_data(shared, &shared_data, &credentials()).await.unwrap();
    endpoint.client.set_data(low, &low_data, &credentials()).await.unwrap();

    assert!(cluster.backends().iter().all(|b| b.contains(ChunkKind::Data, &shared)));
    assert!(cluster.backends()[0].contains(ChunkKind::Data, &low));
    assert!(!cluster.backends()[1].contains(ChunkKind::Data, &low));
    assert_eq!(endpoint.client.get_data(low).await.unwrap(), low_data);
}

#[tokio::test]
async fn test_direct_write_without_authority_is_refused() {
    let cluster = overlapping().await;
    let endpoint = serve(RoutingCoordinator::new(&config_for(&cluster))).await;
    let (hash, data) = chunk_with_prefix(0x10, 8);

    assert_matches!(
        endpoint.client.set_data(hash, &data, &credentials()).await,
        Err(ClientError::Security(_))
    );
    assert!(!cluster.backends()[0].contains(ChunkKind::Data, &hash));
}

#[tokio::test]
async fn test_remote_nonces_are_aligned_with_hosts() {
    let backend = MockBackend::start([HashSpan::FULL]).await.unwrap();
    let config = RoutingConfig::default().with_backend(backend.host(), [HashSpan::FULL]);
    let endpoint = serve(RoutingCoordinator::new(&config)).await;
    let gone = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        HostAddress::from(listener.local_addr().unwrap())
    };

    let reply = endpoint
        .client
        .get_remote_nonces(&[backend.host().clone(), gone], 2)
        .await
        .unwrap();
    assert_eq!(reply.len(), 2);
    assert_matches!(&reply[0], Ok(nonces) if nonces.len() == 2);
    assert_matches!(&reply[1], Err(error) if error.kind == ErrorKind::TransportClosed);

    // Without hosts the endpoint issues its own.
    assert_eq!(endpoint.client.get_nonces(3).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_configuration_and_known_servers() {
    let cluster = MockCluster::start(vec![
        vec![prefix_span(0x00, 0x3f)],
        vec![prefix_span(0x40, 0x7f)],
        vec![prefix_span(0xc0, 0xff)],
    ])
    .await
    .unwrap();
    let endpoint = serve(RoutingCoordinator::new(&config_for(&cluster))).await;

    let config = endpoint.client.get_configuration().await.unwrap();
    assert_eq!(config.spans, vec![prefix_span(0x00, 0x7f), prefix_span(0xc0, 0xff)]);
    assert_eq!(config.hosts, hosts_of(&cluster));

    let extra = HostAddress::new("chunks.example.net", 7000);
    endpoint.client.register_server(&extra).await.unwrap();
    endpoint.client.register_server(&extra).await.unwrap();
    let known = endpoint.client.get_known_servers().await.unwrap();
    assert_eq!(known.len(), 4);
    assert_eq!(known.last(), Some(&extra));

    assert_matches!(
        endpoint
            .client
            .set_configuration(config, &credentials())
            .await,
        Err(ClientError::Security(_))
    );
}

#[tokio::test]
async fn test_endpoints_chain() {
    let cluster = overlapping().await;
    let inner = serve(
        RoutingCoordinator::new(&config_for(&cluster)).with_authority(credentials()),
    )
    .await;

    // The outer tier manages the inner endpoint as one full-range backend.
    let outer_config = RoutingConfig::default().with_backend(&inner.host, [HashSpan::FULL]);
    let outer = RoutingCoordinator::new(&outer_config);
    // Only B owns the hash.
    let (hash, data) = chunk_with_prefix(0xe0, 48);

    assert!(!outer.has_data(hash).await.value);
    let written = outer
        .set_data(hash, &data, &credentials(), std::slice::from_ref(&inner.host))
        .await
        .unwrap();
    assert_eq!(written.value, vec![true]);
    assert!(written.is_clean());

    let seen = outer.has_data(hash).await;
    assert!(seen.value);
    assert!(seen.is_clean());
    assert_eq!(outer.get_data(hash).await.value, Some(data.clone()));
    assert_eq!(cluster.backends()[1].chunk(ChunkKind::Data, &hash), Some(data));
    assert!(!cluster.backends()[0].contains(ChunkKind::Data, &hash));
}
