//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 路由场景 e2e 测试 (router → registry → sinks)
//! - 热替换与客户端链路测试

#[cfg(test)]
mod contract_tests {
    use contracts::{wire, Ack, ContractError, FabricBlueprint, Message, MessageSet};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(Ack::default(), Ack { accepted: 0, rejected: 0 });
    }

    #[test]
    fn test_blueprint_defaults() {
        let blueprint: FabricBlueprint = serde_json::from_str("{}").unwrap();
        assert_eq!(blueprint.server.listen, "0.0.0.0:7101");
        assert_eq!(blueprint.server.request_deadline_ms, 1_000);
        assert_eq!(blueprint.router.threads, 4);
        assert_eq!(blueprint.router.queue_capacity, 10_000);
        assert!(blueprint.sinks.is_empty());
        assert!(blueprint.client.is_none());
    }

    #[test]
    fn test_message_set_frame_keeps_order_and_timestamps() {
        let set = MessageSet::new(vec![
            Message::with_timestamp("topic1", "a", 11).unwrap(),
            Message::with_timestamp("topic2", "b", 12).unwrap(),
        ]);
        let decoded: MessageSet = wire::decode(&wire::encode(&set).unwrap()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.messages[1].topic(), "topic2");
        assert_eq!(decoded.messages[1].timestamp_ms(), 12);
    }

    #[test]
    fn test_error_display_snapshot() {
        assert_eq!(
            ContractError::filter("regex", "payload is not UTF-8").to_string(),
            "filter 'regex' error: payload is not UTF-8"
        );
        assert!(Message::new("", "x").is_err());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use client::ClientDispatcher;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        ClientConfig, ClientMode, ContractError, FabricBlueprint, Message, MessageFilter,
        RouterConfig, SinkConfig,
    };
    use router::{
        CompiledRoute, FilterRegistry, IngestServer, MessageRouter, RouteMap, RouteOutcome,
        RoutingTable,
    };
    use sinks::{NotifyHub, SinkFactory, SinkMetrics, SinkRegistry};
    use tokio::sync::oneshot;

    const SCENARIO: &str = r#"
[router]
threads = 4

[sinks.default]
type = "null"

[sinks.sink1]
type = "null"

[sinks.filtered]
type = "null"

[[routes.topic1.where]]
sink = "sink1"

[[routes.topic1.where]]
sink = "default"

[[routes.topic2.where]]
sink = "sink1"

[[routes.topic4.where]]
sink = "filtered"
filter = { type = "json_path", path = "/key", pattern = "^value[0-9]*[02468]$" }
"#;

    /// Router, registry and table wired from one blueprint
    struct Fixture {
        hub: NotifyHub,
        registry: Arc<SinkRegistry>,
        table: Arc<RoutingTable>,
        router: Arc<MessageRouter>,
    }

    impl Fixture {
        async fn start(blueprint: &FabricBlueprint) -> Self {
            let hub = NotifyHub::from_configs(&blueprint.notify).unwrap();
            let table = Arc::new(RoutingTable::from_map(
                RoutingTable::compile(&blueprint.routes, &FilterRegistry::with_defaults())
                    .unwrap(),
            ));
            let registry = Arc::new(SinkRegistry::new());
            registry
                .apply(&blueprint.sinks, &SinkFactory::with_defaults(), &hub)
                .await
                .unwrap();
            let router = Arc::new(MessageRouter::start(
                &blueprint.router,
                Arc::clone(&table),
                Arc::clone(&registry),
            ));
            Self {
                hub,
                registry,
                table,
                router,
            }
        }

        /// Metrics of the live handle; the lease is released immediately
        fn metrics(&self, sink: &str) -> Arc<SinkMetrics> {
            Arc::clone(self.registry.get(sink).unwrap().metrics())
        }

        async fn stop(&self) {
            self.router.shutdown().await;
            self.registry.shutdown().await;
            self.hub.close_all();
        }
    }

    fn blueprint(toml: &str) -> FabricBlueprint {
        ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap()
    }

    async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// topic1 fans out to two sinks, topic2 to one, topic3 has no route
    #[tokio::test]
    async fn test_e2e_topic_routing() {
        let fixture = Fixture::start(&blueprint(SCENARIO)).await;
        let sink1 = fixture.metrics("sink1");
        let default = fixture.metrics("default");

        for (topic, count) in [("topic1", 10), ("topic2", 5), ("topic3", 20)] {
            for i in 0..count {
                let message = Message::new(topic, format!("{topic}-{i}")).unwrap();
                assert_eq!(
                    fixture.router.route(message).await,
                    RouteOutcome::Enqueued
                );
            }
        }
        fixture.stop().await;

        let stats = fixture.router.stats();
        assert_eq!(stats.received, 35);
        assert_eq!(stats.routed, 15);
        assert_eq!(stats.unrouted, 20);
        assert_eq!(stats.received_for("topic3"), 20);
        assert_eq!(sink1.write_count(), 15);
        assert_eq!(default.write_count(), 10);
        assert_eq!(stats.delivered, 25);
        assert_eq!(stats.rejected, 0);
    }

    #[tokio::test]
    async fn test_e2e_json_path_filter() {
        let fixture = Fixture::start(&blueprint(SCENARIO)).await;
        let filtered = fixture.metrics("filtered");

        for i in 0..30 {
            let payload = serde_json::json!({ "key": format!("value{i}") }).to_string();
            fixture
                .router
                .route(Message::new("topic4", payload).unwrap())
                .await;
        }
        fixture.stop().await;

        let stats = fixture.router.stats();
        assert_eq!(filtered.write_count(), 15);
        assert_eq!(stats.filtered_out, 15);
        assert_eq!(stats.filter_errors, 0);
    }

    /// Sinks and routes are swapped while messages are in flight
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_hot_swap_loses_nothing() {
        const MESSAGES: usize = 2_000;
        let fixture = Fixture::start(&blueprint(
            r#"
[sinks.a]
type = "null"
queue_capacity = 4000

[[routes.topic1.where]]
sink = "a"
"#,
        ))
        .await;
        let mut generations = vec![fixture.metrics("a")];

        let router = Arc::clone(&fixture.router);
        let producer = tokio::spawn(async move {
            for i in 0..MESSAGES {
                let outcome = router
                    .route(Message::new("topic1", format!("m{i}")).unwrap())
                    .await;
                assert_eq!(outcome, RouteOutcome::Enqueued);
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        let factory = SinkFactory::with_defaults();
        let filters = FilterRegistry::with_defaults();
        for round in 0..6 {
            // A changed descriptor forces a new handle
            let mut sinks = BTreeMap::new();
            let mut config = SinkConfig::new("null");
            config.queue_capacity = 4_001 + round;
            sinks.insert("a".to_string(), config);

            let summary = fixture
                .registry
                .apply(&sinks, &factory, &fixture.hub)
                .await
                .unwrap();
            assert_eq!(summary.created, vec!["a"]);
            generations.push(fixture.metrics("a"));

            let routes = blueprint(
                r#"
[sinks.a]
type = "null"

[[routes.topic1.where]]
sink = "a"
"#,
            )
            .routes;
            fixture
                .table
                .replace(RoutingTable::compile(&routes, &filters).unwrap());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        producer.await.unwrap();
        fixture.stop().await;

        let stats = fixture.router.stats();
        let written: u64 = generations.iter().map(|m| m.write_count()).sum();
        let rejected: u64 = generations.iter().map(|m| m.rejected_count()).sum();
        assert_eq!(stats.received, MESSAGES as u64);
        assert_eq!(stats.missing_sink, 0);
        assert_eq!(rejected, 0);
        assert_eq!(stats.delivered, MESSAGES as u64);
        assert_eq!(written, MESSAGES as u64);
    }

    async fn serve(fixture: &Fixture) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let server = IngestServer::bind("127.0.0.1:0", Arc::clone(&fixture.router))
            .await
            .unwrap();
        let addr = server.local_addr().to_string();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .run(async move {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
        });
        (addr, stop_tx, task)
    }

    #[tokio::test]
    async fn test_e2e_client_through_ingest_server() {
        let fixture = Fixture::start(&blueprint(SCENARIO)).await;
        let sink1 = fixture.metrics("sink1");
        let (addr, stop, server) = serve(&fixture).await;

        let sync = ClientDispatcher::new(ClientConfig::new(vec![addr.clone()], ClientMode::Sync))
            .unwrap();
        for i in 0..5 {
            sync.send(Message::new("topic2", format!("sync-{i}")).unwrap())
                .await
                .unwrap();
        }
        sync.shutdown().await;
        assert_eq!(sync.stats().acked, 5);

        let mut config = ClientConfig::new(vec![addr], ClientMode::Async);
        config.async_batch_size = 8;
        config.async_linger_ms = 5;
        let async_client = ClientDispatcher::new(config).unwrap();
        for i in 0..50 {
            async_client
                .send(Message::new("topic2", format!("async-{i}")).unwrap())
                .await
                .unwrap();
        }
        async_client.shutdown().await;
        let stats = async_client.stats();
        assert_eq!(stats.acked, 50);
        assert_eq!(stats.lost, 0);

        let _ = stop.send(());
        server.await.unwrap();
        fixture.stop().await;
        assert_eq!(sink1.write_count(), 55);
    }

    /// Passes every message, slowly
    struct SlowFilter;

    impl MessageFilter for SlowFilter {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn test(&self, _message: &Message) -> Result<bool, ContractError> {
            std::thread::sleep(Duration::from_millis(40));
            Ok(true)
        }
    }

    /// A saturated server still acks in time, so the client never re-sends
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_saturated_server_never_duplicates() {
        let hub = NotifyHub::new();
        let registry = Arc::new(SinkRegistry::new());
        let sinks = BTreeMap::from([("sink1".to_string(), SinkConfig::new("null"))]);
        registry
            .apply(&sinks, &SinkFactory::with_defaults(), &hub)
            .await
            .unwrap();
        let sink1 = Arc::clone(registry.get("sink1").unwrap().metrics());

        let mut map = RouteMap::new();
        map.insert(
            "slow".into(),
            Arc::from(vec![CompiledRoute::to_sink("sink1").with_filter(Arc::new(SlowFilter))]),
        );
        let config = RouterConfig {
            threads: 1,
            queue_capacity: 1,
            enqueue_timeout_ms: 200,
            shutdown_grace_ms: 5_000,
        };
        let router = Arc::new(MessageRouter::start(
            &config,
            Arc::new(RoutingTable::from_map(map)),
            Arc::clone(&registry),
        ));

        let server = IngestServer::bind("127.0.0.1:0", Arc::clone(&router))
            .await
            .unwrap()
            .with_request_deadline(Duration::from_millis(100));
        let addr = server.local_addr().to_string();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        let mut config = ClientConfig::new(vec![addr], ClientMode::Sync);
        config.request_timeout_ms = 300;
        config.retry_count = 2;
        let client = ClientDispatcher::new(config).unwrap();
        let messages = (0..20)
            .map(|i| Message::new("slow", format!("m{i}")).unwrap())
            .collect();
        let ack = client.send_batch(messages).await.unwrap();
        assert_eq!(ack.accepted + ack.rejected, 20);
        assert!(ack.rejected > 0);
        client.shutdown().await;

        let stats = client.stats();
        assert_eq!(stats.retried, 0);
        assert_eq!(stats.acked, u64::from(ack.accepted));
        assert_eq!(stats.lost, u64::from(ack.rejected));

        let _ = stop.send(());
        server.await.unwrap().unwrap();
        router.shutdown().await;
        registry.shutdown().await;
        assert_eq!(router.stats().delivered, u64::from(ack.accepted));
        assert_eq!(sink1.write_count(), u64::from(ack.accepted));
    }

    fn batch_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "log"))
            .collect()
    }

    /// local_file hands completed batches to batch_log over a queue channel
    #[tokio::test]
    async fn test_e2e_local_file_to_batch_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = format!(
            r#"
[notify.batches]
type = "queue"

[sinks.local]
type = "local_file"
directory = "{}"
notify = "batches"
flush_interval_ms = 20

[sinks.consumer]
type = "batch_log"
notify = "batches"
poll_ms = 10

[[routes.topic1.where]]
sink = "local"
"#,
            dir.path().display().to_string().replace('\\', "/")
        );
        let fixture = Fixture::start(&blueprint(&config)).await;

        for i in 0..10 {
            fixture
                .router
                .route(Message::new("topic1", format!("m{i}")).unwrap())
                .await;
        }

        wait_for("batch files", || {
            batch_files(dir.path())
                .iter()
                .map(|p| sinks::read_batch(p).unwrap().len())
                .sum::<usize>()
                == 10
        })
        .await;
        let batches = batch_files(dir.path()).len();
        wait_for("batch acks", || {
            fixture.hub.report_stats()["batches"].contains(&format!("received={batches}"))
        })
        .await;

        fixture.stop().await;
        assert!(fixture.hub.report_stats()["batches"].ends_with(" closed"));
    }
}
