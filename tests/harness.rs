use std::net::SocketAddr;
use std::time::Duration;

use surge::config::Config;
use surge::harness;
use surge::server::{BenchServer, ServerOptions};

async fn spawn_server(opts: ServerOptions) -> SocketAddr {
    let server = BenchServer::bind("127.0.0.1:0".parse().unwrap(), opts)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

fn config_for(addr: SocketAddr) -> Config {
    Config {
        servers: addr.to_string(),
        ..Config::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn two_workers_five_requests_each() {
    let addr = spawn_server(ServerOptions::default()).await;
    let cfg = Config {
        concurrency: 2,
        requests: 10,
        pool: 1,
        rate: 0,
        ..config_for(addr)
    };

    let report = harness::run(&cfg).await.unwrap();

    assert_eq!(report.issued, 10);
    assert_eq!(report.completed, 10);
    assert_eq!(report.succeeded, 10);
    assert_eq!(report.send_errors, 0);
    assert_eq!(report.unresolved, 0);
    assert_eq!(report.sample_count(), 10);
    assert!(report.samples().iter().all(|&ns| ns > 0));
    // loopback echo, no injected delay
    assert!(report.max() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn uneven_totals_leave_the_remainder_unsent() {
    let addr = spawn_server(ServerOptions::default()).await;
    let cfg = Config {
        concurrency: 3,
        requests: 10,
        pool: 2,
        ..config_for(addr)
    };

    let report = harness::run(&cfg).await.unwrap();

    // each worker runs exactly floor(10/3) = 3 iterations
    assert_eq!(report.issued, 9);
    assert_eq!(report.completed, 9);
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.requested, 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn deterministic_failures_are_counted_but_not_successes() {
    let addr = spawn_server(ServerOptions {
        fail_every: 2,
        ..ServerOptions::default()
    })
    .await;
    let cfg = Config {
        concurrency: 2,
        requests: 10,
        pool: 1,
        ..config_for(addr)
    };

    let report = harness::run(&cfg).await.unwrap();

    // arrival indices 0,2,4,6,8 answer with an error status
    assert_eq!(report.completed, 10);
    assert_eq!(report.succeeded, 5);
    assert!(report.succeeded <= report.completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_replies_resolve_through_the_drain_deadline() {
    let addr = spawn_server(ServerOptions {
        drop_every: 2,
        ..ServerOptions::default()
    })
    .await;
    let cfg = Config {
        concurrency: 1,
        requests: 4,
        pool: 1,
        timeout_secs: 1,
        ..config_for(addr)
    };

    let report = harness::run(&cfg).await.unwrap();

    // arrival indices 0 and 2 are swallowed; the run must still terminate
    assert_eq!(report.completed, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.unresolved, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_paces_issuance() {
    let addr = spawn_server(ServerOptions::default()).await;
    let cfg = Config {
        concurrency: 2,
        requests: 20,
        pool: 2,
        rate: 200,
        ..config_for(addr)
    };

    let report = harness::run(&cfg).await.unwrap();

    assert_eq!(report.completed, 20);
    // 20 requests at 200/s: at least ~90ms of pacing minus the small burst
    assert!(
        report.elapsed >= Duration::from_millis(60),
        "elapsed: {:?}",
        report.elapsed
    );
    assert!(report.elapsed < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_spreads_across_multiple_servers() {
    let a = spawn_server(ServerOptions::default()).await;
    let b = spawn_server(ServerOptions::default()).await;
    let cfg = Config {
        concurrency: 2,
        requests: 8,
        pool: 2,
        servers: format!("{},{}", a, b),
        ..Config::default()
    };

    let report = harness::run(&cfg).await.unwrap();

    assert_eq!(report.completed, 8);
    assert_eq!(report.succeeded, 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn connecting_to_a_dead_server_is_fatal() {
    // bind-then-drop to get an address nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cfg = Config {
        concurrency: 1,
        requests: 10,
        pool: 1,
        ..config_for(addr)
    };

    assert!(harness::run(&cfg).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn injected_delay_shows_up_in_latency() {
    let addr = spawn_server(ServerOptions {
        delay: Duration::from_millis(20),
        ..ServerOptions::default()
    })
    .await;
    let cfg = Config {
        concurrency: 1,
        requests: 3,
        pool: 1,
        ..config_for(addr)
    };

    let report = harness::run(&cfg).await.unwrap();

    assert_eq!(report.completed, 3);
    assert!(
        report.min() >= Duration::from_millis(20),
        "min: {:?}",
        report.min()
    );
}
