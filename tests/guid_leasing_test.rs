//! GUID leasing across clients and daemon ranks

use ahash::AHashSet;
use sos_telemetry::client::Client;
use sos_telemetry::config::{ClientConfig, DaemonConfig};
use sos_telemetry::daemon::Daemon;
use sos_telemetry::guid::GuidSource;
use sos_telemetry::store::InMemoryStore;
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_clients_never_share_ids() {
    let daemon = Daemon::start(DaemonConfig::test(), Box::new(InMemoryStore::new()), None).unwrap();
    let addr = daemon.addr().to_string();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let addr = addr.clone();
            thread::spawn(move || {
                let client = Client::connect(ClientConfig::test(addr)).unwrap();
                let mut ids = vec![client.my_guid()];
                for _ in 0..50 {
                    ids.push(client.guids().next_guid().unwrap());
                }
                ids
            })
        })
        .collect();

    let mut seen = AHashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "id {} issued twice", id);
        }
    }
    assert_eq!(seen.len(), 4 * 51);
    assert!(!seen.contains(&daemon.context().my_guid));
}

#[test]
fn test_one_client_pool_shared_across_threads() {
    let daemon = Daemon::start(DaemonConfig::test(), Box::new(InMemoryStore::new()), None).unwrap();
    let client = Arc::new(Client::connect(ClientConfig::test(daemon.addr().to_string())).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                (0..30)
                    .map(|_| client.guids().next_guid().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = AHashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "id {} issued twice", id);
        }
    }
    assert!(client.guids().refills() > 0);
}

#[test]
fn test_daemon_ranks_lease_disjoint_ranges() {
    let rank = |comm_rank| DaemonConfig {
        comm_rank,
        comm_size: 2,
        uid_max: 1000,
        ..DaemonConfig::test()
    };
    let low = Daemon::start(rank(0), Box::new(InMemoryStore::new()), None).unwrap();
    let high = Daemon::start(rank(1), Box::new(InMemoryStore::new()), None).unwrap();

    let a = Client::connect(ClientConfig::test(low.addr().to_string())).unwrap();
    let b = Client::connect(ClientConfig::test(high.addr().to_string())).unwrap();

    assert!((1..=500).contains(&a.my_guid()));
    assert!((501..=1000).contains(&b.my_guid()));
    for _ in 0..40 {
        assert!(a.guids().next_guid().unwrap() <= 500);
        assert!(b.guids().next_guid().unwrap() > 500);
    }
}

#[test]
fn test_exhausted_daemon_stops_with_error() {
    let config = DaemonConfig {
        uid_max: 12,
        guid_block_size: 5,
        ..DaemonConfig::test()
    };
    let daemon = Daemon::start(config, Box::new(InMemoryStore::new()), None).unwrap();
    let addr = daemon.addr().to_string();

    // Id 1 is the daemon's; 2..=7 and 8..=12 go to the first two clients.
    assert!(Client::connect(ClientConfig::test(addr.clone())).is_ok());
    assert!(Client::connect(ClientConfig::test(addr.clone())).is_ok());
    assert!(Client::connect(ClientConfig::test(addr)).is_err());

    let err = daemon.join().unwrap_err();
    assert!(err.is_fatal_for_daemon());
}
