//! End-to-end tests over the virtual CAN bus
//!
//! Each test builds the full stack in-process:
//! 1. A `VirtualBus` standing in for the CAN interface
//! 2. Emulated ECUs behind a `CanIdRouter`, one session task each
//! 3. A scanner/tester on its own bus port

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use candiag_can::{CanIdRouter, SingleFrameChannel, VirtualBus};
use candiag_ecu::EcuSession;
use candiag_scan::{
    discover_ids, dump_dids, prepare_dump_session, DiscoveryConfig, DumpConfig, IdPair,
};
use candiag_uds::{standard_dispatcher, ParameterStore, UdsClient, SECURITY_SEED};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct EcuSpec {
    name: &'static str,
    rx_id: u32,
    tx_id: u32,
    store: Arc<ParameterStore>,
}

/// Emulator side of a test: one router, one session task per ECU.
struct Emulator {
    router: Arc<CanIdRouter>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Emulator {
    fn start(bus: &VirtualBus, ecus: Vec<EcuSpec>, fd: bool) -> Self {
        let router = Arc::new(CanIdRouter::new(Arc::new(bus.attach())));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        for ecu in ecus {
            let endpoint = router.register(ecu.rx_id).unwrap();
            let channel = if fd {
                SingleFrameChannel::new_fd(router.transport(), endpoint, ecu.tx_id)
            } else {
                SingleFrameChannel::new(router.transport(), endpoint, ecu.tx_id)
            };
            let session = EcuSession::new(
                ecu.name,
                Arc::new(channel),
                standard_dispatcher(ecu.store),
            );
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                session.run(rx).await.unwrap();
            }));
        }

        router.start();
        Self {
            router,
            shutdown,
            tasks,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            task.await.unwrap();
        }
        self.router.shutdown().await;
    }
}

/// Scanner side: its own router and a UDS client per target ECU.
struct Tester {
    router: Arc<CanIdRouter>,
}

impl Tester {
    fn start(bus: &VirtualBus) -> Self {
        let router = Arc::new(CanIdRouter::new(Arc::new(bus.attach())));
        router.start();
        Self { router }
    }

    fn client(&self, tx_id: u32, rx_id: u32, fd: bool) -> UdsClient {
        let endpoint = self.router.register(rx_id).unwrap();
        let channel = if fd {
            SingleFrameChannel::new_fd(self.router.transport(), endpoint, tx_id)
        } else {
            SingleFrameChannel::new(self.router.transport(), endpoint, tx_id)
        };
        UdsClient::new(Arc::new(channel)).with_timeout(Duration::from_millis(500))
    }

    async fn stop(self) {
        self.router.shutdown().await;
    }
}

fn store_of(entries: &[(u16, &[u8])]) -> Arc<ParameterStore> {
    let map: BTreeMap<u16, Vec<u8>> = entries
        .iter()
        .map(|(did, bytes)| (*did, bytes.to_vec()))
        .collect();
    Arc::new(ParameterStore::from_entries(map))
}

#[tokio::test]
async fn full_range_dump_finds_exactly_the_planted_dids() {
    let bus = VirtualBus::new();
    let emulator = Emulator::start(
        &bus,
        vec![EcuSpec {
            name: "engine",
            rx_id: 0x7E0,
            tx_id: 0x7E8,
            store: store_of(&[(0x0001, b"A"), (0x00F0, b"ABCDEF")]),
        }],
        true,
    );
    let tester = Tester::start(&bus);
    let mut client = tester.client(0x7E0, 0x7E8, true);

    // A dump starts by entering the extended session; the advertised
    // P2 becomes the per-request timeout.
    prepare_dump_session(&mut client).await.unwrap();
    assert_eq!(client.timeout(), Duration::from_millis(50));

    let config = DumpConfig {
        retry_budget: 0,
        ..DumpConfig::default()
    };
    let (_cancel_tx, cancel) = watch::channel(false);
    let result = dump_dids(&client, &config, cancel).await.unwrap();

    let expected: BTreeMap<u16, Vec<u8>> = [
        (0x0001u16, b"A".to_vec()),
        (0x00F0, b"ABCDEF".to_vec()),
    ]
    .into();
    assert_eq!(result.records, expected);
    assert!(result.timed_out.is_empty());

    emulator.stop().await;
    tester.stop().await;
}

#[tokio::test]
async fn two_ecus_on_one_bus_answer_independently() {
    let bus = VirtualBus::new();
    let emulator = Emulator::start(
        &bus,
        vec![
            EcuSpec {
                name: "engine",
                rx_id: 0x7E0,
                tx_id: 0x7E8,
                store: store_of(&[(0x0010, b"engine")]),
            },
            EcuSpec {
                name: "abs",
                rx_id: 0x740,
                tx_id: 0x748,
                store: store_of(&[(0x0010, b"abs")]),
            },
        ],
        false,
    );
    let tester = Tester::start(&bus);
    let engine = tester.client(0x7E0, 0x7E8, false);
    let abs = tester.client(0x740, 0x748, false);

    assert_eq!(
        engine.read_data_by_identifier(0x0010).await.unwrap(),
        b"engine".to_vec()
    );
    assert_eq!(
        abs.read_data_by_identifier(0x0010).await.unwrap(),
        b"abs".to_vec()
    );
    // A DID only one ECU carries stays invisible on the other.
    assert!(abs.read_data_by_identifier(0x0011).await.is_err());

    emulator.stop().await;
    tester.stop().await;
}

#[tokio::test]
async fn discovery_sweep_finds_the_emulated_ecus() {
    let bus = VirtualBus::new();
    let emulator = Emulator::start(
        &bus,
        vec![
            EcuSpec {
                name: "a",
                rx_id: 0x710,
                tx_id: 0x718,
                store: store_of(&[]),
            },
            EcuSpec {
                name: "b",
                rx_id: 0x712,
                tx_id: 0x71A,
                store: store_of(&[]),
            },
        ],
        false,
    );

    let config = DiscoveryConfig {
        base_id: 0x700,
        count: 0x20,
        response_timeout: Duration::from_millis(50),
    };
    let (_cancel_tx, cancel) = watch::channel(false);
    let pairs = discover_ids(Arc::new(bus.attach()), &config, cancel)
        .await
        .unwrap();

    assert_eq!(
        pairs,
        vec![
            IdPair {
                request_id: 0x710,
                response_id: 0x718
            },
            IdPair {
                request_id: 0x712,
                response_id: 0x71A
            },
        ]
    );

    emulator.stop().await;
}

#[tokio::test]
async fn session_services_answer_with_fixed_shapes() {
    let bus = VirtualBus::new();
    let emulator = Emulator::start(
        &bus,
        vec![EcuSpec {
            name: "engine",
            rx_id: 0x7E0,
            tx_id: 0x7E8,
            store: store_of(&[]),
        }],
        false,
    );
    let tester = Tester::start(&bus);
    let client = tester.client(0x7E0, 0x7E8, false);

    // Session control advertises P2 = 50 ms, P2* = 5000 ms.
    let response = client.diagnostic_session_control(0x03).await.unwrap();
    assert_eq!(response, vec![0x50, 0x03, 0x00, 0x32, 0x01, 0xF4]);

    client.tester_present().await.unwrap();

    // Security access hands out the fixed seed on odd sub-functions.
    let seed = client.send_request(&[0x27, 0x01]).await.unwrap();
    assert_eq!(seed[0], 0x67);
    assert_eq!(seed[1], 0x01);
    assert_eq!(&seed[2..], &SECURITY_SEED);
    let unlocked = client.send_request(&[0x27, 0x02, 0xDE, 0xAD, 0xBE, 0xEF]).await;
    assert_eq!(unlocked.unwrap(), vec![0x67, 0x02]);

    emulator.stop().await;
    tester.stop().await;
}

#[tokio::test]
async fn written_parameters_survive_a_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine_params.json");

    let store = store_of(&[(0x0001, b"A")]);
    {
        let bus = VirtualBus::new();
        let emulator = Emulator::start(
            &bus,
            vec![EcuSpec {
                name: "engine",
                rx_id: 0x7E0,
                tx_id: 0x7E8,
                store: store.clone(),
            }],
            false,
        );
        let tester = Tester::start(&bus);
        let client = tester.client(0x7E0, 0x7E8, false);

        client.write_data_by_identifier(0x0002, b"new").await.unwrap();
        assert_eq!(
            client.read_data_by_identifier(0x0002).await.unwrap(),
            b"new".to_vec()
        );

        emulator.stop().await;
        tester.stop().await;
        store.save(&path).unwrap();
    }

    // A fresh emulator loading the file serves the written value.
    let reloaded = Arc::new(ParameterStore::load(&path).unwrap());
    let bus = VirtualBus::new();
    let emulator = Emulator::start(
        &bus,
        vec![EcuSpec {
            name: "engine",
            rx_id: 0x7E0,
            tx_id: 0x7E8,
            store: reloaded,
        }],
        false,
    );
    let tester = Tester::start(&bus);
    let client = tester.client(0x7E0, 0x7E8, false);

    assert_eq!(
        client.read_data_by_identifier(0x0001).await.unwrap(),
        b"A".to_vec()
    );
    assert_eq!(
        client.read_data_by_identifier(0x0002).await.unwrap(),
        b"new".to_vec()
    );

    emulator.stop().await;
    tester.stop().await;
}
