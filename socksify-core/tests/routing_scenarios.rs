use socksify_core::{
    BlockReason, ConfigLoader, Credentials, Decision, Gateway, GatewayOptions, LogEntry, LogEvent,
    LogLevel, Protocol, ProxyHandle, SupportedProtocols,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn gateway_with_p1() -> (Gateway, ProxyHandle) {
    let gateway = Gateway::new(GatewayOptions::default());
    let p1 = gateway
        .add_proxy(
            "198.51.100.10:1080",
            SupportedProtocols::Tcp,
            Some(Credentials::new("u", "p")),
            false,
        )
        .unwrap();
    gateway.associate_process_to_proxy("app.exe", p1).unwrap();
    (gateway, p1)
}

#[test]
fn test_associated_process_is_proxied() {
    let (gateway, p1) = gateway_with_p1();

    match gateway.decide("app.exe", addr("93.184.216.34:443"), Protocol::Tcp) {
        Decision::Proxy(route) => {
            assert_eq!(route.handle, p1);
            assert_eq!(route.endpoint, addr("198.51.100.10:1080"));
            let credentials = route.credentials.unwrap();
            assert_eq!(credentials.username(), "u");
            assert_eq!(credentials.password(), "p");
        }
        other => panic!("expected proxy decision, got {}", other),
    }
}

#[test]
fn test_process_lookup_ignores_case() {
    let (gateway, p1) = gateway_with_p1();
    let decision = gateway.decide("APP.EXE", addr("93.184.216.34:443"), Protocol::Tcp);
    assert_eq!(decision.proxy_handle(), Some(p1));
}

#[test]
fn test_exclusion_overrides_assignment() {
    let (gateway, _) = gateway_with_p1();
    gateway.exclude_process("app.exe").unwrap();

    let decision = gateway.decide("app.exe", addr("93.184.216.34:443"), Protocol::Tcp);
    assert_eq!(decision, Decision::Bypass);
}

#[test]
fn test_include_list_restricts_proxying() {
    let (gateway, p1) = gateway_with_p1();
    gateway
        .include_process_destination_cidr("app.exe", "93.184.216.0/24")
        .unwrap();

    assert!(gateway
        .decide("app.exe", addr("8.8.8.8:53"), Protocol::Udp)
        .is_bypass());
    assert_eq!(
        gateway
            .decide("app.exe", addr("93.184.216.34:443"), Protocol::Tcp)
            .proxy_handle(),
        Some(p1)
    );

    gateway
        .remove_process_destination_cidr("app.exe", "93.184.216.0/24")
        .unwrap();
    assert!(gateway
        .remove_process_destination_cidr("app.exe", "93.184.216.0/24")
        .is_err());
    assert_eq!(
        gateway
            .decide("app.exe", addr("8.8.8.8:53"), Protocol::Tcp)
            .proxy_handle(),
        Some(p1)
    );
}

#[test]
fn test_excluded_cidr_wins_over_included() {
    let (gateway, _) = gateway_with_p1();
    gateway
        .include_process_destination_cidr("app.exe", "93.184.216.0/24")
        .unwrap();
    gateway
        .exclude_process_destination_cidr("app.exe", "93.184.216.34/32")
        .unwrap();

    assert!(gateway
        .decide("app.exe", addr("93.184.216.34:443"), Protocol::Tcp)
        .is_bypass());
    assert!(!gateway
        .decide("app.exe", addr("93.184.216.35:443"), Protocol::Tcp)
        .is_bypass());
}

#[test]
fn test_tcp_only_proxy_blocks_udp() {
    let (gateway, _) = gateway_with_p1();
    let decision = gateway.decide("app.exe", addr("93.184.216.34:53"), Protocol::Udp);
    assert_eq!(decision, Decision::Block(BlockReason::ProtocolMismatch));
}

#[test]
fn test_lan_bypass_overrides_rules() {
    let (gateway, _) = gateway_with_p1();
    let lan = ["10.1.2.3:80", "172.16.0.9:80", "192.168.1.1:80", "224.0.0.251:5353", "169.254.1.1:80"];

    for destination in lan {
        assert!(!gateway
            .decide("app.exe", addr(destination), Protocol::Tcp)
            .is_bypass());
    }

    gateway.set_bypass_lan(true);
    for destination in lan {
        assert!(gateway
            .decide("app.exe", addr(destination), Protocol::Tcp)
            .is_bypass());
        assert!(gateway
            .decide("app.exe", addr(destination), Protocol::Udp)
            .is_bypass());
    }
}

#[test]
fn test_unknown_process_bypasses() {
    let (gateway, _) = gateway_with_p1();
    assert!(gateway
        .decide("other.exe", addr("93.184.216.34:443"), Protocol::Tcp)
        .is_bypass());
}

#[test]
fn test_log_limit_keeps_newest_in_order() {
    let gateway = Gateway::new(GatewayOptions::default().with_log_level(LogLevel::All));
    gateway.set_log_limit(4);

    for i in 0..7u64 {
        gateway.report(LogEvent::Connected, i);
    }

    let retained: Vec<u64> = gateway
        .read_log()
        .iter()
        .filter_map(LogEntry::data)
        .collect();
    assert_eq!(retained, vec![3, 4, 5, 6]);
}

#[test]
fn test_flush_delivers_to_subscriber() {
    let gateway = Gateway::new(GatewayOptions::default().with_log_level(LogLevel::All));
    gateway.set_log_event_interval(Duration::from_secs(3600));
    let (tx, rx) = mpsc::channel::<Vec<LogEntry>>();
    let tx = Mutex::new(tx);
    gateway.subscribe(move |batch: &[LogEntry]| {
        let _ = tx.lock().unwrap().send(batch.to_vec());
    });

    gateway.start().unwrap();
    while rx.try_recv().is_ok() {}

    gateway.report(LogEvent::Disconnected, 42u64);
    gateway.flush_log();
    let batch = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(batch.iter().any(|e| e.data() == Some(42)));

    assert!(gateway.stop().is_ok());
    assert!(gateway.stop().is_ok());
}

#[test]
fn test_gateway_from_toml() {
    let config = ConfigLoader::parse(
        r#"
bypass_lan = true

[[proxies]]
endpoint = "198.51.100.10:1080"
username = "u"
password = "p"
protocols = "tcp"
start = false
processes = ["app.exe"]

[[rules]]
process = "app.exe"
include_cidrs = ["93.184.216.0/24"]
"#,
    )
    .unwrap();

    let gateway = Gateway::from_config(&config, Arc::new(socksify_core::NoopRelay)).unwrap();
    let p1 = gateway.proxies()[0].handle;

    assert_eq!(
        gateway
            .decide("app.exe", addr("93.184.216.34:443"), Protocol::Tcp)
            .proxy_handle(),
        Some(p1)
    );
    assert!(gateway
        .decide("app.exe", addr("8.8.8.8:53"), Protocol::Udp)
        .is_bypass());
    assert!(gateway
        .decide("app.exe", addr("192.168.0.10:443"), Protocol::Tcp)
        .is_bypass());
}

#[test]
fn test_decide_during_concurrent_mutation() {
    let gateway = Arc::new(Gateway::new(GatewayOptions::default()));
    let p1 = gateway
        .add_proxy("198.51.100.10:1080", SupportedProtocols::Both, None, false)
        .unwrap();
    let p2 = gateway
        .add_proxy("198.51.100.11:1080", SupportedProtocols::Both, None, false)
        .unwrap();
    gateway.associate_process_to_proxy("app.exe", p1).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let router = gateway.router();
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            let mut decisions = 0usize;
            while !done.load(Ordering::Acquire) {
                let decision = router.decide("app.exe", addr("93.184.216.34:443"), Protocol::Tcp);
                match decision {
                    Decision::Proxy(route) => assert!(route.handle == p1 || route.handle == p2),
                    Decision::Bypass => {}
                    Decision::Block(reason) => panic!("unexpected block: {:?}", reason),
                }
                decisions += 1;
            }
            decisions
        }));
    }

    for i in 0..500 {
        let target = if i % 2 == 0 { p2 } else { p1 };
        gateway.associate_process_to_proxy("app.exe", target).unwrap();
        gateway
            .include_process_destination_cidr("app.exe", "93.184.216.0/24")
            .unwrap();
        gateway
            .remove_process_destination_cidr("app.exe", "93.184.216.0/24")
            .unwrap();
    }
    gateway.exclude_process("app.exe").unwrap();
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }

    assert!(gateway
        .decide("app.exe", addr("93.184.216.34:443"), Protocol::Tcp)
        .is_bypass());
}
