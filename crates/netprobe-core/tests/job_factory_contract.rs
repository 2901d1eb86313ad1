//! Contract Test: Job Set Construction
//!
//! Constraints verified:
//! - One job per (local address group, target, port)
//! - Literal IP targets never touch a resolver
//! - TLS comes from the scheme or global settings, never from the port
//! - By-host jobs resolve on every run and report each address
//!
//! If this test fails, monitors probe the wrong things.

mod common;

use common::*;
use netprobe_core::config::{PingMode, TlsSettings};
use netprobe_core::dialchain::BaseKind;
use netprobe_core::event::TLS_HANDSHAKE_RTT;
use netprobe_core::job::{FactoryDeps, ProbeJobFactory};
use netprobe_core::{Error, MonitorConfig, ProbeJob};
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn build(config: MonitorConfig, resolver: &CountingResolver) -> netprobe_core::Result<Vec<ProbeJob>> {
    let deps = FactoryDeps::system(42)
        .with_interfaces(StaticInterfaces::with("eth0", &["127.0.0.1", "fe80::5"]))
        .with_resolver(Arc::new(resolver.clone()));
    ProbeJobFactory::new(config, deps).build()
}

#[test]
fn default_binding_with_two_ports_yields_two_host_jobs() {
    let resolver = CountingResolver::new(vec!["192.0.2.1".parse().unwrap()]);
    let config = monitor("default", &["example.com:80", "example.com:443"]).with_mode(PingMode::Any);

    let jobs = assert_ok!(build(config, &resolver));

    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        assert_eq!(job.strategy().name(), "by-host");
        assert_eq!(job.chain().base().kind(), BaseKind::Direct);
        // port 443 alone never enables TLS
        assert!(!job.chain().stages().contains(&TLS_HANDSHAKE_RTT));
    }
    assert_eq!(resolver.calls(), 0, "by-host jobs resolve lazily");
}

#[test]
fn literal_ip_with_port_list_yields_ip_jobs_without_resolution() {
    let resolver = CountingResolver::new(vec![]);
    let config = monitor("default", &["93.184.216.34"])
        .with_ports(vec![80, 443])
        .with_mode(PingMode::All);

    let jobs = assert_ok!(build(config, &resolver));

    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.strategy().name() == "by-ip"));
    assert_eq!(jobs[0].target().port, 80);
    assert_eq!(jobs[1].target().port, 443);
    assert_eq!(resolver.calls(), 0);
}

#[test]
fn explicit_tls_scheme_adds_handshake_stage() {
    let resolver = CountingResolver::new(vec![]);
    let config = monitor("default", &["tls://example.com:443", "example.com:443"]);

    let jobs = assert_ok!(build(config, &resolver));
    assert!(jobs[0].chain().stages().contains(&TLS_HANDSHAKE_RTT));
    assert!(!jobs[1].chain().stages().contains(&TLS_HANDSHAKE_RTT));

    let config = monitor("default", &["example.com:443"]).with_tls(TlsSettings::default());
    let jobs = assert_ok!(build(config, &resolver));
    assert!(jobs[0].chain().stages().contains(&TLS_HANDSHAKE_RTT));
}

#[test]
fn interface_binding_uses_every_interface_address() {
    let resolver = CountingResolver::new(vec![]);
    let jobs = assert_ok!(build(monitor("*eth0", &["192.0.2.1:22"]), &resolver));

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].interface(), "eth0");
    assert_eq!(jobs[0].chain().base().locals().len(), 2);
}

#[test]
fn configuration_errors_abort_construction() {
    let resolver = CountingResolver::new(vec![]);

    let err = assert_err!(build(monitor("*wlan9", &["192.0.2.1:22"]), &resolver));
    assert!(matches!(err, Error::InterfaceLookup { .. }));

    let err = assert_err!(build(monitor("10.0.0.1", &[]), &resolver));
    assert!(matches!(err, Error::HostsMissing(_)));

    let err = assert_err!(build(monitor("default", &["example.com"]), &resolver));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn ping_all_reports_every_resolved_address() {
    let server = spawn_reply_server("0.0.0.0:0", b"").await;
    let resolver = CountingResolver::new(vec!["127.0.0.1".parse().unwrap(), "127.0.0.2".parse().unwrap()]);
    let target = format!("localhost:{}", server.port());
    let config = monitor("default", &[target.as_str()]).with_mode(PingMode::All);

    let jobs = assert_ok!(build(config, &resolver));
    let outcomes = jobs[0].run().await;

    assert_eq!(resolver.calls(), 1);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].fields["ip"], json!("127.0.0.1"));
    assert_eq!(outcomes[1].fields["ip"], json!("127.0.0.2"));
    for outcome in &outcomes {
        assert!(outcome.is_up(), "{:?}", outcome.fields);
        assert_eq!(outcome.fields["host"], json!("localhost"));
        assert_eq!(outcome.fields["interface"], json!("default"));
    }
}

#[tokio::test]
async fn resolution_failure_fails_only_the_run() {
    let resolver = CountingResolver::new(vec![]);
    let jobs = assert_ok!(build(monitor("default", &["missing.example:80"]), &resolver));

    for _ in 0..3 {
        let outcomes = jobs[0].run().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].reason.as_ref().map(|r| r.kind()), Some("io"));
    }
    assert_eq!(resolver.calls(), 3);
}

#[tokio::test]
async fn bound_host_jobs_only_probe_matching_family() {
    let server = spawn_reply_server("127.0.0.1:0", b"").await;
    let resolver = CountingResolver::new(vec!["::1".parse().unwrap(), "127.0.0.1".parse().unwrap()]);
    let target = format!("localhost:{}", server.port());

    let config = monitor("127.0.0.1", &[target.as_str()]).with_mode(PingMode::All);
    let jobs = assert_ok!(build(config, &resolver));
    for _ in 0..10 {
        let outcomes = jobs[0].run().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_up(), "{:?}", outcomes[0].fields);
        assert_eq!(outcomes[0].fields["ip"], json!("127.0.0.1"));
    }

    let config = monitor("127.0.0.1", &[target.as_str()]).with_mode(PingMode::Any);
    let jobs = assert_ok!(build(config, &resolver));
    for _ in 0..20 {
        let outcomes = jobs[0].run().await;
        assert!(outcomes[0].is_up(), "{:?}", outcomes[0].fields);
    }
}

#[tokio::test]
async fn bound_host_job_without_matching_family_reports_one_failure() {
    let resolver = CountingResolver::new(vec!["::1".parse().unwrap()]);
    let jobs = assert_ok!(build(
        monitor("127.0.0.1", &["localhost:80"]).with_mode(PingMode::All),
        &resolver
    ));

    let outcomes = jobs[0].run().await;
    assert_eq!(outcomes.len(), 1);
    let reason = outcomes[0].reason.as_ref().unwrap();
    assert_eq!(reason.kind(), "io");
    assert!(reason.message().contains("family"), "{}", reason.message());
}
