// # netprobe-core
//
// Core library for measuring TCP reachability and latency.
//
// ## Architecture Overview
//
// This library decides what exactly to dial and how:
// - **bind**: parses bind specs into local source addresses
// - **dns**: dual-stack hostname lookup over ordered custom resolvers
// - **dialchain**: base connector plus SOCKS5/TLS layers, each stage timed
// - **job**: turns a monitor configuration into runnable probe jobs
//
// Scheduling the jobs and publishing their results is left to the caller
// (see the `netprobed` daemon).
//
// ## Design Principles
//
// 1. **Build once, run often**: configuration errors surface when the job set
//    is built; run-time failures only ever end up in a result record
// 2. **Templates, not rebuilds**: dialer chains are shared and cloned per
//    destination
// 3. **Injected collaborators**: interfaces, resolvers and randomness are
//    passed in, so every part can be tested without the host network

pub mod bind;
pub mod config;
pub mod dialchain;
pub mod dns;
pub mod error;
pub mod event;
pub mod job;

// Re-export core types for convenience
pub use bind::{InterfaceTable, LocalBindAddress, SourceAddress, SystemInterfaces, parse_bind_specs};
pub use config::{CheckConfig, DnsMode, DnsSettings, MonitorConfig, PingMode, ProxyConfig, TlsSettings};
pub use dialchain::{BoxedConn, DialerChain, Endpoint, Layer, NetDialer};
pub use dns::{DnsResolver, Resolve, SystemResolver};
pub use error::{Error, Result};
pub use event::{Event, ProbeOutcome, Reason};
pub use job::{FactoryDeps, ProbeJob, ProbeJobFactory, TargetAddress};
