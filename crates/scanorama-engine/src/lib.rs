//! Scan Engine Adapter: translates a validated [`ScanConfig`] into an
//! invocation of a concrete scan implementation and maps its output back
//! into a [`scanorama_core::ScanResult`].
//!
//! Raw packet-level scanning (SYN crafting, pcap capture, a service
//! fingerprint database) is out of scope here. This crate gives the
//! adapter contract a working, idiomatic default rather than leaving it
//! unimplemented: [`TcpConnectEngine`] probes with plain OS-level TCP
//! connects.

mod config;
mod tcp;

pub use config::{ProbeMethod, ProbeOptions, ScanConfig, TimingTemplate};
pub use tcp::{ScanEngine, TcpConnectEngine};
