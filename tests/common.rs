//! Common utilities for hddfs integration tests.

#![allow(dead_code)]

use hddfs::loopback::{self, LoopbackConnector, MemoryStore, SharedStore};
use hddfs::{ClientConfig, HddFs, TcpConnector};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Serves a fresh in-memory store on an ephemeral localhost port, one
/// connection at a time. Returns the store and the port.
pub fn spawn_tcp_store() -> (SharedStore, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let port = listener.local_addr().expect("local addr").port();
    let store = MemoryStore::shared();

    let served = store.clone();
    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(mut stream) = conn else { break };
            let _ = stream.set_nodelay(true);
            let _ = loopback::serve(&served, &mut stream);
        }
    });

    (store, port)
}

pub fn tcp_config(port: u16) -> ClientConfig {
    ClientConfig::new()
        .with_port(port)
        .with_connect_timeout(Duration::from_secs(5))
        .with_io_timeout(Duration::from_secs(5))
}

pub fn tcp_fs(port: u16) -> HddFs<TcpConnector> {
    HddFs::with_config(tcp_config(port))
}

/// Formatted and mounted filesystem over the in-process store.
pub fn loopback_fs(chunk: Option<usize>) -> (HddFs<LoopbackConnector>, SharedStore) {
    let store = MemoryStore::shared();
    let mut connector = LoopbackConnector::new(store.clone());
    if let Some(chunk) = chunk {
        connector = connector.with_max_chunk(chunk);
    }
    let mut fs = HddFs::new(connector);
    fs.format().expect("format");
    fs.mount().expect("mount");
    (fs, store)
}
