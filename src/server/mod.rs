//! TCP Server
//!
//! Wires the listener, the reactor and the command processor together.
//!
//! ```text
//!  Reactor<CommandHandler>
//!  ┌──────────────────────────────────────────────┐
//!  │ Token(0)  Acceptor          (TcpListener)    │
//!  │ Token(1)  ConnectionHandler (client A)       │
//!  │ Token(2)  ConnectionHandler (client B)       │
//!  │ ...                                          │
//!  │ WAKE      ShutdownHandle                     │
//!  └──────────────────────────────────────────────┘
//!           │ &mut CommandHandler on every callback
//!           ▼
//!     CommandHandler ──> StorageEngine
//! ```
//!
//! The server is built and run on the same thread. Only the
//! [`ShutdownHandle`] may be sent elsewhere.

pub mod acceptor;

pub use acceptor::Acceptor;

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::reactor::{Reactor, ShutdownHandle};
use crate::protocol::SnapshotError;
use crate::storage::StorageEngine;
use mio::net::TcpListener;
use mio::Interest;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::info;

/// Builds the store the server starts with.
///
/// Reads `config.dump_path` when `config.load_snapshot` is set. A missing
/// file gives an empty store; an unreadable or corrupt one is an error.
pub fn open_storage(config: &Config) -> Result<StorageEngine> {
    if !config.load_snapshot {
        return Ok(StorageEngine::new());
    }

    match StorageEngine::load(&config.dump_path) {
        Ok(storage) => {
            info!(path = %config.dump_path.display(), keys = storage.len(), "Snapshot loaded");
            Ok(storage)
        }
        Err(SnapshotError::NotFound) => {
            info!(path = %config.dump_path.display(), "No snapshot found, starting empty");
            Ok(StorageEngine::new())
        }
        Err(e) => Err(ServerError::Snapshot(e)),
    }
}

/// A bound, not yet running server.
pub struct Server {
    reactor: Reactor<CommandHandler>,
    processor: CommandHandler,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the listener and prepares the reactor around `storage`.
    pub fn bind(config: &Config, storage: StorageEngine) -> Result<Self> {
        let address = config.bind_address();
        let addr = address
            .to_socket_addrs()
            .map_err(|e| ServerError::InvalidAddress(format!("{}: {}", address, e)))?
            .next()
            .ok_or_else(|| ServerError::InvalidAddress(address.clone()))?;

        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let mut reactor = Reactor::new(config.event_capacity)?;
        let token = reactor.next_token();
        reactor
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        reactor.insert(
            token,
            Box::new(Acceptor::new(listener, config.parser_buffer_limit)),
        );

        info!(addr = %local_addr, keys = storage.len(), "Listening");

        Ok(Self {
            reactor,
            processor: CommandHandler::new(storage, config.dump_path.clone()),
            local_addr,
        })
    }

    /// The address actually bound, useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Serves clients until the shutdown handle fires.
    pub fn run(&mut self) -> Result<()> {
        self.reactor.run(&mut self.processor)?;
        info!(
            commands = self.processor.commands_processed(),
            "Server stopped"
        );
        Ok(())
    }

    /// Consumes the server, closing every socket, and returns the store.
    pub fn into_storage(self) -> StorageEngine {
        self.processor.into_storage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespValue;
    use bytes::Bytes;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    struct TestServer {
        addr: SocketAddr,
        handle: ShutdownHandle,
        thread: JoinHandle<StorageEngine>,
    }

    impl TestServer {
        fn stop(self) -> StorageEngine {
            self.handle.shutdown().unwrap();
            self.thread.join().unwrap()
        }
    }

    fn start_server(config: Config, storage: StorageEngine) -> TestServer {
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let mut server = Server::bind(&config, storage).unwrap();
            tx.send((server.local_addr(), server.shutdown_handle())).unwrap();
            server.run().unwrap();
            server.into_storage()
        });

        let (addr, handle) = rx.recv().unwrap();
        TestServer {
            addr,
            handle,
            thread,
        }
    }

    fn test_config() -> Config {
        Config {
            port: 0,
            dump_path: std::env::temp_dir().join("tidekv-server-test-unused.tkv"),
            ..Config::default()
        }
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
    }

    fn command(parts: &[&str]) -> Vec<u8> {
        RespValue::array(
            parts
                .iter()
                .map(|p| RespValue::bulk_string(Bytes::copy_from_slice(p.as_bytes())))
                .collect(),
        )
        .serialize()
    }

    fn expect_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    #[test]
    fn test_ping_pong() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
        expect_reply(&mut client, b"+PONG\r\n");

        server.stop();
    }

    #[test]
    fn test_set_get() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .unwrap();
        expect_reply(&mut client, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .unwrap();
        expect_reply(&mut client, b"$4\r\nAriz\r\n");

        let mut storage = server.stop();
        assert_eq!(
            storage.get("name"),
            Some(&RespValue::bulk_string(Bytes::from("Ariz")))
        );
    }

    #[test]
    fn test_multiple_commands() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        // Send multiple commands in one write (pipelining)
        let mut wire = command(&["SET", "k1", "v1"]);
        wire.extend(command(&["SET", "k2", "v2"]));
        wire.extend(command(&["GET", "k1"]));
        wire.extend(command(&["GET", "k2"]));
        client.write_all(&wire).unwrap();

        expect_reply(&mut client, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n");
        server.stop();
    }

    #[test]
    fn test_command_split_across_writes() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);
        client.set_nodelay(true).unwrap();

        for chunk in command(&["ECHO", "slow"]).chunks(3) {
            client.write_all(chunk).unwrap();
            thread::sleep(Duration::from_millis(2));
        }
        expect_reply(&mut client, b"$4\r\nslow\r\n");
        server.stop();
    }

    #[test]
    fn test_lpush_lrange_order() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        client.write_all(&command(&["LPUSH", "k", "a", "b"])).unwrap();
        expect_reply(&mut client, b":2\r\n");
        client.write_all(&command(&["LPUSH", "k", "c"])).unwrap();
        expect_reply(&mut client, b":3\r\n");
        client.write_all(&command(&["LRANGE", "k", "0", "-1"])).unwrap();
        expect_reply(&mut client, b"*3\r\n$1\r\nc\r\n$1\r\nb\r\n$1\r\na\r\n");

        server.stop();
    }

    #[test]
    fn test_large_reply_is_delivered_whole() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        let big = "v".repeat(4 * 1024 * 1024);
        client.write_all(&command(&["SET", "big", &big])).unwrap();
        expect_reply(&mut client, b"+OK\r\n");

        // Ask for it several times without reading so the server has to
        // wait for the socket to drain.
        let mut wire = Vec::new();
        for _ in 0..3 {
            wire.extend(command(&["GET", "big"]));
        }
        client.write_all(&wire).unwrap();

        let single = RespValue::bulk_string(Bytes::from(big)).serialize();
        for _ in 0..3 {
            let mut buf = vec![0u8; single.len()];
            client.read_exact(&mut buf).unwrap();
            assert!(buf == single);
        }
        server.stop();
    }

    #[test]
    fn test_protocol_level_error_keeps_connection() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        client.write_all(b"+PING\r\n").unwrap();
        expect_reply(
            &mut client,
            b"-ERR Protocol error: expected array of bulk strings\r\n",
        );
        client.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
        expect_reply(&mut client, b"+PONG\r\n");

        server.stop();
    }

    #[test]
    fn test_malformed_input_closes_connection() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        client.write_all(b"!not resp\r\n").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        // Other clients are unaffected
        let mut other = connect(server.addr);
        other.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
        expect_reply(&mut other, b"+PONG\r\n");

        server.stop();
    }

    #[test]
    fn test_replies_before_malformed_input_are_delivered() {
        let server = start_server(test_config(), StorageEngine::new());
        let mut client = connect(server.addr);

        client
            .write_all(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n!garbage\r\n")
            .unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"+PONG\r\n$2\r\nhi\r\n");

        server.stop();
    }

    #[test]
    fn test_many_clients() {
        let server = start_server(test_config(), StorageEngine::new());

        let mut clients: Vec<TcpStream> = (0..20).map(|_| connect(server.addr)).collect();
        for (i, client) in clients.iter_mut().enumerate() {
            let key = format!("key{}", i);
            client.write_all(&command(&["INCR", &key])).unwrap();
        }
        for client in clients.iter_mut() {
            expect_reply(client, b":1\r\n");
        }
        drop(clients);

        let storage = server.stop();
        assert_eq!(storage.len(), 20);
    }

    #[test]
    fn test_open_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            dump_path: dir.path().join("dump.tkv"),
            ..Config::default()
        };

        // Missing file
        assert!(open_storage(&config).unwrap().is_empty());

        let mut storage = StorageEngine::new();
        storage.set("k".into(), RespValue::bulk_string(Bytes::from("v")), None);
        storage.save(&config.dump_path).unwrap();
        assert_eq!(open_storage(&config).unwrap().len(), 1);

        config.load_snapshot = false;
        assert!(open_storage(&config).unwrap().is_empty());

        config.load_snapshot = true;
        std::fs::write(&config.dump_path, b"\x01\x00").unwrap();
        assert!(matches!(
            open_storage(&config),
            Err(ServerError::Snapshot(SnapshotError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_preloaded_storage_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            port: 0,
            dump_path: dir.path().join("dump.tkv"),
            ..Config::default()
        };

        let mut storage = StorageEngine::new();
        storage.set("seed".into(), RespValue::bulk_string(Bytes::from("1")), None);

        let server = start_server(config.clone(), storage);
        let mut client = connect(server.addr);
        client.write_all(&command(&["INCR", "seed"])).unwrap();
        expect_reply(&mut client, b":2\r\n");
        client.write_all(&command(&["SAVE"])).unwrap();
        expect_reply(&mut client, b"+OK\r\n");
        server.stop();

        let mut loaded = StorageEngine::load(&config.dump_path).unwrap();
        assert_eq!(
            loaded.get("seed"),
            Some(&RespValue::bulk_string(Bytes::from("2")))
        );
    }
}
