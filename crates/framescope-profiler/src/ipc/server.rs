//! TCP server streaming frame reports to viewers.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Sender, TrySendError};
use parking_lot::Mutex;

use super::protocol::{decode, encode, split_frame, ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::report::FrameReport;

/// One connected viewer and its partially received bytes.
struct Client {
    stream: TcpStream,
    addr: SocketAddr,
    inbox: Vec<u8>,
}

impl Client {
    /// Pull whatever is readable and forward complete commands.
    ///
    /// Returns `false` once the client should be dropped.
    fn poll(&mut self, commands: &Sender<ClientMessage>) -> bool {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return false,
                Ok(n) => self.inbox.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return false,
            }
        }

        loop {
            let (payload, consumed) = match split_frame(&self.inbox) {
                Ok(Some(frame)) => frame,
                Ok(None) => return true,
                Err(e) => {
                    tracing::warn!("Dropping profiler client {}: {}", self.addr, e);
                    return false;
                }
            };
            let msg = decode::<ClientMessage>(&self.inbox[payload]);
            self.inbox.drain(..consumed);

            match msg {
                Ok(ClientMessage::Hello) => {
                    // Already sent hello on connect
                }
                Ok(ClientMessage::Goodbye) => return false,
                Ok(command) => match commands.try_send(command) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(command)) => {
                        tracing::warn!(
                            "Command queue full, dropping {:?} from {}",
                            command,
                            self.addr
                        );
                    }
                },
                Err(e) => tracing::debug!("Undecodable message from {}: {}", self.addr, e),
            }
        }
    }
}

/// Report server that broadcasts collated frames to connected viewers.
pub struct IpcServer {
    /// Flag to signal shutdown.
    running: Arc<AtomicBool>,
    /// Server thread handle.
    thread: Option<JoinHandle<()>>,
    /// Connected clients.
    clients: Arc<Mutex<Vec<Client>>>,
    local_addr: SocketAddr,
}

impl IpcServer {
    /// Start the server on `port` of the loopback interface. Port 0 picks a
    /// free port; see [`local_addr`](Self::local_addr).
    ///
    /// Client commands other than the handshake are sent to `commands`. When
    /// that channel is full, further commands are dropped with a warning.
    pub fn start(port: u16, commands: Sender<ClientMessage>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let clients: Arc<Mutex<Vec<Client>>> = Arc::new(Mutex::new(Vec::new()));

        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running_clone = Arc::clone(&running);
        let clients_clone = Arc::clone(&clients);

        let thread = thread::Builder::new()
            .name("framescope-ipc".into())
            .spawn(move || {
                Self::server_loop(&listener, &running_clone, &clients_clone, &commands);
            })?;

        tracing::info!("Profiler report server started on {}", local_addr);

        Ok(Self {
            running,
            thread: Some(thread),
            clients,
            local_addr,
        })
    }

    /// Server accept loop.
    fn server_loop(
        listener: &TcpListener,
        running: &AtomicBool,
        clients: &Mutex<Vec<Client>>,
        commands: &Sender<ClientMessage>,
    ) {
        while running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    tracing::info!("Profiler client connected: {}", addr);

                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!("Failed to set non-blocking: {}", e);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    if let Ok(data) = encode(&ServerMessage::Hello {
                        version: PROTOCOL_VERSION,
                    }) {
                        let _ = stream.write_all(&data);
                    }

                    clients.lock().push(Client {
                        stream,
                        addr,
                        inbox: Vec::new(),
                    });
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }

            clients.lock().retain_mut(|client| {
                let keep = client.poll(commands);
                if !keep {
                    tracing::info!("Profiler client disconnected: {}", client.addr);
                }
                keep
            });
        }
    }

    /// Send a report to every client. Returns how many received it.
    pub fn broadcast(&self, report: &FrameReport) -> usize {
        let data = match encode(&ServerMessage::Report(report.clone())) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Failed to encode frame report: {}", e);
                return 0;
            }
        };

        let mut guard = self.clients.lock();
        guard.retain_mut(|client| client.stream.write_all(&data).is_ok());
        guard.len()
    }

    /// Address the server listens on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);

        if let Ok(data) = encode(&ServerMessage::Goodbye) {
            for client in self.clients.lock().iter_mut() {
                let _ = client.stream.write_all(&data);
            }
        }

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }

        tracing::info!("Profiler report server stopped");
    }

    /// Get the number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::ipc::protocol::read_message;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn handshake_commands_and_reports() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let server = IpcServer::start(0, tx).unwrap();

        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        let hello: ServerMessage = read_message(&mut client).unwrap();
        assert!(matches!(hello, ServerMessage::Hello { version: PROTOCOL_VERSION }));
        assert!(wait_until(|| server.client_count() == 1));

        client
            .write_all(&encode(&ClientMessage::SelectFrame(5)).unwrap())
            .unwrap();
        let command = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(command, ClientMessage::SelectFrame(5));

        let report = FrameReport {
            frame: 9,
            ..FrameReport::default()
        };
        assert_eq!(server.broadcast(&report), 1);
        match read_message::<ServerMessage>(&mut client).unwrap() {
            ServerMessage::Report(received) => assert_eq!(received.frame, 9),
            other => panic!("unexpected {other:?}"),
        }

        client
            .write_all(&encode(&ClientMessage::Goodbye).unwrap())
            .unwrap();
        assert!(wait_until(|| server.client_count() == 0));
        server.stop();
    }

    #[test]
    fn full_command_queue_drops_commands_without_stalling() {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let server = IpcServer::start(0, tx).unwrap();

        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        let _hello: ServerMessage = read_message(&mut client).unwrap();
        assert!(wait_until(|| server.client_count() == 1));

        let mut burst = Vec::new();
        for frame in 0..3 {
            burst.extend(encode(&ClientMessage::SelectFrame(frame)).unwrap());
        }
        burst.extend(encode(&ClientMessage::Goodbye).unwrap());
        client.write_all(&burst).unwrap();

        // The goodbye behind the dropped commands is still handled.
        assert!(wait_until(|| server.client_count() == 0));
        let queued: Vec<_> = rx.try_iter().collect();
        assert_eq!(queued, [ClientMessage::SelectFrame(0)]);
        server.stop();
    }
}
