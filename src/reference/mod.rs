//! In-process SMTP server used to exercise the relay end to end.
//!
//! [`ReferenceServer`] listens on an ephemeral loopback port, answers every
//! connection on its own thread and records one [`Transcript`] per
//! connection. Its behaviour (STARTTLS, implicit TLS, AUTH mechanisms,
//! injected failures, canned replies, a response delay) is fixed by the
//! [`ServerOptions`] it was started with.

mod connection;
mod error;
mod types;

pub use error::ServerError;
pub use types::{ServerOptions, Transcript};

use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use native_tls::{Identity, TlsAcceptor};
use tracing::{debug, warn};

struct Shared {
    options: ServerOptions,
    acceptor: TlsAcceptor,
    transcripts: Mutex<Vec<Transcript>>,
    recorded: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Vec<Transcript>> {
        self.transcripts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, transcript: Transcript) {
        self.lock().push(transcript);
        self.recorded.notify_all();
    }
}

pub struct ReferenceServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    stopping: Arc<AtomicBool>,
    accept_loop: Option<JoinHandle<()>>,
}

impl ReferenceServer {
    /// Bind `127.0.0.1:0` and start accepting. `identity` backs both
    /// STARTTLS and implicit TLS.
    pub fn start(options: ServerOptions, identity: Identity) -> Result<Self, ServerError> {
        let acceptor = TlsAcceptor::new(identity)?;
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            options,
            acceptor,
            transcripts: Mutex::new(Vec::new()),
            recorded: Condvar::new(),
        });
        let stopping = Arc::new(AtomicBool::new(false));

        let accept_loop = {
            let shared = Arc::clone(&shared);
            let stopping = Arc::clone(&stopping);
            thread::Builder::new()
                .name("reference-smtp".to_string())
                .spawn(move || accept(listener, shared, stopping))?
        };
        debug!(%addr, "reference server listening");

        Ok(Self {
            addr,
            shared,
            stopping,
            accept_loop: Some(accept_loop),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    /// Transcripts of finished connections, oldest first.
    pub fn transcripts(&self) -> Vec<Transcript> {
        self.shared.lock().clone()
    }

    pub fn last_transcript(&self) -> Option<Transcript> {
        self.shared.lock().last().cloned()
    }

    pub fn reset(&self) {
        self.shared.lock().clear();
    }

    /// Block until at least `count` transcripts exist or `timeout` passes.
    /// Returns whatever has been recorded by then.
    pub fn wait_for_transcripts(&self, count: usize, timeout: Duration) -> Vec<Transcript> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.lock();
        while guard.len() < count {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            guard = self
                .shared
                .recorded
                .wait_timeout(guard, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        guard.clone()
    }

    /// Stop accepting connections. Connections already being served run to
    /// completion on their own threads.
    pub fn stop(&mut self) {
        let Some(handle) = self.accept_loop.take() else {
            return;
        };
        self.stopping.store(true, Ordering::SeqCst);
        // wake the blocking accept
        if let Ok(stream) = TcpStream::connect(self.addr) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if handle.join().is_err() {
            warn!("reference server accept loop panicked");
        }
    }
}

impl Drop for ReferenceServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept(listener: TcpListener, shared: Arc<Shared>, stopping: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        let shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("reference-smtp-conn".to_string())
            .spawn(move || connection::serve(&shared, stream));
        if let Err(err) = spawned {
            warn!("could not spawn connection thread: {err}");
        }
    }
}

/// Self-signed identity for `localhost` and `127.0.0.1`.
#[cfg(test)]
pub(crate) fn test_identity() -> Identity {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .expect("generate certificate");
    Identity::from_pkcs8(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes())
        .expect("load identity")
}
