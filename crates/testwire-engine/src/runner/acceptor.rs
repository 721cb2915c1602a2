//! Loopback listener that waits for the execution side to dial in.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::EngineError;

use super::RUNNER_TARGET;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Bound listener that accepts exactly one connection.
#[derive(Debug)]
pub(crate) struct Acceptor {
    listener: TcpListener,
    address: SocketAddr,
}

impl Acceptor {
    /// Binds `127.0.0.1:port`. Port 0 asks the OS for a free port.
    pub(crate) fn bind(port: u16) -> Result<Self, EngineError> {
        let requested = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(requested).map_err(|source| EngineError::Bind {
            address: requested,
            source,
        })?;
        let address = listener
            .local_addr()
            .map_err(|source| EngineError::Socket { source })?;
        Ok(Self { listener, address })
    }

    pub(crate) const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Polls for a connection on a background thread and hands the first one
    /// to `on_accept`. The thread exits after that connection or on shutdown.
    pub(crate) fn start<A>(self, on_accept: A) -> Result<AcceptorHandle, EngineError>
    where
        A: FnOnce(TcpStream) + Send + 'static,
    {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| EngineError::Socket { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(String::from("testwire-acceptor"))
            .spawn(move || run_accept_loop(&self, &shutdown_flag, on_accept))
            .map_err(|source| EngineError::Spawn {
                role: "acceptor",
                source,
            })?;
        Ok(AcceptorHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub(crate) struct AcceptorHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AcceptorHandle {
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Stops the accept loop and waits for it, unless called from the accept
    /// thread itself.
    pub(crate) fn join(mut self) -> Result<(), EngineError> {
        self.shutdown();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        handle
            .join()
            .map_err(|_| EngineError::ThreadPanicked { role: "acceptor" })
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop<A>(acceptor: &Acceptor, shutdown: &AtomicBool, on_accept: A)
where
    A: FnOnce(TcpStream),
{
    info!(
        target: RUNNER_TARGET,
        address = %acceptor.address,
        "waiting for execution engine"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match accept_connection(&acceptor.listener) {
            Ok(Some(stream)) => {
                on_accept(stream);
                return;
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(target: RUNNER_TARGET, %error, "accept failed");
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

fn accept_connection(listener: &TcpListener) -> io::Result<Option<TcpStream>> {
    match listener.accept() {
        Ok((stream, peer)) => {
            stream.set_nonblocking(false)?;
            info!(target: RUNNER_TARGET, %peer, "execution engine connected");
            Ok(Some(stream))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}
