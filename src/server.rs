//! The TCP server: accepts connections, runs one session per connection, and
//! drains gracefully on interrupt.
//!
//! Three kinds of thread cooperate. The accept thread turns each incoming
//! socket into a registered session. A coordinator thread owns the session
//! registry and drives shutdown: once the interrupt arrives it rejects
//! newcomers, sends a farewell frame on every live session, and waits until
//! each one has wound down. Session threads run the request loop; a panic in
//! one session is caught at its boundary, logged, and ends only that session.

use crate::command::Request;
use crate::error::{PokedexError, Result};
use crate::frame;
use crate::locks::LockManager;
use crate::logging::ServerLog;
use crate::store::RecordStore;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use crossbeam::select;
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// A TCP server over a [`RecordStore`], serialising record access through a
/// [`LockManager`].
///
/// # Example
/// Serve on an ephemeral port until `shutdown_tx` fires:
/// ```no_run
/// use crossbeam::channel::bounded;
/// use pokedex::{PokedexServer, RecordStore, ServerLog};
/// use std::net::TcpListener;
/// use std::path::Path;
/// # use pokedex::Result;
/// # fn main() -> Result<()> {
/// let store = RecordStore::open(Path::new("species.bin"), Path::new("trainers.bin"))?;
/// let log = ServerLog::open(Path::new("server.log"))?;
/// let listener = TcpListener::bind("127.0.0.1:0")?;
/// let (shutdown_tx, shutdown_rx) = bounded(1);
/// PokedexServer::new(store, log).serve(listener, shutdown_rx)?;
/// #
/// # Ok(())
/// # }
/// ```
pub struct PokedexServer {
    store: Arc<RecordStore>,
    locks: Arc<LockManager>,
    log: ServerLog,
}

struct SessionHandle {
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
}

/// tells the coordinator a session is over, on every exit path
struct DoneGuard {
    id: u64,
    done: Sender<u64>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.done.send(self.id);
    }
}

impl PokedexServer {
    /// Creates a server over the given store and log, with a fresh lock table.
    pub fn new(store: RecordStore, log: ServerLog) -> PokedexServer {
        PokedexServer {
            store: Arc::new(store),
            locks: Arc::new(LockManager::new()),
            log,
        }
    }

    /// Serves connections from `listener` until a message arrives on
    /// `shutdown` (or its send side goes away), then drains: new connections
    /// are rejected, every live session is sent a `BYE` frame, and the call
    /// returns once each session has closed.
    pub fn serve(self, listener: TcpListener, shutdown: Receiver<()>) -> Result<()> {
        // registration is a rendezvous so the coordinator always learns about
        // a session before that session can possibly report itself done
        let (register_tx, register_rx) = bounded::<SessionHandle>(0);
        let (done_tx, done_rx) = unbounded::<u64>();

        let store = self.store;
        let locks = self.locks;
        let log = self.log;
        thread::Builder::new()
            .name("accept".to_string())
            .spawn(move || accept_loop(listener, store, locks, log, register_tx, done_tx))?;

        coordinate(register_rx, done_rx, shutdown);
        Ok(())
    }
}

fn accept_loop(
    listener: TcpListener,
    store: Arc<RecordStore>,
    locks: Arc<LockManager>,
    log: ServerLog,
    register: Sender<SessionHandle>,
    done: Sender<u64>,
) {
    let mut next_session = 0u64;
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                error!(error = %e, "failed to resolve peer address");
                continue;
            }
        };
        let coordinator_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                error!(%peer, error = %e, "failed to clone session stream");
                continue;
            }
        };
        info!(%peer, "client connected");

        next_session += 1;
        let session = next_session;
        if register
            .send(SessionHandle {
                id: session,
                stream: coordinator_stream,
                peer,
            })
            .is_err()
        {
            // coordinator gone: the drain finished, stop accepting
            return;
        }

        let store = Arc::clone(&store);
        let locks = Arc::clone(&locks);
        let log = log.clone();
        let done_on_spawn_failure = done.clone();
        let done = done.clone();
        let spawned = thread::Builder::new()
            .name(format!("session-{}", session))
            .spawn(move || {
                let _done = DoneGuard { id: session, done };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    serve_session(stream, peer, &store, &locks, &log)
                }));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(%peer, error = %e, "session failed"),
                    Err(_) => error!(%peer, "recovered from panic in session"),
                }
            });
        if let Err(e) = spawned {
            error!(%peer, error = %e, "failed to spawn session");
            let _ = done_on_spawn_failure.send(session);
        }
    }
}

/// Owns the session registry. Serves registrations until shutdown is
/// requested, then drains: every live session is sent a farewell and the
/// function returns once the last one has ended.
fn coordinate(register: Receiver<SessionHandle>, done: Receiver<u64>, shutdown: Receiver<()>) {
    let mut sessions: HashMap<u64, SessionHandle> = HashMap::new();

    loop {
        select! {
            recv(register) -> msg => {
                if let Ok(handle) = msg {
                    sessions.insert(handle.id, handle);
                }
            },
            recv(done) -> msg => {
                if let Ok(id) = msg {
                    sessions.remove(&id);
                }
            },
            recv(shutdown) -> _ => break,
        }
    }

    info!("interrupt received, shutting down server");
    for handle in sessions.values_mut() {
        if frame::write_frame(&mut handle.stream, b"BYE").is_err() {
            // undeliverable farewell: force the session off its blocked read
            let _ = handle.stream.shutdown(Shutdown::Both);
        }
    }
    while !sessions.is_empty() {
        select! {
            recv(register) -> msg => {
                if let Ok(handle) = msg {
                    info!(peer = %handle.peer, "rejecting connection during drain");
                    let _ = handle.stream.shutdown(Shutdown::Both);
                }
            },
            recv(done) -> msg => {
                if let Ok(id) = msg {
                    sessions.remove(&id);
                }
            },
        }
    }
    info!("all clients disconnected");
}

/// One connection's request loop: greet with the peer's port, then read one
/// frame, reply fully, and read the next, until `EXIT` or disconnect.
fn serve_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: &RecordStore,
    locks: &LockManager,
    log: &ServerLog,
) -> Result<()> {
    // the client displays this as its session identity
    frame::write_frame(&mut stream, peer.port().to_string().as_bytes())?;

    loop {
        let payload = match frame::read_frame(&mut stream) {
            Ok(payload) => payload,
            Err(PokedexError::Disconnected) => {
                info!(%peer, "client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let text = String::from_utf8_lossy(&payload);
        info!(%peer, request = %text);

        match Request::parse(&text) {
            None => {
                warn!(%peer, "request didn't match valid options");
                frame::write_frame(&mut stream, b"CLIENT_REQ_INVALID")?;
            }
            Some(Request::Exit) => {
                info!(%peer, "client disconnected");
                return Ok(());
            }
            Some(request) => dispatch(request, &mut stream, peer, store, locks, log)?,
        }
    }
}

fn dispatch(
    request: Request,
    stream: &mut TcpStream,
    peer: SocketAddr,
    store: &RecordStore,
    locks: &LockManager,
    log: &ServerLog,
) -> Result<()> {
    match request {
        Request::GetSpecies { id } => {
            let reply = match store.species(id) {
                Ok(record) => match serde_json::to_vec(&record) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(%peer, error = %e, "species reply encoding failed");
                        b"SERVER_ERROR".to_vec()
                    }
                },
                Err(PokedexError::SpeciesNotFound) => {
                    info!(%peer, "requested species id out of bounds");
                    b"OUT_OF_BOUNDS".to_vec()
                }
                Err(e) => {
                    error!(%peer, error = %e, "species read failed");
                    b"SERVER_ERROR".to_vec()
                }
            };
            frame::write_frame(stream, &reply)
        }

        Request::GetTrainer { id } => {
            let result = {
                let _guard = locks.read(id);
                store.trainer(id)
            };
            let reply = match result {
                Ok(record) => match serde_json::to_vec(&record) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(%peer, error = %e, "trainer reply encoding failed");
                        b"SERVER_ERROR".to_vec()
                    }
                },
                Err(PokedexError::TrainerNotFound) => {
                    info!(%peer, "requested trainer id out of bounds");
                    b"OUT_OF_BOUNDS".to_vec()
                }
                Err(e) => {
                    error!(%peer, error = %e, "trainer read failed");
                    b"SERVER_ERROR".to_vec()
                }
            };
            frame::write_frame(stream, &reply)
        }

        Request::GetTrainerAll => stream_all_trainers(stream, peer, store, locks),

        Request::PostTrainer { name, species } => {
            let result = {
                let _gate = locks.append();
                store.create_trainer(&name, &species)
            };
            let reply = match result {
                Ok(id) => {
                    info!(%peer, trainer = id, "post successful, trainer file modified");
                    id.to_string().into_bytes()
                }
                Err(PokedexError::NameTooLong) => {
                    info!(%peer, "refuse to post: name too long");
                    b"LONG_NAME".to_vec()
                }
                Err(
                    e @ (PokedexError::SpeciesNotFound
                    | PokedexError::IdSpaceExhausted
                    | PokedexError::FileCorrupt),
                ) => {
                    info!(%peer, error = %e, "refuse to post");
                    b"BAD_POST".to_vec()
                }
                Err(e) => {
                    error!(%peer, error = %e, "post failed");
                    b"SERVER_ERROR".to_vec()
                }
            };
            frame::write_frame(stream, &reply)
        }

        Request::PutTrainer { id, species } => {
            let result = {
                let _guard = locks.write(id);
                store.update_trainer(id, &species)
            };
            let reply = match result {
                Ok(()) => {
                    info!(%peer, trainer = id, "put successful, trainer file modified");
                    b"GOOD_PUT".to_vec()
                }
                Err(
                    e @ (PokedexError::TrainerNotFound
                    | PokedexError::SpeciesNotFound
                    | PokedexError::FileCorrupt),
                ) => {
                    info!(%peer, error = %e, "refuse to put");
                    format!("BAD_PUT.{}", e).into_bytes()
                }
                Err(e) => {
                    error!(%peer, error = %e, "put failed");
                    b"SERVER_ERROR".to_vec()
                }
            };
            frame::write_frame(stream, &reply)
        }

        Request::DeleteTrainer { id } => {
            let result = {
                let _guard = locks.write(id);
                store.delete_trainer(id)
            };
            let reply = match result {
                Ok(()) => {
                    info!(%peer, trainer = id, "logically deleted record, trainer file modified");
                    b"DELETED".to_vec()
                }
                Err(e) => {
                    info!(%peer, error = %e, "refuse to delete");
                    b"OUT_OF_BOUNDS".to_vec()
                }
            };
            frame::write_frame(stream, &reply)
        }

        Request::GetLog { lines } => {
            let reply = match log.tail(lines) {
                Ok(text) => text.into_bytes(),
                Err(e) => {
                    error!(%peer, error = %e, "log read failed");
                    b"SERVER_ERROR".to_vec()
                }
            };
            frame::write_frame(stream, &reply)
        }

        // handled by the session loop before dispatch
        Request::Exit => Ok(()),
    }
}

/// Streams every live trainer under the exclusive scan gate: `SENDING`, one
/// JSON frame per record, then `DONE` — or a lone status when there is
/// nothing to stream.
fn stream_all_trainers(
    stream: &mut TcpStream,
    peer: SocketAddr,
    store: &RecordStore,
    locks: &LockManager,
) -> Result<()> {
    let gate = locks.scan();
    let slots = match store.trainer_count() {
        Ok(slots) => slots,
        Err(PokedexError::FileCorrupt) => {
            drop(gate);
            error!(%peer, "trainer file size is not a multiple of record size");
            return frame::write_frame(stream, b"FILE_ERROR");
        }
        Err(e) => {
            drop(gate);
            error!(%peer, error = %e, "trainer file inspection failed");
            return frame::write_frame(stream, b"SERVER_ERROR");
        }
    };
    if slots == 0 {
        drop(gate);
        info!(%peer, "requested from empty file");
        return frame::write_frame(stream, b"OUT_OF_BOUNDS");
    }

    frame::write_frame(stream, b"SENDING")?;
    let mut sent = 0usize;
    let outcome = store.scan_trainers(|record| {
        let json = serde_json::to_vec(&record)?;
        frame::write_frame(stream, &json)?;
        sent += 1;
        Ok(())
    });
    drop(gate);

    match outcome {
        Ok(_) if sent == 0 => {
            info!(%peer, "no live records in trainer file");
            frame::write_frame(stream, b"OUT_OF_BOUNDS")
        }
        Ok(_) => {
            info!(%peer, "all trainer records sent");
            frame::write_frame(stream, b"DONE")
        }
        Err(e) => {
            error!(%peer, error = %e, "scan aborted");
            // the stream may already be gone; if so the session ends on its next read
            let _ = frame::write_frame(stream, b"SERVER_ERROR");
            Ok(())
        }
    }
}
