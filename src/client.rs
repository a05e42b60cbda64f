//! A thin client over the framed wire protocol, used by the REPL binary and
//! the integration tests.

use crate::error::Result;
use crate::frame;
use std::net::{TcpStream, ToSocketAddrs};

/// `PokedexClient` speaks the framed request/reply protocol with a server.
pub struct PokedexClient {
    stream: TcpStream,
    session_port: String,
}

impl PokedexClient {
    /// Connects to the server at `addr` and consumes the greeting frame
    /// carrying this connection's remote port number.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<PokedexClient> {
        let mut stream = TcpStream::connect(addr)?;
        let greeting = frame::read_frame(&mut stream)?;
        Ok(PokedexClient {
            stream,
            session_port: String::from_utf8_lossy(&greeting).into_owned(),
        })
    }

    /// The decimal port the server greeted this session with, for display.
    pub fn session_port(&self) -> &str {
        &self.session_port
    }

    /// Sends one request and returns the single reply frame as text.
    pub fn request(&mut self, request: &str) -> Result<String> {
        frame::write_frame(&mut self.stream, request.as_bytes())?;
        self.read_reply()
    }

    /// Reads one reply frame as text.
    pub fn read_reply(&mut self) -> Result<String> {
        let payload = frame::read_frame(&mut self.stream)?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Issues `REQ_TRAINER_ALL`. When the server answers `SENDING`, `visit`
    /// receives each record frame and the terminating status is returned;
    /// otherwise the lone status frame comes back untouched.
    pub fn stream_all(&mut self, mut visit: impl FnMut(String)) -> Result<String> {
        let first = self.request("REQ_TRAINER_ALL")?;
        if first != "SENDING" {
            return Ok(first);
        }
        loop {
            let reply = self.read_reply()?;
            match reply.as_str() {
                "DONE" | "OUT_OF_BOUNDS" | "SERVER_ERROR" => return Ok(reply),
                _ => visit(reply),
            }
        }
    }

    /// Tells the server the session is over and drops the connection.
    pub fn exit(mut self) -> Result<()> {
        frame::write_frame(&mut self.stream, b"EXIT")
    }

    /// Hands over the underlying stream to callers that drive the protocol
    /// themselves, such as the REPL with its farewell watcher thread.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}
