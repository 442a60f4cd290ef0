//! Helper for blocking communication over the bluewm socket.

use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::{Reply, Request};

/// Name of the environment variable containing the bluewm IPC socket path.
pub const SOCKET_PATH_ENV: &str = "BLUEWM_SOCKET";

/// Helper for blocking communication over the bluewm socket.
pub struct Socket {
    stream: BufReader<UnixStream>,
}

impl Socket {
    /// Connects to the default bluewm IPC socket.
    ///
    /// The socket path is read from the `$BLUEWM_SOCKET` environment variable.
    pub fn connect() -> io::Result<Self> {
        let socket_path = env::var_os(SOCKET_PATH_ENV).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{SOCKET_PATH_ENV} is not set, are you running this within bluewm?"),
            )
        })?;
        Self::connect_to(socket_path)
    }

    /// Connects to the bluewm IPC socket at the given path.
    pub fn connect_to(path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(path.as_ref())?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Sends a request to bluewm and returns the reply.
    ///
    /// Only one request can be sent per connection; the write half is shut down afterwards.
    pub fn send(mut self, request: Request) -> io::Result<Reply> {
        let mut buf = serde_json::to_string(&request)?;
        buf.push('\n');

        let stream = self.stream.get_mut();
        stream.write_all(buf.as_bytes())?;
        stream.shutdown(Shutdown::Write)?;

        buf.clear();
        self.stream.read_line(&mut buf)?;

        let reply = serde_json::from_str(&buf)?;
        Ok(reply)
    }
}
