//! Types for communicating with bluewm via its control socket.
//!
//! The socket path is exported in the `$BLUEWM_SOCKET` environment variable. Each request is
//! written as a single line of JSON, and bluewm answers with a single line of JSON containing a
//! [`Reply`].
//!
//! ```no_run
//! use bluewm_ipc::socket::Socket;
//! use bluewm_ipc::{Request, Response};
//!
//! let socket = Socket::connect()?;
//! let reply = socket.send(Request::MonitorCount)?;
//! if let Ok(Response::MonitorCount(count)) = reply {
//!     println!("{count} monitors connected");
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

pub mod socket;

/// Request from the client to the compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Request the version string of the running compositor.
    Version,
    /// Move and resize the first window whose identifier contains `identifier`.
    MoveResize {
        /// Substring of the window's application id or title.
        identifier: String,
        /// New x position in the global layout.
        x: i32,
        /// New y position in the global layout.
        y: i32,
        /// Requested width.
        width: i32,
        /// Requested height.
        height: i32,
    },
    /// Set the brightness of every output with gamma support.
    SetBrightness {
        /// Brightness in `[0.1, 1.0]`; out of range values are clamped.
        value: f64,
    },
    /// Request the number of connected outputs.
    MonitorCount,
    /// Check whether any window's identifier contains `identifier`.
    IsRunning {
        /// Substring of the window's application id or title.
        identifier: String,
    },
    /// Request information about connected outputs.
    Outputs,
    /// Request information about open windows.
    Surfaces,
}

/// Reply from the compositor to the client.
///
/// Every request gets one reply. On failure the reply carries a human-readable error message.
pub type Reply = Result<Response, String>;

/// Successful response from the compositor to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Version string.
    Version(String),
    /// Result of [`Request::MoveResize`].
    MoveResize(MoveResizeOutcome),
    /// Brightness that was actually applied after clamping.
    Brightness(f64),
    /// Number of connected outputs.
    MonitorCount(usize),
    /// Whether a matching window exists.
    IsRunning(bool),
    /// Connected outputs, in layout order.
    Outputs(Vec<Output>),
    /// Open windows, in registration order.
    Surfaces(Vec<Surface>),
}

/// What a move/resize request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveResizeOutcome {
    /// A window matched and was moved.
    Moved,
    /// No window matched; a placeholder was recorded for a window that appears later.
    Placeholder,
    /// No window matched and nothing changed.
    NotFound,
}

/// Connected output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Connector name, for example `DP-1`.
    pub name: String,
    /// Position in the global layout.
    pub x: i32,
    /// Position in the global layout.
    pub y: i32,
    /// Current mode width in physical pixels.
    pub width: i32,
    /// Current mode height in physical pixels.
    pub height: i32,
    /// Current mode refresh rate in millihertz.
    pub refresh: i32,
    /// Gamma ramp length, `None` if the output has no gamma support.
    pub gamma_size: Option<u32>,
}

/// Open window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Application id or title, `unknown` if the client never set one.
    pub identifier: String,
    /// Whether the window comes from Xwayland.
    pub is_x11: bool,
    /// Whether the window currently shows content.
    pub mapped: bool,
    /// Position in the global layout.
    pub x: i32,
    /// Position in the global layout.
    pub y: i32,
    /// Last requested size, if any.
    pub requested_size: Option<(i32, i32)>,
}
