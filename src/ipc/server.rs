use std::ffi::OsStr;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::{env, fs, io, process};

use anyhow::Context;
use bluewm_ipc::{Reply, Request, Response};
use calloop::generic::Generic;
use calloop::io::Async;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use directories::BaseDirs;
use futures_util::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use futures_util::AsyncReadExt;

use crate::bluewm::State;
use crate::control::ControlApi;
use crate::utils::version;

pub struct IpcServer {
    pub socket_path: PathBuf,
}

impl IpcServer {
    /// Binds the control socket and serves it on the event loop.
    ///
    /// Requests are answered straight from the control handle; none of them need the
    /// compositor state.
    pub fn start(
        event_loop: &LoopHandle<'static, State>,
        wayland_socket_name: &OsStr,
        control: ControlApi,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("IpcServer::start");

        let socket_name = format!(
            "bluewm.{}.{}.sock",
            wayland_socket_name.to_string_lossy(),
            process::id()
        );
        let base_dirs = BaseDirs::new().context("error getting the home directory")?;
        let socket_path = base_dirs
            .runtime_dir()
            .map(|dir| dir.to_owned())
            .unwrap_or_else(env::temp_dir)
            .join(socket_name);

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("error binding socket at {socket_path:?}"))?;
        listener
            .set_nonblocking(true)
            .context("error setting socket to non-blocking")?;

        let source = Generic::new(listener, Interest::READ, Mode::Level);
        event_loop
            .insert_source(source, move |_, socket, state| {
                match socket.accept() {
                    Ok((stream, _)) => on_new_ipc_client(state, stream, control.clone()),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => (),
                    Err(e) => return Err(e),
                }

                Ok(PostAction::Continue)
            })
            .map_err(|err| anyhow::anyhow!("error inserting the IPC source: {err}"))?;

        Ok(Self { socket_path })
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

fn on_new_ipc_client(state: &mut State, stream: UnixStream, control: ControlApi) {
    let _span = tracy_client::span!("on_new_ipc_client");
    trace!("new IPC client connected");

    let stream = match state.bluewm.event_loop.adapt_io(stream) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("error making IPC stream async: {err:?}");
            return;
        }
    };

    let future = async move {
        if let Err(err) = handle_client(control, stream).await {
            warn!("error handling IPC client: {err:?}");
        }
    };
    if let Err(err) = state.bluewm.scheduler.schedule(future) {
        warn!("error scheduling IPC stream future: {err:?}");
    }
}

async fn handle_client(control: ControlApi, stream: Async<'_, UnixStream>) -> anyhow::Result<()> {
    let (read, mut write) = stream.split();
    let mut buf = String::new();

    // Read a single line to allow extensibility in the future to keep reading.
    BufReader::new(read)
        .read_line(&mut buf)
        .await
        .context("error reading request")?;

    let reply: Reply = serde_json::from_str(&buf)
        .context("error parsing request")
        .map_err(|err| err.to_string())
        .and_then(|request| process(&control, request));

    let mut buf = serde_json::to_vec(&reply).context("error formatting reply")?;
    buf.push(b'\n');
    write.write_all(&buf).await.context("error writing reply")?;

    Ok(())
}

pub(crate) fn process(control: &ControlApi, request: Request) -> Reply {
    let response = match request {
        Request::Version => Response::Version(version()),
        Request::MoveResize {
            identifier,
            x,
            y,
            width,
            height,
        } => Response::MoveResize(control.move_resize(&identifier, x, y, width, height)),
        Request::SetBrightness { value } => {
            if !value.is_finite() {
                return Err(format!("invalid brightness: {value}"));
            }
            Response::Brightness(control.set_brightness(value))
        }
        Request::MonitorCount => Response::MonitorCount(control.monitor_count()),
        Request::IsRunning { identifier } => Response::IsRunning(control.is_running(&identifier)),
        Request::Outputs => Response::Outputs(control.outputs()),
        Request::Surfaces => Response::Surfaces(control.surfaces()),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use bluewm_ipc::MoveResizeOutcome;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::control::ControlMode;
    use crate::session::Session;
    use crate::surfaces::{NativeSurface, SurfaceKind};

    fn session() -> Session {
        Session::new(&bluewm_config::Config::default(), ControlMode::Native, None)
    }

    #[test]
    fn requests_reach_the_control_api() {
        let mut session = session();
        session
            .surface_created(SurfaceKind::Native(NativeSurface::default()), Some("foot"))
            .unwrap();
        let control = session.control.clone();

        assert_eq!(
            process(&control, Request::IsRunning { identifier: "fo".to_owned() }),
            Ok(Response::IsRunning(true))
        );
        assert_eq!(
            process(&control, Request::MonitorCount),
            Ok(Response::MonitorCount(0))
        );
        assert_eq!(
            process(
                &control,
                Request::MoveResize {
                    identifier: "foot".to_owned(),
                    x: 10,
                    y: 20,
                    width: 800,
                    height: 600,
                }
            ),
            Ok(Response::MoveResize(MoveResizeOutcome::Moved))
        );
    }

    #[test]
    fn brightness_is_clamped_and_rejects_nan() {
        let control = session().control;

        assert_eq!(
            process(&control, Request::SetBrightness { value: 3. }),
            Ok(Response::Brightness(1.))
        );
        assert!(process(&control, Request::SetBrightness { value: f64::NAN }).is_err());
    }

    #[test]
    fn version_is_reported() {
        let control = session().control;
        assert_eq!(
            process(&control, Request::Version),
            Ok(Response::Version(version()))
        );
    }
}
