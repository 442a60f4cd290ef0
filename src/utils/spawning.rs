use std::ffi::OsStr;
use std::process::{Child, Command, Stdio};
use std::thread;

/// Spawns the command to run independently of the compositor.
///
/// The child inherits the session environment (`WAYLAND_DISPLAY` and `BLUEWM_SOCKET`).
/// `DISPLAY` is set when an X server is given.
pub fn spawn<T: AsRef<OsStr> + Send + 'static>(command: Vec<T>, xdisplay: Option<u32>) {
    let _span = tracy_client::span!();

    if command.is_empty() {
        return;
    }

    // Spawning and waiting takes some milliseconds, so do it in a thread.
    let res = thread::Builder::new()
        .name("Command Spawner".to_owned())
        .spawn(move || {
            if let Some((command, args)) = command.split_first() {
                spawn_sync(command, args, xdisplay);
            }
        });

    if let Err(err) = res {
        warn!("error spawning a thread to spawn the command: {err:?}");
    }
}

fn spawn_sync(
    command: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    xdisplay: Option<u32>,
) {
    let _span = tracy_client::span!();

    let command = command.as_ref();
    let process = build_command(command, args, xdisplay);

    let Some(mut child) = do_spawn(command, process) else {
        return;
    };

    // Reap the child so it does not linger as a zombie.
    match child.wait() {
        Ok(status) => {
            if !status.success() {
                warn!("spawned process exited with {status}");
            }
        }
        Err(err) => {
            warn!("error waiting for spawned process: {err:?}");
        }
    }
}

fn build_command(
    command: &OsStr,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    xdisplay: Option<u32>,
) -> Command {
    let mut process = Command::new(command);
    process
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    if let Some(display) = xdisplay {
        process.env("DISPLAY", format!(":{display}"));
    }

    process
}

fn do_spawn(command: &OsStr, mut process: Command) -> Option<Child> {
    match process.spawn() {
        Ok(child) => {
            debug!("spawned {command:?} as pid {}", child.id());
            Some(child)
        }
        Err(err) => {
            warn!("error spawning {command:?}: {err:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    fn envs(command: &Command) -> Vec<(OsString, Option<OsString>)> {
        command
            .get_envs()
            .map(|(k, v)| (k.to_owned(), v.map(OsStr::to_owned)))
            .collect()
    }

    #[test]
    fn x11_display_is_passed_to_the_child() {
        let command = build_command(OsStr::new("xterm"), ["-e", "true"], Some(2));
        assert_eq!(
            envs(&command),
            vec![(OsString::from("DISPLAY"), Some(OsString::from(":2")))]
        );
        assert_eq!(command.get_args().collect::<Vec<_>>(), ["-e", "true"]);
    }

    #[test]
    fn environment_is_inherited_without_x11() {
        let command = build_command(OsStr::new("foot"), Vec::<&str>::new(), None);
        assert!(envs(&command).is_empty());
    }
}
