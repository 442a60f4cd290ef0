use anyhow::{anyhow, Context};
use bluewm_ipc::socket::Socket;
use bluewm_ipc::{MoveResizeOutcome, Request, Response};

use crate::cli::Msg;

pub fn handle_msg(msg: Msg, json: bool) -> anyhow::Result<()> {
    let request = Request::from(msg);

    let socket = Socket::connect().context("error connecting to the bluewm socket")?;
    let reply = socket
        .send(request.clone())
        .context("error communicating with bluewm")?;
    let response = reply
        .map_err(|msg| anyhow!(msg))
        .context("bluewm returned an error")?;

    if json {
        let response =
            serde_json::to_string(&response).context("error formatting response")?;
        println!("{response}");
        return Ok(());
    }

    match response {
        Response::Version(version) => {
            println!("Compositor version: {version}");
            println!("CLI version:        {}", crate::utils::version());
        }
        Response::MoveResize(outcome) => match outcome {
            MoveResizeOutcome::Moved => println!("Moved."),
            MoveResizeOutcome::Placeholder => {
                println!("No matching window; placement remembered for when it appears.")
            }
            MoveResizeOutcome::NotFound => {
                if let Request::MoveResize { identifier, .. } = request {
                    println!("No window matches {identifier:?}.");
                }
            }
        },
        Response::Brightness(value) => println!("Brightness set to {value}."),
        Response::MonitorCount(count) => println!("{count}"),
        Response::IsRunning(running) => println!("{}", if running { "yes" } else { "no" }),
        Response::Outputs(outputs) => {
            for output in outputs {
                println!("Output \"{}\"", output.name);
                println!(
                    "  Mode: {}x{} @ {:.3} Hz",
                    output.width,
                    output.height,
                    output.refresh as f64 / 1000.
                );
                println!("  Position: {}, {}", output.x, output.y);
                match output.gamma_size {
                    Some(size) => println!("  Gamma size: {size}"),
                    None => println!("  Gamma: unsupported"),
                }
                println!();
            }
        }
        Response::Surfaces(surfaces) => {
            for surface in surfaces {
                let kind = if surface.is_x11 { " (X11)" } else { "" };
                println!("Window \"{}\"{kind}", surface.identifier);
                println!("  Mapped: {}", if surface.mapped { "yes" } else { "no" });
                println!("  Position: {}, {}", surface.x, surface.y);
                if let Some((w, h)) = surface.requested_size {
                    println!("  Requested size: {w}x{h}");
                }
                println!();
            }
        }
    }

    Ok(())
}
