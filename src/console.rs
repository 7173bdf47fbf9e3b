//! Interactive admin console
//!
//! Reads commands from stdin and applies them to the shared velocity and
//! auth state. Every change takes effect on the next relayed Entity
//! Velocity packet, with no per-session coordination.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::auth::MojangAuth;
use crate::logger::log;
use crate::velocity::VelocityState;

/// One parsed console command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Horizontal multiplier (X and Z)
    Kb(f64),
    /// Vertical multiplier (Y)
    Kby(f64),
    /// All three axes, independently
    Kball(f64, f64, f64),
    /// Back to identity multipliers
    Reset,
    /// Print multipliers and auth state
    Status,
    /// Set the bearer token
    Token(String),
    /// Fetch the profile behind the current token
    Auth,
    Help,
    Quit,
}

/// Parse one console line. `None` means blank input; an `Err` carries the
/// message shown to the operator.
pub fn parse_command(line: &str) -> Option<std::result::Result<Command, String>> {
    let mut parts = line.split_whitespace();
    let word = parts.next()?;
    let args: Vec<&str> = parts.collect();
    let arg = args.first().copied();

    let parse_factor = |name: &str| -> std::result::Result<f64, String> {
        let raw = arg.ok_or_else(|| format!("usage: {} <factor>", name))?;
        raw.parse::<f64>()
            .map_err(|_| format!("invalid factor '{}'", raw))
    };
    let parse_triple = || -> std::result::Result<(f64, f64, f64), String> {
        if args.len() != 3 {
            return Err("usage: kball <x> <y> <z>".to_string());
        }
        let mut out = [0f64; 3];
        for (slot, raw) in out.iter_mut().zip(&args) {
            *slot = raw
                .parse::<f64>()
                .map_err(|_| format!("invalid factor '{}'", raw))?;
        }
        Ok((out[0], out[1], out[2]))
    };

    let cmd = match word {
        "kb" => parse_factor("kb").map(Command::Kb),
        "kby" => parse_factor("kby").map(Command::Kby),
        "kball" => parse_triple().map(|(x, y, z)| Command::Kball(x, y, z)),
        "reset" => Ok(Command::Reset),
        "status" => Ok(Command::Status),
        "token" => arg
            .map(|t| Command::Token(t.to_string()))
            .ok_or_else(|| "usage: token <bearer-token>".to_string()),
        "auth" => Ok(Command::Auth),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{}', try 'help'", other)),
    };
    Some(cmd)
}

const HELP_TEXT: &str = "\
Commands:
  kb <factor>     set horizontal knockback multiplier (X and Z)
  kby <factor>    set vertical knockback multiplier (Y)
  kball <x> <y> <z>  set all three axes independently
  reset           restore identity multipliers (1.0)
  status          show multipliers and auth state
  token <token>   set the minecraft.net bearer token
  auth            fetch the profile for the current token
  help            this text
  quit            stop the proxy";

/// Apply one command. Returns false when the console should stop.
pub async fn apply_command(
    cmd: Command,
    velocity: &VelocityState,
    auth: &MojangAuth,
) -> bool {
    match cmd {
        Command::Kb(factor) => {
            velocity.set_horizontal(factor);
            println!("horizontal multiplier = {}", factor);
        }
        Command::Kby(factor) => {
            velocity.set_y(factor);
            println!("vertical multiplier = {}", factor);
        }
        Command::Kball(x, y, z) => {
            velocity.set_all(x, y, z);
            println!("multipliers = x:{} y:{} z:{}", x, y, z);
        }
        Command::Reset => {
            velocity.reset();
            println!("multipliers reset to 1.0");
        }
        Command::Status => {
            println!(
                "multipliers: x={} y={} z={}",
                velocity.x(),
                velocity.y(),
                velocity.z()
            );
            match auth.identity_name().await {
                Some(name) => println!("identity: {}", name),
                None => println!("identity: none (set 'token', then 'auth')"),
            }
        }
        Command::Token(token) => {
            auth.set_access_token(token).await;
            println!("token set, run 'auth' to fetch the profile");
        }
        Command::Auth => match auth.fetch_profile().await {
            Ok(profile) => println!("authenticated as {} ({})", profile.name, profile.id),
            Err(e) => println!("auth failed: {}", e),
        },
        Command::Help => println!("{}", HELP_TEXT),
        Command::Quit => {
            log::info!("Quit requested from console");
            return false;
        }
    }
    true
}

/// Drive the console until EOF or `quit`.
pub async fn run_console(velocity: Arc<VelocityState>, auth: Arc<MojangAuth>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP_TEXT);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            // stdin closed: keep the proxy running, just stop the console
            Ok(None) => {
                log::debug!("Console stdin closed");
                return;
            }
            Err(e) => {
                log::warn!(error = %e, "Console read error");
                return;
            }
        };

        match parse_command(&line) {
            Some(Ok(cmd)) => {
                if !apply_command(cmd, &velocity, &auth).await {
                    std::process::exit(0);
                }
            }
            Some(Err(msg)) => println!("{}", msg),
            None => {}
        }
    }
}
