use std::sync::Arc;

use anyhow::Result;

use kbproxy::auth::MojangAuth;
use kbproxy::config::CliArgs;
use kbproxy::logger::{self, log};
use kbproxy::velocity::VelocityState;
use kbproxy::{console, server_runner};

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse_args();
    cli.validate()?;

    logger::init_logger(&cli.log_mode);

    log::info!(
        upstream = %format!("{}:{}", cli.upstream_host, cli.upstream_port),
        listen_port = cli.listen_port,
        auth = if cli.token.is_some() { "online" } else { "offline" },
        "Starting knockback proxy"
    );

    let velocity = Arc::new(VelocityState::new());
    let auth = Arc::new(MojangAuth::new());

    // A token on the command line is fetched eagerly so online-mode logins
    // work from the first connection
    if let Some(token) = &cli.token {
        auth.set_access_token(token.clone()).await;
        match auth.fetch_profile().await {
            Ok(profile) => log::info!(player = %profile.name, "Startup authentication ready"),
            Err(e) => log::warn!(error = %e, "Startup profile fetch failed, use 'auth' to retry"),
        }
    }

    let server = Arc::new(server_runner::ProxyServer::new(
        &cli,
        Arc::clone(&velocity),
        Arc::clone(&auth),
    ));

    tokio::spawn(console::run_console(velocity, auth));

    server_runner::run_server(server, cli.listen_port).await
}
