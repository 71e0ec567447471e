use std::sync::Arc;

use clap::Parser;

use funtime::config::{CliArgs, Config};
use funtime::session::SessionMap;
use funtime::store::ArtifactStore;
use funtime::toolchain::Toolchain;
use funtime::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        store: store_config,
        toolchain: toolchain_config,
    } = cli.to_config().expect("Failed to load configuration");

    let store = match store_config.root {
        Some(root) => ArtifactStore::new(root),
        None => ArtifactStore::at_default_location(),
    }
    .expect("Failed to open artifact store");

    let sessions = SessionMap::new(
        Arc::new(store),
        Arc::new(Toolchain::new(toolchain_config)),
    );

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(server_config, sessions).expect("Failed to build server");
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // In-flight connections get to finish their current batch
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
