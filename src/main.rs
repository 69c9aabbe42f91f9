mod authz;
mod config;
mod context;
mod db;
mod dirs;
mod gateway;
mod logs;
mod refresh;

use std::backtrace::Backtrace;
use std::panic;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use authz::store::PermissionStore;
use config::ConfigArgs;
use gateway::config::GatewayConfig;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct GatewayArgs {
    /// Print gateway configuration data (JSON) and exit.
    #[arg(long)]
    pub print_config: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

async fn run(args: GatewayArgs) -> Result<()> {
    let cfg: GatewayConfig = args.config.load("gateway")?;

    if args.print_config {
        let json = serde_json::to_string_pretty(&cfg).context("encode config")?;
        println!("{json}");
        return Ok(());
    }

    cfg.logs.init()?;
    panic::set_hook(Box::new(|info| {
        error!("{info}\n{}", Backtrace::force_capture());
    }));

    let db = cfg.db.build().context("init database")?;
    let store = Arc::new(PermissionStore::new());

    let refresher = cfg.build_refresher(db, store.clone());
    refresher.start();

    let ctx = cfg.build_ctx(store)?;
    let server = cfg.build_server(ctx);
    server.run().await.context("run gateway server")?;

    info!("Gateway exited by user");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = GatewayArgs::parse();
    match run(args).await {
        Ok(()) => {}
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
