use anyhow::Context;
use lumen_gateway::{cli::GatewayArgs, run::Gateway};

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    lumen_logger::init();

    let args = GatewayArgs::from_env()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let gateway = rt.block_on(Gateway::init(args))?;
    let spawn_ctrlc_handler = true;
    rt.block_on(gateway.run(spawn_ctrlc_handler))
}
