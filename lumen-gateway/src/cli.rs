//! Gateway CLI.
//!
//! Nearly all configuration comes from env vars (see
//! [`lumen_common::config::Config`]); the CLI only carries the overrides
//! that are convenient when running by hand.

use lumen_common::config::Config;

/// Lumen storage-network gateway
#[derive(argh::FromArgs)]
pub struct GatewayArgs {
    /// the port to listen on.
    ///
    /// Default: 8787.
    /// Env: `PORT`.
    #[argh(option)]
    pub port: Option<u16>,

    /// region label surfaced in /status.
    ///
    /// Env: `REGION`.
    #[argh(option)]
    pub region: Option<String>,
}

impl GatewayArgs {
    /// Parse CLI args and merge them over the env-derived [`Config`].
    pub fn from_env() -> anyhow::Result<ResolvedArgs> {
        let args = argh::from_env::<Self>();
        let mut config = Config::from_env()?;
        if let Some(port) = args.port {
            config.port = port;
        }
        if args.region.is_some() {
            config.region = args.region;
        }
        Ok(ResolvedArgs { config })
    }
}

pub struct ResolvedArgs {
    pub config: Config,
}
