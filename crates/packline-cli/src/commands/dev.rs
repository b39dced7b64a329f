//! `packline dev`.

use miette::{miette, Result};
use packline_core::{Compiler, Config};
use packline_dev::ServerOptions;

#[derive(Debug, Clone, Default)]
pub struct DevAction {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub no_hot: bool,
}

pub async fn run(mut config: Config, action: DevAction) -> Result<()> {
    if let Some(host) = action.host {
        config.dev_server.host = host;
    }
    if let Some(port) = action.port {
        config.dev_server.port = port;
    }
    if action.no_hot {
        config.dev_server.hot = false;
    }

    let options = ServerOptions::from_config(&config).map_err(|e| miette!(code = e.code(), "{e}"))?;
    let hot = config.dev_server.hot;
    let compiler = Compiler::new(config).map_err(|e| miette!(code = e.code(), "{e}"))?;

    println!();
    println!("  packline dev server at {}", options.url());
    if hot {
        println!("  hot updates enabled");
    }
    println!("  press Ctrl+C to stop");
    println!();

    packline_dev::serve(compiler)
        .await
        .map_err(|e| miette!(code = e.code(), "{e}"))
}
