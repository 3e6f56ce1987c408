use std::path::PathBuf;

use anyhow::Result;
use result_fetch::utils::logging;
use result_fetch::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config_path =
        PathBuf::from(std::env::var("APP_CONFIG").unwrap_or_else(|_| "config.toml".to_string()));
    let config = Config::load(&config_path)?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
