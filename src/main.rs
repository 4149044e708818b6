use anyhow::Result;
use clap::{Arg, Command};
use tracing::{error, info};

use taskhub::common::{self, RunMode, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskhub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("后台任务运行时")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找默认路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["worker", "api", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .get_matches();

    let mode: RunMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()?;
    let startup = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        mode,
        log_level: matches.get_one::<String>("log-level").cloned(),
    };

    let config = common::load_config(&startup)?;
    common::init_logging(&config)?;
    info!(name = %config.app.name, version = %config.app.version, mode = %mode, "启动taskhub");

    let deps = common::build_dependencies(&config).await?;

    let result = match common::build_app(&config, mode, deps.clone()).await {
        Ok(app) => app.run().await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };

    if let Err(e) = deps.cleanup().await {
        error!(error = %e, "释放外部依赖失败");
    }

    match &result {
        Ok(()) => info!("taskhub已退出"),
        Err(e) => error!(error = %e, "taskhub异常退出"),
    }
    result
}
