use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use router::app;
use router::config::RouterConfig;
use router_core::{telemetry, version};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Use config from bytes
	#[arg(short, long, value_name = "config")]
	config: Option<String>,

	/// Use config from file
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	#[arg(long, value_name = "validate-only")]
	validate_only: bool,

	/// Print version (as a simple version string)
	#[arg(short = 'V', value_name = "version")]
	version_short: bool,

	/// Print version (as JSON)
	#[arg(long = "version")]
	version_long: bool,
}

fn main() -> anyhow::Result<()> {
	let _log_flush = telemetry::setup_logging();

	let args = Args::parse();
	let Args {
		config,
		file,
		validate_only,
		version_short,
		version_long,
	} = args;

	if version_short {
		println!("{}", version::BuildInfo::new().version);
		return Ok(());
	}
	if version_long {
		println!("{}", version::BuildInfo::new());
		return Ok(());
	}

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.unwrap()
		.block_on(async move {
			let contents = match (config, file) {
				(Some(_), Some(_)) => anyhow::bail!("only one of --config or --file"),
				(Some(config), None) => config,
				(None, Some(file)) => fs_err::tokio::read_to_string(&file).await?,
				(None, None) => "{}".to_string(),
			};
			if validate_only {
				return validate(&contents);
			}
			let config = RouterConfig::from_yaml(&contents)?;
			proxy(Arc::new(config)).await
		})
}

fn validate(contents: &str) -> anyhow::Result<()> {
	RouterConfig::from_yaml(contents)?;
	println!("Configuration is valid!");
	Ok(())
}

async fn proxy(cfg: Arc<RouterConfig>) -> anyhow::Result<()> {
	info!("version: {}", version::BuildInfo::new());
	info!(listen_addrs = ?cfg.listen_addrs, admin_addr = %cfg.admin_addr, "starting router");
	app::run(cfg).await?.wait_termination().await
}
