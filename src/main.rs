use anyhow::Context as _;
use clap::Parser;
use gantry::cli::{Args, Runner};
use gantry::context::Context;
use gantry::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let runner = Runner::new(args).context("invalid configuration")?;

    let (ctx, cancel) = Context::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    if let Err(err) = runner.run(&ctx).await {
        runner.logger().error(&err.to_string());
        std::process::exit(1);
    }
    Ok(())
}
