mod fm_api;
mod fm_controllers;
mod fm_models;
mod fm_pagers;
mod fm_patterns;
mod fm_poller;
mod fm_state;
mod fm_views;
#[cfg(test)]
mod fm_testing;

use anyhow::Context;
use fm_api::MbtaClient;
use fm_controllers::FMControllers;

fn main() {
    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\nThe fleet monitor encountered an unexpected error:");
        eprintln!("{}", panic_info);
        eprintln!("\n💡 Troubleshooting:");
        eprintln!("  • Please restart the application");
        eprintln!("  • Check that MBTA_API_URL points at a reachable API");
        eprintln!("  • Run with RUST_LOG=debug for request logs");
        eprintln!("\n{}", "═".repeat(70));
    }));

    if let Err(e) = run() {
        eprintln!("\n❌ {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let client = MbtaClient::from_env().context("Cannot start the fleet monitor")?;
    log::info!("Using transit API at {}", client.base_url());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        let mut controllers = FMControllers::new(client);
        controllers.run().await;
    });

    // Stdin reads park a blocking thread that never returns on its own.
    runtime.shutdown_background();
    Ok(())
}
