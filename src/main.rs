use clap::Parser;

use codequest::config::CliArgs;
use codequest::database as db;
use codequest::sandbox::SandboxExecutor;
use codequest::security::SecurityAnalyzer;
use codequest::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let db_path = db::get_db_path();
    let cli = CliArgs::parse();

    let config = cli.to_config().expect("Failed to load configuration");

    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .expect("Failed to initialize database");

    for seed in &config.challenges {
        db::upsert_challenge(&db_pool, seed)
            .await
            .expect("Failed to seed challenge");
    }
    log::info!("Seeded {} challenges", config.challenges.len());

    let analyzer = SecurityAnalyzer::new();
    let executor = SandboxExecutor::new(config.sandbox.clone());

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(&config, db_pool, analyzer, executor).expect("Failed to build server");

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

    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
