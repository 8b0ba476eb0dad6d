use std::process::ExitCode;
use std::sync::Arc;

use tracing::error;

use webserver::config::Config;
use webserver::http::UserVerifier;
use webserver::pool::SqlConnPool;
use webserver::server::WebServer;

fn main() -> ExitCode {
    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = match Config::load(&cfg_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = webserver::log::init(&config.log);

    let pool = match SqlConnPool::init(&config.sql) {
        Ok(pool) => pool,
        Err(e) => {
            error!("========== Server init error! ==========");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let verifier: Arc<dyn UserVerifier> = pool;

    let mut server = match WebServer::new(config, verifier) {
        Ok(server) => server,
        Err(e) => {
            error!("========== Server init error! ==========");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server terminated: {e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
