//! Logging bootstrap: a fmt subscriber over a non-blocking daily file
//! appender in `./log/`. The returned guard must be kept alive for the
//! lifetime of the process so buffered lines are flushed on exit.

use tracing::Level;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};

use crate::config::LogConfig;

pub fn init(cfg: &LogConfig) -> Option<WorkerGuard> {
    if !cfg.enable {
        return None;
    }
    let appender = tracing_appender::rolling::daily("./log", "webserver.log");
    let (writer, guard) = NonBlockingBuilder::default()
        .buffered_lines_limit(cfg.queue_capacity)
        .finish(appender);
    let level = match cfg.level {
        0 => Level::DEBUG,
        1 => Level::INFO,
        2 => Level::WARN,
        _ => Level::ERROR,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Some(guard)
}
