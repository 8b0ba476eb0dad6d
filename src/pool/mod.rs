pub mod sql_pool;
pub mod thread_pool;

pub use sql_pool::{SqlConnGuard, SqlConnPool};
pub use thread_pool::ThreadPool;
