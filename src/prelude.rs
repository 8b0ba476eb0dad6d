pub use crate::buffer::Buffer;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::http::conn::{HttpConn, IS_ET, SRC_DIR, USER_COUNT};
pub use crate::http::request::{HttpRequest, ParseState, UserVerifier};
pub use crate::http::response::HttpResponse;

pub use tracing::{debug, error, info, trace, warn};

pub use std::collections::HashMap;
pub use std::sync::Arc;

/// Hard cap on concurrent clients.
pub const MAX_FD: i32 = 65536;
pub const LISTEN_BACKLOG: i32 = 6;
/// Capacity of the readiness event batch per wait.
pub const MAX_EVENTS: usize = 1024;
