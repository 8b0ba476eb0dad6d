//! Bounded pool of MySQL sessions plus the account verifier that backs the
//! login and register endpoints.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder};
use tracing::{debug, error, info};

use crate::config::SqlConfig;
use crate::error::Result;
use crate::http::request::UserVerifier;

pub struct SqlConnPool {
    conns: Mutex<Vec<Conn>>,
    available: Condvar,
}

impl SqlConnPool {
    /// Eagerly opens `pool_num` sessions. A server without its database is
    /// useless, so any connection failure aborts startup.
    pub fn init(cfg: &SqlConfig) -> Result<Arc<Self>> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(cfg.host.as_str()))
            .tcp_port(cfg.port)
            .user(Some(cfg.user.as_str()))
            .pass(Some(cfg.password.as_str()))
            .db_name(Some(cfg.db_name.as_str()))
            .into();
        let mut conns = Vec::with_capacity(cfg.pool_num);
        for _ in 0..cfg.pool_num {
            conns.push(Conn::new(opts.clone())?);
        }
        info!("SqlConnPool ready, {} sessions", cfg.pool_num);
        Ok(Arc::new(SqlConnPool {
            conns: Mutex::new(conns),
            available: Condvar::new(),
        }))
    }

    /// Blocks until a session is free. The guard returns it on every exit
    /// path, including panics unwinding through the caller.
    pub fn get(&self) -> SqlConnGuard<'_> {
        let mut conns = self.conns.lock().unwrap();
        while conns.is_empty() {
            conns = self.available.wait(conns).unwrap();
        }
        let conn = conns.pop().expect("pool is non-empty here");
        SqlConnGuard {
            conn: ManuallyDrop::new(conn),
            pool: self,
        }
    }

    fn check_in(&self, conn: Conn) {
        self.conns.lock().unwrap().push(conn);
        self.available.notify_one();
    }
}

pub struct SqlConnGuard<'a> {
    conn: ManuallyDrop<Conn>,
    pool: &'a SqlConnPool,
}

impl Deref for SqlConnGuard<'_> {
    type Target = Conn;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for SqlConnGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for SqlConnGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: conn is never accessed after this
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.check_in(conn);
    }
}

impl UserVerifier for SqlConnPool {
    /// Login compares the stored password; register fails on a taken name
    /// and inserts otherwise. Fails closed on any database error.
    fn verify(&self, name: &str, pwd: &str, is_login: bool) -> bool {
        if name.is_empty() || pwd.is_empty() {
            return false;
        }
        debug!("verify name:{name} isLogin:{is_login}");
        let mut conn = self.get();
        let row: Option<(String, String)> = match conn.exec_first(
            "SELECT username, password FROM user WHERE username = ? LIMIT 1",
            (name,),
        ) {
            Ok(row) => row,
            Err(e) => {
                error!("user lookup failed: {e}");
                return false;
            }
        };
        if is_login {
            match row {
                Some((_, stored)) => {
                    if stored == pwd {
                        true
                    } else {
                        debug!("pwd error!");
                        false
                    }
                }
                None => false,
            }
        } else {
            if row.is_some() {
                debug!("user used!");
                return false;
            }
            match conn.exec_drop(
                "INSERT INTO user (username, password) VALUES (?, ?)",
                (name, pwd),
            ) {
                Ok(()) => {
                    debug!("register!");
                    true
                }
                Err(e) => {
                    error!("insert failed: {e}");
                    false
                }
            }
        }
    }
}
