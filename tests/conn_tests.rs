use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Once;

use webserver::http::conn::{HttpConn, SRC_DIR};
use webserver::http::request::UserVerifier;

struct DenyAll;

impl UserVerifier for DenyAll {
    fn verify(&self, _name: &str, _pwd: &str, _is_login: bool) -> bool {
        false
    }
}

static SETUP: Once = Once::new();

const INDEX_BODY: &str = "<html><body>index</body></html>";
const NOT_FOUND_BODY: &str = "<html><body>404</body></html>";
const BIG_LEN: usize = 2000;

fn scratch_root() -> PathBuf {
    std::env::temp_dir().join(format!("webserver-conn-tests-{}", std::process::id()))
}

/// Builds the scratch resource tree once per test binary and points the
/// process-wide resource root at it.
fn setup_resources() {
    SETUP.call_once(|| {
        let root = scratch_root();
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).expect("create scratch resources");
        fs::write(root.join("index.html"), INDEX_BODY).unwrap();
        fs::write(root.join("404.html"), NOT_FOUND_BODY).unwrap();
        fs::write(root.join("400.html"), "<html><body>400</body></html>").unwrap();
        fs::write(root.join("403.html"), "<html><body>403</body></html>").unwrap();
        fs::write(root.join("big.txt"), vec![b'x'; BIG_LEN]).unwrap();
        fs::write(root.join("secret.html"), "top secret").unwrap();
        fs::set_permissions(root.join("secret.html"), fs::Permissions::from_mode(0o600)).unwrap();
        let _ = SRC_DIR.set(format!("{}/", root.display()));
    });
}

fn conn_with_request(raw: &[u8]) -> HttpConn {
    setup_resources();
    let mut conn = HttpConn::new();
    conn.read_buff.append(raw);
    conn
}

fn head_str(conn: &HttpConn) -> String {
    String::from_utf8_lossy(conn.write_buff.peek()).into_owned()
}

#[test]
fn test_process_static_get() {
    let mut conn = conn_with_request(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n");
    assert!(conn.process(&DenyAll));
    assert_eq!(conn.response.code(), 200);
    assert!(conn.is_keep_alive());

    let head = head_str(&conn);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head: {head}");
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert!(head.contains("keep-alive: max=6, timeout=120\r\n"));
    assert!(head.contains("Content-type: text/html\r\n"));
    assert!(head.contains(&format!("Content-length: {}\r\n\r\n", INDEX_BODY.len())));

    assert_eq!(conn.head_remaining(), conn.write_buff.readable_bytes());
    assert_eq!(conn.file_remaining(), INDEX_BODY.len());
}

#[test]
fn test_process_not_found_serves_error_page() {
    let mut conn = conn_with_request(b"GET /does-not-exist HTTP/1.1\r\nHost: x\r\n\r\n");
    assert!(conn.process(&DenyAll));
    assert_eq!(conn.response.code(), 404);
    assert_eq!(conn.response.path(), "/404.html");
    assert!(head_str(&conn).starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(head_str(&conn).contains("Connection: close\r\n"));
    assert_eq!(conn.file_remaining(), NOT_FOUND_BODY.len());
}

#[test]
fn test_process_forbidden_when_not_world_readable() {
    let mut conn = conn_with_request(b"GET /secret.html HTTP/1.1\r\n\r\n");
    assert!(conn.process(&DenyAll));
    assert_eq!(conn.response.code(), 403);
    assert_eq!(conn.response.path(), "/403.html");
}

#[test]
fn test_process_malformed_request_yields_400() {
    let mut conn = conn_with_request(b"BAD\r\n\r\n");
    assert!(conn.process(&DenyAll));
    assert_eq!(conn.response.code(), 400);
    assert_eq!(conn.response.path(), "/400.html");
    assert!(head_str(&conn).starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn test_process_on_empty_buffer_returns_false() {
    setup_resources();
    let mut conn = HttpConn::new();
    assert!(!conn.process(&DenyAll));
}

#[test]
fn test_process_incomplete_is_idempotent_then_completes() {
    let mut conn = conn_with_request(b"GET /index.html HTT");
    assert!(!conn.process(&DenyAll));
    assert_eq!(conn.read_buff.readable_bytes(), 19);
    // Same buffered bytes, same answer, nothing consumed.
    assert!(!conn.process(&DenyAll));
    assert_eq!(conn.read_buff.readable_bytes(), 19);

    conn.read_buff.append(b"P/1.1\r\n\r\n");
    assert!(conn.process(&DenyAll));
    assert_eq!(conn.response.code(), 200);
    assert_eq!(conn.request.path(), "/index.html");
}

#[test]
fn test_partial_write_bookkeeping_across_segments() {
    let mut conn = conn_with_request(b"GET /big.txt HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert!(conn.process(&DenyAll));
    let head = conn.head_remaining();
    assert!(head > 0);
    assert_eq!(conn.file_remaining(), BIG_LEN);

    // Partial progress inside the header segment.
    conn.consume_written(50);
    assert_eq!(conn.head_remaining(), head - 50);
    assert_eq!(conn.file_remaining(), BIG_LEN);

    // Finish the header exactly: the header buffer resets.
    conn.consume_written(head - 50);
    assert_eq!(conn.head_remaining(), 0);
    assert_eq!(conn.write_buff.readable_bytes(), 0);
    assert_eq!(conn.file_remaining(), BIG_LEN);

    // Progress within the file segment only.
    conn.consume_written(500);
    assert_eq!(conn.file_remaining(), BIG_LEN - 500);

    conn.consume_written(BIG_LEN - 500);
    assert_eq!(conn.to_write_bytes(), 0);
}

#[test]
fn test_write_crossing_from_header_into_file() {
    let mut conn = conn_with_request(b"GET /big.txt HTTP/1.1\r\n\r\n");
    assert!(conn.process(&DenyAll));
    let head = conn.head_remaining();

    // One writev took the whole header plus 30 file bytes.
    conn.consume_written(head + 30);
    assert_eq!(conn.head_remaining(), 0);
    assert_eq!(conn.write_buff.readable_bytes(), 0);
    assert_eq!(conn.file_remaining(), BIG_LEN - 30);
    assert_eq!(conn.to_write_bytes(), BIG_LEN - 30);
}
