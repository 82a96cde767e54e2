//! SQLite executor for sqlfox.
//!
// The driver talks to libsqlite3 through raw FFI.
#![allow(unsafe_code)]
//!
//! `SqliteConnection` implements the `Connection` trait from sqlfox-core on
//! top of the bundled libsqlite3 shipped by `libsqlite3-sys`. It is the
//! executor used by the sqlfox integration tests and is a reasonable default
//! for embedded applications.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlfox_sqlite::SqliteConnection;
//! use sqlfox_core::{Connection, Cx, Outcome, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//!
//! let cx = Cx::for_testing();
//! match conn.insert(&cx, "INSERT INTO users (name) VALUES (?1)", &[Value::Text("Alice".into())]).await {
//!     Outcome::Ok(id) => println!("Inserted user with id: {id}"),
//!     Outcome::Err(e) => eprintln!("Error: {e}"),
//!     _ => {}
//! }
//! ```
//!
//! # Thread Safety
//!
//! `SqliteConnection` is both `Send` and `Sync`: the handle lives behind a
//! mutex and every statement runs to completion while holding it.

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// The SQLite library version string.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static NUL-terminated string
    unsafe { std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}
