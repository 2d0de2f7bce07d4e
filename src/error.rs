use thiserror::Error;

/// Errors that can escape the library surface. Everything else (malformed
/// frames, unknown targets, capacity exhaustion, ...) is handled internally
/// and never produced as a `Result::Err` - see SPEC_FULL.md SS7.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("could not bind to port {port}: {source}")]
    Bind { port: u16, #[source] source: std::io::Error },
}
