//! reviewsync daemon: hosts one `SyncController` behind a Unix socket.

mod error;
pub mod http_store;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use http_store::HttpRemoteStore;
pub use protocol::{
    request_autoload, request_candidates, request_list, request_load, request_pause,
    request_poll, request_refresh_names, request_resume, request_save, request_status,
    request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{
    decode_delta, handle_request, init_tracing, run, run_with, start_blocking, DaemonContext,
};
