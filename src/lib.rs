//! Store and retrieve DICOM objects over HTTP/1.1, HTTP/2 and HTTP/3.
//!
//! Objects live in a `<study>/<series>/<instance>.dcm` tree below a storage root. The
//! [`transfer`] operations move them between that tree and HTTP bodies, the [`api`] module serves
//! them and the [`client`] module drives them from the other side.

pub mod api;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod tls;
pub mod transfer;
pub mod types;
pub mod upload;

pub use error::TransferError;
pub use types::{ObjectId, TransferResult, UI};
