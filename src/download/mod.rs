//! Episode audio downloads: background transfers keyed by guid, and
//! reclamation of finished downloads.

mod filename;
mod manager;
mod transfer;

pub use filename::{AUDIO_EXTENSION, download_file_name, partial_path};
pub use manager::{
    AlwaysOnline, Connectivity, DEFAULT_EXPIRE_AFTER, DownloadHandle, DownloadManager,
    DownloadOutcome,
};
pub use transfer::{TransferRequest, download_to};
