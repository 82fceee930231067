//! Staging of matched files into the exchange set tree.

mod coordinator;
pub mod paths;

pub use coordinator::{DownloadCoordinator, DownloadedEntry};
pub use paths::{
    media_location, product_directory, staged_file_path, update_directory, MediaLocation, ENC_ROOT,
};
