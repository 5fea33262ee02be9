pub mod download_utils;
pub mod path_utils;
