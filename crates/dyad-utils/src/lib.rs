pub mod file_utils;
pub mod key;
pub mod murmur3;
pub mod path_utils;

pub use file_utils::{
    create_directory_tree, read_whole_file, write_file_atomic, write_whole_file, STAGING_DIR_MODE,
};
pub use key::{derive_key, DEFAULT_KEY_BINS, DEFAULT_KEY_DEPTH};
pub use path_utils::{managed_relative_path, normalize_path, resolve_under_root};
