#[allow(non_snake_case)]
pub mod status_code;

pub mod status;
pub mod result;

#[macro_use]
pub mod strong_type;

pub mod ids;
pub mod address;

pub use address::{Address, AddressParseError, AddressType, ADDRESS_BYTES};
pub use ids::*;
pub use result::{Result, make_error, make_error_msg};
pub use status::Status;
pub use status_code::*;
