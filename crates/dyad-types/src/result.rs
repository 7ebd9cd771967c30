use crate::status::Status;
use crate::status_code::status_code_t;

/// The standard result type used across the workspace, with `Status` as the error.
pub type Result<T> = std::result::Result<T, Status>;

pub fn make_error<T>(code: status_code_t) -> Result<T> {
    Err(Status::new(code))
}

pub fn make_error_msg<T>(code: status_code_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::{DyadCode, StatusCode};

    #[test]
    fn test_make_error() {
        let r: Result<u32> = make_error(DyadCode::NOT_FOUND);
        assert_eq!(r.unwrap_err().code(), DyadCode::NOT_FOUND);
    }

    #[test]
    fn test_make_error_msg() {
        let r: Result<()> = make_error_msg(StatusCode::INVALID_ARG, "bad key depth");
        let err = r.unwrap_err();
        assert_eq!(err.code(), 3);
        assert_eq!(err.message(), Some("bad key depth"));
    }
}
