//! BPI abstraction layer endpoints (subjects, subject accounts, BPI
//! accounts, raw protocol messages); not implemented by this proxy.

use crate::error::{ApiError, ApiResult};

pub async fn unimplemented_handler() -> ApiResult<()> {
    Err(ApiError::Unimplemented)
}
