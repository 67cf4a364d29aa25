//! Status-code checking for accelerator calls.
//!
//! Every raw accelerator call returns a signed status where zero is success.
//! Failures carry the exact call name and the library's own description so a
//! log line is enough to diagnose a driver-side problem.

use matte_core::{MatteError, Result};

use crate::api::AcceleratorApi;

/// Status value returned by a successful accelerator call.
pub const STATUS_SUCCESS: i32 = 0;

/// Map a resource-layer status (image alloc, map, transfer) to a
/// [`MatteError::Resource`].
pub fn check_resource(api: &dyn AcceleratorApi, code: i32, call: &'static str) -> Result<()> {
    if code == STATUS_SUCCESS {
        Ok(())
    } else {
        Err(MatteError::Resource {
            call,
            code,
            detail: api.error_string(code),
        })
    }
}

/// Map an effect-layer status (create, load, run) to a
/// [`MatteError::Provider`].
pub fn check_provider(api: &dyn AcceleratorApi, code: i32, call: &'static str) -> Result<()> {
    if code == STATUS_SUCCESS {
        Ok(())
    } else {
        Err(MatteError::Provider {
            call,
            code,
            detail: api.error_string(code),
        })
    }
}
