//! Translation of native status codes and terminal results into `LdapError`

use super::native::{NativeHandle, NativeStatus, LDAP_SUCCESS};
use crate::domain::{OperationKind, ResultCode, ResultStatus};
use crate::error::{LdapError, LdapResult};
use std::collections::BTreeMap;

/// Fail with a `Call` error when a native call did not return success.
///
/// `context` is attached to the error as-is (host/port for connect
/// failures, DN or message id for operation calls).
pub fn check<H: NativeHandle + ?Sized>(
    handle: &H,
    status: NativeStatus,
    operation: &str,
    context: &[(&str, String)],
) -> LdapResult<()> {
    if status == LDAP_SUCCESS {
        return Ok(());
    }
    Err(call_error(handle, status, operation, context))
}

/// Build the `Call` error for a failed native call
pub fn call_error<H: NativeHandle + ?Sized>(
    handle: &H,
    status: NativeStatus,
    operation: &str,
    context: &[(&str, String)],
) -> LdapError {
    let message = handle.error_string(status);
    let context: BTreeMap<String, String> = context
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    tracing::error!(
        operation = operation,
        code = status,
        message = %message,
        context = ?context,
        "Native LDAP call failed"
    );
    LdapError::Call {
        operation: operation.to_string(),
        code: ResultCode(status),
        message,
        context,
    }
}

/// Parse the terminal result message of an operation and validate its code.
///
/// Success is always accepted; `accepted` lists further codes that are
/// outcomes rather than failures for this operation (compareTrue and
/// compareFalse for a compare). Any other code becomes a `Result` error
/// carrying the server's matched DN and diagnostic text.
pub fn parse_terminal_result<H: NativeHandle>(
    handle: &mut H,
    message: &H::Message,
    operation: OperationKind,
    accepted: &[ResultCode],
) -> LdapResult<ResultStatus> {
    let status = handle.parse_result(message).map_err(|code| {
        call_error(
            &*handle,
            code,
            "ldap_parse_result",
            &[("operation", operation.to_string())],
        )
    })?;

    if status.code.is_success() || accepted.contains(&status.code) {
        tracing::debug!(operation = %operation, code = %status.code, "Operation completed");
        return Ok(status);
    }

    tracing::warn!(
        operation = %operation,
        code = %status.code,
        matched_dn = %status.matched_dn,
        diagnostic = %status.diagnostic,
        "Server reported failure"
    );
    Err(LdapError::Result {
        operation,
        code: status.code,
        matched_dn: status.matched_dn,
        diagnostic: status.diagnostic,
    })
}
