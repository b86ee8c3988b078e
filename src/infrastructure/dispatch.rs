//! Mapping of directory requests onto native initiating calls
//!
//! Every request kind starts an asynchronous native operation and yields the
//! message id the polling loop waits on, together with the handler that knows
//! how to read that operation's results.

use super::handlers::{CompareHandler, ResponseHandler, SearchHandler, StatusHandler};
use super::marshal::{ModificationList, StringArray};
use super::native::{MessageId, NativeHandle, NativeStatus, SearchParams, LDAP_NOT_SUPPORTED};
use super::translate::check;
use crate::domain::{DirectoryRequest, OperationKind};
use crate::error::{LdapError, LdapResult};
use std::ffi::CString;
use std::os::raw::c_int;

/// An operation accepted by the native library, waiting for its results
pub struct Dispatched<H: NativeHandle> {
    pub message_id: MessageId,
    pub handler: Box<dyn ResponseHandler<H>>,
}

impl<H: NativeHandle> std::fmt::Debug for Dispatched<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("message_id", &self.message_id)
            .field("operation", &self.handler.operation())
            .finish()
    }
}

fn c_string(kind: OperationKind, field: &str, value: &str) -> LdapResult<CString> {
    CString::new(value).map_err(|_| {
        LdapError::InvalidRequest(format!("{}: {} contains a NUL byte", kind, field))
    })
}

/// Turn the status of an initiating call into the message id it produced
fn initiated<H: NativeHandle>(
    handle: &H,
    status: NativeStatus,
    msgid: c_int,
    kind: OperationKind,
    call: &str,
    dn: &str,
) -> LdapResult<MessageId> {
    if status == LDAP_NOT_SUPPORTED {
        return Err(LdapError::UnsupportedOperation(format!(
            "{} is not supported by the native library",
            kind
        )));
    }
    check(handle, status, call, &[("dn", dn.to_string())])?;
    tracing::debug!(operation = %kind, dn = dn, message_id = msgid, "Operation dispatched");
    Ok(MessageId(msgid))
}

/// Issue the native call for `request` and select its response handler.
///
/// A non-success initiation status is returned as an error straight away;
/// nothing is left outstanding on the handle in that case.
pub fn dispatch<H: NativeHandle>(
    handle: &mut H,
    request: &DirectoryRequest,
) -> LdapResult<Dispatched<H>> {
    let kind = request.kind();
    let mut msgid: c_int = -1;

    match request {
        DirectoryRequest::Search(search) => {
            let base = c_string(kind, "base dn", &search.base_dn)?;
            let filter = c_string(kind, "filter", &search.filter)?;
            let attributes = if search.attributes.is_empty() {
                None
            } else {
                Some(StringArray::new(&handle.heap(), &search.attributes)?)
            };
            let params = SearchParams {
                base: &base,
                scope: search.scope.to_native(),
                filter: &filter,
                attributes: attributes.as_ref(),
                attrs_only: search.types_only,
                time_limit: search.time_limit,
                size_limit: search.size_limit,
            };
            tracing::debug!(
                base_dn = %search.base_dn,
                filter = %search.filter,
                scope = ?search.scope,
                "Starting LDAP search"
            );
            let status = handle.search_ext(&params, &mut msgid);
            let message_id =
                initiated(&*handle, status, msgid, kind, "ldap_search_ext", &search.base_dn)?;
            Ok(Dispatched {
                message_id,
                handler: Box::new(SearchHandler::new()),
            })
        }
        DirectoryRequest::Add(add) => {
            let dn = c_string(kind, "dn", &add.dn)?;
            let status = {
                let mods = ModificationList::from_attributes(&add.attributes, handle.heap())?;
                handle.add_ext(&dn, &mods, &mut msgid)
            };
            let message_id = initiated(&*handle, status, msgid, kind, "ldap_add_ext", &add.dn)?;
            Ok(Dispatched {
                message_id,
                handler: Box::new(StatusHandler::new(kind)?),
            })
        }
        DirectoryRequest::Modify(modify) => {
            let dn = c_string(kind, "dn", &modify.dn)?;
            let status = {
                let mods =
                    ModificationList::from_modifications(&modify.modifications, handle.heap())?;
                handle.modify_ext(&dn, &mods, &mut msgid)
            };
            let message_id =
                initiated(&*handle, status, msgid, kind, "ldap_modify_ext", &modify.dn)?;
            Ok(Dispatched {
                message_id,
                handler: Box::new(StatusHandler::new(kind)?),
            })
        }
        DirectoryRequest::Delete(delete) => {
            let dn = c_string(kind, "dn", &delete.dn)?;
            let status = handle.delete_ext(&dn, &mut msgid);
            let message_id =
                initiated(&*handle, status, msgid, kind, "ldap_delete_ext", &delete.dn)?;
            Ok(Dispatched {
                message_id,
                handler: Box::new(StatusHandler::new(kind)?),
            })
        }
        DirectoryRequest::Rename(rename) => {
            let dn = c_string(kind, "dn", &rename.dn)?;
            let new_rdn = c_string(kind, "new rdn", &rename.new_rdn)?;
            let new_superior = rename
                .new_superior
                .as_deref()
                .map(|parent| c_string(kind, "new superior", parent))
                .transpose()?;
            let status = handle.rename(
                &dn,
                &new_rdn,
                new_superior.as_deref(),
                rename.delete_old_rdn,
                &mut msgid,
            );
            let message_id = initiated(&*handle, status, msgid, kind, "ldap_rename", &rename.dn)?;
            Ok(Dispatched {
                message_id,
                handler: Box::new(StatusHandler::new(kind)?),
            })
        }
        DirectoryRequest::Compare(compare) => {
            let dn = c_string(kind, "dn", &compare.dn)?;
            let attribute = c_string(kind, "attribute", &compare.attribute)?;
            let status =
                handle.compare_ext(&dn, &attribute, compare.value.as_bytes(), &mut msgid);
            let message_id =
                initiated(&*handle, status, msgid, kind, "ldap_compare_ext", &compare.dn)?;
            Ok(Dispatched {
                message_id,
                handler: Box::new(CompareHandler),
            })
        }
    }
}
