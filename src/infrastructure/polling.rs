//! Result polling loop
//!
//! Drains the handle's result queue for one message id, feeding each message
//! to the operation's handler until it reports completion. Waits are sliced
//! into `interval`-sized fetches so a cancellation request is noticed
//! between them.

use super::handlers::{Completion, ResponseHandler};
use super::native::{FetchOutcome, MessageId, NativeHandle, LDAP_SUCCESS};
use super::translate::call_error;
use crate::domain::{DirectoryResponse, OperationKind};
use crate::error::{LdapError, LdapResult};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Wait budget of one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Overall limit; `None` waits until the operation completes
    pub timeout: Option<Duration>,
    /// Longest single fetch
    pub interval: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            timeout: None,
            interval: Duration::from_millis(250),
        }
    }
}

/// Tell the server to stop working on `message_id`. Failures are logged only;
/// the caller is already reporting a more relevant error.
fn abandon<H: NativeHandle>(handle: &mut H, message_id: MessageId, operation: OperationKind) {
    let status = handle.abandon(message_id);
    if status == LDAP_SUCCESS {
        tracing::debug!(operation = %operation, message_id = message_id.0, "Abandoned operation");
    } else {
        tracing::warn!(
            operation = %operation,
            message_id = message_id.0,
            error = %handle.error_string(status),
            "Failed to abandon operation"
        );
    }
}

/// Poll results for `message_id` until `handler` completes the operation.
///
/// Cancellation is checked before every fetch: once it is observed the
/// outstanding operation is abandoned and `LdapError::Cancelled` returned,
/// without handing any further message to the handler.
pub fn poll<H: NativeHandle>(
    handle: &mut H,
    message_id: MessageId,
    handler: &mut dyn ResponseHandler<H>,
    cancel: &CancellationToken,
    timing: PollTiming,
) -> LdapResult<DirectoryResponse> {
    let operation = handler.operation();
    let started = Instant::now();
    let mut received = 0usize;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(
                operation = %operation,
                message_id = message_id.0,
                received = received,
                "Operation cancelled"
            );
            abandon(handle, message_id, operation);
            return Err(LdapError::Cancelled {
                operation,
                message_id: Some(message_id.0),
            });
        }

        let wait = match timing.timeout {
            Some(limit) => {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    tracing::warn!(
                        operation = %operation,
                        message_id = message_id.0,
                        waited_ms = elapsed.as_millis() as u64,
                        "Operation timed out"
                    );
                    abandon(handle, message_id, operation);
                    return Err(LdapError::Timeout {
                        operation,
                        waited: elapsed,
                    });
                }
                (limit - elapsed).min(timing.interval)
            }
            None => timing.interval,
        };

        match handle.result(message_id, false, Some(wait)) {
            FetchOutcome::Failed(code) => {
                return Err(call_error(
                    &*handle,
                    code,
                    "ldap_result",
                    &[
                        ("operation", operation.to_string()),
                        ("message_id", message_id.to_string()),
                    ],
                ));
            }
            FetchOutcome::TimedOut => {
                tracing::trace!(message_id = message_id.0, "No result yet");
            }
            FetchOutcome::Received(kind, message) => {
                received += 1;
                tracing::trace!(message_id = message_id.0, kind = ?kind, "Result received");
                let completion = match handler.handle(handle, &message, kind) {
                    Ok(completion) => completion,
                    Err(e) => {
                        // The server may still be sending results for this id
                        if !kind.is_final() {
                            abandon(handle, message_id, operation);
                        }
                        return Err(e);
                    }
                };
                match completion {
                    Completion::InProgress => {}
                    Completion::Complete(response) => {
                        tracing::debug!(
                            operation = %operation,
                            message_id = message_id.0,
                            messages = received,
                            "Operation complete"
                        );
                        return Ok(response);
                    }
                    Completion::Unknown => {
                        tracing::error!(
                            operation = %operation,
                            message_id = message_id.0,
                            kind = ?kind,
                            "Unexpected result type"
                        );
                        abandon(handle, message_id, operation);
                        return Err(LdapError::UnexpectedResult {
                            operation,
                            result_type: kind.to_native(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResultCode, ResultStatus};
    use crate::infrastructure::handlers::{SearchHandler, StatusHandler};
    use crate::infrastructure::mock::{Delivery, MockHandle, MockLibrary};
    use crate::infrastructure::native::{LdapLibrary, ResultKind};

    fn timing() -> PollTiming {
        PollTiming {
            timeout: Some(Duration::from_secs(5)),
            interval: Duration::from_millis(10),
        }
    }

    fn handle(library: &MockLibrary) -> MockHandle {
        library.initialize("localhost", 389).unwrap()
    }

    #[test]
    fn test_search_entries_in_delivery_order() {
        let library = MockLibrary::new();
        let dns: Vec<String> = (0..5).map(|i| format!("uid=u{},dc=example,dc=com", i)).collect();
        library.script(dns.iter().map(|dn| Delivery::entry(dn, &[("uid", "x")])));
        library.script([Delivery::success(ResultKind::SearchResult)]);

        let mut handle = handle(&library);
        let mut handler = SearchHandler::new();
        let response = poll(
            &mut handle,
            MessageId(1),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap();

        let search = response.into_search().unwrap();
        let got: Vec<_> = search.entries.iter().map(|e| e.dn.clone()).collect();
        assert_eq!(got, dns);
        assert_eq!(library.state().fetches, 6);
        assert_eq!(library.messages_live(), 0);
    }

    #[test]
    fn test_status_operation_fetches_once() {
        let library = MockLibrary::new();
        library.script([Delivery::success(ResultKind::Delete)]);
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Delete).unwrap();

        let response = poll(
            &mut handle,
            MessageId(7),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap();
        assert_eq!(response.kind(), OperationKind::Delete);
        assert_eq!(library.state().fetches, 1);
    }

    #[test]
    fn test_cancel_before_first_fetch() {
        let library = MockLibrary::new();
        library.script([Delivery::success(ResultKind::Modify)]);
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Modify).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poll(&mut handle, MessageId(3), &mut handler, &cancel, timing()).unwrap_err();
        assert!(matches!(
            err,
            LdapError::Cancelled {
                operation: OperationKind::Modify,
                message_id: Some(3)
            }
        ));
        let state = library.state();
        assert_eq!(state.fetches, 0);
        assert!(!state.calls.contains(&"parse_result"));
        assert_eq!(state.abandoned, [3]);
    }

    #[test]
    fn test_cancel_mid_search_stops_fetching() {
        let library = MockLibrary::new();
        let cancel = CancellationToken::new();
        library.state().cancel_after = Some((2, cancel.clone()));
        library.script([
            Delivery::entry("uid=a,dc=example,dc=com", &[]),
            Delivery::entry("uid=b,dc=example,dc=com", &[]),
            Delivery::entry("uid=c,dc=example,dc=com", &[]),
            Delivery::success(ResultKind::SearchResult),
        ]);
        let mut handle = handle(&library);
        let mut handler = SearchHandler::new();

        let err = poll(&mut handle, MessageId(1), &mut handler, &cancel, timing()).unwrap_err();
        assert!(matches!(err, LdapError::Cancelled { .. }));
        let state = library.state();
        assert_eq!(state.fetches, 2);
        assert_eq!(state.script.len(), 2);
        assert_eq!(state.abandoned, [1]);
    }

    #[test]
    fn test_timeout_abandons() {
        let library = MockLibrary::new();
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Add).unwrap();
        let timing = PollTiming {
            timeout: Some(Duration::from_millis(30)),
            interval: Duration::from_millis(5),
        };

        let err = poll(
            &mut handle,
            MessageId(4),
            &mut handler,
            &CancellationToken::new(),
            timing,
        )
        .unwrap_err();
        match err {
            LdapError::Timeout { operation, waited } => {
                assert_eq!(operation, OperationKind::Add);
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let state = library.state();
        assert_eq!(state.abandoned, [4]);
        assert!(state
            .fetch_timeouts
            .iter()
            .all(|t| t.map_or(false, |t| t <= Duration::from_millis(5))));
    }

    #[test]
    fn test_idle_fetches_keep_polling() {
        let library = MockLibrary::new();
        library.script([
            Delivery::Timeout,
            Delivery::Timeout,
            Delivery::success(ResultKind::Add),
        ]);
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Add).unwrap();

        let response = poll(
            &mut handle,
            MessageId(1),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap();
        assert!(response.status().code.is_success());
        assert_eq!(library.state().fetches, 3);
    }

    #[test]
    fn test_fetch_failure_is_call_error() {
        let library = MockLibrary::new();
        library.script([Delivery::Fail(-1)]);
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Rename).unwrap();

        let err = poll(
            &mut handle,
            MessageId(9),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap_err();
        match err {
            LdapError::Call { operation, code, context, .. } => {
                assert_eq!(operation, "ldap_result");
                assert_eq!(code, ResultCode::SERVER_DOWN);
                assert_eq!(context["message_id"], "9");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_foreign_result_type_is_unexpected() {
        let library = MockLibrary::new();
        library.script([Delivery::Bare(ResultKind::Extended)]);
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Modify).unwrap();

        let err = poll(
            &mut handle,
            MessageId(1),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LdapError::UnexpectedResult {
                operation: OperationKind::Modify,
                result_type: 0x78
            }
        ));
        assert_eq!(library.messages_live(), 0);
        assert_eq!(library.state().abandoned, [1]);
    }

    #[test]
    fn test_intermediate_mid_search_abandons() {
        let library = MockLibrary::new();
        library.script([
            Delivery::entry("uid=a,dc=example,dc=com", &[]),
            Delivery::Bare(ResultKind::Intermediate),
            Delivery::entry("uid=b,dc=example,dc=com", &[]),
            Delivery::success(ResultKind::SearchResult),
        ]);
        let mut handle = handle(&library);
        let mut handler = SearchHandler::new();

        let err = poll(
            &mut handle,
            MessageId(1),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LdapError::UnexpectedResult {
                operation: OperationKind::Search,
                result_type: 0x79
            }
        ));
        let state = library.state();
        assert_eq!(state.abandoned, [1]);
        assert_eq!(state.script.len(), 2);
    }

    #[test]
    fn test_undecodable_entry_abandons_search() {
        let library = MockLibrary::new();
        // A search result message delivered as an entry cannot be decoded
        library.script([
            Delivery::entry("uid=a,dc=example,dc=com", &[]),
            Delivery::Terminal(ResultKind::SearchEntry, ResultStatus::success()),
            Delivery::success(ResultKind::SearchResult),
        ]);
        let mut handle = handle(&library);
        let mut handler = SearchHandler::new();

        let err = poll(
            &mut handle,
            MessageId(2),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap_err();
        match err {
            LdapError::Call { operation, .. } => assert_eq!(operation, "decode_entry"),
            other => panic!("unexpected error: {:?}", other),
        }
        let state = library.state();
        assert_eq!(state.abandoned, [2]);
        assert_eq!(state.script.len(), 1);
        drop(state);
        assert_eq!(library.messages_live(), 0);
    }

    #[test]
    fn test_server_error_does_not_abandon() {
        let library = MockLibrary::new();
        library.script([Delivery::failure(
            ResultKind::Delete,
            ResultCode::NO_SUCH_OBJECT,
            "dc=example,dc=com",
            "",
        )]);
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Delete).unwrap();

        let err = poll(
            &mut handle,
            MessageId(5),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::NO_SUCH_OBJECT));
        assert!(library.state().abandoned.is_empty());
    }

    #[test]
    fn test_server_error_surfaces_texts() {
        let library = MockLibrary::new();
        library.script([Delivery::Terminal(
            ResultKind::Add,
            ResultStatus {
                code: ResultCode::INSUFFICIENT_ACCESS_RIGHTS,
                matched_dn: String::new(),
                diagnostic: "no write access to parent".into(),
                referrals: Vec::new(),
            },
        )]);
        let mut handle = handle(&library);
        let mut handler = StatusHandler::new(OperationKind::Add).unwrap();

        let err = poll(
            &mut handle,
            MessageId(1),
            &mut handler,
            &CancellationToken::new(),
            timing(),
        )
        .unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::INSUFFICIENT_ACCESS_RIGHTS));
        assert!(err.to_string().contains("no write access to parent"));
    }
}
