//! Per-operation interpretation of result messages
//!
//! A search receives any number of entry and reference messages before its
//! terminal result; the mutating operations receive exactly one terminal
//! message of their own type. Each kind gets its own handler so those
//! vocabularies stay separate.

use super::native::{NativeHandle, ResultKind};
use super::translate::{call_error, parse_terminal_result};
use crate::domain::{
    CompareResponse, DirectoryResponse, OperationKind, ResultCode, SearchEntry, SearchResponse,
};
use crate::error::{LdapError, LdapResult};

/// Progress of an operation after one result message
#[derive(Debug)]
pub enum Completion {
    InProgress,
    Complete(DirectoryResponse),
    /// The message type means nothing to this operation
    Unknown,
}

pub trait ResponseHandler<H: NativeHandle> {
    fn operation(&self) -> OperationKind;

    /// Interpret one result message.
    ///
    /// The message is released by the caller after this returns, so a
    /// terminal message must be parsed here.
    fn handle(
        &mut self,
        handle: &mut H,
        message: &H::Message,
        kind: ResultKind,
    ) -> LdapResult<Completion>;
}

/// Accumulates entries until the search's terminal result
#[derive(Debug, Default)]
pub struct SearchHandler {
    entries: Vec<SearchEntry>,
    references: Vec<String>,
}

/// Progress logging interval for large result sets
const LOG_INTERVAL: usize = 5000;

impl SearchHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<H: NativeHandle> ResponseHandler<H> for SearchHandler {
    fn operation(&self) -> OperationKind {
        OperationKind::Search
    }

    fn handle(
        &mut self,
        handle: &mut H,
        message: &H::Message,
        kind: ResultKind,
    ) -> LdapResult<Completion> {
        match kind {
            ResultKind::SearchEntry => {
                let entry = handle
                    .decode_entry(message)
                    .map_err(|code| call_error(&*handle, code, "decode_entry", &[]))?;
                tracing::trace!(dn = %entry.dn, "Search entry received");
                self.entries.push(entry);
                if self.entries.len() % LOG_INTERVAL == 0 {
                    tracing::info!(
                        entries = self.entries.len(),
                        "Search in progress (large result set)..."
                    );
                }
                Ok(Completion::InProgress)
            }
            ResultKind::SearchReference => {
                let urls = handle
                    .decode_reference(message)
                    .map_err(|code| call_error(&*handle, code, "decode_reference", &[]))?;
                tracing::debug!(references = ?urls, "Search continuation reference received");
                self.references.extend(urls);
                Ok(Completion::InProgress)
            }
            ResultKind::SearchResult => {
                let status =
                    parse_terminal_result(handle, message, OperationKind::Search, &[])?;
                tracing::debug!(entries = self.entries.len(), "Search completed");
                Ok(Completion::Complete(DirectoryResponse::Search(SearchResponse {
                    entries: std::mem::take(&mut self.entries),
                    references: std::mem::take(&mut self.references),
                    status,
                })))
            }
            _ => Ok(Completion::Unknown),
        }
    }
}

/// Single terminal result of an add, modify, delete or rename
#[derive(Debug)]
pub struct StatusHandler {
    operation: OperationKind,
    expected: ResultKind,
}

impl StatusHandler {
    /// Handler for a status-only operation. Fails for search and compare.
    pub fn new(operation: OperationKind) -> LdapResult<Self> {
        let expected = match operation {
            OperationKind::Add => ResultKind::Add,
            OperationKind::Modify => ResultKind::Modify,
            OperationKind::Delete => ResultKind::Delete,
            OperationKind::Rename => ResultKind::ModDn,
            OperationKind::Search | OperationKind::Compare => {
                return Err(LdapError::UnsupportedOperation(format!(
                    "{} does not produce a status-only response",
                    operation
                )))
            }
        };
        Ok(Self {
            operation,
            expected,
        })
    }
}

impl<H: NativeHandle> ResponseHandler<H> for StatusHandler {
    fn operation(&self) -> OperationKind {
        self.operation
    }

    fn handle(
        &mut self,
        handle: &mut H,
        message: &H::Message,
        kind: ResultKind,
    ) -> LdapResult<Completion> {
        if kind != self.expected {
            return Ok(Completion::Unknown);
        }
        let status = parse_terminal_result(handle, message, self.operation, &[])?;
        let response = DirectoryResponse::status_only(self.operation, status)
            .ok_or_else(|| LdapError::UnsupportedOperation(self.operation.to_string()))?;
        Ok(Completion::Complete(response))
    }
}

/// Terminal result of a compare; compareTrue and compareFalse are outcomes
#[derive(Debug, Default)]
pub struct CompareHandler;

impl<H: NativeHandle> ResponseHandler<H> for CompareHandler {
    fn operation(&self) -> OperationKind {
        OperationKind::Compare
    }

    fn handle(
        &mut self,
        handle: &mut H,
        message: &H::Message,
        kind: ResultKind,
    ) -> LdapResult<Completion> {
        if kind != ResultKind::Compare {
            return Ok(Completion::Unknown);
        }
        let status = parse_terminal_result(
            handle,
            message,
            OperationKind::Compare,
            &[ResultCode::COMPARE_TRUE, ResultCode::COMPARE_FALSE],
        )?;
        let matched = status.code == ResultCode::COMPARE_TRUE;
        Ok(Completion::Complete(DirectoryResponse::Compare(
            CompareResponse { matched, status },
        )))
    }
}
