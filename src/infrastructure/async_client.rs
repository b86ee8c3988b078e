//! Asynchronous surface over `LdapConnection`
//!
//! The blocking polling loop runs on tokio's blocking pool while the
//! connection is held through an owned mutex guard, so operations on one
//! connection never overlap. Dropping an operation's future cancels it: the
//! loop observes the cancellation at its next fetch and abandons the request.

use super::connection::LdapConnection;
use super::native::LdapLibrary;
use crate::config::ClientConfig;
use crate::domain::{
    AddRequest, BindCredentials, CompareRequest, DeleteRequest, DirectoryRequest,
    DirectoryResponse, ModifyRequest, OperationKind, RenameRequest, ResultStatus, SearchRequest,
    SearchResponse, SessionState,
};
use crate::error::{LdapError, LdapResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Cloneable async handle to one directory connection
pub struct AsyncLdapConnection<L: LdapLibrary> {
    inner: Arc<Mutex<LdapConnection<L>>>,
}

impl<L: LdapLibrary> Clone for AsyncLdapConnection<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn worker_error(e: JoinError) -> LdapError {
    tracing::error!(error = %e, "LDAP worker task failed");
    LdapError::Worker(format!("LDAP worker task failed: {}", e))
}

impl<L: LdapLibrary> AsyncLdapConnection<L> {
    /// Initialise a connection without blocking the calling task
    pub async fn connect(library: L, config: ClientConfig) -> LdapResult<Self> {
        let connection =
            tokio::task::spawn_blocking(move || LdapConnection::connect(library, config))
                .await
                .map_err(worker_error)??;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: LdapConnection<L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(connection)),
        }
    }

    /// Run `f` on the blocking pool with exclusive access to the connection
    async fn run<T, F>(&self, f: F) -> LdapResult<T>
    where
        F: FnOnce(&mut LdapConnection<L>) -> LdapResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut connection = Arc::clone(&self.inner).lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut *connection))
            .await
            .map_err(worker_error)?
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state()
    }

    pub async fn bind(&self, credentials: BindCredentials) -> LdapResult<()> {
        self.run(move |connection| connection.bind(&credentials)).await
    }

    /// Run one operation to completion.
    ///
    /// Cancelling `cancel`, or dropping the returned future, stops the wait
    /// for further results and abandons the request on the server.
    pub async fn execute(
        &self,
        request: DirectoryRequest,
        cancel: CancellationToken,
    ) -> LdapResult<DirectoryResponse> {
        let token = cancel.child_token();
        let _cancel_on_drop = token.clone().drop_guard();
        self.run(move |connection| connection.execute(&request, &token))
            .await
    }

    pub async fn search(
        &self,
        request: SearchRequest,
        cancel: CancellationToken,
    ) -> LdapResult<SearchResponse> {
        self.execute(request.into(), cancel)
            .await?
            .into_search()
            .ok_or_else(|| mismatched(OperationKind::Search))
    }

    pub async fn add(
        &self,
        request: AddRequest,
        cancel: CancellationToken,
    ) -> LdapResult<ResultStatus> {
        self.run_status(request.into(), cancel).await
    }

    pub async fn modify(
        &self,
        request: ModifyRequest,
        cancel: CancellationToken,
    ) -> LdapResult<ResultStatus> {
        self.run_status(request.into(), cancel).await
    }

    pub async fn delete(
        &self,
        request: DeleteRequest,
        cancel: CancellationToken,
    ) -> LdapResult<ResultStatus> {
        self.run_status(request.into(), cancel).await
    }

    pub async fn rename(
        &self,
        request: RenameRequest,
        cancel: CancellationToken,
    ) -> LdapResult<ResultStatus> {
        self.run_status(request.into(), cancel).await
    }

    pub async fn compare(
        &self,
        request: CompareRequest,
        cancel: CancellationToken,
    ) -> LdapResult<bool> {
        self.execute(request.into(), cancel)
            .await?
            .into_compare()
            .map(|c| c.matched)
            .ok_or_else(|| mismatched(OperationKind::Compare))
    }

    async fn run_status(
        &self,
        request: DirectoryRequest,
        cancel: CancellationToken,
    ) -> LdapResult<ResultStatus> {
        let response = self.execute(request, cancel).await?;
        Ok(response.status().clone())
    }

    /// Release the native handle once any running operation has finished
    pub async fn unbind(&self) -> LdapResult<()> {
        self.run(|connection| connection.unbind()).await
    }
}

fn mismatched(operation: OperationKind) -> LdapError {
    LdapError::UnsupportedOperation(format!("{} produced a response of another kind", operation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Modification, ResultCode, SearchScope};
    use crate::infrastructure::mock::{Delivery, MockLibrary};
    use crate::infrastructure::native::ResultKind;
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig {
            poll_interval_ms: 5,
            ..ClientConfig::new("ldap.example.com", 389)
        }
    }

    async fn bound(library: &MockLibrary) -> AsyncLdapConnection<MockLibrary> {
        let connection = AsyncLdapConnection::connect(library.clone(), config())
            .await
            .unwrap();
        connection
            .bind(BindCredentials::simple("cn=admin,dc=example,dc=com", "secret"))
            .await
            .unwrap();
        connection
    }

    #[tokio::test]
    async fn test_search_on_worker() {
        let library = MockLibrary::new();
        let connection = bound(&library).await;
        library.script([
            Delivery::entry("uid=a,dc=example,dc=com", &[("uid", "a")]),
            Delivery::entry("uid=b,dc=example,dc=com", &[("uid", "b")]),
            Delivery::success(ResultKind::SearchResult),
        ]);

        let response = connection
            .search(
                SearchRequest::new("dc=example,dc=com", "(uid=*)", SearchScope::Subtree),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let uids: Vec<_> = response
            .entries
            .iter()
            .filter_map(|e| e.get("uid").cloned())
            .collect();
        assert_eq!(uids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let library = MockLibrary::new();
        let connection = bound(&library).await;
        let calls = library.state().native_calls();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = connection
            .delete(DeleteRequest::new("uid=a,dc=example,dc=com"), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LdapError::Cancelled { message_id: None, .. }));
        assert_eq!(library.state().native_calls(), calls);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let library = MockLibrary::new();
        let connection = bound(&library).await;
        let cancel = CancellationToken::new();

        let task = {
            let connection = connection.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                connection
                    .modify(
                        ModifyRequest::new(
                            "uid=a,dc=example,dc=com",
                            vec![Modification::replace("cn", ["A"])],
                        ),
                        cancel,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, LdapError::Cancelled { message_id: Some(1), .. }));
        assert_eq!(library.state().abandoned, [1]);
        assert_eq!(connection.state().await, SessionState::Bound);
    }

    #[tokio::test]
    async fn test_dropped_future_abandons_request() {
        let library = MockLibrary::new();
        let connection = bound(&library).await;

        let pending = connection.delete(
            DeleteRequest::new("uid=a,dc=example,dc=com"),
            CancellationToken::new(),
        );
        let outcome = tokio::time::timeout(Duration::from_millis(30), pending).await;
        assert!(outcome.is_err());

        // The lock is released once the worker has observed the cancellation
        assert_eq!(connection.state().await, SessionState::Bound);
        assert_eq!(library.state().abandoned, [1]);
    }

    #[tokio::test]
    async fn test_operations_are_serialized() {
        let library = MockLibrary::new();
        let connection = bound(&library).await;
        library.script([
            Delivery::success(ResultKind::Delete),
            Delivery::success(ResultKind::Delete),
        ]);

        let (first, second) = tokio::join!(
            connection.delete(DeleteRequest::new("uid=a,dc=example,dc=com"), CancellationToken::new()),
            connection.delete(DeleteRequest::new("uid=b,dc=example,dc=com"), CancellationToken::new()),
        );
        assert!(first.unwrap().code.is_success());
        assert!(second.unwrap().code.is_success());
        assert_eq!(library.state().fetches, 2);
    }

    #[tokio::test]
    async fn test_compare_and_unbind() {
        let library = MockLibrary::new();
        let connection = bound(&library).await;
        library.script([Delivery::Terminal(
            ResultKind::Compare,
            ResultStatus::with_code(ResultCode::COMPARE_TRUE),
        )]);

        let matched = connection
            .compare(
                CompareRequest::new("uid=a,dc=example,dc=com", "uid", "a"),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matched);

        connection.unbind().await.unwrap();
        assert_eq!(connection.state().await, SessionState::Disposed);
        assert_eq!(library.state().unbinds, 1);
    }
}
