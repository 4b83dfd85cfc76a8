//! Verifiable test double for [`CoreStorage`] and [`TokenRevocationStorage`].
//!
//! The mock records every call and answers from pre-programmed expectations.
//! A call that matches no expectation fails the test immediately, and
//! [`MockCoreStorage::verify`] (also run on drop) fails the test if an
//! expectation was not met the configured number of times.
//!
//! # Example
//!
//! ```ignore
//! use latchkey_store::mock::{MockCoreStorage, eq};
//! use latchkey_store::{StoreError, TokenKind};
//!
//! let storage = MockCoreStorage::new();
//! storage
//!     .expect_get_session()
//!     .kind(TokenKind::AuthorizeCode)
//!     .signature(eq("abc123"))
//!     .returns(requester.clone());
//! storage
//!     .expect_delete_session()
//!     .kind(TokenKind::AuthorizeCode)
//!     .returns_err(StoreError::not_found(TokenKind::AuthorizeCode));
//!
//! exchange_code(&storage, "abc123").await;
//! storage.verify();
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{StoreError, StoreResult};
use crate::kind::TokenKind;
use crate::requester::Requester;
use crate::storage::{CoreStorage, TokenRevocationStorage};

/// Operations the mock can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSession,
    GetSession,
    DeleteSession,
    RevokeByRequestId,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateSession => write!(f, "create_session"),
            Self::GetSession => write!(f, "get_session"),
            Self::DeleteSession => write!(f, "delete_session"),
            Self::RevokeByRequestId => write!(f, "revoke_by_request_id"),
        }
    }
}

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub kind: TokenKind,
    /// Empty for `RevokeByRequestId`.
    pub signature: String,
    /// Present for `CreateSession`.
    pub requester: Option<Requester<serde_json::Value>>,
    /// The requester's id for `CreateSession`, the argument for
    /// `RevokeByRequestId`.
    pub request_id: Option<Uuid>,
}

/// Argument matcher: wildcard, exact value, or predicate.
#[derive(Clone)]
pub enum Matcher<T> {
    Any,
    Eq(T),
    Predicate(Arc<dyn Fn(&T) -> bool + Send + Sync>),
}

impl<T: PartialEq> Matcher<T> {
    fn matches(&self, value: &T) -> bool {
        match self {
            Self::Any => true,
            Self::Eq(expected) => expected == value,
            Self::Predicate(f) => f(value),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Matcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Eq(v) => write!(f, "eq({v:?})"),
            Self::Predicate(_) => write!(f, "predicate"),
        }
    }
}

/// Matches any value.
#[must_use]
pub fn any<T>() -> Matcher<T> {
    Matcher::Any
}

/// Matches values equal to `value`.
#[must_use]
pub fn eq<T>(value: impl Into<T>) -> Matcher<T> {
    Matcher::Eq(value.into())
}

/// Matches values for which `f` returns `true`.
#[must_use]
pub fn predicate<T>(f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Matcher<T> {
    Matcher::Predicate(Arc::new(f))
}

/// How many times an expectation must be met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Exactly(usize),
    AtLeast(usize),
    AnyNumber,
}

impl Times {
    fn is_saturated(&self, calls: usize) -> bool {
        match self {
            Self::Exactly(n) => calls >= *n,
            Self::AtLeast(_) | Self::AnyNumber => false,
        }
    }

    fn is_satisfied(&self, calls: usize) -> bool {
        match self {
            Self::Exactly(n) => calls == *n,
            Self::AtLeast(n) => calls >= *n,
            Self::AnyNumber => true,
        }
    }
}

#[derive(Debug, Clone)]
enum Response {
    Done,
    Found(Requester<serde_json::Value>),
    Revoked(u64),
    Fail(StoreError),
}

#[derive(Debug)]
struct Expectation {
    operation: Operation,
    kind: Option<TokenKind>,
    signature: Matcher<String>,
    requester: Matcher<Requester<serde_json::Value>>,
    request_id: Matcher<Uuid>,
    times: Times,
    response: Response,
    calls: usize,
}

impl Expectation {
    fn matches(&self, call: &Call) -> bool {
        if self.operation != call.operation {
            return false;
        }
        if self.kind.is_some_and(|k| k != call.kind) {
            return false;
        }
        if !self.signature.matches(&call.signature) {
            return false;
        }
        if let Some(requester) = &call.requester
            && !self.requester.matches(requester)
        {
            return false;
        }
        if let Some(request_id) = &call.request_id
            && !self.request_id.matches(request_id)
        {
            return false;
        }
        true
    }
}

#[derive(Default)]
struct MockState {
    expectations: Vec<Expectation>,
    calls: Vec<Call>,
}

/// Mock token storage.
#[derive(Default)]
pub struct MockCoreStorage {
    state: Mutex<MockState>,
}

impl MockCoreStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_create_session(&self) -> ExpectationBuilder<'_> {
        ExpectationBuilder::new(self, Operation::CreateSession)
    }

    pub fn expect_get_session(&self) -> ExpectationBuilder<'_> {
        ExpectationBuilder::new(self, Operation::GetSession)
    }

    pub fn expect_delete_session(&self) -> ExpectationBuilder<'_> {
        ExpectationBuilder::new(self, Operation::DeleteSession)
    }

    pub fn expect_revoke_by_request_id(&self) -> ExpectationBuilder<'_> {
        ExpectationBuilder::new(self, Operation::RevokeByRequestId)
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of calls received for `operation`.
    #[must_use]
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Panics if any expectation was not met the configured number of times.
    pub fn verify(&self) {
        let unmet: Vec<String> = {
            let state = self.state.lock();
            state
                .expectations
                .iter()
                .filter(|e| !e.times.is_satisfied(e.calls))
                .map(|e| {
                    format!(
                        "{} kind={:?} signature={:?}: expected {:?}, got {}",
                        e.operation, e.kind, e.signature, e.times, e.calls
                    )
                })
                .collect()
        };
        if !unmet.is_empty() {
            panic!("unmet mock expectations:\n  {}", unmet.join("\n  "));
        }
    }

    /// Clears expectations and recorded calls without verifying.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.expectations.clear();
        state.calls.clear();
    }

    fn push(&self, expectation: Expectation) {
        self.state.lock().expectations.push(expectation);
    }

    fn dispatch(&self, call: Call) -> Response {
        let response = {
            let mut state = self.state.lock();
            state.calls.push(call.clone());
            state
                .expectations
                .iter_mut()
                .find(|e| e.matches(&call) && !e.times.is_saturated(e.calls))
                .map(|e| {
                    e.calls += 1;
                    e.response.clone()
                })
        };
        match response {
            Some(response) => response,
            None => panic!("unexpected mock call: {call:?}"),
        }
    }
}

impl Drop for MockCoreStorage {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.verify();
        }
    }
}

fn response_mismatch(operation: Operation, response: &Response) -> ! {
    panic!("mock response {response:?} does not fit operation {operation}")
}

/// Builder for one expectation. Finished by one of the `returns*` methods.
#[must_use = "an expectation is only registered by a returns* method"]
pub struct ExpectationBuilder<'a> {
    mock: &'a MockCoreStorage,
    expectation: Expectation,
}

impl<'a> ExpectationBuilder<'a> {
    fn new(mock: &'a MockCoreStorage, operation: Operation) -> Self {
        Self {
            mock,
            expectation: Expectation {
                operation,
                kind: None,
                signature: Matcher::Any,
                requester: Matcher::Any,
                request_id: Matcher::Any,
                times: Times::Exactly(1),
                response: Response::Done,
                calls: 0,
            },
        }
    }

    /// Restricts the expectation to one token kind (default: any kind).
    pub fn kind(mut self, kind: TokenKind) -> Self {
        self.expectation.kind = Some(kind);
        self
    }

    pub fn signature(mut self, matcher: Matcher<String>) -> Self {
        self.expectation.signature = matcher;
        self
    }

    /// Matches the payload-erased requester passed to `create_session`.
    ///
    /// # Panics
    ///
    /// Panics on any other operation.
    pub fn requester(mut self, matcher: Matcher<Requester<serde_json::Value>>) -> Self {
        if self.expectation.operation != Operation::CreateSession {
            panic!(
                "requester matcher does not apply to {}",
                self.expectation.operation
            );
        }
        self.expectation.requester = matcher;
        self
    }

    /// Matches the request id of a revocation, or of the requester passed to
    /// `create_session`.
    ///
    /// # Panics
    ///
    /// Panics for `get_session` and `delete_session`, which carry no request id.
    pub fn request_id(mut self, matcher: Matcher<Uuid>) -> Self {
        if matches!(
            self.expectation.operation,
            Operation::GetSession | Operation::DeleteSession
        ) {
            panic!(
                "request_id matcher does not apply to {}",
                self.expectation.operation
            );
        }
        self.expectation.request_id = matcher;
        self
    }

    /// Number of matching calls expected (default: exactly once).
    pub fn times(mut self, times: usize) -> Self {
        self.expectation.times = Times::Exactly(times);
        self
    }

    pub fn at_least(mut self, times: usize) -> Self {
        self.expectation.times = Times::AtLeast(times);
        self
    }

    pub fn any_number_of_times(mut self) -> Self {
        self.expectation.times = Times::AnyNumber;
        self
    }

    /// Succeeds (for create and delete).
    pub fn returns_ok(self) -> &'a MockCoreStorage {
        self.finish(Response::Done)
    }

    /// Returns `requester` from `get_session`.
    ///
    /// # Panics
    ///
    /// Panics if the payload cannot be encoded as JSON.
    pub fn returns<S: Serialize>(self, requester: Requester<S>) -> &'a MockCoreStorage {
        let stored = match requester.to_stored() {
            Ok(stored) => stored,
            Err(e) => panic!("mock requester does not serialize: {e}"),
        };
        self.finish(Response::Found(stored))
    }

    /// Returns `count` from `revoke_by_request_id`.
    pub fn returns_count(self, count: u64) -> &'a MockCoreStorage {
        self.finish(Response::Revoked(count))
    }

    /// Fails with `error`.
    pub fn returns_err(self, error: StoreError) -> &'a MockCoreStorage {
        self.finish(Response::Fail(error))
    }

    fn finish(mut self, response: Response) -> &'a MockCoreStorage {
        self.expectation.response = response;
        self.mock.push(self.expectation);
        self.mock
    }
}

#[async_trait]
impl CoreStorage for MockCoreStorage {
    async fn create_session<S>(
        &self,
        _ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
        requester: &Requester<S>,
    ) -> StoreResult<()>
    where
        S: Serialize + Send + Sync,
    {
        let stored = requester.to_stored()?;
        let call = Call {
            operation: Operation::CreateSession,
            kind,
            signature: signature.to_string(),
            request_id: Some(stored.id()),
            requester: Some(stored),
        };
        match self.dispatch(call) {
            Response::Done => Ok(()),
            Response::Fail(e) => Err(e),
            other => response_mismatch(Operation::CreateSession, &other),
        }
    }

    async fn get_session<S>(
        &self,
        _ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
    ) -> StoreResult<Requester<S>>
    where
        S: DeserializeOwned + Send,
    {
        let call = Call {
            operation: Operation::GetSession,
            kind,
            signature: signature.to_string(),
            requester: None,
            request_id: None,
        };
        match self.dispatch(call) {
            Response::Found(requester) => requester.decode(),
            Response::Fail(e) => Err(e),
            other => response_mismatch(Operation::GetSession, &other),
        }
    }

    async fn delete_session(
        &self,
        _ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
    ) -> StoreResult<()> {
        let call = Call {
            operation: Operation::DeleteSession,
            kind,
            signature: signature.to_string(),
            requester: None,
            request_id: None,
        };
        match self.dispatch(call) {
            Response::Done => Ok(()),
            Response::Fail(e) => Err(e),
            other => response_mismatch(Operation::DeleteSession, &other),
        }
    }
}

#[async_trait]
impl TokenRevocationStorage for MockCoreStorage {
    async fn revoke_by_request_id(
        &self,
        _ctx: &RequestContext,
        kind: TokenKind,
        request_id: Uuid,
    ) -> StoreResult<u64> {
        let call = Call {
            operation: Operation::RevokeByRequestId,
            kind,
            signature: String::new(),
            requester: None,
            request_id: Some(request_id),
        };
        match self.dispatch(call) {
            Response::Revoked(count) => Ok(count),
            Response::Fail(e) => Err(e),
            other => response_mismatch(Operation::RevokeByRequestId, &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Subject {
        subject: String,
    }

    fn requester() -> Requester<Subject> {
        Requester::new(
            "app1",
            Subject {
                subject: "alice".to_string(),
            },
            Duration::from_secs(600),
        )
        .with_granted_scopes(["openid"])
    }

    #[tokio::test]
    async fn test_programmed_responses_and_call_log() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        storage
            .expect_create_session()
            .kind(TokenKind::AccessToken)
            .signature(eq("sig-1"))
            .returns_ok()
            .expect_get_session()
            .kind(TokenKind::AccessToken)
            .signature(eq("sig-1"))
            .returns(requester());

        storage
            .create_access_token_session(&ctx, "sig-1", &requester())
            .await
            .unwrap();
        let fetched: Requester<Subject> = storage
            .get_access_token_session(&ctx, "sig-1")
            .await
            .unwrap();

        assert_eq!(fetched.session().subject, "alice");
        let calls = storage.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, Operation::CreateSession);
        assert_eq!(calls[0].requester.as_ref().unwrap().client_id(), "app1");
        assert_eq!(calls[1].operation, Operation::GetSession);
        storage.verify();
    }

    #[tokio::test]
    async fn test_programmed_error_is_returned() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        storage
            .expect_delete_session()
            .kind(TokenKind::AuthorizeCode)
            .returns_err(StoreError::not_found(TokenKind::AuthorizeCode));

        let err = storage
            .delete_authorize_code_session(&ctx, "code")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_wildcard_and_predicate_matching() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        storage
            .expect_create_session()
            .signature(any())
            .requester(predicate(|r: &Requester| r.has_granted_scope("openid")))
            .times(2)
            .returns_ok();

        storage
            .create_refresh_token_session(&ctx, "a", &requester())
            .await
            .unwrap();
        storage
            .create_authorize_code_session(&ctx, "b", &requester())
            .await
            .unwrap();
        assert_eq!(storage.call_count(Operation::CreateSession), 2);
    }

    #[tokio::test]
    async fn test_get_decodes_into_requested_shape() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        storage
            .expect_get_session()
            .any_number_of_times()
            .returns(Requester::new("app1", json!({"other": 1}), Duration::from_secs(60)));

        let err = storage
            .get_refresh_token_session::<Subject>(&ctx, "sig")
            .await
            .unwrap_err();
        assert!(err.is_invalid());
    }

    #[tokio::test]
    async fn test_revoke_by_request_id() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        let id = Uuid::new_v4();
        storage
            .expect_revoke_by_request_id()
            .kind(TokenKind::RefreshToken)
            .request_id(eq(id))
            .returns_count(3);

        assert_eq!(storage.revoke_refresh_tokens(&ctx, id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_create_matches_on_requester_id() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        let expected = requester();
        storage
            .expect_create_session()
            .request_id(eq(expected.id()))
            .returns_ok();

        storage
            .create_access_token_session(&ctx, "sig", &expected)
            .await
            .unwrap();
        assert_eq!(storage.calls()[0].request_id, Some(expected.id()));
    }

    #[tokio::test]
    #[should_panic(expected = "unexpected mock call")]
    async fn test_create_with_other_request_id_is_unexpected() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        storage
            .expect_create_session()
            .request_id(eq(Uuid::new_v4()))
            .any_number_of_times()
            .returns_ok();

        let _ = storage
            .create_access_token_session(&ctx, "sig", &requester())
            .await;
    }

    #[test]
    #[should_panic(expected = "request_id matcher does not apply to get_session")]
    fn test_request_id_matcher_on_get_is_rejected() {
        let storage = MockCoreStorage::new();
        let _ = storage.expect_get_session().request_id(eq(Uuid::new_v4()));
    }

    #[test]
    #[should_panic(expected = "requester matcher does not apply to delete_session")]
    fn test_requester_matcher_on_delete_is_rejected() {
        let storage = MockCoreStorage::new();
        let _ = storage
            .expect_delete_session()
            .requester(predicate(|_: &Requester| true));
    }

    #[tokio::test]
    #[should_panic(expected = "unexpected mock call")]
    async fn test_unexpected_call_fails_the_test() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        let _ = storage.delete_access_token_session(&ctx, "sig").await;
    }

    #[tokio::test]
    #[should_panic(expected = "unexpected mock call")]
    async fn test_exhausted_expectation_rejects_extra_call() {
        let storage = MockCoreStorage::new();
        let ctx = RequestContext::background();
        storage.expect_delete_session().returns_ok();

        storage.delete_access_token_session(&ctx, "sig").await.unwrap();
        let _ = storage.delete_access_token_session(&ctx, "sig").await;
    }

    #[test]
    #[should_panic(expected = "unmet mock expectations")]
    fn test_verify_reports_missing_calls() {
        let storage = MockCoreStorage::new();
        storage.expect_get_session().times(1).returns_err(StoreError::Canceled);
        storage.verify();
    }

    #[test]
    #[should_panic(expected = "unmet mock expectations")]
    fn test_drop_verifies() {
        let storage = MockCoreStorage::new();
        storage.expect_create_session().returns_ok();
        drop(storage);
    }

    #[test]
    fn test_at_least_is_satisfied_by_more_calls() {
        assert!(Times::AtLeast(1).is_satisfied(3));
        assert!(!Times::AtLeast(2).is_satisfied(1));
        assert!(!Times::AtLeast(1).is_saturated(100));
        assert!(Times::Exactly(1).is_saturated(1));
    }
}
