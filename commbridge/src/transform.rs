//! Operation adapter - turns "start a native call, get a handle" into a future.
//!
//! Flow of one operation:
//!
//! ```text
//! producer ──Args──► invoke(args, &mut request) ──status──► policy.check
//!                                                              │ success
//!                                              registry.register(request)
//!                                                              │
//!          drain pass observes completion ──► continuation ──► Operation resolves
//! ```
//!
//! Nothing runs until the [`Operation`] is first polled. Failures at each
//! step land in [`Error`]; panics are caught and carried as errors.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::FutureExt;
use futures::future::{BoxFuture, FusedFuture, Ready};
use tokio::sync::oneshot;

use crate::error::{BoxError, Error, Panicked};
use crate::native::{NativeRequest, Status};
use crate::poller::Poller;
use crate::registry::Continuation;

/// Shape of an invoke function's return value.
///
/// - [`Status`]: the call's return code; the operation yields the completion status.
/// - `()`: the call cannot fail on start; the operation yields `()`.
/// - `Result<_, E>` of either: the invoke itself may fail before a handle exists.
pub trait InvokeOutput: Send + 'static {
    type Payload: Send + 'static;

    /// Status reported by the start call.
    fn into_status(self) -> Result<Status, BoxError>;

    /// Value delivered once the native request completed successfully.
    fn payload(status: Status) -> Self::Payload;
}

impl InvokeOutput for Status {
    type Payload = Status;

    fn into_status(self) -> Result<Status, BoxError> {
        Ok(self)
    }

    fn payload(status: Status) -> Status {
        status
    }
}

impl InvokeOutput for () {
    type Payload = ();

    fn into_status(self) -> Result<Status, BoxError> {
        Ok(Status::SUCCESS)
    }

    fn payload(_: Status) {}
}

impl<O, E> InvokeOutput for Result<O, E>
where
    O: InvokeOutput,
    E: Into<BoxError> + Send + 'static,
{
    type Payload = O::Payload;

    fn into_status(self) -> Result<Status, BoxError> {
        self.map_err(Into::into)?.into_status()
    }

    fn payload(status: Status) -> O::Payload {
        O::payload(status)
    }
}

type Completion<T> = oneshot::Receiver<Result<T, Error>>;

enum State<T> {
    Starting(BoxFuture<'static, Result<Completion<T>, Error>>),
    Pending(Completion<T>),
    Done,
}

/// A started-on-first-poll native operation.
///
/// Resolves exactly once, after a drain pass observed native completion.
/// Dropping it does not cancel the native request; the slot stays registered
/// until completion and the result is discarded.
#[must_use = "operations do nothing unless polled"]
pub struct Operation<T> {
    state: State<T>,
}

impl<T: Send + 'static> Operation<T> {
    fn starting(start: impl Future<Output = Result<Completion<T>, Error>> + Send + 'static) -> Self {
        Self {
            state: State::Starting(start.boxed()),
        }
    }

    /// Whether the native request has been started and is awaiting completion.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending(_))
    }
}

impl<T> Future for Operation<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                State::Starting(start) => match ready!(start.as_mut().poll(cx)) {
                    Ok(completion) => this.state = State::Pending(completion),
                    Err(e) => {
                        this.state = State::Done;
                        return Poll::Ready(Err(e));
                    }
                },
                State::Pending(completion) => {
                    let result = ready!(Pin::new(completion).poll(cx));
                    this.state = State::Done;
                    return Poll::Ready(result.unwrap_or(Err(Error::Abandoned)));
                }
                State::Done => panic!("Operation polled after completion"),
            }
        }
    }
}

impl<T> FusedFuture for Operation<T> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done)
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Starting(_) => "starting",
            State::Pending(_) => "pending",
            State::Done => "done",
        };
        f.debug_struct("Operation").field("state", &state).finish()
    }
}

impl Poller {
    /// Adapt a native operation: `producer` supplies its arguments, `invoke`
    /// starts it on a fresh request handle.
    ///
    /// The request is only tracked once `invoke` returns a successful status.
    /// If `invoke` starts a native call and then fails or panics, that request
    /// is dropped untracked: buffers it references must outlive the native
    /// call, and collective peers may still be waiting on it.
    pub fn transform<P, Args, E, F, R, O>(
        self: &Arc<Self>,
        producer: P,
        invoke: F,
    ) -> Operation<O::Payload>
    where
        P: Future<Output = Result<Args, E>> + Send + 'static,
        Args: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(Args, &mut R) -> O + Send + 'static,
        R: NativeRequest + Default,
        O: InvokeOutput,
    {
        self.transform_then(producer, invoke, Ok)
    }

    /// Like [`Poller::transform`], then run `on_complete` on the payload.
    ///
    /// `on_complete` runs on the thread that drained the completion. Its
    /// failure (or panic) becomes [`Error::Continuation`].
    pub fn transform_then<P, Args, E, F, R, O, C, T>(
        self: &Arc<Self>,
        producer: P,
        invoke: F,
        on_complete: C,
    ) -> Operation<T>
    where
        P: Future<Output = Result<Args, E>> + Send + 'static,
        Args: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(Args, &mut R) -> O + Send + 'static,
        R: NativeRequest + Default,
        O: InvokeOutput,
        C: FnOnce(O::Payload) -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let poller = Arc::clone(self);
        Operation::starting(async move {
            let args = match AssertUnwindSafe(producer).catch_unwind().await {
                Ok(Ok(args)) => args,
                Ok(Err(e)) => return Err(Error::Producer(e.into())),
                Err(payload) => return Err(Error::Producer(Panicked::boxed(payload))),
            };
            poller.start(args, invoke, on_complete)
        })
    }

    fn start<Args, F, R, O, C, T>(
        &self,
        args: Args,
        invoke: F,
        on_complete: C,
    ) -> Result<Completion<T>, Error>
    where
        F: FnOnce(Args, &mut R) -> O,
        R: NativeRequest + Default,
        O: InvokeOutput,
        C: FnOnce(O::Payload) -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let policy = self.current_policy();
        let (tx, rx) = oneshot::channel();

        let continuation: Continuation = Box::new(move |status| {
            let result = policy.check(status).and_then(|status| {
                match catch_unwind(AssertUnwindSafe(|| on_complete(O::payload(status)))) {
                    Ok(result) => result.map_err(Error::Continuation),
                    Err(payload) => Err(Error::Continuation(Panicked::boxed(payload))),
                }
            });
            if tx.send(result).is_err() {
                tracing::trace!("Operation dropped before completion, result discarded");
            }
        });

        let slot = self.registry().register(
            || {
                let mut request = R::default();
                let output = catch_unwind(AssertUnwindSafe(|| invoke(args, &mut request)))
                    .map_err(|payload| Error::Invocation(Panicked::boxed(payload)))?;
                let status = output.into_status().map_err(Error::Invocation)?;
                policy.check(status)?;
                Ok::<_, Error>(Box::new(request) as Box<dyn NativeRequest>)
            },
            continuation,
        )?;

        tracing::trace!(slot = %slot, policy = policy.as_str(), "Native operation started");
        self.wake_drivers();
        Ok(rx)
    }
}

/// [`Poller::transform`] on the default poller.
pub fn transform<P, Args, E, F, R, O>(producer: P, invoke: F) -> Operation<O::Payload>
where
    P: Future<Output = Result<Args, E>> + Send + 'static,
    Args: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce(Args, &mut R) -> O + Send + 'static,
    R: NativeRequest + Default,
    O: InvokeOutput,
{
    Poller::global().transform(producer, invoke)
}

/// [`Poller::transform_then`] on the default poller.
pub fn transform_then<P, Args, E, F, R, O, C, T>(
    producer: P,
    invoke: F,
    on_complete: C,
) -> Operation<T>
where
    P: Future<Output = Result<Args, E>> + Send + 'static,
    Args: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce(Args, &mut R) -> O + Send + 'static,
    R: NativeRequest + Default,
    O: InvokeOutput,
    C: FnOnce(O::Payload) -> Result<T, BoxError> + Send + 'static,
    T: Send + 'static,
{
    Poller::global().transform_then(producer, invoke, on_complete)
}

/// A producer that is immediately ready with `args`.
pub fn just<Args>(args: Args) -> Ready<Result<Args, std::convert::Infallible>> {
    futures::future::ready(Ok(args))
}

/// Pipe form: `just(args).transform(invoke)`.
pub trait OperationExt: Future + Sized {
    fn transform<Args, E, F, R, O>(self, invoke: F) -> Operation<O::Payload>
    where
        Self: Future<Output = Result<Args, E>> + Send + 'static,
        Args: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(Args, &mut R) -> O + Send + 'static,
        R: NativeRequest + Default,
        O: InvokeOutput,
    {
        transform(self, invoke)
    }

    fn transform_on<Args, E, F, R, O>(self, poller: &Arc<Poller>, invoke: F) -> Operation<O::Payload>
    where
        Self: Future<Output = Result<Args, E>> + Send + 'static,
        Args: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(Args, &mut R) -> O + Send + 'static,
        R: NativeRequest + Default,
        O: InvokeOutput,
    {
        poller.transform(self, invoke)
    }

    /// Block on this future, draining the default poller while waiting.
    fn sync_wait(self) -> Self::Output {
        crate::poller::sync_wait(self)
    }
}

impl<P: Future> OperationExt for P {}
