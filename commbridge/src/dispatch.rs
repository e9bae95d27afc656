//! Per-type override of how an operation is started.
//!
//! A domain type implements [`AdaptsSelf`] to build its own [`Operation`]
//! (validate fields, pick a different native call, attach a continuation).
//! Everything else goes through [`Invocation`], which forwards a flat argument
//! tuple to [`Poller::transform`]. The impl is picked at compile time; a type
//! has exactly one.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::native::NativeRequest;
use crate::poller::Poller;
use crate::transform::{InvokeOutput, Operation, just};

pub trait AdaptsSelf {
    type Output: Send + 'static;

    fn adapt(self, poller: &Arc<Poller>) -> Operation<Self::Output>;
}

/// Arguments plus the invoke function that starts the native call on them.
pub struct Invocation<Args, F, R> {
    args: Args,
    invoke: F,
    _request: PhantomData<fn() -> R>,
}

impl<Args, F, R> Invocation<Args, F, R> {
    pub fn new(args: Args, invoke: F) -> Self {
        Self {
            args,
            invoke,
            _request: PhantomData,
        }
    }
}

impl<Args, F, R, O> AdaptsSelf for Invocation<Args, F, R>
where
    Args: Send + 'static,
    F: FnOnce(Args, &mut R) -> O + Send + 'static,
    R: NativeRequest + Default,
    O: InvokeOutput,
{
    type Output = O::Payload;

    fn adapt(self, poller: &Arc<Poller>) -> Operation<O::Payload> {
        poller.transform(just(self.args), self.invoke)
    }
}

impl Poller {
    pub fn transform_value<V: AdaptsSelf>(self: &Arc<Self>, value: V) -> Operation<V::Output> {
        value.adapt(self)
    }
}

/// Start `value` on the default poller through its own adapter.
pub fn transform_value<V: AdaptsSelf>(value: V) -> Operation<V::Output> {
    Poller::global().transform_value(value)
}
