//! Blocking wait that keeps cooperative polling alive.
//!
//! The waiting thread is an otherwise idle execution resource: while polling
//! is enabled it runs drain passes between polls of the awaited future instead
//! of sleeping through completions nobody else would observe.

use std::future::IntoFuture;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::thread::{self, Thread};

use futures::task::{ArcWake, waker};

use super::Poller;

struct ThreadSignal {
    thread: Thread,
    woken: AtomicBool,
}

impl ArcWake for ThreadSignal {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
        arc_self.thread.unpark();
    }
}

impl Poller {
    /// Block the calling thread until `future` resolves.
    ///
    /// Must not be called from inside an async task: it blocks the worker
    /// thread it runs on.
    pub fn sync_wait<F: IntoFuture>(&self, future: F) -> F::Output {
        let mut future = pin!(future.into_future());
        let signal = Arc::new(ThreadSignal {
            thread: thread::current(),
            woken: AtomicBool::new(true),
        });
        let waker = waker(Arc::clone(&signal));
        let mut cx = Context::from_waker(&waker);

        loop {
            if signal.woken.swap(false, Ordering::AcqRel) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
                continue;
            }

            if !self.is_active() {
                thread::park_timeout(self.config.idle_timeout);
                continue;
            }
            if self.registry.drain_pass() > 0 {
                continue;
            }
            if self.config.poll_interval.is_zero() {
                thread::yield_now();
            } else {
                thread::park_timeout(self.config.poll_interval);
            }
        }
    }
}

/// Block on `future`, draining the default poller while waiting.
pub fn sync_wait<F: IntoFuture>(future: F) -> F::Output {
    Poller::global().sync_wait(future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollingConfig, PollingMode};
    use crate::native::loopback::{Request, grequest_start};
    use crate::native::{NativeRequest, Status};
    use crate::policy::ErrorPolicy;
    use std::time::Duration;

    #[test]
    fn ready_future_returns_immediately() {
        let poller = Poller::new(PollingConfig::default());
        assert_eq!(poller.sync_wait(async { 7 }), 7);
    }

    #[test]
    fn wakes_on_foreign_thread_signal() {
        let poller = Poller::new(PollingConfig::default());
        let (tx, rx) = tokio::sync::oneshot::channel();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            tx.send("done").unwrap();
        });

        assert_eq!(poller.sync_wait(rx), Ok("done"));
        sender.join().unwrap();
    }

    #[test]
    fn drains_registry_while_waiting() {
        let poller = Poller::new(PollingConfig::default());
        let _scope = poller.enable_polling(PollingMode::Cooperative, ErrorPolicy::Recoverable);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut request = Request::default();
        let handle = grequest_start(&mut request);
        poller
            .registry()
            .register(
                || Ok::<_, std::convert::Infallible>(Box::new(request) as Box<dyn NativeRequest>),
                Box::new(move |status| {
                    let _ = tx.send(status);
                }),
            )
            .unwrap();

        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            handle.complete(Status::ERR_OTHER);
        });

        assert_eq!(poller.sync_wait(rx), Ok(Status::ERR_OTHER));
        completer.join().unwrap();
        assert!(poller.registry().is_empty());
    }
}
