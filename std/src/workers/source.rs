use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt, stream};
use workflow_core::{Worker, WorkerStream};

type FutureFactory<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
type StreamFactory<T> = Arc<dyn Fn() -> WorkerStream<T> + Send + Sync>;

/// Runs one future and emits its result.
///
/// The future is built by `factory` each time the worker starts, so a
/// re-declared equivalent worker never runs it twice.
pub struct FutureWorker<T> {
    key: String,
    factory: FutureFactory<T>,
}

impl<T: Send + 'static> FutureWorker<T> {
    pub fn new<F, Fut>(key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            factory: Arc::new(move || factory().boxed()),
        }
    }
}

impl<T> Clone for FutureWorker<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<T: Send + 'static> Worker for FutureWorker<T> {
    type Output = T;

    fn run(&self) -> WorkerStream<T> {
        stream::once((self.factory)()).boxed()
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.key == other.key
    }

    fn describe(&self) -> String {
        format!("FutureWorker({:?})", self.key)
    }
}

/// Subscribes to a stream built by `factory`, equivalent by key.
pub struct StreamWorker<T> {
    key: String,
    factory: StreamFactory<T>,
}

impl<T: Send + 'static> StreamWorker<T> {
    pub fn new<F, S>(key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            key: key.into(),
            factory: Arc::new(move || factory().map(Ok).boxed()),
        }
    }

    /// A stream whose items may fail. The first error fails the worker.
    pub fn try_new<F, S>(key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            factory: Arc::new(move || factory().boxed()),
        }
    }
}

impl<T> Clone for StreamWorker<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<T: Send + 'static> Worker for StreamWorker<T> {
    type Output = T;

    fn run(&self) -> WorkerStream<T> {
        (self.factory)()
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.key == other.key
    }

    fn describe(&self) -> String {
        format!("StreamWorker({:?})", self.key)
    }
}

/// Completes immediately without emitting anything.
pub struct FinishedWorker<T = ()> {
    _output: PhantomData<fn() -> T>,
}

impl<T> FinishedWorker<T> {
    pub fn new() -> Self {
        Self {
            _output: PhantomData,
        }
    }
}

impl<T> Default for FinishedWorker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Worker for FinishedWorker<T> {
    type Output = T;

    fn run(&self) -> WorkerStream<T> {
        stream::empty().boxed()
    }
}
