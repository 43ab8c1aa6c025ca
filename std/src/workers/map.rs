use std::sync::Arc;

use futures_util::StreamExt;
use workflow_core::{Worker, WorkerStream};

/// Maps every value a worker emits. Equivalent iff the inner workers are.
pub struct MapWorker<K, F> {
    inner: K,
    map: Arc<F>,
}

impl<K, F, U> Worker for MapWorker<K, F>
where
    K: Worker,
    F: Fn(K::Output) -> U + Send + Sync + 'static,
    U: Send + 'static,
{
    type Output = U;

    fn run(&self) -> WorkerStream<U> {
        let map = self.map.clone();
        self.inner
            .run()
            .map(move |item| item.map(|value| map(value)))
            .boxed()
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.inner.does_same_work_as(&other.inner)
    }

    fn describe(&self) -> String {
        format!("MapWorker({})", self.inner.describe())
    }
}

/// Rewrites a worker's whole stream. Equivalent iff the inner workers are.
pub struct TransformWorker<K, F> {
    inner: K,
    transform: Arc<F>,
}

impl<K, F, U> Worker for TransformWorker<K, F>
where
    K: Worker,
    F: Fn(WorkerStream<K::Output>) -> WorkerStream<U> + Send + Sync + 'static,
    U: Send + 'static,
{
    type Output = U;

    fn run(&self) -> WorkerStream<U> {
        (self.transform)(self.inner.run())
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self.inner.does_same_work_as(&other.inner)
    }

    fn describe(&self) -> String {
        format!("TransformWorker({})", self.inner.describe())
    }
}

pub trait WorkerExt: Worker + Sized {
    fn map<F, U>(self, map: F) -> MapWorker<Self, F>
    where
        F: Fn(Self::Output) -> U + Send + Sync + 'static,
        U: Send + 'static,
    {
        MapWorker {
            inner: self,
            map: Arc::new(map),
        }
    }

    fn transform<F, U>(self, transform: F) -> TransformWorker<Self, F>
    where
        F: Fn(WorkerStream<Self::Output>) -> WorkerStream<U> + Send + Sync + 'static,
        U: Send + 'static,
    {
        TransformWorker {
            inner: self,
            transform: Arc::new(transform),
        }
    }
}

impl<K: Worker> WorkerExt for K {}
