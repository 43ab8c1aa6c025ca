use std::marker::PhantomData;

/// Fire-and-forget receiver of values, typically actions.
///
/// Implementations must be safe to call from any thread; delivery order is
/// send order.
pub trait Sink<T>: Send + Sync {
    fn send(&self, value: T);
}

impl<T, F> Sink<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn send(&self, value: T) {
        self(value)
    }
}

/// A sink of `U` built by mapping into an inner sink of `T`.
pub struct Contramap<S, F, T> {
    inner: S,
    map: F,
    _marker: PhantomData<fn(T)>,
}

impl<S, F, T, U> Sink<U> for Contramap<S, F, T>
where
    S: Sink<T>,
    F: Fn(U) -> T + Send + Sync,
{
    fn send(&self, value: U) {
        self.inner.send((self.map)(value))
    }
}

impl<S: Clone, F: Clone, T> Clone for Contramap<S, F, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            map: self.map.clone(),
            _marker: PhantomData,
        }
    }
}

pub trait SinkExt<T>: Sink<T> + Sized {
    fn contramap<U, F>(self, map: F) -> Contramap<Self, F, T>
    where
        F: Fn(U) -> T + Send + Sync,
    {
        Contramap {
            inner: self,
            map,
            _marker: PhantomData,
        }
    }
}

impl<T, S: Sink<T>> SinkExt<T> for S {}
