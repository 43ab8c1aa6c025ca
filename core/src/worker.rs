use futures_util::stream::BoxStream;

pub type WorkerStream<T> = BoxStream<'static, anyhow::Result<T>>;

/// A declared external asynchronous data source.
///
/// A node keeps a worker running for as long as each render pass keeps
/// declaring an equivalent one under the same key. The stream returned by
/// [`Worker::run`] is subscribed once, when the worker is first declared, and
/// dropped when the declaration goes away.
pub trait Worker: Send + 'static {
    type Output: Send + 'static;

    fn run(&self) -> WorkerStream<Self::Output>;

    /// Whether `other`, declared on a later pass, can keep this worker's
    /// subscription. Workers of the same type are equivalent by default.
    fn does_same_work_as(&self, _other: &Self) -> bool {
        true
    }

    fn describe(&self) -> String {
        short_type_name::<Self>().to_string()
    }
}

/// Last path segment of a type name, keeping generic arguments intact.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base_end = full.find('<').unwrap_or(full.len());
    match full[..base_end].rfind("::") {
        Some(index) => &full[index + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    struct Countdown(u32);

    impl Worker for Countdown {
        type Output = u32;

        fn run(&self) -> WorkerStream<u32> {
            let start = self.0;
            futures_util::stream::iter((0..=start).rev().map(Ok)).boxed()
        }

        fn does_same_work_as(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }

    #[tokio::test]
    async fn test_worker_stream_and_equivalence() {
        let values: Vec<u32> = Countdown(2)
            .run()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![2, 1, 0]);
        assert!(Countdown(2).does_same_work_as(&Countdown(2)));
        assert!(!Countdown(2).does_same_work_as(&Countdown(3)));
        assert_eq!(Countdown(1).describe(), "Countdown");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec<u8>");
    }
}
