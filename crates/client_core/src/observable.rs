use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A single observable state cell. Readers take snapshots or subscribe for
/// changes; only the owning controller writes.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Current value followed by every later change.
    pub fn stream(&self) -> WatchStream<T> {
        WatchStream::new(self.tx.subscribe())
    }

    pub(crate) fn set(&self, value: T) {
        self.tx.send_replace(value);
    }
}

impl<T> Default for Observable<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}
