use std::thread::{self, JoinHandle};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::config::DataConfig;
use crate::error::{DataError, Result};
use crate::generator::{list_images, BatchGenerator, BatchSource};
use crate::sample::Batch;

/// Batches buffered between the workers and the consumer.
pub const MAX_QUEUE_SIZE: usize = 10;

/// Worker threads feeding a bounded channel of batches.
///
/// Producers block while the channel is full and the consumer blocks while
/// it is empty. The first error a worker hits is forwarded and the worker
/// stops. Dropping the queue closes the channel and joins every worker.
pub struct BatchQueue {
    receiver: mpsc::Receiver<Result<Batch>>,
    workers: Vec<JoinHandle<()>>,
}

impl BatchQueue {
    /// Starts `max(workers, 1)` generators over the training directory,
    /// each seeded with `seed + worker id`.
    pub fn spawn(cfg: &DataConfig, workers: usize, seed: u64) -> Result<Self> {
        let images = list_images(&cfg.training_data_path)?;
        let sources = (0..workers.max(1) as u64)
            .map(|id| BatchGenerator::with_images(cfg.clone(), images.clone(), seed.wrapping_add(id)))
            .collect::<Result<Vec<_>>>()?;
        Self::from_sources(sources)
    }

    pub fn from_sources<S>(sources: Vec<S>) -> Result<Self>
    where
        S: BatchSource + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(MAX_QUEUE_SIZE);
        let mut workers = Vec::with_capacity(sources.len());
        for (id, mut source) in sources.into_iter().enumerate() {
            let sender = sender.clone();
            let handle = thread::Builder::new()
                .name(format!("batch-worker-{id}"))
                .spawn(move || {
                    loop {
                        let batch = source.next_batch();
                        let fatal = batch.is_err();
                        if sender.blocking_send(batch).is_err() || fatal {
                            break;
                        }
                    }
                    debug!("batch worker {id} stopped");
                })
                .map_err(DataError::Spawn)?;
            workers.push(handle);
        }
        debug!("started {} batch workers", workers.len());
        Ok(Self { receiver, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl BatchSource for BatchQueue {
    /// Blocks until a worker delivers. `QueueClosed` once every worker is gone.
    fn next_batch(&mut self) -> Result<Batch> {
        self.receiver.blocking_recv().unwrap_or(Err(DataError::QueueClosed))
    }
}

impl Iterator for BatchQueue {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        self.receiver.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("a batch worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counting {
        produced: Arc<AtomicUsize>,
    }

    impl BatchSource for Counting {
        fn next_batch(&mut self) -> Result<Batch> {
            self.produced.fetch_add(1, Ordering::SeqCst);
            Ok(Batch::zeros(1, 8, 5))
        }
    }

    struct Failing;

    impl BatchSource for Failing {
        fn next_batch(&mut self) -> Result<Batch> {
            Err(DataError::EmptyDataset(PathBuf::from("nowhere")))
        }
    }

    #[test]
    fn producers_block_on_a_full_queue() {
        let produced = Arc::new(AtomicUsize::new(0));
        let sources = (0..2)
            .map(|_| Counting {
                produced: produced.clone(),
            })
            .collect();
        let mut queue = BatchQueue::from_sources(sources).unwrap();
        assert_eq!(queue.workers(), 2);

        thread::sleep(Duration::from_millis(200));
        assert!(produced.load(Ordering::SeqCst) <= MAX_QUEUE_SIZE + 2);

        for _ in 0..5 {
            assert_eq!(queue.next_batch().unwrap().len(), 1);
        }
        drop(queue);
        let after_drop = produced.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(produced.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn worker_errors_reach_the_consumer() {
        let mut queue = BatchQueue::from_sources(vec![Failing]).unwrap();
        assert!(matches!(queue.next_batch(), Err(DataError::EmptyDataset(_))));
        assert!(matches!(queue.next_batch(), Err(DataError::QueueClosed)));
    }
}
