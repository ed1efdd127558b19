//! Periodic collection thread


use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scoped_pool::Pool;

use crate::collector::{CollectReport, Collector};
use crate::constants::{COLLECT_INTERVAL_MS, DRAIN_PASSES};
use crate::error::CollectorError;
use crate::statistics::{DefaultLogger, StatsLogger};


/// Handle to a thread that runs a collection pass on a shared `Collector` at a fixed interval.
pub struct CollectorThread<S: StatsLogger> {
    /// Dropping or sending on this stops the thread.
    stop_tx: mpsc::Sender<()>,

    /// The collector thread's handle to join on.
    handle: thread::JoinHandle<S>,
}


impl CollectorThread<DefaultLogger> {
    /// Spawn a collector thread with default parameters: parallel passes across all available
    /// CPUs every `COLLECT_INTERVAL_MS`, and a `DefaultLogger`.
    pub fn spawn(collector: Arc<Collector>) -> CollectorThread<DefaultLogger> {
        Self::spawn_with(collector,
                         num_cpus::get(),
                         Duration::from_millis(COLLECT_INTERVAL_MS),
                         DefaultLogger::new())
    }
}


impl<S: StatsLogger + 'static> CollectorThread<S> {
    /// Spawn a collector thread. With `num_threads` above 1 each pass is split across a pool of
    /// that many threads, otherwise passes run on the collector thread alone.
    pub fn spawn_with(collector: Arc<Collector>,
                      num_threads: usize,
                      interval: Duration,
                      logger: S)
                      -> CollectorThread<S> {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            collector_thread(collector, num_threads, interval, rx, logger)
        });

        CollectorThread {
            stop_tx: tx,
            handle: handle,
        }
    }

    /// Ask the thread to finish after its current pass.
    pub fn stop(&self) {
        // the thread may already have exited
        let _ = self.stop_tx.send(());
    }

    /// Stop the thread and wait for it. On success, returns the object that implements
    /// `StatsLogger` for the calling thread to examine.
    pub fn join(self) -> Result<S, CollectorError> {
        self.stop();
        self.handle.join().map_err(|_| CollectorError::ThreadPanicked)
    }
}


/// Main collector thread loop.
fn collector_thread<S: StatsLogger>(collector: Arc<Collector>,
                                    num_threads: usize,
                                    interval: Duration,
                                    rx_stop: mpsc::Receiver<()>,
                                    mut logger: S)
                                    -> S {
    collector.register_thread();

    let pool = if num_threads > 1 {
        Some(Pool::new(num_threads))
    } else {
        None
    };

    logger.mark_start_time();

    loop {
        match rx_stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                logger.add_sleep(interval.as_millis() as usize);

                let report = match pool {
                    Some(ref pool) => collector.collect_parallel(pool, num_threads),
                    None => collector.collect_report(),
                };

                logger.add_pass(&report);
                logger.current_heap_size(report.examined);
            }

            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(pool) = pool {
        pool.shutdown();
    }

    // final collection, though handles held elsewhere may legitimately keep objects alive
    let remaining = collector.count();
    let freed = match collector.drain(DRAIN_PASSES) {
        Ok(freed) => freed,

        Err(CollectorError::Undrained { freed, .. }) => {
            tracing::debug!(freed, "collector thread stopped with objects still tracked");
            freed
        }

        Err(error) => {
            tracing::debug!(%error, "final collection failed");
            0
        }
    };

    logger.add_pass(&CollectReport {
        examined: remaining,
        freed: freed,
        inconclusive: 0,
    });

    // return logger to calling thread
    logger.mark_end_time();
    logger
}
