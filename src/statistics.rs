//! Performance counters and statistics


use std::cmp::max;

use time::{get_time, Timespec};

use crate::collector::CollectReport;


/// Type that provides counters for the collector thread to gain some measure of performance.
pub trait StatsLogger: Send {
    /// mark start of time
    fn mark_start_time(&mut self);
    /// mark end of time
    fn mark_end_time(&mut self);
    /// add a number of milliseconds that the collector thread was asleep
    fn add_sleep(&mut self, ms: usize);

    /// add the outcome of one collection pass
    fn add_pass(&mut self, report: &CollectReport);
    /// give the current tracked object count
    fn current_heap_size(&mut self, size: usize);

    /// print statistics
    fn dump_to_stdout(&self);

    /// log something to stdout
    fn log(&self, string: &str) {
        println!("{}", string);
    }
}


pub struct DefaultLogger {
    max_heap_size: usize,

    total_freed: usize,
    total_inconclusive: usize,
    passes: usize,

    start_time: Timespec,
    stop_time: Timespec,
    sleep_time: u64,
}


impl DefaultLogger {
    pub fn new() -> DefaultLogger {
        DefaultLogger {
            max_heap_size: 0,
            total_freed: 0,
            total_inconclusive: 0,
            passes: 0,
            start_time: Timespec::new(0, 0),
            stop_time: Timespec::new(0, 0),
            sleep_time: 0,
        }
    }

    pub fn total_freed(&self) -> usize {
        self.total_freed
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn max_heap_size(&self) -> usize {
        self.max_heap_size
    }
}


impl Default for DefaultLogger {
    fn default() -> DefaultLogger {
        DefaultLogger::new()
    }
}


impl StatsLogger for DefaultLogger {
    fn mark_start_time(&mut self) {
        self.start_time = get_time();
    }

    fn mark_end_time(&mut self) {
        self.stop_time = get_time();
    }

    fn add_sleep(&mut self, ms: usize) {
        self.sleep_time += ms as u64;
    }

    fn add_pass(&mut self, report: &CollectReport) {
        self.total_freed += report.freed;
        self.total_inconclusive += report.inconclusive;
        self.passes += 1;
    }

    fn current_heap_size(&mut self, size: usize) {
        self.max_heap_size = max(self.max_heap_size, size);
    }

    fn dump_to_stdout(&self) {
        // calculate timing
        let total_time = max((self.stop_time - self.start_time).num_milliseconds(), 1);
        let active_time = max(total_time - self.sleep_time as i64, 0);

        println!("max-heap {}; freed {} in {} passes ({} inconclusive); active {}/{}ms",
                 self.max_heap_size,
                 self.total_freed,
                 self.passes,
                 self.total_inconclusive,
                 active_time,
                 total_time);
    }
}
