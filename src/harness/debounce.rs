//! Trailing-edge debounce for reprocessing on settings changes.
//!
//! Every `schedule` restarts the timer and replaces the pending value. When
//! the timer fires the latest value is handed to the job. At most one job runs
//! at a time; a value scheduled while a job runs waits for a fresh window
//! after it finishes.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::trace;
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

type Job<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct DebounceState<T> {
    pending: Option<T>,
    in_flight: bool,
    runs: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct Debouncer<T> {
    delay: Duration,
    state: Arc<Mutex<DebounceState<T>>>,
    job: Job<T>,
}

fn lock<T>(state: &Mutex<DebounceState<T>>) -> MutexGuard<'_, DebounceState<T>> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(delay: Duration, job: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: Job<T> =
            Arc::new(move |value| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(job(value))
            });
        Self {
            delay,
            state: Arc::new(Mutex::new(DebounceState {
                pending: None,
                in_flight: false,
                runs: 0,
                timer: None,
            })),
            job,
        }
    }

    /// Queue `value`, restarting the window. Must be called inside a tokio
    /// runtime.
    pub fn schedule(&self, value: T) {
        let mut st = lock(&self.state);
        st.pending = Some(value);
        if st.in_flight {
            trace!("debounce: job in flight, deferring");
            return;
        }
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        let state = self.state.clone();
        let job = self.job.clone();
        let delay = self.delay;
        st.timer = Some(tokio::spawn(run(state, job, delay)));
    }

    /// Drop any pending value and stop the timer. A running job completes.
    pub fn cancel(&self) {
        let mut st = lock(&self.state);
        st.pending = None;
        if !st.in_flight {
            if let Some(timer) = st.timer.take() {
                timer.abort();
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.state).in_flight
    }

    /// Jobs completed so far.
    pub fn runs(&self) -> u64 {
        lock(&self.state).runs
    }
}

async fn run<T>(state: Arc<Mutex<DebounceState<T>>>, job: Job<T>, delay: Duration) {
    loop {
        tokio::time::sleep(delay).await;
        let value = {
            let mut st = lock(&state);
            match st.pending.take() {
                Some(v) => {
                    st.in_flight = true;
                    v
                }
                None => return,
            }
        };
        job(value).await;
        let mut st = lock(&state);
        st.in_flight = false;
        st.runs += 1;
        if st.pending.is_none() {
            return;
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.state).timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(work: Duration) -> (Debouncer<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let d = Debouncer::new(DEFAULT_DEBOUNCE, move |v| {
            let sink = sink.clone();
            async move {
                tokio::time::sleep(work).await;
                sink.lock().unwrap().push(v);
            }
        });
        (d, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_changes_collapse_to_latest() {
        let (d, seen) = recorder(Duration::ZERO);
        d.schedule(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        d.schedule(2);
        tokio::time::sleep(Duration::from_millis(250)).await;
        d.schedule(3);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(seen.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().unwrap(), vec![3]);
        assert_eq!(d.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_during_job_runs_after_it() {
        let (d, seen) = recorder(Duration::from_secs(1));
        d.schedule(1);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(d.is_in_flight());
        d.schedule(2);
        d.schedule(3);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(d.is_pending());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
        assert_eq!(d.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending() {
        let (d, seen) = recorder(Duration::ZERO);
        d.schedule(9);
        d.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
