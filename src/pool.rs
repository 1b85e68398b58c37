use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

pub struct WorkQueue<'a, S> {
    items: &'a [S],
    cursor: AtomicUsize,
}

impl<'a, S> WorkQueue<'a, S> {
    pub fn new(items: &'a [S]) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> Option<&'a S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

pub fn run_bounded<S, R, F>(items: &[S], workers: usize, task: F) -> Vec<R>
where
    S: Sync,
    R: Send,
    F: Fn(&S) -> Option<R> + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let queue = WorkQueue::new(items);
    let results = Mutex::new(Vec::with_capacity(items.len()));
    let workers = workers.clamp(1, queue.total());

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                while let Some(item) = queue.next() {
                    if let Some(result) = task(item) {
                        results
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push(result);
                    }
                }
            });
        }
    });

    results
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
