use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

/// How a gather ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatherVerdict {
    Complete,
    Failed(String),
}

/// Count-based completion gate for one scatter/gather load.
///
/// `request_count` may still grow after responses arrived (a children list
/// adds one request per child). A callback must add the requests it fans out
/// *before* recording its own response, so the counts can only meet once
/// every dispatched read has answered. Exactly one caller observes the
/// verdict.
#[derive(Debug)]
pub struct GatherTracker {
    request_count: AtomicUsize,
    response_count: AtomicUsize,
    failed: AtomicBool,
    failure: Mutex<Option<String>>,
    settled: AtomicBool,
}

impl GatherTracker {
    pub fn new(initial_requests: usize) -> Self {
        Self {
            request_count: AtomicUsize::new(initial_requests),
            response_count: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            settled: AtomicBool::new(false),
        }
    }

    pub fn add_requests(
        &self,
        n: usize,
    ) {
        self.request_count.fetch_add(n, Ordering::SeqCst);
    }

    /// Takes back requests that were counted but never dispatched.
    pub fn withdraw_requests(
        &self,
        n: usize,
    ) {
        self.request_count.fetch_sub(n, Ordering::SeqCst);
    }

    /// Keeps the first reason
    pub fn mark_failed(
        &self,
        reason: impl Into<String>,
    ) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(reason.into());
        }
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    /// `(requests, responses)`
    pub fn counts(&self) -> (usize, usize) {
        (
            self.request_count.load(Ordering::SeqCst),
            self.response_count.load(Ordering::SeqCst),
        )
    }

    /// Counts one answered read. Returns the verdict to the caller whose
    /// response closed the gather.
    pub fn record_response(&self) -> Option<GatherVerdict> {
        self.response_count.fetch_add(1, Ordering::SeqCst);
        self.try_settle()
    }

    /// Settles as failed without waiting for outstanding reads. Their
    /// responses are ignored afterwards.
    pub fn abandon(&self) -> Option<GatherVerdict> {
        if self.settle() {
            Some(GatherVerdict::Failed(self.failure_reason()))
        } else {
            None
        }
    }

    fn try_settle(&self) -> Option<GatherVerdict> {
        let requests = self.request_count.load(Ordering::SeqCst);
        let responses = self.response_count.load(Ordering::SeqCst);
        debug_assert!(responses <= requests, "responses {} > requests {}", responses, requests);
        if responses != requests || !self.settle() {
            return None;
        }
        if self.is_failed() {
            Some(GatherVerdict::Failed(self.failure_reason()))
        } else {
            Some(GatherVerdict::Complete)
        }
    }

    fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn failure_reason(&self) -> String {
        self.failure
            .lock()
            .clone()
            .unwrap_or_else(|| "unknown failure".to_string())
    }
}
