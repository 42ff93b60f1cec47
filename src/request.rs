//! Request lifecycle and the meta-op composition framework
//! (component F).
//!
//! A [`Request`] wraps a single [`PlanOp`] (leaf algorithm or
//! [`MetaOp`] composite) through the `created -> active -> done`
//! state machine of `spec.md` §4.F. Request-id allocation is a
//! per-group rolling 16-bit counter that never hands out `0`.

use crate::error::{Status, UcgError, UcgResult};
use crate::plan::PlanOp;
use parking_lot::Mutex;
use std::sync::Arc;

/// Maximum children a [`MetaOp`] may sequence (`spec.md` §4.F: "Up to
/// a compile-time maximum of 8 children per meta-op").
pub const META_OP_MAX_CHILDREN: usize = 8;

/// Allocates request ids for one group: a rolling 16-bit counter that
/// skips `0` (`spec.md` §4.F, §8 boundary behaviour "wraparound at
/// 65 535 skips 0").
///
/// `spec.md` §9's open question flags that ids are not tracked as
/// "still in flight" across a wraparound; we do not add an active-id
/// set here, matching the spec's explicit "note and keep behaviour
/// as-is" instruction for this revision's scope.
#[derive(Default)]
pub struct RequestIdAllocator {
    next: u16,
}

impl RequestIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> u16 {
        loop {
            self.next = self.next.wrapping_add(1);
            if self.next != 0 {
                return self.next;
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Created,
    Active,
    Done,
}

/// A single in-flight (or completed) collective call.
///
/// Lifecycle (`spec.md` §4.F):
/// - `created`: `status = Ok`, `request_id = 0`.
/// - `start` -> `active`: `status = InProgress`, id allocated.
/// - `progress`/`test` drive the wrapped op until terminal.
/// - terminal -> `done`: `status` latched, id reset to `0`, the
///   completion callback (if any) fires exactly once.
pub struct Request {
    phase: Phase,
    status: Status,
    request_id: u16,
    op: Box<dyn PlanOp>,
    complete_cb: Option<Box<dyn FnMut(Status) + Send>>,
}

impl Request {
    #[must_use]
    pub fn new(op: Box<dyn PlanOp>) -> Self {
        Request { phase: Phase::Created, status: Status::Ok, request_id: 0, op, complete_cb: None }
    }

    #[must_use]
    pub fn with_completion(op: Box<dyn PlanOp>, cb: Box<dyn FnMut(Status) + Send>) -> Self {
        Request { phase: Phase::Created, status: Status::Ok, request_id: 0, op, complete_cb: Some(cb) }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// `request_start`. Forbidden (returns an error) on an already
    /// active request; a no-op returning the latched status on a
    /// request that has already run to completion.
    pub fn start(&mut self, id_alloc: &mut RequestIdAllocator) -> Status {
        match self.phase {
            Phase::Done => self.status,
            Phase::Active => Status::Err(UcgError::InvalidParam),
            Phase::Created => {
                self.request_id = id_alloc.alloc();
                self.phase = Phase::Active;
                self.op.set_request_id(self.request_id);
                let s = self.op.trigger();
                self.apply(s);
                self.status
            }
        }
    }

    /// `request_test`. On a non-active request, returns the latched
    /// status untouched; repeated calls after completion are
    /// idempotent (`spec.md` §8 round-trip law).
    pub fn test(&mut self) -> Status {
        if self.phase != Phase::Active {
            return self.status;
        }
        let s = self.op.progress();
        self.apply(s);
        self.status
    }

    fn apply(&mut self, s: Status) {
        self.status = s;
        if s.is_terminal() {
            self.phase = Phase::Done;
            self.request_id = 0;
            if let Some(cb) = self.complete_cb.as_mut() {
                cb(s);
            }
        }
    }

    /// `request_cleanup`. Returns `InProgress` and does nothing while
    /// active; otherwise discards the wrapped op.
    pub fn cleanup(&mut self) -> Status {
        if self.phase == Phase::Active {
            return Status::InProgress;
        }
        self.op.discard();
        self.status
    }
}

/// A request shared between its caller and its context's progress list
/// (`spec.md` §4.G "Progress", §9's dual mechanism).
///
/// Mirroring `spec.md`'s data flow ("trigger posts initial p2p -> op is
/// appended to the context's progress list ... on final-step completion
/// the op leaves the list"), a `TrackedRequest` registers itself on its
/// context's progress list the moment `start` makes it active, and
/// deregisters itself the moment either `start` or `test` observes a
/// terminal status -- from either side, since both lock the same
/// underlying [`Request`]. Whichever of the caller's own polling or a
/// `Context::progress()` sweep gets there first is the one that
/// actually advances it and removes it.
#[derive(Clone)]
pub struct TrackedRequest {
    inner: Arc<Mutex<Request>>,
    progress_list: Arc<crate::context::Lock>,
}

impl TrackedRequest {
    pub(crate) fn new(req: Request, progress_list: Arc<crate::context::Lock>) -> Self {
        TrackedRequest { inner: Arc::new(Mutex::new(req)), progress_list }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.lock().status()
    }

    #[must_use]
    pub fn request_id(&self) -> u16 {
        self.inner.lock().request_id()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active()
    }

    pub fn start(&self, id_alloc: &mut RequestIdAllocator) -> Status {
        let status = self.inner.lock().start(id_alloc);
        if status.is_terminal() {
            self.progress_list.with_state(|s| s.remove(&self.inner));
        } else {
            self.progress_list.with_state(|s| s.push(self.inner.clone()));
        }
        status
    }

    pub fn test(&self) -> Status {
        let status = self.inner.lock().test();
        if status.is_terminal() {
            self.progress_list.with_state(|s| s.remove(&self.inner));
        }
        status
    }

    pub fn cleanup(&self) -> Status {
        self.inner.lock().cleanup()
    }
}

/// A composite op sequencing up to [`META_OP_MAX_CHILDREN`] child ops
/// in order (`spec.md` GLOSSARY: "Meta-op").
pub struct MetaOp {
    children: Vec<Box<dyn PlanOp>>,
    n_completed: usize,
    triggered: bool,
    status: Status,
    request_id: u16,
}

impl MetaOp {
    pub fn new(children: Vec<Box<dyn PlanOp>>) -> UcgResult<Self> {
        if children.len() > META_OP_MAX_CHILDREN {
            return Err(UcgError::InvalidParam);
        }
        Ok(MetaOp { children, n_completed: 0, triggered: false, status: Status::InProgress, request_id: 0 })
    }
}

impl PlanOp for MetaOp {
    /// If there are no children, succeeds immediately; otherwise resets
    /// the child cursor and runs the first unit of work.
    fn trigger(&mut self) -> Status {
        if self.children.is_empty() {
            self.status = Status::Ok;
            return self.status;
        }
        self.n_completed = 0;
        self.triggered = false;
        self.progress()
    }

    fn progress(&mut self) -> Status {
        if self.n_completed >= self.children.len() {
            self.status = Status::Ok;
            return self.status;
        }
        let cur = &mut self.children[self.n_completed];
        if !self.triggered {
            cur.set_request_id(self.request_id);
            cur.trigger();
            self.triggered = true;
        }
        self.status = match cur.progress() {
            Status::Ok => {
                self.n_completed += 1;
                self.triggered = false;
                if self.n_completed == self.children.len() {
                    Status::Ok
                } else {
                    Status::InProgress
                }
            }
            Status::InProgress => Status::InProgress,
            Status::Err(e) => Status::Err(e),
        };
        self.status
    }

    fn discard(&mut self) {
        for child in &mut self.children {
            child.discard();
        }
    }

    fn set_request_id(&mut self, id: u16) {
        self.request_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct CountingOp {
        steps_remaining: u32,
        triggered: Rc<RefCell<bool>>,
    }

    impl PlanOp for CountingOp {
        fn trigger(&mut self) -> Status {
            *self.triggered.borrow_mut() = true;
            Status::InProgress
        }
        fn progress(&mut self) -> Status {
            if self.steps_remaining == 0 {
                Status::Ok
            } else {
                self.steps_remaining -= 1;
                Status::InProgress
            }
        }
        fn discard(&mut self) {}
    }

    struct FailingOp;
    impl PlanOp for FailingOp {
        fn trigger(&mut self) -> Status {
            Status::InProgress
        }
        fn progress(&mut self) -> Status {
            Status::Err(UcgError::IoError)
        }
        fn discard(&mut self) {}
    }

    #[test]
    fn request_lifecycle_happy_path() {
        let flag = Rc::new(RefCell::new(false));
        let op = CountingOp { steps_remaining: 2, triggered: flag.clone() };
        let mut req = Request::new(Box::new(op));
        let mut ids = RequestIdAllocator::new();

        assert_eq!(req.status(), Status::Ok);
        assert_eq!(req.start(&mut ids), Status::InProgress);
        assert!(*flag.borrow());
        assert!(req.request_id() != 0);
        assert_eq!(req.test(), Status::InProgress);
        assert_eq!(req.test(), Status::InProgress);
        assert_eq!(req.test(), Status::Ok);
        assert_eq!(req.request_id(), 0);
        assert_eq!(req.test(), Status::Ok, "repeated test after completion is idempotent");
    }

    #[test]
    fn start_on_active_is_forbidden() {
        let op = CountingOp { steps_remaining: 5, triggered: Rc::new(RefCell::new(false)) };
        let mut req = Request::new(Box::new(op));
        let mut ids = RequestIdAllocator::new();
        req.start(&mut ids);
        assert_eq!(req.start(&mut ids), Status::Err(UcgError::InvalidParam));
    }

    #[test]
    fn cleanup_while_active_is_in_progress_and_noop() {
        let op = CountingOp { steps_remaining: 5, triggered: Rc::new(RefCell::new(false)) };
        let mut req = Request::new(Box::new(op));
        let mut ids = RequestIdAllocator::new();
        req.start(&mut ids);
        assert_eq!(req.cleanup(), Status::InProgress);
        assert!(req.is_active());
    }

    #[test]
    fn request_id_allocator_skips_zero_on_wraparound() {
        let mut ids = RequestIdAllocator::new();
        ids.next = u16::MAX;
        let id = ids.alloc();
        assert_ne!(id, 0);
    }

    #[test]
    fn meta_op_sequences_children_in_order() {
        let children: Vec<Box<dyn PlanOp>> = vec![
            Box::new(CountingOp { steps_remaining: 1, triggered: Rc::new(RefCell::new(false)) }),
            Box::new(CountingOp { steps_remaining: 0, triggered: Rc::new(RefCell::new(false)) }),
        ];
        let mut meta = MetaOp::new(children).unwrap();
        assert_eq!(meta.trigger(), Status::InProgress);
        assert_eq!(meta.progress(), Status::InProgress);
        assert_eq!(meta.progress(), Status::Ok);
    }

    #[test]
    fn meta_op_latches_child_error() {
        let children: Vec<Box<dyn PlanOp>> = vec![Box::new(FailingOp)];
        let mut meta = MetaOp::new(children).unwrap();
        assert_eq!(meta.trigger(), Status::Err(UcgError::IoError));
    }

    #[test]
    fn meta_op_empty_succeeds_immediately() {
        let mut meta = MetaOp::new(vec![]).unwrap();
        assert_eq!(meta.trigger(), Status::Ok);
    }

    #[test]
    fn tracked_request_shares_state_with_its_context_clone() {
        let flag = Rc::new(RefCell::new(false));
        let op = CountingOp { steps_remaining: 1, triggered: flag };
        let list = std::sync::Arc::new(crate::context::Lock::Mutex(parking_lot::Mutex::new(crate::context::ContextState::default())));
        let tracked = TrackedRequest::new(Request::new(Box::new(op)), list);
        let ctx_side = tracked.clone();
        let mut ids = RequestIdAllocator::new();

        assert_eq!(tracked.start(&mut ids), Status::InProgress);
        // The context's clone observes the same request_id and drives
        // the same underlying op, not an independent copy.
        assert_eq!(ctx_side.request_id(), tracked.request_id());
        assert_eq!(ctx_side.test(), Status::InProgress);
        assert_eq!(tracked.test(), Status::Ok);
        assert_eq!(ctx_side.status(), Status::Ok);
    }

    #[test]
    fn meta_op_rejects_too_many_children() {
        let children: Vec<Box<dyn PlanOp>> = (0..=META_OP_MAX_CHILDREN)
            .map(|_| Box::new(CountingOp { steps_remaining: 0, triggered: Rc::new(RefCell::new(false)) }) as Box<dyn PlanOp>)
            .collect();
        assert_eq!(MetaOp::new(children).unwrap_err(), UcgError::InvalidParam);
    }
}
