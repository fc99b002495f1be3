use std::alloc::Layout;
use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use deno_core::v8;
use tracing::warn;

/// Extra heap granted once the ceiling is hit, so the termination exception
/// can unwind instead of V8 aborting the whole process.
const TERMINATION_GRACE_BYTES: usize = 1024 * 1024;

/// Shared with V8's near-heap-limit callback through a raw pointer.
pub(crate) struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

impl HeapLimitState {
    pub(crate) fn new(handle: v8::IsolateHandle) -> Box<Self> {
        Box::new(Self {
            handle,
            triggered: AtomicBool::new(false),
        })
    }

    pub(crate) fn triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn as_callback_data(&self) -> *mut std::ffi::c_void {
        self as *const Self as *mut std::ffi::c_void
    }
}

/// Terminates the isolate the first time it approaches its heap ceiling.
pub(crate) extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` comes from `HeapLimitState::as_callback_data` on a boxed
    // state owned by the same `V8Sandbox` as the runtime. The runtime field
    // is declared (and therefore dropped) before the state, so the isolate
    // can never invoke this callback after the state is freed. Only shared
    // access is taken; `triggered` is atomic.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        warn!("isolate reached its heap ceiling, terminating execution");
        state.handle.terminate_execution();
    }
    current_heap_limit + TERMINATION_GRACE_BYTES
}

/// Alignment handed out for ArrayBuffer backing stores.
const BUFFER_ALIGN: usize = 16;

/// Byte budget for ArrayBuffer backing stores. They live outside the V8
/// heap, so `heap_limits` alone never sees typed-array memory.
pub(crate) struct BufferBudget {
    limit: usize,
    used: AtomicUsize,
    exceeded: AtomicBool,
}

impl BufferBudget {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
            exceeded: AtomicBool::new(false),
        })
    }

    /// Whether any allocation was refused for going over the budget.
    pub(crate) fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }

    /// An ArrayBuffer allocator drawing from this budget, for
    /// `CreateParams::array_buffer_allocator`.
    pub(crate) fn allocator(self: &Arc<Self>) -> v8::UniqueRef<v8::Allocator> {
        // SAFETY: the raw pointer carries one strong count that
        // `budget_drop` gives back when V8 releases the allocator.
        unsafe { v8::new_rust_allocator(Arc::into_raw(Arc::clone(self)), &BUDGET_VTABLE) }
    }

    fn reserve(&self, len: usize) -> bool {
        let mut current = self.used.load(Ordering::SeqCst);
        loop {
            let Some(next) = current.checked_add(len).filter(|next| *next <= self.limit) else {
                if !self.exceeded.swap(true, Ordering::SeqCst) {
                    warn!(limit = self.limit, requested = len, "array buffer budget exhausted");
                }
                return false;
            };
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, len: usize) {
        self.used.fetch_sub(len, Ordering::SeqCst);
    }

    fn allocate_with(&self, len: usize, alloc: unsafe fn(Layout) -> *mut u8) -> *mut c_void {
        let Some(layout) = buffer_layout(len) else {
            return std::ptr::null_mut();
        };
        if !self.reserve(len) {
            return std::ptr::null_mut();
        }
        // SAFETY: `buffer_layout` never yields a zero-sized layout.
        let data = unsafe { alloc(layout) };
        if data.is_null() {
            self.release(len);
        }
        data.cast()
    }
}

fn buffer_layout(len: usize) -> Option<Layout> {
    Layout::from_size_align(len.max(1), BUFFER_ALIGN).ok()
}

static BUDGET_VTABLE: v8::RustAllocatorVtable<BufferBudget> = v8::RustAllocatorVtable {
    allocate: budget_allocate,
    allocate_uninitialized: budget_allocate_uninitialized,
    free: budget_free,
    drop: budget_drop,
};

unsafe extern "C" fn budget_allocate(budget: &BufferBudget, len: usize) -> *mut c_void {
    budget.allocate_with(len, std::alloc::alloc_zeroed)
}

unsafe extern "C" fn budget_allocate_uninitialized(budget: &BufferBudget, len: usize) -> *mut c_void {
    budget.allocate_with(len, std::alloc::alloc)
}

unsafe extern "C" fn budget_free(budget: &BufferBudget, data: *mut c_void, len: usize) {
    if data.is_null() {
        return;
    }
    if let Some(layout) = buffer_layout(len) {
        // SAFETY: V8 frees with the length it allocated, so `data` came from
        // `allocate_with` with this same layout.
        unsafe { std::alloc::dealloc(data.cast(), layout) };
        budget.release(len);
    }
}

unsafe extern "C" fn budget_drop(budget: *const BufferBudget) {
    // SAFETY: balances the `Arc::into_raw` in `BufferBudget::allocator`.
    drop(unsafe { Arc::from_raw(budget) });
}

/// Wall-clock budget for one run. Terminates the isolate from a helper
/// thread when the budget elapses before [`Watchdog::disarm`] is called.
pub(crate) struct Watchdog {
    cancel: mpsc::Sender<()>,
    thread: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    pub(crate) fn arm(handle: v8::IsolateHandle, budget: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let (cancel, cancelled) = mpsc::channel::<()>();
        let thread = std::thread::spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = cancelled.recv_timeout(budget) {
                flag.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        });
        Self {
            cancel,
            thread,
            fired,
        }
    }

    /// Stop the watchdog and report whether it fired. Joins the helper
    /// thread so its isolate handle is gone before the runtime is dropped.
    pub(crate) fn disarm(self) -> bool {
        let _ = self.cancel.send(());
        if self.thread.join().is_err() {
            warn!("watchdog thread panicked");
        }
        self.fired.load(Ordering::SeqCst)
    }
}
