/// Runs a closure once when dropped.
///
/// Used to undo bookkeeping no matter how the owning future ends, including cancellation.
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Returns a guard that runs `f` when it goes out of scope.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}
