//! Deletion notifications
//!
//! Every API that erases instructions takes a `DeleteObserver`. The observer
//! is invoked while the doomed instruction is still fully intact, so it may
//! inspect its operands. Subscriptions exist only for the duration of the
//! call they are passed to.

use crate::function::FunctionBody;
use crate::instr::InstrId;

/// Receives a callback for every instruction about to be erased
pub trait DeleteObserver {
    fn will_erase(&mut self, body: &FunctionBody, instr: InstrId);
}

/// Observer that ignores all notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DeleteObserver for NoopObserver {
    fn will_erase(&mut self, _body: &FunctionBody, _instr: InstrId) {}
}

impl<F> DeleteObserver for F
where
    F: FnMut(&FunctionBody, InstrId),
{
    fn will_erase(&mut self, body: &FunctionBody, instr: InstrId) {
        self(body, instr)
    }
}
