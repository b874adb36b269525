use std::sync::{Arc, Mutex, MutexGuard};

use crate::resources::ResourceError;

/// What a handler reports back to the interrupt dispatch layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqStatus {
    /// The handler claimed the interrupt.
    Handled,
    /// The interrupt was not for this handler, or arrived with no cause.
    Stray,
}

pub trait InterruptHandler: Send + Sync {
    fn interrupt(&self) -> IrqStatus;
}

/// One device interrupt line. At most one handler may be bound at a time.
pub trait InterruptLine: Send + Sync {
    fn bind(&self, handler: Arc<dyn InterruptHandler>) -> Result<(), ResourceError>;
    fn unbind(&self);
}

/// In-process interrupt line with synchronous dispatch.
///
/// `fire` runs the bound handler on the calling thread, so the interrupt has
/// fully completed by the time `fire` returns. Simulated hardware asserts its
/// line through this.
pub struct SoftIrqLine {
    handler: Mutex<Option<Arc<dyn InterruptHandler>>>,
    reject_binds: bool,
}

impl SoftIrqLine {
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
            reject_binds: false,
        }
    }

    /// A line whose `bind` always fails, for exercising attach rollback.
    pub fn rejecting() -> Self {
        Self {
            handler: Mutex::new(None),
            reject_binds: true,
        }
    }

    fn handler(&self) -> MutexGuard<'_, Option<Arc<dyn InterruptHandler>>> {
        match self.handler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.handler().is_some()
    }

    /// Assert the line once, dispatching to the bound handler if any.
    pub fn fire(&self) -> IrqStatus {
        let handler = self.handler().clone();
        match handler {
            Some(handler) => handler.interrupt(),
            None => IrqStatus::Stray,
        }
    }
}

impl Default for SoftIrqLine {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptLine for SoftIrqLine {
    fn bind(&self, handler: Arc<dyn InterruptHandler>) -> Result<(), ResourceError> {
        if self.reject_binds {
            return Err(ResourceError::LineUnavailable);
        }
        let mut slot = self.handler();
        if slot.is_some() {
            return Err(ResourceError::LineBusy);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn unbind(&self) {
        self.handler().take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingHandler {
        hits: AtomicUsize,
    }

    impl InterruptHandler for CountingHandler {
        fn interrupt(&self) -> IrqStatus {
            self.hits.fetch_add(1, Ordering::Relaxed);
            IrqStatus::Handled
        }
    }

    #[test]
    fn fire_dispatches_to_bound_handler() {
        let line = SoftIrqLine::new();
        let handler = Arc::new(CountingHandler {
            hits: AtomicUsize::new(0),
        });
        line.bind(handler.clone()).unwrap();

        assert_eq!(line.fire(), IrqStatus::Handled);
        assert_eq!(line.fire(), IrqStatus::Handled);
        assert_eq!(handler.hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn fire_without_handler_is_stray() {
        let line = SoftIrqLine::new();
        assert_eq!(line.fire(), IrqStatus::Stray);
    }

    #[test]
    fn second_bind_fails_until_unbind() {
        let line = SoftIrqLine::new();
        let handler = Arc::new(CountingHandler {
            hits: AtomicUsize::new(0),
        });
        line.bind(handler.clone()).unwrap();
        assert_eq!(
            line.bind(handler.clone()).unwrap_err(),
            ResourceError::LineBusy
        );

        line.unbind();
        assert!(!line.is_bound());
        line.bind(handler).unwrap();
    }

    #[test]
    fn rejecting_line_refuses_binds() {
        let line = SoftIrqLine::rejecting();
        let handler = Arc::new(CountingHandler {
            hits: AtomicUsize::new(0),
        });
        assert_eq!(
            line.bind(handler).unwrap_err(),
            ResourceError::LineUnavailable
        );
        assert!(!line.is_bound());
    }
}
