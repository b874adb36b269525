use std::sync::Arc;

use thiserror::Error;

use crate::io::RegisterWindow;
use crate::irq::InterruptLine;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    #[error("register window unavailable")]
    WindowUnavailable,
    #[error("interrupt line unavailable")]
    LineUnavailable,
    #[error("interrupt line already bound")]
    LineBusy,
}

/// Hands out the hardware handles for a located device instance.
///
/// Drivers acquire everything they touch through this seam; on attach
/// failure the acquired handles are released by dropping them.
pub trait ResourceProvider: Send + Sync {
    fn register_window(&self) -> Result<Arc<dyn RegisterWindow>, ResourceError>;
    fn interrupt_line(&self) -> Result<Arc<dyn InterruptLine>, ResourceError>;
}

/// Provider over pre-built handles. The same handles are returned on every
/// call; exclusivity is the line's own business (`bind` fails when claimed).
pub struct FixedResources {
    pub regs: Arc<dyn RegisterWindow>,
    pub irq: Arc<dyn InterruptLine>,
}

impl ResourceProvider for FixedResources {
    fn register_window(&self) -> Result<Arc<dyn RegisterWindow>, ResourceError> {
        Ok(Arc::clone(&self.regs))
    }

    fn interrupt_line(&self) -> Result<Arc<dyn InterruptLine>, ResourceError> {
        Ok(Arc::clone(&self.irq))
    }
}
