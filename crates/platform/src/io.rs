use std::sync::{Mutex, MutexGuard};

/// Handle to a device's 32-bit register window.
///
/// `read` and `write` are single word-sized accesses. The bit helpers are
/// read-modify-write sequences and are only atomic with respect to other
/// writers when the caller holds its own exclusion; drivers that arm
/// hardware through them do so under their own lock.
pub trait RegisterWindow: Send + Sync {
    fn read(&self, offset: u32) -> u32;
    fn write(&self, offset: u32, value: u32);

    fn set_bits(&self, offset: u32, mask: u32) {
        let value = self.read(offset);
        self.write(offset, value | mask);
    }

    fn clear_bits(&self, offset: u32, mask: u32) {
        let value = self.read(offset);
        self.write(offset, value & !mask);
    }
}

/// Plain word-array window with no access side effects.
///
/// Out-of-range reads return 0 and out-of-range writes are dropped, like a
/// bus access to an unmapped register.
pub struct MemWindow {
    words: Mutex<Vec<u32>>,
}

impl MemWindow {
    pub fn new(len_bytes: u32) -> Self {
        Self {
            words: Mutex::new(vec![0; (len_bytes as usize).div_ceil(4)]),
        }
    }

    fn words(&self) -> MutexGuard<'_, Vec<u32>> {
        match self.words.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RegisterWindow for MemWindow {
    fn read(&self, offset: u32) -> u32 {
        self.words().get((offset / 4) as usize).copied().unwrap_or(0)
    }

    fn write(&self, offset: u32, value: u32) {
        if let Some(slot) = self.words().get_mut((offset / 4) as usize) {
            *slot = value;
        }
    }
}
