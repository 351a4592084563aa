// 2.0: injectable time source. wall clock in production, settable virtual clock
// in backtests, so simulated and real execution share identical code paths.
// no business logic reads Utc::now() directly.

use crate::types::Timestamp;
use std::cell::Cell;
use std::rc::Rc;

pub trait Clock {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(chrono::Utc::now().timestamp_millis())
    }
}

// Shared settable clock. Cloning shares the underlying time so the exchange,
// risk manager and engine all observe the same instant.
#[derive(Debug, Clone)]
pub struct SimClock {
    now: Rc<Cell<i64>>,
}

impl SimClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Rc::new(Cell::new(start.as_millis())),
        }
    }

    pub fn set(&self, to: Timestamp) {
        self.now.set(to.as_millis());
    }

    pub fn advance(&self, millis: i64) {
        self.now.set(self.now.get() + millis);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now.get())
    }
}
