use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Running = 0,
    Closing = 1,
    Closed = 2,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Running,
            1 => PipelineState::Closing,
            _ => PipelineState::Closed,
        }
    }
}

/// Running → Closing → Closed, each step taken at most once.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PipelineState::Running as u8))
    }

    pub(crate) fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// True only for the caller that moved the pipeline out of `Running`.
    pub(crate) fn begin_closing(&self) -> bool {
        self.0
            .compare_exchange(
                PipelineState::Running as u8,
                PipelineState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_closing(&self) {
        let _ = self.0.compare_exchange(
            PipelineState::Closing as u8,
            PipelineState::Closed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
