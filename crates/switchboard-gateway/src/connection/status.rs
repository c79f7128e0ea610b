use std::sync::atomic::{AtomicU8, Ordering};

/// Where a shard is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShardStatus {
    Disconnected = 0,
    Connecting = 1,
    AwaitingHello = 2,
    Identifying = 3,
    Resuming = 4,
    Active = 5,
    Reconnecting = 6,
}

impl ShardStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::AwaitingHello,
            3 => Self::Identifying,
            4 => Self::Resuming,
            5 => Self::Active,
            6 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new(status: ShardStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn get(&self) -> ShardStatus {
        ShardStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: ShardStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}
