//! Priority levels for active objects

use serde::{Deserialize, Serialize};

/// Scheduling priority of an active object; higher runs first
///
/// Values are clamped into `[IDLE, HIGHEST]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub struct Priority(i32);

impl Priority {
    pub const IDLE: Priority = Priority(-100);
    pub const LOW: Priority = Priority(-20);
    pub const NOMINAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(10);
    pub const HIGHEST: Priority = Priority(20);

    /// Create a priority, clamping into the valid band
    pub const fn new(value: i32) -> Self {
        if value < Self::IDLE.0 {
            Self::IDLE
        } else if value > Self::HIGHEST.0 {
            Self::HIGHEST
        } else {
            Priority(value)
        }
    }

    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NOMINAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self::new(value)
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::IDLE => write!(f, "idle"),
            Self::LOW => write!(f, "low"),
            Self::NOMINAL => write!(f, "nominal"),
            Self::HIGH => write!(f, "high"),
            Self::HIGHEST => write!(f, "highest"),
            Priority(value) => write!(f, "{}", value),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Self::IDLE),
            "low" => Ok(Self::LOW),
            "nominal" | "normal" => Ok(Self::NOMINAL),
            "high" => Ok(Self::HIGH),
            "highest" => Ok(Self::HIGHEST),
            other => other
                .parse::<i32>()
                .map(Self::new)
                .map_err(|_| format!("Unknown priority: {}", s)),
        }
    }
}
