//! Stage kinds understood by the external builder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One concrete phase of image construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Rootfs,
    Conffs,
    Initramfs,
    Kernel,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Rootfs,
        StageKind::Conffs,
        StageKind::Initramfs,
        StageKind::Kernel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Rootfs => "rootfs",
            StageKind::Conffs => "conffs",
            StageKind::Initramfs => "initramfs",
            StageKind::Kernel => "kernel",
        }
    }

    /// Builder flag toggling this stage, e.g. `--rootfs`
    pub fn flag(&self) -> String {
        format!("--{}", self.as_str())
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage as requested by a user: a single phase or a compound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Rootfs,
    Conffs,
    Initramfs,
    Kernel,
    /// rootfs, conffs (if defined) and initramfs
    All,
    /// `all` plus the kernel
    Trueall,
}

impl Stage {
    /// Concrete phases run, in order, for this request
    pub fn phases(&self) -> &'static [StageKind] {
        match self {
            Stage::Rootfs => &[StageKind::Rootfs],
            Stage::Conffs => &[StageKind::Conffs],
            Stage::Initramfs => &[StageKind::Initramfs],
            Stage::Kernel => &[StageKind::Kernel],
            Stage::All => &[StageKind::Rootfs, StageKind::Conffs, StageKind::Initramfs],
            Stage::Trueall => &[
                StageKind::Rootfs,
                StageKind::Conffs,
                StageKind::Initramfs,
                StageKind::Kernel,
            ],
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, Stage::All | Stage::Trueall)
    }

    /// Whether this request produces a base layer, so ancestors must exist first
    pub fn builds_rootfs(&self) -> bool {
        matches!(self, Stage::Rootfs | Stage::All | Stage::Trueall)
    }

    pub fn builds_conffs(&self) -> bool {
        matches!(self, Stage::Conffs | Stage::All | Stage::Trueall)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Rootfs => "rootfs",
            Stage::Conffs => "conffs",
            Stage::Initramfs => "initramfs",
            Stage::Kernel => "kernel",
            Stage::All => "all",
            Stage::Trueall => "trueall",
        }
    }
}

impl From<StageKind> for Stage {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Rootfs => Stage::Rootfs,
            StageKind::Conffs => Stage::Conffs,
            StageKind::Initramfs => Stage::Initramfs,
            StageKind::Kernel => Stage::Kernel,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage not handled: {} (supported: rootfs, conffs, initramfs, kernel, all, trueall)",
            self.0
        )
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rootfs" => Ok(Stage::Rootfs),
            "conffs" => Ok(Stage::Conffs),
            "initramfs" => Ok(Stage::Initramfs),
            "kernel" => Ok(Stage::Kernel),
            "all" => Ok(Stage::All),
            "trueall" => Ok(Stage::Trueall),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}
