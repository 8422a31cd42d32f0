use crate::stage::Stage;
use serde::Serialize;

/// A request to build one image.
///
/// Requests are values: every recursive step derives a new request with one
/// field changed and leaves the original untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRequest {
    target: String,
    stage: Stage,
    branch: Option<String>,
    /// Ancestor generations still to build; negative means all of them
    build_parents: i32,
    conffs_override: Option<String>,
    debug: bool,
    check: bool,
}

impl BuildRequest {
    pub fn new(target: impl Into<String>, stage: Stage) -> Self {
        Self {
            target: target.into(),
            stage,
            branch: None,
            build_parents: 0,
            conffs_override: None,
            debug: false,
            check: false,
        }
    }

    pub fn with_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    pub fn with_branch(&self, branch: Option<String>) -> Self {
        Self {
            branch,
            ..self.clone()
        }
    }

    pub fn with_build_parents(&self, build_parents: i32) -> Self {
        Self {
            build_parents,
            ..self.clone()
        }
    }

    pub fn with_conffs_override(&self, conffs: Option<String>) -> Self {
        Self {
            conffs_override: conffs,
            ..self.clone()
        }
    }

    pub fn with_debug(&self, debug: bool) -> Self {
        Self {
            debug,
            ..self.clone()
        }
    }

    /// Check mode renders commands without running them and implies debug
    pub fn with_check(&self, check: bool) -> Self {
        Self {
            check,
            debug: self.debug || check,
            ..self.clone()
        }
    }

    /// One generation less of ancestors to build
    pub fn decrement_depth(&self) -> Self {
        Self {
            build_parents: self.build_parents - 1,
            ..self.clone()
        }
    }

    /// Whether ancestors (or this node's own rootfs) must be built first
    pub fn builds_parents(&self) -> bool {
        self.build_parents != 0
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn build_parents(&self) -> i32 {
        self.build_parents
    }

    pub fn conffs_override(&self) -> Option<&str> {
        self.conffs_override.as_deref()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn check(&self) -> bool {
        self.check
    }
}
