use crate::builder::{ImageBuilder, StageRun};
use crate::composer::{BuilderCommand, Composer};
use crate::config::GlobalConfig;
use crate::constants::PLACEHOLDER_BRANCH;
use crate::error::VaubanError;
use crate::media::MediaStore;
use crate::request::BuildRequest;
use crate::stage::{Stage, StageKind};
use crate::tree::{ImageNode, ImageTree};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// The builder ran and succeeded
    Built,
    /// Check mode: the command was rendered only
    Rendered,
    /// conffs inside a compound request on an image without a conffs host
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub image: String,
    pub stage: StageKind,
    pub status: StageStatus,
    pub command: Option<BuilderCommand>,
    pub duration_ms: u64,
}

/// Stages handled by one build call, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub outcomes: Vec<StageOutcome>,
}

impl BuildReport {
    pub fn executed(&self) -> impl Iterator<Item = (&str, StageKind)> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.status != StageStatus::Skipped)
            .map(|o| (o.image.as_str(), o.stage))
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&str, StageKind)> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.status == StageStatus::Skipped)
            .map(|o| (o.image.as_str(), o.stage))
    }

    pub fn commands(&self) -> impl Iterator<Item = &BuilderCommand> + '_ {
        self.outcomes.iter().filter_map(|o| o.command.as_ref())
    }
}

/// Recursive, dependency-aware stage scheduler.
///
/// Holds no state of its own between calls; each call walks the ancestor
/// chain of the requested image and runs stages strictly in order.
pub struct BuildScheduler<'a> {
    tree: &'a ImageTree,
    config: &'a GlobalConfig,
    media: &'a MediaStore,
    builder: &'a dyn ImageBuilder,
}

impl<'a> BuildScheduler<'a> {
    pub fn new(
        tree: &'a ImageTree,
        config: &'a GlobalConfig,
        media: &'a MediaStore,
        builder: &'a dyn ImageBuilder,
    ) -> Self {
        Self {
            tree,
            config,
            media,
            builder,
        }
    }

    /// Build the requested image, and its ancestors as the request says.
    ///
    /// A conffs skip is absorbed inside compound requests only; any other
    /// failure aborts the whole chain.
    pub fn build(&self, request: &BuildRequest) -> Result<BuildReport, VaubanError> {
        let node = self.tree.resolve(request.target())?;
        tracing::info!(
            image = %node.name,
            stage = %request.stage(),
            build_parents = request.build_parents(),
            check = request.check(),
            "Build requested"
        );

        let mut report = BuildReport::default();
        self.build_node(node, request, &mut report)?;
        Ok(report)
    }

    fn build_node(
        &self,
        node: &ImageNode,
        request: &BuildRequest,
        report: &mut BuildReport,
    ) -> Result<(), VaubanError> {
        if request.builds_parents() {
            let prerequisite = request.with_stage(Stage::Rootfs).decrement_depth();
            if request.stage().builds_rootfs() {
                if let Some(parent) = self.tree.parent(node) {
                    self.build_node(parent, &prerequisite, report)?;
                }
            } else {
                self.build_node(node, &prerequisite, report)?;
            }
        }

        let stage = request.stage();
        if stage.is_compound() {
            for &kind in stage.phases() {
                match self.run_stage(node, kind, request, report) {
                    Err(e) if kind == StageKind::Conffs && e.is_nothing_to_do() => {
                        crate::log_stage_skipped!(node.name, kind);
                        report.outcomes.push(StageOutcome {
                            image: node.name.clone(),
                            stage: kind,
                            status: StageStatus::Skipped,
                            command: None,
                            duration_ms: 0,
                        });
                    }
                    other => other?,
                }
            }
            Ok(())
        } else {
            for &kind in stage.phases() {
                self.run_stage(node, kind, request, report)?;
            }
            Ok(())
        }
    }

    fn run_stage(
        &self,
        node: &ImageNode,
        kind: StageKind,
        request: &BuildRequest,
        report: &mut BuildReport,
    ) -> Result<(), VaubanError> {
        let start = Instant::now();
        let branch = self.resolve_branch(node, request);
        let medium = self.media.resolve(node, !request.check())?;

        let composer = Composer::new(self.config, self.tree);
        let base = composer.base(node, &medium, &branch);
        let command = composer.compose(kind, base, node, request.conffs_override(), true)?;

        if request.debug() {
            tracing::info!(command = %command, "Builder command");
        }

        let status = if request.check() {
            StageStatus::Rendered
        } else {
            crate::log_stage_start!(node.name, kind);
            self.builder.run(&StageRun {
                image: &node.name,
                stage: kind,
                command: &command,
                debug: request.debug(),
            })?;
            StageStatus::Built
        };

        report.outcomes.push(StageOutcome {
            image: node.name.clone(),
            stage: kind,
            status,
            command: Some(command),
            duration_ms: start.elapsed().as_millis() as u64,
        });
        Ok(())
    }

    /// Request branch, else the image's own, else the configured default.
    fn resolve_branch(&self, node: &ImageNode, request: &BuildRequest) -> String {
        request
            .branch()
            .filter(|b| *b != PLACEHOLDER_BRANCH)
            .or(node.branch.as_deref())
            .unwrap_or(&self.config.default_branch)
            .to_string()
    }
}
