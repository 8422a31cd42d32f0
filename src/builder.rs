use crate::composer::BuilderCommand;
use crate::error::VaubanError;
use crate::stage::StageKind;
use std::process::Command;

/// Everything the builder needs to know about one stage run.
#[derive(Debug, Clone)]
pub struct StageRun<'a> {
    pub image: &'a str,
    pub stage: StageKind,
    pub command: &'a BuilderCommand,
    pub debug: bool,
}

/// The external program that actually builds image layers.
pub trait ImageBuilder {
    fn run(&self, run: &StageRun<'_>) -> Result<(), VaubanError>;
}

/// Runs the builder as a child process, inheriting stdio.
///
/// Interrupts reach the child through the shared process group; nothing is
/// cleaned up here.
#[derive(Debug, Default, Clone)]
pub struct ScriptBuilder;

impl ScriptBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl ImageBuilder for ScriptBuilder {
    fn run(&self, run: &StageRun<'_>) -> Result<(), VaubanError> {
        let mut cmd = Command::new(&run.command.program);
        cmd.args(&run.command.args);

        if run.debug {
            // the script enables `set -x` for every flag letter in here
            let flags = std::env::var("VAUBAN_SET_FLAGS").unwrap_or_default();
            cmd.env("VAUBAN_SET_FLAGS", format!("{}x", flags));
        }

        let status = cmd.status().map_err(|source| VaubanError::BuilderSpawn {
            program: run.command.program.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(VaubanError::ExternalBuilder {
                image: run.image.to_string(),
                stage: run.stage.to_string(),
                code: status.code(),
            })
        }
    }
}
