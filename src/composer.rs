//! Builder command composition.
//!
//! Every stage shares one directive format: a common prefix naming the
//! image, its medium, upload policy and branch, then one `yes`/`no` toggle
//! per stage plus stage-specific arguments.

use crate::config::GlobalConfig;
use crate::error::VaubanError;
use crate::stage::StageKind;
use crate::tree::{ImageNode, ImageTree};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Command line handed to the external builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuilderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuilderCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn toggle(self, kind: StageKind, enabled: bool) -> Self {
        self.arg(kind.flag()).arg(yes_no(enabled))
    }

    /// Value following `flag`, if present
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Every word double-quoted, ready to paste into a shell
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|w| format!("\"{}\"", w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for BuilderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Release roots and images listed in `never_upload` are kept local.
pub fn should_upload(config: &GlobalConfig, node: &ImageNode) -> bool {
    !node.is_release() && !config.never_upload.iter().any(|n| n == &node.name)
}

/// Configuration steps of a node and all its ancestors, root first.
pub fn accumulated_stages(tree: &ImageTree, node: &ImageNode) -> Vec<String> {
    let lineage: Vec<&ImageNode> = tree.lineage(node).collect();
    lineage
        .iter()
        .rev()
        .flat_map(|n| n.stages.iter().cloned())
        .collect()
}

/// Removes every occurrence of each ignored step; absent entries are no-ops.
pub fn remove_ignored(stages: Vec<String>, ignored: &[String]) -> Vec<String> {
    stages
        .into_iter()
        .filter(|s| !ignored.contains(s))
        .collect()
}

/// Puts the always-applied steps first, without repeating them later.
pub fn prepend_always_applied(stages: Vec<String>, always: &[String]) -> Vec<String> {
    let mut result: Vec<String> = always.to_vec();
    result.extend(stages.into_iter().filter(|s| !always.contains(s)));
    result
}

/// Step list replayed by the conffs stage of `node`.
pub fn conffs_stages(config: &GlobalConfig, tree: &ImageTree, node: &ImageNode) -> Vec<String> {
    let stages = accumulated_stages(tree, node);
    let stages = remove_ignored(stages, &config.ignore_stage_in_conffs);
    prepend_always_applied(stages, &config.always_apply_stage_in_conffs)
}

/// Pure stage-directive functions over one tree and global configuration.
pub struct Composer<'a> {
    config: &'a GlobalConfig,
    tree: &'a ImageTree,
}

impl<'a> Composer<'a> {
    pub fn new(config: &'a GlobalConfig, tree: &'a ImageTree) -> Self {
        Self { config, tree }
    }

    /// Directives common to every stage
    pub fn base(&self, node: &ImageNode, media: &Path, branch: &str) -> BuilderCommand {
        BuilderCommand::new(&self.config.builder)
            .arg("--iso")
            .arg(media.display().to_string())
            .arg("--name")
            .arg(&node.name)
            .arg("--upload")
            .arg(yes_no(should_upload(self.config, node)))
            .arg("--branch")
            .arg(branch)
    }

    /// Appends the directives of `kind` to `cmd`.
    ///
    /// With `only`, the three sibling stages are explicitly disabled.
    /// Returns [`VaubanError::NothingToDo`] for conffs on a node without a
    /// configuration host.
    pub fn compose(
        &self,
        kind: StageKind,
        cmd: BuilderCommand,
        node: &ImageNode,
        conf_host_override: Option<&str>,
        only: bool,
    ) -> Result<BuilderCommand, VaubanError> {
        match kind {
            StageKind::Rootfs => Ok(self.rootfs(cmd, node, only)),
            StageKind::Conffs => self.conffs(cmd, node, conf_host_override, only),
            StageKind::Initramfs => Ok(self.initramfs(cmd, only)),
            StageKind::Kernel => Ok(self.kernel(cmd, only)),
        }
    }

    pub fn rootfs(&self, cmd: BuilderCommand, node: &ImageNode, only: bool) -> BuilderCommand {
        let mut cmd = cmd.toggle(StageKind::Rootfs, true);
        if only {
            cmd = disable_siblings(cmd, StageKind::Rootfs);
        }
        match self.tree.parent(node) {
            Some(parent) => cmd
                .arg("--source-image")
                .arg(&parent.name)
                .args(node.stages.iter().cloned()),
            None => cmd,
        }
    }

    pub fn conffs(
        &self,
        cmd: BuilderCommand,
        node: &ImageNode,
        conf_host_override: Option<&str>,
        only: bool,
    ) -> Result<BuilderCommand, VaubanError> {
        let host = conf_host_override
            .or(node.conf_host.as_deref())
            .ok_or_else(|| VaubanError::NothingToDo {
                name: node.name.clone(),
            })?;

        let cmd = cmd
            .toggle(StageKind::Conffs, true)
            .arg("--ansible-host")
            .arg(host)
            .arg("--source-image")
            .arg(&node.name)
            .args(conffs_stages(self.config, self.tree, node));
        Ok(if only {
            disable_siblings(cmd, StageKind::Conffs)
        } else {
            cmd
        })
    }

    pub fn initramfs(&self, cmd: BuilderCommand, only: bool) -> BuilderCommand {
        let cmd = cmd.toggle(StageKind::Initramfs, true);
        if only {
            disable_siblings(cmd, StageKind::Initramfs)
        } else {
            cmd
        }
    }

    pub fn kernel(&self, cmd: BuilderCommand, only: bool) -> BuilderCommand {
        let cmd = cmd.toggle(StageKind::Kernel, true);
        if only {
            disable_siblings(cmd, StageKind::Kernel)
        } else {
            cmd
        }
    }
}

fn disable_siblings(cmd: BuilderCommand, kind: StageKind) -> BuilderCommand {
    StageKind::ALL
        .iter()
        .filter(|k| **k != kind)
        .fold(cmd, |cmd, k| cmd.toggle(*k, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaubanConfig;

    const CHAIN: &str = r#"
configuration:
  never_upload: [mid]
root:
  stages: [a]
  mid:
    stages: [b]
    leaf:
      stages: [c]
      conffs: leaf-host
"#;

    fn setup() -> (GlobalConfig, ImageTree) {
        let config = VaubanConfig::from_yaml_str(CHAIN).unwrap();
        let tree = ImageTree::from_config(&config).unwrap();
        (config.global, tree)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_accumulation_is_root_first() {
        let (_, tree) = setup();
        let leaf = tree.resolve("leaf").unwrap();
        assert_eq!(accumulated_stages(&tree, leaf), strings(&["a", "b", "c"]));
        // the node itself keeps only its own steps
        assert_eq!(leaf.stages, strings(&["c"]));
    }

    #[test]
    fn test_remove_ignored() {
        let stages = strings(&["a", "b", "c"]);
        assert_eq!(
            remove_ignored(stages.clone(), &strings(&["b"])),
            strings(&["a", "c"])
        );
        assert_eq!(remove_ignored(stages.clone(), &strings(&["z"])), stages);
        let once = remove_ignored(stages, &strings(&["b"]));
        assert_eq!(remove_ignored(once.clone(), &strings(&["b"])), once);
    }

    #[test]
    fn test_always_applied_go_first() {
        let stages = strings(&["a", "b", "c"]);
        assert_eq!(
            prepend_always_applied(stages, &strings(&["sshd", "b"])),
            strings(&["sshd", "b", "a", "c"])
        );
    }

    #[test]
    fn test_upload_policy() {
        let (config, tree) = setup();
        assert!(!should_upload(&config, tree.resolve("root").unwrap()));
        assert!(!should_upload(&config, tree.resolve("mid").unwrap()));
        assert!(should_upload(&config, tree.resolve("leaf").unwrap()));
    }

    #[test]
    fn test_rootfs_uses_parent_image() {
        let (config, tree) = setup();
        let composer = Composer::new(&config, &tree);
        let leaf = tree.resolve("leaf").unwrap();
        let base = composer.base(leaf, Path::new("/srv/iso/root"), "main");
        let cmd = composer.rootfs(base, leaf, true);

        assert_eq!(cmd.value_of("--rootfs"), Some("yes"));
        assert_eq!(cmd.value_of("--conffs"), Some("no"));
        assert_eq!(cmd.value_of("--kernel"), Some("no"));
        assert_eq!(cmd.value_of("--source-image"), Some("mid"));
        assert_eq!(cmd.args.last().map(String::as_str), Some("c"));
        assert_eq!(cmd.value_of("--upload"), Some("yes"));
    }

    #[test]
    fn test_rootfs_of_release_has_no_source() {
        let (config, tree) = setup();
        let composer = Composer::new(&config, &tree);
        let root = tree.resolve("root").unwrap();
        let cmd = composer.rootfs(BuilderCommand::new("b"), root, false);
        assert_eq!(cmd.args, strings(&["--rootfs", "yes"]));
    }

    #[test]
    fn test_conffs_targets_own_image() {
        let (config, tree) = setup();
        let composer = Composer::new(&config, &tree);
        let leaf = tree.resolve("leaf").unwrap();
        let cmd = composer
            .conffs(BuilderCommand::new("b"), leaf, None, true)
            .unwrap();
        assert_eq!(
            cmd.args,
            strings(&[
                "--conffs",
                "yes",
                "--ansible-host",
                "leaf-host",
                "--source-image",
                "leaf",
                "a",
                "b",
                "c",
                "--rootfs",
                "no",
                "--initramfs",
                "no",
                "--kernel",
                "no",
            ])
        );
    }

    #[test]
    fn test_conffs_without_host_is_nothing_to_do() {
        let (config, tree) = setup();
        let composer = Composer::new(&config, &tree);
        let mid = tree.resolve("mid").unwrap();
        let err = composer
            .conffs(BuilderCommand::new("b"), mid, None, true)
            .unwrap_err();
        assert!(err.is_nothing_to_do());

        let cmd = composer
            .conffs(BuilderCommand::new("b"), mid, Some("override"), false)
            .unwrap();
        assert_eq!(cmd.value_of("--ansible-host"), Some("override"));
    }

    #[test]
    fn test_render_quotes_words() {
        let cmd = BuilderCommand::new("./vauban.sh").arg("--name").arg("web");
        assert_eq!(cmd.render(), "\"./vauban.sh\" \"--name\" \"web\"");
    }
}
