use crate::config::{RawNode, ScheduleOptions, VaubanConfig};
use crate::error::VaubanError;
use serde::Serialize;

pub type NodeId = usize;

/// Base installation medium of a release and its published checksum index.
/// Both halves are required together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    pub url: String,
    pub checksums_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub cron: String,
    pub options: ScheduleOptions,
}

/// One buildable image definition.
#[derive(Clone, Debug, Serialize)]
pub struct ImageNode {
    pub id: NodeId,
    /// Key of the node in the definition file
    pub key: String,
    /// Lookup name: the explicit `name` override, or the key
    pub name: String,
    /// Name of the release root this node descends from
    pub release_id: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Configuration steps of this node only, never inherited entries
    pub stages: Vec<String>,
    pub conf_host: Option<String>,
    pub branch: Option<String>,
    /// Inherited unchanged from the release root
    pub base_media: Option<MediaRef>,
    pub schedule: Option<Schedule>,
}

impl ImageNode {
    pub fn is_release(&self) -> bool {
        self.parent.is_none()
    }

    fn matches(&self, name: &str) -> bool {
        self.key == name || self.name == name
    }
}

/// Arena of image definitions in depth-first pre-order.
///
/// The tree owns every node; nodes refer to their parent and children by
/// index, so a child never owns its parent and is never re-parented.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageTree {
    nodes: Vec<ImageNode>,
}

impl ImageTree {
    pub fn from_config(config: &VaubanConfig) -> Result<Self, VaubanError> {
        let mut tree = ImageTree::default();
        for root in &config.roots {
            tree.insert(root, None, None)?;
        }
        Ok(tree)
    }

    fn insert(
        &mut self,
        raw: &RawNode,
        parent: Option<NodeId>,
        release: Option<(&str, &Option<MediaRef>)>,
    ) -> Result<NodeId, VaubanError> {
        let name = match &raw.name {
            Some(n) => n.trim().to_string(),
            None => raw.key.trim().to_string(),
        };
        if name.is_empty() {
            return Err(VaubanError::structural(&raw.path, "image has no name"));
        }

        let own_media = match (&raw.url, &raw.sha512sums) {
            (Some(url), Some(sums)) => Some(MediaRef {
                url: url.clone(),
                checksums_url: sums.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(VaubanError::structural(
                    &raw.path,
                    "`url` and `sha512sums` must be set together",
                ))
            }
        };

        let (release_id, base_media) = match release {
            None => (name.clone(), own_media),
            Some((release_id, media)) => {
                if own_media.is_some() {
                    return Err(VaubanError::structural(
                        &raw.path,
                        "`url`/`sha512sums` are only allowed on a release root",
                    ));
                }
                (release_id.to_string(), media.clone())
            }
        };

        let id = self.nodes.len();
        self.nodes.push(ImageNode {
            id,
            key: raw.key.clone(),
            name,
            release_id: release_id.clone(),
            parent,
            children: Vec::new(),
            stages: raw.stages.clone(),
            conf_host: raw.conffs.clone(),
            branch: raw.branch.clone(),
            base_media: base_media.clone(),
            schedule: raw.schedule.as_ref().map(|cron| Schedule {
                cron: cron.clone(),
                options: raw.schedule_options.clone().unwrap_or_default(),
            }),
        });

        for child in &raw.children {
            let child_id = self.insert(child, Some(id), Some((&release_id, &base_media)))?;
            self.nodes[id].children.push(child_id);
        }
        Ok(id)
    }

    /// Find an image by key or name. Depth-first, first match wins.
    pub fn resolve(&self, name: &str) -> Result<&ImageNode, VaubanError> {
        self.nodes
            .iter()
            .find(|n| n.matches(name))
            .ok_or_else(|| VaubanError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn get(&self, id: NodeId) -> Option<&ImageNode> {
        self.nodes.get(id)
    }

    pub fn parent(&self, node: &ImageNode) -> Option<&ImageNode> {
        node.parent.and_then(|p| self.nodes.get(p))
    }

    /// Names in tree order
    pub fn list_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// The node itself followed by its ancestors up to the release root
    pub fn lineage<'a>(&'a self, node: &'a ImageNode) -> impl Iterator<Item = &'a ImageNode> + 'a {
        std::iter::successors(Some(node), move |n| self.parent(n))
    }

    pub fn nodes(&self) -> &[ImageNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes carrying a build schedule, in tree order
    pub fn scheduled(&self) -> impl Iterator<Item = (&ImageNode, &Schedule)> + '_ {
        self.nodes
            .iter()
            .filter_map(|n| n.schedule.as_ref().map(|s| (n, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(yaml: &str) -> ImageTree {
        ImageTree::from_config(&VaubanConfig::from_yaml_str(yaml).unwrap()).unwrap()
    }

    const CHAIN: &str = r#"
debian-12:
  url: https://example.org/debian.iso
  sha512sums: https://example.org/SHA512SUMS
  stages: [a]
  debian-12-mid:
    stages: [b]
    leaf:
      name: debian-12-leaf
      stages: [c]
alpine:
  stages: [x]
"#;

    #[test]
    fn test_release_id_propagates() {
        let t = tree(CHAIN);
        for node in t.nodes() {
            let root = t.lineage(node).last().unwrap();
            assert!(root.is_release());
            assert_eq!(node.release_id, root.name);
        }
        assert_eq!(t.resolve("debian-12-leaf").unwrap().release_id, "debian-12");
        assert_eq!(t.resolve("alpine").unwrap().release_id, "alpine");
    }

    #[test]
    fn test_media_inherited_from_root() {
        let t = tree(CHAIN);
        let leaf = t.resolve("leaf").unwrap();
        assert_eq!(
            leaf.base_media.as_ref().map(|m| m.url.as_str()),
            Some("https://example.org/debian.iso")
        );
        assert!(t.resolve("alpine").unwrap().base_media.is_none());
    }

    #[test]
    fn test_resolve_by_key_or_override() {
        let t = tree(CHAIN);
        let by_key = t.resolve("leaf").unwrap();
        let by_name = t.resolve("debian-12-leaf").unwrap();
        assert_eq!(by_key.id, by_name.id);
        assert!(matches!(
            t.resolve("missing"),
            Err(VaubanError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_names_in_tree_order() {
        let t = tree(CHAIN);
        let names: Vec<_> = t.list_names().collect();
        assert_eq!(names, vec!["debian-12", "debian-12-mid", "debian-12-leaf", "alpine"]);
        // restartable
        assert_eq!(t.list_names().count(), 4);
    }

    #[test]
    fn test_duplicate_names_first_match_wins() {
        let t = tree("a:\n  dup:\n    stages: [one]\nb:\n  dup:\n    stages: [two]\n");
        assert_eq!(t.resolve("dup").unwrap().stages, vec!["one"]);
    }

    #[test]
    fn test_unpaired_media_rejected() {
        let config = VaubanConfig::from_yaml_str("debian:\n  url: https://x/iso\n").unwrap();
        let err = ImageTree::from_config(&config).unwrap_err();
        assert!(matches!(err, VaubanError::StructuralConfig { .. }));

        let config = VaubanConfig::from_yaml_str("debian:\n  sha512sums: https://x/sums\n").unwrap();
        assert!(ImageTree::from_config(&config).is_err());
    }

    #[test]
    fn test_media_on_child_rejected() {
        let yaml = "debian:\n  child:\n    url: u\n    sha512sums: s\n";
        let config = VaubanConfig::from_yaml_str(yaml).unwrap();
        assert!(ImageTree::from_config(&config).is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = VaubanConfig::from_yaml_str("debian:\n  child:\n    name: ''\n").unwrap();
        let err = ImageTree::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("debian.child"));
    }
}
