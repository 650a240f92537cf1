//! The workspace member dependency graph.
//!
//! A path dependency whose target directory is another member becomes an
//! edge `dependency -> dependent`. Kahn's algorithm yields the build order;
//! when it cannot place every member the remainder holds at least one
//! cycle, which a DFS enumerates for the error message.

use crate::{Workspace, WorkspaceError, WorkspaceMember};
use kcjpm_types::DependencyKind;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Build edges between workspace members.
#[derive(Debug, Clone)]
pub struct WorkspaceGraph {
    /// dependency name -> names depending on it
    adjacency: BTreeMap<String, BTreeSet<String>>,
    /// member name -> number of members it depends on
    in_degree: BTreeMap<String, usize>,
}

impl WorkspaceGraph {
    /// Derive the graph for a set of members.
    pub fn build(members: &[WorkspaceMember]) -> Self {
        let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();

        for member in members {
            adjacency.entry(member.name.clone()).or_default();
            in_degree.entry(member.name.clone()).or_insert(0);
        }

        for member in members {
            for spec in member.manifest.dependencies.values() {
                if spec.kind() != Ok(DependencyKind::Path) {
                    continue;
                }
                let Some(rel) = &spec.path else { continue };
                let Ok(target) = member.path.join(rel).canonicalize() else {
                    continue;
                };
                let Some(dependency) = members.iter().find(|m| m.path == target) else {
                    continue;
                };
                if dependency.name == member.name {
                    continue;
                }

                let inserted = adjacency
                    .entry(dependency.name.clone())
                    .or_default()
                    .insert(member.name.clone());
                if inserted {
                    *in_degree.entry(member.name.clone()).or_insert(0) += 1;
                }
            }
        }

        Self {
            adjacency,
            in_degree,
        }
    }

    /// Derive the graph for a whole workspace.
    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self::build(&workspace.members)
    }

    /// Members with no dependencies inside the workspace.
    pub fn roots(&self) -> Vec<String> {
        self.in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Members that depend on `name`.
    pub fn dependents_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Initial in-degree per member.
    pub fn in_degrees(&self) -> &BTreeMap<String, usize> {
        &self.in_degree
    }

    /// Kahn topological sort.
    ///
    /// Every edge `a -> b` satisfies `index(a) < index(b)` in the result.
    /// Fails with [`WorkspaceError::Cycle`] when the graph is cyclic.
    pub fn topological_sort(&self) -> Result<Vec<String>, WorkspaceError> {
        let mut remaining = self.in_degree.clone();
        let mut queue: VecDeque<String> = remaining
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| n.clone())
            .collect();
        let mut sorted = Vec::with_capacity(remaining.len());

        while let Some(name) = queue.pop_front() {
            for dependent in self.dependents_of(&name) {
                if let Some(degree) = remaining.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.to_string());
                    }
                }
            }
            sorted.push(name);
        }

        if sorted.len() < self.in_degree.len() {
            return Err(WorkspaceError::Cycle {
                cycles: self.detect_cycles(),
            });
        }

        Ok(sorted)
    }

    /// Enumerate cycles by DFS over the dependency edges.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let mut marks: BTreeMap<&str, Mark> = self
            .in_degree
            .keys()
            .map(|n| (n.as_str(), Mark::White))
            .collect();
        let mut cycles = Vec::new();

        fn visit<'a>(
            node: &'a str,
            graph: &'a WorkspaceGraph,
            marks: &mut BTreeMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            marks.insert(node, Mark::Grey);
            stack.push(node);

            for next in graph.dependents_of(node) {
                match marks.get(next).copied().unwrap_or(Mark::White) {
                    Mark::White => visit(next, graph, marks, stack, cycles),
                    Mark::Grey => {
                        if let Some(start) = stack.iter().position(|n| *n == next) {
                            cycles.push(
                                stack[start..].iter().map(|s| s.to_string()).collect(),
                            );
                        }
                    }
                    Mark::Black => {}
                }
            }

            stack.pop();
            marks.insert(node, Mark::Black);
        }

        let nodes: Vec<&str> = self.in_degree.keys().map(String::as_str).collect();
        for node in nodes {
            if marks.get(node) == Some(&Mark::White) {
                let mut stack = Vec::new();
                visit(node, self, &mut marks, &mut stack, &mut cycles);
            }
        }

        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcjpm_manifest::MANIFEST_FILE_NAME;
    use std::fs;
    use std::path::Path;

    fn member_on_disk(root: &Path, name: &str, path_deps: &[&str]) -> WorkspaceMember {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let deps = path_deps
            .iter()
            .map(|d| format!("{} = {{ path = \"../{}\" }}\n", d, d))
            .collect::<String>();
        fs::write(
            dir.join(MANIFEST_FILE_NAME),
            format!(
                "[package]\nname = \"{}\"\nversion = \"0.1.0\"\n\n[dependencies]\n{}",
                name, deps
            ),
        )
        .unwrap();
        let manifest = kcjpm_manifest::find_manifest(&dir).unwrap();
        WorkspaceMember {
            name: name.to_string(),
            path: dir.canonicalize().unwrap(),
            manifest,
        }
    }

    /// core, utils -> core, app -> {core, utils}
    fn diamond(root: &Path) -> Vec<WorkspaceMember> {
        vec![
            member_on_disk(root, "core", &[]),
            member_on_disk(root, "utils", &["core"]),
            member_on_disk(root, "app", &["core", "utils"]),
        ]
    }

    #[test]
    fn edges_and_degrees() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = WorkspaceGraph::build(&diamond(tmp.path()));

        assert_eq!(graph.roots(), vec!["core"]);
        assert_eq!(graph.in_degrees()["core"], 0);
        assert_eq!(graph.in_degrees()["utils"], 1);
        assert_eq!(graph.in_degrees()["app"], 2);

        let core_dependents: Vec<_> = graph.dependents_of("core").collect();
        assert_eq!(core_dependents, vec!["app", "utils"]);
    }

    #[test]
    fn topological_order_respects_edges() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = WorkspaceGraph::build(&diamond(tmp.path()));
        let sorted = graph.topological_sort().unwrap();

        let index = |name: &str| sorted.iter().position(|n| n == name).unwrap();
        assert!(index("core") < index("utils"));
        assert!(index("core") < index("app"));
        assert!(index("utils") < index("app"));
    }

    #[test]
    fn cycle_is_reported_with_its_members() {
        // app -> utils -> core -> app
        let tmp = tempfile::tempdir().unwrap();
        let members = vec![
            member_on_disk(tmp.path(), "core", &["app"]),
            member_on_disk(tmp.path(), "utils", &["core"]),
            member_on_disk(tmp.path(), "app", &["utils"]),
        ];
        let graph = WorkspaceGraph::build(&members);

        let err = graph.topological_sort().unwrap_err();
        match err {
            WorkspaceError::Cycle { cycles } => {
                assert_eq!(cycles.len(), 1);
                let cycle = &cycles[0];
                assert_eq!(cycle.len(), 3);
                for name in ["app", "utils", "core"] {
                    assert!(cycle.contains(&name.to_string()));
                }
            }
            other => panic!("expected Cycle, got {:?}", other),
        }
    }

    #[test]
    fn external_path_deps_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        // "vendored" exists on disk but is not a member
        fs::create_dir_all(tmp.path().join("vendored")).unwrap();
        let members = vec![member_on_disk(tmp.path(), "solo", &["vendored"])];
        let graph = WorkspaceGraph::build(&members);
        assert_eq!(graph.in_degrees()["solo"], 0);
        assert_eq!(graph.topological_sort().unwrap(), vec!["solo"]);
    }
}
