//! Dependency graph and tool table, computed from a stored version.
//!
//! Both are rebuilt from the version's own files by re-parsing them, so they
//! never depend on anything outside the record they are cached on.

use crate::images::recorded_for;
use crate::imports::FileSet;
use crate::parse::{DescriptorParser, Step};
use dockyard_schema::{
    Graph, GraphEdge, GraphNode, ImageReference, ImageSpec, ToolRow, ToolTable, Version,
};

/// Steps of a stored version.
pub fn version_steps(version: &Version, parser: &dyn DescriptorParser) -> Vec<Step> {
    parser.parse(&FileSet::from_version(version)).steps
}

pub fn build_graph(steps: &[Step]) -> Graph {
    let nodes = steps
        .iter()
        .map(|s| GraphNode {
            id: s.id.clone(),
            file: s.file.clone(),
            image: s.image.clone(),
        })
        .collect();
    let mut edges: Vec<GraphEdge> = steps
        .iter()
        .flat_map(|s| {
            s.depends_on.iter().map(|dep| GraphEdge {
                from: dep.clone(),
                to: s.id.clone(),
            })
        })
        .collect();
    edges.sort();
    edges.dedup();
    Graph { nodes, edges }
}

fn image_digests(image: &str, images: &[ImageReference]) -> Vec<String> {
    let Ok(spec) = ImageSpec::parse(image) else {
        return Vec::new();
    };
    recorded_for(&spec, images)
        .map(|r| {
            r.digests
                .iter()
                .map(|d| format!("{}={}", d.platform(), d.digest))
                .collect()
        })
        .unwrap_or_default()
}

pub fn build_tool_table(steps: &[Step], images: &[ImageReference]) -> ToolTable {
    ToolTable {
        rows: steps
            .iter()
            .map(|s| ToolRow {
                id: s.id.clone(),
                file: s.file.clone(),
                image: s.image.clone(),
                digests: s
                    .image
                    .as_deref()
                    .map(|i| image_digests(i, images))
                    .unwrap_or_default(),
            })
            .collect(),
    }
}
