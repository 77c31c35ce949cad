//! Path & identity - canonical string identity of an instance, encoding its
//! containment chain.
//!
//! A path looks like `Module$Entity/id[/Module$Entity/id]*`: segments
//! alternate between escaped fully qualified entity names and identifier
//! values. Paths are append-only; ancestor walks are pure string splits and
//! a persisted path is never mutated.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::FQ_SEP;
use crate::error::{Result, StoreError};

/// Separates name segments and id segments inside a path.
pub const PATH_SEP: char = '/';
/// Replaces the fq separator inside a name segment so paths stay splittable.
pub const ESCAPE: char = '$';

/// Replace the module separator in `Module/Name` so the result is a single
/// path segment.
pub fn escape_fq_name(fq: &str) -> String {
    fq.replace(FQ_SEP, &ESCAPE.to_string())
}

/// Inverse of [`escape_fq_name`].
pub fn unescape_fq_name(segment: &str) -> String {
    segment.replace(ESCAPE, &FQ_SEP.to_string())
}

/// Path of a root (uncontained) instance.
pub fn root_path(module: &str, name: &str, id: &str) -> String {
    format!("{module}{ESCAPE}{name}{PATH_SEP}{id}")
}

/// Path of a contained child under `parent_path`.
pub fn child_path(parent_path: &str, module: &str, name: &str, id: &str) -> String {
    format!(
        "{parent_path}{PATH_SEP}{}{PATH_SEP}{id}",
        escape_fq_name(&format!("{module}{FQ_SEP}{name}"))
    )
}

/// Compute the path for a new instance: under the parent when one was
/// injected by the caller, else a single-segment root.
pub fn allocate(module: &str, name: &str, id: &str, parent_path: Option<&str>) -> String {
    match parent_path {
        Some(pp) if !pp.is_empty() => child_path(pp, module, name, id),
        _ => root_path(module, name, id),
    }
}

/// Generate a fresh path identifier for instances without a set `@id`.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// One `(entity, id)` level of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub entity_fq: String,
    pub id: String,
}

/// Parse a path back into its containment chain, root first.
pub fn parse(path: &str) -> Result<Vec<PathSegment>> {
    let segments: Vec<&str> = path.split(PATH_SEP).collect();
    if segments.len() < 2 || segments.len() % 2 != 0 {
        return Err(StoreError::InvalidInput(format!("malformed path: {path}")));
    }
    let mut chain = Vec::with_capacity(segments.len() / 2);
    for pair in segments.chunks(2) {
        let name_seg = pair[0];
        let id = pair[1];
        if !name_seg.contains(ESCAPE) || id.is_empty() {
            return Err(StoreError::InvalidInput(format!("malformed path: {path}")));
        }
        chain.push(PathSegment {
            entity_fq: unescape_fq_name(name_seg),
            id: id.to_string(),
        });
    }
    Ok(chain)
}

/// Ancestors of `path`, nearest parent first: each entry is the ancestor's
/// entity fq and its full path. A root path has no ancestors. This sequence
/// drives the ancestral ownership checks.
pub fn ancestors(path: &str) -> Result<Vec<(String, String)>> {
    let segments: Vec<&str> = path.split(PATH_SEP).collect();
    if segments.len() < 2 || segments.len() % 2 != 0 {
        return Err(StoreError::InvalidInput(format!("malformed path: {path}")));
    }
    let levels = segments.len() / 2;
    let mut out = Vec::with_capacity(levels.saturating_sub(1));
    for level in (1..levels).rev() {
        let upto = level * 2;
        let parent_path = segments[..upto].join(&PATH_SEP.to_string());
        let entity_fq = unescape_fq_name(segments[upto - 2]);
        out.push((entity_fq, parent_path));
    }
    Ok(out)
}

/// Entity fq of the last (owning) segment.
pub fn leaf_entity(path: &str) -> Result<String> {
    let chain = parse(path)?;
    Ok(chain.last().map(|s| s.entity_fq.clone()).unwrap_or_default())
}
