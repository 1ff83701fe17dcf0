//! Project identity documents.
//!
//! The identity document is the human-editable face of a project (the
//! *noumenon*), distinct from the machine-owned event log (the
//! *phenomena*). It is written when a context is created as - or upgraded
//! to - a project, indexed by content hash in the store, and reconciled on
//! resume. Drift is reported, never auto-healed.

use baton_core::{compute_content_hash, BatonResult, Context, StoreError};
use std::path::{Path, PathBuf};

/// Directory-safe slug derived from the context goal.
fn slug(goal: &str) -> String {
    let mut out = String::new();
    for c in goal.chars().take(48) {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if (c == ' ' || c == '-' || c == '_') && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "project".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Path of the identity document for a context.
pub fn identity_document_path(projects_dir: &Path, context: &Context) -> PathBuf {
    let short = &context.context_id.to_string()[..8];
    projects_dir
        .join(format!("{}-{}", slug(&context.goal), short))
        .join("identity.md")
}

/// Render and write the identity document, returning its path and the hex
/// SHA-256 of the written content.
///
/// An existing document is left untouched (it is human-editable); its
/// current hash is returned instead so the caller can refresh the index.
pub fn write_identity_document(
    projects_dir: &Path,
    context: &Context,
) -> BatonResult<(PathBuf, String)> {
    let path = identity_document_path(projects_dir, context);

    if path.exists() {
        let existing = std::fs::read(&path).map_err(|e| StoreError::Query {
            reason: format!("identity document read failed: {e}"),
        })?;
        return Ok((path, hex::encode(compute_content_hash(&existing))));
    }

    let content = render(context);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Query {
            reason: format!("projects directory create failed: {e}"),
        })?;
    }
    std::fs::write(&path, &content).map_err(|e| StoreError::Query {
        reason: format!("identity document write failed: {e}"),
    })?;

    Ok((path, hex::encode(compute_content_hash(content.as_bytes()))))
}

/// Hash the document currently on disk, if present.
pub(crate) fn hash_on_disk(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| hex::encode(compute_content_hash(&bytes)))
}

fn render(context: &Context) -> String {
    format!(
        "# {goal}\n\n\
         ## Goal\n\n{goal}\n\n\
         ## Vision\n\n_Describe where this project should end up._\n\n\
         ## Context\n\n_Background a newcomer needs before touching this project._\n\n\
         ## Requirements\n\n- [ ] _First requirement_\n\n\
         ## Success Criteria\n\n- _What done looks like_\n\n\
         ## Notes\n\n\
         \n---\n\
         Session: `{id}` | Created: {created}\n",
        goal = context.goal,
        id = context.context_id,
        created = context.created_at.format("%Y-%m-%d %H:%M UTC"),
    )
}
