// # Conflict & Duplicate Resolver
//
// Two jobs before anything is committed:
//
// (a) grouping: items whose filenames share a base name and a recognized
//     disc/part suffix become one ordered group, so a multi-disc set is
//     committed as a single parent entry with ordered children;
// (b) deduplication: each item's (system, digest) pair is checked against
//     already-committed catalog entries, and existing matches drop out of
//     the commit plan as duplicates of the existing entry.
//
// The output plan is whole-group or singleton, never a partial group.

use crate::db::{Database, DbCatalogEntry};
use crate::hashing::DigestSet;
use crate::lookup::normalize;
use crate::systems::SystemId;
use md5::{Digest, Md5};
use sha1::Sha1;
use std::path::{Path, PathBuf};
use tracing::info;

/// An item that finished metadata resolution and is ready to be planned.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item_id: String,
    pub source_path: PathBuf,
    pub system: SystemId,
    pub title: String,
    pub region: Option<String>,
    pub digests: DigestSet,
}

/// One physical file the committer must place, with its catalog row.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub item_id: String,
    pub source_path: PathBuf,
    pub entry: DbCatalogEntry,
}

/// Either "create one entry" or "create one parent with N ordered
/// children". Built per pinned batch.
#[derive(Debug, Clone)]
pub struct CommitPlan {
    /// Present for multi-part groups only.
    pub parent: Option<DbCatalogEntry>,
    pub files: Vec<PlannedFile>,
}

/// Result of planning one batch: the plan (if anything is left to commit)
/// plus the members that turned out to be duplicates of committed entries.
#[derive(Debug)]
pub struct PlanOutcome {
    pub plan: Option<CommitPlan>,
    /// `(item_id, existing_entry_id)`
    pub duplicates: Vec<(String, String)>,
}

/// Cluster key for multi-part items: the normalized base name, present only
/// when the filename carries a recognized disc/part suffix. Items sharing a
/// key are dispatched to one worker as a pinned batch.
pub fn group_key_for(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = normalize::stem(file_name);
    let (base, _) = normalize::split_disc_suffix(stem)?;
    let key = normalize::normalize_title(base);
    (!key.is_empty()).then_some(key)
}

/// Parsed disc/part ordinal of a filename, if any.
pub fn disc_ordinal_for(path: &Path) -> Option<u32> {
    let file_name = path.file_name()?.to_str()?;
    let stem = normalize::stem(file_name);
    normalize::split_disc_suffix(stem).map(|(_, n)| n)
}

/// Managed storage destination for a committed file.
pub fn relative_dest_for(system: SystemId, source_path: &Path) -> PathBuf {
    let file_name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    PathBuf::from("roms").join(system.as_str()).join(file_name)
}

/// Order group members: parsed numeric suffix first, lexical filename as
/// the fallback when no suffix parses.
fn sort_members(members: &mut [ResolvedItem]) {
    members.sort_by(|a, b| {
        let ord_a = disc_ordinal_for(&a.source_path).unwrap_or(u32::MAX);
        let ord_b = disc_ordinal_for(&b.source_path).unwrap_or(u32::MAX);
        ord_a
            .cmp(&ord_b)
            .then_with(|| a.source_path.file_name().cmp(&b.source_path.file_name()))
    });
}

/// Aggregate digest set for a multi-part parent: digests over the ordered
/// child digests, sized as the whole set.
fn group_digests(members: &[ResolvedItem]) -> DigestSet {
    let joined: String = members.iter().map(|m| m.digests.md5.as_str()).collect();
    let bytes = joined.as_bytes();

    let mut crc = crc32fast::Hasher::new();
    crc.update(bytes);
    let mut md5 = Md5::new();
    md5.update(bytes);
    let mut sha1 = Sha1::new();
    sha1.update(bytes);

    DigestSet {
        crc32: format!("{:08X}", crc.finalize()),
        crc32_headerless: None,
        md5: hex::encode_upper(md5.finalize()),
        sha1: hex::encode_upper(sha1.finalize()),
        size: members.iter().map(|m| m.digests.size).sum(),
    }
}

/// Build the commit plan for one batch, removing committed duplicates.
pub async fn build_commit_plan(
    db: &Database,
    mut members: Vec<ResolvedItem>,
) -> Result<PlanOutcome, sqlx::Error> {
    let mut duplicates = Vec::new();
    let mut remaining = Vec::new();

    for member in members.drain(..) {
        match db
            .find_entry_by_identity(member.system, &member.digests.md5)
            .await?
        {
            Some(existing) => {
                info!(
                    "{} duplicates committed entry {} ('{}')",
                    member.source_path.display(),
                    existing.id,
                    existing.title
                );
                duplicates.push((member.item_id, existing.id));
            }
            None => remaining.push(member),
        }
    }

    if remaining.is_empty() {
        return Ok(PlanOutcome {
            plan: None,
            duplicates,
        });
    }

    if remaining.len() == 1 {
        let member = remaining.remove(0);
        let dest = relative_dest_for(member.system, &member.source_path);
        let entry = DbCatalogEntry::new(
            member.system,
            &member.title,
            member.region.clone(),
            &member.digests,
            &dest.to_string_lossy(),
        );
        return Ok(PlanOutcome {
            plan: Some(CommitPlan {
                parent: None,
                files: vec![PlannedFile {
                    item_id: member.item_id,
                    source_path: member.source_path,
                    entry,
                }],
            }),
            duplicates,
        });
    }

    sort_members(&mut remaining);

    // The parent's identity is derived from the ordered child digests, so
    // it never collides with a child row on the (system, digest) index
    let parent_digests = group_digests(&remaining);
    let first = &remaining[0];
    let first_dest = relative_dest_for(first.system, &first.source_path);
    let parent = DbCatalogEntry::new(
        first.system,
        &first.title,
        first.region.clone(),
        &parent_digests,
        &first_dest.to_string_lossy(),
    );

    let files = remaining
        .into_iter()
        .enumerate()
        .map(|(index, member)| {
            let dest = relative_dest_for(member.system, &member.source_path);
            let mut entry = DbCatalogEntry::new(
                member.system,
                &member.title,
                member.region.clone(),
                &member.digests,
                &dest.to_string_lossy(),
            );
            entry.parent_group_id = Some(parent.id.clone());
            entry.child_order = Some(index as i64 + 1);
            PlannedFile {
                item_id: member.item_id,
                source_path: member.source_path,
                entry,
            }
        })
        .collect();

    Ok(PlanOutcome {
        plan: Some(CommitPlan {
            parent: Some(parent),
            files,
        }),
        duplicates,
    })
}
