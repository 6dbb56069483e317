use mysql_async::{FromRowError, Pool, Row, TxOpts, from_row_opt, prelude::*};
use tracing::{Level, debug, instrument};

use api::changelog::{ChangeLogEntry, ChangeLogUuid, ChangeType, EntityType};
use api::file::{FileRecord, FileType, FileUuid, GroupUuid, MetadataValueType};
use api::media::{
    AnalysisUuid, DetectionMethod, DirectoryAnalysis, ExternalMetadata, MediaFile, MediaItem,
    MediaItemStatus, MediaType, MediaTypeUuid, MediaUuid,
};
use api::root::{RootUuid, StorageRoot, StorageRootUpdate};
use api::rule::{DetectionRule, RuleType, RuleUuid};
use api::scan::{ScanCounters, ScanHistory, ScanMode, ScanStatus, ScanUuid};

use crate::db::{FileUpsert, UpsertOp};
use crate::storage::path::file_name;

// mariadb backend
//
// the catalog is small enough that a manual query layer beats pulling in an
// orm, and it keeps the transaction boundaries visible: every public
// function here owns exactly one transaction (or is a single statement),
// and change_log rows are written inside the same transaction as the
// mutation they describe.

const SCHEMA: &str = include_str!("schema.sql");

pub async fn init_schema(pool: Pool) -> anyhow::Result<()> {
    let mut conn = pool.get_conn().await?;

    for statement in SCHEMA.split(';') {
        let statement = statement
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");

        if statement.trim().is_empty() {
            continue;
        }

        statement.ignore(&mut conn).await?;
    }

    Ok(())
}

// escape a path for use as a LIKE prefix
fn escape_like(path: &str) -> String {
    path.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn json_vec(globs: &[String]) -> String {
    serde_json::to_string(globs).unwrap_or_else(|_| "[]".to_owned())
}

// change log rows ride inside the mutating transaction, so the helper works
// on the transaction handle rather than the pool
async fn append_change_tx(
    tx: &mut mysql_async::Transaction<'_>,
    entity_type: EntityType,
    entity_id: &str,
    change_type: ChangeType,
    new_data: Option<&serde_json::Value>,
    detected_at: i64,
) -> anyhow::Result<()> {
    r"
        INSERT INTO change_log (change_uuid, entity_type, entity_id, change_type, new_data, detected_at, processed)
        VALUES (UUID_SHORT(), :entity_type, :entity_id, :change_type, :new_data, :detected_at, FALSE)"
        .with(params! {
            "entity_type" => entity_type.as_str(),
            "entity_id" => entity_id,
            "change_type" => change_type.as_str(),
            "new_data" => new_data.map(|v| v.to_string()),
            "detected_at" => detected_at,
        })
        .ignore(&mut *tx)
        .await?;

    Ok(())
}

// storage root queries

#[instrument(level=Level::DEBUG, skip_all)]
pub async fn add_storage_root(pool: Pool, root: &StorageRoot) -> anyhow::Result<RootUuid> {
    debug!({ root_name = root.name }, "adding storage root");

    let uuid: Option<RootUuid> = r"
        INSERT INTO storage_roots (root_uuid, name, protocol, settings, enabled, max_depth, extract_metadata, detect_duplicates, include_globs, exclude_globs, last_scan)
        VALUES (UUID_SHORT(), :name, :protocol, :settings, :enabled, :max_depth, :extract_metadata, :detect_duplicates, :include_globs, :exclude_globs, NULL)
        RETURNING root_uuid"
        .with(params! {
            "name" => root.name.clone(),
            "protocol" => root.protocol().as_str(),
            "settings" => serde_json::to_string(&root.settings)?,
            "enabled" => root.enabled,
            "max_depth" => root.max_depth,
            "extract_metadata" => root.extract_metadata,
            "detect_duplicates" => root.detect_duplicates,
            "include_globs" => json_vec(&root.include_globs),
            "exclude_globs" => json_vec(&root.exclude_globs),
        })
        .first(pool.get_conn().await?)
        .await?;

    uuid.ok_or_else(|| anyhow::Error::msg("failed to add storage root"))
}

fn root_from_row(row: Row) -> anyhow::Result<(RootUuid, StorageRoot)> {
    let data = from_row_opt::<(
        RootUuid,
        String,
        String,
        bool,
        u32,
        bool,
        bool,
        String,
        String,
        Option<i64>,
    )>(row)?;

    Ok((
        data.0,
        StorageRoot {
            name: data.1,
            settings: serde_json::from_str(&data.2)?,
            enabled: data.3,
            max_depth: data.4,
            extract_metadata: data.5,
            detect_duplicates: data.6,
            include_globs: serde_json::from_str(&data.7)?,
            exclude_globs: serde_json::from_str(&data.8)?,
            last_scan: data.9,
        },
    ))
}

const ROOT_COLUMNS: &str = "root_uuid, name, settings, enabled, max_depth, extract_metadata, detect_duplicates, include_globs, exclude_globs, last_scan";

pub async fn get_storage_root(
    pool: Pool,
    root_uuid: RootUuid,
) -> anyhow::Result<Option<StorageRoot>> {
    let mut result = format!("SELECT {ROOT_COLUMNS} FROM storage_roots WHERE root_uuid = :root_uuid")
        .with(params! {"root_uuid" => root_uuid})
        .run(pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

    match result.pop() {
        Some(row) => Ok(Some(root_from_row(row)?.1)),
        None => Ok(None),
    }
}

pub async fn list_storage_roots(pool: Pool) -> anyhow::Result<Vec<(RootUuid, StorageRoot)>> {
    let result = format!("SELECT {ROOT_COLUMNS} FROM storage_roots ORDER BY name")
        .with(())
        .run(pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

    result.into_iter().map(root_from_row).collect()
}

pub async fn update_storage_root(
    pool: Pool,
    root_uuid: RootUuid,
    update: &StorageRootUpdate,
) -> anyhow::Result<()> {
    r"
        UPDATE storage_roots
        SET
            enabled = COALESCE(:enabled, enabled),
            max_depth = COALESCE(:max_depth, max_depth),
            extract_metadata = COALESCE(:extract_metadata, extract_metadata),
            detect_duplicates = COALESCE(:detect_duplicates, detect_duplicates),
            include_globs = COALESCE(:include_globs, include_globs),
            exclude_globs = COALESCE(:exclude_globs, exclude_globs)
        WHERE root_uuid = :root_uuid"
        .with(params! {
            "root_uuid" => root_uuid,
            "enabled" => update.enabled,
            "max_depth" => update.max_depth,
            "extract_metadata" => update.extract_metadata,
            "detect_duplicates" => update.detect_duplicates,
            "include_globs" => update.include_globs.as_deref().map(json_vec),
            "exclude_globs" => update.exclude_globs.as_deref().map(json_vec),
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

pub async fn set_root_last_scan(
    pool: Pool,
    root_uuid: RootUuid,
    last_scan: i64,
) -> anyhow::Result<()> {
    r"
        UPDATE storage_roots SET last_scan = :last_scan WHERE root_uuid = :root_uuid"
        .with(params! {
            "root_uuid" => root_uuid,
            "last_scan" => last_scan,
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

// file queries

const FILE_COLUMNS: &str = "file_uuid, root_uuid, path, name, extension, mime_type, file_type, size, is_directory, created, modified, deleted, deleted_at, parent_uuid, quick_hash, md5, sha1, sha256, blake3, duplicate_group, last_scan";

fn file_from_row(row: Row) -> anyhow::Result<(FileUuid, FileRecord)> {
    fn get<T>(row: &Row, idx: usize) -> anyhow::Result<T>
    where
        T: mysql_async::prelude::FromValue,
    {
        row.get_opt(idx)
            .ok_or_else(|| anyhow::Error::msg(format!("missing files column {idx}")))?
            .map_err(|err| anyhow::Error::msg(format!("bad files column {idx}: {err:?}")))
    }

    let file_type: String = get(&row, 6)?;

    Ok((
        get(&row, 0)?,
        FileRecord {
            root_uuid: get(&row, 1)?,
            path: get(&row, 2)?,
            name: get(&row, 3)?,
            extension: get(&row, 4)?,
            mime_type: get(&row, 5)?,
            file_type: FileType::parse(&file_type)
                .ok_or_else(|| anyhow::Error::msg(format!("invalid file_type {file_type}")))?,
            size: get(&row, 7)?,
            is_directory: get(&row, 8)?,
            created: get(&row, 9)?,
            modified: get(&row, 10)?,
            deleted: get(&row, 11)?,
            deleted_at: get(&row, 12)?,
            parent: get(&row, 13)?,
            quick_hash: get(&row, 14)?,
            md5: get(&row, 15)?,
            sha1: get(&row, 16)?,
            sha256: get(&row, 17)?,
            blake3: get(&row, 18)?,
            duplicate_group: get(&row, 19)?,
            last_scan: get(&row, 20)?,
        },
    ))
}

pub async fn get_file(
    pool: Pool,
    root_uuid: RootUuid,
    path: &str,
) -> anyhow::Result<Option<(FileUuid, FileRecord)>> {
    let mut result =
        format!("SELECT {FILE_COLUMNS} FROM files WHERE root_uuid = :root_uuid AND path = :path")
            .with(params! {
                "root_uuid" => root_uuid,
                "path" => path,
            })
            .run(pool.get_conn().await?)
            .await?
            .collect::<Row>()
            .await?;

    match result.pop() {
        Some(row) => Ok(Some(file_from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn get_file_by_uuid(
    pool: Pool,
    file_uuid: FileUuid,
) -> anyhow::Result<Option<FileRecord>> {
    let mut result = format!("SELECT {FILE_COLUMNS} FROM files WHERE file_uuid = :file_uuid")
        .with(params! {"file_uuid" => file_uuid})
        .run(pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

    match result.pop() {
        Some(row) => Ok(Some(file_from_row(row)?.1)),
        None => Ok(None),
    }
}

pub async fn list_children(
    pool: Pool,
    parent_uuid: FileUuid,
) -> anyhow::Result<Vec<(FileUuid, FileRecord)>> {
    let result = format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE parent_uuid = :parent_uuid AND deleted = FALSE ORDER BY path"
    )
    .with(params! {"parent_uuid" => parent_uuid})
    .run(pool.get_conn().await?)
    .await?
    .collect::<Row>()
    .await?;

    result.into_iter().map(file_from_row).collect()
}

// everything strictly under dir_path, live rows only; callers filter depth
pub async fn list_subtree(
    pool: Pool,
    root_uuid: RootUuid,
    dir_path: &str,
) -> anyhow::Result<Vec<(FileUuid, FileRecord)>> {
    let prefix = format!("{}/%", escape_like(dir_path));

    let result = format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE root_uuid = :root_uuid AND path LIKE :prefix AND deleted = FALSE ORDER BY path"
    )
    .with(params! {
        "root_uuid" => root_uuid,
        "prefix" => prefix,
    })
    .run(pool.get_conn().await?)
    .await?
    .collect::<Row>()
    .await?;

    result.into_iter().map(file_from_row).collect()
}

pub async fn find_by_hash(
    pool: Pool,
    root_uuid: Option<RootUuid>,
    quick_hash: &str,
    size: i64,
) -> anyhow::Result<Vec<FileUuid>> {
    let result = r"
        SELECT file_uuid FROM files
        WHERE quick_hash = :quick_hash
            AND size = :size
            AND deleted = FALSE
            AND (:root_uuid IS NULL OR root_uuid = :root_uuid)"
        .with(params! {
            "quick_hash" => quick_hash,
            "size" => size,
            "root_uuid" => root_uuid,
        })
        .run(pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

    let data = result
        .into_iter()
        .map(from_row_opt::<FileUuid>)
        .collect::<Result<Vec<_>, FromRowError>>()?;

    Ok(data)
}

// live bytes in the database under a directory, used by the rename tracker
// as a stand-in for a directory content hash
pub async fn sum_subtree_size(
    pool: Pool,
    root_uuid: RootUuid,
    dir_path: &str,
) -> anyhow::Result<i64> {
    let prefix = format!("{}/%", escape_like(dir_path));

    let sum: Option<i64> = r"
        SELECT COALESCE(SUM(size), 0) FROM files
        WHERE root_uuid = :root_uuid AND path LIKE :prefix AND deleted = FALSE AND is_directory = FALSE"
        .with(params! {
            "root_uuid" => root_uuid,
            "prefix" => prefix,
        })
        .first(pool.get_conn().await?)
        .await?;

    Ok(sum.unwrap_or(0))
}

#[instrument(level=Level::DEBUG, skip_all)]
pub async fn upsert_file(
    pool: Pool,
    root_uuid: RootUuid,
    upsert: &FileUpsert,
    now: i64,
) -> anyhow::Result<(FileUuid, UpsertOp)> {
    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    let existing: Option<(FileUuid, i64, i64, bool)> = r"
        SELECT file_uuid, size, modified, deleted FROM files
        WHERE root_uuid = :root_uuid AND path = :path"
        .with(params! {
            "root_uuid" => root_uuid,
            "path" => upsert.path.clone(),
        })
        .first(&mut tx)
        .await?;

    let outcome = match existing {
        None => {
            let uuid: Option<FileUuid> = r"
                INSERT INTO files (file_uuid, root_uuid, path, name, extension, mime_type, file_type, size, is_directory, created, modified, deleted, parent_uuid, last_scan)
                VALUES (UUID_SHORT(), :root_uuid, :path, :name, :extension, :mime_type, :file_type, :size, :is_directory, :created, :modified, FALSE, :parent_uuid, :now)
                RETURNING file_uuid"
                .with(params! {
                    "root_uuid" => root_uuid,
                    "path" => upsert.path.clone(),
                    "name" => upsert.name.clone(),
                    "extension" => upsert.extension.clone(),
                    "mime_type" => upsert.mime_type.clone(),
                    "file_type" => upsert.file_type.as_str(),
                    "size" => upsert.size,
                    "is_directory" => upsert.is_directory,
                    "created" => upsert.created,
                    "modified" => upsert.modified,
                    "parent_uuid" => upsert.parent,
                    "now" => now,
                })
                .first(&mut tx)
                .await?;

            let uuid = uuid.ok_or_else(|| anyhow::Error::msg("failed to insert file row"))?;

            append_change_tx(
                &mut tx,
                if upsert.is_directory {
                    EntityType::Directory
                } else {
                    EntityType::File
                },
                &uuid.to_string(),
                ChangeType::Created,
                Some(&serde_json::json!({
                    "path": upsert.path,
                    "size": upsert.size,
                    "is_directory": upsert.is_directory,
                })),
                now,
            )
            .await?;

            (uuid, UpsertOp::Inserted)
        }

        Some((uuid, old_size, old_modified, was_deleted)) => {
            let changed = old_size != upsert.size || old_modified != upsert.modified;

            if !was_deleted && !changed {
                // still present and untouched; just witness the visit
                r"
                    UPDATE files SET last_scan = :now WHERE file_uuid = :file_uuid"
                    .with(params! {
                        "file_uuid" => uuid,
                        "now" => now,
                    })
                    .ignore(&mut tx)
                    .await?;

                (uuid, UpsertOp::Unchanged)
            } else {
                r"
                    UPDATE files
                    SET
                        name = :name,
                        extension = :extension,
                        mime_type = :mime_type,
                        file_type = :file_type,
                        size = :size,
                        is_directory = :is_directory,
                        created = :created,
                        modified = :modified,
                        deleted = FALSE,
                        deleted_at = NULL,
                        parent_uuid = :parent_uuid,
                        last_scan = :now
                    WHERE file_uuid = :file_uuid"
                    .with(params! {
                        "file_uuid" => uuid,
                        "name" => upsert.name.clone(),
                        "extension" => upsert.extension.clone(),
                        "mime_type" => upsert.mime_type.clone(),
                        "file_type" => upsert.file_type.as_str(),
                        "size" => upsert.size,
                        "is_directory" => upsert.is_directory,
                        "created" => upsert.created,
                        "modified" => upsert.modified,
                        "parent_uuid" => upsert.parent,
                        "now" => now,
                    })
                    .ignore(&mut tx)
                    .await?;

                // a tombstoned row springing back is a create from the
                // consumer's point of view
                let change_type = if was_deleted {
                    ChangeType::Created
                } else {
                    ChangeType::Modified
                };

                append_change_tx(
                    &mut tx,
                    if upsert.is_directory {
                        EntityType::Directory
                    } else {
                        EntityType::File
                    },
                    &uuid.to_string(),
                    change_type,
                    Some(&serde_json::json!({
                        "path": upsert.path,
                        "size": upsert.size,
                    })),
                    now,
                )
                .await?;

                (uuid, UpsertOp::Updated)
            }
        }
    };

    tx.commit().await?;

    Ok(outcome)
}

pub async fn set_quick_hash(
    pool: Pool,
    file_uuid: FileUuid,
    quick_hash: Option<&str>,
) -> anyhow::Result<()> {
    r"
        UPDATE files SET quick_hash = :quick_hash WHERE file_uuid = :file_uuid"
        .with(params! {
            "file_uuid" => file_uuid,
            "quick_hash" => quick_hash,
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

#[instrument(level=Level::DEBUG, skip_all)]
pub async fn mark_deleted(
    pool: Pool,
    file_uuid: FileUuid,
    now: i64,
) -> anyhow::Result<Option<GroupUuid>> {
    debug!({ file_uuid = file_uuid }, "marking file deleted");

    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    let existing: Option<(String, bool, Option<GroupUuid>)> = r"
        SELECT path, deleted, duplicate_group FROM files WHERE file_uuid = :file_uuid"
        .with(params! {"file_uuid" => file_uuid})
        .first(&mut tx)
        .await?;

    let Some((path, deleted, group)) = existing else {
        tx.rollback().await?;
        return Ok(None);
    };

    if deleted {
        tx.rollback().await?;
        return Ok(group);
    }

    r"
        UPDATE files SET deleted = TRUE, deleted_at = :now WHERE file_uuid = :file_uuid"
        .with(params! {
            "file_uuid" => file_uuid,
            "now" => now,
        })
        .ignore(&mut tx)
        .await?;

    append_change_tx(
        &mut tx,
        EntityType::File,
        &file_uuid.to_string(),
        ChangeType::Deleted,
        Some(&serde_json::json!({ "path": path })),
        now,
    )
    .await?;

    tx.commit().await?;

    Ok(group)
}

pub async fn mark_undeleted(pool: Pool, file_uuid: FileUuid, now: i64) -> anyhow::Result<()> {
    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    r"
        UPDATE files SET deleted = FALSE, deleted_at = NULL, last_scan = :now WHERE file_uuid = :file_uuid"
        .with(params! {
            "file_uuid" => file_uuid,
            "now" => now,
        })
        .ignore(&mut tx)
        .await?;

    append_change_tx(
        &mut tx,
        EntityType::File,
        &file_uuid.to_string(),
        ChangeType::Created,
        None,
        now,
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

// post-scan deletion sweep: anything in this root not witnessed by the scan
// that just finished is gone from the filesystem
#[instrument(level=Level::DEBUG, skip_all)]
pub async fn sweep_deletions(
    pool: Pool,
    root_uuid: RootUuid,
    scan_start: i64,
    now: i64,
) -> anyhow::Result<Vec<FileUuid>> {
    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    let result = r"
        SELECT file_uuid, path FROM files
        WHERE root_uuid = :root_uuid AND last_scan < :scan_start AND deleted = FALSE"
        .with(params! {
            "root_uuid" => root_uuid,
            "scan_start" => scan_start,
        })
        .run(&mut tx)
        .await?
        .collect::<Row>()
        .await?;

    let victims = result
        .into_iter()
        .map(from_row_opt::<(FileUuid, String)>)
        .collect::<Result<Vec<_>, FromRowError>>()?;

    for (file_uuid, path) in &victims {
        r"
            UPDATE files SET deleted = TRUE, deleted_at = :now WHERE file_uuid = :file_uuid"
            .with(params! {
                "file_uuid" => *file_uuid,
                "now" => now,
            })
            .ignore(&mut tx)
            .await?;

        append_change_tx(
            &mut tx,
            EntityType::File,
            &file_uuid.to_string(),
            ChangeType::Deleted,
            Some(&serde_json::json!({ "path": path })),
            now,
        )
        .await?;
    }

    tx.commit().await?;

    debug!({ root_uuid = root_uuid, swept = victims.len() }, "deletion sweep finished");

    Ok(victims.into_iter().map(|(uuid, _)| uuid).collect())
}

// duplicate group queries

// attach all of file_uuids to one group, creating it if none of them is
// grouped yet, and refresh the group's counters.  one transaction: a crash
// can never leave a half-attached group behind.
#[instrument(level=Level::DEBUG, skip_all)]
pub async fn merge_into_duplicate_group(
    pool: Pool,
    file_uuids: &[FileUuid],
    now: i64,
) -> anyhow::Result<GroupUuid> {
    if file_uuids.len() < 2 {
        return Err(anyhow::Error::msg("a duplicate group needs two members"));
    }

    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    let mut group: Option<GroupUuid> = None;

    for file_uuid in file_uuids {
        let existing: Option<Option<GroupUuid>> = r"
            SELECT duplicate_group FROM files WHERE file_uuid = :file_uuid"
            .with(params! {"file_uuid" => *file_uuid})
            .first(&mut tx)
            .await?;

        if let Some(Some(uuid)) = existing {
            group = Some(uuid);
            break;
        }
    }

    let group_uuid = match group {
        Some(uuid) => uuid,
        None => {
            let uuid: Option<GroupUuid> = r"
                INSERT INTO duplicate_groups (group_uuid, file_count, total_size, created, updated)
                VALUES (UUID_SHORT(), 0, 0, :now, :now)
                RETURNING group_uuid"
                .with(params! {"now" => now})
                .first(&mut tx)
                .await?;

            uuid.ok_or_else(|| anyhow::Error::msg("failed to create duplicate group"))?
        }
    };

    for file_uuid in file_uuids {
        r"
            UPDATE files SET duplicate_group = :group_uuid WHERE file_uuid = :file_uuid"
            .with(params! {
                "group_uuid" => group_uuid,
                "file_uuid" => *file_uuid,
            })
            .ignore(&mut tx)
            .await?;
    }

    r"
        UPDATE duplicate_groups
        SET
            file_count = (SELECT COUNT(*) FROM files WHERE duplicate_group = :group_uuid AND deleted = FALSE),
            total_size = (SELECT COALESCE(SUM(size), 0) FROM files WHERE duplicate_group = :group_uuid AND deleted = FALSE),
            updated = :now
        WHERE group_uuid = :group_uuid"
        .with(params! {
            "group_uuid" => group_uuid,
            "now" => now,
        })
        .ignore(&mut tx)
        .await?;

    tx.commit().await?;

    debug!({ group_uuid = group_uuid, members = file_uuids.len() }, "merged duplicate group");

    Ok(group_uuid)
}

// dissolve groups that fell under two live members and refresh the
// counters of those that survive
#[instrument(level=Level::DEBUG, skip_all)]
pub async fn prune_duplicate_groups(pool: Pool, now: i64) -> anyhow::Result<u64> {
    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    let result = r"
        SELECT
            g.group_uuid,
            (SELECT COUNT(*) FROM files f WHERE f.duplicate_group = g.group_uuid AND f.deleted = FALSE)
        FROM duplicate_groups g"
        .with(())
        .run(&mut tx)
        .await?
        .collect::<Row>()
        .await?;

    let groups = result
        .into_iter()
        .map(from_row_opt::<(GroupUuid, i64)>)
        .collect::<Result<Vec<_>, FromRowError>>()?;

    let mut dissolved = 0;

    for (group_uuid, live) in groups {
        if live < 2 {
            r"
                UPDATE files SET duplicate_group = NULL WHERE duplicate_group = :group_uuid"
                .with(params! {"group_uuid" => group_uuid})
                .ignore(&mut tx)
                .await?;

            r"
                DELETE FROM duplicate_groups WHERE group_uuid = :group_uuid"
                .with(params! {"group_uuid" => group_uuid})
                .ignore(&mut tx)
                .await?;

            dissolved += 1;
        } else {
            r"
                UPDATE duplicate_groups
                SET
                    file_count = (SELECT COUNT(*) FROM files WHERE duplicate_group = :group_uuid AND deleted = FALSE),
                    total_size = (SELECT COALESCE(SUM(size), 0) FROM files WHERE duplicate_group = :group_uuid AND deleted = FALSE),
                    updated = :now
                WHERE group_uuid = :group_uuid"
                .with(params! {
                    "group_uuid" => group_uuid,
                    "now" => now,
                })
                .ignore(&mut tx)
                .await?;
        }
    }

    tx.commit().await?;

    Ok(dissolved)
}

pub async fn get_duplicate_group(
    pool: Pool,
    group_uuid: GroupUuid,
) -> anyhow::Result<Option<api::file::DuplicateGroup>> {
    let result: Option<(i64, i64, i64, i64)> = r"
        SELECT file_count, total_size, created, updated FROM duplicate_groups WHERE group_uuid = :group_uuid"
        .with(params! {"group_uuid" => group_uuid})
        .first(pool.get_conn().await?)
        .await?;

    Ok(result.map(|data| api::file::DuplicateGroup {
        file_count: data.0,
        total_size: data.1,
        created: data.2,
        updated: data.3,
    }))
}

// move handling
//
// rewrites the moved row and every dependent row that keys by path, plus
// the change log entry, in a single transaction.  a unique conflict on the
// new path aborts the whole thing and the caller falls back to
// delete + create.
#[instrument(level=Level::DEBUG, skip_all)]
pub async fn process_move(
    pool: Pool,
    file_uuid: FileUuid,
    root_uuid: RootUuid,
    old_path: &str,
    new_path: &str,
    is_directory: bool,
    now: i64,
) -> anyhow::Result<()> {
    debug!({ old_path = old_path, new_path = new_path }, "processing move");

    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    let new_parent: Option<FileUuid> = match crate::storage::path::parent(new_path) {
        Some(parent_path) => {
            r"
                SELECT file_uuid FROM files
                WHERE root_uuid = :root_uuid AND path = :path AND is_directory = TRUE AND deleted = FALSE"
                .with(params! {
                    "root_uuid" => root_uuid,
                    "path" => parent_path,
                })
                .first(&mut tx)
                .await?
        }
        None => None,
    };

    r"
        UPDATE files
        SET path = :new_path, name = :name, parent_uuid = :parent_uuid, modified = :now, last_scan = :now, deleted = FALSE, deleted_at = NULL
        WHERE file_uuid = :file_uuid"
        .with(params! {
            "file_uuid" => file_uuid,
            "new_path" => new_path,
            "name" => file_name(new_path),
            "parent_uuid" => new_parent,
            "now" => now,
        })
        .ignore(&mut tx)
        .await?;

    if is_directory {
        // children ride along: /old/a/b -> /new/a/b
        let prefix = format!("{}/%", escape_like(old_path));

        r"
            UPDATE files
            SET path = CONCAT(:new_path, SUBSTRING(path, CHAR_LENGTH(:old_path) + 1))
            WHERE root_uuid = :root_uuid AND path LIKE :prefix AND deleted = FALSE"
            .with(params! {
                "root_uuid" => root_uuid,
                "new_path" => new_path,
                "old_path" => old_path,
                "prefix" => prefix.clone(),
            })
            .ignore(&mut tx)
            .await?;

        r"
            UPDATE directory_analysis
            SET directory_path = CONCAT(:new_path, SUBSTRING(directory_path, CHAR_LENGTH(:old_path) + 1))
            WHERE root_uuid = :root_uuid AND (directory_path = :old_path OR directory_path LIKE :prefix)"
            .with(params! {
                "root_uuid" => root_uuid,
                "new_path" => new_path,
                "old_path" => old_path,
                "prefix" => prefix.clone(),
            })
            .ignore(&mut tx)
            .await?;

        r"
            UPDATE media_files
            SET file_path = CONCAT(:new_path, SUBSTRING(file_path, CHAR_LENGTH(:old_path) + 1))
            WHERE file_path = :old_path OR file_path LIKE :prefix"
            .with(params! {
                "new_path" => new_path,
                "old_path" => old_path,
                "prefix" => prefix,
            })
            .ignore(&mut tx)
            .await?;
    } else {
        r"
            UPDATE media_files SET file_path = :new_path WHERE file_path = :old_path"
            .with(params! {
                "new_path" => new_path,
                "old_path" => old_path,
            })
            .ignore(&mut tx)
            .await?;
    }

    append_change_tx(
        &mut tx,
        if is_directory {
            EntityType::Directory
        } else {
            EntityType::File
        },
        &file_uuid.to_string(),
        ChangeType::Moved,
        Some(&serde_json::json!({
            "old_path": old_path,
            "new_path": new_path,
        })),
        now,
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

// file metadata sidecar

pub async fn upsert_file_metadata(
    pool: Pool,
    file_uuid: FileUuid,
    entries: &[(String, String, MetadataValueType)],
) -> anyhow::Result<()> {
    let mut conn = pool.get_conn().await?;

    for (key, value, value_type) in entries {
        r"
            INSERT INTO file_metadata (file_uuid, meta_key, meta_value, value_type)
            VALUES (:file_uuid, :meta_key, :meta_value, :value_type)
            ON DUPLICATE KEY UPDATE meta_value = :meta_value, value_type = :value_type"
            .with(params! {
                "file_uuid" => file_uuid,
                "meta_key" => key.clone(),
                "meta_value" => value.clone(),
                "value_type" => value_type.as_str(),
            })
            .ignore(&mut conn)
            .await?;
    }

    Ok(())
}

// scan history queries

pub async fn create_scan(
    pool: Pool,
    root_uuid: RootUuid,
    mode: ScanMode,
    started: i64,
) -> anyhow::Result<ScanUuid> {
    let uuid: Option<ScanUuid> = r"
        INSERT INTO scan_history (scan_uuid, root_uuid, mode, status, started)
        VALUES (UUID_SHORT(), :root_uuid, :mode, 'running', :started)
        RETURNING scan_uuid"
        .with(params! {
            "root_uuid" => root_uuid,
            "mode" => mode.as_str(),
            "started" => started,
        })
        .first(pool.get_conn().await?)
        .await?;

    uuid.ok_or_else(|| anyhow::Error::msg("failed to create scan history row"))
}

pub async fn finalize_scan(
    pool: Pool,
    scan_uuid: ScanUuid,
    status: ScanStatus,
    counters: &ScanCounters,
    finished: i64,
) -> anyhow::Result<()> {
    r"
        UPDATE scan_history
        SET status = :status, processed = :processed, added = :added, updated = :updated,
            unchanged = :unchanged, deleted = :deleted, errors = :errors, finished = :finished
        WHERE scan_uuid = :scan_uuid"
        .with(params! {
            "scan_uuid" => scan_uuid,
            "status" => status.as_str(),
            "processed" => counters.processed,
            "added" => counters.added,
            "updated" => counters.updated,
            "unchanged" => counters.unchanged,
            "deleted" => counters.deleted,
            "errors" => counters.errors,
            "finished" => finished,
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

// on startup, any scan still marked running belongs to a previous process
// that died mid-run
pub async fn fail_orphaned_scans(pool: Pool, now: i64) -> anyhow::Result<u64> {
    let mut conn = pool.get_conn().await?;

    r"
        UPDATE scan_history SET status = 'failed', finished = :now WHERE status = 'running'"
        .with(params! {"now" => now})
        .ignore(&mut conn)
        .await?;

    Ok(conn.affected_rows())
}

pub async fn latest_scan(pool: Pool, root_uuid: RootUuid) -> anyhow::Result<Option<ScanHistory>> {
    let result: Option<(String, String, i64, i64, i64, i64, i64, i64, i64, Option<i64>)> = r"
        SELECT mode, status, processed, added, updated, unchanged, deleted, errors, started, finished
        FROM scan_history WHERE root_uuid = :root_uuid ORDER BY started DESC LIMIT 1"
        .with(params! {"root_uuid" => root_uuid})
        .first(pool.get_conn().await?)
        .await?;

    let Some(data) = result else {
        return Ok(None);
    };

    Ok(Some(ScanHistory {
        root_uuid,
        mode: ScanMode::parse(&data.0)
            .ok_or_else(|| anyhow::Error::msg(format!("invalid scan mode {}", data.0)))?,
        status: ScanStatus::parse(&data.1)
            .ok_or_else(|| anyhow::Error::msg(format!("invalid scan status {}", data.1)))?,
        counters: ScanCounters {
            processed: data.2,
            added: data.3,
            updated: data.4,
            unchanged: data.5,
            deleted: data.6,
            errors: data.7,
        },
        started: data.8,
        finished: data.9,
    }))
}

// change log queries

pub async fn append_change_log(pool: Pool, entry: &ChangeLogEntry) -> anyhow::Result<()> {
    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    append_change_tx(
        &mut tx,
        entry.entity_type,
        &entry.entity_id,
        entry.change_type,
        entry.new_data.as_ref(),
        entry.detected_at,
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

pub async fn pending_change_log(
    pool: Pool,
    limit: u32,
) -> anyhow::Result<Vec<(ChangeLogUuid, ChangeLogEntry)>> {
    let result = r"
        SELECT change_uuid, entity_type, entity_id, change_type, new_data, detected_at, processed
        FROM change_log
        WHERE processed = FALSE
        ORDER BY detected_at, change_uuid
        LIMIT :limit"
        .with(params! {"limit" => limit})
        .run(pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

    result
        .into_iter()
        .map(|row| {
            let data = from_row_opt::<(
                ChangeLogUuid,
                String,
                String,
                String,
                Option<String>,
                i64,
                bool,
            )>(row)?;

            Ok((
                data.0,
                ChangeLogEntry {
                    entity_type: EntityType::parse(&data.1).ok_or_else(|| {
                        anyhow::Error::msg(format!("invalid entity_type {}", data.1))
                    })?,
                    entity_id: data.2,
                    change_type: ChangeType::parse(&data.3).ok_or_else(|| {
                        anyhow::Error::msg(format!("invalid change_type {}", data.3))
                    })?,
                    new_data: match data.4 {
                        Some(raw) => Some(serde_json::from_str(&raw)?),
                        None => None,
                    },
                    detected_at: data.5,
                    processed: data.6,
                },
            ))
        })
        .collect()
}

pub async fn mark_change_log_processed(
    pool: Pool,
    uuids: &[ChangeLogUuid],
) -> anyhow::Result<()> {
    let mut conn = pool.get_conn().await?;

    for uuid in uuids {
        r"
            UPDATE change_log SET processed = TRUE WHERE change_uuid = :change_uuid"
            .with(params! {"change_uuid" => *uuid})
            .ignore(&mut conn)
            .await?;
    }

    Ok(())
}

// media type and detection rule queries

pub async fn get_media_types(pool: Pool) -> anyhow::Result<Vec<(MediaTypeUuid, MediaType)>> {
    let result = r"
        SELECT media_type_uuid, name, display_name FROM media_types ORDER BY media_type_uuid"
        .with(())
        .run(pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

    let data = result
        .into_iter()
        .map(from_row_opt::<(MediaTypeUuid, String, String)>)
        .collect::<Result<Vec<_>, FromRowError>>()?;

    Ok(data
        .into_iter()
        .map(|(uuid, name, display_name)| (uuid, MediaType { name, display_name }))
        .collect())
}

pub async fn get_detection_rules(pool: Pool) -> anyhow::Result<Vec<(RuleUuid, DetectionRule)>> {
    let result = r"
        SELECT rule_uuid, media_type_uuid, rule_type, pattern, confidence_weight, enabled, priority
        FROM detection_rules
        WHERE enabled = TRUE
        ORDER BY priority DESC, rule_uuid"
        .with(())
        .run(pool.get_conn().await?)
        .await?
        .collect::<Row>()
        .await?;

    result
        .into_iter()
        .map(|row| {
            let data =
                from_row_opt::<(RuleUuid, MediaTypeUuid, String, String, f64, bool, i64)>(row)?;

            Ok((
                data.0,
                DetectionRule {
                    media_type_uuid: data.1,
                    rule_type: RuleType::parse(&data.2).ok_or_else(|| {
                        anyhow::Error::msg(format!("invalid rule_type {}", data.2))
                    })?,
                    pattern: data.3,
                    confidence_weight: data.4,
                    enabled: data.5,
                    priority: data.6,
                },
            ))
        })
        .collect()
}

// directory analysis queries

// idempotent by design: identical re-analysis (within epsilon) rewrites
// nothing and reports changed = false
#[instrument(level=Level::DEBUG, skip_all)]
pub async fn upsert_directory_analysis(
    pool: Pool,
    analysis: &DirectoryAnalysis,
    epsilon: f64,
    now: i64,
) -> anyhow::Result<(AnalysisUuid, bool)> {
    let mut tx = pool.start_transaction(TxOpts::default()).await?;

    let existing: Option<(AnalysisUuid, f64, Option<MediaUuid>, i64, i64)> = r"
        SELECT analysis_uuid, confidence_score, media_uuid, files_count, total_size
        FROM directory_analysis WHERE directory_path = :directory_path"
        .with(params! {"directory_path" => analysis.directory_path.clone()})
        .first(&mut tx)
        .await?;

    let outcome = match existing {
        Some((uuid, score, media_uuid, files_count, total_size))
            if (score - analysis.confidence_score).abs() <= epsilon
                && media_uuid == analysis.media_uuid
                && files_count == analysis.files_count
                && total_size == analysis.total_size =>
        {
            (uuid, false)
        }

        Some((uuid, _, _, _, _)) => {
            r"
                UPDATE directory_analysis
                SET media_uuid = :media_uuid, confidence_score = :confidence_score,
                    detection_method = :detection_method, files_count = :files_count,
                    total_size = :total_size, updated = :now
                WHERE analysis_uuid = :analysis_uuid"
                .with(params! {
                    "analysis_uuid" => uuid,
                    "media_uuid" => analysis.media_uuid,
                    "confidence_score" => analysis.confidence_score,
                    "detection_method" => analysis.detection_method.as_str(),
                    "files_count" => analysis.files_count,
                    "total_size" => analysis.total_size,
                    "now" => now,
                })
                .ignore(&mut tx)
                .await?;

            (uuid, true)
        }

        None => {
            let uuid: Option<AnalysisUuid> = r"
                INSERT INTO directory_analysis (analysis_uuid, directory_path, root_uuid, media_uuid, confidence_score, detection_method, files_count, total_size, updated)
                VALUES (UUID_SHORT(), :directory_path, :root_uuid, :media_uuid, :confidence_score, :detection_method, :files_count, :total_size, :now)
                RETURNING analysis_uuid"
                .with(params! {
                    "directory_path" => analysis.directory_path.clone(),
                    "root_uuid" => analysis.root_uuid,
                    "media_uuid" => analysis.media_uuid,
                    "confidence_score" => analysis.confidence_score,
                    "detection_method" => analysis.detection_method.as_str(),
                    "files_count" => analysis.files_count,
                    "total_size" => analysis.total_size,
                    "now" => now,
                })
                .first(&mut tx)
                .await?;

            (
                uuid.ok_or_else(|| anyhow::Error::msg("failed to insert directory analysis"))?,
                true,
            )
        }
    };

    tx.commit().await?;

    Ok(outcome)
}

pub async fn get_directory_analysis(
    pool: Pool,
    directory_path: &str,
) -> anyhow::Result<Option<DirectoryAnalysis>> {
    let result: Option<(String, RootUuid, Option<MediaUuid>, f64, String, i64, i64)> = r"
        SELECT directory_path, root_uuid, media_uuid, confidence_score, detection_method, files_count, total_size
        FROM directory_analysis WHERE directory_path = :directory_path"
        .with(params! {"directory_path" => directory_path})
        .first(pool.get_conn().await?)
        .await?;

    let Some(data) = result else {
        return Ok(None);
    };

    Ok(Some(DirectoryAnalysis {
        directory_path: data.0,
        root_uuid: data.1,
        media_uuid: data.2,
        confidence_score: data.3,
        detection_method: DetectionMethod::parse(&data.4)
            .ok_or_else(|| anyhow::Error::msg(format!("invalid detection_method {}", data.4)))?,
        files_count: data.5,
        total_size: data.6,
    }))
}

// media item queries

pub async fn find_media_item(
    pool: Pool,
    media_type_uuid: MediaTypeUuid,
    title: &str,
    year: Option<i32>,
) -> anyhow::Result<Option<MediaUuid>> {
    let result: Option<MediaUuid> = r"
        SELECT media_uuid FROM media_items
        WHERE media_type_uuid = :media_type_uuid AND LOWER(title) = LOWER(:title) AND year <=> :year"
        .with(params! {
            "media_type_uuid" => media_type_uuid,
            "title" => title,
            "year" => year,
        })
        .first(pool.get_conn().await?)
        .await?;

    Ok(result)
}

#[instrument(level=Level::DEBUG, skip_all)]
pub async fn add_media_item(pool: Pool, item: &MediaItem) -> anyhow::Result<MediaUuid> {
    debug!({ title = item.title }, "adding media item");

    let uuid: Option<MediaUuid> = r"
        INSERT INTO media_items (media_uuid, media_type_uuid, title, original_title, year, genre, director, rating, runtime, status)
        VALUES (UUID_SHORT(), :media_type_uuid, :title, :original_title, :year, :genre, :director, :rating, :runtime, :status)
        RETURNING media_uuid"
        .with(params! {
            "media_type_uuid" => item.media_type_uuid,
            "title" => item.title.clone(),
            "original_title" => item.original_title.clone(),
            "year" => item.year,
            "genre" => item.genre.clone(),
            "director" => item.director.clone(),
            "rating" => item.rating,
            "runtime" => item.runtime,
            "status" => item.status.as_str(),
        })
        .first(pool.get_conn().await?)
        .await?;

    uuid.ok_or_else(|| anyhow::Error::msg("failed to add media item"))
}

pub async fn get_media_item(pool: Pool, media_uuid: MediaUuid) -> anyhow::Result<Option<MediaItem>> {
    let result: Option<(
        MediaTypeUuid,
        String,
        Option<String>,
        Option<i32>,
        Option<String>,
        Option<String>,
        Option<f64>,
        Option<i64>,
        String,
    )> = r"
        SELECT media_type_uuid, title, original_title, year, genre, director, rating, runtime, status
        FROM media_items WHERE media_uuid = :media_uuid"
        .with(params! {"media_uuid" => media_uuid})
        .first(pool.get_conn().await?)
        .await?;

    let Some(data) = result else {
        return Ok(None);
    };

    Ok(Some(MediaItem {
        media_type_uuid: data.0,
        title: data.1,
        original_title: data.2,
        year: data.3,
        genre: data.4,
        director: data.5,
        rating: data.6,
        runtime: data.7,
        status: MediaItemStatus::parse(&data.8)
            .ok_or_else(|| anyhow::Error::msg(format!("invalid media item status {}", data.8)))?,
    }))
}

pub async fn set_media_item_status(
    pool: Pool,
    media_uuid: MediaUuid,
    status: MediaItemStatus,
) -> anyhow::Result<()> {
    r"
        UPDATE media_items SET status = :status WHERE media_uuid = :media_uuid"
        .with(params! {
            "media_uuid" => media_uuid,
            "status" => status.as_str(),
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

// partial field fill from enrichment; only supplied values overwrite
pub async fn fill_media_item_fields(
    pool: Pool,
    media_uuid: MediaUuid,
    genre: Option<&str>,
    director: Option<&str>,
    rating: Option<f64>,
    runtime: Option<i64>,
    original_title: Option<&str>,
) -> anyhow::Result<()> {
    r"
        UPDATE media_items
        SET
            genre = COALESCE(:genre, genre),
            director = COALESCE(:director, director),
            rating = COALESCE(:rating, rating),
            runtime = COALESCE(:runtime, runtime),
            original_title = COALESCE(:original_title, original_title)
        WHERE media_uuid = :media_uuid"
        .with(params! {
            "media_uuid" => media_uuid,
            "genre" => genre,
            "director" => director,
            "rating" => rating,
            "runtime" => runtime,
            "original_title" => original_title,
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

pub async fn upsert_media_file(pool: Pool, media_file: &MediaFile) -> anyhow::Result<()> {
    r"
        INSERT INTO media_files (media_file_uuid, media_uuid, file_uuid, file_path, quality, language)
        VALUES (UUID_SHORT(), :media_uuid, :file_uuid, :file_path, :quality, :language)
        ON DUPLICATE KEY UPDATE file_uuid = :file_uuid, quality = :quality, language = :language"
        .with(params! {
            "media_uuid" => media_file.media_uuid,
            "file_uuid" => media_file.file_uuid,
            "file_path" => media_file.file_path.clone(),
            "quality" => media_file.quality.clone(),
            "language" => media_file.language.clone(),
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

pub async fn upsert_external_metadata(
    pool: Pool,
    metadata: &ExternalMetadata,
) -> anyhow::Result<()> {
    r"
        INSERT INTO external_metadata (ext_uuid, media_uuid, provider, external_id, raw_data, rating, cover_url, trailer_url)
        VALUES (UUID_SHORT(), :media_uuid, :provider, :external_id, :raw_data, :rating, :cover_url, :trailer_url)
        ON DUPLICATE KEY UPDATE external_id = :external_id, raw_data = :raw_data, rating = :rating, cover_url = :cover_url, trailer_url = :trailer_url"
        .with(params! {
            "media_uuid" => metadata.media_uuid,
            "provider" => metadata.provider.clone(),
            "external_id" => metadata.external_id.clone(),
            "raw_data" => metadata.raw_data.to_string(),
            "rating" => metadata.rating,
            "cover_url" => metadata.cover_url.clone(),
            "trailer_url" => metadata.trailer_url.clone(),
        })
        .ignore(pool.get_conn().await?)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("/plain/path"), "/plain/path");
        assert_eq!(escape_like("/100%_done"), "/100\\%\\_done");
        assert_eq!(escape_like(r"/back\slash"), r"/back\\slash");
    }

    #[test]
    fn schema_statements_split() {
        let statements: Vec<_> = SCHEMA
            .split(';')
            .filter(|s| {
                let body = s
                    .lines()
                    .filter(|line| !line.trim_start().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join("\n");
                !body.trim().is_empty()
            })
            .collect();

        // tables plus seed rows
        assert!(statements.len() > 12);

        for statement in statements {
            assert!(
                statement.contains("CREATE TABLE") || statement.contains("INSERT IGNORE"),
                "unexpected schema statement: {statement}"
            );
        }
    }
}
