// History importer - seeds an empty trust store from an export file.
//
// File format is JSON Lines, one record per line:
//   {"user_id": 123, "count": 14}
//   {"user_id": 456, "channel_id": -100987, "count": 2}
// `count` defaults to 1, so a raw "one line per message" export works too.
// Blank lines and lines starting with '#' are ignored.

use super::moderation_models::UserScope;
use super::trust_store::{TrustStore, TrustStoreError};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed history record on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Store(#[from] TrustStoreError),
}

fn default_count() -> u64 {
    1
}

/// One line of the export file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub user_id: i64,
    #[serde(default)]
    pub channel_id: Option<i64>,
    #[serde(default = "default_count")]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Store already had data; nothing was written
    SkippedNonEmpty,
    Imported { records: usize, users: usize },
}

/// Parse the whole export up front so a bad line leaves the store untouched.
pub fn parse_history(contents: &str) -> Result<Vec<HistoryRecord>, ImportError> {
    let mut records = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: HistoryRecord =
            serde_json::from_str(line).map_err(|e| ImportError::Parse {
                line: idx + 1,
                message: e.to_string(),
            })?;
        records.push(record);
    }
    Ok(records)
}

/// Import `path` into `store` if, and only if, the store is empty.
///
/// Writes go through `increment_user_count_by`, the same primitive used for
/// live traffic, so imported counts look exactly like organic ones.
pub async fn import_if_empty<S: TrustStore + ?Sized>(
    store: &S,
    path: &Path,
    scope: UserScope,
) -> Result<ImportOutcome, ImportError> {
    if !store.is_empty().await? {
        tracing::info!("Trust store is not empty, skipping history import");
        return Ok(ImportOutcome::SkippedNonEmpty);
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let records = parse_history(&contents)?;

    let mut users = HashSet::new();
    for record in &records {
        if record.count == 0 {
            continue;
        }
        let key = scope.key_for(record.user_id, record.channel_id);
        store.increment_user_count_by(&key, record.count).await?;
        users.insert(key);
    }

    tracing::info!(
        file = %path.display(),
        records = records.len(),
        users = users.len(),
        "History imported"
    );

    Ok(ImportOutcome::Imported {
        records: records.len(),
        users: users.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::UserKey;
    use crate::infra::moderation::InMemoryTrustStore;
    use std::io::Write;

    fn history_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_defaults_and_comments() {
        let records = parse_history(
            "# export from 2024-05-01\n\
             {\"user_id\": 1, \"count\": 3}\n\
             \n\
             {\"user_id\": 2, \"channel_id\": -50}\n",
        )
        .unwrap();

        assert_eq!(
            records,
            vec![
                HistoryRecord {
                    user_id: 1,
                    channel_id: None,
                    count: 3
                },
                HistoryRecord {
                    user_id: 2,
                    channel_id: Some(-50),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = parse_history("{\"user_id\": 1}\nnot json\n").unwrap_err();
        assert!(matches!(err, ImportError::Parse { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_import_then_read_back_counts() {
        let store = InMemoryTrustStore::new();
        let file = history_file(
            "{\"user_id\": 10, \"count\": 4}\n\
             {\"user_id\": 11, \"count\": 1}\n\
             {\"user_id\": 12, \"count\": 9}\n",
        );

        let outcome = import_if_empty(&store, file.path(), UserScope::Global)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ImportOutcome::Imported {
                records: 3,
                users: 3
            }
        );
        assert_eq!(store.get_user_count(&UserKey::global(10)).await.unwrap(), 4);
        assert_eq!(store.get_user_count(&UserKey::global(11)).await.unwrap(), 1);
        assert_eq!(store.get_user_count(&UserKey::global(12)).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_repeated_users_accumulate() {
        let store = InMemoryTrustStore::new();
        let file = history_file("{\"user_id\": 10}\n{\"user_id\": 10}\n{\"user_id\": 10}\n");

        let outcome = import_if_empty(&store, file.path(), UserScope::Global)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ImportOutcome::Imported {
                records: 3,
                users: 1
            }
        );
        assert_eq!(store.get_user_count(&UserKey::global(10)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_second_import_is_a_noop() {
        let store = InMemoryTrustStore::new();
        let file = history_file("{\"user_id\": 10, \"count\": 4}\n");

        import_if_empty(&store, file.path(), UserScope::Global)
            .await
            .unwrap();
        let again = import_if_empty(&store, file.path(), UserScope::Global)
            .await
            .unwrap();

        assert_eq!(again, ImportOutcome::SkippedNonEmpty);
        assert_eq!(store.get_user_count(&UserKey::global(10)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_per_channel_scope_keeps_channel() {
        let store = InMemoryTrustStore::new();
        let file = history_file("{\"user_id\": 10, \"channel_id\": 3, \"count\": 2}\n");

        import_if_empty(&store, file.path(), UserScope::PerChannel)
            .await
            .unwrap();

        assert_eq!(
            store
                .get_user_count(&UserKey::in_channel(10, 3))
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.get_user_count(&UserKey::global(10)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_file_leaves_store_empty() {
        let store = InMemoryTrustStore::new();
        let file = history_file("{\"user_id\": 10, \"count\": 4}\n{\"user_id\": \"oops\"}\n");

        let err = import_if_empty(&store, file.path(), UserScope::Global)
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Parse { line: 2, .. }));
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_io_error() {
        let store = InMemoryTrustStore::new();

        let err = import_if_empty(
            &store,
            Path::new("/definitely/not/here.jsonl"),
            UserScope::Global,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ImportError::Io { .. }));
    }
}
