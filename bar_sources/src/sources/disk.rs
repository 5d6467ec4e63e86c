//! Chunk files on local disk.
//!
//! Layout: `{root}/{exchange}/{area}/{symbol}/{timeframe}/{kind}/{start}_{end}.bars`
//!
//! - One file per chunk; the file name is the chunk range, so a lookup is a
//!   single `open` with no directory scan.
//! - Writes are atomic: write to `{file}.{uuid}.tmp`, fsync, rename into place.
//! - A file that fails to decode is renamed to `{file}.quarantined` and
//!   treated as a miss, so the chunk is fetched again and rewritten.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Bar, HistoricalDataRequest};
use crate::sources::{BarSink, BarSource, CodecSnafu, IoSnafu, SourceError, normalize_bars};

const FILE_EXTENSION: &str = "bars";

/// On-disk body of one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFile {
    /// Id of the source the bars were originally fetched from.
    pub source_id: String,
    pub saved_at: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end_exclusive: DateTime<Utc>,
    pub bars: Vec<Bar>,
}

/// A directory of chunk files.
pub struct DiskSource {
    id: String,
    root: PathBuf,
}

impl DiskSource {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }

    /// Root directory of this tier.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the chunk file for a chunk-aligned request.
    pub fn chunk_path(&self, request: &HistoricalDataRequest) -> PathBuf {
        self.root
            .join(path_segment(&request.exchange))
            .join(path_segment(&request.exchange_area))
            .join(path_segment(&request.symbol))
            .join(request.timeframe.name())
            .join(request.bar_kind.as_str())
            .join(format!(
                "{}_{}.{FILE_EXTENSION}",
                file_stamp(request.start),
                file_stamp(request.end_exclusive)
            ))
    }

    async fn quarantine(&self, path: &Path, reason: &str) {
        warn!(path = %path.display(), reason, "quarantining unreadable chunk file");
        let target = path.with_extension(format!("{FILE_EXTENSION}.quarantined"));
        if let Err(e) = tokio::fs::rename(path, &target).await {
            warn!(path = %path.display(), error = %e, "failed to quarantine chunk file");
        }
    }
}

#[async_trait]
impl BarSource for DiskSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_get(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        let path = self.chunk_path(request);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no chunk file");
                return Ok(None);
            }
            Err(e) => return Err(e).context(IoSnafu { path }),
        };

        let file = match decode_chunk(&bytes) {
            Ok(file) => file,
            Err(reason) => {
                self.quarantine(&path, &reason).await;
                return Ok(None);
            }
        };
        if file.start != request.start || file.end_exclusive != request.end_exclusive {
            self.quarantine(&path, "header range does not match file name").await;
            return Ok(None);
        }

        Ok(normalize_bars(file.bars, request))
    }
}

#[async_trait]
impl BarSink for DiskSource {
    async fn save(
        &self,
        source_id: &str,
        bars: &[Bar],
        request: &HistoricalDataRequest,
    ) -> Result<(), SourceError> {
        let path = self.chunk_path(request);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context(IoSnafu { path: dir })?;
        }

        let file = ChunkFile {
            source_id: source_id.to_string(),
            saved_at: Utc::now(),
            start: request.start,
            end_exclusive: request.end_exclusive,
            bars: bars.to_vec(),
        };
        let bytes = bincode::serde::encode_to_vec(&file, bincode::config::standard()).map_err(
            |e| {
                CodecSnafu {
                    path: path.clone(),
                    message: e.to_string(),
                }
                .build()
            },
        )?;

        let tmp_path = path.with_extension(format!("{FILE_EXTENSION}.{}.tmp", Uuid::new_v4()));
        if let Err(e) = write_synced(&tmp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e).context(IoSnafu { path: tmp_path });
        }

        // Atomic rename
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e).context(IoSnafu { path });
        }
        debug!(path = %path.display(), bars = bars.len(), source_id, "chunk file written");
        Ok(())
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = tokio::fs::File::create(path).await?;
    f.write_all(bytes).await?;
    f.sync_all().await
}

fn decode_chunk(bytes: &[u8]) -> Result<ChunkFile, String> {
    bincode::serde::decode_from_slice::<ChunkFile, _>(bytes, bincode::config::standard())
        .map(|(file, _)| file)
        .map_err(|e| e.to_string())
}

fn file_stamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Keeps symbols like `BTC/USD` from creating nested directories.
fn path_segment(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}
