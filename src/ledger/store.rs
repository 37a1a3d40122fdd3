use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::LedgerError;
use crate::meals::model::NutritionRecord;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    records: Vec<NutritionRecord>,
}

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    version: u32,
    records: &'a [NutritionRecord],
}

/// Where the ledger is persisted. The whole ledger is rewritten on every
/// mutation; image payloads are never part of it.
#[derive(Debug, Clone)]
pub enum LedgerStore {
    File(PathBuf),
    Memory,
}

impl LedgerStore {
    pub async fn load(&self) -> Result<Vec<NutritionRecord>, LedgerError> {
        let path = match self {
            LedgerStore::File(p) => p,
            LedgerStore::Memory => return Ok(Vec::new()),
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no ledger yet; starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<LedgerFile>(&bytes) {
            Ok(file) => {
                debug!(version = file.version, records = file.records.len(), "ledger loaded");
                Ok(file.records)
            }
            Err(e) => {
                let aside = path.with_extension("corrupt");
                error!(error = %e, path = %path.display(), aside = %aside.display(), "ledger unreadable; moving aside and starting empty");
                tokio::fs::rename(path, &aside).await?;
                Ok(Vec::new())
            }
        }
    }

    pub async fn save(&self, records: &[NutritionRecord]) -> Result<(), LedgerError> {
        let path = match self {
            LedgerStore::File(p) => p,
            LedgerStore::Memory => return Ok(()),
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(&LedgerFileRef {
            version: FORMAT_VERSION,
            records,
        })?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(records = records.len(), "ledger persisted");
        Ok(())
    }
}
