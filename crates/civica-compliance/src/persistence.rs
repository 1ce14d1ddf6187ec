use civica_core::{CivicaError, CivicaResult, ComplianceReport};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// JSON-based persistence for compliance reports.
pub struct JsonReportStore {
    base_dir: PathBuf,
}

impl JsonReportStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Save a compliance report as a JSON file.
    /// Returns the path where the report was written.
    ///
    /// File names are `<slug>__<timestamp>_<sequence>.json`; an existing
    /// file is never overwritten.
    pub async fn save_report(&self, report: &ComplianceReport) -> CivicaResult<PathBuf> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(CivicaError::Io)?;

        let slug = operation_slug(&report.operation_id);
        let timestamp = report.generated_at.format("%Y%m%d_%H%M%S_%3f");
        let json = serde_json::to_string_pretty(report)?;

        loop {
            let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
            let path = self
                .base_dir
                .join(format!("{slug}__{timestamp}_{seq:06}.json"));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match file {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())
                        .await
                        .map_err(CivicaError::Io)?;
                    file.flush().await.map_err(CivicaError::Io)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CivicaError::Io(e)),
            }
        }
    }

    /// Load the most recent report for a given operation id.
    pub async fn load_latest(&self, operation_id: &str) -> CivicaResult<Option<ComplianceReport>> {
        let prefix = format!("{}__", operation_slug(operation_id));
        let reports = self.list_reports_for(&prefix).await?;

        match reports.last() {
            Some(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(CivicaError::Io)?;
                let report: ComplianceReport = serde_json::from_str(&content)?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// List all report files, sorted by name (ascending = oldest first per operation).
    pub async fn list_reports(&self) -> CivicaResult<Vec<PathBuf>> {
        self.list_reports_for("").await
    }

    async fn list_reports_for(&self, prefix: &str) -> CivicaResult<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(CivicaError::Io)?;

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".json") && (prefix.is_empty() || name.starts_with(prefix)) {
                    entries.push(path);
                }
            }
        }

        entries.sort();
        Ok(entries)
    }
}

/// File-name-safe, reversible encoding of an operation id.
///
/// ASCII alphanumerics and `-` are kept; every other byte becomes `_xx`
/// (lowercase hex), so distinct ids never share a slug and a slug never
/// contains `__`.
fn operation_slug(operation_id: &str) -> String {
    let mut slug = String::with_capacity(operation_id.len());
    for byte in operation_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            slug.push(byte as char);
        } else {
            slug.push_str(&format!("_{byte:02x}"));
        }
    }
    slug
}
