//! Filesystem archive of a run's results
//!
//! Layout of one archive:
//!
//! ```text
//! <base>/<YYYY-MM-DD-HH-MM-SS>/
//!     results.csv      one row per outcome record
//!     test-suite.yml   the resolved test plan, snippets inlined
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Local};
use hammer_config::TestPlan;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::errors::{OutputError, OutputResult};
use crate::record::OutcomeRecord;
use crate::sink::ResultSink;

pub const RESULTS_FILE: &str = "results.csv";
pub const PLAN_FILE: &str = "test-suite.yml";

const DIR_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Writes and reads run archives below a base directory
#[derive(Debug, Clone)]
pub struct ResultArchive {
    base_dir: PathBuf,
}

impl ResultArchive {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write the records and the plan into a new directory named after the
    /// run's start time. Returns the directory.
    pub async fn archive(
        &self,
        records: &[OutcomeRecord],
        plan: &TestPlan,
        started_at: DateTime<Local>,
    ) -> OutputResult<PathBuf> {
        let dir = self.create_run_dir(started_at).await?;

        let csv = encode_records(records)?;
        let results_path = dir.join(RESULTS_FILE);
        fs::write(&results_path, csv)
            .await
            .map_err(|e| OutputError::filesystem(&results_path, e))?;

        let plan_path = dir.join(PLAN_FILE);
        fs::write(&plan_path, plan.to_yaml()?)
            .await
            .map_err(|e| OutputError::filesystem(&plan_path, e))?;

        info!("Archived {} results to {:?}", records.len(), dir);
        Ok(dir)
    }

    /// Load the records and the plan of a previously archived run
    pub async fn unarchive(dir: impl AsRef<Path>) -> OutputResult<(Vec<OutcomeRecord>, TestPlan)> {
        let dir = dir.as_ref();

        let results_path = dir.join(RESULTS_FILE);
        let csv = fs::read(&results_path)
            .await
            .map_err(|e| OutputError::filesystem(&results_path, e))?;
        let records = decode_records(&csv)?;

        let plan_path = dir.join(PLAN_FILE);
        let content = fs::read_to_string(&plan_path)
            .await
            .map_err(|e| OutputError::filesystem(&plan_path, e))?;
        let mut plan = TestPlan::parse_with_base(&content, dir)?;
        plan.file = Some(plan_path);

        debug!("Loaded {} results from {:?}", records.len(), dir);
        Ok((records, plan))
    }

    /// Runs starting within the same second get a numeric suffix rather than
    /// overwriting each other
    async fn create_run_dir(&self, started_at: DateTime<Local>) -> OutputResult<PathBuf> {
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| OutputError::filesystem(&self.base_dir, e))?;

        let stamp = started_at.format(DIR_FORMAT).to_string();
        let mut dir = self.base_dir.join(&stamp);
        let mut suffix = 1;
        loop {
            match fs::create_dir(&dir).await {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    dir = self.base_dir.join(format!("{}-{}", stamp, suffix));
                    suffix += 1;
                }
                Err(e) => return Err(OutputError::filesystem(&dir, e)),
            }
        }
    }
}

#[async_trait]
impl ResultSink for ResultArchive {
    async fn persist(
        &self,
        records: &[OutcomeRecord],
        plan: &TestPlan,
        started_at: DateTime<Local>,
    ) -> OutputResult<Option<PathBuf>> {
        self.archive(records, plan, started_at).await.map(Some)
    }
}

fn encode_records(records: &[OutcomeRecord]) -> OutputResult<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        wtr.write_record(["Client", "SessionID", "Hostname", "Operation", "When", "Err", "Latency"])?;
    }
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.into_inner()
        .map_err(|e| OutputError::Sink(format!("Failed to flush CSV writer: {}", e)))
}

fn decode_records(data: &[u8]) -> OutputResult<Vec<OutcomeRecord>> {
    let mut rdr = csv::Reader::from_reader(data);
    let mut records = Vec::new();
    for record in rdr.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_header() {
        let records = vec![OutcomeRecord::new(0, "h", "get")];
        let csv = String::from_utf8(encode_records(&records).unwrap()).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(header, "Client,SessionID,Hostname,Operation,When,Err,Latency");
    }

    #[test]
    fn test_empty_result_set_keeps_header() {
        let csv = encode_records(&[]).unwrap();
        assert!(decode_records(&csv).unwrap().is_empty());
        assert!(String::from_utf8(csv).unwrap().starts_with("Client,"));
    }

    #[test]
    fn test_error_text_with_commas_and_quotes() {
        let record = OutcomeRecord {
            error: r#"expected response did not match, expected: "ko" actual: <ok/>"#.to_string(),
            ..OutcomeRecord::new(1, "h", "get")
        };
        let csv = encode_records(std::slice::from_ref(&record)).unwrap();
        assert_eq!(decode_records(&csv).unwrap(), vec![record]);
    }
}
