use anyhow::Context as _;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use retrace_executor::{Consumer, Provider, TransactionInfo};
use retrace_types::LAST_BLOCK;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// One recorded JSON-RPC interaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRecord {
    /// Chain head at recording time; drives range filtering on replay.
    pub block: u64,
    /// `None` when the recorder failed to capture the request body.
    pub request: Option<RpcCall>,
    pub response: RpcResponse,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    /// Raw JSON parameter array, as received.
    pub params: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: Option<String>,
    pub error: Option<RpcErrorResponse>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub code: i64,
    pub message: String,
}

/// Writes the recording format: a gzip stream of length-prefixed,
/// bincode-encoded records. Files are append-only; a recorder rolls over to a
/// new file, never rewrites an old one.
pub struct RpcRecordingWriter {
    out: GzEncoder<BufWriter<File>>,
}

impl RpcRecordingWriter {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create recording file {}", path.display()))?;
        Ok(Self {
            out: GzEncoder::new(BufWriter::new(file), Compression::default()),
        })
    }

    pub fn append(&mut self, record: &RpcRecord) -> anyhow::Result<()> {
        let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .context("failed to encode rpc record")?;
        self.out.write_all(&(payload.len() as u32).to_be_bytes())?;
        self.out.write_all(&payload)?;
        Ok(())
    }

    pub fn finish(self) -> anyhow::Result<()> {
        self.out.finish()?.flush()?;
        Ok(())
    }
}

struct RpcRecordingReader {
    input: BufReader<GzDecoder<File>>,
}

impl RpcRecordingReader {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open recording file {}", path.display()))?;
        Ok(Self {
            input: BufReader::new(GzDecoder::new(file)),
        })
    }

    /// `Ok(None)` at a clean end of the stream.
    fn next_record(&mut self) -> anyhow::Result<Option<RpcRecord>> {
        let mut len = [0u8; 4];
        match self.input.read_exact(&mut len) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        self.input.read_exact(&mut payload)?;
        let (record, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())?;
        Ok(Some(record))
    }
}

/// Replays a directory of recorded RPC traffic.
///
/// Files are processed in sorted directory order; when one is exhausted the
/// next is opened. Log-retrieval requests are recorded but are not executable
/// transactions and are skipped. Records below `from` are skipped silently;
/// the first record at or past `to` ends the replay.
pub struct RpcRecordingProvider {
    dir: PathBuf,
}

impl RpcRecordingProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn recording_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list recording dir {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "gz"))
            .collect();
        files.sort();
        Ok(files)
    }
}

impl Provider for RpcRecordingProvider {
    type Payload = RpcRecord;

    fn run(&mut self, from: u64, to: u64, consume: Consumer<'_, RpcRecord>) -> anyhow::Result<()> {
        if to == LAST_BLOCK {
            anyhow::bail!("substate recording doesn't support 'last' as block range boundary");
        }
        for file in self.recording_files()? {
            tracing::debug!(file = %file.display(), "replaying recording file");
            let mut reader = RpcRecordingReader::open(&file)?;
            loop {
                let record = match reader.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(err) => anyhow::bail!("iterator returned error; {err:#}"),
                };
                let Some(call) = &record.request else {
                    anyhow::bail!("iterator returned nil request");
                };
                if call.method.contains("getLogs") {
                    continue;
                }
                if record.block < from {
                    continue;
                }
                if record.block >= to {
                    return Ok(());
                }
                consume(TransactionInfo {
                    block: record.block,
                    tx_index: 0,
                    data: record,
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(method: &str) -> Option<RpcCall> {
        Some(RpcCall {
            method: method.to_owned(),
            params: "[]".to_owned(),
        })
    }

    fn record(block: u64, method: &str) -> RpcRecord {
        RpcRecord {
            block,
            request: call(method),
            response: RpcResponse::default(),
        }
    }

    fn write_file(path: &Path, records: &[RpcRecord]) {
        let mut writer = RpcRecordingWriter::create(path).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        writer.finish().unwrap();
    }

    fn replay(dir: &Path, from: u64, to: u64) -> anyhow::Result<Vec<(u64, String)>> {
        let mut seen = Vec::new();
        RpcRecordingProvider::new(dir).run(from, to, &mut |info| {
            seen.push((info.block, info.data.request.unwrap().method));
            Ok(())
        })?;
        Ok(seen)
    }

    #[test_log::test]
    fn replays_files_in_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("001.gz"),
            &[record(10, "eth_call"), record(11, "eth_sendRawTransaction")],
        );
        write_file(&dir.path().join("000.gz"), &[record(9, "eth_call")]);

        let seen = replay(dir.path(), 0, 100).unwrap();
        assert_eq!(
            seen,
            vec![
                (9, "eth_call".to_owned()),
                (10, "eth_call".to_owned()),
                (11, "eth_sendRawTransaction".to_owned()),
            ],
        );
    }

    #[test_log::test]
    fn filters_range_and_log_retrievals() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("000.gz"),
            &[
                record(5, "eth_call"),
                record(10, "eth_getLogs"),
                record(10, "eth_call"),
                record(12, "eth_call"),
                record(11, "eth_call"),
            ],
        );

        // Block 5 is below the range, the getLogs record is not executable and
        // the first record at the upper bound terminates the replay.
        let seen = replay(dir.path(), 10, 12).unwrap();
        assert_eq!(seen, vec![(10, "eth_call".to_owned())]);
    }

    #[test_log::test]
    fn nil_request_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("000.gz"),
            &[RpcRecord {
                block: 10,
                request: None,
                response: RpcResponse::default(),
            }],
        );

        let err = replay(dir.path(), 0, 100).unwrap_err();
        assert_eq!(err.to_string(), "iterator returned nil request");
    }

    #[test_log::test]
    fn corrupt_record_reports_inner_error() {
        let dir = tempfile::tempdir().unwrap();
        // A length prefix promising more payload than the stream holds.
        let file = File::create(dir.path().join("000.gz")).unwrap();
        let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());
        out.write_all(&100u32.to_be_bytes()).unwrap();
        out.write_all(&[1, 2, 3]).unwrap();
        out.finish().unwrap().flush().unwrap();

        let err = replay(dir.path(), 0, 100).unwrap_err();
        assert!(
            err.to_string().starts_with("iterator returned error; "),
            "{err}"
        );
    }

    #[test_log::test]
    fn open_ended_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = replay(dir.path(), 0, LAST_BLOCK).unwrap_err();
        assert_eq!(
            err.to_string(),
            "substate recording doesn't support 'last' as block range boundary",
        );
    }
}
