//! 파일 분할과 재조립
//!
//! - OutboundTransfer: 송신측 세그먼트 목록 + ACK 집합
//! - Reception: 수신측 청크 맵, 순서 무관 수신 후 오름차순 조립

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use dashmap::DashSet;
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// 송신측 파일 전송 상태
///
/// 준비 시점에 파일을 한 번 훑어 청크로 분할한다. 전송 태스크가
/// 세그먼트를 순서대로 내보내는 동안 수신 루프가 ACK 집합을 채운다.
#[derive(Debug)]
pub struct OutboundTransfer {
    /// 전송 ID (송신자 로컬, 1부터 단조 증가)
    pub file_id: i32,

    /// 파일명 (경로 제외)
    pub filename: String,

    /// 전체 크기 (바이트)
    pub total_size: u64,

    /// 수신자 ID (`ALL` 또는 특정 피어)
    pub recipient: String,

    /// 청크 데이터 (인덱스 = 시퀀스 번호)
    segments: Vec<Bytes>,

    /// ACK 수신된 시퀀스 집합
    acknowledged: DashSet<i32>,
}

impl OutboundTransfer {
    /// 파일을 한 번 스트리밍하며 청크로 분할
    pub async fn prepare(
        file_id: i32,
        path: &Path,
        recipient: &str,
        chunk_size: usize,
    ) -> Result<Self> {
        let meta = fs::metadata(path)
            .await
            .map_err(|_| Error::FileNotFound { path: path.to_path_buf() })?;
        if !meta.is_file() {
            return Err(Error::FileNotFound { path: path.to_path_buf() });
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_owned());
        let total_size = meta.len();

        let mut file = fs::File::open(path).await?;
        let mut segments = Vec::with_capacity(total_size.div_ceil(chunk_size as u64) as usize);
        let mut buf = vec![0u8; chunk_size];

        loop {
            let mut filled = 0;
            while filled < chunk_size {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            segments.push(Bytes::copy_from_slice(&buf[..filled]));
            if filled < chunk_size {
                break;
            }
        }

        Ok(Self {
            file_id,
            filename,
            total_size,
            recipient: recipient.to_owned(),
            segments,
            acknowledged: DashSet::new(),
        })
    }

    /// 총 청크 수
    pub fn total_chunks(&self) -> i32 {
        self.segments.len() as i32
    }

    /// 시퀀스 번호의 청크 데이터
    pub fn segment(&self, sequence: i32) -> Option<Bytes> {
        if sequence < 0 {
            return None;
        }
        self.segments.get(sequence as usize).cloned()
    }

    /// ACK 기록
    pub fn mark_acknowledged(&self, sequence: i32) {
        self.acknowledged.insert(sequence);
    }

    /// ACK 수신 여부
    pub fn is_acknowledged(&self, sequence: i32) -> bool {
        self.acknowledged.contains(&sequence)
    }

    /// ACK 수신된 청크 수
    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged.len()
    }

    /// 진행률 (%)
    pub fn progress_percent(&self) -> u32 {
        if self.segments.is_empty() {
            return 100;
        }
        (self.acknowledged.len() * 100 / self.segments.len()) as u32
    }
}

/// 수신측 파일 수신 상태
///
/// (송신자, file_id) 단위로 하나씩 유지된다. 같은 시퀀스의 중복
/// 청크는 최초 도착만 반영한다.
#[derive(Debug)]
pub struct Reception {
    /// 전송 ID
    pub file_id: i32,

    /// 송신자 ID
    pub sender: String,

    /// FILE_START가 선언한 파일명
    pub filename: String,

    /// FILE_START가 선언한 크기 (바이트)
    pub declared_size: u64,

    /// 수신 청크 (시퀀스 → 데이터)
    chunks: HashMap<i32, Bytes>,

    /// 수신 누적 바이트
    bytes_received: u64,

    /// 수신 시작 시간
    created_at: Instant,
}

impl Reception {
    /// 새 수신 상태 생성
    pub fn new(file_id: i32, sender: &str, filename: &str, declared_size: u64) -> Self {
        Self {
            file_id,
            sender: sender.to_owned(),
            filename: filename.to_owned(),
            declared_size,
            chunks: HashMap::new(),
            bytes_received: 0,
            created_at: Instant::now(),
        }
    }

    /// 청크 삽입 (최초 도착만 반영)
    ///
    /// 이미 받은 시퀀스면 false
    pub fn insert_chunk(&mut self, sequence: i32, data: Bytes) -> bool {
        if self.chunks.contains_key(&sequence) {
            return false;
        }
        self.bytes_received += data.len() as u64;
        self.chunks.insert(sequence, data);
        true
    }

    /// 수신 누적 바이트
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// 진행률 (%)
    pub fn progress_percent(&self) -> u32 {
        if self.declared_size == 0 {
            return 100;
        }
        (self.bytes_received * 100 / self.declared_size) as u32
    }

    /// 누락된 시퀀스 목록
    pub fn missing_chunks(&self, total_chunks: i32) -> Vec<i32> {
        (0..total_chunks)
            .filter(|seq| !self.chunks.contains_key(seq))
            .collect()
    }

    /// 수신 경과 시간
    pub fn elapsed(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// 청크를 오름차순으로 이어 붙여 완성
    ///
    /// 누락 시퀀스가 있으면 실패하고 아무것도 쓰지 않는다
    pub fn assemble(&self, total_chunks: i32) -> Result<Bytes> {
        let missing = self.missing_chunks(total_chunks);
        if !missing.is_empty() {
            return Err(Error::ChunksMissing { file_id: self.file_id, missing });
        }

        let mut data = BytesMut::with_capacity(self.bytes_received as usize);
        for seq in 0..total_chunks {
            data.extend_from_slice(&self.chunks[&seq]);
        }
        Ok(data.freeze())
    }
}

/// 완성된 파일을 수신 디렉터리에 저장
///
/// 디렉터리는 최초 사용 시 생성한다. 선언된 파일명의 마지막 경로
/// 구성요소만 사용하며, 동일 이름은 덮어쓴다.
pub async fn save_received(dir: &Path, filename: &str, data: &[u8]) -> Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_owned())
        .unwrap_or_else(|| "unnamed".into());

    fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    fs::write(&path, data).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn prepare_from(data: &[u8], chunk_size: usize) -> OutboundTransfer {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        fs::write(&path, data).await.unwrap();
        OutboundTransfer::prepare(1, &path, "ALL", chunk_size).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_file_has_no_chunks() {
        let transfer = prepare_from(&[], 1024).await;
        assert_eq!(transfer.total_chunks(), 0);
        assert_eq!(transfer.total_size, 0);
        assert_eq!(transfer.progress_percent(), 100);
    }

    #[tokio::test]
    async fn test_single_chunk_file() {
        let transfer = prepare_from(&[7u8; 622], 1024).await;
        assert_eq!(transfer.total_chunks(), 1);
        assert_eq!(transfer.segment(0).unwrap().len(), 622);
        assert!(transfer.segment(1).is_none());
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_chunk() {
        let transfer = prepare_from(&[0u8; 3 * 1024], 1024).await;
        assert_eq!(transfer.total_chunks(), 3);
        for seq in 0..3 {
            assert_eq!(transfer.segment(seq).unwrap().len(), 1024);
        }
    }

    #[tokio::test]
    async fn test_partial_trailing_chunk() {
        let transfer = prepare_from(&[0u8; 1025], 1024).await;
        assert_eq!(transfer.total_chunks(), 2);
        assert_eq!(transfer.segment(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_reported() {
        let result =
            OutboundTransfer::prepare(1, Path::new("no/such/file.bin"), "ALL", 1024).await;
        assert!(matches!(result, Err(Error::FileNotFound { .. })));
    }

    #[test]
    fn test_acknowledged_set() {
        let transfer = OutboundTransfer {
            file_id: 1,
            filename: "x".into(),
            total_size: 2048,
            recipient: "ALL".into(),
            segments: vec![Bytes::from(vec![0u8; 1024]), Bytes::from(vec![1u8; 1024])],
            acknowledged: DashSet::new(),
        };

        assert!(!transfer.is_acknowledged(0));
        transfer.mark_acknowledged(0);
        assert!(transfer.is_acknowledged(0));
        assert_eq!(transfer.acknowledged_count(), 1);
        assert_eq!(transfer.progress_percent(), 50);
    }

    #[test]
    fn test_duplicate_chunk_ignored() {
        let mut reception = Reception::new(1, "alice", "f.bin", 2048);

        assert!(reception.insert_chunk(0, Bytes::from(vec![1u8; 1024])));
        assert!(!reception.insert_chunk(0, Bytes::from(vec![2u8; 1024])));
        assert_eq!(reception.bytes_received(), 1024);
        assert_eq!(reception.assemble(1).unwrap()[0], 1);
    }

    #[test]
    fn test_assemble_in_sequence_order() {
        let mut reception = Reception::new(1, "alice", "f.bin", 3);

        // 역순 도착
        reception.insert_chunk(2, Bytes::from_static(b"c"));
        reception.insert_chunk(0, Bytes::from_static(b"a"));
        reception.insert_chunk(1, Bytes::from_static(b"b"));

        assert_eq!(&reception.assemble(3).unwrap()[..], b"abc");
    }

    #[test]
    fn test_assemble_fails_on_missing_chunk() {
        let mut reception = Reception::new(9, "alice", "f.bin", 3072);
        reception.insert_chunk(0, Bytes::from(vec![0u8; 1024]));
        reception.insert_chunk(2, Bytes::from(vec![0u8; 1024]));

        match reception.assemble(3) {
            Err(Error::ChunksMissing { file_id, missing }) => {
                assert_eq!(file_id, 9);
                assert_eq!(missing, vec![1]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_assemble_empty_reception() {
        let reception = Reception::new(1, "alice", "empty.bin", 0);
        assert!(reception.assemble(0).unwrap().is_empty());
        assert_eq!(reception.progress_percent(), 100);
    }

    #[tokio::test]
    async fn test_save_strips_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_received(dir.path(), "../../evil.bin", b"data").await.unwrap();

        assert_eq!(path, dir.path().join("evil.bin"));
        assert_eq!(fs::read(&path).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_save_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        save_received(dir.path(), "f.bin", b"old").await.unwrap();
        let path = save_received(dir.path(), "f.bin", b"new").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"new");
    }
}
