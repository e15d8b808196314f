//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// Hubcast 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘린 프레임: {needed} bytes 필요, {remaining} bytes 잔여")]
    TruncatedFrame { needed: usize, remaining: usize },

    #[error("길이 필드 초과: {field} = {len}")]
    LengthOverflow { field: &'static str, len: u64 },

    #[error("UTF-8 디코딩 실패: {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("알 수 없는 패킷 타입: {tag}")]
    UnknownPacketType { tag: u8 },

    #[error("파일 없음: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("청크 누락: file_id={file_id}, missing={missing:?}")]
    ChunksMissing { file_id: i32, missing: Vec<i32> },

    #[error("수신 상태 없음: file_id={file_id}")]
    UnknownReception { file_id: i32 },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
