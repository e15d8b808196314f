//! 프로토콜 설정

use std::path::PathBuf;

use crate::{MAX_CHUNK_SIZE, MAX_PACKET_SIZE};

/// Hubcast 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 하트비트 발신 주기 (밀리초)
    pub heartbeat_interval_ms: u64,

    /// 생존 허용 윈도우 (밀리초)
    /// 마지막 프레임 이후 이 시간이 지나면 레지스트리에서 제거
    pub liveness_window_ms: u64,

    /// 생존 검사 주기 (밀리초)
    pub sweep_interval_ms: u64,

    /// 청크 ACK 대기 시간 (밀리초)
    pub ack_wait_ms: u64,

    /// 청크당 최대 전송 시도 횟수
    pub max_retries: u32,

    /// 청크 간 전송 간격 (밀리초)
    /// 버스트 손실 방지용
    pub chunk_send_delay_ms: u64,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 수신 파일 저장 디렉터리
    pub received_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            heartbeat_interval_ms: 5000,     // 5초
            liveness_window_ms: 15000,       // 15초
            sweep_interval_ms: 5000,         // 5초
            ack_wait_ms: 50,                 // 50ms
            max_retries: 5,
            chunk_send_delay_ms: 10,         // 10ms
            recv_buffer_size: MAX_PACKET_SIZE,
            received_dir: PathBuf::from("received_files"),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 파일 크기에 필요한 청크 수 계산
    pub fn chunk_count(&self, size: u64) -> u32 {
        ((size + self.chunk_size as u64 - 1) / self.chunk_size as u64) as u32
    }

    /// 불안정한 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            ack_wait_ms: 200,
            max_retries: 8,
            chunk_send_delay_ms: 25,
            ..Self::default()
        }
    }

    /// 근거리 유선망용 설정
    pub fn lan() -> Self {
        Self {
            ack_wait_ms: 20,
            max_retries: 3,
            chunk_send_delay_ms: 0,
            ..Self::default()
        }
    }
}
