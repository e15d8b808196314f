//! # Hubcast
//!
//! UDP 기반 허브-스포크 실시간 메시징/파일 공유 패브릭
//!
//! ## 핵심 특징
//! - **중앙 브로커**: 단일 데이터그램 엔드포인트가 모든 피어를 중계
//! - **브로드캐스트/유니캐스트**: `ALL` 또는 특정 피어 ID로 라우팅
//! - **생존 감시**: 하트비트 기반 피어 레지스트리, 타임아웃 자동 제거
//! - **파일 전송**: 1KB 청크 분할 + ACK/재전송 + 순서 재조립
//! - **손실 허용**: 재시도 소진 시 best-effort로 진행 (UDP 특성 반영)

pub mod broker;
pub mod config;
pub mod error;
pub mod packet;
pub mod peer;
pub mod stats;
pub mod transfer;

pub use broker::Broker;
pub use config::Config;
pub use error::{Error, Result};
pub use packet::{FileMetadata, Packet, PacketType};
pub use peer::{Peer, PeerEvent};
pub use stats::{RelaySnapshot, RelayStats};
pub use transfer::{OutboundTransfer, Reception};

/// 브로커 기본 포트
pub const DEFAULT_BROKER_PORT: u16 = 9876;

/// 최대 데이터그램 크기 (바이트)
pub const MAX_PACKET_SIZE: usize = 65507;

/// 파일 청크 최대 크기 (바이트)
pub const MAX_CHUNK_SIZE: usize = 1024;

/// 브로드캐스트 수신자 ID
pub const BROADCAST_ID: &str = "ALL";

/// 브로커가 발신하는 프레임의 송신자 ID
pub const SERVER_ID: &str = "SERVER";

/// CLIENT_LIST 페이로드 접두사
pub const CLIENT_LIST_PREFIX: &str = "ONLINE_USERS:";
