//! 프로토콜 패킷 정의
//!
//! 모든 제어/데이터 프레임이 공유하는 고정 와이어 포맷 (네트워크 바이트 오더):
//!
//! ```text
//! u8   type
//! u32  sender 길이 + UTF-8 bytes
//! u32  recipient 길이 + UTF-8 bytes
//! i32  sequence (FILE_CHUNK 전용)
//! i32  file_id  (파일 관련 타입 전용)
//! u32  payload 길이 + bytes
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};
use crate::{BROADCAST_ID, CLIENT_LIST_PREFIX, MAX_PACKET_SIZE, SERVER_ID};

/// 패킷 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// 텍스트 메시지
    Msg = 1,

    /// 파일 전송 시작 (파일명 + 크기)
    FileStart = 2,

    /// 파일 청크
    FileChunk = 3,

    /// 파일 전송 종료 (총 청크 수)
    FileEnd = 4,

    /// 피어 등록
    Register = 5,

    /// 생존 신호
    Heartbeat = 6,

    /// 등록 확인 응답
    Ack = 7,

    /// 접속자 목록
    ClientList = 8,

    /// 청크 수신 확인
    FileAck = 9,
}

impl PacketType {
    /// 태그에서 패킷 타입 복원
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(PacketType::Msg),
            2 => Ok(PacketType::FileStart),
            3 => Ok(PacketType::FileChunk),
            4 => Ok(PacketType::FileEnd),
            5 => Ok(PacketType::Register),
            6 => Ok(PacketType::Heartbeat),
            7 => Ok(PacketType::Ack),
            8 => Ok(PacketType::ClientList),
            9 => Ok(PacketType::FileAck),
            _ => Err(Error::UnknownPacketType { tag }),
        }
    }
}

/// FILE_START 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// 파일명
    pub filename: String,

    /// 파일 크기 (바이트)
    pub size: u64,
}

/// 프로토콜 패킷
///
/// 모든 프레임은 전체 필드를 싣는다. 타입별로 의미 없는 필드는
/// 기본값을 유지한다 (sequence 0, file_id 0, payload 비움).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub sender: String,
    pub recipient: String,
    pub sequence: i32,
    pub file_id: i32,
    pub payload: Bytes,
}

impl Packet {
    fn new(packet_type: PacketType, sender: &str, payload: Bytes) -> Self {
        Self {
            packet_type,
            sender: sender.to_owned(),
            recipient: BROADCAST_ID.to_owned(),
            sequence: 0,
            file_id: 0,
            payload,
        }
    }

    /// 수신자 지정 (기본은 `ALL`)
    pub fn with_recipient(mut self, recipient: &str) -> Self {
        self.recipient = recipient.to_owned();
        self
    }

    /// 텍스트 메시지 패킷
    pub fn message(sender: &str, text: &str) -> Self {
        Self::new(PacketType::Msg, sender, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// 등록 패킷
    pub fn register(sender: &str) -> Self {
        Self::new(PacketType::Register, sender, Bytes::new())
    }

    /// 하트비트 패킷
    pub fn heartbeat(sender: &str) -> Self {
        Self::new(PacketType::Heartbeat, sender, Bytes::new())
    }

    /// 파일 전송 시작 패킷
    ///
    /// 페이로드는 u16 길이 접두사 파일명 + i64 크기
    pub fn file_start(sender: &str, file_id: i32, filename: &str, size: u64) -> Self {
        let name = filename.as_bytes();
        let mut payload = Vec::with_capacity(2 + name.len() + 8);
        payload.put_u16(name.len() as u16);
        payload.put_slice(name);
        payload.put_i64(size as i64);

        let mut packet = Self::new(PacketType::FileStart, sender, Bytes::from(payload));
        packet.file_id = file_id;
        packet
    }

    /// 파일 청크 패킷
    pub fn file_chunk(sender: &str, file_id: i32, sequence: i32, data: Bytes) -> Self {
        let mut packet = Self::new(PacketType::FileChunk, sender, data);
        packet.file_id = file_id;
        packet.sequence = sequence;
        packet
    }

    /// 파일 전송 종료 패킷 (총 청크 수 포함)
    pub fn file_end(sender: &str, file_id: i32, total_chunks: i32) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.put_i32(total_chunks);

        let mut packet = Self::new(PacketType::FileEnd, sender, Bytes::from(payload));
        packet.file_id = file_id;
        packet
    }

    /// 등록 확인 패킷
    pub fn ack(sender: &str, sequence: i32, file_id: i32) -> Self {
        let mut packet = Self::new(PacketType::Ack, sender, Bytes::new());
        packet.sequence = sequence;
        packet.file_id = file_id;
        packet
    }

    /// 청크 수신 확인 패킷
    pub fn file_ack(sender: &str, sequence: i32, file_id: i32) -> Self {
        let mut packet = Self::new(PacketType::FileAck, sender, Bytes::new());
        packet.sequence = sequence;
        packet.file_id = file_id;
        packet
    }

    /// 접속자 목록 패킷 (`SERVER` 발신)
    pub fn client_list(ids: &[String]) -> Self {
        let payload = format!("{}{}", CLIENT_LIST_PREFIX, ids.join(","));
        Self::new(PacketType::ClientList, SERVER_ID, Bytes::from(payload.into_bytes()))
    }

    /// 패킷을 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let sender = self.sender.as_bytes();
        let recipient = self.recipient.as_bytes();

        let mut buf =
            Vec::with_capacity(1 + 4 + sender.len() + 4 + recipient.len() + 4 + 4 + 4 + self.payload.len());
        buf.put_u8(self.packet_type as u8);
        buf.put_u32(sender.len() as u32);
        buf.put_slice(sender);
        buf.put_u32(recipient.len() as u32);
        buf.put_slice(recipient);
        buf.put_i32(self.sequence);
        buf.put_i32(self.file_id);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf
    }

    /// 바이트에서 패킷 역직렬화
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = data;

        if buf.remaining() < 1 {
            return Err(Error::TruncatedFrame { needed: 1, remaining: 0 });
        }
        let packet_type = PacketType::from_u8(buf.get_u8())?;

        let sender = get_string(&mut buf, "sender")?;
        let recipient = get_string(&mut buf, "recipient")?;

        if buf.remaining() < 8 {
            return Err(Error::TruncatedFrame { needed: 8, remaining: buf.remaining() });
        }
        let sequence = buf.get_i32();
        let file_id = buf.get_i32();

        let payload = get_bytes(&mut buf, "payload")?;

        Ok(Self { packet_type, sender, recipient, sequence, file_id, payload })
    }

    /// MSG 페이로드를 텍스트로 해석
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// FILE_START 페이로드에서 메타데이터 추출
    pub fn file_metadata(&self) -> Result<FileMetadata> {
        let mut buf = &self.payload[..];

        if buf.remaining() < 2 {
            return Err(Error::TruncatedFrame { needed: 2, remaining: buf.remaining() });
        }
        let name_len = buf.get_u16() as usize;
        if buf.remaining() < name_len {
            return Err(Error::TruncatedFrame { needed: name_len, remaining: buf.remaining() });
        }
        let filename = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| Error::InvalidUtf8 { field: "filename" })?
            .to_owned();
        buf.advance(name_len);

        if buf.remaining() < 8 {
            return Err(Error::TruncatedFrame { needed: 8, remaining: buf.remaining() });
        }
        let size = buf.get_i64();
        if size < 0 {
            return Err(Error::LengthOverflow { field: "file_size", len: size.unsigned_abs() });
        }

        Ok(FileMetadata { filename, size: size as u64 })
    }

    /// FILE_END 페이로드에서 총 청크 수 추출
    pub fn total_chunks(&self) -> Result<i32> {
        let mut buf = &self.payload[..];
        if buf.remaining() < 4 {
            return Err(Error::TruncatedFrame { needed: 4, remaining: buf.remaining() });
        }
        Ok(buf.get_i32())
    }

    /// CLIENT_LIST 페이로드에서 접속자 ID 목록 추출
    pub fn client_list_ids(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.payload);
        match text.strip_prefix(CLIENT_LIST_PREFIX) {
            Some(rest) => rest
                .split(',')
                .filter(|id| !id.is_empty())
                .map(str::to_owned)
                .collect(),
            None => Vec::new(),
        }
    }
}

/// u32 길이 접두사 UTF-8 문자열 읽기
fn get_string(buf: &mut &[u8], field: &'static str) -> Result<String> {
    let raw = get_bytes(buf, field)?;
    match std::str::from_utf8(&raw) {
        Ok(s) => Ok(s.to_owned()),
        Err(_) => Err(Error::InvalidUtf8 { field }),
    }
}

/// u32 길이 접두사 바이트열 읽기
fn get_bytes(buf: &mut &[u8], field: &'static str) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(Error::TruncatedFrame { needed: 4, remaining: buf.remaining() });
    }
    let len = buf.get_u32() as usize;
    if len > MAX_PACKET_SIZE {
        return Err(Error::LengthOverflow { field, len: len as u64 });
    }
    if buf.remaining() < len {
        return Err(Error::TruncatedFrame { needed: len, remaining: buf.remaining() });
    }
    let raw = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let packet = Packet::message("alice", "안녕하세요");
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(packet, restored);
        assert_eq!(restored.recipient, BROADCAST_ID);
        assert_eq!(restored.text(), "안녕하세요");
    }

    #[test]
    fn test_unicast_recipient_round_trip() {
        let packet = Packet::message("alice", "psst").with_recipient("bob");
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(restored.recipient, "bob");
        assert_eq!(packet, restored);
    }

    #[test]
    fn test_register_defaults() {
        let packet = Packet::register("alice");
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(restored.packet_type, PacketType::Register);
        assert_eq!(restored.sequence, 0);
        assert_eq!(restored.file_id, 0);
        assert!(restored.payload.is_empty());
    }

    #[test]
    fn test_file_start_metadata() {
        let packet = Packet::file_start("alice", 7, "test-file.txt", 622);
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(restored.file_id, 7);
        let meta = restored.file_metadata().unwrap();
        assert_eq!(meta.filename, "test-file.txt");
        assert_eq!(meta.size, 622);
    }

    #[test]
    fn test_file_chunk_round_trip() {
        let data = Bytes::from(vec![0xABu8; 1024]);
        let packet = Packet::file_chunk("alice", 3, 42, data.clone()).with_recipient("bob");
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(restored.sequence, 42);
        assert_eq!(restored.file_id, 3);
        assert_eq!(restored.payload, data);
    }

    #[test]
    fn test_file_end_total_chunks() {
        let packet = Packet::file_end("alice", 3, 17);
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(restored.total_chunks().unwrap(), 17);
    }

    #[test]
    fn test_file_ack_echoes_context() {
        let packet = Packet::file_ack(SERVER_ID, 5, 2);
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(restored.sequence, 5);
        assert_eq!(restored.file_id, 2);
        assert!(restored.payload.is_empty());
    }

    #[test]
    fn test_client_list_round_trip() {
        let ids = vec!["alice".to_owned(), "bob".to_owned(), "carol".to_owned()];
        let packet = Packet::client_list(&ids);
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(restored.sender, SERVER_ID);
        assert_eq!(restored.client_list_ids(), ids);
    }

    #[test]
    fn test_client_list_empty() {
        let packet = Packet::client_list(&[]);
        assert!(packet.client_list_ids().is_empty());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let bytes = Packet::message("alice", "hello").to_bytes();
        for cut in [0, 1, 3, 8, bytes.len() - 1] {
            assert!(matches!(
                Packet::from_bytes(&bytes[..cut]),
                Err(Error::TruncatedFrame { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = Packet::message("alice", "hello").to_bytes();
        bytes[0] = 99;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(Error::UnknownPacketType { tag: 99 })
        ));
    }

    #[test]
    fn test_length_overflow_rejected() {
        let mut bytes = vec![1u8];
        bytes.put_u32(u32::MAX);
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(Error::LengthOverflow { field: "sender", .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut bytes = vec![1u8];
        bytes.put_u32(2);
        bytes.put_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(Error::InvalidUtf8 { field: "sender" })
        ));
    }
}
