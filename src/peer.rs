//! 피어 엔드포인트
//!
//! - 등록 + 주기적 하트비트
//! - 수신 디멀티플렉서와 셸 이벤트 채널
//! - 파일 송신 태스크 (청크별 ACK 대기 + 재전송 + 페이싱)
//! - (송신자, file_id) 단위 수신 재조립

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketType};
use crate::transfer::{self, OutboundTransfer, Reception};

/// 셸로 올라가는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// 텍스트 메시지 수신
    Message { sender: String, text: String },

    /// 파일 수신 시작
    FileStart { sender: String, file_id: i32, filename: String, size: u64 },

    /// 파일 수신 진행
    FileProgress { sender: String, file_id: i32, bytes_received: u64, total_size: u64 },

    /// 파일 수신 완료 (저장 경로 포함)
    FileComplete { sender: String, file_id: i32, path: std::path::PathBuf },

    /// 파일 수신 실패
    FileFailed { sender: String, file_id: i32, reason: String },

    /// 접속자 목록 갱신 (자신 제외)
    PeerList(Vec<String>),
}

struct PeerInner {
    id: String,
    config: Config,
    broker_addr: SocketAddr,
    socket: UdpSocket,
    running: AtomicBool,
    online_users: RwLock<HashSet<String>>,
    outbound: DashMap<i32, Arc<OutboundTransfer>>,
    receptions: DashMap<(String, i32), Reception>,
    next_file_id: AtomicI32,
    events: mpsc::Sender<PeerEvent>,
}

/// 피어 핸들
///
/// `start`가 등록을 마치고 하트비트/수신 태스크를 띄운 뒤
/// `(핸들, 이벤트 수신 채널)`을 반환한다.
pub struct Peer {
    inner: Arc<PeerInner>,
    local_addr: SocketAddr,
}

impl Peer {
    /// 피어 시작
    pub async fn start(
        config: Config,
        id: &str,
        broker_addr: SocketAddr,
    ) -> Result<(Peer, mpsc::Receiver<PeerEvent>)> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let local_addr = socket.local_addr()?;

        let (events_tx, events_rx) = mpsc::channel(256);

        let inner = Arc::new(PeerInner {
            id: id.to_owned(),
            config,
            broker_addr,
            socket,
            running: AtomicBool::new(true),
            online_users: RwLock::new(HashSet::new()),
            outbound: DashMap::new(),
            receptions: DashMap::new(),
            next_file_id: AtomicI32::new(1),
            events: events_tx,
        });

        // 등록
        inner.send(&Packet::register(&inner.id)).await?;
        info!("피어 시작: {} ({} → {})", inner.id, local_addr, broker_addr);

        // 하트비트 태스크
        let hb_inner = inner.clone();
        tokio::spawn(async move {
            let interval = Duration::from_millis(hb_inner.config.heartbeat_interval_ms);

            while hb_inner.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !hb_inner.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = hb_inner.send(&Packet::heartbeat(&hb_inner.id)).await {
                    warn!("하트비트 전송 실패: {}", e);
                }
            }
        });

        // 수신 루프
        let recv_inner = inner.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; recv_inner.config.recv_buffer_size];

            while recv_inner.running.load(Ordering::SeqCst) {
                match tokio::time::timeout(
                    Duration::from_millis(100),
                    recv_inner.socket.recv_from(&mut buf),
                )
                .await
                {
                    Ok(Ok((len, _addr))) => {
                        recv_inner.handle_frame(&buf[..len]).await;
                    }
                    Ok(Err(e)) => {
                        if recv_inner.running.load(Ordering::SeqCst) {
                            warn!("수신 에러: {}", e);
                        }
                    }
                    Err(_) => {
                        // 타임아웃, running 재확인
                    }
                }
            }
        });

        Ok((Peer { inner, local_addr }, events_rx))
    }

    /// 피어 ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// 바인드된 로컬 주소
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 전체 브로드캐스트 메시지 전송
    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.inner.send(&Packet::message(&self.inner.id, text)).await
    }

    /// 특정 피어에게 메시지 전송
    pub async fn send_message_to(&self, recipient: &str, text: &str) -> Result<()> {
        self.inner
            .send(&Packet::message(&self.inner.id, text).with_recipient(recipient))
            .await
    }

    /// 파일 전송 시작, 전송 ID 반환
    ///
    /// `recipient`가 `ALL`이면 브로드캐스트. 준비(분할)까지 마친 뒤
    /// 전송 태스크를 띄우고 곧바로 돌아온다.
    pub async fn send_file(&self, path: impl AsRef<Path>, recipient: &str) -> Result<i32> {
        let file_id = self.inner.next_file_id.fetch_add(1, Ordering::SeqCst);
        let transfer = Arc::new(
            OutboundTransfer::prepare(file_id, path.as_ref(), recipient, self.inner.config.chunk_size)
                .await?,
        );

        self.inner.outbound.insert(file_id, transfer.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_transfer(transfer).await;
        });

        Ok(file_id)
    }

    /// 마지막으로 수신한 접속자 목록 (자신 제외, 정렬)
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.inner.online_users.read().iter().cloned().collect();
        users.sort();
        users
    }

    /// 진행 중인 송신 수
    pub fn active_sends(&self) -> usize {
        self.inner.outbound.len()
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 정지
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        info!("피어 정지: {}", self.inner.id);
    }
}

impl PeerInner {
    async fn send(&self, packet: &Packet) -> Result<()> {
        self.socket.send_to(&packet.to_bytes(), self.broker_addr).await?;
        Ok(())
    }

    /// 수신 프레임 1건 처리
    async fn handle_frame(&self, data: &[u8]) {
        let packet = match Packet::from_bytes(data) {
            Ok(p) => p,
            Err(e) => {
                warn!("프레임 해석 실패: {}", e);
                return;
            }
        };

        match packet.packet_type {
            PacketType::Ack => {
                debug!("등록 확인 수신");
            }
            PacketType::Msg => {
                let _ = self
                    .events
                    .send(PeerEvent::Message { sender: packet.sender.clone(), text: packet.text() })
                    .await;
            }
            PacketType::FileStart => self.handle_file_start(&packet).await,
            PacketType::FileChunk => self.handle_file_chunk(&packet).await,
            PacketType::FileEnd => self.handle_file_end(&packet).await,
            PacketType::ClientList => self.handle_client_list(&packet).await,
            PacketType::FileAck => {
                if let Some(transfer) = self.outbound.get(&packet.file_id) {
                    transfer.mark_acknowledged(packet.sequence);
                }
            }
            PacketType::Register | PacketType::Heartbeat => {
                debug!("예상치 못한 타입 무시: {:?}", packet.packet_type);
            }
        }
    }

    async fn handle_file_start(&self, packet: &Packet) {
        let meta = match packet.file_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("FILE_START 메타데이터 해석 실패: {}", e);
                return;
            }
        };

        info!("파일 수신 시작: {} ({} bytes) from {}", meta.filename, meta.size, packet.sender);
        self.receptions.insert(
            (packet.sender.clone(), packet.file_id),
            Reception::new(packet.file_id, &packet.sender, &meta.filename, meta.size),
        );

        let _ = self
            .events
            .send(PeerEvent::FileStart {
                sender: packet.sender.clone(),
                file_id: packet.file_id,
                filename: meta.filename,
                size: meta.size,
            })
            .await;
    }

    async fn handle_file_chunk(&self, packet: &Packet) {
        let key = (packet.sender.clone(), packet.file_id);

        let (inserted, bytes_received, total_size) = match self.receptions.get_mut(&key) {
            Some(mut state) => {
                let inserted = state.insert_chunk(packet.sequence, packet.payload.clone());
                (inserted, state.bytes_received(), state.declared_size)
            }
            None => {
                debug!("수신 상태 없는 청크 무시: {} file_id={}", packet.sender, packet.file_id);
                return;
            }
        };

        if inserted {
            let _ = self
                .events
                .send(PeerEvent::FileProgress {
                    sender: packet.sender.clone(),
                    file_id: packet.file_id,
                    bytes_received,
                    total_size,
                })
                .await;
        }
    }

    async fn handle_file_end(&self, packet: &Packet) {
        let total_chunks = match packet.total_chunks() {
            Ok(t) => t,
            Err(e) => {
                warn!("FILE_END 해석 실패: {}", e);
                return;
            }
        };

        let key = (packet.sender.clone(), packet.file_id);
        let Some((_, reception)) = self.receptions.remove(&key) else {
            warn!("수신 상태 없음: {} file_id={}", packet.sender, packet.file_id);
            self.emit_failed(packet, Error::UnknownReception { file_id: packet.file_id }).await;
            return;
        };

        let data = match reception.assemble(total_chunks) {
            Ok(data) => data,
            Err(e) => {
                warn!("재조립 실패: {}", e);
                self.emit_failed(packet, e).await;
                return;
            }
        };

        match transfer::save_received(&self.config.received_dir, &reception.filename, &data).await {
            Ok(path) => {
                info!(
                    "파일 수신 완료: {} ({} bytes, {:.2}s)",
                    path.display(),
                    data.len(),
                    reception.elapsed().as_secs_f64()
                );
                let _ = self
                    .events
                    .send(PeerEvent::FileComplete {
                        sender: packet.sender.clone(),
                        file_id: packet.file_id,
                        path,
                    })
                    .await;
            }
            Err(e) => {
                warn!("파일 저장 실패: {}", e);
                self.emit_failed(packet, e).await;
            }
        }
    }

    async fn emit_failed(&self, packet: &Packet, error: Error) {
        let _ = self
            .events
            .send(PeerEvent::FileFailed {
                sender: packet.sender.clone(),
                file_id: packet.file_id,
                reason: error.to_string(),
            })
            .await;
    }

    async fn handle_client_list(&self, packet: &Packet) {
        let users: HashSet<String> = packet
            .client_list_ids()
            .into_iter()
            .filter(|id| id != &self.id)
            .collect();

        *self.online_users.write() = users.clone();

        let mut list: Vec<String> = users.into_iter().collect();
        list.sort();
        let _ = self.events.send(PeerEvent::PeerList(list)).await;
    }

    /// 파일 송신 태스크 본체
    ///
    /// 시퀀스를 오름차순으로 한 번씩만 지나간다. 지나간 청크는
    /// 되돌아보지 않는다 (슬라이딩 윈도우 없음).
    async fn run_transfer(&self, transfer: Arc<OutboundTransfer>) {
        let total_chunks = transfer.total_chunks();
        info!(
            "파일 전송 시작: {} ({} bytes, {} 청크) → {}",
            transfer.filename, transfer.total_size, total_chunks, transfer.recipient
        );

        let start = Packet::file_start(&self.id, transfer.file_id, &transfer.filename, transfer.total_size)
            .with_recipient(&transfer.recipient);
        if let Err(e) = self.send(&start).await {
            warn!("FILE_START 전송 실패: {}", e);
        }

        let mut last_logged = 0;
        for sequence in 0..total_chunks {
            let Some(data) = transfer.segment(sequence) else { continue };
            self.send_chunk_with_retry(&transfer, sequence, data).await;

            // 진행률은 10% 단위로만 기록
            let progress = ((sequence + 1) * 100 / total_chunks) as u32;
            if progress / 10 > last_logged / 10 {
                debug!("전송 중 {}: {}%", transfer.filename, progress);
                last_logged = progress;
            }

            if self.config.chunk_send_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.chunk_send_delay_ms)).await;
            }
        }

        let end = Packet::file_end(&self.id, transfer.file_id, total_chunks)
            .with_recipient(&transfer.recipient);
        if let Err(e) = self.send(&end).await {
            warn!("FILE_END 전송 실패: {}", e);
        }

        self.outbound.remove(&transfer.file_id);
        info!("파일 전송 완료: {}", transfer.filename);
    }

    /// 청크 1개를 ACK가 올 때까지 재전송 (상한 있음)
    async fn send_chunk_with_retry(&self, transfer: &OutboundTransfer, sequence: i32, data: Bytes) {
        let frame = Packet::file_chunk(&self.id, transfer.file_id, sequence, data)
            .with_recipient(&transfer.recipient)
            .to_bytes();

        for _ in 0..self.config.max_retries {
            if let Err(e) = self.socket.send_to(&frame, self.broker_addr).await {
                warn!("청크 {} 전송 실패: {}", sequence, e);
            }
            tokio::time::sleep(Duration::from_millis(self.config.ack_wait_ms)).await;
            if transfer.is_acknowledged(sequence) {
                return;
            }
        }

        // 재시도 소진: UDP 특성상 전송된 것으로 간주하고 진행
        transfer.mark_acknowledged(sequence);
        debug!("청크 {} ACK 미수신, best-effort 처리", sequence);
    }
}
