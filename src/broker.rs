//! 중앙 브로커
//!
//! - 피어 레지스트리 관리와 생존 감시
//! - 브로드캐스트/유니캐스트 중계
//! - FILE_CHUNK 수신 확인 응답

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::packet::{Packet, PacketType};
use crate::stats::{RelaySnapshot, RelayStats};
use crate::{BROADCAST_ID, SERVER_ID};

/// 레지스트리 항목
///
/// 회신 주소는 항상 데이터그램의 출처에서 취한다. 프레임 내부
/// 필드는 라우팅용 논리 ID로만 쓴다.
#[derive(Debug, Clone)]
struct PeerEntry {
    addr: SocketAddr,
    last_seen: Instant,
}

struct BrokerInner {
    config: Config,
    socket: UdpSocket,
    clients: DashMap<String, PeerEntry>,
    stats: RelayStats,
    running: AtomicBool,
}

/// 브로커 핸들
///
/// `start`가 수신 루프와 생존 스위퍼를 태스크로 띄운 뒤 반환한다.
/// 프로세스 전역 상태 없이 포트만 다르면 여러 인스턴스 공존 가능.
pub struct Broker {
    inner: Arc<BrokerInner>,
    local_addr: SocketAddr,
}

impl Broker {
    /// 브로커 시작
    pub async fn start(config: Config, bind_addr: SocketAddr) -> Result<Broker> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;

        let inner = Arc::new(BrokerInner {
            config,
            socket,
            clients: DashMap::new(),
            stats: RelayStats::new(),
            running: AtomicBool::new(true),
        });

        info!("브로커 시작: {}", local_addr);

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
                    Ok(Ok((len, addr))) => {
                        recv_inner.dispatch(&buf[..len], addr).await;
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

        // 생존 스위퍼
        let sweep_inner = inner.clone();
        tokio::spawn(async move {
            let interval = Duration::from_millis(sweep_inner.config.sweep_interval_ms);

            while sweep_inner.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !sweep_inner.running.load(Ordering::SeqCst) {
                    break;
                }
                sweep_inner.sweep().await;
            }
        });

        Ok(Broker { inner, local_addr })
    }

    /// 바인드된 로컬 주소
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 등록된 피어 수
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// 등록된 피어 ID 목록
    pub fn client_ids(&self) -> Vec<String> {
        self.inner.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> RelaySnapshot {
        self.inner.stats.snapshot()
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 정지
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        info!("브로커 정지: {}", self.local_addr);
    }
}

impl BrokerInner {
    /// 수신 프레임 1건 처리
    async fn dispatch(&self, data: &[u8], addr: SocketAddr) {
        self.stats.record_received();

        let packet = match Packet::from_bytes(data) {
            Ok(p) => p,
            Err(e) => {
                self.stats.record_malformed();
                warn!("프레임 해석 실패 ({}): {}", addr, e);
                return;
            }
        };

        // 알려진 송신자는 어떤 프레임이든 last_seen 갱신
        if let Some(mut entry) = self.clients.get_mut(&packet.sender) {
            entry.last_seen = Instant::now();
        }

        match packet.packet_type {
            PacketType::Register => {
                self.handle_register(&packet, addr).await;
            }
            PacketType::Heartbeat => {
                // 미등록 피어의 하트비트는 암묵적 등록으로 처리
                if !self.clients.contains_key(&packet.sender) {
                    self.handle_register(&packet, addr).await;
                }
            }
            PacketType::Msg | PacketType::FileStart | PacketType::FileEnd => {
                self.relay(&packet, data).await;
            }
            PacketType::FileChunk => {
                self.relay(&packet, data).await;
                self.send_file_ack(&packet, addr).await;
            }
            PacketType::FileAck => {
                // 송신자에게는 이미 중계 시점에 응답했으므로 소비만
                debug!("FILE_ACK 소비: {} seq={}", packet.sender, packet.sequence);
            }
            PacketType::Ack | PacketType::ClientList => {
                self.stats.record_dropped();
                debug!("피어 발신 불가 타입 무시: {:?} from {}", packet.packet_type, addr);
            }
        }
    }

    /// 등록 처리: 레지스트리 갱신 + ACK + 접속자 목록 브로드캐스트
    async fn handle_register(&self, packet: &Packet, addr: SocketAddr) {
        let id = packet.sender.clone();
        self.clients.insert(id.clone(), PeerEntry { addr, last_seen: Instant::now() });
        self.stats.record_registration();
        info!("등록: {} @ {}", id, addr);

        let ack = Packet::ack(SERVER_ID, 0, 0);
        if let Err(e) = self.socket.send_to(&ack.to_bytes(), addr).await {
            warn!("ACK 전송 실패 ({}): {}", id, e);
        }

        self.broadcast_client_list().await;
    }

    /// 라우팅: `ALL`이면 송신자 제외 전원, 아니면 단일 수신자
    ///
    /// 수신된 프레임 바이트를 그대로 전달한다 (1회 직렬화)
    async fn relay(&self, packet: &Packet, raw: &[u8]) {
        if packet.recipient == BROADCAST_ID {
            // await 중 샤드 잠금을 쥐지 않도록 대상 먼저 수집
            let targets: Vec<(String, SocketAddr)> = self
                .clients
                .iter()
                .filter(|e| e.key() != &packet.sender)
                .map(|e| (e.key().clone(), e.value().addr))
                .collect();

            for (id, addr) in targets {
                match self.socket.send_to(raw, addr).await {
                    Ok(_) => self.stats.record_relayed(),
                    Err(e) => warn!("{} 중계 실패: {}", id, e),
                }
            }
        } else {
            let target = self.clients.get(&packet.recipient).map(|e| e.value().addr);
            match target {
                Some(addr) => match self.socket.send_to(raw, addr).await {
                    Ok(_) => {
                        self.stats.record_relayed();
                        debug!("{} → {}", packet.sender, packet.recipient);
                    }
                    Err(e) => warn!("{} 중계 실패: {}", packet.recipient, e),
                },
                None => {
                    self.stats.record_unknown_recipient();
                    warn!("수신자 없음: {} (from {})", packet.recipient, packet.sender);
                }
            }
        }
    }

    /// 청크 수신 확인을 데이터그램 출처로 회신
    async fn send_file_ack(&self, packet: &Packet, addr: SocketAddr) {
        let ack = Packet::file_ack(SERVER_ID, packet.sequence, packet.file_id);
        if let Err(e) = self.socket.send_to(&ack.to_bytes(), addr).await {
            warn!("FILE_ACK 전송 실패 ({}): {}", packet.sender, e);
        }
    }

    /// 현재 접속자 목록을 전원에게 브로드캐스트
    async fn broadcast_client_list(&self) {
        let ids: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        let frame = Packet::client_list(&ids).to_bytes();

        let targets: Vec<SocketAddr> = self.clients.iter().map(|e| e.value().addr).collect();
        for addr in targets {
            if let Err(e) = self.socket.send_to(&frame, addr).await {
                warn!("접속자 목록 전송 실패 ({}): {}", addr, e);
            }
        }
        debug!("접속자 목록 브로드캐스트: {}명", ids.len());
    }

    /// 생존 윈도우를 넘긴 피어 제거
    async fn sweep(&self) {
        let window = Duration::from_millis(self.config.liveness_window_ms);

        let expired: Vec<String> = self
            .clients
            .iter()
            .filter(|e| e.value().last_seen.elapsed() > window)
            .map(|e| e.key().clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        for id in &expired {
            if self.clients.remove(id).is_some() {
                self.stats.record_timeout();
                info!("타임아웃 제거: {}", id);
            }
        }
        self.broadcast_client_list().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_PACKET_SIZE;

    async fn start_broker(config: Config) -> Broker {
        Broker::start(config, "127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    async fn bind_client() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    /// 다음 프레임 수신 (2초 타임아웃)
    async fn recv_packet(socket: &UdpSocket) -> Option<Packet> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        match tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Packet::from_bytes(&buf[..len]).ok(),
            _ => None,
        }
    }

    /// 특정 타입이 나올 때까지 수신
    async fn recv_until(socket: &UdpSocket, packet_type: PacketType) -> Option<Packet> {
        for _ in 0..32 {
            match recv_packet(socket).await {
                Some(p) if p.packet_type == packet_type => return Some(p),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    /// 밀린 프레임 비우기
    async fn drain(socket: &UdpSocket) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        while let Ok(Ok(_)) =
            tokio::time::timeout(Duration::from_millis(100), socket.recv_from(&mut buf)).await
        {}
    }

    async fn register(socket: &UdpSocket, id: &str, broker_addr: SocketAddr) {
        let frame = Packet::register(id).to_bytes();
        socket.send_to(&frame, broker_addr).await.unwrap();
        recv_until(socket, PacketType::Ack).await.expect("ACK 수신");
    }

    #[tokio::test]
    async fn test_register_acks_and_lists() {
        let broker = start_broker(Config::default()).await;
        let a = bind_client().await;

        a.send_to(&Packet::register("a").to_bytes(), broker.local_addr()).await.unwrap();

        let ack = recv_until(&a, PacketType::Ack).await.unwrap();
        assert_eq!(ack.sender, SERVER_ID);

        let list = recv_until(&a, PacketType::ClientList).await.unwrap();
        assert_eq!(list.client_list_ids(), vec!["a".to_owned()]);
        assert_eq!(broker.client_count(), 1);

        broker.stop();
    }

    #[tokio::test]
    async fn test_registry_tracks_latest_source_addr() {
        let broker = start_broker(Config::default()).await;

        let first = bind_client().await;
        register(&first, "a", broker.local_addr()).await;

        // 같은 ID가 다른 소켓에서 재등록하면 회신 주소가 바뀐다
        let second = bind_client().await;
        register(&second, "a", broker.local_addr()).await;

        let b = bind_client().await;
        register(&b, "b", broker.local_addr()).await;
        drain(&first).await;
        drain(&second).await;

        b.send_to(&Packet::message("b", "hi").with_recipient("a").to_bytes(), broker.local_addr())
            .await
            .unwrap();

        assert!(recv_until(&second, PacketType::Msg).await.is_some());
        assert!(recv_packet(&first).await.is_none());

        broker.stop();
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let broker = start_broker(Config::default()).await;
        let a = bind_client().await;
        let b = bind_client().await;
        let c = bind_client().await;

        register(&a, "a", broker.local_addr()).await;
        register(&b, "b", broker.local_addr()).await;
        register(&c, "c", broker.local_addr()).await;
        drain(&a).await;
        drain(&b).await;
        drain(&c).await;

        a.send_to(&Packet::message("a", "hi").to_bytes(), broker.local_addr()).await.unwrap();

        let to_b = recv_until(&b, PacketType::Msg).await.unwrap();
        let to_c = recv_until(&c, PacketType::Msg).await.unwrap();
        assert_eq!(to_b.text(), "hi");
        assert_eq!(to_c.text(), "hi");
        assert_eq!(to_b.sender, "a");

        // 송신자에게는 되돌아오지 않는다
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        assert!(tokio::time::timeout(Duration::from_millis(300), a.recv_from(&mut buf))
            .await
            .is_err());

        broker.stop();
    }

    #[tokio::test]
    async fn test_unicast_routes_to_one() {
        let broker = start_broker(Config::default()).await;
        let a = bind_client().await;
        let b = bind_client().await;
        let c = bind_client().await;

        register(&a, "a", broker.local_addr()).await;
        register(&b, "b", broker.local_addr()).await;
        register(&c, "c", broker.local_addr()).await;
        drain(&b).await;
        drain(&c).await;

        a.send_to(
            &Packet::message("a", "psst").with_recipient("b").to_bytes(),
            broker.local_addr(),
        )
        .await
        .unwrap();

        let to_b = recv_until(&b, PacketType::Msg).await.unwrap();
        assert_eq!(to_b.text(), "psst");

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        assert!(tokio::time::timeout(Duration::from_millis(300), c.recv_from(&mut buf))
            .await
            .is_err());

        broker.stop();
    }

    #[tokio::test]
    async fn test_unknown_recipient_dropped() {
        let broker = start_broker(Config::default()).await;
        let a = bind_client().await;
        register(&a, "a", broker.local_addr()).await;

        a.send_to(
            &Packet::message("a", "x").with_recipient("ghost").to_bytes(),
            broker.local_addr(),
        )
        .await
        .unwrap();

        // 드롭 카운터가 올라갈 때까지 대기
        for _ in 0..20 {
            if broker.stats().unknown_recipients == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(broker.stats().unknown_recipients, 1);

        broker.stop();
    }

    #[tokio::test]
    async fn test_heartbeat_implicitly_registers() {
        let broker = start_broker(Config::default()).await;
        let a = bind_client().await;

        a.send_to(&Packet::heartbeat("a").to_bytes(), broker.local_addr()).await.unwrap();

        assert!(recv_until(&a, PacketType::Ack).await.is_some());
        assert_eq!(broker.client_ids(), vec!["a".to_owned()]);

        broker.stop();
    }

    #[tokio::test]
    async fn test_file_chunk_relayed_and_acked() {
        let broker = start_broker(Config::default()).await;
        let a = bind_client().await;
        let b = bind_client().await;

        register(&a, "a", broker.local_addr()).await;
        register(&b, "b", broker.local_addr()).await;
        drain(&a).await;
        drain(&b).await;

        let chunk = Packet::file_chunk("a", 1, 4, bytes::Bytes::from_static(b"data"));
        a.send_to(&chunk.to_bytes(), broker.local_addr()).await.unwrap();

        let relayed = recv_until(&b, PacketType::FileChunk).await.unwrap();
        assert_eq!(relayed.sequence, 4);
        assert_eq!(&relayed.payload[..], b"data");

        let ack = recv_until(&a, PacketType::FileAck).await.unwrap();
        assert_eq!(ack.sequence, 4);
        assert_eq!(ack.file_id, 1);

        broker.stop();
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped() {
        let broker = start_broker(Config::default()).await;
        let a = bind_client().await;

        a.send_to(&[0xFFu8, 0x00, 0x01], broker.local_addr()).await.unwrap();

        for _ in 0..20 {
            if broker.stats().malformed_frames == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(broker.stats().malformed_frames, 1);
        assert!(broker.is_running());

        broker.stop();
    }

    #[tokio::test]
    async fn test_sweep_removes_silent_peer() {
        let config = Config {
            liveness_window_ms: 300,
            sweep_interval_ms: 100,
            ..Config::default()
        };
        let broker = start_broker(config).await;
        let a = bind_client().await;
        let c = bind_client().await;

        register(&a, "a", broker.local_addr()).await;
        register(&c, "c", broker.local_addr()).await;

        // a는 하트비트를 유지하고 c는 침묵
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut removed = false;
        while Instant::now() < deadline {
            a.send_to(&Packet::heartbeat("a").to_bytes(), broker.local_addr()).await.unwrap();
            drain(&a).await;
            let ids = broker.client_ids();
            if ids.contains(&"a".to_owned()) && !ids.contains(&"c".to_owned()) {
                removed = true;
                break;
            }
        }
        assert!(removed, "c가 제거되지 않음");
        assert_eq!(broker.stats().timeouts, 1);

        // 재등록으로 유도한 접속자 목록에도 c가 없다
        a.send_to(&Packet::register("a").to_bytes(), broker.local_addr()).await.unwrap();
        let list = recv_until(&a, PacketType::ClientList).await.unwrap();
        assert_eq!(list.client_list_ids(), vec!["a".to_owned()]);

        broker.stop();
    }
}
