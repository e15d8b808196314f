//! 중계 통계

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 브로커 중계 카운터
///
/// 수신 루프와 생존 스위퍼가 동시에 기록하므로 전 필드 atomic
#[derive(Debug)]
pub struct RelayStats {
    start_time: Instant,
    frames_received: AtomicU64,
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
    malformed_frames: AtomicU64,
    unknown_recipients: AtomicU64,
    registrations: AtomicU64,
    timeouts: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_received: AtomicU64::new(0),
            frames_relayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            unknown_recipients: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_recipient(&self) {
        self.unknown_recipients.fetch_add(1, Ordering::Relaxed);
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 현재 값 스냅샷
    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            elapsed: self.elapsed(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unknown_recipients: self.unknown_recipients.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 중계 카운터 스냅샷
#[derive(Debug, Clone)]
pub struct RelaySnapshot {
    pub elapsed: Duration,
    pub frames_received: u64,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
    pub malformed_frames: u64,
    pub unknown_recipients: u64,
    pub registrations: u64,
    pub timeouts: u64,
}

impl RelaySnapshot {
    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.1}s | Received: {} | Relayed: {} | Dropped: {} | Malformed: {} | Unknown dest: {} | Registrations: {} | Timeouts: {}",
            self.elapsed.as_secs_f64(),
            self.frames_received,
            self.frames_relayed,
            self.frames_dropped,
            self.malformed_frames,
            self.unknown_recipients,
            self.registrations,
            self.timeouts,
        )
    }
}
