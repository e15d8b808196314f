//! Hubcast 피어 - 대화형 엔드포인트
//!
//! 브로커에 등록한 뒤 콘솔에서 메시지/파일을 주고받는 클라이언트
//!
//! 사용법:
//!   cargo run --release --bin hubcast_peer -- [OPTIONS]
//!
//! 예시:
//!   # 임의 ID로 로컬 브로커 접속
//!   cargo run --release --bin hubcast_peer
//!
//!   # ID와 브로커 주소 지정
//!   cargo run --release --bin hubcast_peer -- --id alice --server 192.168.0.10:9876

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use hubcast::{Config, Peer, PeerEvent, BROADCAST_ID, DEFAULT_BROKER_PORT};

/// 피어 실행 설정
struct PeerArgs {
    id: String,
    server_addr: SocketAddr,
    config: Config,
}

impl Default for PeerArgs {
    fn default() -> Self {
        Self {
            id: format!("peer_{}", rand::thread_rng().gen_range(0..1000)),
            server_addr: format!("127.0.0.1:{}", DEFAULT_BROKER_PORT).parse().unwrap(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> PeerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = PeerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--id" | "-i" => {
                if i + 1 < args.len() {
                    parsed.id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--received-dir" => {
                if i + 1 < args.len() {
                    parsed.config.received_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"Hubcast Peer - 대화형 엔드포인트

브로커 경유로 다른 피어와 메시지/파일을 주고받는 클라이언트

사용법:
  cargo run --release --bin hubcast_peer -- [OPTIONS]

옵션:
  -i, --id <ID>          피어 ID (기본: peer_<난수>)
  -s, --server <ADDR>    브로커 주소 (기본: 127.0.0.1:9876)
  --received-dir <DIR>   수신 파일 저장 디렉터리 (기본: received_files)
  -h, --help             이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"
명령:
  메시지 입력 후 Enter       전체에게 전송
  /msg <피어> <메시지>       특정 피어에게 전송
  /file <경로> [피어]        파일 전송 (피어 생략 시 전체)
  /users                     접속자 목록
  /help                      이 도움말
  /quit                      종료
"#
    );
}

fn prompt(id: &str) {
    print!("{} > ", id);
    let _ = std::io::stdout().flush();
}

/// 수신 이벤트를 콘솔에 출력
async fn print_events(id: String, mut events: mpsc::Receiver<PeerEvent>) {
    // 파일별 마지막 출력 진행률 (10% 단위로만 출력)
    let mut last_progress: HashMap<(String, i32), u32> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::Message { sender, text } => {
                println!("\n[{}]: {}", sender, text);
            }
            PeerEvent::FileStart { sender, filename, size, .. } => {
                println!("\n[FILE] {} 전송 시작: {} ({} bytes)", sender, filename, size);
            }
            PeerEvent::FileProgress { sender, file_id, bytes_received, total_size } => {
                if total_size == 0 {
                    continue;
                }
                let percent = (bytes_received * 100 / total_size) as u32;
                let key = (sender, file_id);
                let last = last_progress.get(&key).copied().unwrap_or(0);
                if percent / 10 > last / 10 {
                    println!("\n[FILE] 수신 중: {}%", percent);
                    last_progress.insert(key, percent);
                } else {
                    continue;
                }
            }
            PeerEvent::FileComplete { sender, file_id, path } => {
                last_progress.remove(&(sender, file_id));
                println!("\n[FILE] 수신 완료: {}", path.display());
            }
            PeerEvent::FileFailed { sender, file_id, reason } => {
                last_progress.remove(&(sender, file_id));
                println!("\n[FILE] 수신 실패: {}", reason);
            }
            PeerEvent::PeerList(_) => {
                // /users 명령으로만 노출
                continue;
            }
        }
        prompt(&id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (콘솔 UI와 섞이지 않게 경고 이상만)
    let subscriber = FmtSubscriber::builder().with_max_level(Level::WARN).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    println!("Hubcast peer: {} → {}", args.id, args.server_addr);

    let (peer, events) = Peer::start(args.config, &args.id, args.server_addr).await?;
    tokio::spawn(print_events(args.id.clone(), events));

    print_help();
    prompt(peer.id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            prompt(peer.id());
            continue;
        }

        if input == "/quit" {
            println!("접속 종료...");
            peer.stop();
            break;
        } else if input == "/help" {
            print_help();
        } else if input == "/users" {
            let users = peer.online_users();
            if users.is_empty() {
                println!("다른 접속자 없음");
            } else {
                for user in users {
                    println!("  • {}", user);
                }
            }
        } else if let Some(rest) = input.strip_prefix("/msg ") {
            match rest.trim().split_once(' ') {
                Some((to, text)) if !text.trim().is_empty() => {
                    if let Err(e) = peer.send_message_to(to, text.trim()).await {
                        println!("전송 실패: {}", e);
                    }
                }
                _ => println!("사용법: /msg <피어> <메시지>"),
            }
        } else if let Some(rest) = input.strip_prefix("/file ") {
            let mut parts = rest.trim().split_whitespace();
            match parts.next() {
                Some(path) => {
                    let recipient = parts.next().unwrap_or(BROADCAST_ID);
                    match peer.send_file(path, recipient).await {
                        Ok(file_id) => println!("[FILE] 전송 시작 (id={})", file_id),
                        Err(e) => println!("[FILE] 전송 실패: {}", e),
                    }
                }
                None => println!("사용법: /file <경로> [피어]"),
            }
        } else if input.starts_with('/') {
            println!("알 수 없는 명령: {} (/help 참고)", input);
        } else {
            match peer.send_message(input).await {
                Ok(()) => println!("[나]: {}", input),
                Err(e) => println!("전송 실패: {}", e),
            }
        }

        prompt(peer.id());
    }

    Ok(())
}
