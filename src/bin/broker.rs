//! Hubcast 브로커 - 중앙 중계 서버
//!
//! 피어 등록/생존 감시와 메시지·파일 중계를 담당하는 허브
//!
//! 사용법:
//!   cargo run --release --bin hubcast_broker -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트(9876)로 실행
//!   cargo run --release --bin hubcast_broker
//!
//!   # 포트와 생존 윈도우 지정
//!   cargo run --release --bin hubcast_broker -- --bind 0.0.0.0:9000 --liveness-window 30000

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hubcast::{Broker, Config, DEFAULT_BROKER_PORT};

/// 브로커 실행 설정
struct BrokerArgs {
    bind_addr: SocketAddr,
    config: Config,
}

impl Default for BrokerArgs {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_BROKER_PORT).parse().unwrap(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> BrokerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = BrokerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--liveness-window" => {
                if i + 1 < args.len() {
                    parsed.config.liveness_window_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--sweep-interval" => {
                if i + 1 < args.len() {
                    parsed.config.sweep_interval_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"Hubcast Broker - 중앙 중계 서버

피어 등록, 하트비트 생존 감시, 브로드캐스트/유니캐스트 중계

사용법:
  cargo run --release --bin hubcast_broker -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:9876)
  --liveness-window <MS>    피어 생존 윈도우 밀리초 (기본: 15000)
  --sweep-interval <MS>     생존 검사 주기 밀리초 (기본: 5000)
  -h, --help                이 도움말 출력

실행 중 명령:
  stats    중계 통계 출력
  clients  등록된 피어 목록 출력
  quit     종료
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    info!("Hubcast broker starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Liveness window: {} ms", args.config.liveness_window_ms);
    info!("Sweep interval: {} ms", args.config.sweep_interval_ms);

    let broker = Broker::start(args.config, args.bind_addr).await?;
    println!("명령: stats | clients | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "quit" => {
                broker.stop();
                break;
            }
            "stats" => println!("{}", broker.stats().summary()),
            "clients" => {
                let ids = broker.client_ids();
                if ids.is_empty() {
                    println!("등록된 피어 없음");
                }
                for id in ids {
                    println!("  {}", id);
                }
            }
            "" => {}
            other => println!("알 수 없는 명령: {}", other),
        }
    }

    println!("{}", broker.stats().summary());
    info!("브로커 종료");
    Ok(())
}
