#![allow(dead_code)]

use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::ServerHandle;
use sqlx::sqlite::SqlitePool;

use oj_pipeline::config::{CaseConfig, KiloByte, MilliSecond, ProblemConfig, UserConfig};
use oj_pipeline::database as db;
use oj_pipeline::model::Language;
use oj_pipeline::sandbox::{Toolchain, Toolchains};
use oj_pipeline::web_server::build_worker_server;
use oj_pipeline::worker::JudgeService;

pub const ECHO_PROBLEM: i64 = 1;
pub const ALICE: i64 = 1;

/// Echoes its input verbatim; input `5` is answered late so that outcomes
/// arrive in case order
pub const ECHO_PROGRAM: &str = "read x\n[ \"$x\" = 5 ] && sleep 0.3\necho \"$x\"\n";

fn case(input: &str, expected: &str) -> CaseConfig {
    CaseConfig {
        input: Some(input.to_string()),
        expected: Some(expected.to_string()),
        ..Default::default()
    }
}

/// Problem 1 has one case `cat` passes and one it fails; problem 2 is
/// passed by `cat` outright
pub fn problems() -> Vec<ProblemConfig> {
    vec![
        ProblemConfig {
            id: ECHO_PROBLEM,
            name: "echo".to_string(),
            time_limit: MilliSecond(2000),
            memory_limit: KiloByte(1 << 20),
            cases: vec![case("3\n", "3\n"), case("5\n", "6\n")],
        },
        ProblemConfig {
            id: 2,
            name: "identity".to_string(),
            time_limit: MilliSecond(2000),
            memory_limit: KiloByte(1 << 20),
            cases: vec![case("1\n", "1\n"), case("2\n", "2\n")],
        },
    ]
}

pub fn users() -> Vec<UserConfig> {
    vec![UserConfig {
        id: ALICE,
        name: "alice".to_string(),
    }]
}

pub async fn seeded_db(dir: &Path) -> SqlitePool {
    let pool = db::init_db(dir.join("oj.sqlite3")).await.unwrap();
    db::seed(&pool, &users(), &problems()).await.unwrap();
    pool
}

/// "Python" programs are shell scripts, so no real compiler is needed
pub fn shell_toolchains() -> Toolchains {
    Toolchains::default().with(
        Language::Python,
        Toolchain {
            file_name: "main.sh".to_string(),
            compile: Some(vec!["sh".into(), "-n".into(), "%INPUT%".into()]),
            run: vec!["sh".into(), "%INPUT%".into()],
        },
    )
}

/// Starts a judging worker on an ephemeral port and returns its address
pub fn spawn_worker(work_root: &Path) -> (String, ServerHandle) {
    let service = JudgeService::new(
        shell_toolchains(),
        work_root.to_path_buf(),
        Duration::from_secs(10),
    )
    .unwrap();
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = build_worker_server(Arc::new(service), listener).unwrap();
    let handle = server.handle();
    actix_web::rt::spawn(server);
    (address, handle)
}
