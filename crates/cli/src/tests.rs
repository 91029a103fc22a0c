use super::*;
use std::sync::Arc;
use test_support::{drain, patterned_file};
use tokio::net::{TcpListener, TcpStream};

fn run_with_args<I, S>(args: I) -> (i32, String, String)
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run(args, &mut stdout, &mut stderr);
    (
        code,
        String::from_utf8(stdout).unwrap(),
        String::from_utf8(stderr).unwrap(),
    )
}

// =============================================================================
// Argument parsing
// =============================================================================

#[test]
fn parse_args_defaults() {
    let parsed = parse_args(["oc-sendfile", "data.bin"]).unwrap();

    assert_eq!(parsed.listen, DEFAULT_LISTEN.parse::<SocketAddr>().unwrap());
    assert_eq!(parsed.chunk_size, sendfile::DEFAULT_CHUNK_SIZE);
    assert_eq!(parsed.timeout, None);
    assert_eq!(parsed.threads, 0);
    assert_eq!(parsed.offset, 0);
    assert_eq!(parsed.length, None);
    assert!(!parsed.buffered);
    assert!(!parsed.once);
    assert_eq!(parsed.verbosity, 0);
    assert_eq!(parsed.file, Some(PathBuf::from("data.bin")));
}

#[test]
fn parse_args_recognises_every_option() {
    let parsed = parse_args([
        "oc-sendfile",
        "--listen",
        "0.0.0.0:9000",
        "--chunk-size",
        "65536",
        "--timeout",
        "30",
        "--threads",
        "4",
        "--offset",
        "100",
        "--length",
        "200",
        "--buffered",
        "--once",
        "-vv",
        "movie.mp4",
    ])
    .unwrap();

    assert_eq!(parsed.listen, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
    assert_eq!(parsed.chunk_size, 65536);
    assert_eq!(parsed.timeout, Some(30));
    assert_eq!(parsed.threads, 4);
    assert_eq!(parsed.offset, 100);
    assert_eq!(parsed.length, Some(200));
    assert!(parsed.buffered);
    assert!(parsed.once);
    assert_eq!(parsed.verbosity, 2);
    assert_eq!(parsed.file, Some(PathBuf::from("movie.mp4")));
}

#[test]
fn parse_args_rejects_non_numeric_chunk_size() {
    assert!(parse_args(["oc-sendfile", "--chunk-size", "lots", "f"]).is_err());
}

#[test]
fn parse_args_rejects_bad_listen_address() {
    assert!(parse_args(["oc-sendfile", "--listen", "nowhere", "f"]).is_err());
}

#[test]
fn parse_args_with_empty_iterator_uses_program_name() {
    let parsed = parse_args(Vec::<OsString>::new()).unwrap();
    assert_eq!(parsed.file, None);
}

// =============================================================================
// run()
// =============================================================================

#[test]
fn help_flag_prints_usage() {
    let (code, stdout, stderr) = run_with_args(["oc-sendfile", "--help"]);

    assert_eq!(code, 0);
    assert!(stdout.starts_with("Usage: oc-sendfile"));
    assert!(stdout.contains("--chunk-size"));
    assert!(stderr.is_empty());
}

#[test]
fn version_flag_prints_banner() {
    let (code, stdout, _) = run_with_args(["oc-sendfile", "-V"]);

    assert_eq!(code, 0);
    assert_eq!(stdout, format!("oc-sendfile {}\n", env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_option_is_a_usage_error() {
    let (code, stdout, stderr) = run_with_args(["oc-sendfile", "--frobnicate"]);

    assert_eq!(code, EXIT_USAGE);
    assert!(stdout.is_empty());
    assert!(stderr.contains("--help"));
}

#[test]
fn missing_file_operand_is_a_usage_error() {
    let (code, _, stderr) = run_with_args(["oc-sendfile", "--once"]);

    assert_eq!(code, EXIT_USAGE);
    assert!(stderr.contains("missing FILE operand"));
}

#[test]
fn nonexistent_file_is_a_setup_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.bin");

    let (code, stdout, stderr) = run_with_args([
        OsString::from("oc-sendfile"),
        OsString::from("--listen"),
        OsString::from("127.0.0.1:0"),
        missing.into_os_string(),
    ]);

    assert_eq!(code, EXIT_FAILURE);
    assert!(stdout.is_empty(), "nothing may be served: {stdout}");
    assert!(stderr.contains("failed to open"));
}

#[test]
fn offset_past_end_is_a_setup_failure() {
    let (file, _) = patterned_file(10).unwrap();

    let (code, _, stderr) = run_with_args([
        OsString::from("oc-sendfile"),
        OsString::from("--offset"),
        OsString::from("11"),
        file.path().as_os_str().to_owned(),
    ]);

    assert_eq!(code, EXIT_FAILURE);
    assert!(stderr.contains("beyond the end of the file"));
}

#[test]
fn exit_code_from_clamps_range() {
    use std::process::ExitCode;

    let debug = |code: ExitCode| format!("{code:?}");
    assert_eq!(debug(exit_code_from(0)), debug(ExitCode::SUCCESS));
    assert_eq!(debug(exit_code_from(-5)), debug(ExitCode::from(0)));
    assert_eq!(debug(exit_code_from(300)), debug(ExitCode::from(255)));
}

// =============================================================================
// Serving
// =============================================================================

fn config_for(path: &std::path::Path) -> ServeConfig {
    ServeConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        file: path.to_path_buf(),
        offset: 0,
        length: None,
        chunk_size: 64 * 1024,
        timeout: Some(Duration::from_secs(30)),
        threads: 0,
        buffered: false,
        once: true,
    }
}

async fn fetch(addr: SocketAddr) -> Vec<u8> {
    let stream = TcpStream::connect(addr).await.unwrap();
    drain(stream).await.unwrap()
}

#[test]
fn config_options_clamps_length_and_applies_settings() {
    let (file, _) = patterned_file(1000).unwrap();
    let mut config = config_for(file.path());
    config.offset = 600;
    config.length = Some(1000);
    config.chunk_size = 0;

    let options = config.options().unwrap();

    assert_eq!(options.offset(), 600);
    assert_eq!(options.size(), 400);
    assert_eq!(options.chunk_len(), 1);
    assert_eq!(options.time_budget(), Duration::from_secs(30));
}

#[tokio::test]
async fn serve_once_sends_selected_range() {
    let (file, content) = patterned_file(300_000).unwrap();
    let mut config = config_for(file.path());
    config.offset = 1000;
    config.length = Some(200_000);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(serve::serve_listener(
        listener,
        config.options().unwrap(),
        false,
        true,
    ));
    let received = fetch(addr).await;
    let summary = server.await.unwrap().unwrap();

    assert_eq!(summary.connections, 1);
    assert_eq!(summary.bytes, 200_000);
    assert!(received == content[1000..201_000]);
}

#[tokio::test]
async fn serve_once_buffered_sends_whole_file() {
    let (file, content) = patterned_file(70_000).unwrap();
    let config = config_for(file.path());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(serve::serve_listener(
        listener,
        config.options().unwrap(),
        true,
        true,
    ));
    let received = fetch(addr).await;
    let summary = server.await.unwrap().unwrap();

    assert_eq!(summary.bytes, 70_000);
    assert_eq!(received, content);
}

#[tokio::test]
async fn serve_once_summary_counts_only_the_served_range() {
    let (file, _) = patterned_file(4096).unwrap();
    let mut config = config_for(file.path());
    config.offset = 4000;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(serve::serve_listener(
        listener,
        config.options().unwrap(),
        false,
        true,
    ));
    let received = fetch(addr).await;
    let summary = server.await.unwrap().unwrap();

    assert_eq!(
        summary,
        ServeSummary {
            connections: 1,
            bytes: 96,
        }
    );
    assert_eq!(received.len(), 96);
}

#[tokio::test]
async fn serve_many_handles_concurrent_clients() {
    let (file, content) = patterned_file(50_000).unwrap();
    let mut config = config_for(file.path());
    config.once = false;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(serve::serve_listener(
        listener,
        config.options().unwrap(),
        false,
        false,
    ));
    let content = Arc::new(content);
    let clients: Vec<_> = (0..4)
        .map(|_| {
            let content = Arc::clone(&content);
            tokio::spawn(async move { fetch(addr).await == *content })
        })
        .collect();

    for client in clients {
        assert!(client.await.unwrap());
    }
    assert!(!server.is_finished());
    server.abort();
}
