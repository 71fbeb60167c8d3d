//! Integration tests for clickhouse-stream.
//!
//! Most tests run against a minimal in-process HTTP server so the retry and
//! protocol-error branches can be exercised deterministically. Tests marked
//! "live" require a ClickHouse instance on localhost:8123 and skip themselves
//! when none answers.
//!
//! Run tests with: `cargo test --test integration`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clickhouse_stream::{Client, Error};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const CLICKHOUSE_HOST: &str = "localhost";
const CLICKHOUSE_PORT: u16 = 8123;
const CLICKHOUSE_USER: &str = "default";
const CLICKHOUSE_PASSWORD: &str = "";

/// What the fake server does with one accepted connection.
enum Behavior {
    /// Close the connection without answering (transport failure).
    Refuse,
    /// Read the request, then answer with the given status and body.
    Respond { status: u16, body: &'static str },
}

/// Start a fake HTTP server that serves the scripted behaviors, one
/// connection each, then stops accepting.
///
/// Returns the bound port, a connection counter and a channel carrying the
/// raw body of every request that was answered.
async fn spawn_server(behaviors: Vec<Behavior>) -> (u16, Arc<AtomicUsize>, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let (body_tx, body_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for behavior in behaviors {
            let (mut socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            counter.fetch_add(1, Ordering::SeqCst);

            match behavior {
                Behavior::Refuse => drop(socket),
                Behavior::Respond { status, body } => {
                    let request_body = read_request_body(&mut socket).await;
                    let _ = body_tx.send(request_body);

                    let response = format!(
                        "HTTP/1.1 {status} Whatever\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            }
        }
    });

    (port, hits, body_rx)
}

/// Read one HTTP request off the socket and return its body.
async fn read_request_body(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let header_end = buf.windows(4).position(|w| w == b"\r\n\r\n");

        if let Some(pos) = header_end {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);

            if buf.len() >= pos + 4 + content_length {
                return String::from_utf8_lossy(&buf[pos + 4..pos + 4 + content_length])
                    .into_owned();
            }
        }

        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).into_owned(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn local_client(port: u16) -> Client {
    Client::new("127.0.0.1", port, "default", "")
}

// ============================================================================
// Retry Protocol Tests
// ============================================================================

#[tokio::test]
async fn transient_transport_failures_are_retried_until_success() {
    let (port, hits, _bodies) = spawn_server(vec![
        Behavior::Refuse,
        Behavior::Refuse,
        Behavior::Respond {
            status: 200,
            body: "a\tb\n1\tx\n",
        },
    ])
    .await;

    let mut client = local_client(port);
    client.attempts(3, 0);

    let mut rows = client.fetch("SELECT a, b FROM t").await.unwrap();
    let row = rows.next().await.unwrap().unwrap();
    assert_eq!(row.get("a").unwrap(), "1");

    // Two failed attempts plus the successful one.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transport_failure_after_exhausting_attempts() {
    let (port, hits, _bodies) =
        spawn_server(vec![Behavior::Refuse, Behavior::Refuse, Behavior::Refuse]).await;

    let mut client = local_client(port);
    client.attempts(3, 0);

    match client.execute("SELECT 1").await {
        Err(Error::Transport(_)) => {}
        other => panic!("expected Transport error, got {other:?}"),
    }

    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_200_response_is_not_retried() {
    let (port, hits, _bodies) = spawn_server(vec![
        Behavior::Respond {
            status: 500,
            body: "Code: 62. DB::Exception: Syntax error",
        },
        Behavior::Respond {
            status: 200,
            body: "a\n1\n",
        },
    ])
    .await;

    let mut client = local_client(port);
    client.attempts(3, 0);

    match client.fetch("SELECT broken").await {
        Err(Error::Server { status, message }) => {
            assert_eq!(status, 500);
            assert!(message.contains("DB::Exception"));
        }
        other => panic!("expected Server error, got {other:?}"),
    }

    // The second scripted response was never requested.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_wait_delays_subsequent_attempts() {
    let (port, _hits, _bodies) = spawn_server(vec![
        Behavior::Refuse,
        Behavior::Respond {
            status: 200,
            body: "",
        },
    ])
    .await;

    let mut client = local_client(port);
    client.attempts(2, 1);

    let start = std::time::Instant::now();
    client.execute("SELECT 1").await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(1));
}

// ============================================================================
// Protocol Error Tests
// ============================================================================

#[tokio::test]
async fn html_error_page_title_becomes_message() {
    let (port, _hits, _bodies) = spawn_server(vec![Behavior::Respond {
        status: 502,
        body: "<html><head><title>502 Bad Gateway</title></head><body>nginx</body></html>",
    }])
    .await;

    let client = local_client(port);

    match client.execute("SELECT 1").await {
        Err(Error::Server { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "502 Bad Gateway");
        }
        other => panic!("expected Server error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_error_body_does_not_panic() {
    let (port, _hits, _bodies) = spawn_server(vec![Behavior::Respond {
        status: 500,
        body: "",
    }])
    .await;

    let client = local_client(port);

    match client.execute("SELECT 1").await {
        Err(Error::Server { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "empty error body");
        }
        other => panic!("expected Server error, got {other:?}"),
    }
}

// ============================================================================
// Request Construction Tests
// ============================================================================

#[tokio::test]
async fn fetch_sends_query_with_format_clause() {
    let (port, _hits, mut bodies) = spawn_server(vec![Behavior::Respond {
        status: 200,
        body: "a\n1\n",
    }])
    .await;

    let client = local_client(port);
    client.fetch("SELECT a FROM t;").await.unwrap();

    let sent = bodies.recv().await.unwrap();
    assert_eq!(sent, "SELECT a FROM t FORMAT TabSeparatedWithNames");
}

#[tokio::test]
async fn execute_sends_query_verbatim() {
    let (port, _hits, mut bodies) = spawn_server(vec![Behavior::Respond {
        status: 200,
        body: "",
    }])
    .await;

    let client = local_client(port);
    client.execute("DROP TABLE t").await.unwrap();

    let sent = bodies.recv().await.unwrap();
    assert_eq!(sent, "DROP TABLE t");
}

// ============================================================================
// Streaming Tests
// ============================================================================

#[tokio::test]
async fn streams_rows_end_to_end() {
    let (port, _hits, _bodies) = spawn_server(vec![Behavior::Respond {
        status: 200,
        body: "id\tname\n1\talice\n2\tbob\n3\tcarol\n",
    }])
    .await;

    let client = local_client(port);
    let mut stream = client.query_stream("SELECT id, name FROM users").await.unwrap();

    let mut names = Vec::new();
    while let Some(row) = stream.next().await {
        let row = row.unwrap();
        names.push(row.get_string("name").unwrap());
    }

    assert_eq!(names, ["alice", "bob", "carol"]);
}

#[tokio::test]
async fn fetch_one_returns_first_row_and_closes() {
    let (port, _hits, _bodies) = spawn_server(vec![Behavior::Respond {
        status: 200,
        body: "n\n1\n2\n3\n",
    }])
    .await;

    let client = local_client(port);
    let row = client.fetch_one("SELECT n FROM t").await.unwrap().unwrap();

    assert_eq!(row.get_u64("n").unwrap(), 1);
}

#[tokio::test]
async fn fetch_one_on_empty_result_is_none_without_error() {
    let (port, _hits, _bodies) = spawn_server(vec![Behavior::Respond {
        status: 200,
        body: "n\n",
    }])
    .await;

    let client = local_client(port);
    let row = client.fetch_one("SELECT n FROM t WHERE 0").await.unwrap();

    assert!(row.is_none());
}

#[tokio::test]
async fn typed_accessors_over_the_wire() {
    let (port, _hits, _bodies) = spawn_server(vec![Behavior::Respond {
        status: 200,
        body: "day\tamount\tratio\n2024-01-01\t42\t0.5\n",
    }])
    .await;

    let client = local_client(port);
    let row = client.fetch_one("SELECT * FROM visits").await.unwrap().unwrap();

    assert_eq!(row.get_date("day").unwrap().to_string(), "2024-01-01");
    assert_eq!(row.get_u32("amount").unwrap(), 42);
    assert_eq!(row.get_f64("ratio").unwrap(), 0.5);
    assert!(matches!(
        row.get("missing"),
        Err(Error::ColumnNotFound(_))
    ));
}

#[tokio::test]
async fn trace_sink_observes_the_fetch_cycle() {
    let (port, _hits, _bodies) = spawn_server(vec![Behavior::Respond {
        status: 200,
        body: "a\n1\n",
    }])
    .await;

    let seen: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let captured = seen.clone();

    let mut client = local_client(port);
    client.trace_sink(move |message| captured.lock().unwrap().push(message.to_string()));

    let mut rows = client.fetch("SELECT a FROM t").await.unwrap();
    while rows.next().await.unwrap().is_some() {}

    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|m| m.starts_with("Try to fetch")));
    assert!(seen.iter().any(|m| m == "Load field names"));
    assert!(seen.iter().any(|m| m == "The query is fetched"));
}

// ============================================================================
// Live ClickHouse Tests
// ============================================================================

/// Helper to check if ClickHouse is available
async fn clickhouse_available() -> bool {
    let client = reqwest::Client::new();
    client
        .get(format!("http://{CLICKHOUSE_HOST}:{CLICKHOUSE_PORT}/ping"))
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

fn live_client() -> Client {
    Client::new(
        CLICKHOUSE_HOST,
        CLICKHOUSE_PORT,
        CLICKHOUSE_USER,
        CLICKHOUSE_PASSWORD,
    )
}

#[tokio::test]
async fn live_select_streams_rows() {
    if !clickhouse_available().await {
        eprintln!("Skipping test: ClickHouse not available");
        return;
    }

    let client = live_client();
    let mut rows = client
        .fetch("SELECT number FROM system.numbers LIMIT 100")
        .await
        .unwrap();

    let mut expected = 0u64;
    while let Some(row) = rows.next().await.unwrap() {
        assert_eq!(row.get_u64("number").unwrap(), expected);
        expected += 1;
    }

    assert_eq!(expected, 100);
}

#[tokio::test]
async fn live_execute_round_trip() {
    if !clickhouse_available().await {
        eprintln!("Skipping test: ClickHouse not available");
        return;
    }

    let client = live_client();
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS clickhouse_stream_test \
             (day Date, seen DateTime, amount UInt32) ENGINE = Memory",
        )
        .await
        .unwrap();
    client
        .execute(
            "INSERT INTO clickhouse_stream_test VALUES \
             ('2024-01-01', '2024-01-01 12:30:00', 7)",
        )
        .await
        .unwrap();

    let row = client
        .fetch_one("SELECT * FROM clickhouse_stream_test ORDER BY day LIMIT 1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(row.get_date("day").unwrap().to_string(), "2024-01-01");
    assert_eq!(
        row.get_datetime("seen").unwrap().to_string(),
        "2024-01-01 12:30:00"
    );
    assert_eq!(row.get_u32("amount").unwrap(), 7);

    client
        .execute("DROP TABLE clickhouse_stream_test")
        .await
        .unwrap();
}

#[tokio::test]
async fn live_syntax_error_is_a_server_error() {
    if !clickhouse_available().await {
        eprintln!("Skipping test: ClickHouse not available");
        return;
    }

    let client = live_client();

    match client.fetch("SELECT FROM WHERE").await {
        Err(Error::Server { status, message }) => {
            assert_ne!(status, 200);
            assert!(!message.is_empty());
        }
        other => panic!("expected Server error, got {other:?}"),
    }
}
