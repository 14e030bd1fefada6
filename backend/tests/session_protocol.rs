//! End-to-end protocol tests over a real Unix domain socket.
//!
//! Starts `server::serve` on a socket inside a temp dir with a scripted
//! completion service and execution boundary, then talks to it the way the
//! frontend does: one request per line, replies terminated by NUL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use awesh_backend::io::config::BackendConfig;
use awesh_backend::io::prompt::PromptEngine;
use awesh_backend::server;
use awesh_backend::session::SessionDeps;
use awesh_backend::settings::Settings;
use awesh_backend::test_support::{FixedProvider, ScriptedBoundary, ScriptedCompletion};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    socket: PathBuf,
    work: PathBuf,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
    _temp: tempfile::TempDir,
}

fn start(
    provider: FixedProvider,
    boundary: ScriptedBoundary,
    settings: Arc<Settings>,
    max_message_bytes: usize,
) -> Running {
    let temp = tempfile::tempdir().expect("tempdir");
    let socket = temp.path().join("awesh.sock");
    let work = temp.path().join("work");
    std::fs::create_dir_all(&work).expect("work dir");

    let mut config = BackendConfig::default();
    config.paths.backup_dir = temp.path().join("backups");
    config.limits.max_message_bytes = max_message_bytes;
    config.limits.empty_retry_delay_ms = 1;
    config.file_agent.enabled = false;

    let deps = SessionDeps {
        config: Arc::new(config),
        settings,
        prompts: Arc::new(PromptEngine::new()),
        providers: Arc::new(provider),
        boundary: Arc::new(boundary),
    };
    let listener = server::bind(&socket).expect("bind");
    let (stop, stopped) = oneshot::channel::<()>();
    let path = socket.clone();
    let handle = tokio::spawn(async move {
        server::serve(listener, &path, deps, async {
            let _ = stopped.await;
        })
        .await
    });
    Running {
        socket,
        work,
        stop,
        handle,
        _temp: temp,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(socket: &Path) -> Self {
        let stream = UnixStream::connect(socket).await.expect("connect");
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send(&mut self, line: &str) -> String {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write");
        self.reply().await.expect("reply")
    }

    /// Next NUL-terminated reply, or `None` once the server closed.
    async fn reply(&mut self) -> Option<String> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(0, &mut buf).await.expect("read");
        if read == 0 {
            return None;
        }
        assert_eq!(buf.pop(), Some(0), "reply must end with NUL");
        Some(String::from_utf8(buf).expect("utf8 reply"))
    }
}

fn settings() -> Arc<Settings> {
    Arc::new(Settings::new("openai", false, None))
}

#[tokio::test]
async fn control_messages_round_trip() {
    let settings = settings();
    let running = start(
        FixedProvider::new(Arc::new(ScriptedCompletion::new())),
        ScriptedBoundary::new(),
        settings.clone(),
        4096,
    );
    let mut client = Client::connect(&running.socket).await;

    assert_eq!(client.send("STATUS").await, "AI_READY");
    assert_eq!(
        client.send(&format!("CWD:{}", running.work.display())).await,
        "OK"
    );
    assert_eq!(client.send("VERBOSE:1").await, "🔧 Verbose mode enabled\n");
    assert_eq!(client.send("VERBOSE:maybe").await, "🔧 Verbose mode: enabled\n");
    assert_eq!(client.send("VERBOSE:off").await, "🔇 Verbose mode disabled\n");
    assert_eq!(
        client.send("AI_PROVIDER:openrouter").await,
        "🤖 Switching to openrouter... (restart awesh to take effect)\n"
    );
    assert_eq!(settings.provider(), "openrouter");
    assert_eq!(client.send("UNDO").await, "❌ no edits to undo\n");

    running.stop.send(()).expect("stop");
    running.handle.await.expect("join").expect("serve");
    assert!(!running.socket.exists());
}

#[tokio::test]
async fn prompt_runs_commands_and_patches_in_the_synced_directory() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .respond("awesh: echo hi")
            .respond("Turning debug on.\nEDIT: config.py\nOLD: DEBUG = False\nNEW: DEBUG = True"),
    );
    let boundary = ScriptedBoundary::new().succeed("echo hi", "hi\n");
    let running = start(
        FixedProvider::new(completion.clone()),
        boundary,
        settings(),
        4096,
    );
    let config = running.work.join("config.py");
    std::fs::write(&config, "DEBUG = False\n").expect("write");
    let mut client = Client::connect(&running.socket).await;

    client
        .send(&format!("CWD:{}", running.work.display()))
        .await;
    let reply = client.send("say hi").await;
    assert_eq!(reply, "✅ echo hi\nhi\n");

    let reply = client.send("enable debug in config.py").await;
    assert!(reply.starts_with("🤖 Turning debug on."), "{reply}");
    assert!(reply.contains("📊 1/1 edits applied successfully"));
    assert_eq!(std::fs::read_to_string(&config).expect("read"), "DEBUG = True\n");

    let reply = client.send("UNDO").await;
    assert!(reply.starts_with("✅ Undid edit to"), "{reply}");
    assert_eq!(std::fs::read_to_string(&config).expect("read"), "DEBUG = False\n");

    let second = completion.requests()[1].context.clone().expect("context");
    assert_eq!(second.working_dir, running.work);
    assert_eq!(second.last_command.as_deref(), Some("echo hi"));

    running.stop.send(()).expect("stop");
    running.handle.await.expect("join").expect("serve");
}

#[tokio::test]
async fn unavailable_provider_reports_loading() {
    let running = start(
        FixedProvider::unavailable(),
        ScriptedBoundary::new(),
        settings(),
        4096,
    );
    let mut client = Client::connect(&running.socket).await;

    assert_eq!(client.send("STATUS").await, "AI_LOADING");
    assert_eq!(
        client.send("what is using port 80").await,
        "❌ AI not ready yet - still loading models\n"
    );

    running.stop.send(()).expect("stop");
    running.handle.await.expect("join").expect("serve");
}

#[tokio::test]
async fn blank_lines_get_no_reply() {
    let running = start(
        FixedProvider::unavailable(),
        ScriptedBoundary::new(),
        settings(),
        4096,
    );
    let mut client = Client::connect(&running.socket).await;

    client.writer.write_all(b"\n\r\nSTATUS\r\n").await.expect("write");
    assert_eq!(client.reply().await.as_deref(), Some("AI_LOADING"));

    running.stop.send(()).expect("stop");
    running.handle.await.expect("join").expect("serve");
}

#[tokio::test]
async fn oversized_request_closes_the_session() {
    let running = start(
        FixedProvider::unavailable(),
        ScriptedBoundary::new(),
        settings(),
        32,
    );
    let mut client = Client::connect(&running.socket).await;

    assert_eq!(client.send("STATUS").await, "AI_LOADING");
    let long = "x".repeat(64);
    client
        .writer
        .write_all(format!("{long}\n").as_bytes())
        .await
        .expect("write");
    assert_eq!(client.reply().await, None);

    let mut other = Client::connect(&running.socket).await;
    assert_eq!(other.send("STATUS").await, "AI_LOADING");

    running.stop.send(()).expect("stop");
    running.handle.await.expect("join").expect("serve");
}

#[tokio::test]
async fn sessions_keep_separate_context() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .respond("First answer.")
            .respond("Second answer."),
    );
    let running = start(
        FixedProvider::new(completion.clone()),
        ScriptedBoundary::new(),
        settings(),
        4096,
    );
    let mut first = Client::connect(&running.socket).await;
    let mut second = Client::connect(&running.socket).await;

    assert_eq!(first.send("CWD:/srv/one").await, "OK");
    assert_eq!(second.send("CWD:/srv/two").await, "OK");
    assert_eq!(first.send("hello").await, "🤖 First answer.\n");
    assert_eq!(second.send("hello").await, "🤖 Second answer.\n");

    let dirs: Vec<PathBuf> = completion
        .requests()
        .into_iter()
        .filter_map(|request| request.context.map(|context| context.working_dir))
        .collect();
    assert_eq!(dirs, vec![PathBuf::from("/srv/one"), PathBuf::from("/srv/two")]);

    running.stop.send(()).expect("stop");
    running.handle.await.expect("join").expect("serve");
}
