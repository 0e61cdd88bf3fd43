use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use jobtail::api::{ApiClient, ApiServer};
use jobtail::config::Config;
use jobtail::exec::{CommandSpec, ExecError, Execution, InputWriter};
use jobtail::log::{LogReader, ReplayMode, StreamBuffer, StreamTag};
use jobtail::logging::init_tracing;
use jobtail::process::{new_id, ProcessSpec, ProcessView};

/// Run commands under supervision and keep their output as replayable logs.
#[derive(Parser)]
#[command(name = "jobtail")]
#[command(version)]
struct Cli {
    /// API server port (default: from config, 8181)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Config file (default: ~/.config/jobtail/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Server {
        /// Directory for process logs
        #[arg(long)]
        logdir: Option<PathBuf>,
    },

    /// Create a process from a JSON file and start it
    Run { file: PathBuf },

    /// Start a created process
    Start { pid: String },

    /// List processes
    Ps,

    /// Show one process
    Show { pid: String },

    /// Print captured output, or follow one command's log with --command
    Logs {
        pid: String,

        /// 1-based command index to follow live
        #[arg(short = 'n', long)]
        command: Option<usize>,

        /// Stream to follow with --command
        #[arg(long, default_value = "stdout")]
        stream: StreamTag,
    },

    /// Send a line of input to a running process
    Input { pid: String, text: String },

    /// Remove a process, killing it if it runs
    Rm { pid: String },

    /// Run a command locally, logging it and tailing the log to the terminal
    Exec {
        /// Allocate a pseudo-terminal
        #[arg(long)]
        pty: bool,

        /// Log file (default: a fresh file under the log directory)
        #[arg(long)]
        log: Option<PathBuf>,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if let Some(port) = cli.port {
        let addr: SocketAddr = config
            .server
            .bind_addr
            .parse()
            .context("invalid bind address")?;
        config.server.bind_addr = SocketAddr::new(addr.ip(), port).to_string();
    }

    match cli.command {
        Commands::Server { logdir } => {
            init_tracing("info");
            let server = ApiServer::bind(&config, logdir).await?;
            server.run().await
        }
        Commands::Exec { pty, log, argv } => {
            init_tracing("warn");
            let code = tokio::task::spawn_blocking(move || exec_local(&config, pty, log, argv))
                .await??;
            std::process::exit(code);
        }
        command => {
            init_tracing("warn");
            let client = ApiClient::local(server_port(&config)?)?;
            remote(&client, command).await
        }
    }
}

fn server_port(config: &Config) -> Result<u16> {
    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .context("invalid bind address")?;
    Ok(addr.port())
}

async fn remote(client: &ApiClient, command: Commands) -> Result<()> {
    match command {
        Commands::Run { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let spec: ProcessSpec = serde_json::from_str(&content)
                .with_context(|| format!("invalid process spec in {}", file.display()))?;
            let pid = client.create(&spec).await?;
            client.start(&pid).await?;
            println!("{pid}");
        }
        Commands::Start { pid } => client.start(&pid).await?,
        Commands::Ps => {
            println!("{:<32}  {:<8}  NAME", "ID", "STATE");
            for view in client.list().await? {
                print_row(&view);
            }
        }
        Commands::Show { pid } => {
            let view = client.show(&pid).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Logs {
            pid,
            command: Some(index),
            stream,
        } => client.tail(&pid, index, stream, &mut io::stdout()).await?,
        Commands::Logs { pid, .. } => {
            let output = client.output(&pid).await?;
            io::stdout().write_all(&output)?;
        }
        Commands::Input { pid, text } => {
            client.input(&pid, format!("{text}\n").into_bytes()).await?
        }
        Commands::Rm { pid } => client.remove(&pid).await?,
        Commands::Server { .. } | Commands::Exec { .. } => bail!("not a client command"),
    }
    Ok(())
}

fn print_row(view: &ProcessView) {
    let state = serde_json::to_value(view.state)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    println!("{:<32}  {:<8}  {}", view.id, state, view.name);
}

/// Runs `argv` through the engine while a follower echoes its log.
///
/// Returns the exit code to leave with.
fn exec_local(config: &Config, pty: bool, log: Option<PathBuf>, argv: Vec<String>) -> Result<i32> {
    let Some(mut spec) = CommandSpec::from_argv(&argv) else {
        bail!("no command given");
    };
    if pty {
        spec = spec.pty();
    }
    let path = log.unwrap_or_else(|| config.server.log_dir.join("exec").join(new_id()));

    let execution = Execution::with_log_file(spec, &path, config.engine.clone())?;
    let follower = LogReader::open(&path, config.engine.replay_options(ReplayMode::Follow))?;
    follower.start();
    let echoes = [
        echo(follower.stdout(), io::stdout()),
        echo(follower.stderr(), io::stderr()),
        echo(follower.stdin(), io::sink()),
    ];

    execution.start()?;
    forward_stdin(execution.input());
    let result = execution.wait();

    follower.wait()?;
    for handle in echoes {
        let _ = handle.join();
    }
    eprintln!("log: {}", path.display());

    match result {
        Ok(()) => Ok(0),
        Err(ExecError::Exit(status)) => Ok(status.code().unwrap_or(1)),
        Err(err) => Err(err.into()),
    }
}

fn echo(buffer: StreamBuffer, mut out: impl Write + Send + 'static) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            let n = buffer.read_into(&mut buf);
            if n == 0 {
                break;
            }
            if out.write_all(&buf[..n]).and_then(|_| out.flush()).is_err() {
                break;
            }
        }
    })
}

/// Copies the terminal's stdin to the child until either side closes.
fn forward_stdin(input: InputWriter) {
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buffer = [0u8; 1024];
        loop {
            match stdin.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input.send(&buffer[..n]).is_err() {
                        return;
                    }
                }
            }
        }
        input.close();
    });
}
