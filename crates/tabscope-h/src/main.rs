use clap::Parser as ClapParser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tabscope_engine::export;
use tabscope_engine::service::{CaptureService, ControlEvent, ServiceHandle};
use tabscope_h::cdp::CdpClient;
use tabscope_h::channel::CdpChannel;

#[derive(ClapParser, Debug)]
#[command(name = "tabscope", version, about = "Capture a browser tab's console and network logs")]
struct Args {
    /// Page to open before capturing
    #[arg(long)]
    url: Option<String>,

    /// Script file of capture commands to execute
    #[arg(long)]
    file: Option<String>,

    /// Launch the browser in visible mode (not headless)
    #[arg(long)]
    visible: bool,

    /// Root directory run folders are created under
    #[arg(long, default_value = ".")]
    output: PathBuf,
}

/// Mirror of the controller's broadcast state, polled by the REPL the way the
/// capture UI polls its persisted flags.
#[derive(Default)]
struct StatusBoard {
    capturing: bool,
    current_size: usize,
    last_folder: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging to stderr to keep stdout for the REPL
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    println!("Starting tabscope (Chromium via CDP)...");

    let client = CdpClient::launch(args.visible).await?;
    let channel = CdpChannel::new(client.page.clone());
    let (service, handle, mut events) = CaptureService::new(channel);
    tokio::spawn(service.run());

    let status = Arc::new(Mutex::new(StatusBoard::default()));
    let status_updates = Arc::clone(&status);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Ok(mut board) = status_updates.lock() else {
                break;
            };
            match event {
                ControlEvent::CaptureStarted { folder_name } => {
                    board.capturing = true;
                    board.last_folder = Some(folder_name.clone());
                    println!("Capturing... ({})", folder_name);
                }
                ControlEvent::CaptureFailed { reason } => {
                    board.capturing = false;
                    println!("Capture failed: {}", reason);
                }
                ControlEvent::CaptureStopped {
                    folder_name,
                    console_lines,
                    network_entries,
                } => {
                    board.capturing = false;
                    board.last_folder = Some(folder_name);
                    println!(
                        "Stopped: {} console lines, {} network entries captured",
                        console_lines, network_entries
                    );
                }
                ControlEvent::LogSizeUpdate { size } => {
                    board.current_size = size;
                }
            }
        }
    });

    if let Some(url) = &args.url {
        goto(&client, url).await;
    }

    if let Some(file_path) = &args.file {
        run_file(&client, &handle, &status, &args.output, file_path).await?;
    } else {
        run_repl(&client, &handle, &status, &args.output).await?;
    }

    // Stop is a no-op when nothing is capturing; the snapshot call drains the
    // command queue before the browser goes away.
    handle.stop_capture();
    let _ = handle.snapshot().await;
    client.close().await?;
    Ok(())
}

async fn run_file(
    client: &CdpClient,
    handle: &ServiceHandle,
    status: &Arc<Mutex<StatusBoard>>,
    output_root: &Path,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        execute_line(client, handle, status, output_root, trimmed).await;
    }
    Ok(())
}

async fn run_repl(
    client: &CdpClient,
    handle: &ServiceHandle,
    status: &Arc<Mutex<StatusBoard>>,
    output_root: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Commands: goto <url>, start, stop, save, size, exit");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();

    loop {
        print!("> ");
        stdout.flush()?;
        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }
        execute_line(client, handle, status, output_root, trimmed).await;
    }
    Ok(())
}

async fn execute_line(
    client: &CdpClient,
    handle: &ServiceHandle,
    status: &Arc<Mutex<StatusBoard>>,
    output_root: &Path,
    line: &str,
) {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "goto" if !rest.is_empty() => goto(client, rest).await,
        "start" => handle.start_capture(),
        "stop" => handle.stop_capture(),
        "size" => {
            let size = status.lock().map(|board| board.current_size).unwrap_or(0);
            println!("Log Size: {:.10} MB", size as f64 / (1024.0 * 1024.0));
        }
        "save" => save_artifacts(handle, status, output_root).await,
        _ => println!("Unknown command: {}", line),
    }
}

async fn goto(client: &CdpClient, url: &str) {
    match client.page.goto(url).await {
        Ok(_) => println!("Navigated to {}", url),
        Err(e) => println!("Navigation error: {}", e),
    }
}

async fn save_artifacts(
    handle: &ServiceHandle,
    status: &Arc<Mutex<StatusBoard>>,
    output_root: &Path,
) {
    let snapshot = handle.snapshot().await;
    if snapshot.is_empty() {
        println!("No logs captured yet (stop a capture session first).");
        return;
    }

    let folder = status
        .lock()
        .ok()
        .and_then(|board| board.last_folder.clone());
    let Some(folder) = folder else {
        println!("No logs captured yet (stop a capture session first).");
        return;
    };

    let dir = output_root.join(folder);
    match export::write_artifacts(&snapshot, &dir).await {
        Ok(paths) => {
            for path in paths {
                println!("Wrote {}", path.display());
            }
        }
        Err(e) => println!("Export error: {}", e),
    }
}
