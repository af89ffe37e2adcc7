use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::{Embedding, Identity, RecognitionSession};
use rollcall_store::{Gender, NewStudent, Store};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

mod config;
mod replay;
mod run;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    /// TOML config file (overrides ROLLCALL_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student with a reference photo and face embedding
    Enroll {
        #[arg(long)]
        usn: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        course: String,
        /// Year of joining
        #[arg(long)]
        year: i32,
        #[arg(long)]
        section: char,
        /// Male, Female or Others
        #[arg(long)]
        gender: Gender,
        /// Reference photo (any format the `image` crate decodes)
        #[arg(long)]
        image: PathBuf,
        /// JSON file holding the face embedding as an array of numbers
        #[arg(long)]
        embedding: PathBuf,
    },
    /// List enrolled students
    List {
        #[arg(long)]
        json: bool,
    },
    /// Write a student's stored photo to a file
    ExportFace {
        usn: i64,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Show attendance recorded on a day
    Attendance {
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Run recognition over a JSON-lines replay of extracted faces
    Run {
        /// Replay file, one frame per line
        #[arg(long)]
        frames: PathBuf,
        /// Delay between frames, to mimic a live camera
        #[arg(long, default_value_t = 0)]
        frame_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll {
            usn,
            name,
            course,
            year,
            section,
            gender,
            image,
            embedding,
        } => {
            let store = open_store(&config.db_path)?;
            let face_image = read_face_image(&image)?;
            let embedding = read_embedding(&embedding)?;
            store.create_student(&NewStudent {
                usn: Identity(usn),
                name: name.clone(),
                course,
                year_join: year,
                section,
                gender,
                face_image,
                embedding,
            })?;
            println!("Student {name} added with USN {usn}.");
        }
        Commands::List { json } => {
            let store = open_store(&config.db_path)?;
            let students = store.list_students()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&students)?);
            } else if students.is_empty() {
                println!("No students enrolled");
            } else {
                for s in &students {
                    println!("{s} (attendance: {})", s.attendance);
                }
            }
        }
        Commands::ExportFace { usn, out } => {
            let store = open_store(&config.db_path)?;
            let Some(bytes) = store.face_image(Identity(usn))? else {
                bail!("student {usn} not found");
            };
            std::fs::write(&out, bytes).with_context(|| format!("writing {}", out.display()))?;
            println!("Wrote face image for {usn} to {}", out.display());
        }
        Commands::Attendance { date, json } => {
            let store = open_store(&config.db_path)?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let records = store.events_on(date)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No attendance recorded on {date}");
            } else {
                for r in &records {
                    println!(
                        "{}  {:>6}  {}",
                        r.recorded_at.with_timezone(&Local).format("%H:%M:%S"),
                        r.usn,
                        r.name
                    );
                }
            }
        }
        Commands::Run {
            frames,
            frame_interval_ms,
        } => {
            let tic = Instant::now();
            run_recognition(config, frames, Duration::from_millis(frame_interval_ms)).await?;
            println!("Total Execution Time: {:.2} second(s)", tic.elapsed().as_secs_f64());
        }
    }

    Ok(())
}

/// Run the synchronous frame loop on a blocking thread; Ctrl-C flips the
/// stop flag, and the current frame finishes before the loop exits.
async fn run_recognition(config: Config, frames: PathBuf, frame_interval: Duration) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing current frame");
            signal_stop.store(true, Ordering::Relaxed);
        }
    });

    let summary = tokio::task::spawn_blocking(move || -> Result<run::RunSummary> {
        let store = open_store(&config.db_path)?;
        let mut session = RecognitionSession::start(config.pipeline, &store, Local::now())?;
        tracing::info!(
            students = session.catalog().len(),
            already_recorded = session.admission().seen_count(),
            frame_stride = session.config().frame_stride,
            window = %session.config().window,
            "recognition session started"
        );

        let file = std::fs::File::open(&frames)
            .with_context(|| format!("opening replay {}", frames.display()))?;
        let source = replay::ReplaySource::new(BufReader::new(file));

        let summary = run::run_loop(
            &mut session,
            &store,
            source,
            &mut run::TerminalSink::default(),
            &stop,
            frame_interval,
        )?;
        Ok(summary)
    })
    .await
    .context("recognition thread panicked")??;

    println!(
        "Processed {} of {} frames; {} admitted, {} not persisted, {} present today",
        summary.processed,
        summary.frames,
        summary.admitted.len(),
        summary.persistence_failures,
        summary.present
    );
    Ok(())
}

fn open_store(path: &Path) -> Result<Store> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    Store::open(path).with_context(|| format!("opening database {}", path.display()))
}

/// Read the photo and make sure it decodes as an image.
fn read_face_image(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("{} is not a readable image", path.display()))?;
    tracing::debug!(
        width = decoded.width(),
        height = decoded.height(),
        "face image decoded"
    );
    Ok(bytes)
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let embedding: Embedding = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    if embedding.dim() == 0 || !embedding.is_finite() {
        bail!("{}: embedding must be a non-empty array of finite numbers", path.display());
    }
    Ok(embedding)
}
