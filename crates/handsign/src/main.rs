//! Headless tools working on recorded landmark streams.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use handsign::{
    capture::{read_clip, CaptureEvent, CaptureLoop, Passthrough, RecordedLandmarks},
    config::LibraryStatus,
    library::{self, ReferenceSign, SignLibrary},
    sequence::GestureSequence,
    Config,
};

#[derive(Parser, Debug)]
#[command(name = "handsign", about = "Sign recognition on recorded landmark streams")]
struct Args {
    /// Configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classifies each recording as one gesture.
    Classify {
        /// Reference library, overriding the configured one.
        #[arg(long)]
        library: Option<PathBuf>,
        /// Recorded landmark streams (JSON Lines).
        #[arg(required = true)]
        clips: Vec<PathBuf>,
    },
    /// Builds a reference library from labeled recordings.
    Pack {
        /// Output library document, or directory with `--dir`.
        out: PathBuf,
        /// Recordings as `LABEL=CLIP`. A label may be given several times.
        #[arg(required = true, value_parser = parse_entry)]
        entries: Vec<(String, PathBuf)>,
        /// Write the directory layout (`<out>/<label>/<clip>.json`) instead of a single document.
        #[arg(long)]
        dir: bool,
    },
    /// Lists the signs of a reference library.
    Inspect { library: PathBuf },
}

fn parse_entry(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((label, clip)) if !label.is_empty() && !clip.is_empty() => {
            Ok((label.to_string(), clip.into()))
        }
        _ => Err(format!("expected `LABEL=CLIP`, got `{s}`")),
    }
}

fn main() -> anyhow::Result<()> {
    handsign::init_logger!();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env();

    match args.command {
        Command::Classify { library, clips } => {
            if library.is_some() {
                config.library = library;
            }
            classify(&config, &clips)
        }
        Command::Pack { out, entries, dir } => pack(&config, &out, &entries, dir),
        Command::Inspect { library } => {
            let library = SignLibrary::load(&library)?;
            println!("{}", library.describe());
            Ok(())
        }
    }
}

fn classify(config: &Config, clips: &[PathBuf]) -> anyhow::Result<()> {
    let (library, status) = config.load_library();
    match status {
        LibraryStatus::Loaded => {}
        LibraryStatus::NotConfigured => bail!("no reference library given"),
        LibraryStatus::Unavailable(e) => return Err(e.into()),
    }

    let replay = config.for_replay();
    for clip in clips {
        let source = RecordedLandmarks::open(clip)?;
        let mut capture = CaptureLoop::new(
            source,
            Passthrough,
            replay.recorder(Arc::clone(&library)),
            replay.capture.clone(),
        );
        let events = capture.events();
        capture.control().start_recording();

        if let Err(e) = capture.run() {
            log::error!("{}: {}", clip.display(), e);
            continue;
        }

        // One recording per clip. Frames past the recorder's frame limit are not part of it.
        let labels: Vec<_> = events
            .try_iter()
            .filter_map(|event| match event {
                CaptureEvent::Detection(label) => Some(label.to_string()),
                _ => None,
            })
            .collect();
        let score = capture
            .recorder()
            .last_result()
            .and_then(|result| result.score())
            .map_or_else(|| "-".to_string(), |score| format!("{score:.3}"));
        println!("{}\t{}\t{}", clip.display(), labels.join(","), score);
    }
    Ok(())
}

fn pack(
    config: &Config,
    out: &Path,
    entries: &[(String, PathBuf)],
    dir: bool,
) -> anyhow::Result<()> {
    let extractor = config.extractor();
    let mut signs = Vec::new();
    for (label, clip) in entries {
        let template: GestureSequence = read_clip(clip)?
            .iter()
            .map(|frame| extractor.extract(frame))
            .collect();
        if template.is_empty() {
            log::warn!("{} contains no frames, skipping", clip.display());
            continue;
        }

        if dir {
            let name = clip
                .file_stem()
                .and_then(|stem| stem.to_str())
                .with_context(|| format!("invalid recording name '{}'", clip.display()))?;
            let path = library::write_template(out, label, name, &template)?;
            log::debug!("wrote {}", path.display());
        }
        signs.push(ReferenceSign::new(label.as_str(), vec![template]));
    }

    let library = SignLibrary::from_signs(signs);
    if library.is_empty() {
        bail!("no usable recordings");
    }
    if !dir {
        library.save(out)?;
    }
    log::info!(
        "packed {} signs ({} templates) into {}",
        library.len(),
        library.template_count(),
        out.display(),
    );
    println!("{}", library.describe());
    Ok(())
}
