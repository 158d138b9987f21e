use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tag_manager::database::{File, FileLazy, Metatag, Tag, TagLazy};
use tag_manager::thumbnail::{InlineDeriver, ThumbnailState, DEFAULT_ICON_SIZE};
use tag_manager::utils::config::{Section, SERVER_PORT, UI_DEFAULT_METATAG, UI_RANDOMIZE};
use tag_manager::utils::profile::{Profile, DEFAULT_PROFILE};
use tag_manager::Library;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tag files and browse them by tag", long_about = None)]
struct Args {
    /// Profile name
    #[arg(long, default_value = DEFAULT_PROFILE, global = true)]
    profile: String,

    /// Also log to stderr, at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Catalog a file, optionally tagging it
    Add {
        path: PathBuf,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Add tags to a catalogued file
    Tag { path: PathBuf, tags: Vec<String> },
    /// Remove tags from a catalogued file
    Untag { path: PathBuf, tags: Vec<String> },
    /// Search files by name and tags
    Search {
        #[arg(short, long, default_value = "")]
        name: String,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Recreate the thumbnail of a file
    Thumb {
        path: PathBuf,
        /// Derive from this file instead
        #[arg(long)]
        from: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_ICON_SIZE)]
        size: u32,
    },
    /// Derive every missing thumbnail
    Thumbs {
        #[arg(long, default_value_t = DEFAULT_ICON_SIZE)]
        size: u32,
    },
    /// Move a file to another folder below the root
    Mv { path: PathBuf, target: String },
    /// Forget a file (the file on disk is kept)
    Rm { path: PathBuf },
    #[command(subcommand)]
    Metatags(MetatagCommand),
    #[command(subcommand)]
    Tags(TagCommand),
    /// Show or change settings
    Config {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        randomize: Option<bool>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        default_metatag: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum MetatagCommand {
    List,
    Add { name: String },
    Rename { name: String, new_name: String },
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    List,
    Add {
        name: String,
        /// Owning metatag, defaults to the `default-metatag` setting
        #[arg(short, long)]
        metatag: Option<String>,
    },
    Edit {
        name: String,
        #[arg(long)]
        rename: Option<String>,
        #[arg(short, long)]
        metatag: Option<String>,
    },
    Delete { name: String },
}

fn init_logging(profile: &Profile, debug: bool) -> Result<WorkerGuard> {
    let logs = profile.logs_dir();
    std::fs::create_dir_all(&logs).context("Failed to create log folder")?;
    let (file, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&logs, "main.log"));

    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(file).with_ansi(false))
        .with(debug.then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(env_filter)
        .init();
    Ok(guard)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let profile = Profile::named(&args.profile)?;
    profile.ensure()?;
    let _guard = init_logging(&profile, args.debug)?;
    debug!("Profile {} at {:?}", profile.name(), profile.dir());

    // the process may exit right after a command, so derive in the foreground
    let mut library = Library::open(&profile)
        .with_context(|| format!("Failed to open profile {}", profile.name()))?
        .with_deriver(Arc::new(InlineDeriver));

    match args.command {
        Command::Add { path, tags } => {
            let file = library.register_path(&path)?;
            let file = apply_tags(&library, &file, &tags, true)?;
            print_file(&file);
        }
        Command::Tag { path, tags } => {
            let file = require_path(&library, &path)?;
            print_file(&apply_tags(&library, &file, &tags, true)?);
        }
        Command::Untag { path, tags } => {
            let file = require_path(&library, &path)?;
            print_file(&apply_tags(&library, &file, &tags, false)?);
        }
        Command::Search {
            name,
            tags,
            offset,
            limit,
        } => search(&library, &name, &tags, offset, limit)?,
        Command::Thumb { path, from, size } => {
            let file = require_path(&library, &path)?;
            let state = library.recreate_thumbnail(file.id, from.as_deref(), size)?;
            report_thumbnail(&library, file.id, size, state)?;
        }
        Command::Thumbs { size } => {
            let progress = ProgressBar::new(0);
            progress.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("#>-"),
            );
            let summary = library.refresh_thumbnails(size, &progress)?;
            info!("Thumbnail refresh done: {:?}", summary);
            println!(
                "{} ready, {} failed, {} unsupported, {} missing",
                summary.ready, summary.failed, summary.unsupported, summary.missing
            );
        }
        Command::Mv { path, target } => {
            let file = require_path(&library, &path)?;
            print_file(&library.move_file(file.id, &target)?);
        }
        Command::Rm { path } => {
            let file = require_path(&library, &path)?;
            library.delete_file(file.id)?;
            println!("Removed {}", file_location(&file.lazy()));
        }
        Command::Metatags(command) => metatags(&library, command)?,
        Command::Tags(command) => tags(&library, command)?,
        Command::Config {
            root,
            randomize,
            port,
            default_metatag,
        } => {
            let settings = library.settings_mut();
            if let Some(root) = root {
                settings.set_root(&root)?;
            }
            if let Some(randomize) = randomize {
                settings.set(Section::Ui, UI_RANDOMIZE, Value::from(randomize))?;
            }
            if let Some(port) = port {
                settings.set(Section::Server, SERVER_PORT, Value::from(port))?;
            }
            if let Some(metatag) = default_metatag {
                settings.set(Section::Ui, UI_DEFAULT_METATAG, Value::from(metatag))?;
            }
            println!("settings: {}", settings.path().display());
            println!("root: {}", settings.root().display());
            println!("randomize: {}", settings.randomize());
            println!("port: {}", settings.port());
            println!("default-metatag: {}", settings.default_metatag().unwrap_or("-"));
        }
    }
    Ok(())
}

fn require_path(library: &Library, path: &Path) -> Result<File> {
    library
        .find_path(path)?
        .ok_or_else(|| anyhow!("{} is not catalogued", path.display()))
}

fn require_tag(library: &Library, name: &str) -> Result<Tag> {
    library
        .catalog()
        .get_by_name::<Tag>(name)?
        .ok_or_else(|| anyhow!("No tag named {:?}", name))
}

fn require_metatag(library: &Library, name: &str) -> Result<Metatag> {
    library
        .catalog()
        .get_by_name::<Metatag>(name)?
        .ok_or_else(|| anyhow!("No metatag named {:?}", name))
}

fn apply_tags(library: &Library, file: &File, names: &[String], add: bool) -> Result<File> {
    let mut file = file.clone();
    for name in names {
        let tag = require_tag(library, name)?;
        file = if add {
            library.add_tag(file.id, tag.id)?
        } else {
            library.remove_tag(file.id, tag.id)?
        };
    }
    Ok(file)
}

fn search(
    library: &Library,
    name: &str,
    tag_names: &[String],
    offset: Option<usize>,
    limit: Option<usize>,
) -> Result<()> {
    let tag_ids = tag_names
        .iter()
        .map(|n| require_tag(library, n).map(|t| t.id))
        .collect::<Result<Vec<_>>>()?;
    let files = library.search_files(name, &tag_ids, offset, limit)?;
    for file in &files {
        println!("{}", file_location(file));
    }

    let available = library.available_tags(&tag_ids, &files)?;
    let metatags = library.available_metatags(&available);
    if !metatags.is_empty() {
        println!();
    }
    for metatag in metatags {
        let names: Vec<&str> = available
            .iter()
            .filter(|t| t.metatag.id == metatag.id)
            .map(|t| t.name.as_str())
            .collect();
        println!("{}: {}", metatag.name, names.join(", "));
    }
    Ok(())
}

fn metatags(library: &Library, command: MetatagCommand) -> Result<()> {
    match command {
        MetatagCommand::List => {
            for metatag in library.catalog().get_all::<Metatag>()? {
                println!("{}", metatag.name);
            }
        }
        MetatagCommand::Add { name } => {
            library.insert_metatag(&name)?;
        }
        MetatagCommand::Rename { name, new_name } => {
            let metatag = require_metatag(library, &name)?;
            library.update_metatag(metatag.id, &new_name)?;
        }
        MetatagCommand::Delete { name } => {
            let metatag = require_metatag(library, &name)?;
            library
                .delete_metatag(metatag.id)
                .with_context(|| format!("Failed to delete metatag {:?}", metatag.name))?;
        }
    }
    Ok(())
}

fn tags(library: &Library, command: TagCommand) -> Result<()> {
    match command {
        TagCommand::List => {
            for tag in library.catalog().get_all::<Tag>()? {
                print_tag(&tag);
            }
        }
        TagCommand::Add { name, metatag } => {
            let metatag = match metatag.as_deref().or(library.settings().default_metatag()) {
                Some(metatag) => require_metatag(library, metatag)?,
                None => bail!("No metatag given and no default-metatag configured"),
            };
            library.insert_tag(&name, metatag.id)?;
        }
        TagCommand::Edit {
            name,
            rename,
            metatag,
        } => {
            let tag = require_tag(library, &name)?;
            let metatag_id = match metatag {
                Some(metatag) => Some(require_metatag(library, &metatag)?.id),
                None => None,
            };
            library.update_tag(tag.id, rename.as_deref(), metatag_id)?;
        }
        TagCommand::Delete { name } => {
            let tag = require_tag(library, &name)?;
            library.delete_tag(tag.id)?;
        }
    }
    Ok(())
}

fn report_thumbnail(library: &Library, file_id: i64, size: u32, state: ThumbnailState) -> Result<()> {
    match state {
        ThumbnailState::Ready(path) => println!("{}", path.display()),
        ThumbnailState::Pending(_) => match library.thumbnail(file_id, size)? {
            Some(path) => println!("{}", path.display()),
            None => bail!("Thumbnail derivation failed"),
        },
        ThumbnailState::Failed => bail!("Thumbnail derivation failed before, recreate to retry"),
        ThumbnailState::Unsupported => bail!("No thumbnail possible for this file type"),
        ThumbnailState::SourceMissing => bail!("Source file is missing"),
    }
    Ok(())
}

fn file_location(file: &FileLazy) -> String {
    if file.relpath.is_empty() {
        file.name.clone()
    } else {
        format!("{}/{}", file.relpath, file.name)
    }
}

fn print_file(file: &File) {
    println!("{} [{}]", file_location(&file.lazy()), file.mime);
    for tag in &file.tags {
        print_tag(tag);
    }
}

fn print_tag(tag: &TagLazy) {
    println!("  {}: {}", tag.metatag.name, tag.name);
}
