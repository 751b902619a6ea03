use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::thread;

use filmvault::assets::DeletePolicy;
use filmvault::config::PlacementMode;
use filmvault::db::RollEdit;
use filmvault::exif::{ExifData, ExifProgress, PhotoExifPayload};
use filmvault::filter::RollFilters;
use filmvault::geocoding::{Geocoder, NominatimGeocoder};
use filmvault::import::ImportProgress;
use filmvault::{logging, Config, Library, Location};

struct Cli {
    config_path: Option<PathBuf>,
    command: String,
    args: Vec<String>,
}

fn parse_args() -> Result<Cli> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" if rest.is_empty() => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" if rest.is_empty() => {
                println!("filmvault {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" if rest.is_empty() => {
                let path = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--config requires a path argument"))?;
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    if rest.is_empty() {
        print_help();
        std::process::exit(1);
    }
    let command = rest.remove(0);
    Ok(Cli {
        config_path,
        command,
        args: rest,
    })
}

fn print_help() {
    println!(
        r#"filmvault - film roll library with EXIF synchronization

USAGE:
    filmvault [OPTIONS] <COMMAND> [ARGS]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

COMMANDS:
    count <DIR>                         Count importable images in a folder
    import <DIR> --film F --camera C --date YYYY-MM-DD
           [--name N] [--lens L] [--lab L] [--notes N] [--move] [--write-exif]
    rolls [--search T] [--film F] [--camera C] [--from D] [--to D] [--favorites]
    show <ROLL>                         Show a roll and its photos
    update-roll <ROLL> [--name N] [--film F] [--camera C] [--lens L]
           [--date D] [--lab L] [--notes N]
    delete-roll <ROLL> [--delete-files] [--delete-originals]
    delete-photos <PHOTO>... [--delete-files]
    cover <ROLL> <PHOTO>                Make a photo the roll cover
    favorite <PHOTO>                    Toggle favorite
    rate <PHOTO> <0-5>
    locate <ROLL> <LAT> <LON> <CITY> <COUNTRY>
           Set the roll location and copy it to photos without their own
    locate --photo <PHOTO> <LAT> <LON> <CITY> <COUNTRY>
    write-exif <ROLL>                   Write roll metadata into every file
    write-exif --photo <PHOTO> --comment TEXT
    clear-exif <ROLL> | --photo <PHOTO>
    read-exif <PHOTO>                   Print embedded metadata as JSON
    search-city <QUERY>

ENVIRONMENT:
    FILMVAULT_CONFIG    Path to config file (overrides default location)
    FILMVAULT_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/filmvault/config.toml"#
    );
}

/// Positional arguments plus `--flag value` / `--switch` options.
struct Args {
    positional: Vec<String>,
    options: Vec<(String, Option<String>)>,
}

const SWITCHES: &[&str] = &[
    "--move",
    "--write-exif",
    "--favorites",
    "--delete-files",
    "--delete-originals",
];

impl Args {
    fn parse(raw: &[String]) -> Result<Self> {
        let mut positional = Vec::new();
        let mut options = Vec::new();
        let mut iter = raw.iter();
        while let Some(arg) = iter.next() {
            if SWITCHES.contains(&arg.as_str()) {
                options.push((arg.clone(), None));
            } else if arg.starts_with("--") {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("{arg} requires a value"))?;
                options.push((arg.clone(), Some(value.clone())));
            } else {
                positional.push(arg.clone());
            }
        }
        Ok(Self {
            positional,
            options,
        })
    }

    fn value(&self, name: &str) -> Option<String> {
        self.options
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.clone())
    }

    fn require(&self, name: &str) -> Result<String> {
        self.value(name).ok_or_else(|| anyhow!("missing {name}"))
    }

    fn flag(&self, name: &str) -> bool {
        self.options.iter().any(|(key, _)| key == name)
    }

    fn id(&self, index: usize, what: &str) -> Result<i64> {
        let raw = self
            .positional
            .get(index)
            .ok_or_else(|| anyhow!("missing {what} id"))?;
        raw.parse()
            .with_context(|| format!("invalid {what} id {raw:?}"))
    }

    fn location(&self, start: usize) -> Result<(f64, f64, String, String)> {
        let [lat, lon, city, country] = self
            .positional
            .get(start..start + 4)
            .ok_or_else(|| anyhow!("expected <LAT> <LON> <CITY> <COUNTRY>"))?
        else {
            bail!("expected <LAT> <LON> <CITY> <COUNTRY>");
        };
        Ok((
            lat.parse().with_context(|| format!("invalid latitude {lat:?}"))?,
            lon.parse().with_context(|| format!("invalid longitude {lon:?}"))?,
            city.clone(),
            country.clone(),
        ))
    }
}

fn main() -> Result<()> {
    let cli = parse_args()?;

    let _ = logging::init(None);

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let args = Args::parse(&cli.args)?;

    if cli.command == "search-city" {
        return search_city(&config, &args);
    }

    let library = Library::open(config).context("Failed to open library")?;
    run(&library, &cli.command, &args)
}

fn run(library: &Library, command: &str, args: &Args) -> Result<()> {
    match command {
        "count" => {
            let dir = args
                .positional
                .first()
                .ok_or_else(|| anyhow!("missing folder"))?;
            let count = library.preview_import_count(std::path::Path::new(dir))?;
            println!("{count} importable images in {dir}");
        }
        "import" => import(library, args)?,
        "rolls" => list_rolls(library, args)?,
        "show" => show_roll(library, args.id(0, "roll")?)?,
        "update-roll" => update_roll(library, args)?,
        "delete-roll" => {
            let policy = DeletePolicy {
                delete_files: args.flag("--delete-files") || args.flag("--delete-originals"),
                delete_originals: args.flag("--delete-originals"),
            };
            let roll_id = args.id(0, "roll")?;
            if !library.delete_roll(roll_id, policy)? {
                bail!("roll {roll_id} not found");
            }
            println!("Deleted roll {roll_id}");
        }
        "delete-photos" => {
            let ids = args
                .positional
                .iter()
                .map(|raw| raw.parse::<i64>().with_context(|| format!("invalid photo id {raw:?}")))
                .collect::<Result<Vec<_>>>()?;
            let deleted = library.delete_photos(&ids, args.flag("--delete-files"))?;
            println!("Deleted {deleted} photos");
        }
        "cover" => {
            let roll_id = args.id(0, "roll")?;
            let photo_id = args.id(1, "photo")?;
            if !library.set_photo_as_cover(roll_id, photo_id)? {
                bail!("photo {photo_id} is not part of roll {roll_id}");
            }
            println!("Photo {photo_id} is now the cover of roll {roll_id}");
        }
        "favorite" => {
            let photo_id = args.id(0, "photo")?;
            let favorite = library.toggle_favorite(photo_id)?;
            println!(
                "Photo {photo_id} {}",
                if favorite { "marked as favorite" } else { "unmarked" }
            );
        }
        "rate" => {
            let photo_id = args.id(0, "photo")?;
            let rating: u8 = args
                .positional
                .get(1)
                .ok_or_else(|| anyhow!("missing rating"))?
                .parse()
                .context("rating must be 0-5")?;
            if !library.update_photo_rating(photo_id, rating)? {
                bail!("photo {photo_id} not found");
            }
        }
        "locate" => {
            if let Some(photo) = args.value("--photo") {
                let photo_id: i64 = photo.parse().context("invalid photo id")?;
                let (lat, lon, city, country) = args.location(0)?;
                let location = Location::new(lat, lon, city, country)?;
                library.update_photo_location(photo_id, Some(&location))?;
                println!("Photo {photo_id} located at {}", location.label());
            } else {
                let roll_id = args.id(0, "roll")?;
                let (lat, lon, city, country) = args.location(1)?;
                let updated =
                    library.apply_roll_location_to_photos(roll_id, lat, lon, &city, &country)?;
                println!("Applied location to {updated} photos");
            }
        }
        "write-exif" => write_exif(library, args)?,
        "clear-exif" => {
            if let Some(photo) = args.value("--photo") {
                let photo_id: i64 = photo.parse().context("invalid photo id")?;
                library.clear_photo_exif(photo_id)?;
                println!("Cleared metadata of photo {photo_id}");
            } else {
                let result = library.clear_roll_exif(args.id(0, "roll")?)?;
                println!("Cleared {} files", result.success_count);
                if let Some(err) = result.partial_failure() {
                    bail!(err);
                }
            }
        }
        "read-exif" => {
            let data = library.read_photo_exif(args.id(0, "photo")?)?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        other => bail!("unknown command {other:?}, see --help"),
    }
    Ok(())
}

fn import(library: &Library, args: &Args) -> Result<()> {
    let source = args
        .positional
        .first()
        .ok_or_else(|| anyhow!("missing source folder"))?;
    let mut options = library.import_options(
        source,
        &args.require("--film")?,
        &args.require("--camera")?,
        &args.require("--date")?,
    )?;
    options.roll_name = args.value("--name");
    options.lens = args.value("--lens");
    options.lab_info = args.value("--lab");
    options.notes = args.value("--notes");
    if args.flag("--move") {
        options.mode = PlacementMode::Move;
    }
    if args.flag("--write-exif") {
        options.auto_write_exif = true;
    }

    let (tx, rx) = mpsc::channel();
    let result = thread::scope(|scope| {
        scope.spawn(move || {
            for event in rx {
                if let ImportProgress::File {
                    current,
                    total,
                    filename,
                    error,
                    ..
                } = event
                {
                    match error {
                        Some(error) => eprintln!("[{current}/{total}] {filename}: {error}"),
                        None => println!("[{current}/{total}] {filename}"),
                    }
                }
            }
        });
        library.import_folder(&options, &AtomicBool::new(false), Some(tx))
    })?;

    println!("{}", result.message);
    if !result.failed_files.is_empty() {
        bail!("{} files could not be imported", result.failed_files.len());
    }
    Ok(())
}

fn list_rolls(library: &Library, args: &Args) -> Result<()> {
    let filters = RollFilters {
        search_term: args.value("--search"),
        film_stock: args.value("--film"),
        camera: args.value("--camera"),
        date_from: args.value("--from"),
        date_to: args.value("--to"),
        has_favorites: args.flag("--favorites"),
    };
    for roll in library.list_rolls_filtered(&filters)? {
        println!(
            "{:>5}  {}  {:<24} {:<20} {}",
            roll.id, roll.shoot_date, roll.film_stock, roll.camera, roll.name
        );
    }
    Ok(())
}

fn show_roll(library: &Library, roll_id: i64) -> Result<()> {
    let detail = library.get_roll_with_photos(roll_id)?;
    let roll = &detail.roll;
    println!("{} ({})", roll.name, roll.path.display());
    println!("  {} on {}, shot {}", roll.film_stock, roll.camera, roll.shoot_date);
    if let Some(location) = &roll.location {
        println!("  {}", location.label());
    }
    for photo in &detail.photos {
        println!(
            "{:>6}  {}{}{} rating {}  {}",
            photo.id,
            if photo.is_cover { "C" } else { " " },
            if photo.is_favorite { "*" } else { " " },
            if photo.exif_synced { "S" } else { " " },
            photo.rating,
            photo.filename
        );
    }
    Ok(())
}

fn update_roll(library: &Library, args: &Args) -> Result<()> {
    let roll_id = args.id(0, "roll")?;
    let roll = library.database().require_roll(roll_id)?;
    let edit = RollEdit {
        id: roll.id,
        name: args.value("--name").unwrap_or(roll.name),
        film_stock: args.value("--film").unwrap_or(roll.film_stock),
        camera: args.value("--camera").unwrap_or(roll.camera),
        lens: args.value("--lens").or(roll.lens),
        shoot_date: args.value("--date").unwrap_or(roll.shoot_date),
        lab_info: args.value("--lab").or(roll.lab_info),
        notes: args.value("--notes").or(roll.notes),
    };
    library.update_roll(&edit)?;
    println!("Updated roll {roll_id}");
    Ok(())
}

fn write_exif(library: &Library, args: &Args) -> Result<()> {
    if let Some(photo) = args.value("--photo") {
        let photo_id: i64 = photo.parse().context("invalid photo id")?;
        let payload = match args.value("--comment") {
            Some(comment) => PhotoExifPayload::CommentOnly { comment },
            None => PhotoExifPayload::Fields(ExifData {
                description: args.value("--description"),
                ..Default::default()
            }),
        };
        library.write_photo_exif(photo_id, &payload)?;
        println!("Wrote metadata to photo {photo_id}");
        return Ok(());
    }

    let roll_id = args.id(0, "roll")?;
    let (tx, rx) = mpsc::channel::<ExifProgress>();
    let result = thread::scope(|scope| {
        scope.spawn(move || {
            for event in rx {
                match event.error {
                    Some(error) => eprintln!(
                        "[{}/{}] {}: {error}",
                        event.completed,
                        event.total,
                        event.path.display()
                    ),
                    None => {
                        println!("[{}/{}] {}", event.completed, event.total, event.path.display())
                    }
                }
            }
        });
        library.write_roll_exif_with_progress(roll_id, &AtomicBool::new(false), Some(tx))
    })?;

    println!("Wrote metadata to {} files", result.success_count);
    if let Some(err) = result.partial_failure() {
        bail!(err);
    }
    Ok(())
}

fn search_city(config: &Config, args: &Args) -> Result<()> {
    let query = args.positional.join(" ");
    let geocoder = NominatimGeocoder::new(&config.geocoding);
    for suggestion in geocoder.search_cities(&query)? {
        println!(
            "{:>10.5} {:>11.5}  {}",
            suggestion.lat, suggestion.lon, suggestion.display_name
        );
    }
    Ok(())
}
