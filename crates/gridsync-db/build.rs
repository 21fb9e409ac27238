use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const MIGRATIONS_DIR: &str = "migrations";

#[derive(Debug, Default)]
struct MigrationPair {
    slug: String,
    up: Option<String>,
    down: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

fn main() {
    let manifest_dir = PathBuf::from(env_var("CARGO_MANIFEST_DIR"));
    let migrations_dir = manifest_dir.join(MIGRATIONS_DIR);
    println!("cargo:rerun-if-changed={}", migrations_dir.display());

    let entries = match fs::read_dir(&migrations_dir) {
        Ok(entries) => entries,
        Err(err) => panic!(
            "gridsync-db build: read {}: {err}",
            migrations_dir.display()
        ),
    };

    let mut by_version: BTreeMap<i32, MigrationPair> = BTreeMap::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => panic!("gridsync-db build: read_dir entry: {err}"),
        };
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        println!("cargo:rerun-if-changed={}", path.display());

        let Some((version, slug, direction)) = parse_file_name(file_name) else {
            continue;
        };
        let pair = by_version.entry(version).or_default();
        pair.slug = slug;
        match direction {
            Direction::Up => pair.up = Some(file_name.to_string()),
            Direction::Down => pair.down = Some(file_name.to_string()),
        }
    }

    let out_path = PathBuf::from(env_var("OUT_DIR")).join("migrations.rs");
    let mut out = match fs::File::create(&out_path) {
        Ok(file) => file,
        Err(err) => panic!("gridsync-db build: create {}: {err}", out_path.display()),
    };

    let mut generated = String::from(
        "/// Generated from `migrations/`; do not edit.\n\
         #[derive(Clone, Copy, Debug)]\n\
         pub struct EmbeddedMigration {\n\
           pub version: i32,\n\
           pub description: &'static str,\n\
           pub up_sql: &'static str,\n\
           pub down_sql: &'static str,\n\
         }\n\
         \n\
         pub static MIGRATIONS: &[EmbeddedMigration] = &[\n",
    );
    for (version, pair) in by_version {
        if pair.up.is_none() {
            panic!("gridsync-db build: migration {version} has no .up.sql file");
        }
        generated.push_str(&format!(
            "  EmbeddedMigration {{ version: {version}, description: {desc:?}, up_sql: {up}, down_sql: {down} }},\n",
            desc = pair.slug.replace('_', " "),
            up = include_expr(pair.up.as_deref()),
            down = include_expr(pair.down.as_deref()),
        ));
    }
    generated.push_str("];\n");

    if let Err(err) = out.write_all(generated.as_bytes()) {
        panic!("gridsync-db build: write {}: {err}", out_path.display());
    }
}

fn env_var(key: &str) -> String {
    match env::var(key) {
        Ok(value) => value,
        Err(err) => panic!("gridsync-db build: missing env {key}: {err}"),
    }
}

/// `0001_grid_schema.up.sql` → (1, "grid_schema", Up).
fn parse_file_name(name: &str) -> Option<(i32, String, Direction)> {
    let (version, rest) = name.split_once('_')?;
    let version: i32 = version.parse().ok()?;
    if let Some(slug) = rest.strip_suffix(".up.sql") {
        return Some((version, slug.to_string(), Direction::Up));
    }
    if let Some(slug) = rest.strip_suffix(".down.sql") {
        return Some((version, slug.to_string(), Direction::Down));
    }
    None
}

fn include_expr(file_name: Option<&str>) -> String {
    match file_name {
        Some(file) => {
            let rel = format!("/{MIGRATIONS_DIR}/{file}");
            format!("include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), {rel:?}))")
        }
        None => "\"\"".to_string(),
    }
}
